// Numeric helpers shared by aggregation, analytics and optimization. Inputs must be finite.

/// Arithmetic mean; None for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1). Zero for fewer than two values.
pub fn std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

/// Coefficient of variation as a percentage. None when the mean is not positive.
pub fn cv_percent(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    if m <= 0.0 {
        return None;
    }
    Some(std_dev(values) / m * 100.0)
}

pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

/// Ordinary least squares y = slope * x + intercept.
/// None for fewer than two points or when all x are equal.
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> Option<Regression> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let xs = &xs[..n];
    let ys = &ys[..n];
    let mx = xs.iter().sum::<f64>() / n as f64;
    let my = ys.iter().sum::<f64>() / n as f64;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        sxx += (x - mx) * (x - mx);
        sxy += (x - mx) * (y - my);
        syy += (y - my) * (y - my);
    }
    if sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    let intercept = my - slope * mx;
    // A flat series is perfectly explained by a flat line.
    let r_squared = if syy == 0.0 {
        1.0
    } else {
        ((sxy * sxy) / (sxx * syy)).clamp(0.0, 1.0)
    };
    Some(Regression {
        slope,
        intercept,
        r_squared,
    })
}

/// Regression against the index 0..n.
pub fn trend(ys: &[f64]) -> Option<Regression> {
    let xs: Vec<f64> = (0..ys.len()).map(|i| i as f64).collect();
    linear_regression(&xs, ys)
}

/// Round to the given number of decimals.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let f = 10f64.powi(decimals);
    (value * f).round() / f
}
