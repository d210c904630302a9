// Device health analytics over stored samples and rollups. Pure functions; the worker feeds them.

pub mod anomaly;
pub mod efficiency;
pub mod fleet;
pub mod growth;
pub mod maintenance;
pub mod worker;

use serde::{Deserialize, Serialize};

pub use anomaly::{Anomaly, AnomalyReport, detect_anomalies};
pub use efficiency::{EfficiencyScore, Factor, efficiency_score};
pub use fleet::{DeviceWindow, FleetInsights, fleet_insights};
pub use growth::{GrowthReport, MetricTrend, TrendDirection, growth_trend};
pub use maintenance::{MaintenancePrediction, PredictedIssue, predict_maintenance};

/// Letter grade for an efficiency score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "B+")]
    BPlus,
    B,
    #[serde(rename = "C+")]
    CPlus,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 90.0 => Grade::APlus,
            s if s >= 85.0 => Grade::A,
            s if s >= 80.0 => Grade::BPlus,
            s if s >= 75.0 => Grade::B,
            s if s >= 70.0 => Grade::CPlus,
            s if s >= 65.0 => Grade::C,
            s if s >= 60.0 => Grade::D,
            _ => Grade::F,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_boundaries() {
        assert_eq!(Grade::from_score(100.0), Grade::APlus);
        assert_eq!(Grade::from_score(90.0), Grade::APlus);
        assert_eq!(Grade::from_score(89.9), Grade::A);
        assert_eq!(Grade::from_score(85.0), Grade::A);
        assert_eq!(Grade::from_score(80.0), Grade::BPlus);
        assert_eq!(Grade::from_score(75.0), Grade::B);
        assert_eq!(Grade::from_score(70.0), Grade::CPlus);
        assert_eq!(Grade::from_score(65.0), Grade::C);
        assert_eq!(Grade::from_score(60.0), Grade::D);
        assert_eq!(Grade::from_score(59.9), Grade::F);
        assert_eq!(Grade::from_score(0.0), Grade::F);
    }

    #[test]
    fn grade_serializes_with_plus() {
        assert_eq!(serde_json::to_string(&Grade::APlus).unwrap(), "\"A+\"");
        assert_eq!(serde_json::to_string(&Grade::D).unwrap(), "\"D\"");
    }
}
