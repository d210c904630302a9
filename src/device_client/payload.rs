// Device JSON payload (GET /api/system/info) and its validation into typed readings.
// Unknown fields are ignored; each known field is range-checked and dropped when implausible.

use serde::Deserialize;
use serde_json::Value;

use crate::error::DataValidationError;
use crate::models::{SampleStatus, efficiency_j_per_th};

/// Raw payload. Fields are loosely typed so one bad field never rejects the whole object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryPayload {
    #[serde(rename = "hashRate")]
    pub hash_rate: Option<Value>,
    pub temp: Option<Value>,
    #[serde(rename = "vrTemp")]
    pub vr_temp: Option<Value>,
    pub power: Option<Value>,
    #[serde(rename = "coreVoltage")]
    pub core_voltage: Option<Value>,
    #[serde(rename = "coreVoltageActual")]
    pub core_voltage_actual: Option<Value>,
    pub frequency: Option<Value>,
    #[serde(rename = "sharesAccepted")]
    pub shares_accepted: Option<Value>,
    #[serde(rename = "sharesRejected")]
    pub shares_rejected: Option<Value>,
    #[serde(rename = "uptimeSeconds")]
    pub uptime_seconds: Option<Value>,
    #[serde(rename = "wifiRSSI")]
    pub wifi_rssi: Option<Value>,
    #[serde(rename = "wifiStatus")]
    pub wifi_status: Option<Value>,
    pub hostname: Option<Value>,
}

/// Validated readings from one payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readings {
    pub hostname: Option<String>,
    pub hashrate_ghs: Option<f64>,
    pub temp_asic_c: Option<f64>,
    pub temp_vr_c: Option<f64>,
    pub power_w: Option<f64>,
    pub voltage_set_mv: Option<f64>,
    pub voltage_actual_mv: Option<f64>,
    pub frequency_mhz: Option<f64>,
    pub shares_accepted: Option<u64>,
    pub shares_rejected: Option<u64>,
    pub uptime_seconds: Option<u64>,
    pub wifi_rssi: Option<i32>,
    pub wifi_status: Option<String>,
    /// Fields dropped during validation.
    pub rejected: Vec<DataValidationError>,
}

impl Readings {
    pub fn efficiency_j_th(&self) -> Option<f64> {
        efficiency_j_per_th(self.hashrate_ghs?, self.power_w?)
    }
}

fn number(
    field: &'static str,
    value: &Option<Value>,
    min: f64,
    max: f64,
    rejected: &mut Vec<DataValidationError>,
) -> Option<f64> {
    let v = value.as_ref()?;
    let n = match v {
        Value::Number(n) => n.as_f64(),
        // Some firmware builds send numbers as strings.
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null => return None,
        _ => None,
    };
    match n {
        Some(n) if n.is_finite() && (min..=max).contains(&n) => Some(n),
        Some(n) => {
            rejected.push(DataValidationError::new(
                field,
                format!("{} outside [{}, {}]", n, min, max),
            ));
            None
        }
        None => {
            rejected.push(DataValidationError::new(field, format!("not a number: {}", v)));
            None
        }
    }
}

fn counter(field: &'static str, value: &Option<Value>, rejected: &mut Vec<DataValidationError>) -> Option<u64> {
    number(field, value, 0.0, u64::MAX as f64, rejected).map(|n| n as u64)
}

fn text(value: &Option<Value>) -> Option<String> {
    match value.as_ref()? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        _ => None,
    }
}

impl TelemetryPayload {
    /// Validate and default every field. Never fails; bad fields land in `Readings::rejected`.
    pub fn validate(&self) -> Readings {
        let mut rejected = Vec::new();
        let hostname = text(&self.hostname).filter(|h| !h.eq_ignore_ascii_case("unknown"));

        // Voltage may be reported in volts by older firmware; normalise to mV.
        let mut voltage_set_mv = number("coreVoltage", &self.core_voltage, 0.0, 5_000.0, &mut rejected);
        if let Some(v) = voltage_set_mv
            && v > 0.0
            && v < 5.0
        {
            voltage_set_mv = Some(v * 1000.0);
        }
        let mut voltage_actual_mv = number(
            "coreVoltageActual",
            &self.core_voltage_actual,
            0.0,
            5_000.0,
            &mut rejected,
        );
        if let Some(v) = voltage_actual_mv
            && v > 0.0
            && v < 5.0
        {
            voltage_actual_mv = Some(v * 1000.0);
        }

        Readings {
            hostname,
            hashrate_ghs: number("hashRate", &self.hash_rate, 0.0, 1_000_000.0, &mut rejected),
            temp_asic_c: number("temp", &self.temp, -40.0, 150.0, &mut rejected),
            temp_vr_c: number("vrTemp", &self.vr_temp, -40.0, 150.0, &mut rejected),
            power_w: number("power", &self.power, 0.0, 5_000.0, &mut rejected),
            voltage_set_mv,
            voltage_actual_mv,
            frequency_mhz: number("frequency", &self.frequency, 0.0, 5_000.0, &mut rejected),
            shares_accepted: counter("sharesAccepted", &self.shares_accepted, &mut rejected),
            shares_rejected: counter("sharesRejected", &self.shares_rejected, &mut rejected),
            uptime_seconds: counter("uptimeSeconds", &self.uptime_seconds, &mut rejected),
            wifi_rssi: number("wifiRSSI", &self.wifi_rssi, -127.0, 0.0, &mut rejected).map(|n| n as i32),
            wifi_status: text(&self.wifi_status),
            rejected,
        }
    }
}

/// Health classification of a device that answered with telemetry. First match wins.
pub fn classify(r: &Readings) -> SampleStatus {
    let hashrate = r.hashrate_ghs.unwrap_or(0.0);
    if hashrate <= 0.0 {
        return SampleStatus::NoHashrate;
    }
    let temp = r.temp_asic_c.unwrap_or(0.0);
    if temp >= 85.0 {
        return SampleStatus::Overheating;
    }
    if temp <= 0.0 {
        return SampleStatus::NoTempSensor;
    }
    if let Some(ref wifi) = r.wifi_status {
        let wifi = wifi.to_ascii_lowercase();
        if wifi.contains("disconnected") || wifi.contains("failed") {
            return SampleStatus::WifiIssues;
        }
    }
    let accepted = r.shares_accepted.unwrap_or(0);
    let rejected = r.shares_rejected.unwrap_or(0);
    let total = accepted + rejected;
    if total > 0 && rejected as f64 / total as f64 > 0.10 {
        return SampleStatus::HighRejection;
    }
    if let Some(power) = r.power_w {
        if power > 35.0 {
            return SampleStatus::HighPower;
        }
        if power < 5.0 {
            return SampleStatus::LowPower;
        }
    }
    SampleStatus::Online
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: &str) -> TelemetryPayload {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn typical_payload_validates_cleanly() {
        let p = payload(
            r#"{"hashRate": 512.3, "temp": 58.5, "vrTemp": 49, "power": 13.2,
                "coreVoltage": 1200, "coreVoltageActual": 1188, "frequency": 525,
                "sharesAccepted": 1040, "sharesRejected": 3, "uptimeSeconds": 86400,
                "wifiRSSI": -61, "wifiStatus": "Connected!", "hostname": "bitaxe-01",
                "ASICModel": "BM1366"}"#,
        );
        let r = p.validate();
        assert!(r.rejected.is_empty(), "{:?}", r.rejected);
        assert_eq!(r.hostname.as_deref(), Some("bitaxe-01"));
        assert_eq!(r.voltage_set_mv, Some(1200.0));
        assert_eq!(r.shares_accepted, Some(1040));
        assert_eq!(r.wifi_rssi, Some(-61));
        assert_eq!(classify(&r), SampleStatus::Online);
    }

    #[test]
    fn invalid_fields_are_dropped_not_fatal() {
        let p = payload(r#"{"hashRate": "fast", "temp": 9000, "power": 15, "hostname": "Unknown"}"#);
        let r = p.validate();
        assert_eq!(r.hashrate_ghs, None);
        assert_eq!(r.temp_asic_c, None);
        assert_eq!(r.power_w, Some(15.0));
        assert_eq!(r.hostname, None);
        let fields: Vec<_> = r.rejected.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["hashRate", "temp"]);
    }

    #[test]
    fn volts_are_normalised_to_millivolts() {
        let r = payload(r#"{"coreVoltage": 1.15}"#).validate();
        assert_eq!(r.voltage_set_mv, Some(1150.0));
    }

    #[test]
    fn classification_order() {
        let base = Readings {
            hashrate_ghs: Some(500.0),
            temp_asic_c: Some(60.0),
            power_w: Some(14.0),
            ..Default::default()
        };
        assert_eq!(classify(&base), SampleStatus::Online);

        let r = Readings { hashrate_ghs: Some(0.0), temp_asic_c: Some(95.0), ..base.clone() };
        assert_eq!(classify(&r), SampleStatus::NoHashrate);

        let r = Readings { temp_asic_c: Some(85.0), ..base.clone() };
        assert_eq!(classify(&r), SampleStatus::Overheating);

        let r = Readings { temp_asic_c: Some(0.0), ..base.clone() };
        assert_eq!(classify(&r), SampleStatus::NoTempSensor);

        let r = Readings { wifi_status: Some("Disconnected".into()), ..base.clone() };
        assert_eq!(classify(&r), SampleStatus::WifiIssues);

        let r = Readings { shares_accepted: Some(80), shares_rejected: Some(20), ..base.clone() };
        assert_eq!(classify(&r), SampleStatus::HighRejection);

        let r = Readings { power_w: Some(40.0), ..base.clone() };
        assert_eq!(classify(&r), SampleStatus::HighPower);

        let r = Readings { power_w: Some(3.0), ..base };
        assert_eq!(classify(&r), SampleStatus::LowPower);
    }
}
