// Row codec for the flat sample journal. Column order is the export format; do not reorder.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use csv::StringRecord;
use serde::{Deserialize, Serialize};

use crate::models::{Sample, SampleStatus};

pub const HEADER: [&str; 18] = [
    "timestamp",
    "device_id",
    "device_address",
    "hostname",
    "hostname_cached",
    "status",
    "hashrate_ghs",
    "temp_asic_c",
    "temp_vr_c",
    "power_w",
    "voltage_set_mv",
    "voltage_actual_mv",
    "frequency_mhz",
    "shares_accepted",
    "shares_rejected",
    "wifi_rssi",
    "uptime_seconds",
    "efficiency_j_th",
];

/// Rows longer than this are treated as corrupt.
pub const MAX_ROW_BYTES: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct JournalRow {
    timestamp: String,
    device_id: i64,
    device_address: String,
    hostname: String,
    hostname_cached: bool,
    status: SampleStatus,
    hashrate_ghs: Option<f64>,
    temp_asic_c: Option<f64>,
    temp_vr_c: Option<f64>,
    power_w: Option<f64>,
    voltage_set_mv: Option<f64>,
    voltage_actual_mv: Option<f64>,
    frequency_mhz: Option<f64>,
    shares_accepted: Option<u64>,
    shares_rejected: Option<u64>,
    wifi_rssi: Option<i32>,
    uptime_seconds: Option<u64>,
    efficiency_j_th: Option<f64>,
}

pub(super) fn format_timestamp(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => ms.to_string(),
    }
}

fn parse_timestamp(s: &str) -> Result<i64, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| format!("timestamp '{}': {}", s, e))
}

impl JournalRow {
    pub(super) fn from_sample(sample: &Sample, address: &str) -> Self {
        Self {
            timestamp: format_timestamp(sample.timestamp),
            device_id: sample.device_id,
            device_address: address.to_string(),
            hostname: sample.hostname.clone(),
            hostname_cached: sample.hostname_cached,
            status: sample.status,
            hashrate_ghs: sample.hashrate_ghs,
            temp_asic_c: sample.temp_asic_c,
            temp_vr_c: sample.temp_vr_c,
            power_w: sample.power_w,
            voltage_set_mv: sample.voltage_set_mv,
            voltage_actual_mv: sample.voltage_actual_mv,
            frequency_mhz: sample.frequency_mhz,
            shares_accepted: sample.shares_accepted,
            shares_rejected: sample.shares_rejected,
            wifi_rssi: sample.wifi_rssi,
            uptime_seconds: sample.uptime_seconds,
            efficiency_j_th: sample.efficiency_j_th,
        }
    }
}

/// A decoded, structurally valid journal row.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalRecord {
    pub device_address: String,
    pub sample: Sample,
}

/// Decode one record, checking field count, types and that readings are finite.
pub fn parse_record(record: &StringRecord) -> Result<JournalRecord, String> {
    if record.len() != HEADER.len() {
        return Err(format!("expected {} fields, found {}", HEADER.len(), record.len()));
    }
    let byte_len: usize = record.iter().map(str::len).sum::<usize>() + record.len();
    if byte_len > MAX_ROW_BYTES {
        return Err(format!("row is {} bytes, limit {}", byte_len, MAX_ROW_BYTES));
    }
    let row: JournalRow = record.deserialize(None).map_err(|e| e.to_string())?;
    let timestamp = parse_timestamp(&row.timestamp)?;
    let floats = [
        ("hashrate_ghs", row.hashrate_ghs),
        ("temp_asic_c", row.temp_asic_c),
        ("temp_vr_c", row.temp_vr_c),
        ("power_w", row.power_w),
        ("voltage_set_mv", row.voltage_set_mv),
        ("voltage_actual_mv", row.voltage_actual_mv),
        ("frequency_mhz", row.frequency_mhz),
        ("efficiency_j_th", row.efficiency_j_th),
    ];
    for (name, v) in floats {
        if let Some(v) = v
            && !v.is_finite()
        {
            return Err(format!("{} is not finite", name));
        }
    }
    Ok(JournalRecord {
        device_address: row.device_address,
        sample: Sample {
            timestamp,
            device_id: row.device_id,
            hostname: row.hostname,
            hostname_cached: row.hostname_cached,
            status: row.status,
            hashrate_ghs: row.hashrate_ghs,
            temp_asic_c: row.temp_asic_c,
            temp_vr_c: row.temp_vr_c,
            power_w: row.power_w,
            voltage_set_mv: row.voltage_set_mv,
            voltage_actual_mv: row.voltage_actual_mv,
            frequency_mhz: row.frequency_mhz,
            shares_accepted: row.shares_accepted,
            shares_rejected: row.shares_rejected,
            wifi_rssi: row.wifi_rssi,
            uptime_seconds: row.uptime_seconds,
            efficiency_j_th: row.efficiency_j_th,
            raw_payload: None,
        },
    })
}

pub fn is_header(record: &StringRecord) -> bool {
    record.len() == HEADER.len() && record.iter().zip(HEADER).all(|(a, b)| a == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Sample {
        Sample {
            hashrate_ghs: Some(900.0),
            power_w: Some(20.0),
            efficiency_j_th: Some(22.22),
            shares_accepted: Some(10),
            shares_rejected: Some(0),
            ..Sample::failed(1_700_000_000_123, 3, "bitaxe, the \"big\" one".into(), false, SampleStatus::Online)
        }
    }

    fn encode(row: &JournalRow) -> StringRecord {
        let mut w = csv::WriterBuilder::new().has_headers(false).from_writer(vec![]);
        w.serialize(row).unwrap();
        let bytes = w.into_inner().unwrap();
        let mut r = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(bytes.as_slice());
        r.records().next().unwrap().unwrap()
    }

    #[test]
    fn awkward_hostname_survives_quoting() {
        let s = sample();
        let record = encode(&JournalRow::from_sample(&s, "10.0.0.3"));
        assert_eq!(record.len(), HEADER.len());
        let decoded = parse_record(&record).unwrap();
        assert_eq!(decoded.sample, s);
        assert_eq!(decoded.device_address, "10.0.0.3");
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        let record = StringRecord::from(vec!["2024-01-01T00:00:00.000Z", "1"]);
        let err = parse_record(&record).unwrap_err();
        assert!(err.contains("expected 18 fields"));
    }

    #[test]
    fn bad_types_are_rejected() {
        let mut fields: Vec<String> = encode(&JournalRow::from_sample(&sample(), "a"))
            .iter()
            .map(str::to_string)
            .collect();
        fields[6] = "fast".into();
        assert!(parse_record(&StringRecord::from(fields.clone())).is_err());
        fields[6] = "NaN".into();
        assert!(parse_record(&StringRecord::from(fields.clone())).is_err());
        fields[6] = "1.0".into();
        fields[0] = "yesterday".into();
        assert!(parse_record(&StringRecord::from(fields)).is_err());
    }

    #[test]
    fn header_detection() {
        assert!(is_header(&StringRecord::from(HEADER.to_vec())));
        assert!(!is_header(&StringRecord::from(vec!["timestamp"])));
    }
}
