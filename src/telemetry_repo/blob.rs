// BLOB version prefix helpers. [version: u8][payload].
// status_histogram: version 1 = Vec<StatusCount> (wincode).

use crate::error::PersistenceError;
use crate::models::StatusCount;

pub(super) const HISTOGRAM_BLOB_VERSION: u8 = 1;

pub(super) fn with_version_prefix(version: u8, payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(version);
    out.extend_from_slice(&payload);
    out
}

pub(super) fn blob_version(bytes: &[u8]) -> u8 {
    if bytes.is_empty() { 0 } else { bytes[0] }
}

pub(super) fn encode_histogram(histogram: &[StatusCount]) -> Result<Vec<u8>, PersistenceError> {
    let payload = wincode::serialize(&histogram.to_vec())
        .map_err(|e| PersistenceError::Encode(format!("wincode status_histogram: {}", e)))?;
    Ok(with_version_prefix(HISTOGRAM_BLOB_VERSION, payload))
}

/// Decode a histogram blob; unknown versions or corrupt payloads decode as empty and are logged.
pub(super) fn decode_histogram(bytes: &[u8]) -> Vec<StatusCount> {
    match blob_version(bytes) {
        HISTOGRAM_BLOB_VERSION => wincode::deserialize(&bytes[1..]).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "wincode deserialize status_histogram, using empty");
            Vec::new()
        }),
        0 => Vec::new(),
        other => {
            tracing::debug!(version = other, "unknown status_histogram blob version, using empty");
            Vec::new()
        }
    }
}
