// Registered device. Rows are created when the scheduler syncs configuration and never deleted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: i64,
    /// Network address (host or host:port), unique.
    pub address: String,
    pub display_name: String,
    pub baseline_hashrate_ghs: f64,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fallback display name when neither the payload nor the cache knows the hostname.
pub fn fallback_name(address: &str) -> String {
    let host = address.split(':').next().unwrap_or(address);
    let suffix = host.rsplit('.').next().unwrap_or(host);
    format!("miner-{}", suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_uses_last_octet() {
        assert_eq!(fallback_name("192.168.1.42"), "miner-42");
        assert_eq!(fallback_name("10.0.0.7:8080"), "miner-7");
        assert_eq!(fallback_name("bitaxe"), "miner-bitaxe");
    }
}
