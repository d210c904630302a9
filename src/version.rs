// Name and version baked in at build time; reported by /version and sent to devices.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const NAME: &str = env!("CARGO_PKG_NAME");

/// User-Agent for device polls, e.g. "minerwatch/0.3.0".
pub fn user_agent() -> String {
    format!("{}/{}", NAME, VERSION)
}
