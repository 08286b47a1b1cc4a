// Centralized version information

// Reported in every status notification and in the boot banner
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

// Build profile, so a debug image on a unit is easy to spot in the log
pub const BUILD_PROFILE: &str = if cfg!(debug_assertions) { "debug" } else { "release" };

// Full version string for logging
pub fn full_version() -> String {
    format!("v{} ({})", FIRMWARE_VERSION, BUILD_PROFILE)
}
