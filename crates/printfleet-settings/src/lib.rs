//! # printfleet-settings
//!
//! Layered configuration for the printfleet hub.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`FleetSettings::default()`]
//! 2. **User file**: `~/.printfleet/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PRINTFLEET_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    data_dir, deep_merge, load_settings, load_settings_from_path, resolve_data_path, settings_path,
};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<FleetSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.printfleet/settings.json` with env
/// var overrides, falling back to compiled defaults if loading fails.
pub fn get_settings() -> &'static FleetSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// # Errors
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: FleetSettings) -> std::result::Result<(), FleetSettings> {
    SETTINGS.set(settings)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_merge_re_exported() {
        let merged = deep_merge(serde_json::json!({"x": 1}), serde_json::json!({"y": 2}));
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }

    #[test]
    fn settings_path_is_under_data_dir() {
        assert!(settings_path().starts_with(data_dir()));
        assert!(settings_path().ends_with("settings.json"));
    }
}
