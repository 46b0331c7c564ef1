//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`FleetSettings::default()`]
//! 2. If `~/.printfleet/settings.json` exists, deep-merge it over the defaults
//! 3. Apply `PRINTFLEET_*` environment overrides
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::FleetSettings;

/// Directory holding hub data (`~/.printfleet`).
pub fn data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".printfleet")
}

/// Resolve the path to the settings file (`~/.printfleet/settings.json`).
pub fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Resolve `path` against [`data_dir`] unless it is absolute.
pub fn resolve_data_path(path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir().join(path)
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<FleetSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<FleetSettings> {
    let defaults = serde_json::to_value(FleetSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: FleetSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Out-of-range or unparsable values are logged and ignored.
pub fn apply_env_overrides(settings: &mut FleetSettings) {
    // ── Server ──
    if let Some(v) = read_env_string("PRINTFLEET_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("PRINTFLEET_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("PRINTFLEET_WS_PATH") {
        settings.server.ws_path = v;
    }
    if let Some(v) = read_env_usize("PRINTFLEET_QUEUE_CAPACITY", 1, 1_000_000) {
        settings.server.outbound_queue_capacity = v;
    }
    if let Some(v) = read_env_u64("PRINTFLEET_HANDLER_TIMEOUT_MS", 100, 3_600_000) {
        settings.server.handler_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("PRINTFLEET_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
        settings.server.heartbeat_interval_secs = v;
    }

    // ── Logging ──
    if let Some(v) = read_env_string("PRINTFLEET_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_usize("PRINTFLEET_LOG_HISTORY", 1, 1_000_000) {
        settings.logging.history_capacity = v;
    }

    // ── Machines ──
    if let Some(v) = read_env_u64("PRINTFLEET_CONNECT_TIMEOUT_MS", 100, 600_000) {
        settings.machines.connect_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("PRINTFLEET_OPERATION_TIMEOUT_MS", 100, 3_600_000) {
        settings.machines.operation_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("PRINTFLEET_RECONNECT_INTERVAL_SECS", 1, 86_400) {
        settings.machines.reconnect_interval_secs = v;
    }
    if let Some(v) = read_env_string("PRINTFLEET_CONFIGURATIONS") {
        settings.machines.configurations_path = Some(v);
    }
    if let Some(v) = read_env_u64("PRINTFLEET_FILES_MAX_BYTES", 0, u64::MAX) {
        settings.machines.files_max_bytes = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ──

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ── Tests ──
