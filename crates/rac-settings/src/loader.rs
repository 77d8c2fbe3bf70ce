//! Settings loading.
//!
//! 1. Start with [`GatewaySettings::default()`]
//! 2. Deep-merge the settings file over it when the file exists (objects merge
//!    per key, arrays and scalars replace, nulls are skipped)
//! 3. Apply `RAC_*` environment overrides
//! 4. Validate

use std::path::{Path, PathBuf};

use rac_core::merge::deep_merge;
use rac_logging::LogFormat;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::GatewaySettings;

/// `~/.rac/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".rac").join("settings.json")
}

/// Load from [`settings_path`] with process environment overrides.
pub fn load_settings() -> Result<GatewaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` with process environment overrides.
///
/// A missing file yields defaults; unreadable or malformed files are errors.
pub fn load_settings_from_path(path: &Path) -> Result<GatewaySettings> {
    load_with(path, |key| std::env::var(key).ok())
}

fn load_with(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<GatewaySettings> {
    let defaults = serde_json::to_value(GatewaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: GatewaySettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Apply `RAC_*` overrides read through `env`.
///
/// Values that fail to parse or fall outside their range are ignored with a
/// warning, leaving the file/default value in place.
pub fn apply_overrides(settings: &mut GatewaySettings, env: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| env(key).filter(|v| !v.is_empty());

    if let Some(v) = read("RAC_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("RAC_PORT") {
        match v.parse::<u16>() {
            Ok(port) => settings.server.port = port,
            Err(_) => invalid("RAC_PORT", &v),
        }
    }
    if let Some(v) = read("RAC_PAIR_TIMEOUT_SECS") {
        match parse_u64_range(&v, 0, 86_400) {
            Some(secs) => settings.broker.pair_timeout_secs = secs,
            None => invalid("RAC_PAIR_TIMEOUT_SECS", &v),
        }
    }
    if let Some(v) = read("RAC_CHANNEL_CAPACITY") {
        match parse_u64_range(&v, 1, 1_000_000).and_then(|n| usize::try_from(n).ok()) {
            Some(n) => settings.broker.channel_capacity = n,
            None => invalid("RAC_CHANNEL_CAPACITY", &v),
        }
    }
    if let Some(v) = read("RAC_FAIL_FAST") {
        match parse_bool(&v) {
            Some(b) => settings.broker.fail_fast_without_instances = b,
            None => invalid("RAC_FAIL_FAST", &v),
        }
    }
    if let Some(v) = read("RAC_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("RAC_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(f) => settings.logging.format = f,
            None => invalid("RAC_LOG_FORMAT", &v),
        }
    }
    if let Some(v) = read("RAC_CATALOG") {
        settings.catalog_path = Some(v);
    }
}

fn invalid(key: &str, value: &str) {
    warn!(key, value, "invalid env override, ignoring");
}

/// Parse `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, case-insensitively.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u64` within `min..=max`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}
