//! # rac-settings
//!
//! Gateway configuration, loaded in three layers (lowest first):
//! 1. **Compiled defaults**: [`GatewaySettings::default()`]
//! 2. **Settings file**: `~/.rac/settings.json`, deep-merged over defaults
//! 3. **Environment**: `RAC_*` overrides

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides, load_settings, load_settings_from_path, settings_path};
pub use types::{BrokerSettings, GatewaySettings, LoggingSettings, ServerSettings};
