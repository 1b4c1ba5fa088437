//! Settings persistence.

pub mod config;

pub use config::{
    load_settings, load_settings_from, save_settings, save_settings_to, ConfigError,
    ConnectionSettings, MonitorSettings,
};
