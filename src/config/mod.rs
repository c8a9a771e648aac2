//! Configuration management for KeyClick
//!
//! - **store**: the JSON document holding key bindings and settings
//! - **settings**: the settings record and typed single-setting changes

pub mod settings;
pub mod store;

use std::path::PathBuf;

// Re-export commonly used types
pub use settings::{SettingChange, Settings};
pub use store::{Point, Store};

/// Default config file location: `$XDG_CONFIG_HOME/keyclick/config.json`
pub fn default_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(crate::constants::config::APP_DIR);
    path.push(crate::constants::config::FILENAME);
    path
}
