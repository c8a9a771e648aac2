//! Global execution settings

use anyhow::{Result, anyhow, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;

use crate::constants::config::DEFAULT_TARGET_WINDOW_TITLE;

/// Settings record persisted next to the bindings.
/// Missing fields fall back to their defaults individually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Move the pointer back to where it was after each click
    pub restore_mouse_position: bool,
    /// Only click while the target window has input focus
    pub require_foreground_window: bool,
    /// Case-insensitive substring of the target window's title
    pub target_window_title: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            restore_mouse_position: true,
            require_foreground_window: false,
            target_window_title: DEFAULT_TARGET_WINDOW_TITLE.to_string(),
        }
    }
}

impl Settings {
    pub fn apply(&mut self, change: &SettingChange) {
        match change {
            SettingChange::RestoreMousePosition(value) => self.restore_mouse_position = *value,
            SettingChange::RequireForegroundWindow(value) => {
                self.require_foreground_window = *value
            }
            SettingChange::TargetWindowTitle(value) => self.target_window_title = value.clone(),
        }
    }

    /// Read settings field by field from a JSON object. Absent or mistyped
    /// fields take their default; their names are pushed onto `repairs`.
    pub fn from_json_lenient(value: &Value, repairs: &mut Vec<String>) -> Self {
        let mut settings = Self::default();
        let Value::Object(fields) = value else {
            warn!(found = %value, "Config settings is not an object, using defaults");
            repairs.push("settings".to_string());
            return settings;
        };

        let Settings {
            restore_mouse_position,
            require_foreground_window,
            target_window_title,
        } = &mut settings;
        read_field(fields, "restore_mouse_position", restore_mouse_position, repairs);
        read_field(fields, "require_foreground_window", require_foreground_window, repairs);
        read_field(fields, "target_window_title", target_window_title, repairs);
        settings
    }
}

fn read_field<T: DeserializeOwned>(
    fields: &Map<String, Value>,
    name: &'static str,
    slot: &mut T,
    repairs: &mut Vec<String>,
) {
    let Some(value) = fields.get(name) else {
        repairs.push(format!("settings.{name}"));
        return;
    };
    match T::deserialize(value) {
        Ok(parsed) => *slot = parsed,
        Err(e) => {
            warn!(
                setting = name,
                found = %value,
                error = %e,
                "Invalid setting value, using default"
            );
            repairs.push(format!("settings.{name}"));
        }
    }
}

/// A change to exactly one setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingChange {
    RestoreMousePosition(bool),
    RequireForegroundWindow(bool),
    TargetWindowTitle(String),
}

impl SettingChange {
    /// Names accepted by [`SettingChange::parse`]
    pub const NAMES: [&'static str; 3] = [
        "restore_mouse_position",
        "require_foreground_window",
        "target_window_title",
    ];

    /// Build a change from a setting name and its textual value
    pub fn parse(name: &str, value: &str) -> Result<Self> {
        match name.trim() {
            "restore_mouse_position" => Ok(Self::RestoreMousePosition(parse_bool(value)?)),
            "require_foreground_window" => Ok(Self::RequireForegroundWindow(parse_bool(value)?)),
            // Any string is a valid title matcher
            "target_window_title" => Ok(Self::TargetWindowTitle(value.to_string())),
            other => bail!(
                "Unknown setting '{}' (expected one of: {})",
                other,
                Self::NAMES.join(", ")
            ),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RestoreMousePosition(_) => Self::NAMES[0],
            Self::RequireForegroundWindow(_) => Self::NAMES[1],
            Self::TargetWindowTitle(_) => Self::NAMES[2],
        }
    }
}

/// Renders the new value the way it is written to disk
impl fmt::Display for SettingChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RestoreMousePosition(value) | Self::RequireForegroundWindow(value) => {
                write!(f, "{value}")
            }
            Self::TargetWindowTitle(value) => write!(f, "{value:?}"),
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        other => Err(anyhow!("Expected a boolean (true/false), got '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.restore_mouse_position);
        assert!(!settings.require_foreground_window);
        assert_eq!(settings.target_window_title, "Valeton");
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"require_foreground_window": true}"#).unwrap();
        assert!(settings.require_foreground_window);
        assert!(settings.restore_mouse_position);
        assert_eq!(settings.target_window_title, "Valeton");
    }

    #[test]
    fn test_lenient_keeps_valid_fields() {
        let value = serde_json::json!({
            "restore_mouse_position": "yes",
            "require_foreground_window": true,
            "target_window_title": "Editor"
        });
        let mut repairs = Vec::new();

        let settings = Settings::from_json_lenient(&value, &mut repairs);

        assert!(settings.restore_mouse_position);
        assert!(settings.require_foreground_window);
        assert_eq!(settings.target_window_title, "Editor");
        assert_eq!(repairs, vec!["settings.restore_mouse_position".to_string()]);
    }

    #[test]
    fn test_lenient_reports_missing_fields() {
        let mut repairs = Vec::new();

        let settings = Settings::from_json_lenient(&serde_json::json!({}), &mut repairs);

        assert_eq!(settings, Settings::default());
        assert_eq!(repairs.len(), 3);
    }

    #[test]
    fn test_lenient_non_object() {
        let mut repairs = Vec::new();

        let settings = Settings::from_json_lenient(&serde_json::json!([1, 2]), &mut repairs);

        assert_eq!(settings, Settings::default());
        assert_eq!(repairs, vec!["settings".to_string()]);
    }

    #[test]
    fn test_parse_bool_settings() {
        assert_eq!(
            SettingChange::parse("restore_mouse_position", "off").unwrap(),
            SettingChange::RestoreMousePosition(false)
        );
        assert_eq!(
            SettingChange::parse("require_foreground_window", "TRUE").unwrap(),
            SettingChange::RequireForegroundWindow(true)
        );
        assert!(SettingChange::parse("restore_mouse_position", "maybe").is_err());
    }

    #[test]
    fn test_parse_title_accepts_any_string() {
        let change = SettingChange::parse("target_window_title", "  My Editor ").unwrap();
        assert_eq!(change, SettingChange::TargetWindowTitle("  My Editor ".to_string()));
        assert_eq!(change.name(), "target_window_title");
    }

    #[test]
    fn test_parse_unknown_setting() {
        let err = SettingChange::parse("volume", "11").unwrap_err();
        assert!(err.to_string().contains("Unknown setting 'volume'"));
    }

    #[test]
    fn test_apply_touches_one_field() {
        let mut settings = Settings::default();
        settings.apply(&SettingChange::TargetWindowTitle("Editor".to_string()));
        assert_eq!(settings.target_window_title, "Editor");
        assert!(settings.restore_mouse_position);
        assert!(!settings.require_foreground_window);
    }

    #[test]
    fn test_display_value() {
        assert_eq!(SettingChange::RestoreMousePosition(false).to_string(), "false");
        assert_eq!(SettingChange::TargetWindowTitle("Valeton".into()).to_string(), "\"Valeton\"");
    }
}
