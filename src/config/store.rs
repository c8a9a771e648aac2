//! Persisted key bindings and settings
//!
//! The whole document is rewritten on every mutation. A missing or
//! unparsable file is never an error: it is replaced with defaults and
//! written back. Inside a parsable file only the broken parts are defaulted.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::settings::{SettingChange, Settings};
use crate::keys;

/// Screen-space pixel position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// On-disk shape of the config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub mappings: BTreeMap<String, Point>,
    pub settings: Settings,
    /// Unrecognized top-level fields, written back untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Document {
    /// Build a document from parsed JSON, keeping every valid part.
    /// Returns the document and the names of the parts that were defaulted
    /// or dropped.
    fn repair(value: Value) -> (Self, Vec<String>) {
        let mut repairs = Vec::new();
        let Value::Object(mut fields) = value else {
            warn!("Config file is not a JSON object, using defaults");
            repairs.push("document".to_string());
            return (Self::default(), repairs);
        };

        let mappings = match fields.remove("mappings") {
            Some(value) => repair_mappings(value, &mut repairs),
            None => {
                repairs.push("mappings".to_string());
                BTreeMap::new()
            }
        };
        let settings = match fields.remove("settings") {
            Some(value) => Settings::from_json_lenient(&value, &mut repairs),
            None => {
                repairs.push("settings".to_string());
                Settings::default()
            }
        };

        (
            Self {
                mappings,
                settings,
                extra: fields,
            },
            repairs,
        )
    }
}

/// Keep every well-formed binding; invalid entries are dropped one by one
fn repair_mappings(value: Value, repairs: &mut Vec<String>) -> BTreeMap<String, Point> {
    let Value::Object(entries) = value else {
        warn!(found = %value, "Config mappings is not an object, using no bindings");
        repairs.push("mappings".to_string());
        return BTreeMap::new();
    };

    let mut mappings = BTreeMap::new();
    for (raw_key, raw_point) in entries {
        let point = match Point::deserialize(&raw_point) {
            Ok(point) => point,
            Err(e) => {
                warn!(key = %raw_key, found = %raw_point, error = %e, "Dropping invalid binding");
                repairs.push(format!("mappings.{raw_key}"));
                continue;
            }
        };

        let key = keys::normalize(&raw_key);
        if key != raw_key {
            repairs.push(format!("mappings.{raw_key}"));
        }
        if let Some(previous) = mappings.insert(key.clone(), point) {
            warn!(
                key = %key,
                kept = %point,
                dropped = %previous,
                "Bindings differing only in case were merged"
            );
        }
    }
    mappings
}

/// Bindings and settings backed by a JSON file
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    document: Document,
}

impl Store {
    /// Load the store from `path`, falling back to defaults.
    /// Defaults and repaired documents are written back immediately.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (document, needs_save) = match Self::read(&path) {
            Ok(Some(value)) => {
                let (document, repairs) = Document::repair(value);
                if !repairs.is_empty() {
                    info!(path = %path.display(), repaired = ?repairs, "Repaired config file");
                }
                (document, !repairs.is_empty())
            }
            Ok(None) => {
                info!(path = %path.display(), "Config file not found, creating default config");
                (Document::default(), true)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = ?e,
                    "Config file unreadable, replacing with defaults"
                );
                (Document::default(), true)
            }
        };

        let store = Self { path, document };
        if needs_save && let Err(e) = store.save() {
            error!(error = ?e, "Failed to save config");
        }
        info!(
            path = %store.path.display(),
            bindings = store.document.mappings.len(),
            "Loaded config"
        );
        store
    }

    /// `Ok(None)` when the file does not exist
    fn read(path: &Path) -> Result<Option<Value>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let value = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse JSON from {}", path.display()))?;
        Ok(Some(value))
    }

    /// Write the current document to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        let json = serde_json::to_string_pretty(&self.document)
            .context("Failed to serialize config to JSON")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bindings(&self) -> &BTreeMap<String, Point> {
        &self.document.mappings
    }

    pub fn get(&self, key: &str) -> Option<Point> {
        self.document.mappings.get(&keys::normalize(key)).copied()
    }

    /// Add or silently overwrite a binding, then persist.
    /// On error the binding is kept in memory but was not written.
    pub fn set(&mut self, key: &str, point: Point) -> Result<()> {
        let key = keys::normalize(key);
        info!(key = %key, x = point.x, y = point.y, "Saving binding");
        self.document.mappings.insert(key, point);
        self.save()
    }

    /// Remove a binding. `Ok(false)` when the key had none.
    /// On error the binding was removed in memory but the file was not updated.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        if self.document.mappings.remove(&keys::normalize(key)).is_none() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    pub fn settings(&self) -> &Settings {
        &self.document.settings
    }

    /// Update a single setting and persist
    pub fn apply(&mut self, change: &SettingChange) -> Result<()> {
        self.document.settings.apply(change);
        self.save()
            .with_context(|| format!("Failed to save setting '{}'", change.name()))
    }
}
