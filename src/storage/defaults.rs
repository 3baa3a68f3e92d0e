//! Tolerant loading of the settings document.
//!
//! An unreadable or malformed document falls back to built-in defaults. A
//! partially valid one keeps every section and profile that validates and
//! replaces the rest, logging each replacement.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use crate::config::{CurveConfig, DaemonSettings, SafetyConfig};
use crate::error::Result;
use crate::protocol::{Channel, ChannelTargets, MAX_PERCENT};
use crate::storage::types::StoredDocument;

/// Load the document at `path`, never failing.
///
/// A missing file yields defaults silently; anything else that prevents a
/// clean load is logged.
pub fn load_document(path: &Path) -> StoredDocument {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StoredDocument::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Settings unreadable, using defaults");
            return StoredDocument::default();
        }
    };

    match serde_json::from_str::<Value>(&content) {
        Ok(raw) => sanitize(raw),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Settings are not valid JSON, using defaults");
            StoredDocument::default()
        }
    }
}

/// Build a document from raw JSON, keeping the valid subset.
pub fn sanitize(raw: Value) -> StoredDocument {
    let Value::Object(root) = raw else {
        warn!("Settings document is not an object, using defaults");
        return StoredDocument::default();
    };

    let mut doc = StoredDocument {
        safety: section(&root, "safety", SafetyConfig::validate),
        curves: section(&root, "curves", CurveConfig::validate),
        daemon: section(&root, "daemon", DaemonSettings::validate),
        ..StoredDocument::default()
    };

    if let Some(Value::Object(profiles)) = root.get("profiles") {
        for (name, targets) in profiles {
            let name = name.trim();
            if name.is_empty() {
                warn!("Dropping profile with empty name");
                continue;
            }
            match targets {
                Value::Object(entries) => {
                    doc.profiles
                        .insert(name.to_string(), channel_targets(entries, name));
                }
                _ => warn!(profile = name, "Dropping malformed profile"),
            }
        }
    }

    doc.active_profile = match root.get("active_profile") {
        Some(Value::String(name)) if doc.profiles.contains_key(name.trim()) => {
            Some(name.trim().to_string())
        }
        Some(Value::String(name)) => {
            warn!(profile = %name, "Active profile no longer exists, clearing");
            None
        }
        _ => None,
    };

    if let Some(Value::Object(entries)) = root.get("manual") {
        doc.manual = channel_targets(entries, "manual");
    }
    doc.link_fans = root
        .get("link_fans")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    doc
}

/// Deserialize and validate one section, falling back to its default.
fn section<T>(root: &Map<String, Value>, key: &str, validate: fn(&T) -> Result<()>) -> T
where
    T: DeserializeOwned + Default,
{
    let Some(value) = root.get(key) else {
        return T::default();
    };

    let parsed = serde_json::from_value::<T>(value.clone())
        .map_err(crate::error::ControlError::from)
        .and_then(|section| validate(&section).map(|()| section));

    match parsed {
        Ok(section) => section,
        Err(e) => {
            warn!(section = key, error = %e, "Invalid settings section, using defaults");
            T::default()
        }
    }
}

/// Parse `{channel: percent}` entries, skipping invalid ones.
fn channel_targets(entries: &Map<String, Value>, owner: &str) -> ChannelTargets {
    let mut targets = ChannelTargets::new();
    for (key, value) in entries {
        let channel = key.parse::<Channel>();
        let percent = value
            .as_u64()
            .filter(|&p| p <= u64::from(MAX_PERCENT))
            .map(|p| p as u8);

        match (channel, percent) {
            (Ok(channel), Some(percent)) => {
                targets.insert(channel, percent);
            }
            _ => warn!(owner, channel = %key, value = %value, "Skipping invalid channel target"),
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_not_an_object() {
        assert_eq!(sanitize(json!([1, 2, 3])), StoredDocument::default());
    }

    #[test]
    fn test_partial_document_keeps_valid_sections() {
        let raw = json!({
            "safety": {"enabled": true, "cpu_threshold": 80, "hysteresis_margin": 0},
            "curves": {"enabled": true},
            "profiles": {
                "quiet": {"fan1": 30, "pump": 60},
                "broken": "nope",
                "mixed": {"fan2": 50, "fan0": 20, "pump": 180}
            },
            "active_profile": "quiet",
            "link_fans": true
        });
        let doc = sanitize(raw);

        // zero margin rejected, whole section replaced
        assert_eq!(doc.safety, SafetyConfig::default());
        assert!(doc.curves.enabled);
        assert_eq!(doc.profiles.len(), 2);
        assert_eq!(doc.profiles["quiet"][&Channel::Pump], 60);
        assert_eq!(doc.profiles["mixed"].len(), 1);
        assert_eq!(doc.profiles["mixed"][&Channel::Fan(2)], 50);
        assert_eq!(doc.active_profile.as_deref(), Some("quiet"));
        assert!(doc.link_fans);
    }

    #[test]
    fn test_dangling_active_profile_cleared() {
        let doc = sanitize(json!({"profiles": {}, "active_profile": "gone"}));
        assert_eq!(doc.active_profile, None);
    }

    #[test]
    fn test_unsorted_curve_replaced() {
        let raw = json!({"curves": {
            "enabled": true,
            "cpu": {"points": [
                {"temp": 60, "percent": 20},
                {"temp": 40, "percent": 50},
                {"temp": 80, "percent": 100}
            ]}
        }});
        assert_eq!(sanitize(raw).curves, CurveConfig::default());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let doc = load_document(&dir.path().join("absent.json"));
        assert_eq!(doc, StoredDocument::default());
    }

    #[test]
    fn test_corrupt_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ half written").unwrap();
        assert_eq!(load_document(&path), StoredDocument::default());
    }
}
