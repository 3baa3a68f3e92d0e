//! Named profiles and persisted settings.
//!
//! All settings live in one JSON document. Readers are served from an
//! in-memory copy; every mutation is written to disk atomically (temp file,
//! fsync, rename) before the in-memory copy is swapped, and mutations are
//! serialized by a writer lock.
//! Cross-platform: uses the OS config directory by default.

use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::{CurveConfig, SafetyConfig};
use crate::error::{ControlError, Result};
use crate::protocol::ChannelTargets;
use crate::storage::defaults::{load_document, sanitize};
use crate::storage::types::StoredDocument;

// =============================================================================
// Config Path
// =============================================================================

const APP_NAME: &str = "liquid-cooling-control";
const CONFIG_FILE: &str = "config.json";

/// Get the configuration directory path.
/// - Linux: ~/.config/liquid-cooling-control/
/// - Windows: %APPDATA%\liquid-cooling-control\
pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|p| p.join(APP_NAME))
        .ok_or_else(|| ControlError::InvalidConfig("Could not find config directory".into()))
}

/// Get the full path to the default settings file.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

// =============================================================================
// Profile Store
// =============================================================================

pub struct ProfileStore {
    path: PathBuf,
    doc: RwLock<StoredDocument>,
    writer: Mutex<()>,
}

impl ProfileStore {
    /// Open the document at `path`, falling back to defaults if it is
    /// missing or invalid. Nothing is written until the first mutation.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = load_document(&path);
        debug!(path = %path.display(), profiles = doc.profiles.len(), "Settings loaded");
        Self {
            path,
            doc: RwLock::new(doc),
            writer: Mutex::new(()),
        }
    }

    /// Open the document at the default location.
    pub fn open_default() -> Result<Self> {
        Ok(Self::open(default_config_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the whole document.
    pub fn document(&self) -> StoredDocument {
        self.doc.read().clone()
    }

    // -------------------------------------------------------------------------
    // Profiles
    // -------------------------------------------------------------------------

    /// Create or overwrite a profile.
    pub fn save(&self, name: &str, targets: &ChannelTargets) -> Result<()> {
        let name = validate_name(name)?;
        for (channel, &percent) in targets {
            channel.validate_percent(percent)?;
        }

        self.mutate(|doc| {
            doc.profiles.insert(name.to_string(), targets.clone());
            Ok(())
        })?;
        info!(profile = name, channels = targets.len(), "Profile saved");
        Ok(())
    }

    /// Targets stored under `name`.
    pub fn load(&self, name: &str) -> Result<ChannelTargets> {
        self.doc
            .read()
            .profiles
            .get(name.trim())
            .cloned()
            .ok_or_else(|| ControlError::ProfileNotFound(name.to_string()))
    }

    /// Remove a profile. Deleting the active profile clears the pointer.
    pub fn delete(&self, name: &str) -> Result<()> {
        let name = name.trim();
        self.mutate(|doc| {
            if doc.profiles.remove(name).is_none() {
                return Err(ControlError::ProfileNotFound(name.to_string()));
            }
            if doc.active_profile.as_deref() == Some(name) {
                doc.active_profile = None;
            }
            Ok(())
        })?;
        info!(profile = name, "Profile deleted");
        Ok(())
    }

    /// Profile names in ascending order.
    pub fn list_names(&self) -> Vec<String> {
        self.doc.read().profiles.keys().cloned().collect()
    }

    pub fn active_name(&self) -> Option<String> {
        self.doc.read().active_profile.clone()
    }

    /// Point the active profile at `name`, or clear it.
    pub fn set_active(&self, name: Option<&str>) -> Result<()> {
        let name = name.map(str::trim);
        self.mutate(|doc| {
            if let Some(name) = name
                && !doc.profiles.contains_key(name)
            {
                return Err(ControlError::ProfileNotFound(name.to_string()));
            }
            doc.active_profile = name.map(str::to_string);
            Ok(())
        })
    }

    // -------------------------------------------------------------------------
    // Settings
    // -------------------------------------------------------------------------

    /// Persist the loop's manual targets and fan link flag together.
    pub fn set_control_state(&self, manual: &ChannelTargets, link_fans: bool) -> Result<()> {
        self.mutate(|doc| {
            doc.manual = manual.clone();
            doc.link_fans = link_fans;
            Ok(())
        })
    }

    pub fn update_safety(&self, safety: &SafetyConfig) -> Result<()> {
        safety.validate()?;
        self.mutate(|doc| {
            doc.safety = safety.clone();
            Ok(())
        })
    }

    pub fn update_curves(&self, curves: &CurveConfig) -> Result<()> {
        curves.validate()?;
        self.mutate(|doc| {
            doc.curves = curves.clone();
            Ok(())
        })
    }

    // -------------------------------------------------------------------------
    // Backup
    // -------------------------------------------------------------------------

    /// Write the whole document to `path`.
    pub fn export_to(&self, path: &Path) -> Result<()> {
        let doc = self.document();
        write_atomic(path, &doc)?;
        info!(path = %path.display(), "Settings exported");
        Ok(())
    }

    /// Replace the whole document with the one at `path`.
    ///
    /// Invalid sections in the imported file fall back to defaults.
    pub fn import_from(&self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        let imported = sanitize(serde_json::from_str(&content)?);
        self.mutate(|doc| {
            *doc = imported;
            Ok(())
        })?;
        info!(path = %path.display(), "Settings imported");
        Ok(())
    }

    /// Apply `change` to a copy of the document, persist it, then publish.
    ///
    /// A failed change or write leaves both disk and memory untouched.
    fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut StoredDocument) -> Result<()>,
    {
        let _writer = self.writer.lock();
        let mut next = self.doc.read().clone();
        change(&mut next)?;
        write_atomic(&self.path, &next)?;
        *self.doc.write() = next;
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ControlError::InvalidInput("Profile name cannot be empty".into()));
    }
    Ok(name)
}

/// Write `doc` to `path` via a temp file and rename.
fn write_atomic(path: &Path, doc: &StoredDocument) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(doc)?;
    let temp_path = path.with_extension("json.tmp");

    let mut file = std::fs::File::create(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&temp_path, path)?;
    debug!(path = %path.display(), "Settings written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Channel;
    use std::sync::Arc;

    fn store() -> (tempfile::TempDir, ProfileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(dir.path().join("config.json"));
        (dir, store)
    }

    fn targets(pairs: &[(Channel, u8)]) -> ChannelTargets {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_save_load_round_trip() {
        let (_dir, store) = store();
        let quiet = targets(&[(Channel::Fan(1), 30), (Channel::Fan(2), 35), (Channel::Pump, 60)]);
        store.save("Quiet", &quiet).unwrap();

        assert_eq!(store.load("Quiet").unwrap(), quiet);

        // survives reopening
        let reopened = ProfileStore::open(store.path());
        assert_eq!(reopened.load("Quiet").unwrap(), quiet);
    }

    #[test]
    fn test_save_overwrites() {
        let (_dir, store) = store();
        store.save("p", &targets(&[(Channel::Fan(1), 30)])).unwrap();
        store.save("p", &targets(&[(Channel::Pump, 90)])).unwrap();
        assert_eq!(store.load("p").unwrap(), targets(&[(Channel::Pump, 90)]));
        assert_eq!(store.list_names(), vec!["p"]);
    }

    #[test]
    fn test_list_names_sorted() {
        let (_dir, store) = store();
        for name in ["zeta", "alpha", "mid"] {
            store.save(name, &ChannelTargets::new()).unwrap();
        }
        assert_eq!(store.list_names(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_delete_active_clears_pointer() {
        let (_dir, store) = store();
        store.save("gaming", &targets(&[(Channel::Fan(1), 80)])).unwrap();
        store.set_active(Some("gaming")).unwrap();
        assert_eq!(store.active_name().as_deref(), Some("gaming"));

        store.delete("gaming").unwrap();
        assert_eq!(store.active_name(), None);
        assert!(matches!(store.load("gaming"), Err(ControlError::ProfileNotFound(_))));
        assert!(store.delete("gaming").is_err());
    }

    #[test]
    fn test_set_active_requires_existing() {
        let (_dir, store) = store();
        assert!(store.set_active(Some("ghost")).is_err());
        assert_eq!(store.active_name(), None);
    }

    #[test]
    fn test_rejects_invalid_input() {
        let (_dir, store) = store();
        assert!(store.save("   ", &ChannelTargets::new()).is_err());
        assert!(store.save("x", &targets(&[(Channel::Pump, 101)])).is_err());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_invalid_safety_not_persisted() {
        let (_dir, store) = store();
        let bad = SafetyConfig {
            hysteresis_margin: -1.0,
            ..SafetyConfig::default()
        };
        assert!(store.update_safety(&bad).is_err());
        assert_eq!(store.document().safety, SafetyConfig::default());
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let (dir, store) = store();
        store
            .set_control_state(&targets(&[(Channel::Pump, 70)]), true)
            .unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        let reopened = ProfileStore::open(store.path()).document();
        assert!(reopened.link_fans);
        assert_eq!(reopened.manual[&Channel::Pump], 70);
    }

    #[test]
    fn test_export_import() {
        let (dir, store) = store();
        store.save("night", &targets(&[(Channel::Fan(1), 25)])).unwrap();
        store.set_active(Some("night")).unwrap();
        let backup = dir.path().join("backup.json");
        store.export_to(&backup).unwrap();

        let other = ProfileStore::open(dir.path().join("other.json"));
        other.import_from(&backup).unwrap();
        assert_eq!(other.document(), store.document());
    }

    #[test]
    fn test_concurrent_writers_never_corrupt() {
        let (_dir, store) = store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..10u8 {
                        store
                            .save(&format!("p{}", i), &targets(&[(Channel::Fan(1), i * 10 + j)]))
                            .unwrap();
                        let _ = store.list_names();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let reopened = ProfileStore::open(store.path());
        assert_eq!(reopened.list_names().len(), 8);
        assert_eq!(reopened.load("p3").unwrap()[&Channel::Fan(1)], 39);
    }
}
