//! Profile persistence on flash
//!
//! Writes go through [`ProfileStore::atomic_write`]: temp file, length check,
//! backup of the old content, then one rename over the target. The target
//! always holds either the old or the new document in full.

use std::path::Path;

use tracing::{debug, error, info, warn};

use super::{Profile, ProfileDocument};
use crate::config::Config;
use crate::error::StoreError;
use crate::hal::FlashFs;

const TMP_SUFFIX: &str = ".tmp";

/// Owns the flash filesystem and the active profile
pub struct ProfileStore {
    fs: Box<dyn FlashFs>,
    num_profiles: u8,
    num_keys: u8,
    default_delay_ms: u64,
    backup_dir: String,
    active_id: u8,
    active: Option<Profile>,
}

impl ProfileStore {
    pub fn new(fs: Box<dyn FlashFs>, config: &Config) -> Self {
        Self {
            fs,
            num_profiles: config.device.num_profiles.max(1),
            num_keys: config.device.num_keys,
            default_delay_ms: config.macros.default_delay_ms,
            backup_dir: config.storage.backup_dir.trim_end_matches('/').to_string(),
            active_id: config.device.start_profile.clamp(1, config.device.num_profiles.max(1)),
            active: None,
        }
    }

    /// Make sure the backup directory exists
    pub fn ensure_layout(&mut self) -> Result<(), StoreError> {
        self.fs.create_dir(&self.backup_dir)?;
        Ok(())
    }

    pub fn num_profiles(&self) -> u8 {
        self.num_profiles
    }

    /// Slot the device points at, loaded or not
    pub fn active_id(&self) -> u8 {
        self.active_id
    }

    pub fn active(&self) -> Option<&Profile> {
        self.active.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.active.is_some()
    }

    /// Drop the active profile; macros stop firing until the next load
    pub fn unload(&mut self) {
        if let Some(profile) = self.active.take() {
            info!("unloaded profile {} '{}'", profile.id, profile.name);
        }
    }

    pub fn profile_path(&self, id: u8) -> String {
        format!("/profile{}.json", id)
    }

    pub fn fs(&self) -> &dyn FlashFs {
        self.fs.as_ref()
    }

    pub fn into_fs(self) -> Box<dyn FlashFs> {
        self.fs
    }

    /// Load slot `id` and make it active. All-or-nothing: on any failure the
    /// previous profile stays active.
    pub fn load_profile(&mut self, id: u8, now_ms: u64) -> Result<&Profile, StoreError> {
        if id < 1 || id > self.num_profiles {
            return Err(StoreError::OutOfRange {
                id: id as i64,
                max: self.num_profiles,
            });
        }

        let path = self.profile_path(id);
        if !self.fs.exists(&path) {
            info!("{} missing, writing default profile", path);
            let doc = ProfileDocument::default_for(id, self.default_delay_ms);
            let bytes = serde_json::to_vec_pretty(&doc).map_err(StoreError::Serialize)?;
            self.atomic_write(&path, &bytes, now_ms)?;
        }

        let bytes = self.fs.read(&path)?;
        let doc: ProfileDocument = serde_json::from_slice(&bytes).map_err(|source| {
            error!("failed to parse {}: {}", path, source);
            StoreError::Parse {
                path: path.clone(),
                source,
            }
        })?;

        let profile = Profile::from_document(id, doc, self.num_keys, self.default_delay_ms);
        for diagnostic in &profile.diagnostics {
            warn!("profile {}: {}", id, diagnostic);
        }
        info!(
            "loaded profile {} '{}' ({} keys bound, idle {})",
            id,
            profile.name,
            profile.bindings.len(),
            profile.idle
        );

        self.active_id = id;
        Ok(self.active.insert(profile))
    }

    /// Crash-safe replace of `path` with `data`
    pub fn atomic_write(&mut self, path: &str, data: &[u8], now_ms: u64) -> Result<(), StoreError> {
        let tmp = format!("{}{}", path, TMP_SUFFIX);

        let written = match self.fs.write(&tmp, data) {
            Ok(n) => n,
            Err(e) => {
                self.discard(&tmp);
                return Err(e.into());
            }
        };
        if written != data.len() {
            self.discard(&tmp);
            error!("short write to {}: {} of {} bytes", tmp, written, data.len());
            return Err(StoreError::ShortWrite {
                path: tmp,
                expected: data.len(),
                written,
            });
        }

        if self.fs.exists(path) {
            if let Err(e) = self.backup(path, now_ms) {
                self.discard(&tmp);
                error!("backup of {} failed: {}", path, e);
                return Err(e);
            }
        }

        if let Err(e) = self.fs.rename(&tmp, path) {
            self.discard(&tmp);
            error!("rename {} -> {} failed: {}", tmp, path, e);
            return Err(e.into());
        }

        info!("wrote {} ({} bytes)", path, data.len());
        Ok(())
    }

    /// Copy the current content of `path` to `<backup_dir>/<stem>-<now_ms>.bak`
    fn backup(&mut self, path: &str, now_ms: u64) -> Result<String, StoreError> {
        let stem = Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("file");
        let backup_path = format!("{}/{}-{}.bak", self.backup_dir, stem, now_ms);

        let old = self.fs.read(path)?;
        self.fs.create_dir(&self.backup_dir)?;
        let written = self.fs.write(&backup_path, &old)?;
        if written != old.len() {
            self.discard(&backup_path);
            return Err(StoreError::ShortWrite {
                path: backup_path,
                expected: old.len(),
                written,
            });
        }

        debug!("backed up {} to {}", path, backup_path);
        Ok(backup_path)
    }

    fn discard(&mut self, path: &str) {
        if self.fs.exists(path) {
            if let Err(e) = self.fs.remove(path) {
                warn!("could not remove {}: {}", path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::MemoryFs;
    use crate::led::IdleAnimation;

    fn store() -> (ProfileStore, MemoryFs) {
        let fs = MemoryFs::new();
        let store = ProfileStore::new(Box::new(fs.clone()), &Config::default());
        (store, fs)
    }

    #[test]
    fn test_missing_profile_is_synthesized() {
        let (mut store, fs) = store();
        let profile = store.load_profile(3, 0).unwrap();
        assert_eq!(profile.name, "Profile 3");
        assert!(profile.bindings.is_empty());
        assert!(fs.exists("/profile3.json"));

        store.unload();
        let profile = store.load_profile(3, 10).unwrap();
        assert_eq!(profile.name, "Profile 3");
        assert_eq!(profile.idle, IdleAnimation::None);
        assert_eq!(store.active_id(), 3);
        // Second load found the file, so nothing was backed up
        assert_eq!(fs.paths(), vec!["/profile3.json".to_string()]);
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let (mut store, _) = store();
        assert!(matches!(
            store.load_profile(0, 0),
            Err(StoreError::OutOfRange { id: 0, max: 5 })
        ));
        assert!(matches!(
            store.load_profile(6, 0),
            Err(StoreError::OutOfRange { id: 6, max: 5 })
        ));
        assert!(!store.is_loaded());
    }

    #[test]
    fn test_parse_failure_keeps_previous_profile() {
        let (mut store, fs) = store();
        fs.put("/profile1.json", br#"{"profile_name": "Good"}"#);
        fs.put("/profile2.json", b"{ not json");
        store.load_profile(1, 0).unwrap();

        assert!(matches!(store.load_profile(2, 0), Err(StoreError::Parse { .. })));
        assert_eq!(store.active_id(), 1);
        assert_eq!(store.active().unwrap().name, "Good");
    }

    #[test]
    fn test_mistyped_fields_still_load() {
        let (mut store, fs) = store();
        fs.put(
            "/profile1.json",
            br#"{"profile_name": "Typed", "default_delay": "30",
                 "keys": [{"id": 1, "actions": [{"type": "key", "key": "A"}]}]}"#,
        );

        let profile = store.load_profile(1, 0).unwrap();
        assert_eq!(profile.name, "Typed");
        assert_eq!(profile.default_delay_ms, 30);
        assert_eq!(profile.binding(1).unwrap().actions.len(), 1);
        assert_eq!(profile.diagnostics.len(), 1);
        assert!(store.is_loaded());
    }

    #[test]
    fn test_short_write_leaves_target_untouched() {
        let (mut store, fs) = store();
        fs.put("/profile1.json", b"original");
        fs.fail_next_write_after(4);

        let err = store.atomic_write("/profile1.json", b"replacement", 5).unwrap_err();
        assert!(matches!(err, StoreError::ShortWrite { expected: 11, written: 4, .. }));
        assert_eq!(fs.get("/profile1.json").unwrap(), b"original");
        assert!(!fs.exists("/profile1.json.tmp"));
        assert_eq!(fs.paths(), vec!["/profile1.json".to_string()]);
    }

    #[test]
    fn test_overwrite_backs_up_old_content() {
        let (mut store, fs) = store();
        fs.put("/profile1.json", b"old");
        store.atomic_write("/profile1.json", b"new", 1234).unwrap();

        assert_eq!(fs.get("/profile1.json").unwrap(), b"new");
        assert_eq!(fs.get("/backups/profile1-1234.bak").unwrap(), b"old");
        assert!(!fs.exists("/profile1.json.tmp"));
    }

    #[test]
    fn test_failed_rename_cleans_up() {
        let (mut store, fs) = store();
        fs.put("/profile1.json", b"old");
        fs.fail_renames(true);

        assert!(store.atomic_write("/profile1.json", b"new", 7).is_err());
        assert_eq!(fs.get("/profile1.json").unwrap(), b"old");
        assert!(!fs.exists("/profile1.json.tmp"));
    }

    #[test]
    fn test_fresh_file_needs_no_backup() {
        let (mut store, fs) = store();
        store.atomic_write("/notes.txt", b"hello", 1).unwrap();
        assert_eq!(fs.paths(), vec!["/notes.txt".to_string()]);
    }
}
