// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide settings persistence (C9).

use std::path::{Path, PathBuf};

use bku_core::DaemonSettings;
use parking_lot::RwLock;

use crate::atomic;
use crate::error::StorageError;

/// Wraps `<data_dir>/settings.json`, read on daemon startup and on
/// explicit reload, written through the same atomic-write primitive as
/// the job store. Unrecognized keys are rejected at load (`JobSettings`
/// and `DaemonSettings` both carry `#[serde(deny_unknown_fields)]`)
/// rather than silently preserved.
pub struct SettingsStore {
    path: PathBuf,
    cached: RwLock<DaemonSettings>,
}

impl SettingsStore {
    pub async fn open(data_dir: &Path) -> Result<Self, StorageError> {
        let path = bku_core::paths::settings_file(data_dir);
        if !path.exists() {
            atomic::write_json(&path, &DaemonSettings::default(), "settings_store").await?;
        }
        let cached = Self::load_from_disk(&path)?;
        Ok(Self { path, cached: RwLock::new(cached) })
    }

    fn load_from_disk(path: &Path) -> Result<DaemonSettings, StorageError> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|err| StorageError::Validation(err.to_string()))
    }

    /// Current in-memory settings, refreshed on the last `reload()`/`save()`.
    pub fn current(&self) -> DaemonSettings {
        self.cached.read().clone()
    }

    /// Re-read the file from disk, replacing the cached value.
    pub fn reload(&self) -> Result<(), StorageError> {
        let loaded = Self::load_from_disk(&self.path)?;
        *self.cached.write() = loaded;
        Ok(())
    }

    pub async fn save(&self, settings: DaemonSettings) -> Result<(), StorageError> {
        atomic::write_json(&self.path, &settings, "settings_store").await?;
        *self.cached.write() = settings;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_seeds_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path()).await.unwrap();
        assert_eq!(store.current(), DaemonSettings::default());
    }

    #[tokio::test]
    async fn save_then_current_reflects_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path()).await.unwrap();
        let mut settings = DaemonSettings::default();
        settings.max_retry_attempts = 9;
        store.save(settings.clone()).await.unwrap();
        assert_eq!(store.current().max_retry_attempts, 9);
    }

    #[tokio::test]
    async fn reload_picks_up_external_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path()).await.unwrap();

        let mut settings = DaemonSettings::default();
        settings.auto_start_on_launch = true;
        let bytes = serde_json::to_vec(&settings).unwrap();
        std::fs::write(bku_core::paths::settings_file(dir.path()), bytes).unwrap();

        store.reload().unwrap();
        assert!(store.current().auto_start_on_launch);
    }

    #[tokio::test]
    async fn unrecognized_key_rejected_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path()).await.unwrap();
        std::fs::write(bku_core::paths::settings_file(dir.path()), br#"{"bogus": true}"#).unwrap();
        assert!(store.reload().is_err());
    }
}
