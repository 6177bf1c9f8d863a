//! YAML-backed preferences store
//!
//! [`YamlPreferences`] implements [`IPreferencesStore`] on top of a single
//! YAML document, typically `$XDG_DATA_HOME/cloudmirror/preferences.yaml`.
//! It can also run without a backing file, which is what the tests use.
//!
//! A file that fails to parse is moved aside to `<name>.corrupt` and the
//! store starts empty. That is reported once, at load time.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::domain::{
    Credentials, DomainError, ExclusionRules, LocalFingerprint, NodeHandle, ProxySettings,
    SessionToken, SyncPairConfig,
};
use crate::ports::{IPreferencesStore, PreferencesError};

/// Everything the store persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferencesData {
    pub session: Option<SessionToken>,
    pub credentials: Option<Credentials>,
    pub sync_pairs: Vec<SyncPairConfig>,
    pub last_exit: Option<DateTime<Utc>>,
    pub last_stats_request: Option<DateTime<Utc>>,
    pub last_execution: Option<DateTime<Utc>>,
    pub proxy: ProxySettings,
    pub exclusions: ExclusionRules,
    pub upload_limit_kib: i64,
    pub default_upload_folder: Option<NodeHandle>,
    pub default_download_folder: Option<PathBuf>,
    pub was_paused: bool,
    pub crashed: bool,
}

impl Default for PreferencesData {
    fn default() -> Self {
        Self {
            session: None,
            credentials: None,
            sync_pairs: Vec::new(),
            last_exit: None,
            last_stats_request: None,
            last_execution: None,
            proxy: ProxySettings::None,
            exclusions: ExclusionRules::default(),
            upload_limit_kib: -1,
            default_upload_folder: None,
            default_download_folder: None,
            was_paused: false,
            crashed: false,
        }
    }
}

/// Preferences persisted as YAML
#[derive(Debug)]
pub struct YamlPreferences {
    path: Option<PathBuf>,
    data: PreferencesData,
    dirty: bool,
}

impl YamlPreferences {
    /// Platform-appropriate default path for the preferences file
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("cloudmirror")
            .join("preferences.yaml")
    }

    /// A store with no backing file
    pub fn in_memory(data: PreferencesData) -> Self {
        Self {
            path: None,
            data,
            dirty: false,
        }
    }

    /// Opens the store at `path`; a missing file yields an empty store
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PreferencesError> {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => PreferencesData::default(),
            Ok(content) => {
                serde_yaml::from_str(&content).map_err(|e| PreferencesError::Corrupt {
                    path: path.clone(),
                    message: e.to_string(),
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No preferences file yet");
                PreferencesData::default()
            }
            Err(source) => return Err(PreferencesError::Read { path, source }),
        };

        Ok(Self {
            path: Some(path),
            data,
            dirty: false,
        })
    }

    /// Opens the store, starting empty if the file is unreadable or corrupt
    ///
    /// A corrupt file is renamed to `<name>.corrupt` so the next flush does
    /// not overwrite it.
    pub fn open_or_empty(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::open(&path) {
            Ok(store) => store,
            Err(e) => {
                error!(error = %e, "Preferences could not be loaded, starting with empty preferences");
                if matches!(e, PreferencesError::Corrupt { .. }) {
                    let backup = corrupt_backup_path(&path);
                    if let Err(rename_err) = std::fs::rename(&path, &backup) {
                        warn!(error = %rename_err, "Failed to move corrupt preferences aside");
                    }
                }
                Self {
                    path: Some(path),
                    data: PreferencesData::default(),
                    dirty: false,
                }
            }
        }
    }

    /// Read-only view of the stored data
    pub fn data(&self) -> &PreferencesData {
        &self.data
    }

    /// Adds a sync pair and returns its index
    pub fn add_sync_pair(&mut self, pair: SyncPairConfig) -> usize {
        self.data.sync_pairs.push(pair);
        self.dirty = true;
        self.data.sync_pairs.len() - 1
    }

    pub fn set_credentials(&mut self, credentials: Option<Credentials>) {
        self.data.credentials = credentials;
        self.dirty = true;
    }

    fn pair_mut(&mut self, index: usize) -> Result<&mut SyncPairConfig, PreferencesError> {
        self.data
            .sync_pairs
            .get_mut(index)
            .ok_or(PreferencesError::Domain(DomainError::UnknownSyncPair(index)))
    }
}

fn corrupt_backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".corrupt");
    path.with_file_name(name)
}

impl IPreferencesStore for YamlPreferences {
    fn has_account(&self) -> bool {
        self.data.session.is_some() || self.data.credentials.is_some()
    }

    fn session(&self) -> Option<SessionToken> {
        self.data.session.clone()
    }

    fn set_session(&mut self, session: Option<SessionToken>) {
        self.data.session = session;
        self.dirty = true;
    }

    fn credentials(&self) -> Option<Credentials> {
        self.data.credentials.clone()
    }

    fn unlink(&mut self) {
        self.data.session = None;
        self.data.credentials = None;
        self.data.sync_pairs.clear();
        self.dirty = true;
    }

    fn sync_pairs(&self) -> Vec<SyncPairConfig> {
        self.data.sync_pairs.clone()
    }

    fn sync_pair(&self, index: usize) -> Option<SyncPairConfig> {
        self.data.sync_pairs.get(index).cloned()
    }

    fn set_sync_active(&mut self, index: usize, active: bool) -> Result<(), PreferencesError> {
        self.pair_mut(index)?.active = active;
        self.dirty = true;
        Ok(())
    }

    fn set_sync_fingerprint(
        &mut self,
        index: usize,
        fingerprint: LocalFingerprint,
    ) -> Result<(), PreferencesError> {
        self.pair_mut(index)?.fingerprint = Some(fingerprint);
        self.dirty = true;
        Ok(())
    }

    fn last_exit(&self) -> Option<DateTime<Utc>> {
        self.data.last_exit
    }

    fn set_last_exit(&mut self, at: DateTime<Utc>) {
        self.data.last_exit = Some(at);
        self.dirty = true;
    }

    fn last_stats_request(&self) -> Option<DateTime<Utc>> {
        self.data.last_stats_request
    }

    fn set_last_stats_request(&mut self, at: DateTime<Utc>) {
        self.data.last_stats_request = Some(at);
        self.dirty = true;
    }

    fn last_execution(&self) -> Option<DateTime<Utc>> {
        self.data.last_execution
    }

    fn set_last_execution(&mut self, at: DateTime<Utc>) {
        self.data.last_execution = Some(at);
        self.dirty = true;
    }

    fn proxy(&self) -> ProxySettings {
        self.data.proxy.clone()
    }

    fn set_proxy(&mut self, proxy: ProxySettings) {
        self.data.proxy = proxy;
        self.dirty = true;
    }

    fn exclusions(&self) -> ExclusionRules {
        self.data.exclusions.clone()
    }

    fn upload_limit_kib(&self) -> i64 {
        self.data.upload_limit_kib
    }

    fn set_upload_limit_kib(&mut self, kib: i64) {
        self.data.upload_limit_kib = kib;
        self.dirty = true;
    }

    fn default_upload_folder(&self) -> Option<NodeHandle> {
        self.data.default_upload_folder
    }

    fn default_download_folder(&self) -> Option<PathBuf> {
        self.data.default_download_folder.clone()
    }

    fn was_paused(&self) -> bool {
        self.data.was_paused
    }

    fn set_was_paused(&mut self, paused: bool) {
        self.data.was_paused = paused;
        self.dirty = true;
    }

    fn crashed(&self) -> bool {
        self.data.crashed
    }

    fn set_crashed(&mut self, crashed: bool) {
        self.data.crashed = crashed;
        self.dirty = true;
    }

    fn flush(&mut self) -> Result<(), PreferencesError> {
        if !self.dirty {
            return Ok(());
        }
        let Some(path) = self.path.clone() else {
            self.dirty = false;
            return Ok(());
        };

        let yaml = serde_yaml::to_string(&self.data).map_err(|e| PreferencesError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PreferencesError::Write {
                path: path.clone(),
                source,
            })?;
        }
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml)
            .and_then(|()| std::fs::rename(&tmp, &path))
            .map_err(|source| PreferencesError::Write {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), "Preferences saved");
        self.dirty = false;
        Ok(())
    }
}
