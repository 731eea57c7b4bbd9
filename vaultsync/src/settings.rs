//! User-configurable sync settings, explicitly constructed and injected
//! into the engine (no global singleton).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::error::{Result, SyncError};

/// Persisted settings surface for one sync session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Base URL of the remote server
    pub server_url: String,
    pub username: String,
    pub password: String,
    /// Cached auth token; empty means "not logged in"
    pub token: String,
    /// Vault name reported to the server
    pub vault: String,
    /// Comma-separated include path prefixes
    pub include: String,
    /// Comma-separated exclude wildcard patterns
    pub exclude: String,
    /// Epoch ms of the last fully successful download phase
    pub last_sync_time: i64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8005".to_string(),
            username: String::new(),
            password: String::new(),
            token: String::new(),
            vault: String::new(),
            include: String::new(),
            exclude: String::new(),
            last_sync_time: 0,
        }
    }
}

/// Settings plus an optional backing file.
///
/// The engine mutates settings (token, last_sync_time) during a cycle
/// and persists through this store; an in-memory store skips the disk,
/// which keeps tests and one-shot runs simple.
pub struct SettingsStore {
    path: Option<PathBuf>,
    settings: SyncSettings,
}

impl SettingsStore {
    /// Store without a backing file; `save` becomes a no-op.
    pub fn in_memory(settings: SyncSettings) -> Self {
        Self {
            path: None,
            settings,
        }
    }

    /// Load settings from a JSON file, starting from defaults when the
    /// file does not exist yet.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = match fs::read_to_string(&path).await {
            Ok(body) => serde_json::from_str(&body)
                .map_err(|e| SyncError::Parse(format!("settings file {}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SyncSettings::default(),
            Err(e) => return Err(SyncError::local_io(&path, e.to_string())),
        };

        Ok(Self {
            path: Some(path),
            settings,
        })
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SyncSettings {
        &mut self.settings
    }

    /// Persist the current settings when a backing file is configured.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::local_io(parent, e.to_string()))?;
        }
        let body = serde_json::to_string_pretty(&self.settings)?;
        fs::write(path, body)
            .await
            .map_err(|e| SyncError::local_io(path, e.to_string()))?;

        debug!("saved settings to {}", path.display());
        Ok(())
    }
}
