//! Persisted content-fingerprint cache for the local vault
//!
//! The store maps each vault-relative file path to its last-known MD5
//! digest and modification time, and is the single source of truth for
//! "what does the client currently have". It is persisted as one JSON
//! document and refreshed incrementally: a file whose mtime is unchanged
//! is never re-hashed.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Result, SyncError};

/// Fingerprint of one local file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Vault-relative path with forward slashes
    pub path: String,
    /// Lowercase hex MD5 of the full file bytes
    pub md5: String,
    /// Modification time in epoch milliseconds
    pub mtime: i64,
}

/// Persisted map of path -> fingerprint for one vault.
pub struct FingerprintStore {
    vault_root: PathBuf,
    store_path: PathBuf,
    records: HashMap<String, FileRecord>,
    hashes_computed: u64,
}

impl FingerprintStore {
    /// Create an empty store without touching the disk.
    pub fn new(vault_root: impl Into<PathBuf>, store_path: impl Into<PathBuf>) -> Self {
        Self {
            vault_root: vault_root.into(),
            store_path: store_path.into(),
            records: HashMap::new(),
            hashes_computed: 0,
        }
    }

    /// Load the persisted map if present.
    ///
    /// A missing or malformed store file starts the map empty; the
    /// following refresh re-hashes everything, so this is never fatal.
    pub async fn load(
        vault_root: impl Into<PathBuf>,
        store_path: impl Into<PathBuf>,
    ) -> Self {
        let mut store = Self::new(vault_root, store_path);

        match fs::read_to_string(&store.store_path).await {
            Ok(body) => match serde_json::from_str::<HashMap<String, FileRecord>>(&body) {
                Ok(records) => {
                    debug!("loaded {} fingerprints from {}", records.len(), store.store_path.display());
                    store.records = records;
                }
                Err(e) => {
                    warn!(
                        "malformed fingerprint store at {}, starting empty: {}",
                        store.store_path.display(),
                        e
                    );
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(
                    "could not read fingerprint store at {}, starting empty: {}",
                    store.store_path.display(),
                    e
                );
            }
        }

        store
    }

    /// Bring the map up to date with the local file set.
    ///
    /// Files with an unchanged mtime are skipped without re-hashing;
    /// records for files that no longer exist are pruned. Per-file read
    /// failures are logged and leave that record unmodified. Returns true
    /// iff any record was added, updated or removed; persists to disk
    /// only in that case.
    pub async fn refresh(&mut self) -> Result<bool> {
        if !self.vault_root.is_dir() {
            return Err(SyncError::local_io(
                &self.vault_root,
                "vault root is not a directory",
            ));
        }

        let local = self.list_local_files();
        let mut changed = 0usize;

        for (path, mtime) in &local {
            if let Some(record) = self.records.get(path) {
                if record.mtime == *mtime {
                    continue;
                }
            }

            let absolute = self.vault_root.join(path);
            let bytes = match fs::read(&absolute).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("failed to read {} during refresh, keeping stale record: {}", path, e);
                    continue;
                }
            };

            let digest = format!("{:x}", md5::compute(&bytes));
            self.hashes_computed += 1;
            self.records.insert(
                path.clone(),
                FileRecord {
                    path: path.clone(),
                    md5: digest,
                    mtime: *mtime,
                },
            );
            changed += 1;
        }

        // Prune records for files removed from the vault.
        let live: HashSet<&String> = local.iter().map(|(path, _)| path).collect();
        let before = self.records.len();
        self.records.retain(|path, _| live.contains(path));
        changed += before - self.records.len();

        debug!(
            "fingerprint refresh: {} changes, {} tracked files",
            changed,
            self.records.len()
        );

        if changed > 0 {
            self.save().await?;
        }
        Ok(changed > 0)
    }

    /// Look up the fingerprint for one path.
    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.records.get(path)
    }

    /// Iterate over all tracked records.
    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    /// Number of tracked files.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total number of content hashes computed by this instance.
    pub fn hashes_computed(&self) -> u64 {
        self.hashes_computed
    }

    /// Location of the persisted JSON document.
    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    async fn save(&self) -> Result<()> {
        let body = serde_json::to_string_pretty(&self.records)?;

        if let Some(parent) = self.store_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::local_io(parent, e.to_string()))?;
        }
        fs::write(&self.store_path, body)
            .await
            .map_err(|e| SyncError::local_io(&self.store_path, e.to_string()))?;

        debug!("saved {} fingerprints to {}", self.records.len(), self.store_path.display());
        Ok(())
    }

    /// Enumerate regular files under the vault root as (relative path,
    /// mtime in epoch ms). Unreadable entries are logged and skipped.
    fn list_local_files(&self) -> Vec<(String, i64)> {
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.vault_root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable vault entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            // The store file itself may live inside the vault; never track it.
            if entry.path() == self.store_path {
                continue;
            }

            let relative = match entry.path().strip_prefix(&self.vault_root) {
                Ok(relative) => relative,
                Err(_) => continue,
            };
            let path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let mtime = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
                Some(modified) => match modified.duration_since(UNIX_EPOCH) {
                    Ok(duration) => duration.as_millis() as i64,
                    Err(_) => 0,
                },
                None => {
                    warn!("no modification time for {}, skipping", path);
                    continue;
                }
            };

            files.push((path, mtime));
        }

        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_for(temp: &TempDir) -> FingerprintStore {
        FingerprintStore::new(temp.path(), temp.path().join(".fingerprints.json"))
    }

    #[tokio::test]
    async fn refresh_hashes_new_files_and_persists() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.md"), b"alpha").await.unwrap();
        fs::write(temp.path().join("b.md"), b"beta").await.unwrap();

        let mut store = store_for(&temp);
        let changed = store.refresh().await.unwrap();

        assert!(changed);
        assert_eq!(store.len(), 2);
        assert_eq!(store.hashes_computed(), 2);
        assert!(store.store_path().exists());

        let record = store.get("a.md").unwrap();
        assert_eq!(record.md5, format!("{:x}", md5::compute(b"alpha")));
        assert!(record.mtime > 0);
    }

    #[tokio::test]
    async fn second_refresh_without_changes_is_a_noop() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.md"), b"alpha").await.unwrap();

        let mut store = store_for(&temp);
        assert!(store.refresh().await.unwrap());

        let hashes = store.hashes_computed();
        assert!(!store.refresh().await.unwrap());
        assert_eq!(store.hashes_computed(), hashes);
    }

    #[tokio::test]
    async fn unchanged_mtime_is_never_rehashed() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.md"), b"alpha").await.unwrap();

        let mut store = store_for(&temp);
        store.refresh().await.unwrap();
        assert_eq!(store.hashes_computed(), 1);

        // Adding one file leaves the untouched file's hash alone.
        fs::write(temp.path().join("b.md"), b"beta").await.unwrap();
        assert!(store.refresh().await.unwrap());
        assert_eq!(store.hashes_computed(), 2);
    }

    #[tokio::test]
    async fn removed_files_are_pruned() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.md"), b"alpha").await.unwrap();
        fs::write(temp.path().join("b.md"), b"beta").await.unwrap();

        let mut store = store_for(&temp);
        store.refresh().await.unwrap();
        assert_eq!(store.len(), 2);

        fs::remove_file(temp.path().join("b.md")).await.unwrap();
        assert!(store.refresh().await.unwrap());
        assert_eq!(store.len(), 1);
        assert!(store.get("b.md").is_none());
    }

    #[tokio::test]
    async fn persisted_map_round_trips() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("notes")).await.unwrap();
        fs::write(temp.path().join("notes/x.md"), b"note").await.unwrap();

        let store_path = temp.path().join(".fingerprints.json");
        let mut store = FingerprintStore::new(temp.path(), &store_path);
        store.refresh().await.unwrap();
        let original = store.get("notes/x.md").unwrap().clone();

        let reloaded = FingerprintStore::load(temp.path(), &store_path).await;
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("notes/x.md"), Some(&original));
    }

    #[tokio::test]
    async fn malformed_store_file_starts_empty() {
        let temp = TempDir::new().unwrap();
        let store_path = temp.path().join(".fingerprints.json");
        fs::write(&store_path, "{ not json").await.unwrap();
        fs::write(temp.path().join("a.md"), b"alpha").await.unwrap();

        let mut store = FingerprintStore::load(temp.path(), &store_path).await;
        assert!(store.is_empty());

        // The following refresh recovers by re-hashing everything.
        assert!(store.refresh().await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn content_change_updates_digest() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.md");
        fs::write(&file, b"alpha").await.unwrap();

        let mut store = store_for(&temp);
        store.refresh().await.unwrap();
        let old_md5 = store.get("a.md").unwrap().md5.clone();

        fs::write(&file, b"alpha v2").await.unwrap();
        // Force a different mtime even on coarse-grained filesystems.
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(2);
        let file_std = std::fs::File::options().write(true).open(&file).unwrap();
        file_std.set_modified(later).unwrap();

        assert!(store.refresh().await.unwrap());
        assert_ne!(store.get("a.md").unwrap().md5, old_md5);
    }

    #[tokio::test]
    async fn missing_vault_root_is_an_error() {
        let temp = TempDir::new().unwrap();
        let mut store =
            FingerprintStore::new(temp.path().join("gone"), temp.path().join("fp.json"));

        assert!(matches!(
            store.refresh().await,
            Err(SyncError::LocalIo { .. })
        ));
    }
}
