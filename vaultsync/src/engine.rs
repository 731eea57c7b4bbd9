//! Sync engine orchestrating the full synchronization cycle
//!
//! One cycle walks Refreshing -> AwaitingAuth -> Comparing ->
//! Applying(upload -> download -> remove) -> Finalizing. Cycles never
//! overlap: a second invocation while one is in flight is rejected.
//! Interruption is cooperative through a cancellation token checked
//! before each batch, download and removal.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::Utc;
use tokio::fs;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vaultsync_core::{ApiError, CatalogEntry, CompareRequest, RemoteEntry, VaultServerClient};

use crate::catalog::{build_catalog, PathFilter};
use crate::error::{Result, SyncError};
use crate::fingerprint::FingerprintStore;
use crate::progress::{EventReporter, SyncEvent, SyncPhase};
use crate::settings::{SettingsStore, SyncSettings};
use crate::transfer::{TransferWorker, UploadCandidate};

/// Forward skew added to the persisted sync timestamp, guarding against
/// clock drift making the next compare miss files just uploaded.
pub const FORWARD_SKEW_MS: i64 = 5_000;

/// What started the cycle.
///
/// A background check short-circuits when the local refresh found no
/// changes; a manual sync always does the full round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Manual,
    Background,
}

/// Per-category counts for one finished cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub uploaded: usize,
    pub downloaded: usize,
    pub removed: usize,
    pub interrupted: bool,
}

/// Terminal result of a sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The cycle ran through the Applying stage.
    Completed(SyncSummary),
    /// Nothing to upload, download or remove.
    NothingToDo,
    /// No token and login did not produce one; treated as user
    /// cancellation, no failure notice.
    NotAuthenticated,
}

struct EngineState {
    fingerprints: FingerprintStore,
    settings: SettingsStore,
}

/// The synchronization engine for one vault.
pub struct SyncEngine {
    client: Arc<VaultServerClient>,
    vault_root: PathBuf,
    state: Mutex<EngineState>,
    reporter: EventReporter,
    cancel: StdMutex<CancellationToken>,
}

impl SyncEngine {
    /// Create an engine from explicitly constructed parts.
    pub fn new(
        client: Arc<VaultServerClient>,
        vault_root: impl Into<PathBuf>,
        fingerprints: FingerprintStore,
        settings: SettingsStore,
        reporter: EventReporter,
    ) -> Self {
        Self {
            client,
            vault_root: vault_root.into(),
            state: Mutex::new(EngineState {
                fingerprints,
                settings,
            }),
            reporter,
            cancel: StdMutex::new(CancellationToken::new()),
        }
    }

    /// Request cooperative interruption of the cycle in flight.
    ///
    /// The current phase stops at its next check point; later phases do
    /// not run this cycle. In-flight requests complete and their results
    /// are discarded.
    pub fn interrupt(&self) {
        self.cancel
            .lock()
            .expect("cancel token lock poisoned")
            .cancel();
    }

    /// Run one full synchronization cycle.
    ///
    /// Rejects with [`SyncError::Busy`] when a cycle is already running.
    /// A 401 on the compare call triggers exactly one retry of the whole
    /// cycle after re-authentication.
    pub async fn sync_all(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
        let mut state = self.state.try_lock().map_err(|_| SyncError::Busy)?;
        let cancel = self.reset_cancel();

        let mut auto_login = true;
        loop {
            match self.run_cycle(&mut state, trigger, &cancel, auto_login).await {
                Err(SyncError::AuthExpired) if auto_login => {
                    debug!("compare rejected with 401, retrying once after re-authentication");
                    auto_login = false;
                }
                other => return other,
            }
        }
    }

    /// Upload a single file outside the full cycle.
    ///
    /// Returns true when the server confirmed the upload.
    pub async fn sync_file(&self, path: &str) -> Result<bool> {
        let mut state = self.state.try_lock().map_err(|_| SyncError::Busy)?;
        let cancel = self.reset_cancel();

        if !self.ensure_token(&mut state).await? {
            return Ok(false);
        }

        let settings = state.settings.settings().clone();
        let candidate = UploadCandidate {
            path: path.to_string(),
            md5: state.fingerprints.get(path).map(|record| record.md5.clone()),
        };
        let worker = TransferWorker::new(
            self.client.clone(),
            self.vault_root.clone(),
            self.reporter.clone(),
            cancel,
        );
        let (success, uploaded) = worker
            .upload(&settings.username, &settings.vault, &[candidate])
            .await;

        self.reporter.emit(SyncEvent::Completed {
            uploaded: uploaded.len(),
            downloaded: 0,
            removed: 0,
        });
        Ok(success && !uploaded.is_empty())
    }

    /// Copy of the current settings (token, timestamps included).
    pub async fn settings_snapshot(&self) -> SyncSettings {
        self.state.lock().await.settings.settings().clone()
    }

    /// Number of files currently tracked by the fingerprint store.
    pub async fn tracked_files(&self) -> usize {
        self.state.lock().await.fingerprints.len()
    }

    async fn run_cycle(
        &self,
        state: &mut EngineState,
        trigger: SyncTrigger,
        cancel: &CancellationToken,
        auto_login: bool,
    ) -> Result<SyncOutcome> {
        // Refreshing
        self.reporter.emit(SyncEvent::RefreshStarted);
        let changed = match state.fingerprints.refresh().await {
            Ok(changed) => changed,
            Err(e) => {
                self.reporter.emit(SyncEvent::Failed {
                    phase: SyncPhase::Refreshing,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };
        self.reporter.emit(SyncEvent::RefreshCompleted {
            changed,
            tracked_files: state.fingerprints.len(),
        });

        // Heuristic: a quiet local vault skips the round trip entirely,
        // even though the server may hold independent changes. Never on
        // the post-401 retry pass: the first pass already found work and
        // persisted the refresh, so this pass must reach the compare.
        if !changed && trigger == SyncTrigger::Background && auto_login {
            self.reporter.emit(SyncEvent::NothingToDo);
            return Ok(SyncOutcome::NothingToDo);
        }

        // AwaitingAuth
        if !self.ensure_token(state).await? {
            return Ok(SyncOutcome::NotAuthenticated);
        }

        // Comparing
        let settings = state.settings.settings().clone();
        let filter = PathFilter::new(&settings.include, &settings.exclude)?;
        let catalog = build_catalog(&state.fingerprints, &filter);
        self.reporter.emit(SyncEvent::CompareStarted {
            catalog_size: catalog.len(),
        });

        let request = CompareRequest {
            user_name: settings.username.clone(),
            vault: settings.vault.clone(),
            include: settings.include.clone(),
            exclude: settings.exclude.clone(),
            last_sync_time: settings.last_sync_time,
            files: catalog
                .iter()
                .map(|record| CatalogEntry {
                    path: record.path.clone(),
                    mtime: record.mtime,
                    md5: record.md5.clone(),
                })
                .collect(),
        };

        let instructions = match self.client.compare(&request).await {
            Ok(instructions) => instructions,
            Err(ApiError::AuthExpired) => {
                self.client.clear_token().await;
                state.settings.settings_mut().token.clear();
                if let Err(e) = state.settings.save().await {
                    warn!("could not persist cleared token: {}", e);
                }
                if !auto_login {
                    self.reporter.emit(SyncEvent::LoginExpired);
                    self.reporter.emit(SyncEvent::Failed {
                        phase: SyncPhase::Comparing,
                        error: "login expired".to_string(),
                    });
                }
                return Err(SyncError::AuthExpired);
            }
            Err(e) => {
                let error = SyncError::from(e);
                self.reporter.emit(SyncEvent::Failed {
                    phase: SyncPhase::Comparing,
                    error: error.to_string(),
                });
                return Err(error);
            }
        };

        if instructions.is_empty() {
            self.reporter.emit(SyncEvent::NothingToDo);
            return Ok(SyncOutcome::NothingToDo);
        }
        self.reporter.emit(SyncEvent::PlanReceived {
            uploads: instructions.upload_list.len(),
            downloads: instructions.download_list.len(),
            removals: instructions.remove_list.len(),
            cloud_removals: instructions.cloud_remove_list.len(),
        });

        // Applying: fixed order upload -> download -> remove; an
        // interrupt in any phase ends the whole stage for this cycle.
        let worker = TransferWorker::new(
            self.client.clone(),
            self.vault_root.clone(),
            self.reporter.clone(),
            cancel.clone(),
        );
        let mut summary = SyncSummary::default();

        if !instructions.upload_list.is_empty() {
            let candidates = self
                .resolve_uploads(&state.fingerprints, &instructions.upload_list)
                .await;
            let (upload_ok, uploaded) = worker
                .upload(&settings.username, &settings.vault, &candidates)
                .await;
            summary.uploaded = uploaded.len();
            if !upload_ok {
                self.reporter.emit(SyncEvent::Warning {
                    message: "some uploads failed".to_string(),
                });
            }
        }

        let mut download_ok = true;
        if !cancel.is_cancelled() && !instructions.download_list.is_empty() {
            let (ok, downloaded) = worker.download(&instructions.download_list).await;
            download_ok = ok;
            summary.downloaded = downloaded;
        }

        if !cancel.is_cancelled() && !instructions.remove_list.is_empty() {
            summary.removed = self.remove_files(&instructions.remove_list, cancel).await;
        }
        summary.interrupted = cancel.is_cancelled();

        // Finalizing: always runs, capturing downloaded/removed files in
        // the fingerprint store.
        if let Err(e) = state.fingerprints.refresh().await {
            warn!("post-sync fingerprint refresh failed: {}", e);
        }

        // The timestamp only moves after a fully successful download
        // phase: an aborted download with an advanced timestamp could
        // make the server treat missing files as deliberately removed.
        if download_ok && !summary.interrupted {
            state.settings.settings_mut().last_sync_time =
                Utc::now().timestamp_millis() + FORWARD_SKEW_MS;
            if let Err(e) = state.settings.save().await {
                warn!("could not persist sync timestamp: {}", e);
            }
        }

        info!(
            "sync finished: {} uploaded, {} downloaded, {} removed{}",
            summary.uploaded,
            summary.downloaded,
            summary.removed,
            if summary.interrupted { " (interrupted)" } else { "" }
        );
        self.reporter.emit(SyncEvent::Completed {
            uploaded: summary.uploaded,
            downloaded: summary.downloaded,
            removed: summary.removed,
        });
        Ok(SyncOutcome::Completed(summary))
    }

    /// Make sure the client carries a token, logging in with the stored
    /// credentials when none is cached. Returns false when no token
    /// could be obtained; the caller aborts silently.
    async fn ensure_token(&self, state: &mut EngineState) -> Result<bool> {
        let settings = state.settings.settings().clone();
        if !settings.token.is_empty() {
            self.client.set_token(Some(settings.token)).await;
            return Ok(true);
        }

        match self.client.login(&settings.username, &settings.password).await {
            Ok(token) => {
                state.settings.settings_mut().token = token;
                if let Err(e) = state.settings.save().await {
                    warn!("could not persist fresh token: {}", e);
                }
                Ok(true)
            }
            Err(e) => {
                warn!("login failed: {}", e);
                Ok(false)
            }
        }
    }

    /// Resolve upload instructions to files that actually exist locally,
    /// attaching the declared hash from the fingerprint store.
    async fn resolve_uploads(
        &self,
        fingerprints: &FingerprintStore,
        entries: &[RemoteEntry],
    ) -> Vec<UploadCandidate> {
        let mut candidates = Vec::with_capacity(entries.len());
        for entry in entries {
            let absolute = self.vault_root.join(&entry.addr);
            match fs::metadata(&absolute).await {
                Ok(meta) if meta.is_file() => candidates.push(UploadCandidate {
                    path: entry.addr.clone(),
                    md5: fingerprints.get(&entry.addr).map(|record| record.md5.clone()),
                }),
                _ => debug!("upload entry {} does not exist locally, skipping", entry.addr),
            }
        }
        candidates
    }

    /// Delete listed local paths, tolerating individual failures.
    async fn remove_files(&self, entries: &[RemoteEntry], cancel: &CancellationToken) -> usize {
        let total = entries.len();
        let mut removed = 0usize;

        for entry in entries {
            if cancel.is_cancelled() {
                self.reporter.emit(SyncEvent::Interrupted {
                    phase: SyncPhase::Removing,
                });
                break;
            }
            let absolute = self.vault_root.join(&entry.addr);
            match fs::remove_file(&absolute).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("could not remove {}: {}", entry.addr, e),
            }
        }

        self.reporter.emit(SyncEvent::RemoveProgress { removed, total });
        removed
    }

    /// Install a fresh cancellation token for a new cycle and hand it out.
    fn reset_cancel(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock().expect("cancel token lock poisoned") = token.clone();
        token
    }
}
