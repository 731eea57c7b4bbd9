//! Grouped uploads and sequential downloads with interrupt support
//!
//! Batches and files are processed strictly in sequence, never in
//! parallel: progress stays predictable, memory stays bounded, and the
//! interrupt check points are unambiguous. Resumption is at batch/file
//! granularity only; there is no partial-file resume.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use vaultsync_core::{ApiError, RemoteEntry, UploadBatch, UploadFile, VaultServerClient};

use crate::error::{Result, SyncError};
use crate::progress::{EventReporter, SyncEvent, SyncPhase};

/// Files per upload batch.
pub const UPLOAD_BATCH_SIZE: usize = 5;
/// Emit a download progress event every this many files.
const DOWNLOAD_PROGRESS_EVERY: usize = 5;

/// One file selected for upload, with its declared hash when known.
#[derive(Debug, Clone)]
pub struct UploadCandidate {
    pub path: String,
    pub md5: Option<String>,
}

/// Executes the upload and download phases of a sync cycle.
pub struct TransferWorker {
    client: Arc<VaultServerClient>,
    vault_root: PathBuf,
    reporter: EventReporter,
    cancel: CancellationToken,
}

impl TransferWorker {
    pub fn new(
        client: Arc<VaultServerClient>,
        vault_root: impl Into<PathBuf>,
        reporter: EventReporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            vault_root: vault_root.into(),
            reporter,
            cancel,
        }
    }

    /// Upload files in fixed-size batches, sequentially.
    ///
    /// A failed batch flips the success flag but later batches still run
    /// unless the user interrupts; a 401 additionally clears the cached
    /// token. Returns the overall flag and the paths the server
    /// confirmed.
    pub async fn upload(
        &self,
        user_name: &str,
        vault: &str,
        files: &[UploadCandidate],
    ) -> (bool, Vec<String>) {
        let total = files.len();
        let mut uploaded: Vec<String> = Vec::new();
        let mut success = true;

        debug!(
            "uploading {} files in batches of {}",
            total, UPLOAD_BATCH_SIZE
        );
        self.reporter.emit(SyncEvent::UploadProgress {
            uploaded: 0,
            total,
        });

        for group in files.chunks(UPLOAD_BATCH_SIZE) {
            if self.cancel.is_cancelled() {
                self.reporter.emit(SyncEvent::Interrupted {
                    phase: SyncPhase::Uploading,
                });
                break;
            }

            let mut batch_files = Vec::with_capacity(group.len());
            for candidate in group {
                let absolute = self.vault_root.join(&candidate.path);
                match fs::read(&absolute).await {
                    Ok(bytes) => batch_files.push(UploadFile {
                        path: candidate.path.clone(),
                        bytes,
                        md5: candidate.md5.clone(),
                    }),
                    Err(e) => {
                        warn!("cannot read {} for upload, skipping: {}", candidate.path, e);
                        success = false;
                    }
                }
            }
            if batch_files.is_empty() {
                continue;
            }

            let batch_paths: Vec<String> =
                batch_files.iter().map(|file| file.path.clone()).collect();
            let batch = UploadBatch {
                user_name: user_name.to_string(),
                vault: vault.to_string(),
                files: batch_files,
            };

            match self.client.upload_batch(batch).await {
                Ok(response) => {
                    if response.emb_status.as_deref() == Some("failed") {
                        self.reporter.emit(SyncEvent::Warning {
                            message: "server-side embedding failed".to_string(),
                        });
                    }
                    for path in batch_paths {
                        if response.list.contains(&path) {
                            uploaded.push(path);
                        }
                    }
                }
                Err(ApiError::AuthExpired) => {
                    warn!("upload batch rejected with 401, clearing cached token");
                    self.client.clear_token().await;
                    self.reporter.emit(SyncEvent::LoginExpired);
                    success = false;
                }
                Err(e) => {
                    warn!("upload batch failed: {}", e);
                    success = false;
                }
            }

            self.reporter.emit(SyncEvent::UploadProgress {
                uploaded: uploaded.len(),
                total,
            });
        }

        debug!("upload finished: {}/{} confirmed", uploaded.len(), total);
        (success, uploaded)
    }

    /// Download files one at a time, stopping at the first failure.
    ///
    /// Returns (no download failed, number of files written). An
    /// interrupt stops the loop without counting as a failure.
    pub async fn download(&self, entries: &[RemoteEntry]) -> (bool, usize) {
        let total = entries.len();
        let mut downloaded = 0usize;

        for entry in entries {
            if self.cancel.is_cancelled() {
                self.reporter.emit(SyncEvent::Interrupted {
                    phase: SyncPhase::Downloading,
                });
                break;
            }

            let Some(idx) = entry.idx.as_deref() else {
                warn!("download entry {} is missing its remote identifier", entry.addr);
                self.reporter.emit(SyncEvent::DownloadFailed {
                    path: entry.addr.clone(),
                });
                return (false, downloaded);
            };

            if let Err(e) = self.download_file(&entry.addr, idx).await {
                warn!("download of {} failed: {}", entry.addr, e);
                if matches!(e, SyncError::AuthExpired) {
                    self.client.clear_token().await;
                    self.reporter.emit(SyncEvent::LoginExpired);
                }
                self.reporter.emit(SyncEvent::DownloadFailed {
                    path: entry.addr.clone(),
                });
                return (false, downloaded);
            }

            downloaded += 1;
            if downloaded % DOWNLOAD_PROGRESS_EVERY == 0 {
                self.reporter.emit(SyncEvent::DownloadProgress {
                    downloaded,
                    total,
                });
            }
        }

        self.reporter.emit(SyncEvent::DownloadProgress {
            downloaded,
            total,
        });
        (true, downloaded)
    }

    /// Stream one file's body to its vault location, creating parent
    /// directories as needed.
    async fn download_file(&self, addr: &str, idx: &str) -> Result<()> {
        let response = self.client.download(idx).await?;

        let absolute = self.vault_root.join(addr);
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::local_io(parent, e.to_string()))?;
        }

        let mut file = fs::File::create(&absolute)
            .await
            .map_err(|e| SyncError::local_io(&absolute, e.to_string()))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SyncError::Network(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| SyncError::local_io(&absolute, e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| SyncError::local_io(&absolute, e.to_string()))?;

        debug!("downloaded {} (idx {})", addr, idx);
        Ok(())
    }
}
