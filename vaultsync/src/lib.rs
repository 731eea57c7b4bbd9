//! Vault Synchronization Engine
//!
//! An async library that reconciles a local vault of files against a
//! remote-tracked file set over HTTP:
//! - Persisted content-fingerprint cache to avoid redundant transfers
//! - Include/exclude path filtering for the comparison catalog
//! - A sync cycle state machine (refresh, compare, apply, finalize)
//! - Grouped uploads and sequential downloads with cooperative interrupt
//! - Typed progress/status events for host UIs

pub mod catalog;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod progress;
pub mod settings;
pub mod transfer;

// Re-export main types and functions
pub use catalog::{build_catalog, PathFilter};
pub use engine::{SyncEngine, SyncOutcome, SyncSummary, SyncTrigger, FORWARD_SKEW_MS};
pub use error::{Result, SyncError};
pub use fingerprint::{FileRecord, FingerprintStore};
pub use progress::{EventChannel, EventReporter, SyncEvent, SyncPhase};
pub use settings::{SettingsStore, SyncSettings};
pub use transfer::{TransferWorker, UploadCandidate, UPLOAD_BATCH_SIZE};

#[cfg(test)]
mod transfer_tests;
