//! Typed progress/status events emitted by the sync engine
//!
//! Hosts subscribe through an [`EventChannel`]; the engine never talks
//! to a UI directly. Events are advisory: a dropped subscriber never
//! fails a sync cycle.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// Phase of the sync cycle an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Refreshing,
    Comparing,
    Uploading,
    Downloading,
    Removing,
    Finalizing,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Refreshing => write!(f, "refreshing"),
            SyncPhase::Comparing => write!(f, "comparing"),
            SyncPhase::Uploading => write!(f, "uploading"),
            SyncPhase::Downloading => write!(f, "downloading"),
            SyncPhase::Removing => write!(f, "removing"),
            SyncPhase::Finalizing => write!(f, "finalizing"),
        }
    }
}

/// Status events for one sync cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    /// Fingerprint refresh started
    RefreshStarted,
    /// Fingerprint refresh finished
    RefreshCompleted { changed: bool, tracked_files: usize },
    /// Compare payload submitted
    CompareStarted { catalog_size: usize },
    /// Instruction lists received from the server
    PlanReceived {
        uploads: usize,
        downloads: usize,
        removals: usize,
        cloud_removals: usize,
    },
    /// Upload progress after each batch ("uploaded/total")
    UploadProgress { uploaded: usize, total: usize },
    /// Download progress, every few files and once at completion
    DownloadProgress { downloaded: usize, total: usize },
    /// Local removals applied
    RemoveProgress { removed: usize, total: usize },
    /// The user interrupted the cycle during this phase
    Interrupted { phase: SyncPhase },
    /// The cached token was rejected by the server
    LoginExpired,
    /// A download failed; the download phase stops here
    DownloadFailed { path: String },
    /// Non-fatal condition worth showing
    Warning { message: String },
    /// Nothing to upload, download or remove this cycle
    NothingToDo,
    /// Terminal per-category summary
    Completed {
        uploaded: usize,
        downloaded: usize,
        removed: usize,
    },
    /// The cycle failed during the given phase
    Failed { phase: SyncPhase, error: String },
}

/// Receiving side of the event stream.
pub struct EventChannel {
    receiver: mpsc::UnboundedReceiver<SyncEvent>,
}

impl EventChannel {
    /// Create a connected reporter/channel pair.
    pub fn new() -> (EventReporter, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            EventReporter {
                sender: Some(sender),
            },
            Self { receiver },
        )
    }

    /// Receive the next event.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        self.receiver.recv().await
    }

    /// Drain everything currently queued without waiting.
    pub fn drain(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Close the channel.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Sending side handed to the engine and transfer worker.
#[derive(Clone)]
pub struct EventReporter {
    sender: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl EventReporter {
    /// Reporter that discards every event.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Emit one event; silently dropped when nobody listens.
    pub fn emit(&self, event: SyncEvent) {
        if let Some(sender) = &self.sender {
            if sender.send(event).is_err() {
                trace!("event subscriber dropped, discarding events");
            }
        }
    }
}
