//! Transfer worker tests for batching, ordering and interrupt behavior.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use vaultsync_core::{RemoteEntry, VaultServerClient};

use crate::progress::{EventChannel, SyncEvent, SyncPhase};
use crate::transfer::{TransferWorker, UploadCandidate};

struct Harness {
    worker: TransferWorker,
    channel: EventChannel,
    client: Arc<VaultServerClient>,
    cancel: CancellationToken,
}

fn harness(server_url: &str, vault: &Path) -> Harness {
    let client = Arc::new(VaultServerClient::new(server_url).unwrap());
    let (reporter, channel) = EventChannel::new();
    let cancel = CancellationToken::new();
    let worker = TransferWorker::new(client.clone(), vault, reporter, cancel.clone());
    Harness {
        worker,
        channel,
        client,
        cancel,
    }
}

fn candidates(paths: &[&str]) -> Vec<UploadCandidate> {
    paths
        .iter()
        .map(|p| UploadCandidate {
            path: p.to_string(),
            md5: None,
        })
        .collect()
}

fn download_entries(entries: &[(&str, &str)]) -> Vec<RemoteEntry> {
    entries
        .iter()
        .map(|(addr, idx)| RemoteEntry {
            addr: addr.to_string(),
            idx: Some(idx.to_string()),
        })
        .collect()
}

async fn write_files(vault: &Path, paths: &[&str]) {
    for p in paths {
        fs::write(vault.join(p), format!("content of {p}"))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn uploads_are_grouped_into_batches_of_five() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let paths: Vec<String> = (0..12).map(|i| format!("f{i}.md")).collect();
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    write_files(temp.path(), &refs).await;

    Mock::given(method("POST"))
        .and(path("/api/entry/data/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "list": paths,
            "emb_status": "success"
        })))
        .expect(3)
        .mount(&server)
        .await;

    let mut h = harness(&server.uri(), temp.path());
    let (success, uploaded) = h.worker.upload("alice", "notes", &candidates(&refs)).await;

    assert!(success);
    assert_eq!(uploaded.len(), 12);

    let progress: Vec<usize> = h
        .channel
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            SyncEvent::UploadProgress { uploaded, .. } => Some(uploaded),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![0, 5, 10, 12]);
}

#[tokio::test]
async fn failed_batch_does_not_stop_later_batches() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let paths: Vec<String> = (0..6).map(|i| format!("f{i}.md")).collect();
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    write_files(temp.path(), &refs).await;

    Mock::given(method("POST"))
        .and(path("/api/entry/data/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/entry/data/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "list": paths
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server.uri(), temp.path());
    let (success, uploaded) = h.worker.upload("alice", "notes", &candidates(&refs)).await;

    // The second batch (the sixth file) still went through.
    assert!(!success);
    assert_eq!(uploaded, vec!["f5.md".to_string()]);
}

#[tokio::test]
async fn upload_401_clears_token_and_reports_expiry() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    write_files(temp.path(), &["a.md"]).await;

    Mock::given(method("POST"))
        .and(path("/api/entry/data/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut h = harness(&server.uri(), temp.path());
    h.client.set_token(Some("stale".to_string())).await;

    let (success, uploaded) = h.worker.upload("alice", "notes", &candidates(&["a.md"])).await;

    assert!(!success);
    assert!(uploaded.is_empty());
    assert!(h.client.token().await.is_none());
    assert!(h
        .channel
        .drain()
        .iter()
        .any(|e| matches!(e, SyncEvent::LoginExpired)));
}

#[tokio::test]
async fn unreadable_file_is_skipped_and_flags_failure() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    write_files(temp.path(), &["real.md"]).await;

    Mock::given(method("POST"))
        .and(path("/api/entry/data/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "list": ["real.md"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server.uri(), temp.path());
    let (success, uploaded) = h
        .worker
        .upload("alice", "notes", &candidates(&["missing.md", "real.md"]))
        .await;

    assert!(!success);
    assert_eq!(uploaded, vec!["real.md".to_string()]);
}

#[tokio::test]
async fn cancelled_upload_sends_nothing() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    write_files(temp.path(), &["a.md"]).await;

    Mock::given(method("POST"))
        .and(path("/api/entry/data/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut h = harness(&server.uri(), temp.path());
    h.cancel.cancel();

    let (success, uploaded) = h.worker.upload("alice", "notes", &candidates(&["a.md"])).await;

    assert!(success);
    assert!(uploaded.is_empty());
    assert!(h.channel.drain().iter().any(|e| matches!(
        e,
        SyncEvent::Interrupted {
            phase: SyncPhase::Uploading
        }
    )));
}

/// Cancels the worker's token from inside the n-th matched response.
struct CancelOnHit {
    cancel: CancellationToken,
    hits: AtomicUsize,
    cancel_at: usize,
    body: serde_json::Value,
}

impl Respond for CancelOnHit {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.hits.fetch_add(1, Ordering::SeqCst) + 1 == self.cancel_at {
            self.cancel.cancel();
        }
        ResponseTemplate::new(200).set_body_json(self.body.clone())
    }
}

#[tokio::test]
async fn interrupt_during_upload_halts_later_batches() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let paths: Vec<String> = (0..12).map(|i| format!("f{i:02}.md")).collect();
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    write_files(temp.path(), &refs).await;

    let mut h = harness(&server.uri(), temp.path());

    // The second batch's response flips the flag; the third batch must
    // never be sent.
    Mock::given(method("POST"))
        .and(path("/api/entry/data/"))
        .respond_with(CancelOnHit {
            cancel: h.cancel.clone(),
            hits: AtomicUsize::new(0),
            cancel_at: 2,
            body: serde_json::json!({ "list": paths, "emb_status": "success" }),
        })
        .expect(2)
        .mount(&server)
        .await;

    let (success, uploaded) = h.worker.upload("alice", "notes", &candidates(&refs)).await;

    // An interrupt is not a failure; only the first two batches landed.
    assert!(success);
    assert_eq!(uploaded, paths[..10].to_vec());

    let events = h.channel.drain();
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::Interrupted {
            phase: SyncPhase::Uploading
        }
    )));
    let progress: Vec<usize> = events
        .into_iter()
        .filter_map(|e| match e {
            SyncEvent::UploadProgress { uploaded, .. } => Some(uploaded),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![0, 5, 10]);
}

#[tokio::test]
async fn uploads_carry_the_auth_token() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    write_files(temp.path(), &["a.md"]).await;

    Mock::given(method("POST"))
        .and(path("/api/entry/data/"))
        .and(header("Authorization", "Token tok123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "list": ["a.md"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server.uri(), temp.path());
    h.client.set_token(Some("tok123".to_string())).await;

    let (success, uploaded) = h.worker.upload("alice", "notes", &candidates(&["a.md"])).await;
    assert!(success);
    assert_eq!(uploaded, vec!["a.md".to_string()]);
}

#[tokio::test]
async fn download_stops_at_first_failure() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/entry/data/1/download/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("one"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/entry/data/2/download/"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/entry/data/3/download/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut h = harness(&server.uri(), temp.path());
    let (success, downloaded) = h
        .worker
        .download(&download_entries(&[
            ("d1.md", "1"),
            ("d2.md", "2"),
            ("d3.md", "3"),
        ]))
        .await;

    assert!(!success);
    assert_eq!(downloaded, 1);
    assert!(temp.path().join("d1.md").exists());
    assert!(!temp.path().join("d3.md").exists());
    assert!(h
        .channel
        .drain()
        .iter()
        .any(|e| matches!(e, SyncEvent::DownloadFailed { path } if path == "d2.md")));
}

#[tokio::test]
async fn download_creates_parent_directories() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/entry/data/9/download/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("deep"))
        .mount(&server)
        .await;

    let h = harness(&server.uri(), temp.path());
    let (success, downloaded) = h
        .worker
        .download(&download_entries(&[("a/b/c.md", "9")]))
        .await;

    assert!(success);
    assert_eq!(downloaded, 1);
    let body = fs::read_to_string(temp.path().join("a/b/c.md")).await.unwrap();
    assert_eq!(body, "deep");
}

#[tokio::test]
async fn download_entry_without_identifier_fails() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    let mut h = harness(&server.uri(), temp.path());
    let entries = vec![RemoteEntry {
        addr: "broken.md".to_string(),
        idx: None,
    }];

    let (success, downloaded) = h.worker.download(&entries).await;

    assert!(!success);
    assert_eq!(downloaded, 0);
    assert!(h
        .channel
        .drain()
        .iter()
        .any(|e| matches!(e, SyncEvent::DownloadFailed { path } if path == "broken.md")));
}

#[tokio::test]
async fn download_progress_is_emitted_every_five_files() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    for idx in 1..=7 {
        Mock::given(method("GET"))
            .and(path(format!("/api/entry/data/{idx}/download/")))
            .respond_with(ResponseTemplate::new(200).set_body_string("body"))
            .mount(&server)
            .await;
    }

    let entries: Vec<(String, String)> = (1..=7)
        .map(|i| (format!("d{i}.md"), i.to_string()))
        .collect();
    let entry_refs: Vec<(&str, &str)> = entries
        .iter()
        .map(|(a, b)| (a.as_str(), b.as_str()))
        .collect();

    let mut h = harness(&server.uri(), temp.path());
    let (success, downloaded) = h.worker.download(&download_entries(&entry_refs)).await;

    assert!(success);
    assert_eq!(downloaded, 7);

    let progress: Vec<usize> = h
        .channel
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            SyncEvent::DownloadProgress { downloaded, .. } => Some(downloaded),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![5, 7]);
}
