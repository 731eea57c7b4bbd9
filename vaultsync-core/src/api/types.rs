use serde::{Deserialize, Serialize};

/// One entry of a server instruction list.
///
/// `addr` is the vault-relative path; `idx` is the server-assigned opaque
/// identifier, present on download entries only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idx: Option<String>,
}

/// Instruction lists returned by the compare endpoint.
///
/// Consumed once per sync cycle; never persisted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncInstructions {
    #[serde(default)]
    pub upload_list: Vec<RemoteEntry>,
    #[serde(default)]
    pub download_list: Vec<RemoteEntry>,
    #[serde(default)]
    pub remove_list: Vec<RemoteEntry>,
    #[serde(default)]
    pub cloud_remove_list: Vec<RemoteEntry>,
}

impl SyncInstructions {
    /// True when no list carries any work.
    pub fn is_empty(&self) -> bool {
        self.upload_list.is_empty()
            && self.download_list.is_empty()
            && self.remove_list.is_empty()
            && self.cloud_remove_list.is_empty()
    }
}

/// One local file as submitted in the compare payload.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub path: String,
    pub mtime: i64,
    pub md5: String,
}

/// Parameters for a compare call.
#[derive(Debug, Clone)]
pub struct CompareRequest {
    pub user_name: String,
    pub vault: String,
    pub include: String,
    pub exclude: String,
    pub last_sync_time: i64,
    pub files: Vec<CatalogEntry>,
}

/// One file inside an upload batch.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub path: String,
    pub bytes: Vec<u8>,
    /// Declared content hash, if the caller knows one.
    pub md5: Option<String>,
}

/// A grouped multipart upload.
#[derive(Debug, Clone)]
pub struct UploadBatch {
    pub user_name: String,
    pub vault: String,
    pub files: Vec<UploadFile>,
}

/// Server confirmation for an upload batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadResponse {
    /// Paths the server accepted from this batch.
    #[serde(default)]
    pub list: Vec<String>,
    /// Server-side embedding status, "failed" when indexing went wrong.
    #[serde(default)]
    pub emb_status: Option<String>,
}

/// Login response body.
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}
