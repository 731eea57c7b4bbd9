use super::{error::*, types::*};
use reqwest::multipart::{Form, Part};
use reqwest::ClientBuilder;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Client-type tag sent with every upload batch.
const SOURCE_TAG: &str = "obsidian_plugin";
/// Entry type for vault files on the server side.
const ENTRY_TYPE: &str = "note";

/// Typed client for the memo server REST API.
///
/// Holds the cached auth token; all calls except [`login`](Self::login)
/// send it as `Authorization: Token <token>`.
pub struct VaultServerClient {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl VaultServerClient {
    /// Create a new client with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("vaultsync/0.1.0")
            .build()
            .map_err(ApiError::Network)?;

        Self::with_client(base_url, http)
    }

    /// Create a new client with custom HTTP client configuration.
    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Result<Self> {
        let base_url = base_url.into();
        url::Url::parse(&base_url)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        })
    }

    /// Base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the cached auth token.
    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    /// Drop the cached auth token.
    pub async fn clear_token(&self) {
        *self.token.write().await = None;
    }

    /// Current cached auth token, if any.
    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    /// Authenticate with username and password, caching the token.
    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        debug!("logging in as {}", username);

        let response = self
            .http
            .post(format!("{}/api/auth/login/", self.base_url))
            .json(&serde_json::json!({
                "username": username,
                "password": password,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Authentication(message));
        }

        let login: LoginResponse = parse_body(response).await?;
        self.set_token(Some(login.token.clone())).await;
        Ok(login.token)
    }

    /// Submit the local catalog and receive the server's instruction lists.
    pub async fn compare(&self, request: &CompareRequest) -> Result<SyncInstructions> {
        let files = serde_json::to_string(&request.files)
            .map_err(|e| ApiError::Parse(e.to_string()))?;

        let form = Form::new()
            .text("user_name", request.user_name.clone())
            .text("vault", request.vault.clone())
            .text("rtype", "compare")
            .text("include", request.include.clone())
            .text("exclude", request.exclude.clone())
            .text("last_sync_time", request.last_sync_time.to_string())
            .text("files", files);

        let response = self
            .authorized(self.http.post(format!("{}/api/sync/", self.base_url)))
            .await
            .multipart(form)
            .send()
            .await?;

        let response = check_status(response).await?;
        parse_body(response).await
    }

    /// Upload one batch of files as a single multipart request.
    ///
    /// The `files`, `filepaths` and `filemd5s` fields are repeated in
    /// parallel; an unknown hash is sent as an empty string so the server
    /// can zip the three lists positionally.
    pub async fn upload_batch(&self, batch: UploadBatch) -> Result<UploadResponse> {
        let mut form = Form::new()
            .text("etype", ENTRY_TYPE)
            .text("source", SOURCE_TAG)
            .text("vault", batch.vault.clone())
            .text("rtype", "upload");

        for file in batch.files {
            let file_name = file
                .path
                .rsplit('/')
                .next()
                .unwrap_or(file.path.as_str())
                .to_string();
            form = form
                .part("files", Part::bytes(file.bytes).file_name(file_name))
                .text("filepaths", file.path)
                .text("filemd5s", file.md5.unwrap_or_default());
        }
        form = form.text("user_name", batch.user_name);

        let response = self
            .authorized(self.http.post(format!("{}/api/entry/data/", self.base_url)))
            .await
            .multipart(form)
            .send()
            .await?;

        let response = check_status(response).await?;
        parse_body(response).await
    }

    /// Fetch one file's content by its server-assigned identifier.
    ///
    /// Returns the raw response so callers can stream the body to disk.
    pub async fn download(&self, idx: &str) -> Result<reqwest::Response> {
        let response = self
            .authorized(
                self.http
                    .get(format!("{}/api/entry/data/{}/download/", self.base_url, idx)),
            )
            .await
            .send()
            .await?;

        check_status(response).await
    }

    async fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.read().await.as_deref() {
            Some(token) => builder.header("Authorization", format!("Token {}", token)),
            None => builder,
        }
    }
}

/// Map non-success statuses to typed errors; 401 is always AuthExpired.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.as_u16() == 401 {
        return Err(ApiError::AuthExpired);
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ApiError::Server {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response)
}

/// Strictly deserialize a response body, failing with a parse error on
/// any shape mismatch.
async fn parse_body<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ApiError::Parse(e.to_string()))
}
