//! Core client library for the memo server sync API
//!
//! This crate wraps the remote server's REST endpoints (login, compare,
//! batch upload, download) behind a typed client. All responses are
//! parsed and validated at the boundary; callers never see raw JSON.

pub mod api;

pub use api::client::VaultServerClient;
pub use api::error::{ApiError, Result};
pub use api::types::*;
