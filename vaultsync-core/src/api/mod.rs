//! Memo server API client module
//!
//! Provides a wrapper around the server's REST API with support for
//! token authentication, the compare endpoint, grouped multipart uploads,
//! and streaming downloads.

pub mod client;
pub mod error;
pub mod types;

// Re-export main types for convenience
pub use client::VaultServerClient;
pub use error::{ApiError, Result};
pub use types::*;
