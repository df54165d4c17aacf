//! CLI error types and conversions.

use crate::api::ApiError;
use crate::cache::CacheError;
use crate::ingest::IngestError;
use crate::store::StoreError;
use crate::uploader::UploadError;

/// CLI errors.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// API error
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Cache error
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Ingestion error
    #[error("ingestion error: {0}")]
    Ingest(#[from] IngestError),

    /// Destination store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Upload error
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Work remains failed after the run
    #[error("incomplete: {0}")]
    Incomplete(String),

    /// Health probe found a degraded dependency
    #[error("unhealthy: {0}")]
    Unhealthy(String),
}
