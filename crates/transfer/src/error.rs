//! Error types for the transfer engine.

use crate::types::{TransferKey, TransferKind};

/// Failure of a single Chunk Transport call.
///
/// The `Display` text becomes the item's `error_message`, so variants render
/// as messages a user can act on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The server answered with an error envelope.
    #[error("{message}")]
    Remote { code: i64, message: String },

    /// The server answered with a body that is not chunk data.
    #[error("unexpected response content type: {0}")]
    ContentType(String),

    /// The chunk body does not have the requested length.
    #[error("chunk size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// The request never produced a usable response.
    #[error("network error: {0}")]
    Network(String),
}

/// Failure of the durable key/value store behind the persistence adapter.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),
}

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source data lost, select the file again")]
    SourceLost,

    #[error("failed to read source: {0}")]
    SourceRead(String),

    #[error("upload incomplete: {sent} of {chunk_count} chunks sent")]
    IncompleteUpload { sent: u32, chunk_count: u32 },

    #[error("remote merge failed: {0}")]
    RemoteMerge(TransportError),

    #[error("failed to write download: {0}")]
    Finalize(String),

    #[error("transfer not found: {0}")]
    NotFound(TransferKey),

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("file of {total_size} bytes needs more than u32::MAX chunks of {chunk_size} bytes")]
    TooManyChunks { total_size: u64, chunk_size: u64 },

    #[error("chunk index {index} out of range for {chunk_count} chunks")]
    ChunkOutOfRange { index: u32, chunk_count: u32 },

    #[error("source is {actual} bytes but the transfer expects {expected}")]
    SourceSizeMismatch { expected: u64, actual: u64 },

    #[error("update does not apply to a {0} item: {1}")]
    InvalidUpdate(TransferKind, &'static str),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}
