//! Resumable chunked transfers with persisted history.
//!
//! Downloads fetch a shared file as fixed-size byte ranges and concatenate
//! them locally; uploads read a local file in chunks, send them one by one
//! and ask the share to merge them. Each item can be paused, failed and
//! resumed from its first unconfirmed chunk, including after a restart.
//!
//! The crate has no network or UI code. A front end supplies a
//! [`ChunkTransport`] and a [`Finalizer`] and drives items through
//! [`TransferDriver`].

mod download;
pub mod driver;
pub mod error;
pub mod finalizer;
pub mod persistence;
pub mod plan;
pub mod source;
pub mod store;
pub mod transport;
pub mod types;
mod upload;
mod validation;

pub use driver::{DEFAULT_MAX_CONCURRENT, TransferDriver};
pub use error::{PersistenceError, TransferError, TransportError};
pub use finalizer::{Artifact, DirectoryFinalizer, Finalizer};
pub use persistence::{
    DOWNLOAD_NAMESPACE, FileKvStore, KeyValueStore, MemoryKvStore, Persistence,
    UPLOAD_NAMESPACE,
};
pub use plan::ChunkPlan;
pub use source::{ByteSource, FileSource, MemorySource, SharedSource};
pub use store::TransferStore;
pub use transport::{
    ChunkTransport, ChunkUpload, MergeRequest, RangeRequest, RemoveRequest, TransportFuture,
};
pub use types::{
    ChunkSlot, Credentials, DownloadItem, ItemUpdate, ProgressUpdate, RunMode, RunOutcome,
    SourceUpdate, TransferEvent, TransferItem, TransferKey, TransferKind, TransferState,
    TransferStatus, UploadItem,
};
pub use validation::validate_file_name;

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;
