use std::collections::BTreeSet;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::TransferError;
use crate::plan::ChunkPlan;
use crate::source::SharedSource;

/// Which history an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Download,
    Upload,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => f.write_str("download"),
            Self::Upload => f.write_str("upload"),
        }
    }
}

/// Identity of a transfer item: the share `uuid` for downloads, the
/// client-generated `file_id` for uploads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransferKey {
    Download(String),
    Upload(String),
}

impl TransferKey {
    pub fn kind(&self) -> TransferKind {
        match self {
            Self::Download(_) => TransferKind::Download,
            Self::Upload(_) => TransferKind::Upload,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Download(id) | Self::Upload(id) => id,
        }
    }
}

impl fmt::Display for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Share credentials forwarded verbatim to the transport.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub secret_key: String,
    /// Password-derived ciphertext, produced outside the engine.
    pub ciphertext: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("secret_key", &"<redacted>")
            .field("ciphertext", &"<redacted>")
            .finish()
    }
}

/// Status flags shared by both item kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatus {
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub merged: bool,
}

/// Coarse state derived from the status flags, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Running, queued, or never started.
    Active,
    Paused,
    Failed,
    Completed,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Failed => "failed",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl TransferStatus {
    pub fn state(&self) -> TransferState {
        if self.merged {
            TransferState::Completed
        } else if self.failed {
            TransferState::Failed
        } else if self.is_paused {
            TransferState::Paused
        } else {
            TransferState::Active
        }
    }
}

/// One confirmed download chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkSlot {
    /// Payload kept until the download is finalized.
    Data(Bytes),
    /// Completion marker left after finalization or a restore.
    Placeholder,
}

/// A download from a remote share.
#[derive(Debug, Clone)]
pub struct DownloadItem {
    pub uuid: String,
    pub file_name: String,
    pub plan: ChunkPlan,
    pub credentials: Credentials,
    /// Gap-free prefix of the file, in chunk order.
    pub succeeded_chunks: Vec<ChunkSlot>,
    pub status: TransferStatus,
}

impl DownloadItem {
    pub fn new(
        uuid: impl Into<String>,
        file_name: impl Into<String>,
        total_size: u64,
        chunk_size: u64,
        credentials: Credentials,
    ) -> Result<Self, TransferError> {
        Ok(Self {
            uuid: uuid.into(),
            file_name: file_name.into(),
            plan: ChunkPlan::new(total_size, chunk_size)?,
            credentials,
            succeeded_chunks: Vec::new(),
            status: TransferStatus::default(),
        })
    }

    /// Index of the first chunk not yet downloaded.
    pub fn resume_point(&self) -> u32 {
        self.succeeded_chunks.len() as u32
    }

    pub(crate) fn apply(&mut self, update: ItemUpdate) -> Result<(), TransferError> {
        if update.source.is_some() {
            return Err(TransferError::InvalidUpdate(
                TransferKind::Download,
                "downloads have no local source",
            ));
        }
        match &update.progress {
            Some(ProgressUpdate::AppendChunk(_)) if self.resume_point() >= self.plan.chunk_count => {
                return Err(TransferError::ChunkOutOfRange {
                    index: self.resume_point(),
                    chunk_count: self.plan.chunk_count,
                });
            }
            Some(ProgressUpdate::CompleteIndex(_)) => {
                return Err(TransferError::InvalidUpdate(
                    TransferKind::Download,
                    "download progress is an ordered chunk list",
                ));
            }
            _ => {}
        }

        update.apply_status(&mut self.status);
        match update.progress {
            Some(ProgressUpdate::Reset) => self.succeeded_chunks.clear(),
            Some(ProgressUpdate::AppendChunk(data)) => {
                self.succeeded_chunks.push(ChunkSlot::Data(data));
            }
            Some(ProgressUpdate::Compact) => {
                self.succeeded_chunks =
                    vec![ChunkSlot::Placeholder; self.plan.chunk_count as usize];
            }
            Some(ProgressUpdate::CompleteIndex(_)) | None => {}
        }
        Ok(())
    }
}

/// An upload to a remote share.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub file_id: String,
    /// Share the chunks are sent to.
    pub uuid: String,
    pub file_name: String,
    /// Destination directory on the share.
    pub target_path: String,
    pub plan: ChunkPlan,
    pub credentials: Credentials,
    pub succeeded_chunks: BTreeSet<u32>,
    pub status: TransferStatus,
    /// Never persisted.
    pub source: Option<SharedSource>,
}

impl UploadItem {
    /// Creates an upload whose size is taken from `source`.
    pub fn new(
        file_id: impl Into<String>,
        uuid: impl Into<String>,
        file_name: impl Into<String>,
        target_path: impl Into<String>,
        chunk_size: u64,
        credentials: Credentials,
        source: SharedSource,
    ) -> Result<Self, TransferError> {
        Ok(Self {
            file_id: file_id.into(),
            uuid: uuid.into(),
            file_name: file_name.into(),
            target_path: target_path.into(),
            plan: ChunkPlan::new(source.len(), chunk_size)?,
            credentials,
            succeeded_chunks: BTreeSet::new(),
            status: TransferStatus::default(),
            source: Some(source),
        })
    }

    /// First index not yet sent.
    pub fn resume_point(&self) -> u32 {
        (0..self.plan.chunk_count)
            .find(|i| !self.succeeded_chunks.contains(i))
            .unwrap_or(self.plan.chunk_count)
    }

    /// Indices still to send, ascending.
    pub fn missing_chunks(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.plan.chunk_count).filter(|i| !self.succeeded_chunks.contains(i))
    }

    /// Returns `true` once every index in `0..chunk_count` has been sent.
    pub fn all_chunks_sent(&self) -> bool {
        self.succeeded_chunks.len() == self.plan.chunk_count as usize
    }

    /// Partial chunks exist on the share and must be removed remotely.
    pub fn needs_remote_cleanup(&self) -> bool {
        !self.status.merged && !self.succeeded_chunks.is_empty()
    }

    pub(crate) fn apply(&mut self, update: ItemUpdate) -> Result<(), TransferError> {
        match &update.progress {
            Some(ProgressUpdate::CompleteIndex(index)) if *index >= self.plan.chunk_count => {
                return Err(TransferError::ChunkOutOfRange {
                    index: *index,
                    chunk_count: self.plan.chunk_count,
                });
            }
            Some(ProgressUpdate::AppendChunk(_) | ProgressUpdate::Compact) => {
                return Err(TransferError::InvalidUpdate(
                    TransferKind::Upload,
                    "upload progress is a set of chunk indices",
                ));
            }
            _ => {}
        }
        if let Some(SourceUpdate::Attach(source)) = &update.source
            && source.len() != self.plan.total_size
        {
            return Err(TransferError::SourceSizeMismatch {
                expected: self.plan.total_size,
                actual: source.len(),
            });
        }

        update.apply_status(&mut self.status);
        match update.progress {
            Some(ProgressUpdate::Reset) => self.succeeded_chunks.clear(),
            Some(ProgressUpdate::CompleteIndex(index)) => {
                self.succeeded_chunks.insert(index);
            }
            Some(ProgressUpdate::AppendChunk(_) | ProgressUpdate::Compact) | None => {}
        }
        match update.source {
            Some(SourceUpdate::Attach(source)) => self.source = Some(source),
            Some(SourceUpdate::Release) => self.source = None,
            None => {}
        }
        Ok(())
    }
}

/// A download or upload tracked by the store.
#[derive(Debug, Clone)]
pub enum TransferItem {
    Download(DownloadItem),
    Upload(UploadItem),
}

impl TransferItem {
    pub fn key(&self) -> TransferKey {
        match self {
            Self::Download(d) => TransferKey::Download(d.uuid.clone()),
            Self::Upload(u) => TransferKey::Upload(u.file_id.clone()),
        }
    }

    pub fn kind(&self) -> TransferKind {
        match self {
            Self::Download(_) => TransferKind::Download,
            Self::Upload(_) => TransferKind::Upload,
        }
    }

    pub fn status(&self) -> &TransferStatus {
        match self {
            Self::Download(d) => &d.status,
            Self::Upload(u) => &u.status,
        }
    }

    pub fn plan(&self) -> &ChunkPlan {
        match self {
            Self::Download(d) => &d.plan,
            Self::Upload(u) => &u.plan,
        }
    }

    pub fn file_name(&self) -> &str {
        match self {
            Self::Download(d) => &d.file_name,
            Self::Upload(u) => &u.file_name,
        }
    }

    /// Number of chunks confirmed so far.
    pub fn completed_chunks(&self) -> u32 {
        match self {
            Self::Download(d) => d.succeeded_chunks.len() as u32,
            Self::Upload(u) => u.succeeded_chunks.len() as u32,
        }
    }

    pub fn state(&self) -> TransferState {
        self.status().state()
    }

    /// Applies a typed partial update. Validation happens before any field
    /// is written, so a rejected update leaves the item untouched.
    pub(crate) fn apply(&mut self, update: ItemUpdate) -> Result<(), TransferError> {
        match self {
            Self::Download(d) => d.apply(update),
            Self::Upload(u) => u.apply(update),
        }
    }
}

/// Change to an item's progress record.
#[derive(Debug, Clone)]
pub enum ProgressUpdate {
    /// Forget all progress.
    Reset,
    /// Download: append the next chunk.
    AppendChunk(Bytes),
    /// Upload: record a sent chunk index.
    CompleteIndex(u32),
    /// Download: replace payloads with completion markers.
    Compact,
}

/// Change to an upload's byte source.
#[derive(Debug, Clone)]
pub enum SourceUpdate {
    Attach(SharedSource),
    Release,
}

/// Typed partial update: only `Some` fields are written.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    pub is_paused: Option<bool>,
    pub failed: Option<bool>,
    pub error_message: Option<String>,
    pub merged: Option<bool>,
    pub progress: Option<ProgressUpdate>,
    pub source: Option<SourceUpdate>,
}

impl ItemUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.is_paused = Some(paused);
        self
    }

    /// Marks the item failed with `message`.
    pub fn failure(mut self, message: impl Into<String>) -> Self {
        self.failed = Some(true);
        self.error_message = Some(message.into());
        self
    }

    /// Clears a previous failure.
    pub fn clear_failure(mut self) -> Self {
        self.failed = Some(false);
        self.error_message = Some(String::new());
        self
    }

    pub fn merged(mut self, merged: bool) -> Self {
        self.merged = Some(merged);
        self
    }

    pub fn progress(mut self, progress: ProgressUpdate) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn source(mut self, source: SourceUpdate) -> Self {
        self.source = Some(source);
        self
    }

    fn apply_status(&self, status: &mut TransferStatus) {
        if let Some(v) = self.is_paused {
            status.is_paused = v;
        }
        if let Some(v) = self.failed {
            status.failed = v;
        }
        if let Some(v) = &self.error_message {
            status.error_message.clone_from(v);
        }
        if let Some(v) = self.merged {
            status.merged = v;
        }
    }
}

/// Whether a run starts over or continues from the resume point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Fresh,
    Resume,
}

/// How a transfer run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Paused,
    Failed(String),
    /// Another loop already owns this key.
    AlreadyRunning,
    /// Nothing left to transfer.
    AlreadyMerged,
    /// The item was removed before or during the run.
    Missing,
    /// The driver no longer admits runs.
    ShuttingDown,
}

/// Progress notification emitted by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Progress {
        key: TransferKey,
        completed: u32,
        total: u32,
    },
    Paused {
        key: TransferKey,
    },
    Failed {
        key: TransferKey,
        error: String,
    },
    Completed {
        key: TransferKey,
    },
}
