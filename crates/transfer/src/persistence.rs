//! Sanitized persistence of transfer history.
//!
//! Each history (downloads, uploads) is stored as one JSON array under its
//! own namespace and fully replaced on every store mutation. Records are a
//! separate type from the in-memory items so chunk payloads and upload
//! sources have no field to be written into.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PersistenceError;
use crate::plan::ChunkPlan;
use crate::types::{
    ChunkSlot, Credentials, DownloadItem, TransferKind, TransferStatus, UploadItem,
};

/// Namespace holding the download history.
pub const DOWNLOAD_NAMESPACE: &str = "fileshare_download_history";

/// Namespace holding the upload history.
pub const UPLOAD_NAMESPACE: &str = "fileshare_upload_history";

/// Namespace for one history.
pub fn namespace(kind: TransferKind) -> &'static str {
    match kind {
        TransferKind::Download => DOWNLOAD_NAMESPACE,
        TransferKind::Upload => UPLOAD_NAMESPACE,
    }
}

/// Durable string key/value storage.
pub trait KeyValueStore: Send + Sync {
    fn put(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn delete(&self, key: &str) -> Result<(), PersistenceError>;
}

/// One JSON file per key inside a directory.
///
/// Files are written through a temporary file and a rename, and are
/// readable by the owner only since records carry share credentials.
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn path(&self, key: &str) -> Result<PathBuf, PersistenceError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(PersistenceError::InvalidNamespace(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileKvStore {
    fn put(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let path = self.path(key)?;
        std::fs::create_dir_all(&self.dir)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        set_permissions_0600(&tmp);
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.path(key)?;
        match std::fs::read_to_string(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        let path = self.path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

/// In-memory storage for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn put(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// Persisted form of a download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub uuid: String,
    pub file_name: String,
    #[serde(flatten)]
    pub plan: ChunkPlan,
    #[serde(flatten)]
    pub credentials: Credentials,
    /// `chunk_count` zeros once merged, empty otherwise.
    #[serde(default)]
    pub succeeded_chunks: Vec<u8>,
    #[serde(flatten)]
    pub status: TransferStatus,
}

impl From<&DownloadItem> for DownloadRecord {
    fn from(item: &DownloadItem) -> Self {
        let succeeded_chunks = if item.status.merged {
            vec![0; item.plan.chunk_count as usize]
        } else {
            Vec::new()
        };
        Self {
            uuid: item.uuid.clone(),
            file_name: item.file_name.clone(),
            plan: item.plan,
            credentials: item.credentials.clone(),
            succeeded_chunks,
            status: item.status.clone(),
        }
    }
}

impl DownloadRecord {
    fn into_item(self) -> Option<DownloadItem> {
        if !self.plan.is_consistent() {
            return None;
        }
        let succeeded_chunks = if self.status.merged {
            vec![ChunkSlot::Placeholder; self.plan.chunk_count as usize]
        } else {
            Vec::new()
        };
        Some(DownloadItem {
            uuid: self.uuid,
            file_name: self.file_name,
            plan: self.plan,
            credentials: self.credentials,
            succeeded_chunks,
            status: interrupted_as_paused(self.status),
        })
    }
}

/// Persisted form of an upload. The byte source is never recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub file_id: String,
    pub uuid: String,
    pub file_name: String,
    pub target_path: String,
    #[serde(flatten)]
    pub plan: ChunkPlan,
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(default)]
    pub succeeded_chunks: BTreeSet<u32>,
    #[serde(flatten)]
    pub status: TransferStatus,
}

impl From<&UploadItem> for UploadRecord {
    fn from(item: &UploadItem) -> Self {
        Self {
            file_id: item.file_id.clone(),
            uuid: item.uuid.clone(),
            file_name: item.file_name.clone(),
            target_path: item.target_path.clone(),
            plan: item.plan,
            credentials: item.credentials.clone(),
            succeeded_chunks: item.succeeded_chunks.clone(),
            status: item.status.clone(),
        }
    }
}

impl UploadRecord {
    fn into_item(self) -> Option<UploadItem> {
        let in_range = self
            .succeeded_chunks
            .last()
            .is_none_or(|&last| last < self.plan.chunk_count);
        if !self.plan.is_consistent() || !in_range {
            return None;
        }
        let succeeded_chunks = contiguous_prefix(self.succeeded_chunks);
        Some(UploadItem {
            file_id: self.file_id,
            uuid: self.uuid,
            file_name: self.file_name,
            target_path: self.target_path,
            plan: self.plan,
            credentials: self.credentials,
            succeeded_chunks,
            status: interrupted_as_paused(self.status),
            source: None,
        })
    }
}

/// Keeps `0..n` for the longest gap-free run starting at index 0. Indices
/// past a gap are dropped and sent again on resume.
fn contiguous_prefix(indices: BTreeSet<u32>) -> BTreeSet<u32> {
    let len = indices
        .iter()
        .zip(0u32..)
        .take_while(|(index, expected)| *index == expected)
        .count();
    if len < indices.len() {
        warn!(
            kept = len,
            dropped = indices.len() - len,
            "upload record has gaps in its chunk indices, keeping the gap-free prefix"
        );
    }
    (0..len as u32).collect()
}

/// A transfer that was running when the process stopped comes back paused,
/// since no loop is driving it any more.
fn interrupted_as_paused(mut status: TransferStatus) -> TransferStatus {
    if !status.merged && !status.failed {
        status.is_paused = true;
    }
    status
}

/// Sanitizing adapter between the store and a [`KeyValueStore`].
#[derive(Clone)]
pub struct Persistence {
    kv: Arc<dyn KeyValueStore>,
}

impl Persistence {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Persistence backed by [`MemoryKvStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()))
    }

    pub fn save(&self, namespace: &str, json: &str) -> Result<(), PersistenceError> {
        self.kv.put(namespace, json)
    }

    pub fn load(&self, namespace: &str) -> Result<Option<String>, PersistenceError> {
        self.kv.get(namespace)
    }

    pub fn clear(&self, namespace: &str) -> Result<(), PersistenceError> {
        self.kv.delete(namespace)
    }

    /// Writes the sanitized download history.
    pub fn save_downloads(&self, items: &[DownloadItem]) -> Result<(), PersistenceError> {
        let records: Vec<DownloadRecord> = items.iter().map(DownloadRecord::from).collect();
        let json = serde_json::to_string(&records)?;
        self.save(DOWNLOAD_NAMESPACE, &json)?;
        debug!(count = records.len(), "persisted download history");
        Ok(())
    }

    /// Writes the sanitized upload history.
    pub fn save_uploads(&self, items: &[UploadItem]) -> Result<(), PersistenceError> {
        let records: Vec<UploadRecord> = items.iter().map(UploadRecord::from).collect();
        let json = serde_json::to_string(&records)?;
        self.save(UPLOAD_NAMESPACE, &json)?;
        debug!(count = records.len(), "persisted upload history");
        Ok(())
    }

    /// Restores the download history. Missing or unreadable storage is an
    /// empty history.
    pub fn load_downloads(&self) -> Vec<DownloadItem> {
        self.load_records::<DownloadRecord>(DOWNLOAD_NAMESPACE)
            .into_iter()
            .filter_map(|record| {
                let uuid = record.uuid.clone();
                let item = record.into_item();
                if item.is_none() {
                    warn!(uuid = %uuid, "dropping inconsistent download record");
                }
                item
            })
            .collect()
    }

    /// Restores the upload history. Missing or unreadable storage is an
    /// empty history.
    pub fn load_uploads(&self) -> Vec<UploadItem> {
        self.load_records::<UploadRecord>(UPLOAD_NAMESPACE)
            .into_iter()
            .filter_map(|record| {
                let file_id = record.file_id.clone();
                let item = record.into_item();
                if item.is_none() {
                    warn!(file_id = %file_id, "dropping inconsistent upload record");
                }
                item
            })
            .collect()
    }

    fn load_records<T: for<'de> Deserialize<'de>>(&self, namespace: &str) -> Vec<T> {
        let json = match self.load(namespace) {
            Ok(Some(json)) => json,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(namespace, error = %e, "failed to read transfer history, starting empty");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<T>>(&json) {
            Ok(records) => {
                debug!(namespace, count = records.len(), "loaded transfer history");
                records
            }
            Err(e) => {
                warn!(namespace, error = %e, "corrupt transfer history, starting empty");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::source::MemorySource;

    fn creds() -> Credentials {
        Credentials {
            secret_key: "key".into(),
            ciphertext: "cipher".into(),
        }
    }

    fn download(merged: bool) -> DownloadItem {
        let mut item = DownloadItem::new("d1", "movie.mkv", 10, 4, creds()).unwrap();
        item.succeeded_chunks = vec![
            ChunkSlot::Data(Bytes::from_static(b"PAYLOAD!")),
            ChunkSlot::Data(Bytes::from_static(b"PAYLOAD!")),
        ];
        item.status.merged = merged;
        item
    }

    fn upload() -> UploadItem {
        let source = Arc::new(MemorySource::new(vec![7u8; 10]));
        let mut item = UploadItem::new("f1", "share", "a.bin", "/docs", 4, creds(), source)
            .unwrap();
        item.succeeded_chunks.insert(0);
        item.succeeded_chunks.insert(1);
        item
    }

    #[test]
    fn merged_download_keeps_only_zero_markers() {
        let record = DownloadRecord::from(&download(true));
        assert_eq!(record.succeeded_chunks, vec![0, 0, 0]);

        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("PAYLOAD"));
        assert!(json.contains(r#""succeeded_chunks":[0,0,0]"#));
    }

    #[test]
    fn unmerged_download_drops_progress() {
        let record = DownloadRecord::from(&download(false));
        assert!(record.succeeded_chunks.is_empty());
    }

    #[test]
    fn record_uses_flat_field_names() {
        let json = serde_json::to_value(DownloadRecord::from(&download(false))).unwrap();
        assert_eq!(json["total_size"], 10);
        assert_eq!(json["chunk_size"], 4);
        assert_eq!(json["chunk_count"], 3);
        assert_eq!(json["secret_key"], "key");
        assert_eq!(json["is_paused"], false);
    }

    #[test]
    fn upload_record_has_no_source() {
        let json = serde_json::to_string(&UploadRecord::from(&upload())).unwrap();
        assert!(!json.contains("source"));
        assert!(json.contains(r#""succeeded_chunks":[0,1]"#));
    }

    #[test]
    fn restore_round_trip() {
        let persistence = Persistence::in_memory();
        persistence.save_downloads(&[download(true), download(false)]).unwrap();
        persistence.save_uploads(&[upload()]).unwrap();

        let downloads = persistence.load_downloads();
        assert_eq!(downloads.len(), 2);
        assert!(downloads[0].succeeded_chunks.iter().all(|c| *c == ChunkSlot::Placeholder));
        assert_eq!(downloads[0].succeeded_chunks.len(), 3);
        assert!(downloads[1].succeeded_chunks.is_empty());

        let uploads = persistence.load_uploads();
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].source.is_none());
        assert_eq!(uploads[0].succeeded_chunks, BTreeSet::from([0, 1]));
    }

    #[test]
    fn interrupted_transfers_restore_paused() {
        let persistence = Persistence::in_memory();
        let mut failed = download(false);
        failed.uuid = "d2".into();
        failed.status.failed = true;
        persistence
            .save_downloads(&[download(true), download(false), failed])
            .unwrap();

        let restored = persistence.load_downloads();
        assert!(!restored[0].status.is_paused, "merged stays as is");
        assert!(restored[1].status.is_paused, "interrupted becomes paused");
        assert!(!restored[2].status.is_paused, "failed stays failed");
    }

    #[test]
    fn missing_or_corrupt_history_is_empty() {
        let persistence = Persistence::in_memory();
        assert!(persistence.load_downloads().is_empty());

        persistence.save(UPLOAD_NAMESPACE, "{not json").unwrap();
        assert!(persistence.load_uploads().is_empty());
    }

    #[test]
    fn inconsistent_records_dropped() {
        let persistence = Persistence::in_memory();
        let mut good = UploadRecord::from(&upload());
        let mut bad_index = good.clone();
        bad_index.file_id = "bad-index".into();
        bad_index.succeeded_chunks.insert(9);
        let mut bad_plan = good.clone();
        bad_plan.file_id = "bad-plan".into();
        bad_plan.plan.chunk_size = 0;
        good.file_id = "good".into();

        let json = serde_json::to_string(&vec![bad_index, good, bad_plan]).unwrap();
        persistence.save(UPLOAD_NAMESPACE, &json).unwrap();

        let restored = persistence.load_uploads();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].file_id, "good");
    }

    #[test]
    fn upload_indices_after_a_gap_are_dropped() {
        let persistence = Persistence::in_memory();
        let mut record = UploadRecord::from(&upload());
        record.succeeded_chunks = BTreeSet::from([0, 2]);
        let json = serde_json::to_string(&vec![record]).unwrap();
        persistence.save(UPLOAD_NAMESPACE, &json).unwrap();

        let restored = persistence.load_uploads();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].succeeded_chunks, BTreeSet::from([0]));
        assert_eq!(restored[0].resume_point(), 1);
    }

    #[test]
    fn contiguous_prefix_cases() {
        assert_eq!(contiguous_prefix(BTreeSet::new()), BTreeSet::new());
        assert_eq!(contiguous_prefix(BTreeSet::from([0, 1, 2])), BTreeSet::from([0, 1, 2]));
        assert_eq!(contiguous_prefix(BTreeSet::from([1, 2])), BTreeSet::new());
        assert_eq!(contiguous_prefix(BTreeSet::from([0, 1, 3])), BTreeSet::from([0, 1]));
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::new(&dir.path().join("state"));

        assert!(store.get(DOWNLOAD_NAMESPACE).unwrap().is_none());
        store.put(DOWNLOAD_NAMESPACE, "[]").unwrap();
        assert_eq!(store.get(DOWNLOAD_NAMESPACE).unwrap().as_deref(), Some("[]"));

        store.delete(DOWNLOAD_NAMESPACE).unwrap();
        assert!(store.get(DOWNLOAD_NAMESPACE).unwrap().is_none());
        store.delete(DOWNLOAD_NAMESPACE).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn file_store_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::new(dir.path());
        store.put(UPLOAD_NAMESPACE, "[]").unwrap();

        let mode = std::fs::metadata(dir.path().join(format!("{UPLOAD_NAMESPACE}.json")))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::new(dir.path());
        assert!(matches!(
            store.put("../escape", "x"),
            Err(PersistenceError::InvalidNamespace(_))
        ));
    }
}
