//! End-to-end runs of the driver against a scripted transport.

use std::collections::{BTreeSet, HashSet};
use std::ops::Range;
use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use fileshare_transfer::{
    ChunkTransport, ChunkUpload, Credentials, DirectoryFinalizer, DownloadItem, FileKvStore,
    FileSource, ItemUpdate, MergeRequest, MemorySource, Persistence, ProgressUpdate,
    RangeRequest, RemoveRequest, RunOutcome,
    TransferDriver, TransferItem, TransferKey, TransferState, TransferStore, TransportError,
    TransportFuture, UploadItem,
};

/// Serves ranges of `data` and records every call.
#[derive(Default)]
struct ScriptedTransport {
    data: Vec<u8>,
    fetches: Mutex<Vec<Range<u64>>>,
    /// Range starts answered with one byte missing, once each.
    truncate_once: Mutex<HashSet<u64>>,
    sent: Mutex<Vec<(u32, Bytes)>>,
    merges: Mutex<Vec<u32>>,
    /// Pauses `key` in `store` right after chunk `index` is sent.
    pause_after_send: Mutex<Option<Hook>>,
    /// Pauses `key` in `store` right after the range starting at `index` is
    /// fetched.
    pause_after_fetch: Mutex<Option<(Arc<TransferStore>, TransferKey, u64)>>,
    /// Forgets the recorded progress of `key` right after chunk `index` is sent.
    reset_after_send: Mutex<Option<Hook>>,
}

type Hook = (Arc<TransferStore>, TransferKey, u32);

impl ScriptedTransport {
    fn serving(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    fn fetched(&self) -> Vec<Range<u64>> {
        self.fetches.lock().unwrap().clone()
    }

    fn sent_indices(&self) -> Vec<u32> {
        self.sent.lock().unwrap().iter().map(|(i, _)| *i).collect()
    }
}

impl ChunkTransport for ScriptedTransport {
    fn fetch_range<'a>(&'a self, request: RangeRequest<'a>) -> TransportFuture<'a, Bytes> {
        Box::pin(async move {
            let range = request.range;
            self.fetches.lock().unwrap().push(range.clone());
            let mut end = range.end as usize;
            if self.truncate_once.lock().unwrap().remove(&range.start) {
                end -= 1;
            }
            if let Some((store, key, start)) = self.pause_after_fetch.lock().unwrap().as_ref()
                && *start == range.start
            {
                store.pause(key).unwrap();
            }
            Ok(Bytes::copy_from_slice(&self.data[range.start as usize..end]))
        })
    }

    fn send_chunk<'a>(&'a self, request: ChunkUpload<'a>) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.sent
                .lock()
                .unwrap()
                .push((request.index, request.data.clone()));
            if let Some((store, key, index)) = self.pause_after_send.lock().unwrap().as_ref()
                && *index == request.index
            {
                store.pause(key).unwrap();
            }
            if let Some((store, key, index)) = self.reset_after_send.lock().unwrap().as_ref()
                && *index == request.index
            {
                store
                    .apply(key, ItemUpdate::new().progress(ProgressUpdate::Reset))
                    .unwrap();
            }
            Ok(())
        })
    }

    fn remote_merge<'a>(&'a self, request: MergeRequest<'a>) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.merges.lock().unwrap().push(request.chunk_count);
            Ok(())
        })
    }

    fn remote_remove<'a>(&'a self, _request: RemoveRequest<'a>) -> TransportFuture<'a, ()> {
        Box::pin(async move { Err(TransportError::Network("not scripted".into())) })
    }
}

fn creds() -> Credentials {
    Credentials {
        secret_key: "s3cret".into(),
        ciphertext: "c1pher".into(),
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn file_store(dir: &Path) -> Arc<TransferStore> {
    let kv = Arc::new(FileKvStore::new(&dir.join("state")));
    Arc::new(TransferStore::restore(Persistence::new(kv)))
}

fn driver(
    store: Arc<TransferStore>,
    transport: Arc<ScriptedTransport>,
    downloads: &Path,
) -> TransferDriver {
    TransferDriver::new(
        store,
        transport,
        Arc::new(DirectoryFinalizer::new(downloads)),
        2,
    )
}

#[tokio::test]
async fn download_three_chunks_to_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(2_500_000);
    let transport = Arc::new(ScriptedTransport::serving(data.clone()));
    let store = file_store(dir.path());
    let driver = driver(store.clone(), transport.clone(), dir.path());

    let item = DownloadItem::new("share-a", "big.bin", 2_500_000, 1_000_000, creds()).unwrap();
    assert_eq!(item.plan.chunk_count, 3);

    let outcome = driver.start(TransferItem::Download(item)).await;
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(
        transport.fetched(),
        vec![0..1_000_000, 1_000_000..2_000_000, 2_000_000..2_500_000]
    );

    let artifact = std::fs::read(dir.path().join("big.bin")).unwrap();
    assert_eq!(artifact.len(), 2_500_000);
    assert_eq!(artifact, data);

    let item = store.read(&TransferKey::Download("share-a".into())).unwrap();
    assert_eq!(item.state(), TransferState::Completed);
    assert_eq!(item.completed_chunks(), 3);

    let persisted =
        std::fs::read_to_string(dir.path().join("state/fileshare_download_history.json"))
            .unwrap();
    assert!(persisted.contains(r#""succeeded_chunks":[0,0,0]"#));
    assert!(persisted.contains(r#""merged":true"#));
}

#[tokio::test]
async fn download_size_mismatch_then_resume() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(2_500_000);
    let transport = Arc::new(ScriptedTransport::serving(data.clone()));
    transport.truncate_once.lock().unwrap().insert(2_000_000);
    let store = file_store(dir.path());
    let driver = driver(store.clone(), transport.clone(), dir.path());
    let key = TransferKey::Download("share-b".into());

    let item = DownloadItem::new("share-b", "b.bin", 2_500_000, 1_000_000, creds()).unwrap();
    let outcome = driver.start(TransferItem::Download(item)).await;
    assert!(matches!(outcome, RunOutcome::Failed(ref msg) if msg.contains("size mismatch")));

    let failed = store.read(&key).unwrap();
    assert_eq!(failed.state(), TransferState::Failed);
    assert_eq!(failed.completed_chunks(), 2);
    assert!(!failed.status().error_message.is_empty());

    transport.fetches.lock().unwrap().clear();
    assert_eq!(driver.resume(&key).await, RunOutcome::Completed);
    assert_eq!(transport.fetched(), vec![2_000_000..2_500_000]);

    let resumed = store.read(&key).unwrap();
    assert!(!resumed.status().failed);
    assert!(resumed.status().error_message.is_empty());
    assert_eq!(std::fs::read(dir.path().join("b.bin")).unwrap(), data);
}

#[tokio::test]
async fn upload_paused_after_second_chunk_then_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("upload.bin");
    let data = pattern(16);
    std::fs::write(&path, &data).unwrap();

    let transport = Arc::new(ScriptedTransport::default());
    let store = file_store(dir.path());
    let driver = driver(store.clone(), transport.clone(), dir.path());
    let key = TransferKey::Upload("file-c".into());
    *transport.pause_after_send.lock().unwrap() = Some((store.clone(), key.clone(), 1));

    let source = Arc::new(FileSource::open(&path).unwrap());
    let item = UploadItem::new("file-c", "share-c", "upload.bin", "/inbox", 4, creds(), source)
        .unwrap();
    assert_eq!(item.plan.chunk_count, 4);

    assert_eq!(driver.start(TransferItem::Upload(item)).await, RunOutcome::Paused);
    let Some(TransferItem::Upload(paused)) = store.read(&key) else {
        panic!("upload missing");
    };
    assert_eq!(paused.status.state(), TransferState::Paused);
    assert_eq!(paused.succeeded_chunks, BTreeSet::from([0, 1]));
    assert!(transport.merges.lock().unwrap().is_empty());

    *transport.pause_after_send.lock().unwrap() = None;
    assert_eq!(driver.resume(&key).await, RunOutcome::Completed);
    assert_eq!(transport.sent_indices(), vec![0, 1, 2, 3]);
    assert_eq!(*transport.merges.lock().unwrap(), vec![4]);

    let sent: Vec<u8> = transport
        .sent
        .lock()
        .unwrap()
        .iter()
        .flat_map(|(_, chunk)| chunk.to_vec())
        .collect();
    assert_eq!(sent, data);

    let Some(TransferItem::Upload(done)) = store.read(&key) else {
        panic!("upload missing");
    };
    assert!(done.status.merged);
    assert!(done.source.is_none());
}

#[tokio::test]
async fn upload_resumes_after_restart_with_reattached_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("movie.mkv");
    std::fs::write(&path, pattern(10)).unwrap();
    let key = TransferKey::Upload("file-r".into());

    {
        let transport = Arc::new(ScriptedTransport::default());
        let store = file_store(dir.path());
        let driver = driver(store.clone(), transport.clone(), dir.path());
        *transport.pause_after_send.lock().unwrap() = Some((store.clone(), key.clone(), 0));

        let source = Arc::new(FileSource::open(&path).unwrap());
        let item =
            UploadItem::new("file-r", "share-r", "movie.mkv", "/", 4, creds(), source).unwrap();
        assert_eq!(driver.start(TransferItem::Upload(item)).await, RunOutcome::Paused);
    }

    let transport = Arc::new(ScriptedTransport::default());
    let store = file_store(dir.path());
    let driver = driver(store.clone(), transport.clone(), dir.path());

    let restored = store.read(&key).unwrap();
    assert_eq!(restored.state(), TransferState::Paused);
    assert_eq!(restored.completed_chunks(), 1);

    let outcome = driver.resume(&key).await;
    assert!(matches!(outcome, RunOutcome::Failed(ref msg) if msg.starts_with("source data lost")));
    assert!(transport.sent_indices().is_empty());

    let source = Arc::new(FileSource::open(&path).unwrap());
    driver.attach_source(&key, source).unwrap();
    assert_eq!(driver.resume(&key).await, RunOutcome::Completed);
    assert_eq!(transport.sent_indices(), vec![1, 2]);
    assert_eq!(*transport.merges.lock().unwrap(), vec![3]);
}

#[tokio::test]
async fn interrupted_download_restarts_from_first_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(12);
    let key = TransferKey::Download("share-d".into());

    {
        let store = file_store(dir.path());
        let mut item = DownloadItem::new("share-d", "d.bin", 12, 4, creds()).unwrap();
        item.succeeded_chunks
            .push(fileshare_transfer::ChunkSlot::Data(Bytes::copy_from_slice(&data[..4])));
        store.create(TransferItem::Download(item));
    }

    let transport = Arc::new(ScriptedTransport::serving(data.clone()));
    let store = file_store(dir.path());
    let driver = driver(store.clone(), transport.clone(), dir.path());

    assert_eq!(store.read(&key).unwrap().state(), TransferState::Paused);
    assert_eq!(store.read(&key).unwrap().completed_chunks(), 0);

    assert_eq!(driver.resume(&key).await, RunOutcome::Completed);
    assert_eq!(transport.fetched(), vec![0..4, 4..8, 8..12]);
    assert_eq!(std::fs::read(dir.path().join("d.bin")).unwrap(), data);
}

#[tokio::test]
async fn concurrent_items_run_independently() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(64);
    let transport = Arc::new(ScriptedTransport::serving(data.clone()));
    let store = file_store(dir.path());
    let driver = driver(store.clone(), transport.clone(), dir.path());

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let item =
                DownloadItem::new(format!("share-{n}"), format!("f{n}.bin"), 64, 16, creds())
                    .unwrap();
            driver.spawn_start(TransferItem::Download(item))
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), RunOutcome::Completed);
    }
    for n in 0..4 {
        assert_eq!(std::fs::read(dir.path().join(format!("f{n}.bin"))).unwrap(), data);
    }
    assert_eq!(transport.fetched().len(), 16);
}

#[tokio::test]
async fn download_paused_mid_loop_then_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(12);
    let transport = Arc::new(ScriptedTransport::serving(data.clone()));
    let store = file_store(dir.path());
    let driver = driver(store.clone(), transport.clone(), dir.path());
    let key = TransferKey::Download("share-p".into());
    *transport.pause_after_fetch.lock().unwrap() = Some((store.clone(), key.clone(), 4));

    let item = DownloadItem::new("share-p", "p.bin", 12, 4, creds()).unwrap();
    assert_eq!(driver.start(TransferItem::Download(item)).await, RunOutcome::Paused);

    let paused = store.read(&key).unwrap();
    assert_eq!(paused.state(), TransferState::Paused);
    assert_eq!(paused.completed_chunks(), 2);
    assert_eq!(transport.fetched(), vec![0..4, 4..8]);
    assert!(!dir.path().join("p.bin").exists());

    *transport.pause_after_fetch.lock().unwrap() = None;
    transport.fetches.lock().unwrap().clear();
    assert_eq!(driver.resume(&key).await, RunOutcome::Completed);
    assert_eq!(transport.fetched(), vec![8..12]);
    assert_eq!(std::fs::read(dir.path().join("p.bin")).unwrap(), data);
}

#[tokio::test]
async fn upload_with_index_gap_sends_only_missing_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::default());
    let store = file_store(dir.path());
    let driver = driver(store.clone(), transport.clone(), dir.path());
    let key = TransferKey::Upload("file-g".into());

    let source = Arc::new(MemorySource::new(pattern(12)));
    let item =
        UploadItem::new("file-g", "share-g", "g.bin", "/", 4, creds(), source).unwrap();
    store.create(TransferItem::Upload(item));
    for index in [0, 2] {
        store
            .apply(&key, ItemUpdate::new().progress(ProgressUpdate::CompleteIndex(index)))
            .unwrap();
    }

    assert_eq!(driver.resume(&key).await, RunOutcome::Completed);
    assert_eq!(transport.sent_indices(), vec![1]);
    assert_eq!(*transport.merges.lock().unwrap(), vec![3]);
}

#[tokio::test]
async fn restored_upload_with_index_gap_resends_from_the_gap() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gap.bin");
    std::fs::write(&path, pattern(12)).unwrap();
    let key = TransferKey::Upload("file-h".into());

    {
        let store = file_store(dir.path());
        let source = Arc::new(FileSource::open(&path).unwrap());
        let item =
            UploadItem::new("file-h", "share-h", "gap.bin", "/", 4, creds(), source).unwrap();
        store.create(TransferItem::Upload(item));
        for index in [0, 2] {
            store
                .apply(&key, ItemUpdate::new().progress(ProgressUpdate::CompleteIndex(index)))
                .unwrap();
        }
    }

    let transport = Arc::new(ScriptedTransport::default());
    let store = file_store(dir.path());
    let driver = driver(store.clone(), transport.clone(), dir.path());
    let Some(TransferItem::Upload(restored)) = store.read(&key) else {
        panic!("upload not restored");
    };
    assert_eq!(restored.succeeded_chunks, BTreeSet::from([0]));

    driver
        .attach_source(&key, Arc::new(FileSource::open(&path).unwrap()))
        .unwrap();
    assert_eq!(driver.resume(&key).await, RunOutcome::Completed);
    assert_eq!(transport.sent_indices(), vec![1, 2]);
    assert_eq!(*transport.merges.lock().unwrap(), vec![3]);
}

#[tokio::test]
async fn merge_refused_while_indices_are_missing() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::default());
    let store = file_store(dir.path());
    let driver = driver(store.clone(), transport.clone(), dir.path());
    let key = TransferKey::Upload("file-m".into());
    *transport.reset_after_send.lock().unwrap() = Some((store.clone(), key.clone(), 1));

    let source = Arc::new(MemorySource::new(pattern(8)));
    let item =
        UploadItem::new("file-m", "share-m", "m.bin", "/", 4, creds(), source).unwrap();
    let outcome = driver.start(TransferItem::Upload(item)).await;

    assert!(matches!(outcome, RunOutcome::Failed(ref msg) if msg.contains("upload incomplete")));
    assert!(transport.merges.lock().unwrap().is_empty());
    let failed = store.read(&key).unwrap();
    assert_eq!(failed.state(), TransferState::Failed);
    assert!(!failed.status().merged);
}
