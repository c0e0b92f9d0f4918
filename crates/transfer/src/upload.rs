//! Upload loop: send chunks in index order, then ask the share to merge.

use tracing::debug;

use crate::driver::DriverInner;
use crate::error::TransferError;
use crate::transport::{ChunkUpload, MergeRequest};
use crate::types::{
    ItemUpdate, ProgressUpdate, RunMode, RunOutcome, SourceUpdate, TransferItem, TransferKey,
};

pub(crate) async fn run(inner: &DriverInner, key: &TransferKey, mode: RunMode) -> RunOutcome {
    let Some(TransferItem::Upload(item)) = inner.store.read(key) else {
        return RunOutcome::Missing;
    };
    let mut hit_log = mode == RunMode::Fresh;

    let pending: Vec<u32> = item.missing_chunks().collect();
    for index in pending {
        if let Some(stop) = inner.checkpoint(key) {
            return stop;
        }
        let Some(source) = item.source.clone() else {
            return inner.fail(key, TransferError::SourceLost.to_string());
        };

        let range = match item.plan.range(index) {
            Ok(range) => range,
            Err(e) => return inner.fail(key, e.to_string()),
        };
        let expected = range.end - range.start;
        let data = match tokio::task::spawn_blocking(move || source.read_range(range)).await {
            Ok(Ok(data)) => data,
            Ok(Err(e)) => {
                return inner.fail(key, TransferError::SourceRead(e.to_string()).to_string());
            }
            Err(e) => {
                let e = TransferError::SourceRead(format!("task join error: {e}"));
                return inner.fail(key, e.to_string());
            }
        };
        if data.len() as u64 != expected {
            let e = TransferError::SourceRead(format!(
                "expected {expected} bytes, read {}",
                data.len()
            ));
            return inner.fail(key, e.to_string());
        }

        let request = ChunkUpload {
            uuid: &item.uuid,
            credentials: &item.credentials,
            data,
            file_name: &item.file_name,
            index,
            target_path: &item.target_path,
            hit_log,
        };
        hit_log = false;
        if let Err(e) = inner.transport.send_chunk(request).await {
            return inner.fail(key, e.to_string());
        }
        debug!(key = %key, index, bytes = expected, "chunk uploaded");

        match inner.store.apply(
            key,
            ItemUpdate::new().progress(ProgressUpdate::CompleteIndex(index)),
        ) {
            Ok(updated) => inner.progress(key, &updated),
            Err(e) => return inner.update_failed(key, e),
        }
    }

    merge(inner, key).await
}

/// A failed merge leaves the sent chunks on the share; resuming retries only
/// the merge. The share is only asked to merge once every index is recorded.
async fn merge(inner: &DriverInner, key: &TransferKey) -> RunOutcome {
    let Some(TransferItem::Upload(item)) = inner.store.read(key) else {
        return RunOutcome::Missing;
    };
    if !item.all_chunks_sent() {
        let e = TransferError::IncompleteUpload {
            sent: item.succeeded_chunks.len() as u32,
            chunk_count: item.plan.chunk_count,
        };
        return inner.fail(key, e.to_string());
    }

    let request = MergeRequest {
        uuid: &item.uuid,
        credentials: &item.credentials,
        file_name: &item.file_name,
        chunk_count: item.plan.chunk_count,
        target_path: &item.target_path,
    };
    if let Err(e) = inner.transport.remote_merge(request).await {
        return inner.fail(key, TransferError::RemoteMerge(e).to_string());
    }

    match inner.store.apply(
        key,
        ItemUpdate::new()
            .merged(true)
            .source(SourceUpdate::Release),
    ) {
        Ok(_) => inner.completed(key),
        Err(e) => inner.update_failed(key, e),
    }
}
