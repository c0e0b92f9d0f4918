//! Download loop: fetch ranges in order, then write the artifact.

use std::sync::Arc;

use tracing::{debug, info};

use crate::driver::DriverInner;
use crate::error::{TransferError, TransportError};
use crate::transport::RangeRequest;
use crate::types::{
    ChunkSlot, ItemUpdate, ProgressUpdate, RunMode, RunOutcome, TransferItem, TransferKey,
};

pub(crate) async fn run(inner: &DriverInner, key: &TransferKey, mode: RunMode) -> RunOutcome {
    let Some(TransferItem::Download(item)) = inner.store.read(key) else {
        return RunOutcome::Missing;
    };
    let mut hit_log = mode == RunMode::Fresh;

    for index in item.resume_point()..item.plan.chunk_count {
        if let Some(stop) = inner.checkpoint(key) {
            return stop;
        }

        let range = match item.plan.range(index) {
            Ok(range) => range,
            Err(e) => return inner.fail(key, e.to_string()),
        };
        let expected = range.end - range.start;
        let request = RangeRequest {
            uuid: &item.uuid,
            credentials: &item.credentials,
            range,
            hit_log,
        };
        hit_log = false;

        let data = match inner.transport.fetch_range(request).await {
            Ok(data) if data.len() as u64 == expected => data,
            Ok(data) => {
                let e = TransportError::SizeMismatch {
                    expected,
                    actual: data.len() as u64,
                };
                return inner.fail(key, e.to_string());
            }
            Err(e) => return inner.fail(key, e.to_string()),
        };
        debug!(key = %key, index, bytes = expected, "chunk downloaded");

        match inner.store.apply(
            key,
            ItemUpdate::new().progress(ProgressUpdate::AppendChunk(data)),
        ) {
            Ok(updated) => inner.progress(key, &updated),
            Err(e) => return inner.update_failed(key, e),
        }
    }

    finalize(inner, key).await
}

/// Concatenates the chunks on a blocking thread. On failure the chunks stay
/// in memory so a resume only retries this step.
async fn finalize(inner: &DriverInner, key: &TransferKey) -> RunOutcome {
    let Some(TransferItem::Download(item)) = inner.store.read(key) else {
        return RunOutcome::Missing;
    };

    let mut chunks = Vec::with_capacity(item.succeeded_chunks.len());
    for slot in item.succeeded_chunks {
        match slot {
            ChunkSlot::Data(data) => chunks.push(data),
            ChunkSlot::Placeholder => {
                let e = TransferError::Finalize("chunk data no longer available".into());
                return inner.fail(key, e.to_string());
            }
        }
    }

    let finalizer = Arc::clone(&inner.finalizer);
    let file_name = item.file_name;
    let artifact =
        match tokio::task::spawn_blocking(move || finalizer.concatenate(&chunks, &file_name))
            .await
        {
            Ok(Ok(artifact)) => artifact,
            Ok(Err(e)) => {
                return inner.fail(key, TransferError::Finalize(e.to_string()).to_string());
            }
            Err(e) => {
                let e = TransferError::Finalize(format!("task join error: {e}"));
                return inner.fail(key, e.to_string());
            }
        };
    info!(
        key = %key,
        path = %artifact.path.display(),
        size = artifact.size,
        "download saved"
    );

    match inner.store.apply(
        key,
        ItemUpdate::new()
            .merged(true)
            .progress(ProgressUpdate::Compact),
    ) {
        Ok(_) => inner.completed(key),
        Err(e) => inner.update_failed(key, e),
    }
}
