//! Transfer driver: owns the per-item loops.
//!
//! One loop runs per item key at a time, on its own tokio task when started
//! through the `spawn_*` methods. A semaphore caps how many loops transfer
//! concurrently; a loop waiting for a permit still honors pause.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::finalizer::Finalizer;
use crate::source::SharedSource;
use crate::store::TransferStore;
use crate::transport::{ChunkTransport, RemoveRequest};
use crate::types::{
    ItemUpdate, ProgressUpdate, RunMode, RunOutcome, SourceUpdate, TransferEvent, TransferItem,
    TransferKey, TransferKind,
};
use crate::{download, upload};

/// Default cap on concurrently running transfers.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

const EVENT_CAPACITY: usize = 256;

pub(crate) struct DriverInner {
    pub(crate) store: Arc<TransferStore>,
    pub(crate) transport: Arc<dyn ChunkTransport>,
    pub(crate) finalizer: Arc<dyn Finalizer>,
    active: Mutex<HashSet<TransferKey>>,
    /// Woken whenever a loop releases its key.
    idle: Notify,
    permits: Semaphore,
    events_tx: mpsc::Sender<TransferEvent>,
}

/// Drives downloads and uploads through their state machines.
pub struct TransferDriver {
    inner: Arc<DriverInner>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
}

impl TransferDriver {
    pub fn new(
        store: Arc<TransferStore>,
        transport: Arc<dyn ChunkTransport>,
        finalizer: Arc<dyn Finalizer>,
        max_concurrent: usize,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(DriverInner {
                store,
                transport,
                finalizer,
                active: Mutex::new(HashSet::new()),
                idle: Notify::new(),
                permits: Semaphore::new(max_concurrent.max(1)),
                events_tx,
            }),
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.take()
    }

    pub fn store(&self) -> &Arc<TransferStore> {
        &self.inner.store
    }

    /// Returns `true` while a loop owns `key`.
    pub fn is_running(&self, key: &TransferKey) -> bool {
        self.inner.active_set().contains(key)
    }

    /// Records `item` (replacing an idle item with the same key) and runs it
    /// from the first chunk.
    pub async fn start(&self, item: TransferItem) -> RunOutcome {
        self.inner.start(item).await
    }

    /// Continues `key` from its resume point.
    pub async fn resume(&self, key: &TransferKey) -> RunOutcome {
        self.inner.run(key.clone(), RunMode::Resume).await
    }

    /// [`start`](Self::start) on a new task.
    pub fn spawn_start(&self, item: TransferItem) -> JoinHandle<RunOutcome> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.start(item).await })
    }

    /// [`resume`](Self::resume) on a new task.
    pub fn spawn_resume(&self, key: TransferKey) -> JoinHandle<RunOutcome> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run(key, RunMode::Resume).await })
    }

    /// Requests a pause; a running loop stops before its next chunk.
    pub fn pause(&self, key: &TransferKey) -> Result<TransferItem, TransferError> {
        self.inner.store.pause(key)
    }

    pub fn pause_all(&self) -> usize {
        self.inner.store.pause_all()
    }

    /// Removes an item. An unmerged upload with sent chunks is first
    /// removed on the share; that call is best effort.
    ///
    /// A running loop is paused and awaited first, so no chunk can reach
    /// the share after its cleanup.
    pub async fn remove(&self, key: &TransferKey) -> Result<TransferItem, TransferError> {
        self.inner.store.pause(key)?;
        self.inner.wait_idle(key).await;
        let item = self
            .inner
            .store
            .read(key)
            .ok_or_else(|| TransferError::NotFound(key.clone()))?;

        if let TransferItem::Upload(upload) = &item
            && upload.needs_remote_cleanup()
        {
            let request = RemoveRequest {
                uuid: &upload.uuid,
                credentials: &upload.credentials,
                file_name: &upload.file_name,
                target_path: &upload.target_path,
            };
            match self.inner.transport.remote_remove(request).await {
                Ok(()) => debug!(key = %key, "remote chunks removed"),
                Err(e) => warn!(key = %key, error = %e, "remote remove failed"),
            }
        }

        self.inner
            .store
            .remove(key)
            .ok_or_else(|| TransferError::NotFound(key.clone()))
    }

    /// Drops one whole history. No remote cleanup is attempted.
    pub fn clear(&self, kind: TransferKind) -> usize {
        let cleared = self.inner.store.clear(kind);
        info!(kind = %kind, cleared, "transfer history cleared");
        cleared
    }

    /// Re-attaches the local file behind an upload, e.g. after a restart.
    pub fn attach_source(
        &self,
        key: &TransferKey,
        source: SharedSource,
    ) -> Result<TransferItem, TransferError> {
        self.inner
            .store
            .apply(key, ItemUpdate::new().source(SourceUpdate::Attach(source)))
    }

    /// Pauses everything and stops admitting loops. Loops waiting for a
    /// permit return [`RunOutcome::ShuttingDown`].
    pub fn shutdown(&self) {
        let paused = self.inner.store.pause_all();
        self.inner.permits.close();
        info!(paused, "transfer driver shut down");
    }
}

/// Marks a key as owned by a running loop until dropped.
struct FlightGuard<'a> {
    inner: &'a DriverInner,
    key: TransferKey,
}

impl<'a> FlightGuard<'a> {
    fn acquire(inner: &'a DriverInner, key: &TransferKey) -> Option<Self> {
        let inserted = inner.active_set().insert(key.clone());
        inserted.then(|| Self {
            inner,
            key: key.clone(),
        })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.inner.active_set().remove(&self.key);
        self.inner.idle.notify_waiters();
    }
}

impl DriverInner {
    fn active_set(&self) -> std::sync::MutexGuard<'_, HashSet<TransferKey>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns once no loop owns `key`.
    async fn wait_idle(&self, key: &TransferKey) {
        loop {
            let notified = self.idle.notified();
            if !self.active_set().contains(key) {
                return;
            }
            notified.await;
        }
    }

    async fn start(&self, item: TransferItem) -> RunOutcome {
        let key = item.key();
        let Some(guard) = FlightGuard::acquire(self, &key) else {
            debug!(key = %key, "transfer already running");
            return RunOutcome::AlreadyRunning;
        };
        self.store.create(item);
        self.run_owned(&key, RunMode::Fresh, guard).await
    }

    async fn run(&self, key: TransferKey, mode: RunMode) -> RunOutcome {
        let Some(guard) = FlightGuard::acquire(self, &key) else {
            debug!(key = %key, "transfer already running");
            return RunOutcome::AlreadyRunning;
        };
        self.run_owned(&key, mode, guard).await
    }

    async fn run_owned(
        &self,
        key: &TransferKey,
        mode: RunMode,
        _guard: FlightGuard<'_>,
    ) -> RunOutcome {
        if self.permits.is_closed() {
            return RunOutcome::ShuttingDown;
        }

        let Some(item) = self.store.read(key) else {
            return RunOutcome::Missing;
        };
        if item.status().merged {
            debug!(key = %key, "transfer already merged");
            return RunOutcome::AlreadyMerged;
        }

        if let TransferItem::Upload(upload) = &item {
            let chunks_remain = mode == RunMode::Fresh || !upload.all_chunks_sent();
            if chunks_remain && upload.plan.chunk_count > 0 && upload.source.is_none() {
                return self.fail(key, TransferError::SourceLost.to_string());
            }
        }

        let mut prepare = ItemUpdate::new().paused(false).clear_failure();
        if mode == RunMode::Fresh {
            prepare = prepare.progress(ProgressUpdate::Reset);
        }
        if let Err(e) = self.store.apply(key, prepare) {
            return self.update_failed(key, e);
        }

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                let _ = self.store.pause(key);
                return RunOutcome::ShuttingDown;
            }
        };

        debug!(key = %key, ?mode, "transfer running");
        match key.kind() {
            TransferKind::Download => download::run(self, key, mode).await,
            TransferKind::Upload => upload::run(self, key, mode).await,
        }
    }

    /// Cooperative checkpoint taken before every chunk.
    pub(crate) fn checkpoint(&self, key: &TransferKey) -> Option<RunOutcome> {
        match self.store.is_paused(key) {
            None => Some(RunOutcome::Missing),
            Some(true) => Some(self.paused(key)),
            Some(false) => None,
        }
    }

    pub(crate) fn paused(&self, key: &TransferKey) -> RunOutcome {
        info!(key = %key, "transfer paused");
        self.emit(TransferEvent::Paused { key: key.clone() });
        RunOutcome::Paused
    }

    /// Records a failure on the item. Transfer failures are item state, not
    /// driver errors.
    pub(crate) fn fail(&self, key: &TransferKey, message: String) -> RunOutcome {
        if let Err(TransferError::NotFound(_)) =
            self.store.apply(key, ItemUpdate::new().failure(message.clone()))
        {
            return RunOutcome::Missing;
        }
        warn!(key = %key, error = %message, "transfer failed");
        self.emit(TransferEvent::Failed {
            key: key.clone(),
            error: message.clone(),
        });
        RunOutcome::Failed(message)
    }

    /// Maps a store error raised mid-run to an outcome.
    pub(crate) fn update_failed(&self, key: &TransferKey, e: TransferError) -> RunOutcome {
        match e {
            TransferError::NotFound(_) => RunOutcome::Missing,
            e => self.fail(key, e.to_string()),
        }
    }

    pub(crate) fn progress(&self, key: &TransferKey, item: &TransferItem) {
        self.emit(TransferEvent::Progress {
            key: key.clone(),
            completed: item.completed_chunks(),
            total: item.plan().chunk_count,
        });
    }

    pub(crate) fn completed(&self, key: &TransferKey) -> RunOutcome {
        info!(key = %key, "transfer completed");
        self.emit(TransferEvent::Completed { key: key.clone() });
        RunOutcome::Completed
    }

    fn emit(&self, event: TransferEvent) {
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(?event, "transfer event channel full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
