//! In-memory table of transfer items.
//!
//! All mutation goes through one mutex, and every mutation writes a
//! sanitized snapshot of the affected history while still holding it, so the
//! persisted order matches the mutation order.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::TransferError;
use crate::persistence::{Persistence, namespace};
use crate::types::{
    DownloadItem, ItemUpdate, TransferItem, TransferKey, TransferKind, UploadItem,
};

#[derive(Default)]
struct ItemTable {
    downloads: Vec<DownloadItem>,
    uploads: Vec<UploadItem>,
}

impl ItemTable {
    fn position(&self, key: &TransferKey) -> Option<usize> {
        match key {
            TransferKey::Download(uuid) => self.downloads.iter().position(|d| &d.uuid == uuid),
            TransferKey::Upload(file_id) => {
                self.uploads.iter().position(|u| &u.file_id == file_id)
            }
        }
    }

    fn get(&self, key: &TransferKey) -> Option<TransferItem> {
        let idx = self.position(key)?;
        Some(match key {
            TransferKey::Download(_) => TransferItem::Download(self.downloads[idx].clone()),
            TransferKey::Upload(_) => TransferItem::Upload(self.uploads[idx].clone()),
        })
    }

    fn list_kind(&self, kind: TransferKind) -> Vec<TransferItem> {
        match kind {
            TransferKind::Download => self
                .downloads
                .iter()
                .cloned()
                .map(TransferItem::Download)
                .collect(),
            TransferKind::Upload => self
                .uploads
                .iter()
                .cloned()
                .map(TransferItem::Upload)
                .collect(),
        }
    }
}

/// Owned table of downloads and uploads, shared as `Arc<TransferStore>`.
pub struct TransferStore {
    table: Mutex<ItemTable>,
    persistence: Persistence,
}

impl TransferStore {
    /// Creates an empty store. Nothing is read from `persistence`.
    pub fn new(persistence: Persistence) -> Self {
        Self {
            table: Mutex::new(ItemTable::default()),
            persistence,
        }
    }

    /// Creates a store holding the persisted histories.
    pub fn restore(persistence: Persistence) -> Self {
        let table = ItemTable {
            downloads: persistence.load_downloads(),
            uploads: persistence.load_uploads(),
        };
        debug!(
            downloads = table.downloads.len(),
            uploads = table.uploads.len(),
            "transfer history restored"
        );
        Self {
            table: Mutex::new(table),
            persistence,
        }
    }

    /// Inserts `item`, replacing an existing item with the same key in place.
    pub fn create(&self, item: TransferItem) {
        let mut table = self.lock();
        let key = item.key();
        let idx = table.position(&key);
        match item {
            TransferItem::Download(d) => match idx {
                Some(i) => table.downloads[i] = d,
                None => table.downloads.push(d),
            },
            TransferItem::Upload(u) => match idx {
                Some(i) => table.uploads[i] = u,
                None => table.uploads.push(u),
            },
        }
        self.persist(&table, key.kind());
    }

    pub fn read(&self, key: &TransferKey) -> Option<TransferItem> {
        self.lock().get(key)
    }

    /// Returns the paused flag without cloning the item, or `None` if the
    /// item is gone.
    pub fn is_paused(&self, key: &TransferKey) -> Option<bool> {
        let table = self.lock();
        let idx = table.position(key)?;
        Some(match key {
            TransferKey::Download(_) => table.downloads[idx].status.is_paused,
            TransferKey::Upload(_) => table.uploads[idx].status.is_paused,
        })
    }

    /// Applies `update` to the item and returns the updated item.
    ///
    /// A missing key yields [`TransferError::NotFound`] and changes nothing.
    pub fn apply(
        &self,
        key: &TransferKey,
        update: ItemUpdate,
    ) -> Result<TransferItem, TransferError> {
        let mut table = self.lock();
        let idx = table
            .position(key)
            .ok_or_else(|| TransferError::NotFound(key.clone()))?;
        let updated = match key {
            TransferKey::Download(_) => {
                let item = &mut table.downloads[idx];
                item.apply(update)?;
                TransferItem::Download(item.clone())
            }
            TransferKey::Upload(_) => {
                let item = &mut table.uploads[idx];
                item.apply(update)?;
                TransferItem::Upload(item.clone())
            }
        };
        self.persist(&table, key.kind());
        Ok(updated)
    }

    pub fn remove(&self, key: &TransferKey) -> Option<TransferItem> {
        let mut table = self.lock();
        let idx = table.position(key)?;
        let removed = match key {
            TransferKey::Download(_) => TransferItem::Download(table.downloads.remove(idx)),
            TransferKey::Upload(_) => TransferItem::Upload(table.uploads.remove(idx)),
        };
        self.persist(&table, key.kind());
        Some(removed)
    }

    /// Sets `is_paused`. A running loop stops at its next chunk boundary.
    pub fn pause(&self, key: &TransferKey) -> Result<TransferItem, TransferError> {
        self.apply(key, ItemUpdate::new().paused(true))
    }

    /// Pauses every item that is not merged yet. Returns how many changed.
    pub fn pause_all(&self) -> usize {
        let mut table = self.lock();
        let mut downloads = 0;
        for item in table
            .downloads
            .iter_mut()
            .filter(|d| !d.status.merged && !d.status.is_paused)
        {
            item.status.is_paused = true;
            downloads += 1;
        }
        let mut uploads = 0;
        for item in table
            .uploads
            .iter_mut()
            .filter(|u| !u.status.merged && !u.status.is_paused)
        {
            item.status.is_paused = true;
            uploads += 1;
        }

        if downloads > 0 {
            self.persist(&table, TransferKind::Download);
        }
        if uploads > 0 {
            self.persist(&table, TransferKind::Upload);
        }
        downloads + uploads
    }

    /// Downloads then uploads, each in insertion order.
    pub fn list(&self) -> Vec<TransferItem> {
        let table = self.lock();
        let mut items = table.list_kind(TransferKind::Download);
        items.extend(table.list_kind(TransferKind::Upload));
        items
    }

    pub fn list_kind(&self, kind: TransferKind) -> Vec<TransferItem> {
        self.lock().list_kind(kind)
    }

    /// Deletes one history and its persisted namespace. Returns how many
    /// items were dropped.
    pub fn clear(&self, kind: TransferKind) -> usize {
        let mut table = self.lock();
        let cleared = match kind {
            TransferKind::Download => std::mem::take(&mut table.downloads).len(),
            TransferKind::Upload => std::mem::take(&mut table.uploads).len(),
        };
        if let Err(e) = self.persistence.clear(namespace(kind)) {
            warn!(kind = %kind, error = %e, "failed to clear transfer history");
        }
        cleared
    }

    fn lock(&self) -> MutexGuard<'_, ItemTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, table: &ItemTable, kind: TransferKind) {
        let result = match kind {
            TransferKind::Download => self.persistence.save_downloads(&table.downloads),
            TransferKind::Upload => self.persistence.save_uploads(&table.uploads),
        };
        if let Err(e) = result {
            warn!(kind = %kind, error = %e, "failed to persist transfer history");
        }
    }
}
