//! Wires the transfer engine to the HTTP client and drives one command.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use fileshare_http::{ShareClient, ShareEntry};
use fileshare_transfer::{
    DirectoryFinalizer, FileKvStore, Persistence, RunOutcome, TransferDriver, TransferEvent,
    TransferItem, TransferStore,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ClientConfig;

/// Engine instance for one CLI invocation.
pub struct Session {
    pub driver: TransferDriver,
    /// Same client the driver transfers through; also answers share metadata.
    pub client: Arc<ShareClient>,
    pub config: ClientConfig,
    events: mpsc::Receiver<TransferEvent>,
}

impl Session {
    /// Restores history from the state directory and builds the driver.
    pub fn open(config: ClientConfig, config_dir: &Path) -> anyhow::Result<Self> {
        let state_dir = config.state_dir(config_dir);
        let kv = Arc::new(FileKvStore::new(&state_dir));
        let store = Arc::new(TransferStore::restore(Persistence::new(kv)));

        let client = Arc::new(
            ShareClient::new(&config.server_url, config.request_timeout())
                .context("failed to create HTTP client")?,
        );
        let finalizer = DirectoryFinalizer::new(&config.download_dir());

        let mut driver = TransferDriver::new(
            store,
            client.clone(),
            Arc::new(finalizer),
            config.max_concurrent_transfers,
        );
        let events = driver
            .take_events()
            .context("transfer events already taken")?;

        info!(
            server = %config.server_url,
            state = %state_dir.display(),
            "session opened"
        );
        Ok(Self {
            driver,
            client,
            config,
            events,
        })
    }

    /// Waits for `run` while printing progress. Ctrl-C pauses everything;
    /// the run then stops at its next chunk boundary.
    pub async fn drive(&mut self, mut run: JoinHandle<RunOutcome>) -> anyhow::Result<RunOutcome> {
        let mut interrupted = false;
        let outcome = loop {
            tokio::select! {
                result = &mut run => break result.context("transfer task panicked")?,
                Some(event) = self.events.recv() => print_event(&event),
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    interrupted = true;
                    eprintln!("interrupted, pausing transfers...");
                    self.driver.shutdown();
                }
            }
        };
        while let Ok(event) = self.events.try_recv() {
            print_event(&event);
        }
        Ok(outcome)
    }
}

fn print_event(event: &TransferEvent) {
    match event {
        TransferEvent::Progress {
            key,
            completed,
            total,
        } => println!("{key}: {completed}/{total} chunks"),
        TransferEvent::Paused { key } => println!("{key}: paused"),
        TransferEvent::Failed { key, error } => println!("{key}: failed: {error}"),
        TransferEvent::Completed { key } => println!("{key}: completed"),
    }
}

/// One line per item for `list`.
pub fn describe(item: &TransferItem) -> String {
    let key = item.key();
    let mut line = format!(
        "{:<8} {:<36} {:<9} {:>5}/{:<5} {}",
        key.kind().to_string(),
        key.id(),
        item.state().to_string(),
        item.completed_chunks(),
        item.plan().chunk_count,
        item.file_name()
    );
    if let TransferItem::Upload(upload) = item {
        line.push_str(&format!(" -> {}:{}", upload.uuid, upload.target_path));
    }
    let status = item.status();
    if status.failed && !status.error_message.is_empty() {
        line.push_str(&format!(" ({})", status.error_message));
    }
    line
}

/// Indented tree for `browse`: one line per entry with the uuid to pass to
/// `download`. Children are addressed as `{parent}%{child}`.
pub fn render_tree(entry: &ShareEntry) -> Vec<String> {
    let mut lines = Vec::new();
    push_entry(&mut lines, entry, &entry.uuid, 0);
    lines
}

fn push_entry(lines: &mut Vec<String>, entry: &ShareEntry, address: &str, depth: usize) {
    let marker = if entry.is_dir { "/" } else { "" };
    lines.push(format!(
        "{:indent$}{}{marker}  [{address}]",
        "",
        entry.file_name,
        indent = depth * 2
    ));
    let root = address.split('%').next().unwrap_or(address);
    for (uuid, child) in entry.child_entries() {
        push_entry(lines, child, &format!("{root}%{uuid}"), depth + 1);
    }
}
