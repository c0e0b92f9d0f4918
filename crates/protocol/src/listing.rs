//! Share metadata: the listing tree and the file size reply.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One node of a share listing. Directories carry their children keyed by
/// child uuid; a child is addressed on the wire as `{parent}%{child}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareEntry {
    pub uuid: String,
    #[serde(default)]
    pub download_url: String,
    pub file_name: String,
    /// Share transport, e.g. `"http"` or `"ftp"`.
    #[serde(rename = "stareType", default)]
    pub share_type: String,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BTreeMap<String, ShareEntry>>,
}

impl ShareEntry {
    /// Children in listing order, with their uuids.
    pub fn child_entries(&self) -> impl Iterator<Item = (&str, &ShareEntry)> {
        self.children
            .iter()
            .flat_map(|map| map.iter().map(|(uuid, entry)| (uuid.as_str(), entry)))
    }
}

/// Body of a file size reply: a bare byte count or an object holding one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileSizeReply {
    Bare(u64),
    Object { file_size: u64 },
}

impl FileSizeReply {
    pub fn bytes(self) -> u64 {
        match self {
            FileSizeReply::Bare(size) | FileSizeReply::Object { file_size: size } => size,
        }
    }
}
