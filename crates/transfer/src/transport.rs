//! Chunk Transport trait.
//!
//! The engine never talks to the network itself. A front end supplies a
//! `ChunkTransport` (the HTTP client in `fileshare-http`, or a mock in
//! tests); each call is one request/response with no retry of its own.

use std::future::Future;
use std::ops::Range;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::TransportError;
use crate::types::Credentials;

/// Boxed future returned by transport calls.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Fetch one byte range of a shared file.
#[derive(Debug, Clone)]
pub struct RangeRequest<'a> {
    pub uuid: &'a str,
    pub credentials: &'a Credentials,
    pub range: Range<u64>,
    /// Set on the first chunk of a fresh run, for the server's access log.
    pub hit_log: bool,
}

/// Send one chunk of an upload.
#[derive(Debug, Clone)]
pub struct ChunkUpload<'a> {
    pub uuid: &'a str,
    pub credentials: &'a Credentials,
    pub data: Bytes,
    pub file_name: &'a str,
    pub index: u32,
    pub target_path: &'a str,
    pub hit_log: bool,
}

/// Ask the share to assemble `chunk_count` uploaded chunks.
#[derive(Debug, Clone)]
pub struct MergeRequest<'a> {
    pub uuid: &'a str,
    pub credentials: &'a Credentials,
    pub file_name: &'a str,
    pub chunk_count: u32,
    pub target_path: &'a str,
}

/// Ask the share to drop the chunks of an unfinished upload.
#[derive(Debug, Clone)]
pub struct RemoveRequest<'a> {
    pub uuid: &'a str,
    pub credentials: &'a Credentials,
    pub file_name: &'a str,
    pub target_path: &'a str,
}

/// Network side of the engine.
pub trait ChunkTransport: Send + Sync {
    /// Downloads `request.range`. Implementations should reject error
    /// envelopes, non-binary bodies, and bodies whose length differs from a
    /// non-empty range.
    fn fetch_range<'a>(&'a self, request: RangeRequest<'a>) -> TransportFuture<'a, Bytes>;

    fn send_chunk<'a>(&'a self, request: ChunkUpload<'a>) -> TransportFuture<'a, ()>;

    fn remote_merge<'a>(&'a self, request: MergeRequest<'a>) -> TransportFuture<'a, ()>;

    /// Best effort; callers log failures and carry on.
    fn remote_remove<'a>(&'a self, request: RemoveRequest<'a>) -> TransportFuture<'a, ()>;
}
