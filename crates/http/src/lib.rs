//! HTTP client for a fileshare server's chunk routes.
//!
//! [`ShareClient`] implements [`fileshare_transfer::ChunkTransport`], so it
//! can be handed straight to a `TransferDriver`.

pub mod client;
pub mod error;

pub use client::ShareClient;
pub use error::ClientError;
pub use fileshare_protocol::constants::DEFAULT_REQUEST_TIMEOUT;
pub use fileshare_protocol::ShareEntry;
