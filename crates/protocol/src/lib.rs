//! Wire constants and envelopes for the share server's chunk routes.

pub mod constants;
pub mod envelope;
pub mod listing;

pub use constants::{ERRNO_OK, HIT_LOG_PARAM, range_header, route};
pub use envelope::{ApiStatus, CredentialBody};
pub use listing::{FileSizeReply, ShareEntry};
