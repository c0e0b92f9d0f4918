use serde::{Deserialize, Serialize};

use crate::constants::ERRNO_OK;

/// Credentials carried by every share request.
///
/// `ciphertext` is produced outside this crate from the share password; it is
/// forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBody {
    pub secret_key: String,
    pub ciphertext: String,
}

/// JSON status envelope returned by the share server.
///
/// Download routes only send it on failure (success is a binary body);
/// upload-family routes always send it and signal success with `errno == 200`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errno: Option<i64>,
    #[serde(default)]
    pub errmsg: String,
}

impl ApiStatus {
    /// Returns `true` if the envelope reports success.
    pub fn is_ok(&self) -> bool {
        self.errno == Some(ERRNO_OK)
    }

    /// Error code, or 0 when the server omitted it.
    pub fn code(&self) -> i64 {
        self.errno.unwrap_or_default()
    }
}
