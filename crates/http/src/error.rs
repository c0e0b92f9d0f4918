use fileshare_transfer::TransportError;

/// Errors from the share HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid server URL: {0}")]
    InvalidUrl(String),

    /// Error envelope, or a non-success status without one.
    #[error("{message}")]
    Api { code: i64, message: String },

    #[error("unexpected response content type: {0}")]
    ContentType(String),

    #[error("chunk size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("invalid response: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ClientError> for TransportError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Api { code, message } => TransportError::Remote { code, message },
            ClientError::ContentType(content_type) => TransportError::ContentType(content_type),
            ClientError::SizeMismatch { expected, actual } => {
                TransportError::SizeMismatch { expected, actual }
            }
            other => TransportError::Network(other.to_string()),
        }
    }
}
