use std::time::Duration;

/// Route prefix for ranged chunk downloads: `POST /download/{uuid}`.
pub const DOWNLOAD_URI: &str = "/download";

/// Route prefix for chunk uploads: `POST /upload/{uuid}`.
pub const UPLOAD_URI: &str = "/upload";

/// Route prefix asking the server to assemble uploaded chunks.
pub const UPLOAD_MERGE_URI: &str = "/upload/merge";

/// Route prefix asking the server to drop a partial upload.
pub const UPLOAD_REMOVE_URI: &str = "/upload/remove";

/// Route prefix reporting a shared file's size: `GET /file_size/{uuid}`.
pub const FILE_SIZE_URI: &str = "/file_size";

/// Route prefix listing a share: `GET /file_list/{uuid}`, or `POST` with a
/// [`CredentialBody`](crate::CredentialBody) for protected shares.
pub const FILE_LIST_URI: &str = "/file_list";

/// Query parameter tagging the first request of a fresh transfer for the
/// server's access log. Has no effect on the transferred data.
pub const HIT_LOG_PARAM: &str = "hit_log";

/// `errno` value the server returns for a successful upload-family request.
pub const ERRNO_OK: i64 = 200;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Multipart form field names shared by the upload-family routes.
pub mod fields {
    pub const SECRET_KEY: &str = "secret_key";
    pub const CIPHERTEXT: &str = "ciphertext";
    pub const FILE: &str = "file";
    pub const FILE_NAME: &str = "file_name";
    pub const CHUNK_ID: &str = "chunk_id";
    pub const CHUNK_COUNT: &str = "chunk_count";
    pub const CURR_PATH: &str = "curr_path";
}

/// Builds the route for `prefix` and a share `uuid`.
pub fn route(prefix: &str, uuid: &str) -> String {
    format!("{prefix}/{uuid}")
}

/// Formats the `Range` header for a chunk download.
///
/// The server reads `end` as the exclusive bound of the chunk, so the value
/// sent is the half-open range's end, not `end - 1`.
pub fn range_header(start: u64, end: u64) -> String {
    format!("bytes={start}-{end}")
}
