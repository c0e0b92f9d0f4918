//! Share server client.
//!
//! Async HTTP client using `reqwest`. Downloads post the credentials as JSON
//! and receive raw chunk bytes; the upload-family routes take multipart forms
//! and answer with a JSON status envelope. Share metadata (file size and
//! listing) comes back as plain JSON, or as the envelope on failure.

use std::ops::Range;
use std::time::Duration;

use bytes::Bytes;
use fileshare_protocol::constants::{
    DOWNLOAD_URI, FILE_LIST_URI, FILE_SIZE_URI, HIT_LOG_PARAM, UPLOAD_MERGE_URI,
    UPLOAD_REMOVE_URI, UPLOAD_URI, fields,
};
use fileshare_protocol::{
    ApiStatus, CredentialBody, FileSizeReply, ShareEntry, range_header, route,
};
use fileshare_transfer::{
    ChunkTransport, ChunkUpload, Credentials, MergeRequest, RangeRequest, RemoveRequest,
    TransportError, TransportFuture,
};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use reqwest::header::{CONTENT_TYPE, RANGE};
use reqwest::multipart::{Form, Part};
use tracing::debug;

use crate::error::ClientError;

/// Client for one share server.
pub struct ShareClient {
    http: reqwest::Client,
    base_url: String,
}

impl ShareClient {
    /// Creates a client for `base_url` with a per-request `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        reqwest::Url::parse(base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{base_url}: {e}")))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, prefix: &str, uuid: &str, hit_log: bool) -> String {
        let mut url = format!("{}{}", self.base_url, route(prefix, uuid));
        if hit_log {
            url.push_str(&format!("?{HIT_LOG_PARAM}=true"));
        }
        url
    }

    /// Size in bytes of the file shared as `uuid`.
    pub async fn file_size(&self, uuid: &str) -> Result<u64, ClientError> {
        let url = self.url(FILE_SIZE_URI, uuid, false);
        debug!(uuid, "fetching file size");
        let resp = self.http.get(&url).send().await?;
        let reply: FileSizeReply = read_json(resp).await?;
        Ok(reply.bytes())
    }

    /// Lists the share `uuid`. Protected shares need `credentials`, which
    /// switch the request to a `POST` carrying them.
    pub async fn list_share(
        &self,
        uuid: &str,
        credentials: Option<&Credentials>,
    ) -> Result<ShareEntry, ClientError> {
        let url = self.url(FILE_LIST_URI, uuid, false);
        debug!(uuid, protected = credentials.is_some(), "listing share");
        let request = match credentials {
            Some(credentials) => self.http.post(&url).json(&credential_body(credentials)),
            None => self.http.get(&url),
        };
        read_json(request.send().await?).await
    }

    /// Downloads `range` of the file shared as `uuid`.
    pub async fn download_range(
        &self,
        uuid: &str,
        credentials: &Credentials,
        range: Range<u64>,
        hit_log: bool,
    ) -> Result<Bytes, ClientError> {
        let url = self.url(DOWNLOAD_URI, uuid, hit_log);
        let body = credential_body(credentials);
        debug!(uuid, start = range.start, end = range.end, "downloading chunk");

        let resp = self
            .http
            .post(&url)
            .header(RANGE, range_header(range.start, range.end))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            let body = resp.bytes().await?;
            return Err(envelope_error(status, &body));
        }
        if !status.is_success() {
            return Err(status_error(status));
        }
        if content_type.starts_with("text/") {
            return Err(ClientError::ContentType(content_type));
        }

        let data = resp.bytes().await?;
        let expected = range.end.saturating_sub(range.start);
        if expected > 0 && data.len() as u64 != expected {
            return Err(ClientError::SizeMismatch {
                expected,
                actual: data.len() as u64,
            });
        }
        Ok(data)
    }

    /// Sends chunk `index` of an upload into `target_path` on share `uuid`.
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_chunk(
        &self,
        uuid: &str,
        credentials: &Credentials,
        data: Bytes,
        file_name: &str,
        index: u32,
        target_path: &str,
        hit_log: bool,
    ) -> Result<(), ClientError> {
        let url = self.url(UPLOAD_URI, uuid, hit_log);
        let file = Part::bytes(data.to_vec()).file_name(file_name.to_string());
        let form = credential_form(credentials)
            .part(fields::FILE, file)
            .text(fields::FILE_NAME, file_name.to_string())
            .text(fields::CHUNK_ID, index.to_string())
            .text(fields::CURR_PATH, target_path.to_string());
        debug!(uuid, index, bytes = data.len(), "uploading chunk");
        self.post_form(&url, form).await
    }

    /// Asks the server to assemble `chunk_count` uploaded chunks.
    pub async fn merge(
        &self,
        uuid: &str,
        credentials: &Credentials,
        file_name: &str,
        chunk_count: u32,
        target_path: &str,
    ) -> Result<(), ClientError> {
        let url = self.url(UPLOAD_MERGE_URI, uuid, false);
        let form = credential_form(credentials)
            .text(fields::FILE_NAME, file_name.to_string())
            .text(fields::CHUNK_COUNT, chunk_count.to_string())
            .text(fields::CURR_PATH, target_path.to_string());
        debug!(uuid, file_name, chunk_count, "merging upload");
        self.post_form(&url, form).await
    }

    /// Asks the server to drop the chunks of an unfinished upload.
    pub async fn remove(
        &self,
        uuid: &str,
        credentials: &Credentials,
        file_name: &str,
        target_path: &str,
    ) -> Result<(), ClientError> {
        let url = self.url(UPLOAD_REMOVE_URI, uuid, false);
        let form = credential_form(credentials)
            .text(fields::FILE_NAME, file_name.to_string())
            .text(fields::CURR_PATH, target_path.to_string());
        debug!(uuid, file_name, "removing partial upload");
        self.post_form(&url, form).await
    }

    /// Posts a multipart form and checks the status envelope.
    async fn post_form(&self, url: &str, form: Form) -> Result<(), ClientError> {
        let resp = self.http.post(url).multipart(form).send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;

        let api: ApiStatus = match serde_json::from_slice(&body) {
            Ok(api) => api,
            Err(_) if !status.is_success() => return Err(status_error(status)),
            Err(e) => return Err(e.into()),
        };
        if api.is_ok() {
            Ok(())
        } else {
            Err(api_error(api))
        }
    }
}

/// Decodes a metadata reply. An error envelope wins over the payload.
async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    let body = resp.bytes().await?;

    if let Ok(api) = serde_json::from_slice::<ApiStatus>(&body)
        && api.errno.is_some()
        && !api.is_ok()
    {
        return Err(api_error(api));
    }
    match serde_json::from_slice(&body) {
        Ok(value) => Ok(value),
        Err(_) if !status.is_success() => Err(status_error(status)),
        Err(e) => Err(e.into()),
    }
}

fn credential_body(credentials: &Credentials) -> CredentialBody {
    CredentialBody {
        secret_key: credentials.secret_key.clone(),
        ciphertext: credentials.ciphertext.clone(),
    }
}

fn credential_form(credentials: &Credentials) -> Form {
    Form::new()
        .text(fields::SECRET_KEY, credentials.secret_key.clone())
        .text(fields::CIPHERTEXT, credentials.ciphertext.clone())
}

/// Error for a JSON body on the download route, which only sends JSON on
/// failure.
fn envelope_error(status: StatusCode, body: &[u8]) -> ClientError {
    match serde_json::from_slice::<ApiStatus>(body) {
        Ok(api) if api.errno.is_some() => api_error(api),
        Ok(_) if !status.is_success() => status_error(status),
        Ok(_) => ClientError::ContentType("application/json".into()),
        Err(e) => ClientError::Json(e),
    }
}

fn api_error(api: ApiStatus) -> ClientError {
    let code = api.code();
    let message = if api.errmsg.is_empty() {
        format!("server error {code}")
    } else {
        api.errmsg
    };
    ClientError::Api { code, message }
}

fn status_error(status: StatusCode) -> ClientError {
    ClientError::Api {
        code: i64::from(status.as_u16()),
        message: format!("server returned {status}"),
    }
}

impl ChunkTransport for ShareClient {
    fn fetch_range<'a>(&'a self, request: RangeRequest<'a>) -> TransportFuture<'a, Bytes> {
        Box::pin(async move {
            self.download_range(
                request.uuid,
                request.credentials,
                request.range,
                request.hit_log,
            )
            .await
            .map_err(TransportError::from)
        })
    }

    fn send_chunk<'a>(&'a self, request: ChunkUpload<'a>) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.upload_chunk(
                request.uuid,
                request.credentials,
                request.data,
                request.file_name,
                request.index,
                request.target_path,
                request.hit_log,
            )
            .await
            .map_err(TransportError::from)
        })
    }

    fn remote_merge<'a>(&'a self, request: MergeRequest<'a>) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.merge(
                request.uuid,
                request.credentials,
                request.file_name,
                request.chunk_count,
                request.target_path,
            )
            .await
            .map_err(TransportError::from)
        })
    }

    fn remote_remove<'a>(&'a self, request: RemoveRequest<'a>) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.remove(
                request.uuid,
                request.credentials,
                request.file_name,
                request.target_path,
            )
            .await
            .map_err(TransportError::from)
        })
    }
}
