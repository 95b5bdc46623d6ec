//! UploadClient: multipart transfer of one local file to a resolved
//! upload target.
//!
//! `Streaming` hands the file to reqwest's multipart form as a sized stream
//! read straight from disk. `Buffered` frames the same single `file` part by
//! hand with [`MultipartEncoder`] and sends it from memory; it is also the
//! fallback when the streaming form cannot be prepared. Given the same
//! boundary both put exactly the same bytes on the wire.

use crate::models::object::file_name_of;
use crate::services::{
    api::{ApiEnvelope, UPLOAD_TIMEOUT, decode_envelope, snippet},
    endpoint::UploadTarget,
    error::{SyncError, SyncResult},
    media_types,
};
use reqwest::{
    Body, Client, RequestBuilder, StatusCode,
    header::{CONTENT_LENGTH, CONTENT_TYPE},
    multipart::{Form, Part},
};
use std::{io, path::Path};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Largest file accepted for upload (100 MiB).
pub const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

const CRLF: &str = "\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// Native multipart form over a file stream of known length.
    #[default]
    Streaming,
    /// Hand-framed body assembled in memory.
    Buffered,
}

/// Fresh multipart boundary for buffered bodies.
pub fn new_boundary() -> String {
    format!("----MediaCloudSync{}", Uuid::new_v4().simple())
}

/// Hand-built framing of the single `file` part of an upload body, laid out
/// the way reqwest frames a one-part form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartEncoder {
    boundary: String,
    preamble: Vec<u8>,
    epilogue: Vec<u8>,
}

impl MultipartEncoder {
    pub fn new(boundary: impl Into<String>, file_name: &str, mime: &str) -> Self {
        let boundary = boundary.into();
        let preamble = format!(
            "--{boundary}{CRLF}\
             Content-Disposition: form-data; name=\"file\"; filename=\"{}\"{CRLF}\
             Content-Type: {mime}{CRLF}{CRLF}",
            escape_quoted(file_name)
        )
        .into_bytes();
        let epilogue = format!("{CRLF}--{boundary}--{CRLF}").into_bytes();
        Self {
            boundary,
            preamble,
            epilogue,
        }
    }

    /// Value of the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Total body length for a file of `file_len` bytes.
    pub fn body_len(&self, file_len: u64) -> u64 {
        self.preamble.len() as u64 + file_len + self.epilogue.len() as u64
    }

    /// The complete body, in memory.
    pub fn encode(&self, file_bytes: &[u8]) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.body_len(file_bytes.len() as u64) as usize);
        body.extend_from_slice(&self.preamble);
        body.extend_from_slice(file_bytes);
        body.extend_from_slice(&self.epilogue);
        body
    }
}

/// Quoted-string escaping of a file name, matching reqwest's form encoder.
fn escape_quoted(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\r', "\\\r")
        .replace('\n', "\\\n")
}

#[derive(Clone)]
pub struct UploadClient {
    client: Client,
    transport: Transport,
}

impl UploadClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            transport: Transport::default(),
        }
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Upload `path` and return the remote URL reported by the server.
    pub async fn upload(&self, path: &Path, target: &UploadTarget) -> SyncResult<String> {
        self.upload_via(path, target, self.transport, &new_boundary())
            .await
    }

    /// Upload with an explicit transport. `boundary` frames buffered bodies;
    /// the streaming form picks its own.
    #[instrument(skip_all, fields(path = %path.display(), ?transport))]
    pub async fn upload_via(
        &self,
        path: &Path,
        target: &UploadTarget,
        transport: Transport,
        boundary: &str,
    ) -> SyncResult<String> {
        let size = tokio::fs::metadata(path).await?.len();
        if size > MAX_UPLOAD_BYTES {
            return Err(SyncError::SizeLimit {
                path: path.display().to_string(),
                size,
                limit: MAX_UPLOAD_BYTES,
            });
        }

        let mime = media_types::detect_mime(path).await;
        let file_name = file_name_of(path);
        let request = self
            .client
            .post(target.upload_url())
            .timeout(UPLOAD_TIMEOUT);

        let request = match transport {
            Transport::Streaming => match streaming_form(path, &file_name, &mime).await {
                Ok(form) => request.multipart(form),
                Err(err) => {
                    warn!("streaming form unavailable, falling back to buffered: {}", err);
                    let encoder = MultipartEncoder::new(boundary, &file_name, &mime);
                    buffered_request(request, path, &encoder).await?
                }
            },
            Transport::Buffered => {
                let encoder = MultipartEncoder::new(boundary, &file_name, &mime);
                buffered_request(request, path, &encoder).await?
            }
        };

        debug!(
            endpoint = %target.redacted(),
            mime = %mime,
            size,
            "sending upload"
        );
        let response = request.send().await?;

        let url = read_upload_response(response).await?;
        info!(size, "upload accepted");
        Ok(url)
    }
}

/// A one-part form whose file body streams from disk with a known length.
async fn streaming_form(path: &Path, file_name: &str, mime: &str) -> SyncResult<Form> {
    let file = File::open(path).await?;
    let len = file.metadata().await?.len();
    let part = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), len)
        .file_name(file_name.to_string())
        .mime_str(mime)?;
    Ok(Form::new().part("file", part))
}

async fn buffered_request(
    request: RequestBuilder,
    path: &Path,
    encoder: &MultipartEncoder,
) -> io::Result<RequestBuilder> {
    let body = encoder.encode(&tokio::fs::read(path).await?);
    Ok(request
        .header(CONTENT_TYPE, encoder.content_type())
        .header(CONTENT_LENGTH, body.len())
        .body(body))
}

/// HTTP 200 plus a success envelope carrying a non-empty URL; anything else
/// is an upload rejection.
async fn read_upload_response(response: reqwest::Response) -> SyncResult<String> {
    let status = response.status();
    let body = response.bytes().await?;
    let rejected = || SyncError::Upload {
        status: status.as_u16(),
        snippet: snippet(&body),
    };

    if status != StatusCode::OK {
        warn!(status = status.as_u16(), "upload rejected by server");
        return Err(rejected());
    }

    let envelope: ApiEnvelope<String> = decode_envelope(&body).map_err(|err| {
        warn!("undecodable upload response: {}", err);
        rejected()
    })?;
    match envelope.into_success() {
        Ok(url) if !url.trim().is_empty() => Ok(url),
        Ok(_) => Err(rejected()),
        Err(err) => {
            warn!("upload refused: {}", err);
            Err(rejected())
        }
    }
}
