//! Shared pieces of the remote HTTP/JSON API: the response envelope and the
//! pooled HTTP client.

use reqwest::{Client, redirect::Policy};
use serde::{Deserialize, de::DeserializeOwned};
use std::time::Duration;

/// Timeout of the small JSON calls (auth, endpoint resolution).
pub const API_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout of every remote call.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Total timeout of an upload transfer.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum number of response bytes kept for diagnostics.
pub const SNIPPET_LEN: usize = 500;

/// Envelope shared by every API response: `{code, data, msg?}`.
/// `code == 200` signals success.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: ApiCode,
    pub data: Option<T>,
    #[serde(default)]
    pub msg: Option<String>,
}

/// Result codes arrive as numbers from most endpoints and as numeric
/// strings from a few.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ApiCode {
    Int(i64),
    Text(String),
}

impl ApiCode {
    pub fn is_success(&self) -> bool {
        match self {
            ApiCode::Int(code) => *code == 200,
            ApiCode::Text(code) => code.trim() == "200",
        }
    }
}

impl<T> ApiEnvelope<T> {
    /// The payload of a successful envelope, or a description of why there
    /// is none.
    pub fn into_success(self) -> Result<T, String> {
        if !self.code.is_success() {
            return Err(format!(
                "api code {:?}: {}",
                self.code,
                self.msg.unwrap_or_else(|| "unknown error".into())
            ));
        }
        self.data
            .ok_or_else(|| "success envelope without data".to_string())
    }
}

/// Decode an envelope from a raw body.
pub fn decode_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<ApiEnvelope<T>, String> {
    if body.is_empty() {
        return Err("empty response body".into());
    }
    serde_json::from_slice(body).map_err(|err| format!("undecodable response: {}", err))
}

/// First [`SNIPPET_LEN`] bytes of a body, lossily decoded.
pub fn snippet(body: &[u8]) -> String {
    let end = body.len().min(SNIPPET_LEN);
    String::from_utf8_lossy(&body[..end]).into_owned()
}

/// Build the pooled client used for every remote call.
pub fn build_http_client() -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(UPLOAD_TIMEOUT)
        .redirect(Policy::limited(3))
        .user_agent(concat!("media-cloud-sync/", env!("CARGO_PKG_VERSION")))
        .build()
}
