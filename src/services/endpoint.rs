//! UploadEndpointResolver: turns an authorization code into a one-time
//! upload target.

use crate::services::{
    api::{API_CALL_TIMEOUT, ApiEnvelope, decode_envelope},
    auth::AuthCode,
    error::{SyncError, SyncResult},
};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

/// A resolved, single-use upload destination.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadTarget {
    #[serde(rename = "url")]
    pub base_url: String,
    #[serde(rename = "query")]
    pub signed_query: String,
}

impl UploadTarget {
    /// `base_url + "/upload?" + signed_query`.
    pub fn upload_url(&self) -> String {
        format!(
            "{}/upload?{}",
            self.base_url.trim_end_matches('/'),
            self.signed_query
        )
    }

    /// The upload URL with the signature elided, for logs.
    pub fn redacted(&self) -> String {
        format!("{}/upload?<signed>", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Clone)]
pub struct UploadEndpointResolver {
    client: Client,
    api_base_url: String,
}

impl UploadEndpointResolver {
    pub fn new(client: Client, api_base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_base_url: api_base_url.into(),
        }
    }

    /// One remote call; `folder_id` scopes the destination when present.
    #[instrument(skip(self, auth_code))]
    pub async fn resolve_upload_target(
        &self,
        auth_code: &AuthCode,
        folder_id: Option<&str>,
    ) -> SyncResult<UploadTarget> {
        let mut params = vec![("authcode", auth_code.as_str())];
        if let Some(fid) = folder_id.filter(|fid| !fid.is_empty()) {
            params.push(("fid", fid));
        }

        let target: UploadTarget = self
            .get_json("/opapi/Getuploads", &params)
            .await
            .map_err(SyncError::Endpoint)?;
        debug!(endpoint = %target.redacted(), "upload target resolved");
        Ok(target)
    }

    /// Authenticated download link of a stored file.
    pub async fn resolve_download_link(
        &self,
        auth_code: &AuthCode,
        file: &str,
    ) -> SyncResult<String> {
        self.get_json("/opapi/GetSign", &[("file", file), ("authcode", auth_code.as_str())])
            .await
            .map_err(SyncError::Endpoint)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, String> {
        let response = self
            .client
            .get(format!("{}{}", self.api_base_url, path))
            .query(params)
            .timeout(API_CALL_TIMEOUT)
            .send()
            .await
            .map_err(|err| format!("request failed: {}", err))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| format!("reading response failed: {}", err))?;
        if !status.is_success() {
            return Err(format!("http status {}", status.as_u16()));
        }

        let envelope: ApiEnvelope<T> = decode_envelope(&body)?;
        envelope.into_success()
    }
}
