//! AuthSessionProvider: exchanges account credentials for a short-lived
//! authorization code.

use crate::config::Credentials;
use crate::services::{
    api::{API_CALL_TIMEOUT, ApiEnvelope, decode_envelope},
    error::{SyncError, SyncResult},
};
use reqwest::Client;
use std::fmt;
use tracing::{debug, instrument, warn};

/// Opaque, short-lived authorization token.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthCode(pub String);

impl AuthCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthCode(<redacted>)")
    }
}

#[derive(Clone)]
pub struct AuthSessionProvider {
    client: Client,
    api_base_url: String,
}

impl AuthSessionProvider {
    pub fn new(client: Client, api_base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_base_url: api_base_url.into(),
        }
    }

    /// Exchange `credentials` for an authorization code. No retries: the
    /// caller owns the retry policy.
    #[instrument(skip_all, fields(account_id = %credentials.account_id))]
    pub async fn get_auth_code(&self, credentials: &Credentials) -> SyncResult<AuthCode> {
        if !credentials.is_complete() {
            return Err(SyncError::Auth("account id or secret key is empty".into()));
        }

        let url = format!("{}/opapi/GetAuthCode", self.api_base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("aid", credentials.account_id.as_str()),
                ("key", credentials.secret_key.as_str()),
            ])
            .timeout(API_CALL_TIMEOUT)
            .send()
            .await
            .map_err(|err| {
                warn!("auth request failed: {}", err);
                SyncError::Auth(format!("request failed: {}", err))
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| SyncError::Auth(format!("reading response failed: {}", err)))?;
        if !status.is_success() {
            return Err(SyncError::Auth(format!("http status {}", status.as_u16())));
        }

        let envelope: ApiEnvelope<String> = decode_envelope(&body).map_err(SyncError::Auth)?;
        let code = envelope.into_success().map_err(SyncError::Auth)?;
        if code.is_empty() {
            return Err(SyncError::Auth("empty authorization code".into()));
        }
        debug!("authorization code obtained");
        Ok(AuthCode(code))
    }
}
