//! The remote side of a sync as seen by the orchestrator.

use crate::config::SyncSettings;
use crate::services::{
    api::build_http_client,
    auth::{AuthCode, AuthSessionProvider},
    endpoint::{UploadEndpointResolver, UploadTarget},
    error::SyncResult,
    upload_client::{Transport, UploadClient},
};
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use tracing::{info, instrument};

/// Authorization, target resolution and transfer against the cloud API.
#[async_trait]
pub trait CloudGateway: Send + Sync {
    async fn authorize(&self) -> SyncResult<AuthCode>;

    async fn resolve_upload_target(&self, auth: &AuthCode) -> SyncResult<UploadTarget>;

    async fn upload(&self, path: &Path, target: &UploadTarget) -> SyncResult<String>;

    /// Authenticated download link of a stored file.
    async fn download_link(&self, auth: &AuthCode, file: &str) -> SyncResult<String>;
}

/// [`CloudGateway`] over the HTTP/JSON API.
pub struct HttpCloudGateway {
    settings: SyncSettings,
    auth: AuthSessionProvider,
    endpoints: UploadEndpointResolver,
    uploader: UploadClient,
}

impl HttpCloudGateway {
    pub fn from_settings(settings: &SyncSettings) -> SyncResult<Self> {
        let client = build_http_client()?;
        Ok(Self {
            settings: settings.clone(),
            auth: AuthSessionProvider::new(client.clone(), settings.api_base_url.clone()),
            endpoints: UploadEndpointResolver::new(client.clone(), settings.api_base_url.clone()),
            uploader: UploadClient::new(client),
        })
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.uploader = self.uploader.with_transport(transport);
        self
    }
}

#[async_trait]
impl CloudGateway for HttpCloudGateway {
    async fn authorize(&self) -> SyncResult<AuthCode> {
        self.auth.get_auth_code(&self.settings.credentials).await
    }

    async fn resolve_upload_target(&self, auth: &AuthCode) -> SyncResult<UploadTarget> {
        self.endpoints
            .resolve_upload_target(auth, self.settings.target_folder_id.as_deref())
            .await
    }

    async fn upload(&self, path: &Path, target: &UploadTarget) -> SyncResult<String> {
        self.uploader.upload(path, target).await
    }

    async fn download_link(&self, auth: &AuthCode, file: &str) -> SyncResult<String> {
        self.endpoints.resolve_download_link(auth, file).await
    }
}

/// Result of a connectivity check.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionCheck {
    pub authorized: bool,
    /// Upload endpoint with its signature elided.
    pub upload_endpoint: String,
}

/// Authorize and resolve an upload target without transferring anything.
#[instrument(skip_all)]
pub async fn check_connection(gateway: &dyn CloudGateway) -> SyncResult<ConnectionCheck> {
    let auth = gateway.authorize().await?;
    let target = gateway.resolve_upload_target(&auth).await?;
    info!(endpoint = %target.redacted(), "connection check passed");
    Ok(ConnectionCheck {
        authorized: true,
        upload_endpoint: target.redacted(),
    })
}
