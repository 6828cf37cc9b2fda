use async_trait::async_trait;
use chrono::Utc;
use reqwest::{multipart, Client};
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::{CloudinaryAccount, CloudinaryConfig};
use crate::errors::{AppError, AppResult};
use crate::media::{extract_public_id, MediaKind, UploadFile};
use crate::security::InputValidator;

use super::backend::{MediaDeleter, MediaUploader};
use super::pending_deletions::{PendingDeletion, PendingDeletions};

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

/// Cloudinary unsigned-upload client; deletions go through a server-side function
/// because they need the API secret.
pub struct CloudinaryClient {
    client: Client,
    config: CloudinaryConfig,
    uploader_name: String,
    upload_context: String,
    /// Host substring of delivery URLs this client can delete from
    remote_marker: String,
    ledger: Option<Arc<PendingDeletions>>,
}

impl CloudinaryClient {
    pub fn new(
        config: CloudinaryConfig,
        uploader_name: &str,
        upload_context: &str,
    ) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            config,
            uploader_name: uploader_name.to_string(),
            upload_context: upload_context.to_string(),
            remote_marker: "cloudinary.com".to_string(),
            ledger: None,
        })
    }

    /// Recognise delivery URLs by `marker` instead of `cloudinary.com`,
    /// e.g. when assets are served through a custom domain
    pub fn with_remote_marker(mut self, marker: &str) -> Self {
        self.remote_marker = marker.to_string();
        self
    }

    /// Record failed deletions in `ledger` so they can be retried later
    pub fn with_ledger(mut self, ledger: Arc<PendingDeletions>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn upload_url(&self, account: &CloudinaryAccount, kind: MediaKind) -> String {
        format!(
            "{}/v1_1/{}/{}/upload",
            self.config.api_base.trim_end_matches('/'),
            account.cloud_name,
            kind.as_str()
        )
    }

    /// `{user}_{yyyy-mm-dd}_{context}_{suffix}`, where suffix is the last four
    /// digits of the current millisecond timestamp.
    pub fn generate_public_id(&self) -> String {
        let user: String = self
            .uploader_name
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        let now = Utc::now();
        let millis = now.timestamp_millis().to_string();
        let suffix = &millis[millis.len().saturating_sub(4)..];

        format!(
            "{}_{}_{}_{}",
            user,
            now.format("%Y-%m-%d"),
            InputValidator::sanitize_public_id_component(&self.upload_context),
            suffix
        )
    }

    async fn send_upload(&self, file: &UploadFile) -> AppResult<String> {
        let kind = file.kind();
        let account = self.config.account_for(kind);
        let url = self.upload_url(&account, kind);
        let public_id = self.generate_public_id();
        let folder = if self.config.folder.trim().is_empty() {
            "cms/general".to_string()
        } else {
            self.config.folder.to_lowercase()
        };

        log::debug!(
            "Uploading {} to {} (public_id: {}, folder: {})",
            file.name,
            url,
            public_id,
            folder
        );

        let part = multipart::Part::bytes(file.bytes.clone())
            .file_name(InputValidator::sanitize_filename(&file.name))
            .mime_str(&file.mime_type)?;

        let form = multipart::Form::new()
            .part("file", part)
            .text("upload_preset", account.upload_preset.clone())
            .text("public_id", public_id)
            .text("folder", folder);

        let response = match self.client.post(&url).multipart(form).send().await {
            Ok(response) => response,
            Err(e) => {
                log::error!("Cloudinary upload request failed: {}", e);
                return Err(AppError::upload_failed(friendly_upload_error(
                    &format!("network error: {}", e),
                    kind,
                    &account,
                )));
            }
        };

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| "Upload rejected".to_string());

            log::error!(
                "Cloudinary upload error: {} | cloud name: {} | preset: {}",
                message,
                account.cloud_name,
                account.upload_preset
            );
            return Err(AppError::upload_failed(friendly_upload_error(
                &format!("{} (HTTP {})", message, status.as_u16()),
                kind,
                &account,
            )));
        }

        let parsed: UploadResponse = serde_json::from_str(&body)?;
        parsed
            .secure_url
            .ok_or_else(|| AppError::upload_failed("Server did not return a secure URL"))
    }

    async fn send_delete(&self, public_id: &str, kind: MediaKind) -> AppResult<()> {
        let endpoint = self
            .config
            .delete_endpoint
            .as_deref()
            .ok_or_else(|| AppError::Config("No delete endpoint configured".to_string()))?;

        log::info!("Requesting deletion of {} ({})", public_id, kind.as_str());

        let mut request = self.client.post(endpoint).json(&serde_json::json!({
            "public_id": public_id,
            "resource_type": kind.as_str(),
        }));
        if let Some(token) = &self.config.delete_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(AppError::delete_failed(format!(
            "HTTP {} for {}: {}",
            status.as_u16(),
            public_id,
            body
        )))
    }

    fn record_pending(&self, public_id: &str, url: &str, kind: MediaKind, error: &AppError) {
        let Some(ledger) = &self.ledger else {
            return;
        };

        let entry = PendingDeletion {
            public_id: public_id.to_string(),
            resource_type: kind,
            url: url.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        };
        if let Err(e) = ledger.record(entry) {
            log::warn!("Failed to store pending deletion for {}: {}", public_id, e);
        }
    }
}

/// Turn a raw provider error into something an editor can act on
pub fn friendly_upload_error(raw: &str, kind: MediaKind, account: &CloudinaryAccount) -> String {
    let lower = raw.to_lowercase();
    let label = match kind {
        MediaKind::Image => "images",
        MediaKind::Video => "videos",
    };

    if lower.contains("preset") || lower.contains("401") {
        format!(
            "Permission error ({}): check that upload preset '{}' exists and is unsigned",
            label, account.upload_preset
        )
    } else if lower.contains("cloud name") || lower.contains("404") {
        format!(
            "Account error ({}): cloud name '{}' is wrong or the account is suspended",
            label, account.cloud_name
        )
    } else if lower.contains("file size") {
        "File too large for the current Cloudinary plan".to_string()
    } else if lower.contains("network") || lower.contains("cors") {
        format!(
            "Network error: check connectivity and that cloud name '{}' with preset '{}' allows unsigned uploads",
            account.cloud_name, account.upload_preset
        )
    } else {
        raw.to_string()
    }
}

#[async_trait]
impl MediaUploader for CloudinaryClient {
    async fn upload(&self, file: &UploadFile, cancel: CancellationToken) -> AppResult<String> {
        tokio::select! {
            _ = cancel.cancelled() => Err(AppError::upload_failed(format!("upload of {} cancelled", file.name))),
            result = self.send_upload(file) => result,
        }
    }
}

#[async_trait]
impl MediaDeleter for CloudinaryClient {
    async fn delete(&self, reference: &str, kind: MediaKind) -> AppResult<()> {
        let public_id = if reference.contains(&self.remote_marker) {
            match extract_public_id(reference, &self.remote_marker) {
                Some(public_id) => public_id,
                None => {
                    log::warn!("Could not extract public_id from URL: {}", reference);
                    return Err(AppError::validation("reference", "Invalid Cloudinary URL"));
                }
            }
        } else {
            reference.to_string()
        };

        match self.send_delete(&public_id, kind).await {
            Ok(()) => {
                log::info!("Deleted {} from Cloudinary", public_id);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to delete {} from Cloudinary: {}", public_id, e);
                self.record_pending(&public_id, reference, kind, &e);
                Err(e)
            }
        }
    }
}
