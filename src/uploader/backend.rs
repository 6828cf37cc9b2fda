use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::AppResult;
use crate::media::{MediaKind, UploadFile};

/// Sends a file to durable storage and returns its durable reference
#[async_trait]
pub trait MediaUploader: Send + Sync {
    /// Implementations should stop early and return an error once `cancel` fires.
    async fn upload(&self, file: &UploadFile, cancel: CancellationToken) -> AppResult<String>;
}

/// Removes a durable asset from the hosting provider
#[async_trait]
pub trait MediaDeleter: Send + Sync {
    async fn delete(&self, reference: &str, kind: MediaKind) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

/// Fire-and-forget sink for human readable status messages
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, severity: Severity);
}

/// Notifier that routes messages to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Success | Severity::Info => log::info!("{}", message),
            Severity::Warning => log::warn!("{}", message),
            Severity::Error => log::error!("{}", message),
        }
    }
}
