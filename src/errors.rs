use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file type: {name} ({mime_type}). Only images and videos are supported.")]
    InvalidFileType { name: String, mime_type: String },

    #[error("File too large: {name}. Maximum size is {max_mb}MB.")]
    FileTooLarge { name: String, max_mb: u64 },

    #[error("Upload failed: {reason}")]
    UploadFailed { reason: String },

    #[error("Delete failed: {reason}")]
    DeleteFailed { reason: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upload cancelled for slot {slot}")]
    UploadCancelled { slot: usize },

    #[error("Upload timed out after {millis}ms")]
    UploadTimeout { millis: u64 },

    #[error("Slot index {index} out of range (slot count: {len})")]
    InvalidSlot { index: usize, len: usize },

    #[error("Slot {index} has no failed upload to retry")]
    NoFailedUpload { index: usize },

    #[error("Upload into slot {index} cannot be retried: {reason}")]
    NotRetryable { index: usize, reason: String },
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn invalid_file_type(name: &str, mime_type: &str) -> Self {
        Self::InvalidFileType {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
        }
    }

    pub fn file_too_large(name: &str, max_mb: u64) -> Self {
        Self::FileTooLarge {
            name: name.to_string(),
            max_mb,
        }
    }

    pub fn upload_failed(reason: impl Into<String>) -> Self {
        Self::UploadFailed {
            reason: reason.into(),
        }
    }

    pub fn delete_failed(reason: impl Into<String>) -> Self {
        Self::DeleteFailed {
            reason: reason.into(),
        }
    }

    pub fn invalid_slot(index: usize, len: usize) -> Self {
        Self::InvalidSlot { index, len }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Network(_)
                | AppError::UploadFailed { .. }
                | AppError::DeleteFailed { .. }
                | AppError::UploadTimeout { .. }
                | AppError::UploadCancelled { .. }
                | AppError::Io(_)
        )
    }

    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            AppError::InvalidFileType { .. }
                | AppError::FileTooLarge { .. }
                | AppError::Validation { .. }
                | AppError::InvalidSlot { .. }
                | AppError::NotRetryable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(AppError::upload_failed("HTTP 502").is_retryable());
        assert!(AppError::UploadTimeout { millis: 30_000 }.is_retryable());
        assert!(AppError::UploadCancelled { slot: 2 }.is_retryable());
        assert!(!AppError::upload_failed("HTTP 502").is_permanent());
    }

    #[test]
    fn test_short_timeouts_keep_their_length() {
        assert_eq!(
            AppError::UploadTimeout { millis: 250 }.to_string(),
            "Upload timed out after 250ms"
        );
    }

    #[test]
    fn test_validation_errors_are_permanent() {
        let err = AppError::file_too_large("banner.png", 10);
        assert!(err.is_permanent());
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "File too large: banner.png. Maximum size is 10MB."
        );

        let err = AppError::invalid_slot(4, 3);
        assert!(err.is_permanent());
        assert_eq!(
            err.to_string(),
            "Slot index 4 out of range (slot count: 3)"
        );
    }
}
