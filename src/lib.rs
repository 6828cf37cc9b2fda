pub mod config;
pub mod errors;
pub mod media;
pub mod security;
pub mod uploader;

pub use errors::{AppError, AppResult};
pub use media::{MediaKind, MediaRef, UploadFile};
pub use uploader::{QueueSettings, UploadCoordinator, UploadState};
