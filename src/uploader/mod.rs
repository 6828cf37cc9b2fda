// Uploader module - everything between a picked file and a slot holding its URL
//
// The coordinator in `upload_queue` owns the slot list; the backends it calls
// are injected through the traits in `backend`.

pub mod backend;
pub mod cloudinary_client;
pub mod pending_deletions;
pub mod progress_tracker;
pub mod retry;
pub mod upload_queue;

pub use backend::{LogNotifier, MediaDeleter, MediaUploader, Notifier, Severity};
pub use cloudinary_client::CloudinaryClient;
pub use pending_deletions::{PendingDeletion, PendingDeletions};
pub use progress_tracker::{PendingJob, QueueSnapshot, SlotStatus, UploadState};
pub use upload_queue::{QueueSettings, UploadCoordinator};
