use serde::Serialize;
use tokio::sync::watch;

use crate::media::MediaRef;

/// Progress once the local preview is in place and the transfer has begun
pub const PROGRESS_PREVIEW: u8 = 30;
/// Progress once the durable reference has been written to the slot
pub const PROGRESS_UPLOADED: u8 = 80;
pub const PROGRESS_COMPLETE: u8 = 100;

/// What the coordinator is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadState {
    Idle,
    Uploading { target_index: usize, progress: u8 },
}

impl UploadState {
    pub fn in_flight_index(&self) -> Option<usize> {
        match self {
            UploadState::Idle => None,
            UploadState::Uploading { target_index, .. } => Some(*target_index),
        }
    }

    pub fn progress(&self) -> u8 {
        match self {
            UploadState::Idle => 0,
            UploadState::Uploading { progress, .. } => *progress,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, UploadState::Idle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SlotStatus {
    Ready,
    Uploading,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingJob {
    pub job_id: u64,
    pub file_name: String,
    /// `None` when the slot the job was aimed at has been removed
    pub target_index: Option<usize>,
}

/// Everything a UI needs to render the slot list and the upload indicator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub slots: Vec<MediaRef>,
    pub slot_status: Vec<SlotStatus>,
    pub state: UploadState,
    /// Jobs not yet finished; the head is the one in flight while uploading
    pub pending: Vec<PendingJob>,
}

impl QueueSnapshot {
    /// Nothing in flight and nothing waiting
    pub fn is_settled(&self) -> bool {
        self.state.is_idle() && self.pending.is_empty()
    }

    pub fn failed_slots(&self) -> Vec<usize> {
        self.slot_status
            .iter()
            .enumerate()
            .filter(|(_, status)| matches!(status, SlotStatus::Failed { .. }))
            .map(|(index, _)| index)
            .collect()
    }
}

/// Broadcasts snapshots to any number of observers
pub struct ProgressPublisher {
    tx: watch::Sender<QueueSnapshot>,
}

impl ProgressPublisher {
    pub fn new(initial: QueueSnapshot) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn publish(&self, snapshot: QueueSnapshot) {
        if let UploadState::Uploading {
            target_index,
            progress,
        } = snapshot.state
        {
            log::debug!(
                "Progress: slot {} at {}% ({} pending)",
                target_index,
                progress,
                snapshot.pending.len()
            );
        }

        // send_replace succeeds even when nobody is subscribed
        self.tx.send_replace(snapshot);
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.tx.subscribe()
    }
}
