use std::sync::Arc;

use crate::errors::{AppError, AppResult};
use crate::media::UploadFile;

use super::upload_queue::{JobTarget, UploadCoordinator};

impl UploadCoordinator {
    /// Queue the file whose last upload into `index` failed, again.
    ///
    /// Failed uploads are never retried on their own; this is the explicit,
    /// user-driven path. Calling it twice before the retry starts queues it once.
    /// Failures that would recur on every attempt are refused with `NotRetryable`.
    pub fn retry_failed(&self, index: usize) -> AppResult<()> {
        if self.shared.uploader.is_none() {
            return Err(AppError::Config("No uploader configured".to_string()));
        }

        let queued = self.shared.update(|state| -> AppResult<Option<(u64, Arc<UploadFile>)>> {
            let slot_id = state
                .slots
                .get(index)
                .map(|slot| slot.id)
                .ok_or_else(|| AppError::invalid_slot(index, state.slots.len()))?;

            let failure = state
                .failures
                .get(&slot_id)
                .ok_or(AppError::NoFailedUpload { index })?;
            if !failure.retryable {
                return Err(AppError::NotRetryable {
                    index,
                    reason: failure.error.clone(),
                });
            }
            let file = failure.file.clone();

            let target = JobTarget::Slot(slot_id);
            if state.pending.iter().any(|job| job.target == target) {
                return Ok(None);
            }

            Ok(Some((state.push_job(file.clone(), target), file)))
        })?;

        match queued {
            Some((job_id, file)) => {
                log::info!(
                    "Retrying upload of {} into slot {} as job {}",
                    file.name,
                    index,
                    job_id
                );
                self.shared.wake.notify_one();
            }
            None => log::debug!("Retry for slot {} is already queued", index),
        }

        Ok(())
    }

    /// Retry every failed slot, in slot order. Returns how many were queued.
    pub fn retry_all_failed(&self) -> usize {
        let failed = self.snapshot().failed_slots();
        let mut queued = 0;

        for index in failed {
            match self.retry_failed(index) {
                Ok(()) => queued += 1,
                Err(e) => log::warn!("Could not retry slot {}: {}", index, e),
            }
        }

        queued
    }
}
