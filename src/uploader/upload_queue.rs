use futures::FutureExt;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::errors::{AppError, AppResult};
use crate::media::{MediaKind, MediaRef, SlotId, UploadFile};

use super::backend::{MediaDeleter, MediaUploader, Notifier, Severity};
use super::progress_tracker::*;

#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Shortest time an upload indicator stays visible, measured from job start
    pub min_visible_duration: Duration,
    /// Pause at 100% before the indicator is cleared
    pub completion_grace: Duration,
    pub upload_timeout: Option<Duration>,
    /// Substring identifying references hosted by the provider we can delete from
    pub remote_marker: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            min_visible_duration: Duration::from_millis(5000),
            completion_grace: Duration::from_millis(500),
            upload_timeout: None,
            remote_marker: "cloudinary.com".to_string(),
        }
    }
}

pub(super) struct Slot {
    pub(super) id: SlotId,
    pub(super) generation: u64,
    pub(super) value: MediaRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum JobTarget {
    /// A slot that existed when the job was queued; follows it through reorders
    Slot(SlotId),
    /// A position past the end of the list at queue time
    Position(usize),
}

pub(super) struct QueuedJob {
    pub(super) id: u64,
    pub(super) file: Arc<UploadFile>,
    pub(super) target: JobTarget,
}

struct InFlight {
    slot: SlotId,
    generation: u64,
    progress: u8,
    cancel: CancellationToken,
}

pub(super) struct FailedUpload {
    pub(super) file: Arc<UploadFile>,
    pub(super) error: String,
    /// False when the error would recur on every attempt (bad file type, validation)
    pub(super) retryable: bool,
}

pub(super) struct QueueState {
    pub(super) slots: Vec<Slot>,
    pub(super) pending: VecDeque<QueuedJob>,
    in_flight: Option<InFlight>,
    pub(super) failures: HashMap<SlotId, FailedUpload>,
    previews: HashMap<String, Arc<UploadFile>>,
    next_slot_id: u64,
    next_job_id: u64,
}

impl QueueState {
    fn new(initial: Vec<MediaRef>) -> Self {
        let mut state = Self {
            slots: Vec::with_capacity(initial.len()),
            pending: VecDeque::new(),
            in_flight: None,
            failures: HashMap::new(),
            previews: HashMap::new(),
            next_slot_id: 0,
            next_job_id: 0,
        };
        for value in initial {
            let slot = state.new_slot(value);
            state.slots.push(slot);
        }
        state
    }

    fn new_slot(&mut self, value: MediaRef) -> Slot {
        self.next_slot_id += 1;
        Slot {
            id: SlotId(self.next_slot_id),
            generation: 0,
            value,
        }
    }

    pub(super) fn index_of(&self, id: SlotId) -> Option<usize> {
        self.slots.iter().position(|slot| slot.id == id)
    }

    pub(super) fn values(&self) -> Vec<MediaRef> {
        self.slots.iter().map(|slot| slot.value.clone()).collect()
    }

    pub(super) fn push_job(&mut self, file: Arc<UploadFile>, target: JobTarget) -> u64 {
        self.next_job_id += 1;
        let id = self.next_job_id;
        self.pending.push_back(QueuedJob { id, file, target });
        id
    }

    /// Bind a caller supplied index to a job target
    fn target_for_index(&self, index: usize) -> JobTarget {
        match self.slots.get(index) {
            Some(slot) => JobTarget::Slot(slot.id),
            None => JobTarget::Position(index),
        }
    }

    fn resolve_target(&self, target: JobTarget) -> Option<usize> {
        match target {
            JobTarget::Slot(id) => self.index_of(id),
            JobTarget::Position(position) => Some(position),
        }
    }

    /// Find or create the slot a job writes into, padding with empty slots if
    /// the position lies past the end.
    fn claim_slot(&mut self, target: JobTarget) -> Option<(SlotId, usize)> {
        match target {
            JobTarget::Slot(id) => self.index_of(id).map(|index| (id, index)),
            JobTarget::Position(position) => {
                while self.slots.len() <= position {
                    let slot = self.new_slot(MediaRef::Empty);
                    self.slots.push(slot);
                }
                Some((self.slots[position].id, position))
            }
        }
    }

    /// Overwrite a slot value, bumping its generation. Returns the new generation.
    fn write_slot(&mut self, index: usize, value: MediaRef) -> u64 {
        let slot = &mut self.slots[index];
        let old = std::mem::replace(&mut slot.value, value);
        slot.generation += 1;
        let generation = slot.generation;
        self.release_preview(&old);
        generation
    }

    fn release_preview(&mut self, value: &MediaRef) {
        if let MediaRef::LocalPreview(handle) = value {
            self.previews.remove(handle);
        }
    }

    fn remove_slot_at(&mut self, index: usize) -> Slot {
        let slot = self.slots.remove(index);
        self.release_preview(&slot.value);
        self.failures.remove(&slot.id);

        for job in self.pending.iter_mut() {
            if let JobTarget::Position(position) = &mut job.target {
                if *position > index {
                    *position -= 1;
                }
            }
        }

        slot
    }

    fn reorder(&mut self, from: usize, to: usize) -> AppResult<()> {
        let len = self.slots.len();
        if from >= len {
            return Err(AppError::invalid_slot(from, len));
        }
        if to >= len {
            return Err(AppError::invalid_slot(to, len));
        }

        let slot = self.slots.remove(from);
        self.slots.insert(to, slot);
        Ok(())
    }

    fn set_progress(&mut self, progress: u8) {
        if let Some(in_flight) = self.in_flight.as_mut() {
            in_flight.progress = progress;
        }
    }

    pub(super) fn snapshot(&self) -> QueueSnapshot {
        let state = match &self.in_flight {
            Some(in_flight) => match self.index_of(in_flight.slot) {
                Some(target_index) => UploadState::Uploading {
                    target_index,
                    progress: in_flight.progress,
                },
                // The slot was removed underneath the upload
                None => UploadState::Idle,
            },
            None => UploadState::Idle,
        };

        let in_flight_slot = self.in_flight.as_ref().map(|f| f.slot);
        let slot_status = self
            .slots
            .iter()
            .map(|slot| {
                if Some(slot.id) == in_flight_slot {
                    SlotStatus::Uploading
                } else if let Some(failure) = self.failures.get(&slot.id) {
                    SlotStatus::Failed {
                        error: failure.error.clone(),
                    }
                } else {
                    SlotStatus::Ready
                }
            })
            .collect();

        let pending = self
            .pending
            .iter()
            .map(|job| PendingJob {
                job_id: job.id,
                file_name: job.file.name.clone(),
                target_index: self.resolve_target(job.target),
            })
            .collect();

        QueueSnapshot {
            slots: self.values(),
            slot_status,
            state,
            pending,
        }
    }
}

pub(super) struct Shared {
    state: Mutex<QueueState>,
    pub(super) uploader: Option<Arc<dyn MediaUploader>>,
    deleter: Arc<dyn MediaDeleter>,
    notifier: Arc<dyn Notifier>,
    settings: QueueSettings,
    pub(super) wake: Notify,
    publisher: ProgressPublisher,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Shared {
    pub(super) fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::error!("Upload queue lock was poisoned (recovering)");
                poisoned.into_inner()
            }
        }
    }

    /// Mutate the state and publish the resulting snapshot while still holding
    /// the lock, so observers never see snapshots out of order.
    pub(super) fn update<R>(&self, f: impl FnOnce(&mut QueueState) -> R) -> R {
        let mut guard = self.lock();
        let result = f(&mut guard);
        self.publisher.publish(guard.snapshot());
        result
    }

    /// Call the deleter, turning a panic inside it into an ordinary error
    async fn guarded_delete(&self, reference: &str) -> AppResult<()> {
        AssertUnwindSafe(
            self.deleter
                .delete(reference, MediaKind::from_reference(reference)),
        )
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(AppError::delete_failed(format!(
                "deleter panicked: {}",
                panic_message(&*panic)
            )))
        })
    }

    async fn best_effort_delete(&self, reference: &str, success_message: Option<&str>) {
        match self.guarded_delete(reference).await {
            Ok(()) => {
                log::info!("Deleted remote asset {}", reference);
                if let Some(message) = success_message {
                    self.notifier.notify(message, Severity::Info);
                }
            }
            Err(e) => {
                log::warn!("Failed to delete remote asset {} (non-critical): {}", reference, e);
            }
        }
    }

    async fn run_upload(
        &self,
        uploader: &dyn MediaUploader,
        file: &UploadFile,
        slot_index: usize,
        cancel: CancellationToken,
    ) -> AppResult<String> {
        let guarded = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AppError::UploadCancelled { slot: slot_index }),
                result = AssertUnwindSafe(uploader.upload(file, cancel.clone())).catch_unwind() => {
                    result.unwrap_or_else(|panic| {
                        Err(AppError::upload_failed(format!(
                            "uploader panicked: {}",
                            panic_message(&*panic)
                        )))
                    })
                }
            }
        };

        match self.settings.upload_timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    Err(AppError::UploadTimeout {
                        millis: limit.as_millis() as u64,
                    })
                }
            },
            None => guarded.await,
        }
    }

    async fn process_job(&self, job_id: u64, file: Arc<UploadFile>, target: JobTarget) {
        let Some(uploader) = self.uploader.clone() else {
            return;
        };

        // The current value is read under the same lock as the claim; a concurrent
        // removal may shrink the list as soon as it is released.
        let claimed = self.update(|state| {
            let (slot_id, index) = state.claim_slot(target)?;
            Some((slot_id, index, state.slots[index].value.clone()))
        });
        let Some((slot_id, index, previous)) = claimed else {
            log::warn!(
                "Skipping upload job {} ({}): its slot was removed",
                job_id,
                file.name
            );
            self.notifier.notify(
                &format!("Upload of {} skipped: the slot was removed", file.name),
                Severity::Warning,
            );
            return;
        };

        // Replace, not orphan: drop the asset this slot currently points to
        if previous.is_hosted(&self.settings.remote_marker) {
            if let Some(reference) = previous.as_str() {
                self.best_effort_delete(reference, Some("Old image removed"))
                    .await;
            }
        }

        let cancel = CancellationToken::new();
        let started = Instant::now();

        let begun = self.update(|state| {
            state.index_of(slot_id)?;
            state.failures.remove(&slot_id);
            state.in_flight = Some(InFlight {
                slot: slot_id,
                generation: 0,
                progress: 0,
                cancel: cancel.clone(),
            });
            Some(())
        });
        if begun.is_none() {
            log::warn!(
                "Skipping upload job {} ({}): its slot was removed during cleanup",
                job_id,
                file.name
            );
            return;
        }

        let preview_index = self.update(|state| {
            let index = state.index_of(slot_id)?;
            let preview = MediaRef::new_preview();
            if let MediaRef::LocalPreview(handle) = &preview {
                state.previews.insert(handle.clone(), file.clone());
            }
            let generation = state.write_slot(index, preview);
            if let Some(in_flight) = state.in_flight.as_mut() {
                in_flight.generation = generation;
                in_flight.progress = PROGRESS_PREVIEW;
            }
            Some(index)
        });
        let slot_index = preview_index.unwrap_or(index);

        log::info!(
            "Uploading {} ({} bytes) to slot {}",
            file.name,
            file.size(),
            slot_index
        );

        match self
            .run_upload(uploader.as_ref(), &file, slot_index, cancel)
            .await
        {
            Ok(reference) => self.complete_job(slot_id, &file, reference, started).await,
            Err(e) => self.fail_job(slot_id, &file, e),
        }
    }

    async fn complete_job(
        &self,
        slot_id: SlotId,
        file: &UploadFile,
        reference: String,
        started: Instant,
    ) {
        let applied = self.update(|state| {
            let expected = state.in_flight.as_ref().map(|f| f.generation);
            match state.index_of(slot_id) {
                Some(index) if Some(state.slots[index].generation) == expected => {
                    state.write_slot(index, MediaRef::Remote(reference.clone()));
                    state.set_progress(PROGRESS_UPLOADED);
                    true
                }
                _ => {
                    state.in_flight = None;
                    false
                }
            }
        });

        if !applied {
            log::warn!(
                "Slot for {} was removed or replaced during upload; discarding {}",
                file.name,
                reference
            );
            if MediaRef::Remote(reference.clone()).is_hosted(&self.settings.remote_marker) {
                self.best_effort_delete(&reference, None).await;
            }
            return;
        }

        log::info!("Uploaded {} as {}", file.name, reference);

        let elapsed = started.elapsed();
        if elapsed < self.settings.min_visible_duration {
            sleep(self.settings.min_visible_duration - elapsed).await;
        }

        self.update(|state| state.set_progress(PROGRESS_COMPLETE));
        sleep(self.settings.completion_grace).await;
        self.update(|state| state.in_flight = None);
    }

    fn fail_job(&self, slot_id: SlotId, file: &Arc<UploadFile>, error: AppError) {
        let slot_exists = self.update(|state| {
            state.in_flight = None;
            if state.index_of(slot_id).is_some() {
                state.failures.insert(
                    slot_id,
                    FailedUpload {
                        file: file.clone(),
                        error: error.to_string(),
                        retryable: !error.is_permanent(),
                    },
                );
                true
            } else {
                false
            }
        });

        log::error!(
            "Failed to upload {}: {} (transient: {})",
            file.name,
            error,
            error.is_retryable()
        );
        if slot_exists {
            self.notifier.notify(
                &format!("Upload of {} failed: {}", file.name, error),
                Severity::Error,
            );
        }
    }

    fn finish_head(&self, job_id: u64) {
        self.update(|state| {
            if state.pending.front().map(|job| job.id) == Some(job_id) {
                state.pending.pop_front();
            }
        });
    }
}

async fn run_worker(shared: Arc<Shared>) {
    loop {
        let head = shared
            .lock()
            .pending
            .front()
            .map(|job| (job.id, job.file.clone(), job.target));

        match head {
            Some((job_id, file, target)) => {
                shared.process_job(job_id, file, target).await;
                shared.finish_head(job_id);
            }
            None => shared.wake.notified().await,
        }
    }
}

/// Applies uploads to an ordered slot list one at a time, in submission order
pub struct UploadCoordinator {
    pub(super) shared: Arc<Shared>,
    worker: JoinHandle<()>,
}

impl UploadCoordinator {
    /// Must be called from within a tokio runtime; the worker task is spawned here.
    pub fn new(
        initial_slots: Vec<MediaRef>,
        uploader: Option<Arc<dyn MediaUploader>>,
        deleter: Arc<dyn MediaDeleter>,
        notifier: Arc<dyn Notifier>,
        settings: QueueSettings,
    ) -> Self {
        let state = QueueState::new(initial_slots);
        let publisher = ProgressPublisher::new(state.snapshot());

        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            uploader,
            deleter,
            notifier,
            settings,
            wake: Notify::new(),
            publisher,
        });

        let worker = tokio::spawn(run_worker(shared.clone()));
        Self { shared, worker }
    }

    /// Queue `file` for upload into `target_index`. Returns immediately.
    pub fn enqueue(&self, file: UploadFile, target_index: usize) {
        if self.shared.uploader.is_none() {
            log::warn!(
                "No uploader configured; ignoring {} for slot {}",
                file.name,
                target_index
            );
            return;
        }

        let file = Arc::new(file);
        let job_id = self.shared.update(|state| {
            let target = state.target_for_index(target_index);
            state.push_job(file.clone(), target)
        });
        log::debug!("Queued job {} ({}) for slot {}", job_id, file.name, target_index);

        self.shared.wake.notify_one();
    }

    /// Remove the slot at `index`, deleting its hosted asset on a best-effort basis.
    /// Returns the slot list after removal.
    pub async fn remove_slot(&self, index: usize) -> AppResult<Vec<MediaRef>> {
        let (slot_id, value) = {
            let state = self.shared.lock();
            let slot = state
                .slots
                .get(index)
                .ok_or_else(|| AppError::invalid_slot(index, state.slots.len()))?;
            (slot.id, slot.value.clone())
        };

        if value.is_hosted(&self.shared.settings.remote_marker) {
            if let Some(reference) = value.as_str() {
                match self.shared.guarded_delete(reference).await {
                    Ok(()) => self.shared.notifier.notify("Image removed", Severity::Success),
                    Err(e) => log::warn!(
                        "Failed to delete {} while removing slot {} (non-critical): {}",
                        reference,
                        index,
                        e
                    ),
                }
            }
        }

        // Look the slot up again; other operations may have moved it during the delete
        let slots = self.shared.update(|state| {
            if let Some(current) = state.index_of(slot_id) {
                state.remove_slot_at(current);
            }
            state.values()
        });

        log::info!("Removed slot {} ({} slots left)", index, slots.len());
        Ok(slots)
    }

    /// Move the slot at `from` to `to`. Returns the slot list after the move.
    pub fn reorder_slots(&self, from: usize, to: usize) -> AppResult<Vec<MediaRef>> {
        self.shared.update(|state| -> AppResult<Vec<MediaRef>> {
            state.reorder(from, to)?;
            Ok(state.values())
        })
    }

    /// Cancel the upload currently in flight. Returns false when idle.
    pub fn cancel_current(&self) -> bool {
        let state = self.shared.lock();
        match &state.in_flight {
            Some(in_flight) => {
                in_flight.cancel.cancel();
                log::info!("Cancellation requested for the current upload");
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.shared.lock().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.shared.publisher.subscribe()
    }

    pub fn slots(&self) -> Vec<MediaRef> {
        self.shared.lock().values()
    }

    pub fn state(&self) -> UploadState {
        self.snapshot().state
    }

    pub fn pending_len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Bytes behind a local preview handle, while the preview is still shown
    pub fn preview_data(&self, handle: &str) -> Option<Arc<UploadFile>> {
        self.shared.lock().previews.get(handle).cloned()
    }

    /// Resolve once no job is queued or in flight
    pub async fn wait_until_idle(&self) {
        let mut rx = self.subscribe();
        loop {
            if rx.borrow_and_update().is_settled() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for UploadCoordinator {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
