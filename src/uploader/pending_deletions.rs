use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::config;
use crate::errors::AppResult;
use crate::media::MediaKind;

use super::backend::MediaDeleter;

const LEDGER_FILE_NAME: &str = "pending_deletions.json";

/// A remote asset whose deletion failed and still needs cleaning up
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingDeletion {
    pub public_id: String,
    pub resource_type: MediaKind,
    pub url: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// JSON file ledger of deletions to retry later
pub struct PendingDeletions {
    path: PathBuf,
    io_lock: Mutex<()>,
}

impl PendingDeletions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io_lock: Mutex::new(()),
        }
    }

    pub fn in_data_dir() -> AppResult<Self> {
        Ok(Self::new(config::get_data_directory()?.join(LEDGER_FILE_NAME)))
    }

    fn with_lock<R>(&self, f: impl FnOnce() -> AppResult<R>) -> AppResult<R> {
        let _guard = match self.io_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Pending deletion ledger lock was poisoned (recovering)");
                poisoned.into_inner()
            }
        };
        f()
    }

    fn read(&self) -> AppResult<Vec<PendingDeletion>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&self.path)?;
        match serde_json::from_str(&contents) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                log::warn!(
                    "Pending deletion ledger {} is unreadable, starting fresh: {}",
                    self.path.display(),
                    e
                );
                Ok(Vec::new())
            }
        }
    }

    fn write(&self, entries: &[PendingDeletion]) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }

    pub fn list(&self) -> AppResult<Vec<PendingDeletion>> {
        self.with_lock(|| self.read())
    }

    /// Add an entry; a second failure for the same asset refreshes the existing one
    pub fn record(&self, entry: PendingDeletion) -> AppResult<()> {
        self.with_lock(|| {
            let mut entries = self.read()?;
            match entries.iter_mut().find(|e| e.public_id == entry.public_id) {
                Some(existing) => *existing = entry,
                None => entries.push(entry),
            }
            self.write(&entries)
        })
    }

    /// Try every recorded deletion again, dropping the ones that now succeed
    /// and the ones that can never succeed. Returns how many were cleaned up.
    pub async fn retry_all(&self, deleter: &dyn MediaDeleter) -> AppResult<usize> {
        let entries = self.list()?;
        if entries.is_empty() {
            return Ok(0);
        }

        log::info!("Retrying {} pending remote deletions", entries.len());

        let mut cleaned = Vec::new();
        let mut abandoned = Vec::new();
        for entry in &entries {
            let reference = if entry.url.is_empty() {
                &entry.public_id
            } else {
                &entry.url
            };

            match deleter.delete(reference, entry.resource_type).await {
                Ok(()) => cleaned.push(entry.public_id.clone()),
                Err(e) if e.is_permanent() => {
                    log::warn!("Giving up on deleting {}: {}", entry.public_id, e);
                    abandoned.push(entry.public_id.clone());
                }
                Err(e) => log::warn!(
                    "Pending deletion of {} failed again (non-critical): {}",
                    entry.public_id,
                    e
                ),
            }
        }

        // Re-read so entries recorded while we were deleting are kept
        self.with_lock(|| {
            let remaining: Vec<PendingDeletion> = self
                .read()?
                .into_iter()
                .filter(|e| {
                    !cleaned.contains(&e.public_id) && !abandoned.contains(&e.public_id)
                })
                .collect();
            self.write(&remaining)
        })?;

        log::info!("Cleaned up {} pending remote deletions", cleaned.len());
        Ok(cleaned.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use async_trait::async_trait;

    fn entry(public_id: &str, error: &str) -> PendingDeletion {
        PendingDeletion {
            public_id: public_id.to_string(),
            resource_type: MediaKind::Image,
            url: format!("https://res.cloudinary.com/demo/image/upload/{}.jpg", public_id),
            error: error.to_string(),
            timestamp: Utc::now(),
        }
    }

    struct SelectiveDeleter;

    #[async_trait]
    impl MediaDeleter for SelectiveDeleter {
        async fn delete(&self, reference: &str, _kind: MediaKind) -> AppResult<()> {
            if reference.contains("keep") {
                Err(AppError::delete_failed("still failing"))
            } else if reference.contains("malformed") {
                Err(AppError::validation("reference", "Invalid Cloudinary URL"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_record_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = PendingDeletions::new(dir.path().join("ledger.json"));

        assert!(ledger.list().unwrap().is_empty());
        ledger.record(entry("cms/a", "timeout")).unwrap();
        ledger.record(entry("cms/b", "timeout")).unwrap();
        ledger.record(entry("cms/a", "HTTP 500")).unwrap();

        let entries = ledger.list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].error, "HTTP 500");
    }

    #[test]
    fn test_unreadable_ledger_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, "[{broken").unwrap();

        let ledger = PendingDeletions::new(&path);
        assert!(ledger.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_all_drops_permanent_failures() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = PendingDeletions::new(dir.path().join("ledger.json"));
        ledger.record(entry("cms/malformed", "bad url")).unwrap();
        ledger.record(entry("cms/keep", "timeout")).unwrap();

        let cleaned = ledger.retry_all(&SelectiveDeleter).await.unwrap();

        assert_eq!(cleaned, 0);
        let remaining = ledger.list().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].public_id, "cms/keep");
    }

    #[tokio::test]
    async fn test_retry_all_keeps_failures() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = PendingDeletions::new(dir.path().join("ledger.json"));
        ledger.record(entry("cms/gone", "timeout")).unwrap();
        ledger.record(entry("cms/keep", "timeout")).unwrap();

        let cleaned = ledger.retry_all(&SelectiveDeleter).await.unwrap();

        assert_eq!(cleaned, 1);
        let remaining = ledger.list().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].public_id, "cms/keep");
    }
}
