use anyhow::Context;
use clap::{CommandFactory, Parser};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use media_slot_uploader::config;
use media_slot_uploader::media::{MediaRef, UploadFile};
use media_slot_uploader::security::InputValidator;
use media_slot_uploader::uploader::{
    CloudinaryClient, LogNotifier, MediaDeleter, MediaUploader, PendingDeletions,
    UploadCoordinator,
};

#[derive(Parser, Debug)]
#[command(
    name = "media-slot-uploader",
    about = "Upload media files into an ordered slot list, one at a time"
)]
struct Cli {
    /// JSON array of slot URLs (null for empty slots); read at start, written at the end
    #[arg(long, value_name = "PATH", env = "MEDIA_SLOTS_FILE")]
    slots: Option<PathBuf>,

    /// Queue every failed slot once more after the first pass
    #[arg(long)]
    retry_failed: bool,

    /// Files to append as new slots, in order
    files: Vec<String>,
}

/// Slots are stored as a JSON array of URLs, with `null` for empty slots
fn load_slots(path: &Path) -> anyhow::Result<Vec<MediaRef>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let values: Vec<Option<String>> = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a JSON array of URLs", path.display()))?;

    Ok(values
        .into_iter()
        .map(|value| value.map(MediaRef::from).unwrap_or(MediaRef::Empty))
        .collect())
}

fn save_slots(path: &Path, slots: &[MediaRef]) -> anyhow::Result<()> {
    fs::write(path, serde_json::to_string_pretty(slots)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    log::info!("Saved {} slots to {}", slots.len(), path.display());
    Ok(())
}

async fn wait_or_interrupt(coordinator: &UploadCoordinator) -> bool {
    tokio::select! {
        _ = coordinator.wait_until_idle() => true,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Interrupted, cancelling the current upload");
            coordinator.cancel_current();
            false
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let config = config::load_config().context("failed to load configuration")?;

    env_logger::Builder::new()
        .filter_level(config.log_filter())
        .parse_default_env()
        .init();

    log::info!("Starting Media Slot Uploader");

    if args.files.is_empty() && !args.retry_failed {
        Cli::command().print_help()?;
        return Ok(());
    }

    let ledger = Arc::new(PendingDeletions::in_data_dir()?);
    let client = Arc::new(
        CloudinaryClient::new(
            config.cloudinary.clone(),
            &config.uploader_name,
            &config.upload_context,
        )?
        .with_remote_marker(&config.remote_marker)
        .with_ledger(ledger.clone()),
    );

    match ledger.retry_all(client.as_ref()).await {
        Ok(0) => {}
        Ok(cleaned) => log::info!("Cleaned up {} leftover remote assets", cleaned),
        Err(e) => log::warn!("Could not process pending deletions: {}", e),
    }

    let initial = match &args.slots {
        Some(path) => load_slots(path)?,
        None => Vec::new(),
    };
    let mut next_index = initial.len();

    let uploader: Arc<dyn MediaUploader> = client.clone();
    let deleter: Arc<dyn MediaDeleter> = client;
    let coordinator = UploadCoordinator::new(
        initial,
        Some(uploader),
        deleter,
        Arc::new(LogNotifier),
        config.queue_settings(),
    );

    for path in &args.files {
        let file = match UploadFile::from_path(path).await {
            Ok(file) => file,
            Err(e) => {
                log::error!("Skipping {}: {}", path, e);
                continue;
            }
        };

        if let Err(e) = InputValidator::validate_upload_file(&file, config.max_upload_size_mb) {
            log::error!("Skipping {}: {}", path, e);
            continue;
        }

        coordinator.enqueue(file, next_index);
        next_index += 1;
    }

    let mut finished = wait_or_interrupt(&coordinator).await;

    if finished && args.retry_failed {
        let retried = coordinator.retry_all_failed();
        if retried > 0 {
            log::info!("Retrying {} failed uploads", retried);
            finished = wait_or_interrupt(&coordinator).await;
        }
    }

    let snapshot = coordinator.snapshot();
    if let Some(path) = &args.slots {
        save_slots(path, &snapshot.slots)?;
    }
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    if !finished {
        anyhow::bail!("interrupted before the queue finished");
    }

    let failed = snapshot.failed_slots();
    if !failed.is_empty() {
        anyhow::bail!("{} upload(s) failed (slots {:?})", failed.len(), failed);
    }

    Ok(())
}
