use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{AppError, AppResult};
use crate::media::MediaKind;
use crate::uploader::upload_queue::QueueSettings;

const APP_DIR_NAME: &str = "Media Slot Uploader";

/// Cloud name and preset pair for one resource type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloudinaryAccount {
    pub cloud_name: String,
    pub upload_preset: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub upload_preset: String,
    pub images: Option<CloudinaryAccount>,
    pub videos: Option<CloudinaryAccount>,
    pub api_base: String,
    pub folder: String,
    pub delete_endpoint: Option<String>,
    pub delete_token: Option<String>,
}

impl Default for CloudinaryConfig {
    fn default() -> Self {
        Self {
            cloud_name: "demo".to_string(),
            upload_preset: "docs_upload_example_us_preset".to_string(),
            images: None,
            videos: None,
            api_base: "https://api.cloudinary.com".to_string(),
            folder: "cms/general".to_string(),
            delete_endpoint: None,
            delete_token: None,
        }
    }
}

impl CloudinaryConfig {
    /// Resolve the account for a resource type, falling back to the legacy
    /// top-level cloud name and preset.
    pub fn account_for(&self, kind: MediaKind) -> CloudinaryAccount {
        let specific = match kind {
            MediaKind::Image => self.images.as_ref(),
            MediaKind::Video => self.videos.as_ref(),
        };

        match specific {
            Some(account)
                if !account.cloud_name.trim().is_empty()
                    && !account.upload_preset.trim().is_empty() =>
            {
                account.clone()
            }
            _ => CloudinaryAccount {
                cloud_name: self.cloud_name.clone(),
                upload_preset: self.upload_preset.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub cloudinary: CloudinaryConfig,
    pub uploader_name: String,
    pub upload_context: String,
    pub min_visible_duration_ms: u64,
    pub completion_grace_ms: u64,
    pub upload_timeout_secs: Option<u64>,
    pub max_upload_size_mb: u64,
    pub remote_marker: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cloudinary: CloudinaryConfig::default(),
            uploader_name: "editor".to_string(),
            upload_context: "banner".to_string(),
            min_visible_duration_ms: 5000,
            completion_grace_ms: 500,
            upload_timeout_secs: None,
            max_upload_size_mb: 10,
            remote_marker: "cloudinary.com".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            min_visible_duration: Duration::from_millis(self.min_visible_duration_ms),
            completion_grace: Duration::from_millis(self.completion_grace_ms),
            upload_timeout: self.upload_timeout_secs.map(Duration::from_secs),
            remote_marker: self.remote_marker.clone(),
        }
    }

    pub fn log_filter(&self) -> log::LevelFilter {
        self.log_level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }
}

fn get_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join(APP_DIR_NAME);

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir.join("config.json"))
}

pub fn get_data_directory() -> AppResult<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| AppError::Config("Could not find data directory".to_string()))?
        .join(APP_DIR_NAME);

    fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}

pub fn load_config() -> AppResult<Config> {
    load_config_from(&get_config_path()?)
}

pub fn load_config_from(config_path: &Path) -> AppResult<Config> {
    if config_path.exists() {
        let config_str = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_str).unwrap_or_else(|e| {
            log::warn!("Failed to parse config file: {}. Using defaults.", e);
            Config::default()
        });

        validate_config(&config)?;
        Ok(config)
    } else {
        let default_config = Config::default();
        save_config_to(&default_config, config_path)?;
        Ok(default_config)
    }
}

pub fn save_config_to(config: &Config, config_path: &Path) -> AppResult<()> {
    validate_config(config)?;

    if config_path.exists() {
        let backup_path = config_path.with_extension("json.bak");
        if let Err(e) = fs::copy(config_path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(config_path, config_str)?;

    log::info!("Configuration saved to {}", config_path.display());
    Ok(())
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    if config.cloudinary.cloud_name.trim().is_empty() {
        return Err(AppError::validation("cloudinary.cloud_name", "Cannot be empty"));
    }

    if config.cloudinary.upload_preset.trim().is_empty() {
        return Err(AppError::validation("cloudinary.upload_preset", "Cannot be empty"));
    }

    if !config.cloudinary.api_base.starts_with("http") {
        return Err(AppError::validation("cloudinary.api_base", "Must be an http(s) URL"));
    }

    if let Some(endpoint) = &config.cloudinary.delete_endpoint {
        if !endpoint.starts_with("http") {
            return Err(AppError::validation(
                "cloudinary.delete_endpoint",
                "Must be an http(s) URL",
            ));
        }
    }

    if config.max_upload_size_mb == 0 || config.max_upload_size_mb > 100 {
        return Err(AppError::validation("max_upload_size_mb", "Must be between 1 and 100"));
    }

    if config.min_visible_duration_ms > 60_000 {
        return Err(AppError::validation(
            "min_visible_duration_ms",
            "Must be 60000ms or less",
        ));
    }

    if config.completion_grace_ms > 10_000 {
        return Err(AppError::validation("completion_grace_ms", "Must be 10000ms or less"));
    }

    if config.upload_timeout_secs == Some(0) {
        return Err(AppError::validation("upload_timeout_secs", "Must be greater than 0"));
    }

    if config.remote_marker.trim().is_empty() {
        return Err(AppError::validation("remote_marker", "Cannot be empty"));
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}
