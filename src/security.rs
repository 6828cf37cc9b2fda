use regex::Regex;
use std::sync::OnceLock;

use crate::errors::{AppError, AppResult};
use crate::media::{MediaKind, UploadFile};

pub struct InputValidator;

fn unsafe_filename_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("filename pattern is valid")
    })
}

fn non_public_id_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^a-z0-9]").expect("public id pattern is valid"))
}

impl InputValidator {
    /// Check a picked file before it enters the upload queue
    pub fn validate_upload_file(file: &UploadFile, max_size_mb: u64) -> AppResult<()> {
        if file.bytes.is_empty() {
            return Err(AppError::validation("file", "File is empty"));
        }

        if file.size() > max_size_mb * 1024 * 1024 {
            return Err(AppError::file_too_large(&file.name, max_size_mb));
        }

        let mime = file.mime_type.as_str();
        if !(mime.starts_with("image/") || mime.starts_with("video/")) {
            return Err(AppError::invalid_file_type(&file.name, mime));
        }

        // Sniff the header so a renamed document is not accepted as an image
        if file.kind() == MediaKind::Image {
            image::guess_format(&file.bytes)?;
        }

        Ok(())
    }

    pub fn sanitize_filename(filename: &str) -> String {
        let sanitized = unsafe_filename_chars().replace_all(filename.trim(), "_");

        if sanitized.chars().count() > 255 {
            format!("{}...", sanitized.chars().take(252).collect::<String>())
        } else {
            sanitized.to_string()
        }
    }

    /// Lowercase and replace everything outside `[a-z0-9]` with `_`
    pub fn sanitize_public_id_component(value: &str) -> String {
        non_public_id_chars()
            .replace_all(&value.trim().to_lowercase(), "_")
            .to_string()
    }
}
