use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

use crate::errors::AppResult;

const PREVIEW_SCHEME: &str = "blob:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("video/") {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }

    /// Resource type of an already uploaded asset, judged by its delivery URL
    pub fn from_reference(reference: &str) -> Self {
        if reference.contains("/video/upload/") {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

/// Raw payload picked by the user, not yet uploaded
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub async fn from_path(file_path: &str) -> AppResult<Self> {
        let bytes = tokio::fs::read(file_path).await?;
        let path = Path::new(file_path);
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        Ok(Self::new(name, mime_from_extension(path), bytes))
    }

    pub fn kind(&self) -> MediaKind {
        MediaKind::from_mime(&self.mime_type)
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Guess a MIME type from the file extension
pub fn mime_from_extension(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        _ => "application/octet-stream",
    }
}

/// Stable identity of a slot, independent of its current position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub(crate) u64);

/// Value held by a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MediaRef {
    Empty,
    LocalPreview(String),
    Remote(String),
}

impl MediaRef {
    pub fn new_preview() -> Self {
        MediaRef::LocalPreview(format!("{}local/{}", PREVIEW_SCHEME, uuid::Uuid::new_v4()))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, MediaRef::Empty)
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, MediaRef::Remote(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MediaRef::Empty => None,
            MediaRef::LocalPreview(handle) => Some(handle),
            MediaRef::Remote(url) => Some(url),
        }
    }

    /// A durable reference that lives on the hosting provider identified by `marker`
    pub fn is_hosted(&self, marker: &str) -> bool {
        match self {
            MediaRef::Remote(url) => url.contains(marker),
            _ => false,
        }
    }
}

impl From<String> for MediaRef {
    fn from(value: String) -> Self {
        if value.trim().is_empty() {
            MediaRef::Empty
        } else if value.starts_with(PREVIEW_SCHEME) {
            MediaRef::LocalPreview(value)
        } else {
            MediaRef::Remote(value)
        }
    }
}

impl From<&str> for MediaRef {
    fn from(value: &str) -> Self {
        MediaRef::from(value.to_string())
    }
}

fn public_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"/upload/(?:v\d+/)?(.*?)(?:\.[^./]+)?$").expect("public id pattern is valid")
    })
}

/// Extract the Cloudinary public id from a delivery URL served from a host
/// containing `marker`.
///
/// `https://res.cloudinary.com/demo/image/upload/v1234/folder/file.jpg` yields `folder/file`.
pub fn extract_public_id(url: &str, marker: &str) -> Option<String> {
    if !url.contains(marker) {
        return None;
    }

    let without_query = url.split('?').next().unwrap_or(url);
    let public_id = public_id_pattern()
        .captures(without_query)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())?;

    if public_id.is_empty() {
        log::warn!("Failed to extract public_id from URL: {}", url);
        return None;
    }

    Some(public_id)
}
