//! Object storage capability for binary attachments.

use crate::error::RemoteResult;
use serde::{Deserialize, Serialize};

/// One entry of a storage listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    /// Name relative to the listed prefix.
    pub name: String,
    /// Folders are listed so callers can descend into them.
    pub is_folder: bool,
    #[serde(default)]
    pub size: Option<u64>,
}

impl ObjectEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            is_folder: false,
            size: Some(size),
        }
    }

    pub fn folder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_folder: true,
            size: None,
        }
    }
}

/// Upload behavior.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Replace an existing object instead of failing with a conflict.
    pub overwrite: bool,
    pub content_type: Option<String>,
}

impl UploadOptions {
    pub fn overwrite(overwrite: bool) -> Self {
        Self {
            overwrite,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Object storage capability trait.
///
/// Uploading to an existing path without `overwrite` fails with an error of
/// class `Conflict`.
#[trait_variant::make(Send)]
pub trait ObjectStorage: Send + Sync {
    /// Direct children of `prefix` (`""` is the bucket root).
    async fn list(&self, bucket: &str, prefix: &str) -> RemoteResult<Vec<ObjectEntry>>;

    async fn download(&self, bucket: &str, path: &str) -> RemoteResult<Vec<u8>>;

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        options: &UploadOptions,
    ) -> RemoteResult<()>;
}

/// Join a listing prefix and an entry name into a full object path.
pub fn join_path(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Guess a content type from a file extension.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "pdf" => "application/pdf",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}
