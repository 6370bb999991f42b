//! Content-addressed image uploads.
//!
//! An image is stored under `<prefix>/<sha256-of-bytes>.<ext>`, so the same
//! bytes always land on the same key. Uploading something already present
//! is treated as success and simply reuses the existing public URL.

use std::collections::HashSet;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::backend::{StorageBackend, ERR_STORAGE_DUPLICATE};
use crate::security::hash_path;
use crate::{AppError, AppResult};

pub const ERR_READ_FAILED: &str = "UPLOAD/READ_FAILED";
pub const ERR_UNSUPPORTED_TYPE: &str = "UPLOAD/UNSUPPORTED_TYPE";

/// A file picked for upload, already read into memory.
#[derive(Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl std::fmt::Debug for SelectedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedFile")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .field("content_type", &self.content_type)
            .finish()
    }
}

impl SelectedFile {
    /// Build from in-memory bytes, sniffing the content type.
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> AppResult<Self> {
        let name = name.into();
        let content_type = detect_content_type(&name, &bytes);
        if !content_type.starts_with("image/") {
            return Err(AppError::new(ERR_UNSUPPORTED_TYPE, "Only image files can be uploaded")
                .with_context("file", name)
                .with_context("content_type", content_type));
        }
        Ok(Self {
            name,
            bytes,
            content_type,
        })
    }

    pub async fn from_path(path: &Path) -> AppResult<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            AppError::new(ERR_READ_FAILED, "Could not read the selected file")
                .with_context("path_hash", hash_path(path))
                .with_cause(err)
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(name, bytes)
    }

    pub fn content_hash(&self) -> String {
        content_hash(&self.bytes)
    }

    pub fn extension(&self) -> String {
        file_extension(&self.name)
    }

    pub fn object_path(&self, prefix: &str) -> String {
        object_path(prefix, &self.content_hash(), &self.extension())
    }
}

/// Magic bytes first, file extension as the fallback.
pub fn detect_content_type(name: &str, bytes: &[u8]) -> String {
    if let Some(kind) = infer::get(bytes) {
        return kind.mime_type().to_string();
    }
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    format!("{:x}", h.finalize())
}

/// Text after the last `.` of the name, lowercased. A name without a dot
/// yields the whole name.
pub fn file_extension(name: &str) -> String {
    name.rsplit('.').next().unwrap_or(name).to_lowercase()
}

pub fn object_path(prefix: &str, hash: &str, extension: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{hash}.{extension}")
    } else {
        format!("{prefix}/{hash}.{extension}")
    }
}

/// Upload `files` in order and return one public URL per distinct object.
///
/// Files with identical content inside the batch are uploaded once. An
/// object that already exists in the bucket is reused as-is. Any other
/// failure aborts the batch.
pub async fn upload_images<S: StorageBackend>(
    storage: &S,
    bucket: &str,
    prefix: &str,
    files: &[SelectedFile],
) -> AppResult<Vec<String>> {
    let mut seen = HashSet::new();
    let mut urls = Vec::with_capacity(files.len());

    for file in files {
        let hash = file.content_hash();
        if !seen.insert(hash.clone()) {
            debug!(target: "stockroom", event = "upload_skipped_in_batch", hash = hash.as_str());
            continue;
        }
        let path = object_path(prefix, &hash, &file.extension());

        match storage
            .upload(bucket, &path, &file.bytes, &file.content_type)
            .await
        {
            Ok(()) => {
                info!(
                    target: "stockroom",
                    event = "image_uploaded",
                    bucket = bucket,
                    path = path.as_str(),
                    bytes = file.bytes.len()
                );
            }
            Err(err) if err.is(ERR_STORAGE_DUPLICATE) => {
                info!(
                    target: "stockroom",
                    event = "image_deduplicated",
                    bucket = bucket,
                    path = path.as_str()
                );
            }
            Err(err) => {
                let message = format!("Upload failed: {}", err.message());
                return Err(err.with_message(message).with_context("path", path));
            }
        }

        urls.push(storage.public_url(bucket, &path));
    }

    Ok(urls)
}

/// Storage keys for the given public URLs; URLs that do not belong to the
/// bucket are skipped.
pub fn object_paths_for_urls<S: StorageBackend>(
    storage: &S,
    bucket: &str,
    urls: &[String],
) -> Vec<String> {
    urls.iter()
        .filter_map(|url| {
            let path = storage.object_path(bucket, url);
            if path.is_none() {
                debug!(target: "stockroom", event = "foreign_image_url", url = url.as_str());
            }
            path
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn hash_matches_known_vector() {
        assert_eq!(
            content_hash(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn extension_is_last_segment_lowercased() {
        assert_eq!(file_extension("photo.JPG"), "jpg");
        assert_eq!(file_extension("archive.tar.gz"), "gz");
        assert_eq!(file_extension("README"), "readme");
    }

    #[test]
    fn object_path_joins_prefix() {
        assert_eq!(object_path("public", "abc", "png"), "public/abc.png");
        assert_eq!(object_path("/public/", "abc", "png"), "public/abc.png");
        assert_eq!(object_path("", "abc", "png"), "abc.png");
    }

    #[test]
    fn same_bytes_share_a_key_regardless_of_name() {
        let a = SelectedFile::new("a.png", PNG_MAGIC.to_vec()).unwrap();
        let b = SelectedFile::new("b.png", PNG_MAGIC.to_vec()).unwrap();
        assert_eq!(a.object_path("public"), b.object_path("public"));
    }

    #[test]
    fn sniffs_png_even_with_wrong_extension() {
        let file = SelectedFile::new("picture.txt", PNG_MAGIC.to_vec()).unwrap();
        assert_eq!(file.content_type, "image/png");
    }

    #[test]
    fn falls_back_to_extension_when_bytes_are_unknown() {
        assert_eq!(detect_content_type("shot.jpeg", b"??"), "image/jpeg");
        assert_eq!(
            detect_content_type("unknown", b"??"),
            "application/octet-stream"
        );
    }

    #[test]
    fn rejects_non_images() {
        let err = SelectedFile::new("notes.txt", b"plain text".to_vec()).unwrap_err();
        assert_eq!(err.code(), ERR_UNSUPPORTED_TYPE);
        assert_eq!(err.context().get("content_type"), Some(&"text/plain".to_string()));
    }

    #[test]
    fn debug_does_not_dump_bytes() {
        let file = SelectedFile::new("a.png", PNG_MAGIC.to_vec()).unwrap();
        let rendered = format!("{file:?}");
        assert!(rendered.contains("len: 12"));
    }
}
