//! Blob storage for attachment files.
//!
//! The database keeps only a reference (a path relative to the media
//! directory); bytes live behind a [`BlobStore`].

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Subdirectory of the media directory holding attachment blobs.
pub const ATTACHMENTS_DIR: &str = "attachments";

/// URL prefix under which the media directory is served.
pub const MEDIA_URL: &str = "/media";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("invalid blob reference: {0}")]
    InvalidReference(String),
    #[error("blob i/o error for {reference}: {source}")]
    Io {
        reference: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    /// Stored reference, relative to the store root.
    pub name: String,
    pub size: u64,
}

pub trait BlobStore: Send + Sync {
    /// Store `bytes` under a fresh name derived from `name`.
    fn put(&self, name: &str, bytes: &[u8]) -> Result<BlobRef, BlobError>;

    /// Current byte length of a stored blob.
    fn size(&self, reference: &str) -> Result<u64, BlobError>;

    fn delete(&self, reference: &str) -> Result<(), BlobError>;

    /// Public URL for a stored blob.
    fn url(&self, reference: &str) -> String {
        let encoded: Vec<String> = reference
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/{}", MEDIA_URL, encoded.join("/"))
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let safe: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.trim_matches('.').is_empty() {
        "file".to_string()
    } else {
        safe
    }
}

/// Filename a blob was stored under, without directory or the unique prefix.
pub fn stored_file_name(reference: &str) -> String {
    let base = reference.rsplit('/').next().unwrap_or(reference);
    match base.split_once('_') {
        Some((prefix, rest))
            if prefix.len() == 32 && prefix.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            rest.to_string()
        }
        _ => base.to_string(),
    }
}

/// Filesystem-backed store rooted at the media directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(reference);
        let safe = !reference.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(BlobError::InvalidReference(reference.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(reference: &str, source: std::io::Error) -> BlobError {
    if source.kind() == ErrorKind::NotFound {
        BlobError::NotFound(reference.to_string())
    } else {
        BlobError::Io {
            reference: reference.to_string(),
            source,
        }
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<BlobRef, BlobError> {
        let file_name = format!("{}_{}", Uuid::new_v4().simple(), sanitize_file_name(name));
        let reference = format!("{}/{}", ATTACHMENTS_DIR, file_name);
        let path = self.resolve(&reference)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(&reference, e))?;
        }
        std::fs::write(&path, bytes).map_err(|e| io_error(&reference, e))?;

        Ok(BlobRef {
            name: reference,
            size: bytes.len() as u64,
        })
    }

    fn size(&self, reference: &str) -> Result<u64, BlobError> {
        let path = self.resolve(reference)?;
        let meta = std::fs::metadata(&path).map_err(|e| io_error(reference, e))?;
        Ok(meta.len())
    }

    fn delete(&self, reference: &str) -> Result<(), BlobError> {
        let path = self.resolve(reference)?;
        std::fs::remove_file(&path).map_err(|e| io_error(reference, e))
    }
}
