//! Attachment metadata derived on save, plus display helpers.

use crate::blob::{BlobStore, stored_file_name};
use crate::types::{Attachment, FileType};
use tracing::debug;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "txt", "xls", "xlsx"];
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "tar.gz"];

/// Classify a filename by extension, case-insensitively.
/// Multi-part extensions (`tar.gz`) are matched against the full suffix.
pub fn classify(file_name: &str) -> FileType {
    let lower = file_name.to_lowercase();
    let has_ext = |exts: &[&str]| {
        exts.iter().any(|ext| {
            lower
                .strip_suffix(ext)
                .is_some_and(|stem| stem.ends_with('.') && stem.len() > 1)
        })
    };

    if has_ext(IMAGE_EXTENSIONS) {
        FileType::Image
    } else if has_ext(DOCUMENT_EXTENSIONS) {
        FileType::Document
    } else if has_ext(ARCHIVE_EXTENSIONS) {
        FileType::Archive
    } else {
        FileType::Other
    }
}

/// Fill derived fields before an attachment is written.
///
/// Runs on every save: the original name and file type are filled only when
/// unset, the size is always re-read from the blob (0 if unreadable).
pub fn prepare_for_save(attachment: &mut Attachment, blobs: &dyn BlobStore) {
    if attachment.file.is_empty() {
        return;
    }

    if attachment.original_name.is_empty() {
        attachment.original_name = stored_file_name(&attachment.file);
    }

    if attachment.file_type.is_none() {
        attachment.file_type = Some(classify(&attachment.original_name));
    }

    attachment.file_size = match blobs.size(&attachment.file) {
        Ok(size) => i64::try_from(size).unwrap_or(i64::MAX),
        Err(e) => {
            debug!(file = %attachment.file, error = %e, "Blob unreadable, recording size 0");
            0
        }
    };
}

pub fn file_icon(file_type: Option<FileType>) -> &'static str {
    match file_type {
        Some(FileType::Image) => "🖼️",
        Some(FileType::Document) => "📄",
        Some(FileType::Archive) => "🗜️",
        Some(FileType::Other) | None => "📎",
    }
}

/// Human-readable size with binary thresholds: `512 B`, `1.5 KB`, `2.0 MB`.
pub fn readable_size(bytes: i64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;

    let size = bytes.max(0) as f64;
    if size < KB {
        format!("{} B", bytes.max(0))
    } else if size < MB {
        format!("{:.1} KB", size / KB)
    } else {
        format!("{:.1} MB", size / MB)
    }
}
