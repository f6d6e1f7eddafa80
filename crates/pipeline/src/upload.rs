//! Upload validation and temporary staging
//!
//! Everything here runs before a job exists: a rejected upload leaves no
//! trace in the job store or object storage.

use deckforge_common::errors::{AppError, Result, SlideBound};
use deckforge_common::storage::sanitize_segment;
use std::path::Path;
use tempfile::TempPath;
use tracing::debug;

/// Largest accepted deck, in bytes
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Inclusive slide count bounds
pub const MIN_SLIDES: u32 = 5;
pub const MAX_SLIDES: u32 = 35;

pub const ALLOWED_EXTENSIONS: [&str; 2] = ["ppt", "pptx"];

pub const ALLOWED_MIME_TYPES: [&str; 2] = [
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

/// A deck as received from the client
#[derive(Debug, Clone)]
pub struct DeckUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl DeckUpload {
    pub fn new(file_name: impl Into<String>, content_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type,
            bytes,
        }
    }
}

/// Lower-cased extension of a file name, if any
fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Check file type, MIME type and size
pub fn validate_upload(upload: &DeckUpload) -> Result<()> {
    let ext = extension(&upload.file_name).unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(AppError::InvalidFileType {
            message: format!(
                "'{}' is not a PowerPoint file; only .ppt and .pptx are accepted",
                upload.file_name
            ),
        });
    }

    let mime = upload
        .content_type
        .as_deref()
        .map(|m| m.split(';').next().unwrap_or(m).trim().to_ascii_lowercase());
    match mime {
        Some(ref m) if ALLOWED_MIME_TYPES.contains(&m.as_str()) => {}
        other => {
            return Err(AppError::InvalidFileType {
                message: format!(
                    "Unsupported content type '{}'; expected a PowerPoint presentation",
                    other.unwrap_or_else(|| "none".to_string())
                ),
            });
        }
    }

    if upload.bytes.is_empty() {
        return Err(AppError::Validation {
            message: "The uploaded file is empty".to_string(),
            field: Some("file".to_string()),
        });
    }

    if upload.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(AppError::PayloadTooLarge {
            size: upload.bytes.len(),
            limit: MAX_UPLOAD_BYTES,
        });
    }

    Ok(())
}

/// Reject slide counts outside `[MIN_SLIDES, MAX_SLIDES]`
pub fn check_slide_count(count: u32) -> Result<()> {
    let bound = if count < MIN_SLIDES {
        SlideBound::TooLow
    } else if count > MAX_SLIDES {
        SlideBound::TooHigh
    } else {
        return Ok(());
    };

    Err(AppError::SlideCountOutOfRange {
        count,
        min: MIN_SLIDES,
        max: MAX_SLIDES,
        bound,
    })
}

/// Base name of a client-supplied path, made safe for keys and filenames
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    sanitize_segment(base)
}

/// Suggested download name for a job's report: `{stem}-analysis.pdf`
pub fn report_file_name(original_name: &str) -> String {
    let sanitized = sanitize_file_name(original_name);
    let stem = Path::new(&sanitized)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("pitch-deck");
    format!("{}-analysis.pdf", stem)
}

/// An upload written to a temp file; the file is removed when this is dropped
pub struct StagedDeck {
    path: TempPath,
    pub file_name: String,
    pub content_type: String,
    pub size: usize,
}

impl StagedDeck {
    /// Write the upload under `dir`
    pub async fn stage(dir: &Path, upload: &DeckUpload) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let file_name = sanitize_file_name(&upload.file_name);
        let suffix = format!(".{}", extension(&file_name).unwrap_or_else(|| "pptx".to_string()));

        let path = tempfile::Builder::new()
            .prefix("deck-")
            .suffix(&suffix)
            .tempfile_in(dir)?
            .into_temp_path();
        tokio::fs::write(&path, &upload.bytes).await?;

        debug!(path = %path.display(), size = upload.bytes.len(), "Deck staged");

        Ok(Self {
            path,
            file_name,
            content_type: upload
                .content_type
                .clone()
                .unwrap_or_else(|| ALLOWED_MIME_TYPES[1].to_string()),
            size: upload.bytes.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
