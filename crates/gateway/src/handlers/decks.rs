//! Deck submission handlers

use crate::AppState;
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    Json,
};
use deckforge_common::{
    auth::CallerIdentity,
    errors::{AppError, Result},
};
use deckforge_pipeline::{upload::MAX_UPLOAD_BYTES, DeckUpload, Submission, SubmissionOutcome};
use serde::Serialize;
use tracing::info;

/// Multipart field carrying the presentation
const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub file_name: String,
    pub slide_count: u32,
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge {
            size: MAX_UPLOAD_BYTES + 1,
            limit: MAX_UPLOAD_BYTES,
        }
    } else {
        AppError::Validation {
            message: format!("Malformed multipart body: {}", e.body_text()),
            field: Some(FILE_FIELD.to_string()),
        }
    }
}

/// Pull the `file` part out of a multipart body; other parts are ignored
async fn read_deck(multipart: std::result::Result<Multipart, MultipartRejection>) -> Result<DeckUpload> {
    let mut multipart = multipart.map_err(|e| AppError::Validation {
        message: e.body_text(),
        field: Some(FILE_FIELD.to_string()),
    })?;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .ok_or_else(|| AppError::Validation {
                message: "The file part must carry a file name".to_string(),
                field: Some(FILE_FIELD.to_string()),
            })?;
        let content_type = field.content_type().map(String::from);
        let bytes = field.bytes().await.map_err(multipart_error)?;

        return Ok(DeckUpload::new(file_name, content_type, bytes.to_vec()));
    }

    Err(AppError::Validation {
        message: "No presentation uploaded".to_string(),
        field: Some(FILE_FIELD.to_string()),
    })
}

/// Run the whole pipeline for one deck; responds once the job is COMPLETED or FAILED
pub async fn submit_deck(
    State(state): State<AppState>,
    caller: CallerIdentity,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<SubmissionOutcome>)> {
    let upload = read_deck(multipart).await?;

    info!(
        user = %caller.user_id,
        request_id = %caller.request_id,
        file = %upload.file_name,
        size = upload.bytes.len(),
        "Deck received"
    );

    let outcome = state
        .processor
        .process(Submission {
            owner_id: caller.user_id,
            notify_email: caller.email,
            upload,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(outcome)))
}

/// Check type, size and slide count without creating a job
pub async fn validate_deck(
    State(state): State<AppState>,
    _caller: CallerIdentity,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<ValidateResponse>> {
    let upload = read_deck(multipart).await?;
    let slide_count = state.processor.validate(&upload).await?;

    Ok(Json(ValidateResponse {
        valid: true,
        file_name: upload.file_name,
        slide_count,
    }))
}
