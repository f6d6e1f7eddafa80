//! Signed report downloads for the local object store
//!
//! S3 presigned URLs point at the bucket directly; with the local backend the
//! gateway serves `/v1/files/{*key}` itself after checking the signature.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::debug;

use crate::AppState;
use deckforge_common::{
    errors::{AppError, Result},
    storage::{ObjectStore, PDF_CONTENT_TYPE},
};

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub filename: String,
    pub signature: String,
}

pub async fn serve_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<Response> {
    let store = state.local_files.as_ref().ok_or_else(|| AppError::ObjectNotFound {
        key: key.clone(),
    })?;

    store.verify(&key, query.expires, &query.filename, &query.signature)?;
    let bytes = store.get_bytes(&key).await?;
    debug!(key = %key, size = bytes.len(), "Serving signed file");

    let content_type = if key.ends_with(".pdf") {
        PDF_CONTENT_TYPE
    } else {
        "application/octet-stream"
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", query.filename),
            ),
            (header::CACHE_CONTROL, "private, no-store".to_string()),
        ],
        bytes,
    )
        .into_response())
}
