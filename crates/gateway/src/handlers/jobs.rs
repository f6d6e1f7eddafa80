//! Job history, status, download and delete handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use deckforge_common::{
    auth::CallerIdentity,
    db::models::{AnalysisJob, EmailStatus, JobStatus},
    errors::{AppError, Result},
    scoring::{Recommendation, ScoringResult},
};
use deckforge_pipeline::{BatchDeleteOutcome, DownloadLink, JobStatusView};

/// One row of the history list
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub original_name: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub slide_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_status: Option<EmailStatus>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl JobSummary {
    fn from_job(job: &AnalysisJob, analysis: Option<&ScoringResult>) -> Self {
        Self {
            job_id: job.id,
            original_name: job.original_name.clone(),
            status: job.job_status(),
            failure_reason: job.failure_reason.clone(),
            slide_count: job.slide_count,
            overall_score: analysis.map(|a| a.overall_score),
            recommendation: analysis.map(|a| a.recommendation),
            email_status: job.email_state(),
            created_at: job.created_at.to_rfc3339(),
            completed_at: job.completed_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct JobDetailResponse {
    #[serde(flatten)]
    pub summary: JobSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<ScoringResult>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BatchDeleteRequest {
    #[validate(length(min = 1, max = 100))]
    pub ids: Vec<Uuid>,
}

/// The caller's jobs, newest first
pub async fn list_jobs(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<JobListResponse>> {
    let jobs: Vec<JobSummary> = state
        .processor
        .history(&caller.user_id)
        .await?
        .iter()
        .map(|job| JobSummary::from_job(job, job.scoring_result().as_ref()))
        .collect();

    Ok(Json(JobListResponse {
        total: jobs.len(),
        jobs,
    }))
}

/// Full job including the stored analysis
pub async fn get_job(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobDetailResponse>> {
    let job = state.processor.job(&caller.user_id, job_id).await?;
    let analysis = job.scoring_result();

    Ok(Json(JobDetailResponse {
        summary: JobSummary::from_job(&job, analysis.as_ref()),
        analysis,
    }))
}

/// Status poll; ids the caller does not own read as PENDING
pub async fn get_job_status(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusView>> {
    let view = state.processor.status(&caller.user_id, job_id).await?;
    Ok(Json(view))
}

/// Short-lived link to the rendered report
pub async fn download_report(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(job_id): Path<Uuid>,
) -> Result<Json<DownloadLink>> {
    let link = state.processor.download_link(&caller.user_id, job_id).await?;
    Ok(Json(link))
}

pub async fn delete_job(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.processor.delete(&caller.user_id, job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_jobs(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(request): Json<BatchDeleteRequest>,
) -> Result<Json<BatchDeleteOutcome>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("ids".to_string()),
    })?;

    let outcome = state
        .processor
        .delete_many(&caller.user_id, &request.ids)
        .await?;
    Ok(Json(outcome))
}
