//! Job persistence contract shared by the Postgres repository and the
//! in-memory store

use crate::db::models::{AnalysisJob, EmailStatus, JobStatus};
use crate::errors::{AppError, Result};
use crate::scoring::ScoringResult;
use async_trait::async_trait;
use uuid::Uuid;

/// Upper bound on stored failure reasons, in characters
pub const MAX_FAILURE_REASON_CHARS: usize = 500;

/// Fields supplied when a job is first created
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Uuid,
    pub owner_id: String,
    pub source_key: String,
    pub original_name: String,
    pub slide_count: i32,
    pub notify_email: Option<String>,
}

/// Persistence operations for analysis jobs.
///
/// Every status change goes through the [`JobStatus`] transition table;
/// a disallowed move fails with `AppError::InvalidTransition` and leaves
/// the row untouched.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in PENDING
    async fn create_job(&self, job: NewJob) -> Result<AnalysisJob>;

    async fn find_job(&self, id: Uuid) -> Result<Option<AnalysisJob>>;

    /// Find a job only if it belongs to `owner_id`
    async fn find_owned_job(&self, id: Uuid, owner_id: &str) -> Result<Option<AnalysisJob>>;

    /// All jobs of one owner, newest first
    async fn list_jobs(&self, owner_id: &str) -> Result<Vec<AnalysisJob>>;

    /// Advance to the next pipeline stage
    async fn set_status(&self, id: Uuid, status: JobStatus) -> Result<AnalysisJob>;

    /// Move to FAILED, storing a truncated reason
    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<AnalysisJob>;

    /// Store the validated analysis without changing status
    async fn attach_analysis(&self, id: Uuid, analysis: &ScoringResult) -> Result<AnalysisJob>;

    /// Move to COMPLETED and record the report key in the same write
    async fn mark_completed(&self, id: Uuid, report_key: &str) -> Result<AnalysisJob>;

    /// Move COMPLETED to FILE_UNAVAILABLE and clear the report key
    async fn mark_file_unavailable(&self, id: Uuid) -> Result<AnalysisJob>;

    async fn set_email_status(
        &self,
        id: Uuid,
        status: EmailStatus,
        failure_reason: Option<&str>,
    ) -> Result<AnalysisJob>;

    /// Hard delete; returns false when no job with that id belongs to `owner_id`
    async fn delete_owned_job(&self, id: Uuid, owner_id: &str) -> Result<bool>;

    async fn ping(&self) -> Result<()>;
}

/// Cut a failure reason down to [`MAX_FAILURE_REASON_CHARS`] characters
pub fn truncate_reason(reason: &str) -> String {
    match reason.char_indices().nth(MAX_FAILURE_REASON_CHARS) {
        Some((byte_idx, _)) => reason[..byte_idx].to_string(),
        None => reason.to_string(),
    }
}

/// Reject any status move outside the transition table
pub(crate) fn check_transition(job: &AnalysisJob, next: JobStatus) -> Result<()> {
    let current = job.job_status();
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition {
            id: job.id.to_string(),
            from: current.to_string(),
            to: next.to_string(),
        })
    }
}
