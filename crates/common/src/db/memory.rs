//! In-process job store backed by a `RwLock`ed map.
//!
//! Used by tests and when `database.url = "memory"`. Every write replaces
//! the whole row under the write lock, so concurrent pollers only ever see
//! complete rows.

use crate::db::models::{AnalysisJob, EmailStatus, JobStatus};
use crate::db::store::{check_transition, truncate_reason, JobStore, NewJob};
use crate::errors::{AppError, Result};
use crate::scoring::ScoringResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

struct Entry {
    seq: u64,
    job: AnalysisJob,
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Entry>>,
    next_seq: AtomicU64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` to one row under the write lock and return the updated copy
    async fn update<F>(&self, id: Uuid, f: F) -> Result<AnalysisJob>
    where
        F: FnOnce(&mut AnalysisJob) -> Result<()>,
    {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::JobNotFound { id: id.to_string() })?;

        // Work on a copy so a rejected change leaves the row untouched
        let mut job = entry.job.clone();
        f(&mut job)?;
        job.updated_at = chrono::Utc::now().into();
        entry.job = job.clone();
        Ok(job)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, new: NewJob) -> Result<AnalysisJob> {
        let now = chrono::Utc::now();
        let job = AnalysisJob {
            id: new.id,
            owner_id: new.owner_id,
            source_key: new.source_key,
            original_name: new.original_name,
            status: JobStatus::Pending.to_string(),
            failure_reason: None,
            analysis: None,
            report_key: None,
            notify_email: new.notify_email,
            email_status: None,
            email_failure_reason: None,
            slide_count: new.slide_count,
            created_at: now.into(),
            updated_at: now.into(),
            completed_at: None,
        };

        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(AppError::Internal {
                message: format!("job {} already exists", job.id),
            });
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        jobs.insert(job.id, Entry { seq, job: job.clone() });
        Ok(job)
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<AnalysisJob>> {
        Ok(self.jobs.read().await.get(&id).map(|e| e.job.clone()))
    }

    async fn find_owned_job(&self, id: Uuid, owner_id: &str) -> Result<Option<AnalysisJob>> {
        Ok(self
            .jobs
            .read()
            .await
            .get(&id)
            .filter(|e| e.job.owner_id == owner_id)
            .map(|e| e.job.clone()))
    }

    async fn list_jobs(&self, owner_id: &str) -> Result<Vec<AnalysisJob>> {
        let jobs = self.jobs.read().await;
        let mut owned: Vec<&Entry> = jobs
            .values()
            .filter(|e| e.job.owner_id == owner_id)
            .collect();
        owned.sort_by(|a, b| {
            b.job
                .created_at
                .cmp(&a.job.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        Ok(owned.into_iter().map(|e| e.job.clone()).collect())
    }

    async fn set_status(&self, id: Uuid, status: JobStatus) -> Result<AnalysisJob> {
        if status.is_terminal() {
            return Err(AppError::Internal {
                message: format!("{} must be set through its dedicated operation", status),
            });
        }
        self.update(id, |job| {
            check_transition(job, status)?;
            job.status = status.to_string();
            Ok(())
        })
        .await
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<AnalysisJob> {
        let reason = truncate_reason(reason);
        self.update(id, |job| {
            check_transition(job, JobStatus::Failed)?;
            job.status = JobStatus::Failed.to_string();
            job.failure_reason = Some(reason);
            job.report_key = None;
            job.completed_at = Some(chrono::Utc::now().into());
            Ok(())
        })
        .await
    }

    async fn attach_analysis(&self, id: Uuid, analysis: &ScoringResult) -> Result<AnalysisJob> {
        let value = serde_json::to_value(analysis)?;
        self.update(id, |job| {
            job.analysis = Some(value);
            Ok(())
        })
        .await
    }

    async fn mark_completed(&self, id: Uuid, report_key: &str) -> Result<AnalysisJob> {
        self.update(id, |job| {
            check_transition(job, JobStatus::Completed)?;
            job.status = JobStatus::Completed.to_string();
            job.report_key = Some(report_key.to_string());
            job.completed_at = Some(chrono::Utc::now().into());
            Ok(())
        })
        .await
    }

    async fn mark_file_unavailable(&self, id: Uuid) -> Result<AnalysisJob> {
        self.update(id, |job| {
            check_transition(job, JobStatus::FileUnavailable)?;
            job.status = JobStatus::FileUnavailable.to_string();
            job.report_key = None;
            Ok(())
        })
        .await
    }

    async fn set_email_status(
        &self,
        id: Uuid,
        status: EmailStatus,
        failure_reason: Option<&str>,
    ) -> Result<AnalysisJob> {
        let reason = failure_reason.map(truncate_reason);
        self.update(id, |job| {
            job.email_status = Some(status.as_str().to_string());
            job.email_failure_reason = reason;
            Ok(())
        })
        .await
    }

    async fn delete_owned_job(&self, id: Uuid, owner_id: &str) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get(&id) {
            Some(e) if e.job.owner_id == owner_id => {
                jobs.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
