//! Deck processing pipeline
//!
//! One submission runs every stage in order on the caller's task:
//!
//! ```text
//! validate -> stage to temp -> count slides -> create job (PENDING)
//!   -> UPLOADING_DECK -> EXTRACTING_TEXT -> ANALYZING_AI -> SAVING_ANALYSIS
//!   -> GENERATING_PDF -> UPLOADING_PDF -> COMPLETED -> completion email
//! ```
//!
//! Each status is persisted before its stage runs. A failing stage marks the
//! job FAILED with a reason naming the stage and the caller receives
//! [`AppError::StageFailed`]. Temp files are removed on every path.

use crate::analysis::AnalysisClient;
use crate::errors::PipelineError;
use crate::extraction::{ProcessExtractor, SlideExtractor};
use crate::notify::Notifier;
use crate::report::{ReportMeta, ReportRenderer};
use crate::upload::{check_slide_count, report_file_name, validate_upload, DeckUpload, StagedDeck};
use chrono::{DateTime, Utc};
use deckforge_common::config::AppConfig;
use deckforge_common::db::models::{AnalysisJob, JobStatus};
use deckforge_common::db::{JobStore, NewJob};
use deckforge_common::errors::{AppError, Result};
use deckforge_common::metrics;
use deckforge_common::scoring::{Recommendation, ScoringResult};
use deckforge_common::storage::{self, ObjectStore, PDF_CONTENT_TYPE};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// One deck submitted by a caller
#[derive(Debug, Clone)]
pub struct Submission {
    pub owner_id: String,
    /// Completion email recipient
    pub notify_email: Option<String>,
    pub upload: DeckUpload,
}

/// Result of a fully processed submission
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub recommendation: Recommendation,
    pub overall_score: u8,
    pub email_sent: bool,
}

/// Polling view of a job
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadLink {
    pub url: String,
    pub filename: String,
    pub expires_in_secs: u64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchDeleteOutcome {
    pub deleted: Vec<Uuid>,
    pub not_found: Vec<Uuid>,
}

/// Drives submitted decks through the pipeline and serves job queries
pub struct DeckProcessor {
    store: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    extractor: Arc<dyn SlideExtractor>,
    analysis: AnalysisClient,
    renderer: ReportRenderer,
    notifier: Notifier,
    temp_dir: PathBuf,
    download_ttl: Duration,
}

impl DeckProcessor {
    pub fn new(
        store: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        extractor: Arc<dyn SlideExtractor>,
        analysis: AnalysisClient,
        notifier: Notifier,
        temp_dir: PathBuf,
        download_ttl: Duration,
    ) -> Self {
        Self {
            store,
            objects,
            extractor,
            analysis,
            renderer: ReportRenderer::new(),
            notifier,
            temp_dir,
            download_ttl,
        }
    }

    /// Wire the remaining collaborators from configuration around the given stores
    pub fn with_stores(
        config: &AppConfig,
        store: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        let extractor = Arc::new(ProcessExtractor::from_config(&config.extractor));
        let analysis = AnalysisClient::from_config(&config.analysis)?;
        let notifier = Notifier::from_config(&config.email, &config.storage, store.clone(), objects.clone());

        info!(
            storage = objects.backend_name(),
            model = analysis.model_name(),
            "Deck processor ready"
        );

        Ok(Self::new(
            store,
            objects,
            extractor,
            analysis,
            notifier,
            config.temp_dir(),
            config.storage.download_url_ttl(),
        ))
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub fn objects(&self) -> Arc<dyn ObjectStore> {
        self.objects.clone()
    }

    async fn count_slides(&self, path: &Path) -> Result<u32> {
        self.extractor.count_slides(path).await.map_err(|e| {
            if e.is_input_problem() {
                AppError::Validation {
                    message: format!("Could not read the presentation: {}", e),
                    field: Some("file".to_string()),
                }
            } else {
                error!(error = %e, "Slide count failed");
                AppError::Internal {
                    message: format!("Slide count failed: {}", e),
                }
            }
        })
    }

    /// Check a deck without creating a job; returns its slide count
    #[instrument(skip(self, upload), fields(file = %upload.file_name))]
    pub async fn validate(&self, upload: &DeckUpload) -> Result<u32> {
        let (_staged, count) = self.admit(upload).await?;
        debug!(slide_count = count, "Deck passed validation");
        Ok(count)
    }

    /// Run one submission end to end
    #[instrument(skip(self, submission), fields(owner = %submission.owner_id, file = %submission.upload.file_name))]
    pub async fn process(&self, submission: Submission) -> Result<SubmissionOutcome> {
        let Submission {
            owner_id,
            notify_email,
            upload,
        } = submission;

        let (staged, slide_count) = match self.admit(&upload).await {
            Ok(admitted) => admitted,
            Err(e) => {
                metrics::record_submission("rejected");
                return Err(e);
            }
        };
        drop(upload);

        let job_id = Uuid::new_v4();
        let job = self
            .store
            .create_job(NewJob {
                id: job_id,
                owner_id: owner_id.clone(),
                source_key: storage::deck_key(&owner_id, job_id, &staged.file_name),
                original_name: staged.file_name.clone(),
                slide_count: i32::try_from(slide_count).unwrap_or(i32::MAX),
                notify_email,
            })
            .await?;
        info!(job_id = %job_id, slide_count, "Job created");

        let result = self.run_stages(&job, &staged).await;
        drop(staged);

        let (analysis, completed) = match result {
            Ok(done) => done,
            Err(e) => {
                metrics::record_submission("failed");
                return Err(e);
            }
        };
        metrics::record_submission("completed");
        info!(job_id = %job_id, overall_score = analysis.overall_score, "Job completed");

        let email_sent = self.notifier.dispatch(&completed).await;

        Ok(SubmissionOutcome {
            job_id,
            status: completed.job_status(),
            recommendation: analysis.recommendation,
            overall_score: analysis.overall_score,
            email_sent,
        })
    }

    /// Input checks that run before any job exists
    async fn admit(&self, upload: &DeckUpload) -> Result<(StagedDeck, u32)> {
        validate_upload(upload)?;
        let staged = StagedDeck::stage(&self.temp_dir, upload).await?;
        let count = self.count_slides(staged.path()).await?;
        check_slide_count(count)?;
        Ok((staged, count))
    }

    async fn run_stages(&self, job: &AnalysisJob, staged: &StagedDeck) -> Result<(ScoringResult, AnalysisJob)> {
        let id = job.id;

        self.stage(id, JobStatus::UploadingDeck, async {
            self.objects
                .put_file(&job.source_key, staged.path(), &staged.content_type)
                .await?;
            Ok::<_, PipelineError>(())
        })
        .await?;

        let slides = self
            .stage(id, JobStatus::ExtractingText, async {
                Ok::<_, PipelineError>(self.extractor.extract_slides(staged.path()).await?)
            })
            .await?;
        let images: u32 = slides.iter().filter_map(|s| s.stats.as_ref()).map(|s| s.total_images).sum();
        let ocr: u32 = slides.iter().filter_map(|s| s.stats.as_ref()).map(|s| s.ocr_successful).sum();
        debug!(job_id = %id, slides = slides.len(), images, ocr_successful = ocr, "Slides extracted");
        if slides.len() < 3 || slides.len() > 30 {
            warn!(job_id = %id, slides = slides.len(), "Unusual number of slides with content");
        }

        let outcome = self
            .stage(id, JobStatus::AnalyzingAi, async {
                Ok::<_, PipelineError>(self.analysis.analyze(&slides).await?)
            })
            .await?;
        let analysis = outcome.result;

        self.stage(id, JobStatus::SavingAnalysis, async {
            self.store.attach_analysis(id, &analysis).await?;
            Ok::<_, PipelineError>(())
        })
        .await?;

        let meta = ReportMeta {
            job_id: id,
            deck_name: job.original_name.clone(),
        };
        let report = self
            .stage(id, JobStatus::GeneratingPdf, async {
                Ok::<_, PipelineError>(self.renderer.render_to_temp(&self.temp_dir, &meta, &analysis).await?)
            })
            .await?;

        let report_key = storage::report_key(&job.owner_id, id);
        self.stage(id, JobStatus::UploadingPdf, async {
            self.objects.put_file(&report_key, &report, PDF_CONTENT_TYPE).await?;
            Ok::<_, PipelineError>(())
        })
        .await?;
        drop(report);

        let completed = match self.store.mark_completed(id, &report_key).await {
            Ok(job) => job,
            Err(e) => return Err(self.fail(id, JobStatus::UploadingPdf, e.to_string()).await),
        };

        Ok((analysis, completed))
    }

    /// Persist `status`, then run `work`; on error mark the job FAILED
    async fn stage<T, F>(&self, job_id: Uuid, status: JobStatus, work: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, PipelineError>>,
    {
        if let Err(e) = self.store.set_status(job_id, status).await {
            return Err(self.fail(job_id, status, e.to_string()).await);
        }
        debug!(job_id = %job_id, stage = %status, "Stage started");

        let started = Instant::now();
        let result = work.await;
        metrics::record_stage(status.as_str(), started.elapsed().as_secs_f64(), result.is_ok());

        let cause = match result {
            Ok(value) => return Ok(value),
            Err(e) => e.to_string(),
        };
        Err(self.fail(job_id, status, cause).await)
    }

    /// Mark the job FAILED and build the caller-facing error
    async fn fail(&self, job_id: Uuid, stage: JobStatus, cause: String) -> AppError {
        let label = stage.stage_label();
        let reason = format!("{} failed: {}", label, cause);
        error!(job_id = %job_id, stage = %stage, error = %cause, "Pipeline stage failed");

        if let Err(e) = self.store.mark_failed(job_id, &reason).await {
            error!(job_id = %job_id, error = %e, "Failed to record job failure");
        }

        AppError::StageFailed {
            job_id: job_id.to_string(),
            stage: label.to_string(),
        }
    }

    /// Current status of a job.
    ///
    /// Unknown ids and ids owned by someone else read as PENDING.
    pub async fn status(&self, owner_id: &str, id: Uuid) -> Result<JobStatusView> {
        Ok(match self.store.find_owned_job(id, owner_id).await? {
            Some(job) => JobStatusView {
                job_id: id,
                status: job.job_status(),
                failure_reason: job.failure_reason,
            },
            None => JobStatusView {
                job_id: id,
                status: JobStatus::Pending,
                failure_reason: None,
            },
        })
    }

    pub async fn job(&self, owner_id: &str, id: Uuid) -> Result<AnalysisJob> {
        self.store
            .find_owned_job(id, owner_id)
            .await?
            .ok_or_else(|| AppError::JobNotFound { id: id.to_string() })
    }

    /// All of the caller's jobs, newest first
    pub async fn history(&self, owner_id: &str) -> Result<Vec<AnalysisJob>> {
        self.store.list_jobs(owner_id).await
    }

    /// Signed link to a completed job's report.
    ///
    /// A report missing from storage flips the job to FILE_UNAVAILABLE.
    #[instrument(skip(self))]
    pub async fn download_link(&self, owner_id: &str, id: Uuid) -> Result<DownloadLink> {
        let job = self.job(owner_id, id).await?;

        let key = match job.job_status() {
            JobStatus::Completed => job.report_key.clone().ok_or_else(|| AppError::Internal {
                message: format!("Completed job {} has no report key", id),
            })?,
            JobStatus::FileUnavailable => return Err(AppError::FileUnavailable { id: id.to_string() }),
            other => {
                return Err(AppError::JobNotReady {
                    id: id.to_string(),
                    status: other.to_string(),
                })
            }
        };

        if !self.objects.exists(&key).await? {
            warn!(job_id = %id, key = %key, "Report missing from storage");
            match self.store.mark_file_unavailable(id).await {
                // A concurrent download may have flipped it already
                Ok(_) | Err(AppError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
            metrics::record_file_unavailable();
            return Err(AppError::FileUnavailable { id: id.to_string() });
        }

        let filename = report_file_name(&job.original_name);
        let signed = self.objects.presign_get(&key, self.download_ttl, &filename).await?;

        Ok(DownloadLink {
            url: signed.url,
            filename,
            expires_in_secs: self.download_ttl.as_secs(),
            expires_at: signed.expires_at,
        })
    }

    /// Hard delete one of the caller's jobs
    pub async fn delete(&self, owner_id: &str, id: Uuid) -> Result<()> {
        if self.store.delete_owned_job(id, owner_id).await? {
            info!(job_id = %id, "Job deleted");
            Ok(())
        } else {
            Err(AppError::JobNotFound { id: id.to_string() })
        }
    }

    /// Delete several jobs; ids that are missing or not owned are reported, not fatal
    pub async fn delete_many(&self, owner_id: &str, ids: &[Uuid]) -> Result<BatchDeleteOutcome> {
        let mut outcome = BatchDeleteOutcome::default();
        for id in ids {
            if outcome.deleted.contains(id) || outcome.not_found.contains(id) {
                continue;
            }
            if self.store.delete_owned_job(*id, owner_id).await? {
                outcome.deleted.push(*id);
            } else {
                outcome.not_found.push(*id);
            }
        }
        info!(deleted = outcome.deleted.len(), not_found = outcome.not_found.len(), "Batch delete");
        Ok(outcome)
    }
}
