//! End-to-end pipeline tests against in-process collaborators

use async_trait::async_trait;
use deckforge_common::db::models::{AnalysisJob, EmailStatus, JobStatus};
use deckforge_common::db::{InMemoryJobStore, JobStore, NewJob};
use deckforge_common::errors::{AppError, Result};
use deckforge_common::scoring::{Recommendation, ScoringResult};
use deckforge_common::storage::{LocalStore, ObjectStore, SignedUrl};
use deckforge_pipeline::analysis::{mock_analysis, Completion, CompletionRequest, CompletionTransport};
use deckforge_pipeline::errors::{AnalysisError, ExtractionError, NotificationError};
use deckforge_pipeline::notify::{EmailMessage, Mailer, Notifier};
use deckforge_pipeline::{AnalysisClient, DeckProcessor, DeckUpload, Slide, SlideExtractor, Submission};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const PPTX: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";
const OWNER: &str = "user-1";

/// Job store that records every status it is asked to move to
#[derive(Default)]
struct RecordingStore {
    inner: InMemoryJobStore,
    transitions: Mutex<Vec<JobStatus>>,
}

impl RecordingStore {
    fn record(&self, status: JobStatus) {
        self.transitions.lock().unwrap().push(status);
    }

    fn transitions(&self) -> Vec<JobStatus> {
        self.transitions.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn create_job(&self, job: NewJob) -> Result<AnalysisJob> {
        let job = self.inner.create_job(job).await?;
        self.record(job.job_status());
        Ok(job)
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<AnalysisJob>> {
        self.inner.find_job(id).await
    }

    async fn find_owned_job(&self, id: Uuid, owner_id: &str) -> Result<Option<AnalysisJob>> {
        self.inner.find_owned_job(id, owner_id).await
    }

    async fn list_jobs(&self, owner_id: &str) -> Result<Vec<AnalysisJob>> {
        self.inner.list_jobs(owner_id).await
    }

    async fn set_status(&self, id: Uuid, status: JobStatus) -> Result<AnalysisJob> {
        let job = self.inner.set_status(id, status).await?;
        self.record(status);
        Ok(job)
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<AnalysisJob> {
        let job = self.inner.mark_failed(id, reason).await?;
        self.record(JobStatus::Failed);
        Ok(job)
    }

    async fn attach_analysis(&self, id: Uuid, analysis: &ScoringResult) -> Result<AnalysisJob> {
        self.inner.attach_analysis(id, analysis).await
    }

    async fn mark_completed(&self, id: Uuid, report_key: &str) -> Result<AnalysisJob> {
        let job = self.inner.mark_completed(id, report_key).await?;
        self.record(JobStatus::Completed);
        Ok(job)
    }

    async fn mark_file_unavailable(&self, id: Uuid) -> Result<AnalysisJob> {
        let job = self.inner.mark_file_unavailable(id).await?;
        self.record(JobStatus::FileUnavailable);
        Ok(job)
    }

    async fn set_email_status(
        &self,
        id: Uuid,
        status: EmailStatus,
        failure_reason: Option<&str>,
    ) -> Result<AnalysisJob> {
        self.inner.set_email_status(id, status, failure_reason).await
    }

    async fn delete_owned_job(&self, id: Uuid, owner_id: &str) -> Result<bool> {
        self.inner.delete_owned_job(id, owner_id).await
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

struct StubExtractor {
    count: u32,
    fail_extraction: bool,
}

#[async_trait]
impl SlideExtractor for StubExtractor {
    async fn count_slides(&self, path: &Path) -> std::result::Result<u32, ExtractionError> {
        assert!(path.exists(), "deck must be staged before counting");
        Ok(self.count)
    }

    async fn extract_slides(&self, _path: &Path) -> std::result::Result<Vec<Slide>, ExtractionError> {
        if self.fail_extraction {
            return Err(ExtractionError::Reported("PPTX processing failed".into()));
        }
        Ok((1..=self.count)
            .map(|n| Slide {
                slide: n,
                text: format!("Slide {} covers the market", n),
                notes: (n == 1).then(|| "Open with the founder story".to_string()),
                stats: None,
            })
            .collect())
    }
}

struct FixedTransport(String);

#[async_trait]
impl CompletionTransport for FixedTransport {
    async fn complete(&self, _request: &CompletionRequest) -> std::result::Result<Completion, AnalysisError> {
        Ok(Completion::stopped(self.0.clone()))
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> std::result::Result<(), NotificationError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Object store that refuses report uploads and delegates everything else
struct ReportUploadFails {
    inner: Arc<LocalStore>,
}

#[async_trait]
impl ObjectStore for ReportUploadFails {
    fn backend_name(&self) -> &'static str {
        "report-upload-fails"
    }

    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<()> {
        if key.starts_with("reports/") {
            return Err(AppError::Storage {
                message: "bucket rejected the write".into(),
            });
        }
        self.inner.put_file(key, path, content_type).await
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.get_bytes(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn presign_get(&self, key: &str, ttl: Duration, download_name: &str) -> Result<SignedUrl> {
        self.inner.presign_get(key, ttl, download_name).await
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    temp: PathBuf,
    store: Arc<RecordingStore>,
    objects: Arc<LocalStore>,
    mailer: Arc<RecordingMailer>,
    processor: DeckProcessor,
}

impl Harness {
    fn new(extractor: StubExtractor, llm_response: String) -> Self {
        Self::with_objects(extractor, llm_response, |objects| objects as Arc<dyn ObjectStore>)
    }

    fn with_objects(
        extractor: StubExtractor,
        llm_response: String,
        wrap: impl FnOnce(Arc<LocalStore>) -> Arc<dyn ObjectStore>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("tmp");
        let store = Arc::new(RecordingStore::default());
        let objects = Arc::new(LocalStore::new(&dir.path().join("objects"), "http://localhost:8080", "test-secret".into()).unwrap());
        let wrapped = wrap(objects.clone());
        let mailer = Arc::new(RecordingMailer::default());

        let analysis = AnalysisClient::new(Arc::new(FixedTransport(llm_response)), 2, Duration::from_millis(1));
        let notifier = Notifier::new(
            store.clone(),
            wrapped.clone(),
            Some(mailer.clone()),
            "Your deck analysis is ready",
            Duration::from_secs(3600),
        );
        let processor = DeckProcessor::new(
            store.clone(),
            wrapped,
            Arc::new(extractor),
            analysis,
            notifier,
            temp.clone(),
            Duration::from_secs(600),
        );

        Self {
            _dir: dir,
            temp,
            store,
            objects,
            mailer,
            processor,
        }
    }

    fn with_slides(count: u32) -> Self {
        Self::new(
            StubExtractor {
                count,
                fail_extraction: false,
            },
            mock_analysis(7),
        )
    }

    fn temp_files(&self) -> usize {
        std::fs::read_dir(&self.temp).map(|d| d.count()).unwrap_or(0)
    }

    async fn only_job(&self) -> AnalysisJob {
        let jobs = self.processor.history(OWNER).await.unwrap();
        assert_eq!(jobs.len(), 1);
        jobs.into_iter().next().unwrap()
    }
}

fn submission() -> Submission {
    Submission {
        owner_id: OWNER.to_string(),
        notify_email: Some("founder@example.com".to_string()),
        upload: DeckUpload::new("Acme Seed Deck.pptx", Some(PPTX.to_string()), b"PK\x03\x04 deck".to_vec()),
    }
}

fn response_without(field: &str) -> String {
    let mut value: serde_json::Value = serde_json::from_str(&mock_analysis(7)).unwrap();
    value.as_object_mut().unwrap().remove(field);
    value.to_string()
}

#[tokio::test]
async fn test_ten_slide_deck_runs_every_stage_in_order() {
    let h = Harness::with_slides(10);

    let outcome = h.processor.process(submission()).await.unwrap();
    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.overall_score, 70);
    assert_eq!(outcome.recommendation, Recommendation::Hold);
    assert!(outcome.email_sent);

    assert_eq!(h.store.transitions(), JobStatus::SEQUENCE.to_vec());

    let job = h.store.find_job(outcome.job_id).await.unwrap().unwrap();
    assert_eq!(job.job_status(), JobStatus::Completed);
    assert_eq!(job.slide_count, 10);
    assert!(job.report_key_consistent());
    assert_eq!(job.scoring_result().unwrap().overall_score, 70);
    assert_eq!(job.email_state(), Some(EmailStatus::Sent));

    let report_key = job.report_key.unwrap();
    assert!(h.objects.exists(&report_key).await.unwrap());
    assert!(h.objects.exists(&job.source_key).await.unwrap());
    assert!(h.objects.get_bytes(&report_key).await.unwrap().starts_with(b"%PDF"));

    let sent = h.mailer.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("Acme_Seed_Deck-analysis.pdf"));

    assert_eq!(h.temp_files(), 0, "staged deck and report must be cleaned up");
}

#[tokio::test]
async fn test_missing_recommendation_fails_the_job() {
    let h = Harness::new(
        StubExtractor {
            count: 10,
            fail_extraction: false,
        },
        response_without("recommendation"),
    );

    let err = h.processor.process(submission()).await.unwrap_err();
    match &err {
        AppError::StageFailed { stage, .. } => assert_eq!(stage, "AI analysis"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.to_string().contains("recommendation"), "internal detail leaked: {err}");

    let job = h.only_job().await;
    assert_eq!(job.job_status(), JobStatus::Failed);
    assert!(job.failure_reason.as_deref().unwrap().starts_with("AI analysis failed"));
    assert!(job.failure_reason.as_deref().unwrap().contains("recommendation"));
    assert!(job.analysis.is_none());
    assert!(job.report_key_consistent());
    assert_eq!(
        h.store.transitions(),
        vec![
            JobStatus::Pending,
            JobStatus::UploadingDeck,
            JobStatus::ExtractingText,
            JobStatus::AnalyzingAi,
            JobStatus::Failed,
        ]
    );
    assert!(h.mailer.sent.lock().unwrap().is_empty());
    assert_eq!(h.temp_files(), 0);
}

#[tokio::test]
async fn test_report_upload_failure_keeps_analysis_without_report() {
    let h = Harness::with_objects(
        StubExtractor {
            count: 10,
            fail_extraction: false,
        },
        mock_analysis(7),
        |objects| Arc::new(ReportUploadFails { inner: objects }) as Arc<dyn ObjectStore>,
    );

    let err = h.processor.process(submission()).await.unwrap_err();
    assert!(matches!(&err, AppError::StageFailed { stage, .. } if stage == "report upload"));

    let transitions = h.store.transitions();
    assert_eq!(
        transitions[transitions.len() - 4..],
        [
            JobStatus::SavingAnalysis,
            JobStatus::GeneratingPdf,
            JobStatus::UploadingPdf,
            JobStatus::Failed,
        ]
    );

    let job = h.only_job().await;
    assert_eq!(job.job_status(), JobStatus::Failed);
    assert!(job.failure_reason.as_deref().unwrap().starts_with("report upload failed"));
    assert_eq!(job.scoring_result().unwrap().overall_score, 70);
    assert!(job.report_key.is_none());
    assert!(job.report_key_consistent());
    assert!(h.objects.exists(&job.source_key).await.unwrap());

    assert_eq!(h.temp_files(), 0, "rendered report must not be left behind");
    assert!(h.mailer.sent.lock().unwrap().is_empty());
    assert_eq!(job.email_state(), None);
}

#[tokio::test]
async fn test_extraction_failure_names_the_stage_and_cleans_up() {
    let h = Harness::new(
        StubExtractor {
            count: 8,
            fail_extraction: true,
        },
        mock_analysis(7),
    );

    let err = h.processor.process(submission()).await.unwrap_err();
    assert!(matches!(&err, AppError::StageFailed { stage, .. } if stage == "text extraction"));

    let job = h.only_job().await;
    assert_eq!(job.job_status(), JobStatus::Failed);
    assert_eq!(
        job.failure_reason.as_deref(),
        Some("text extraction failed: Extractor reported an error: PPTX processing failed")
    );
    assert!(job.report_key.is_none());
    assert_eq!(h.temp_files(), 0);
}

#[tokio::test]
async fn test_slide_count_bounds_are_checked_before_a_job_exists() {
    for (count, expected) in [(4, Some("too low")), (0, Some("too low")), (36, Some("too high")), (5, None), (35, None)] {
        let h = Harness::with_slides(count);
        let upload = submission().upload;

        match (h.processor.validate(&upload).await, expected) {
            (Ok(n), None) => assert_eq!(n, count),
            (Err(e), Some(word)) => {
                assert!(matches!(e, AppError::SlideCountOutOfRange { .. }));
                assert!(e.to_string().contains(word), "{e}");
                assert!(e.to_string().contains(&count.to_string()), "{e}");
            }
            (other, _) => panic!("count {count}: unexpected {other:?}"),
        }

        if expected.is_some() {
            assert!(h.processor.process(submission()).await.is_err());
            assert!(h.processor.history(OWNER).await.unwrap().is_empty());
        }
        assert_eq!(h.temp_files(), 0);
    }
}

#[tokio::test]
async fn test_wrong_file_type_rejected_without_job() {
    let h = Harness::with_slides(10);
    let mut bad = submission();
    bad.upload = DeckUpload::new("deck.pdf", Some("application/pdf".into()), b"%PDF".to_vec());

    let err = h.processor.process(bad).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidFileType { .. }));
    assert!(h.processor.history(OWNER).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_download_link_for_completed_job() {
    let h = Harness::with_slides(10);
    let outcome = h.processor.process(submission()).await.unwrap();

    let link = h.processor.download_link(OWNER, outcome.job_id).await.unwrap();
    assert_eq!(link.filename, "Acme_Seed_Deck-analysis.pdf");
    assert_eq!(link.expires_in_secs, 600);
    assert!(link.url.starts_with("http://localhost:8080/v1/files/reports/user-1/"));

    let err = h.processor.download_link("someone-else", outcome.job_id).await.unwrap_err();
    assert!(matches!(err, AppError::JobNotFound { .. }));
}

#[tokio::test]
async fn test_deleted_report_flips_job_to_file_unavailable() {
    let h = Harness::with_slides(10);
    let outcome = h.processor.process(submission()).await.unwrap();

    let job = h.store.find_job(outcome.job_id).await.unwrap().unwrap();
    let report_path = h.objects.path_for(job.report_key.as_deref().unwrap()).unwrap();
    std::fs::remove_file(report_path).unwrap();

    let err = h.processor.download_link(OWNER, outcome.job_id).await.unwrap_err();
    assert!(matches!(err, AppError::FileUnavailable { .. }));

    let job = h.store.find_job(outcome.job_id).await.unwrap().unwrap();
    assert_eq!(job.job_status(), JobStatus::FileUnavailable);
    assert!(job.report_key.is_none());
    assert!(job.analysis.is_some());
    assert!(job.report_key_consistent());

    // Stays unavailable on later attempts
    let err = h.processor.download_link(OWNER, outcome.job_id).await.unwrap_err();
    assert!(matches!(err, AppError::FileUnavailable { .. }));
    assert_eq!(h.store.transitions().last(), Some(&JobStatus::FileUnavailable));
}

#[tokio::test]
async fn test_status_polling_hides_foreign_and_unknown_jobs() {
    let h = Harness::with_slides(10);
    let outcome = h.processor.process(submission()).await.unwrap();

    let own = h.processor.status(OWNER, outcome.job_id).await.unwrap();
    assert_eq!(own.status, JobStatus::Completed);

    let foreign = h.processor.status("someone-else", outcome.job_id).await.unwrap();
    assert_eq!(foreign.status, JobStatus::Pending);

    let unknown = h.processor.status(OWNER, Uuid::new_v4()).await.unwrap();
    assert_eq!(unknown.status, JobStatus::Pending);
    assert!(unknown.failure_reason.is_none());
}

#[tokio::test]
async fn test_delete_is_owner_scoped() {
    let h = Harness::with_slides(10);
    let outcome = h.processor.process(submission()).await.unwrap();

    let err = h.processor.delete("someone-else", outcome.job_id).await.unwrap_err();
    assert!(matches!(err, AppError::JobNotFound { .. }));
    assert!(h.store.find_job(outcome.job_id).await.unwrap().is_some());

    h.processor.delete(OWNER, outcome.job_id).await.unwrap();
    assert!(h.store.find_job(outcome.job_id).await.unwrap().is_none());

    let err = h.processor.delete(OWNER, outcome.job_id).await.unwrap_err();
    assert!(matches!(err, AppError::JobNotFound { .. }));
}

#[tokio::test]
async fn test_batch_delete_and_history_order() {
    let h = Harness::with_slides(10);
    let first = h.processor.process(submission()).await.unwrap().job_id;
    let second = h.processor.process(submission()).await.unwrap().job_id;

    let history: Vec<Uuid> = h.processor.history(OWNER).await.unwrap().iter().map(|j| j.id).collect();
    assert_eq!(history, vec![second, first]);

    let missing = Uuid::new_v4();
    let outcome = h.processor.delete_many(OWNER, &[first, missing, first, second]).await.unwrap();
    assert_eq!(outcome.deleted, vec![first, second]);
    assert_eq!(outcome.not_found, vec![missing]);
    assert!(h.processor.history(OWNER).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_report_key_invariant_across_outcomes() {
    let completed = Harness::with_slides(10);
    completed.processor.process(submission()).await.unwrap();

    let failed = Harness::new(
        StubExtractor {
            count: 10,
            fail_extraction: false,
        },
        "not json at all".to_string(),
    );
    failed.processor.process(submission()).await.unwrap_err();

    for h in [&completed, &failed] {
        for job in h.processor.history(OWNER).await.unwrap() {
            assert!(job.report_key_consistent(), "{} {:?}", job.status, job.report_key);
        }
    }
}
