//! Completion email dispatch
//!
//! Best effort: every failure is written to the job's email status and
//! logged, and [`Notifier::dispatch`] only ever reports success as a bool.

use crate::errors::NotificationError;
use crate::upload::report_file_name;
use async_trait::async_trait;
use deckforge_common::config::{EmailConfig, StorageConfig};
use deckforge_common::db::models::{AnalysisJob, EmailStatus, JobStatus};
use deckforge_common::db::JobStore;
use deckforge_common::metrics;
use deckforge_common::storage::ObjectStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// One outgoing email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError>;
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
    html: &'a str,
}

/// Transactional email over an HTTP API (`POST {api_base}/emails`)
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(api_base: &str, api_key: String, from: String) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| NotificationError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/emails", api_base.trim_end_matches('/')),
            api_key,
            from,
        })
    }

    /// `None` when the API key or sender address is missing
    pub fn from_config(config: &EmailConfig) -> Option<Self> {
        let api_key = config.api_key.clone().filter(|k| !k.trim().is_empty())?;
        let from = config.from_address.clone().filter(|f| !f.trim().is_empty())?;
        match Self::new(&config.api_base, api_key, from) {
            Ok(mailer) => Some(mailer),
            Err(e) => {
                warn!(error = %e, "Email client unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        let body = SendEmailRequest {
            from: &self.from,
            to: [&message.to],
            subject: &message.subject,
            text: &message.text,
            html: &message.html,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected { status, body });
        }

        Ok(())
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Sends the "report ready" email for completed jobs
pub struct Notifier {
    store: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    mailer: Option<Arc<dyn Mailer>>,
    enabled: bool,
    subject: String,
    link_ttl: Duration,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        mailer: Option<Arc<dyn Mailer>>,
        subject: impl Into<String>,
        link_ttl: Duration,
    ) -> Self {
        Self {
            store,
            objects,
            mailer,
            enabled: true,
            subject: subject.into(),
            link_ttl,
        }
    }

    pub fn from_config(
        email: &EmailConfig,
        storage: &StorageConfig,
        store: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        let mailer = HttpMailer::from_config(email).map(|m| Arc::new(m) as Arc<dyn Mailer>);
        if email.enabled && mailer.is_none() {
            warn!("email.api_key or email.from_address not set; completion emails will be recorded as failed");
        }

        let mut notifier = Self::new(store, objects, mailer, email.subject.clone(), storage.email_url_ttl());
        notifier.enabled = email.enabled;
        notifier
    }

    /// Record a failed attempt; never raises
    async fn fail(&self, job: &AnalysisJob, reason: &str) -> bool {
        warn!(job_id = %job.id, reason = %reason, "Completion email not sent");
        metrics::record_email(false);
        if let Err(e) = self
            .store
            .set_email_status(job.id, EmailStatus::Failed, Some(reason))
            .await
        {
            warn!(job_id = %job.id, error = %e, "Failed to record email failure");
        }
        false
    }

    fn compose(&self, job: &AnalysisJob, to: &str, url: &str) -> EmailMessage {
        let summary = job
            .scoring_result()
            .map(|r| format!("Recommendation: {}\nOverall score: {}/100\n", r.recommendation, r.overall_score))
            .unwrap_or_default();
        let hours = (self.link_ttl.as_secs() / 3600).max(1);

        let text = format!(
            "The analysis of \"{}\" is complete.\n\n{}\nDownload the full report:\n{}\n\nThis link expires in {} hour(s).\n",
            job.original_name, summary, url, hours
        );
        let html = format!(
            "<p>The analysis of <strong>{}</strong> is complete.</p><p>{}</p>\
             <p><a href=\"{}\">Download the full report</a></p><p>This link expires in {} hour(s).</p>",
            escape_html(&job.original_name),
            escape_html(summary.trim()).replace('\n', "<br>"),
            escape_html(url),
            hours
        );

        EmailMessage {
            to: to.to_string(),
            subject: self.subject.clone(),
            text,
            html,
        }
    }

    /// Email the report link for a COMPLETED job; returns whether it was sent
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn dispatch(&self, job: &AnalysisJob) -> bool {
        if !self.enabled {
            debug!("Completion emails disabled");
            return false;
        }
        if job.job_status() != JobStatus::Completed {
            debug!(status = %job.status, "Job not completed; no email");
            return false;
        }

        let Some(to) = job.notify_email.as_deref().filter(|e| !e.is_empty()) else {
            return self.fail(job, "no recipient address").await;
        };
        let Some(mailer) = self.mailer.as_ref() else {
            return self.fail(job, "email credentials not configured").await;
        };
        let Some(report_key) = job.report_key.as_deref() else {
            return self.fail(job, "report key missing").await;
        };

        if let Err(e) = self.store.set_email_status(job.id, EmailStatus::Sending, None).await {
            warn!(error = %e, "Failed to record email as sending");
        }

        let signed = match self
            .objects
            .presign_get(report_key, self.link_ttl, &report_file_name(&job.original_name))
            .await
        {
            Ok(signed) => signed,
            Err(e) => return self.fail(job, &format!("could not sign report link: {}", e)).await,
        };

        let message = self.compose(job, to, &signed.url);
        if let Err(e) = mailer.send(&message).await {
            return self.fail(job, &e.to_string()).await;
        }

        if let Err(e) = self.store.set_email_status(job.id, EmailStatus::Sent, None).await {
            warn!(error = %e, "Failed to record email as sent");
        }
        metrics::record_email(true);
        info!("Completion email sent");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckforge_common::db::{InMemoryJobStore, NewJob};
    use deckforge_common::storage::LocalStore;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<EmailMessage>>,
        reject: bool,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
            if self.reject {
                return Err(NotificationError::Rejected {
                    status: 422,
                    body: "invalid recipient".into(),
                });
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<InMemoryJobStore>,
        objects: Arc<LocalStore>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let objects = Arc::new(LocalStore::new(dir.path(), "http://files.test", "secret".into()).unwrap());
        Fixture {
            _dir: dir,
            store: Arc::new(InMemoryJobStore::new()),
            objects,
        }
    }

    async fn completed_job(store: &InMemoryJobStore, email: Option<&str>) -> AnalysisJob {
        let id = Uuid::new_v4();
        store
            .create_job(NewJob {
                id,
                owner_id: "user-1".into(),
                source_key: format!("decks/user-1/{}/deck.pptx", id),
                original_name: "deck.pptx".into(),
                slide_count: 10,
                notify_email: email.map(String::from),
            })
            .await
            .unwrap();
        for status in &JobStatus::SEQUENCE[1..7] {
            store.set_status(id, *status).await.unwrap();
        }
        store
            .mark_completed(id, &format!("reports/user-1/{}/report.pdf", id))
            .await
            .unwrap()
    }

    fn notifier(f: &Fixture, mailer: Option<Arc<dyn Mailer>>) -> Notifier {
        Notifier::new(
            f.store.clone(),
            f.objects.clone(),
            mailer,
            "Your report",
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_sends_link_and_records_sent() {
        let f = fixture();
        let mailer = Arc::new(RecordingMailer::default());
        let job = completed_job(&f.store, Some("founder@example.com")).await;

        assert!(notifier(&f, Some(mailer.clone())).dispatch(&job).await);

        let sent = mailer.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "founder@example.com");
        assert!(sent[0].text.contains("http://files.test/v1/files/reports/user-1/"));
        assert!(sent[0].text.contains("filename=deck-analysis.pdf"));

        let stored = f.store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.email_state(), Some(EmailStatus::Sent));
        assert_eq!(stored.job_status(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_recipient_recorded() {
        let f = fixture();
        let job = completed_job(&f.store, None).await;

        assert!(!notifier(&f, Some(Arc::new(RecordingMailer::default()))).dispatch(&job).await);

        let stored = f.store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.email_state(), Some(EmailStatus::Failed));
        assert_eq!(stored.email_failure_reason.as_deref(), Some("no recipient address"));
    }

    #[tokio::test]
    async fn test_missing_credentials_recorded() {
        let f = fixture();
        let job = completed_job(&f.store, Some("founder@example.com")).await;

        assert!(!notifier(&f, None).dispatch(&job).await);

        let stored = f.store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.email_state(), Some(EmailStatus::Failed));
        assert_eq!(stored.job_status(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_transport_rejection_recorded() {
        let f = fixture();
        let mailer = Arc::new(RecordingMailer {
            reject: true,
            ..Default::default()
        });
        let job = completed_job(&f.store, Some("founder@example.com")).await;

        assert!(!notifier(&f, Some(mailer)).dispatch(&job).await);

        let stored = f.store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.email_state(), Some(EmailStatus::Failed));
        assert!(stored.email_failure_reason.unwrap().contains("422"));
    }

    #[tokio::test]
    async fn test_only_completed_jobs_are_emailed() {
        let f = fixture();
        let mailer = Arc::new(RecordingMailer::default());
        let id = Uuid::new_v4();
        let job = f
            .store
            .create_job(NewJob {
                id,
                owner_id: "user-1".into(),
                source_key: "decks/user-1/x/deck.pptx".into(),
                original_name: "deck.pptx".into(),
                slide_count: 10,
                notify_email: Some("founder@example.com".into()),
            })
            .await
            .unwrap();

        assert!(!notifier(&f, Some(mailer.clone())).dispatch(&job).await);
        assert!(mailer.sent.lock().unwrap().is_empty());
        assert_eq!(f.store.find_job(id).await.unwrap().unwrap().email_state(), None);
    }

    #[test]
    fn test_html_is_escaped() {
        assert_eq!(escape_html("<b>&\"</b>"), "&lt;b&gt;&amp;&quot;&lt;/b&gt;");
    }
}
