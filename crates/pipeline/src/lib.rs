//! DeckForge Pipeline
//!
//! Turns an uploaded pitch deck into a scored, rendered and delivered report:
//! - Upload validation and temp staging
//! - Slide text extraction through an external process
//! - LLM scoring with retries and response validation
//! - PDF report rendering
//! - Completion email dispatch
//! - The job orchestrator tying the stages together

pub mod analysis;
pub mod errors;
pub mod extraction;
pub mod notify;
pub mod processor;
pub mod report;
pub mod upload;

pub use analysis::{AnalysisClient, AnalysisOutcome, CompletionTransport};
pub use errors::{AnalysisError, ExtractionError, PipelineError};
pub use extraction::{ProcessExtractor, Slide, SlideExtractor};
pub use notify::{Mailer, Notifier};
pub use processor::{BatchDeleteOutcome, DeckProcessor, DownloadLink, JobStatusView, Submission, SubmissionOutcome};
pub use report::{ReportMeta, ReportRenderer};
pub use upload::DeckUpload;
