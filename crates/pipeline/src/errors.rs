//! Pipeline error types

use crate::analysis::AnalysisDecodeError;
use deckforge_common::errors::AppError;
use thiserror::Error;

/// Failures of the out-of-process slide extractor
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Failed to start extractor '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Extractor timed out after {0}s")]
    Timeout(u64),

    #[error("process failed, code {0}")]
    ProcessFailed(i32),

    #[error("Extractor reported an error: {0}")]
    Reported(String),

    #[error("Unexpected extractor output: {0}")]
    InvalidOutput(String),

    #[error("No slide content could be extracted{}", .0.as_deref().map(|m| format!(": {}", m)).unwrap_or_default())]
    NoSlides(Option<String>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractionError {
    /// Whether the failure says something about the deck rather than the host
    pub fn is_input_problem(&self) -> bool {
        matches!(
            self,
            ExtractionError::Reported(_)
                | ExtractionError::InvalidOutput(_)
                | ExtractionError::NoSlides(_)
                | ExtractionError::ProcessFailed(_)
        )
    }
}

/// Failures of the LLM scoring step
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("No slides to analyze")]
    NoSlides,

    #[error("LLM request failed: {0}")]
    Transport(String),

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("LLM stopped early (finish reason '{0}')")]
    Truncated(String),

    #[error("LLM request failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("LLM response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("LLM response failed validation: {0}")]
    Decode(#[from] AnalysisDecodeError),

    #[error("Analysis configuration error: {0}")]
    Config(String),
}

/// Failures while building the PDF report
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("PDF encoding failed: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the completion email transport
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Email request failed: {0}")]
    Transport(String),

    #[error("Email API rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Any failure inside a pipeline stage
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    App(#[from] AppError),
}

impl From<AnalysisError> for AppError {
    fn from(e: AnalysisError) -> Self {
        match e {
            AnalysisError::Config(message) => AppError::Configuration { message },
            other => AppError::Internal {
                message: other.to_string(),
            },
        }
    }
}
