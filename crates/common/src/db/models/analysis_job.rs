//! Analysis job entity: one submitted deck and its pipeline lifecycle

use crate::scoring::ScoringResult;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pipeline status of a job.
///
/// ```text
/// PENDING -> UPLOADING_DECK -> EXTRACTING_TEXT -> ANALYZING_AI -> SAVING_ANALYSIS
///         -> GENERATING_PDF -> UPLOADING_PDF -> COMPLETED -> FILE_UNAVAILABLE
///
/// every non-terminal status -> FAILED
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    UploadingDeck,
    ExtractingText,
    AnalyzingAi,
    SavingAnalysis,
    GeneratingPdf,
    UploadingPdf,
    Completed,
    Failed,
    FileUnavailable,
}

impl JobStatus {
    /// The fixed stage sequence, PENDING through COMPLETED
    pub const SEQUENCE: [JobStatus; 8] = [
        JobStatus::Pending,
        JobStatus::UploadingDeck,
        JobStatus::ExtractingText,
        JobStatus::AnalyzingAi,
        JobStatus::SavingAnalysis,
        JobStatus::GeneratingPdf,
        JobStatus::UploadingPdf,
        JobStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::UploadingDeck => "UPLOADING_DECK",
            JobStatus::ExtractingText => "EXTRACTING_TEXT",
            JobStatus::AnalyzingAi => "ANALYZING_AI",
            JobStatus::SavingAnalysis => "SAVING_ANALYSIS",
            JobStatus::GeneratingPdf => "GENERATING_PDF",
            JobStatus::UploadingPdf => "UPLOADING_PDF",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::FileUnavailable => "FILE_UNAVAILABLE",
        }
    }

    /// Stage name used in failure reasons and user-facing errors
    pub fn stage_label(&self) -> &'static str {
        match self {
            JobStatus::Pending => "submission",
            JobStatus::UploadingDeck => "deck upload",
            JobStatus::ExtractingText => "text extraction",
            JobStatus::AnalyzingAi => "AI analysis",
            JobStatus::SavingAnalysis => "saving the analysis",
            JobStatus::GeneratingPdf => "report generation",
            JobStatus::UploadingPdf => "report upload",
            JobStatus::Completed => "completion",
            JobStatus::Failed => "failure handling",
            JobStatus::FileUnavailable => "download",
        }
    }

    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::FileUnavailable
        )
    }

    /// Position in the stage sequence (None for FAILED and FILE_UNAVAILABLE)
    fn sequence_index(&self) -> Option<usize> {
        Self::SEQUENCE.iter().position(|s| s == self)
    }

    /// Transition table.
    ///
    /// Stages advance one step at a time; FAILED is reachable from every
    /// non-terminal status; FILE_UNAVAILABLE only from COMPLETED.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Completed, JobStatus::FileUnavailable) => true,
            (from, JobStatus::Failed) => !from.is_terminal(),
            (from, to) => match (from.sequence_index(), to.sequence_index()) {
                (Some(i), Some(j)) => j == i + 1,
                _ => false,
            },
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "UPLOADING_DECK" => Ok(JobStatus::UploadingDeck),
            "EXTRACTING_TEXT" => Ok(JobStatus::ExtractingText),
            "ANALYZING_AI" => Ok(JobStatus::AnalyzingAi),
            "SAVING_ANALYSIS" => Ok(JobStatus::SavingAnalysis),
            "GENERATING_PDF" => Ok(JobStatus::GeneratingPdf),
            "UPLOADING_PDF" => Ok(JobStatus::UploadingPdf),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "FILE_UNAVAILABLE" => Ok(JobStatus::FileUnavailable),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Completion email sub-state, independent of the job status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailStatus {
    Sending,
    Sent,
    Failed,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Sending => "SENDING",
            EmailStatus::Sent => "SENT",
            EmailStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SENDING" => Some(EmailStatus::Sending),
            "SENT" => Some(EmailStatus::Sent),
            "FAILED" => Some(EmailStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "analysis_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text", indexed)]
    pub owner_id: String,

    #[sea_orm(column_type = "Text")]
    pub source_key: String,

    #[sea_orm(column_type = "Text")]
    pub original_name: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub failure_reason: Option<String>,

    /// Serialized [`ScoringResult`]
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub analysis: Option<Json>,

    #[sea_orm(column_type = "Text", nullable)]
    pub report_key: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub notify_email: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub email_status: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub email_failure_reason: Option<String>,

    pub slide_count: i32,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    pub completed_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Get the job status as an enum.
    ///
    /// Rows with an unrecognised status read as FAILED so they never look in-flight.
    pub fn job_status(&self) -> JobStatus {
        self.status.parse().unwrap_or(JobStatus::Failed)
    }

    /// Check if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.job_status().is_terminal()
    }

    pub fn email_state(&self) -> Option<EmailStatus> {
        self.email_status.as_deref().and_then(EmailStatus::parse)
    }

    /// Decode the stored analysis, if any
    pub fn scoring_result(&self) -> Option<ScoringResult> {
        self.analysis
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// `report_key` is set exactly when the job is COMPLETED
    pub fn report_key_consistent(&self) -> bool {
        self.report_key.is_some() == (self.job_status() == JobStatus::Completed)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
