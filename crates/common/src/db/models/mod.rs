//! SeaORM entity models

mod analysis_job;

pub use analysis_job::{
    Entity as AnalysisJobEntity,
    Model as AnalysisJob,
    ActiveModel as AnalysisJobActiveModel,
    Column as AnalysisJobColumn,
    EmailStatus,
    JobStatus,
};
