//! DeckForge Common Library
//!
//! Shared code for the DeckForge gateway and pipeline including:
//! - Analysis job model and persistence
//! - Object storage gateway
//! - Scoring rubric and overall score aggregation
//! - Error types and handling
//! - Configuration management
//! - Caller identity extraction
//! - Metrics and observability

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod scoring;
pub mod storage;

// Re-export commonly used types
pub use auth::CallerIdentity;
pub use config::AppConfig;
pub use db::models::{AnalysisJob, EmailStatus, JobStatus};
pub use db::{InMemoryJobStore, JobStore, NewJob, Repository};
pub use errors::{AppError, Result};
pub use scoring::{Category, Recommendation, ScoringResult};
pub use storage::{ObjectStore, SignedUrl};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
