//! Repository pattern for database operations
//!
//! Postgres-backed [`JobStore`]. Status changes are conditional updates on the
//! previously observed status, so two writers racing on one job cannot both win.

use crate::db::models::*;
use crate::db::store::{check_transition, truncate_reason, JobStore, NewJob};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::scoring::ScoringResult;
use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Schema, Set, Value,
};
use tracing::info;
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    /// Create the `analysis_jobs` table and its indexes if missing
    pub async fn ensure_schema(&self) -> Result<()> {
        let conn = self.write_conn();
        let backend = conn.get_database_backend();
        let schema = Schema::new(backend);

        let mut table = schema.create_table_from_entity(AnalysisJobEntity);
        table.if_not_exists();
        conn.execute(backend.build(&table)).await?;

        for mut index in schema.create_index_from_entity(AnalysisJobEntity) {
            index.if_not_exists();
            conn.execute(backend.build(&index)).await?;
        }

        info!("analysis_jobs schema ready");
        Ok(())
    }

    /// Load a row from the primary, failing if it does not exist
    async fn load(&self, id: Uuid) -> Result<AnalysisJob> {
        AnalysisJobEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::JobNotFound { id: id.to_string() })
    }

    /// Move a job to `next`, writing `changes` in the same statement.
    ///
    /// The update is conditioned on the status read just before, so a
    /// concurrent change surfaces as an invalid transition.
    async fn transition(
        &self,
        id: Uuid,
        next: JobStatus,
        changes: Vec<(AnalysisJobColumn, Value)>,
    ) -> Result<AnalysisJob> {
        let current = self.load(id).await?;
        check_transition(&current, next)?;

        let now = chrono::Utc::now().fixed_offset();
        let mut update = AnalysisJobEntity::update_many()
            .col_expr(AnalysisJobColumn::Status, Expr::value(next.as_str()))
            .col_expr(AnalysisJobColumn::UpdatedAt, Expr::value(now))
            .filter(AnalysisJobColumn::Id.eq(id))
            .filter(AnalysisJobColumn::Status.eq(current.status.clone()));

        for (column, value) in changes {
            update = update.col_expr(column, Expr::value(value));
        }

        let result = update.exec(self.write_conn()).await?;
        if result.rows_affected == 0 {
            return Err(AppError::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to: next.to_string(),
            });
        }

        self.load(id).await
    }
}

#[async_trait]
impl JobStore for Repository {
    async fn create_job(&self, new: NewJob) -> Result<AnalysisJob> {
        let now = chrono::Utc::now();

        let job = AnalysisJobActiveModel {
            id: Set(new.id),
            owner_id: Set(new.owner_id),
            source_key: Set(new.source_key),
            original_name: Set(new.original_name),
            status: Set(JobStatus::Pending.to_string()),
            failure_reason: Set(None),
            analysis: Set(None),
            report_key: Set(None),
            notify_email: Set(new.notify_email),
            email_status: Set(None),
            email_failure_reason: Set(None),
            slide_count: Set(new.slide_count),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            completed_at: Set(None),
        };

        job.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<AnalysisJob>> {
        AnalysisJobEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_owned_job(&self, id: Uuid, owner_id: &str) -> Result<Option<AnalysisJob>> {
        AnalysisJobEntity::find()
            .filter(AnalysisJobColumn::Id.eq(id))
            .filter(AnalysisJobColumn::OwnerId.eq(owner_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_jobs(&self, owner_id: &str) -> Result<Vec<AnalysisJob>> {
        AnalysisJobEntity::find()
            .filter(AnalysisJobColumn::OwnerId.eq(owner_id))
            .order_by_desc(AnalysisJobColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn set_status(&self, id: Uuid, status: JobStatus) -> Result<AnalysisJob> {
        if status.is_terminal() {
            return Err(AppError::Internal {
                message: format!("{} must be set through its dedicated operation", status),
            });
        }
        self.transition(id, status, Vec::new()).await
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<AnalysisJob> {
        let now = chrono::Utc::now().fixed_offset();
        self.transition(
            id,
            JobStatus::Failed,
            vec![
                (AnalysisJobColumn::FailureReason, Some(truncate_reason(reason)).into()),
                (AnalysisJobColumn::ReportKey, Option::<String>::None.into()),
                (AnalysisJobColumn::CompletedAt, Some(now).into()),
            ],
        )
        .await
    }

    async fn attach_analysis(&self, id: Uuid, analysis: &ScoringResult) -> Result<AnalysisJob> {
        let value = serde_json::to_value(analysis)?;

        let mut job: AnalysisJobActiveModel = self.load(id).await?.into();
        job.analysis = Set(Some(value));
        job.updated_at = Set(chrono::Utc::now().into());

        job.update(self.write_conn()).await.map_err(Into::into)
    }

    async fn mark_completed(&self, id: Uuid, report_key: &str) -> Result<AnalysisJob> {
        let now = chrono::Utc::now().fixed_offset();
        self.transition(
            id,
            JobStatus::Completed,
            vec![
                (AnalysisJobColumn::ReportKey, Some(report_key.to_string()).into()),
                (AnalysisJobColumn::CompletedAt, Some(now).into()),
            ],
        )
        .await
    }

    async fn mark_file_unavailable(&self, id: Uuid) -> Result<AnalysisJob> {
        self.transition(
            id,
            JobStatus::FileUnavailable,
            vec![(AnalysisJobColumn::ReportKey, Option::<String>::None.into())],
        )
        .await
    }

    async fn set_email_status(
        &self,
        id: Uuid,
        status: EmailStatus,
        failure_reason: Option<&str>,
    ) -> Result<AnalysisJob> {
        let mut job: AnalysisJobActiveModel = self.load(id).await?.into();
        job.email_status = Set(Some(status.as_str().to_string()));
        job.email_failure_reason = Set(failure_reason.map(truncate_reason));
        job.updated_at = Set(chrono::Utc::now().into());

        job.update(self.write_conn()).await.map_err(Into::into)
    }

    async fn delete_owned_job(&self, id: Uuid, owner_id: &str) -> Result<bool> {
        let result = AnalysisJobEntity::delete_many()
            .filter(AnalysisJobColumn::Id.eq(id))
            .filter(AnalysisJobColumn::OwnerId.eq(owner_id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}
