//! Database layer for DeckForge
//!
//! Provides:
//! - SeaORM entity model for analysis jobs
//! - The `JobStore` contract with Postgres and in-memory implementations
//! - Connection pool management

mod memory;
pub mod models;
mod repository;
mod store;

pub use memory::InMemoryJobStore;
pub use repository::Repository;
pub use store::{truncate_reason, JobStore, NewJob, MAX_FAILURE_REASON_CHARS};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Build the job store selected by `database.url`.
///
/// `memory` keeps jobs in process; anything else is a Postgres URL.
pub async fn create_job_store(config: &DatabaseConfig) -> Result<Arc<dyn JobStore>> {
    if config.url == "memory" {
        info!("Using in-memory job store");
        return Ok(Arc::new(InMemoryJobStore::new()));
    }

    let pool = DbPool::new(config).await?;
    let repository = Repository::new(pool);
    if config.auto_migrate {
        repository.ensure_schema().await?;
    }
    Ok(Arc::new(repository))
}

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,
    
    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");
        
        let mut primary_opts = ConnectOptions::new(&config.url);
        primary_opts
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);
        
        let primary = Database::connect(primary_opts)
            .await
            .map_err(|e| AppError::DatabaseConnection { 
                message: format!("Failed to connect to primary: {}", e) 
            })?;
        
        // Connect to replica if configured
        let replica = if let Some(ref read_url) = config.read_url {
            info!("Connecting to read replica...");
            
            let mut replica_opts = ConnectOptions::new(read_url);
            replica_opts
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
                .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
                .sqlx_logging(false);
            
            let replica_conn = Database::connect(replica_opts)
                .await
                .map_err(|e| AppError::DatabaseConnection { 
                    message: format!("Failed to connect to replica: {}", e) 
                })?;
            
            Some(replica_conn)
        } else {
            None
        };
        
        info!("Database connections established");
        
        Ok(Self { primary, replica })
    }
    
    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }
    
    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }
    
    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        use sea_orm::ConnectionTrait;
        
        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Primary ping failed: {}", e),
            })?;
        
        if let Some(ref replica) = self.replica {
            replica
                .execute_unprepared("SELECT 1")
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Replica ping failed: {}", e),
                })?;
        }
        
        Ok(())
    }
}
