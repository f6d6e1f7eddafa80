//! Per-user upload rate limiting using a keyed token bucket
//!
//! Each user gets `uploads_per_hour` tokens that refill evenly across the hour.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use deckforge_common::{
    auth::CallerIdentity,
    config::RateLimitConfig,
    errors::{AppError, Result},
    metrics,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::AppState;

/// Keyed limiter shared by the submission routes
pub struct UploadLimiter {
    limiter: Option<DefaultKeyedRateLimiter<String>>,
    per_hour: u32,
}

impl UploadLimiter {
    /// A zero quota disables limiting
    pub fn new(per_hour: u32) -> Self {
        let limiter = NonZeroU32::new(per_hour).map(|n| RateLimiter::keyed(Quota::per_hour(n)));
        Self { limiter, per_hour }
    }

    #[cfg(test)]
    fn with_quota(quota: Quota, per_hour: u32) -> Self {
        Self {
            limiter: Some(RateLimiter::keyed(quota)),
            per_hour,
        }
    }

    pub fn disabled() -> Self {
        Self {
            limiter: None,
            per_hour: 0,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        if config.enabled {
            Self::new(config.uploads_per_hour)
        } else {
            Self::disabled()
        }
    }

    /// Users currently tracked
    pub fn tracked_users(&self) -> usize {
        self.limiter.as_ref().map_or(0, |limiter| limiter.len())
    }

    /// Forget users whose bucket has refilled completely
    pub fn prune(&self) {
        if let Some(limiter) = &self.limiter {
            let before = limiter.len();
            limiter.retain_recent();
            limiter.shrink_to_fit();
            debug!(before, after = limiter.len(), "Pruned upload rate limiter");
        }
    }

    /// Prune on a fixed interval for the life of the process
    pub fn spawn_pruning(self: Arc<Self>, every: Duration) -> Option<JoinHandle<()>> {
        self.limiter.as_ref()?;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.prune();
            }
        }))
    }

    /// Take one token for `user_id`
    pub fn check(&self, user_id: &str) -> Result<()> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        match limiter.check_key(&user_id.to_string()) {
            Ok(()) => Ok(()),
            Err(_) => {
                warn!(user = %user_id, limit = self.per_hour, "Upload rate limit exceeded");
                metrics::record_rate_limited();
                Err(AppError::RateLimited {
                    limit: self.per_hour,
                })
            }
        }
    }
}

/// Rate limiting middleware for deck submissions
pub async fn upload_rate_limit(
    State(state): State<AppState>,
    caller: CallerIdentity,
    request: Request,
    next: Next,
) -> Result<Response> {
    state.upload_limiter.check(&caller.user_id)?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_is_per_user() {
        let limiter = UploadLimiter::new(2);
        assert!(limiter.check("alice").is_ok());
        assert!(limiter.check("alice").is_ok());

        let err = limiter.check("alice").unwrap_err();
        assert!(matches!(err, AppError::RateLimited { limit: 2 }));

        // Another user's bucket is untouched
        assert!(limiter.check("bob").is_ok());
    }

    #[test]
    fn test_disabled_limiter_never_rejects() {
        let limiter = UploadLimiter::from_config(&RateLimitConfig {
            uploads_per_hour: 1,
            enabled: false,
        });
        for _ in 0..50 {
            assert!(limiter.check("alice").is_ok());
        }
        assert!(UploadLimiter::new(0).check("alice").is_ok());
    }

    #[tokio::test]
    async fn test_prune_forgets_refilled_users() {
        let quota = Quota::with_period(Duration::from_millis(5)).unwrap();
        let limiter = UploadLimiter::with_quota(quota, 1);
        assert!(limiter.check("alice").is_ok());
        assert!(limiter.check("bob").is_ok());
        assert_eq!(limiter.tracked_users(), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        limiter.prune();
        assert_eq!(limiter.tracked_users(), 0);
    }

    #[tokio::test]
    async fn test_pruning_task_only_for_enabled_limiter() {
        assert!(Arc::new(UploadLimiter::disabled())
            .spawn_pruning(Duration::from_secs(60))
            .is_none());

        let handle = Arc::new(UploadLimiter::new(5))
            .spawn_pruning(Duration::from_secs(60))
            .unwrap();
        handle.abort();
    }
}
