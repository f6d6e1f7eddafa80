//! Caller identity
//!
//! Authentication happens upstream; the fronting service forwards a stable
//! user identifier with every request:
//! - `X-User-Id` (required)
//! - `X-User-Email` (optional, completion notification recipient)
//! - `X-Request-Id` (optional, generated when absent)

use crate::errors::{AppError, Result};
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_USER_ID_LEN: usize = 128;

/// Identity of the user making a request; every job read or delete is scoped to `user_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
    pub email: Option<String>,
    pub request_id: String,
}

impl CallerIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Loose address check: one `@` with non-empty local part and a dotted domain
fn plausible_email(raw: &str) -> bool {
    match raw.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !raw.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Axum extractor for CallerIdentity
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let request_id = header(parts, REQUEST_ID_HEADER)
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let user_id = header(parts, USER_ID_HEADER)
            .filter(|id| id.len() <= MAX_USER_ID_LEN)
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing or invalid X-User-Id header".to_string(),
            })?
            .to_string();

        let email = header(parts, USER_EMAIL_HEADER)
            .filter(|e| plausible_email(e))
            .map(String::from);

        Ok(CallerIdentity {
            user_id,
            email,
            request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(headers: &[(&str, &str)]) -> Result<CallerIdentity> {
        let mut builder = Request::builder().uri("/v1/jobs");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        CallerIdentity::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_full_identity() {
        let caller = extract(&[
            ("x-user-id", "user_123"),
            ("x-user-email", "founder@example.com"),
            ("x-request-id", "req-1"),
        ])
        .await
        .unwrap();

        assert_eq!(caller.user_id, "user_123");
        assert_eq!(caller.email.as_deref(), Some("founder@example.com"));
        assert_eq!(caller.request_id, "req-1");
    }

    #[tokio::test]
    async fn test_missing_user_is_unauthorized() {
        let err = extract(&[("x-user-email", "a@b.co")]).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized { .. }));

        let err = extract(&[("x-user-id", "   ")]).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized { .. }));

        let long = "u".repeat(MAX_USER_ID_LEN + 1);
        assert!(extract(&[("x-user-id", long.as_str())]).await.is_err());
    }

    #[tokio::test]
    async fn test_request_id_generated_and_bad_email_dropped() {
        let caller = extract(&[("x-user-id", "u1"), ("x-user-email", "not-an-email")])
            .await
            .unwrap();
        assert!(caller.email.is_none());
        assert!(Uuid::parse_str(&caller.request_id).is_ok());
    }

    #[test]
    fn test_plausible_email() {
        assert!(plausible_email("a@b.co"));
        assert!(!plausible_email("a@b"));
        assert!(!plausible_email("@b.co"));
        assert!(!plausible_email("a@@b.co"));
        assert!(!plausible_email("a b@c.co"));
        assert!(!plausible_email("a@.co"));
    }
}
