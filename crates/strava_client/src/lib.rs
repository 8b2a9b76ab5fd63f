//! `StravaClient` trait, activity model and the concurrent download engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::pagination::{PageFailure, PaginationConfig, PaginationCoordinator};

pub mod aggregate;
pub mod config;
pub mod http_client;
pub mod pagination;
pub mod retry;
pub mod utils;

/// Strava refuses to return more than this many activities per page.
pub const MAX_PER_PAGE: u32 = 200;

/// Longest error-body excerpt kept in an error value.
pub(crate) const BODY_SNIPPET_LEN: usize = 256;

/// Failure to turn refresh credentials into an access token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token exchange request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token exchange rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("cannot decode token response: {0}")]
    Decode(String),
}

/// Failure to retrieve a single page of activities.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("page {page}: request failed: {source}")]
    Http {
        page: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("page {page}: unexpected status {status}: {body}")]
    Status { page: u32, status: u16, body: String },
    #[error("page {page}: cannot decode activities: {message}")]
    Decode { page: u32, message: String },
    #[error("invalid page index {0}, pages start at 1")]
    InvalidPage(u32),
    #[error("page worker aborted: {0}")]
    Worker(String),
}

impl FetchError {
    /// Page index the failure belongs to, if any.
    pub fn page(&self) -> Option<u32> {
        match self {
            FetchError::Http { page, .. }
            | FetchError::Status { page, .. }
            | FetchError::Decode { page, .. } => Some(*page),
            FetchError::InvalidPage(page) => Some(*page),
            FetchError::Worker(_) => None,
        }
    }

    /// Whether re-issuing the same request may succeed.
    ///
    /// Transport failures, rate limiting (429) and server errors are transient.
    /// Decode errors and other client errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether every later page will fail the same way, e.g. a token without
    /// `activity:read_all` scope (401/403). Rate limiting is not fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => (400..500).contains(status) && *status != 429,
            FetchError::InvalidPage(_) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StravaError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Long-lived OAuth application credentials plus the athlete's refresh token.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub refresh_token: SecretString,
}

/// Short-lived bearer token obtained from a refresh-token exchange.
#[derive(Clone, Debug)]
pub struct AccessToken {
    pub token_type: String,
    pub access_token: SecretString,
    pub expires_at: DateTime<Utc>,
    pub expires_in: Duration,
    /// Strava may rotate the refresh token on every exchange.
    pub refresh_token: Option<SecretString>,
}

impl AccessToken {
    /// Build a bearer token that expires `expires_in` from now.
    pub fn bearer(access_token: impl Into<String>, expires_in: Duration) -> Self {
        let expires_at = chrono::Duration::from_std(expires_in)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or_else(Utc::now);
        Self {
            token_type: "Bearer".into(),
            access_token: SecretString::from(access_token.into()),
            expires_at,
            expires_in,
            refresh_token: None,
        }
    }

    /// `expires_in` broken down into hours, minutes and seconds.
    pub fn expires_in_hms(&self) -> (u64, u64, u64) {
        utils::split_hms(self.expires_in)
    }
}

/// One activity as returned by `GET /athlete/activities`.
///
/// Only `id` (dedup key) and `start_date_local` (sort key) are decoded. Every
/// other provider field stays in `extra` exactly as it arrived, nulls and
/// integer-valued metrics included, so the written record matches the response.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    pub id: i64,
    pub start_date_local: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Activity {
    pub fn name(&self) -> Option<&str> {
        self.extra.get("name").and_then(serde_json::Value::as_str)
    }

    /// The provider's `type` field, e.g. `Ride`.
    pub fn activity_type(&self) -> Option<&str> {
        self.extra.get("type").and_then(serde_json::Value::as_str)
    }
}

/// Activities returned for one 1-based page index. Empty means no more data.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    pub index: u32,
    pub activities: Vec<Activity>,
}

impl Page {
    pub fn new(index: u32, activities: Vec<Activity>) -> Self {
        Self { index, activities }
    }

    /// The first empty page marks the end of the listing.
    pub fn is_terminal(&self) -> bool {
        self.activities.is_empty()
    }
}

#[async_trait]
pub trait StravaClient: Send + Sync + 'static {
    /// Exchange a refresh token for a fresh access token.
    async fn exchange_refresh_token(
        &self,
        credentials: &Credentials,
    ) -> Result<AccessToken, AuthError>;

    /// Fetch one page of the authenticated athlete's activities.
    ///
    /// Returns an empty page once `page` is past the last activity. Never retries.
    async fn fetch_activities_page(
        &self,
        token: &AccessToken,
        page: u32,
        per_page: u32,
    ) -> Result<Page, FetchError>;
}

/// Result of a complete download: the token used and every activity, newest first.
#[derive(Debug)]
pub struct ActivityHistory {
    pub token: AccessToken,
    pub activities: Vec<Activity>,
    pub terminal_page: Option<u32>,
    /// Pages that were skipped under [`pagination::FailurePolicy::SkipPage`].
    pub gaps: Vec<PageFailure>,
}

/// Exchange the refresh token, fetch every page and sort the result.
///
/// An [`AuthError`] stops the run before any page is requested.
pub async fn download_history<C: StravaClient + ?Sized>(
    client: Arc<C>,
    credentials: &Credentials,
    config: PaginationConfig,
) -> Result<ActivityHistory, StravaError> {
    let token = client.exchange_refresh_token(credentials).await?;
    let coordinator = PaginationCoordinator::new(client, config);
    let report = coordinator.download_all(&token).await?;
    let terminal_page = report.terminal_page;
    let gaps = report.failures;
    let activities = aggregate::sort_activities(report.pages);
    Ok(ActivityHistory {
        token,
        activities,
        terminal_page,
        gaps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn activity_keeps_unknown_fields() {
        let payload = json!({
            "id": 12345678987654321i64,
            "name": "Morning Ride",
            "type": "Ride",
            "start_date_local": "2024-01-03T07:15:00Z",
            "kudos_count": 4,
            "map": {"id": "a1", "summary_polyline": null}
        });
        let a: Activity = serde_json::from_value(payload).expect("deserialize activity");
        assert_eq!(a.id, 12345678987654321);
        assert_eq!(a.activity_type(), Some("Ride"));
        assert_eq!(a.name(), Some("Morning Ride"));
        assert_eq!(a.extra.get("kudos_count"), Some(&json!(4)));

        let back = serde_json::to_value(&a).expect("serialize activity");
        assert_eq!(back["map"]["id"], "a1");
        assert_eq!(back["type"], "Ride");
    }

    #[test]
    fn activity_round_trips_unchanged() {
        let payload = json!({
            "id": 1,
            "start_date_local": "2024-01-03T07:15:00Z",
            "distance": 5000,
            "moving_time": 1520,
            "average_speed": 3.29,
            "weighted_average_watts": 200,
            "average_heartrate": null,
            "trainer": false
        });
        let a: Activity = serde_json::from_value(payload.clone()).expect("deserialize activity");
        assert!(a.name().is_none());
        let back = serde_json::to_value(&a).expect("serialize activity");
        assert_eq!(back, payload);
        assert!(back["distance"].is_u64());
    }

    #[test]
    fn activity_without_local_start_is_rejected() {
        let payload = json!({"id": 1, "name": "x"});
        let res: Result<Activity, _> = serde_json::from_value(payload);
        assert!(res.is_err());
    }

    #[test]
    fn transient_classification() {
        let rate_limited = FetchError::Status {
            page: 3,
            status: 429,
            body: String::new(),
        };
        let not_found = FetchError::Status {
            page: 3,
            status: 404,
            body: String::new(),
        };
        let decode = FetchError::Decode {
            page: 3,
            message: "eof".into(),
        };
        assert!(rate_limited.is_transient());
        assert!(!not_found.is_transient());
        assert!(!decode.is_transient());
        assert!(not_found.is_fatal());
        assert!(!rate_limited.is_fatal());
        assert!(!decode.is_fatal());
        assert_eq!(decode.page(), Some(3));
    }

    #[test]
    fn bearer_token_breaks_down_expiry() {
        let token = AccessToken::bearer("tok", Duration::from_secs(5 * 3600 + 59 * 60 + 7));
        assert_eq!(token.expires_in_hms(), (5, 59, 7));
        assert!(token.expires_at > Utc::now());
    }
}
