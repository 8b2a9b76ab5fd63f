//! HTTP client implementation for the Strava API.
//!
//! This module provides a reqwest-based implementation of the [`StravaClient`](crate::StravaClient) trait.

use crate::config::{Config, DEFAULT_API_BASE_URL, DEFAULT_OAUTH_URL};
use crate::utils::body_snippet;
use crate::{
    AccessToken, Activity, AuthError, BODY_SNIPPET_LEN, Credentials, FetchError, Page, StravaClient,
    StravaError,
};
use async_trait::async_trait;
use chrono::DateTime;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

/// Per-request timeout applied by default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the Strava API using reqwest.
#[derive(Clone, Debug)]
pub struct ReqwestStravaClient {
    api_base_url: String,
    oauth_url: String,
    client: reqwest::Client,
}

impl ReqwestStravaClient {
    /// Create a new client instance.
    ///
    /// # Arguments
    /// * `api_base_url` - The API root (e.g., "https://www.strava.com/api/v3")
    /// * `oauth_url` - The token endpoint (e.g., "https://www.strava.com/oauth/token")
    pub fn new(api_base_url: &str, oauth_url: &str) -> Result<Self, StravaError> {
        Self::with_timeout(api_base_url, oauth_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        api_base_url: &str,
        oauth_url: &str,
        timeout: Duration,
    ) -> Result<Self, StravaError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StravaError::Config(format!("building http client: {e}")))?;
        Ok(Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            oauth_url: oauth_url.to_string(),
            client,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, StravaError> {
        Self::new(&cfg.api_base_url, &cfg.oauth_url)
    }

    /// Client pointed at the public Strava endpoints.
    pub fn production() -> Result<Self, StravaError> {
        Self::new(DEFAULT_API_BASE_URL, DEFAULT_OAUTH_URL)
    }

    fn activities_url(&self) -> String {
        format!("{}/athlete/activities", self.api_base_url)
    }
}

#[derive(serde::Deserialize)]
struct TokenPayload {
    #[serde(default = "default_token_type")]
    token_type: String,
    access_token: String,
    expires_at: i64,
    expires_in: u64,
    refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl TokenPayload {
    fn into_access_token(self) -> Result<AccessToken, AuthError> {
        let expires_at = DateTime::from_timestamp(self.expires_at, 0).ok_or_else(|| {
            AuthError::Decode(format!("expires_at out of range: {}", self.expires_at))
        })?;
        Ok(AccessToken {
            token_type: self.token_type,
            access_token: SecretString::from(self.access_token),
            expires_at,
            expires_in: Duration::from_secs(self.expires_in),
            refresh_token: self.refresh_token.map(SecretString::from),
        })
    }
}

#[async_trait]
impl StravaClient for ReqwestStravaClient {
    async fn exchange_refresh_token(
        &self,
        credentials: &Credentials,
    ) -> Result<AccessToken, AuthError> {
        let form = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.expose_secret()),
            ("refresh_token", credentials.refresh_token.expose_secret()),
            ("grant_type", "refresh_token"),
        ];
        let resp = self.client.post(&self.oauth_url).form(&form).send().await?;
        let status = resp.status();
        // Read body as text first so a shape mismatch can report what was returned.
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body: body_snippet(&text, BODY_SNIPPET_LEN),
            });
        }
        let payload: TokenPayload = serde_json::from_str(&text).map_err(|e| {
            AuthError::Decode(format!(
                "{e} - status {} - body: {}",
                status.as_u16(),
                body_snippet(&text, BODY_SNIPPET_LEN)
            ))
        })?;
        let token = payload.into_access_token()?;
        tracing::debug!(expires_at = %token.expires_at, "access token obtained");
        Ok(token)
    }

    async fn fetch_activities_page(
        &self,
        token: &AccessToken,
        page: u32,
        per_page: u32,
    ) -> Result<Page, FetchError> {
        if page == 0 {
            return Err(FetchError::InvalidPage(page));
        }
        let qp = [("page", page.to_string()), ("per_page", per_page.to_string())];
        let resp = self
            .client
            .get(self.activities_url())
            .bearer_auth(token.access_token.expose_secret())
            .query(&qp)
            .send()
            .await
            .map_err(|source| FetchError::Http { page, source })?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|source| FetchError::Http { page, source })?;
        if !status.is_success() {
            return Err(FetchError::Status {
                page,
                status: status.as_u16(),
                body: body_snippet(&text, BODY_SNIPPET_LEN),
            });
        }
        let activities: Vec<Activity> =
            serde_json::from_str(&text).map_err(|e| FetchError::Decode {
                page,
                message: format!("{e} - body: {}", body_snippet(&text, BODY_SNIPPET_LEN)),
            })?;
        tracing::trace!(page, count = activities.len(), "page decoded");
        Ok(Page::new(page, activities))
    }
}
