use crate::{Credentials, StravaError};
use secrecy::SecretString;
use std::collections::HashMap;

pub const DEFAULT_API_BASE_URL: &str = "https://www.strava.com/api/v3";
pub const DEFAULT_OAUTH_URL: &str = "https://www.strava.com/oauth/token";

const REQUIRED_KEYS: [&str; 3] = ["CLIENT_ID", "CLIENT_SECRET", "REFRESH_TOKEN"];

#[derive(Clone, Debug)]
pub struct Config {
    pub credentials: Credentials,
    pub api_base_url: String,
    pub oauth_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, StravaError> {
        Self::from_env_with(|k| std::env::var(k).ok())
    }

    /// Testable helper that reads configuration values using the provided
    /// function. This avoids mutating global environment in tests and keeps
    /// `from_env()` small and safe.
    pub fn from_env_with<F>(mut get: F) -> Result<Self, StravaError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut required = |key: &str| {
            get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| StravaError::Config(format!("{key} missing")))
        };
        let client_id = required("CLIENT_ID")?;
        let client_secret = required("CLIENT_SECRET")?;
        let refresh_token = required("REFRESH_TOKEN")?;

        let api_base_url = get("STRAVA_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.into())
            .trim_end_matches('/')
            .to_string();
        let oauth_url = get("STRAVA_OAUTH_URL").unwrap_or_else(|| DEFAULT_OAUTH_URL.into());

        Ok(Self {
            credentials: Credentials {
                client_id,
                client_secret: SecretString::from(client_secret),
                refresh_token: SecretString::from(refresh_token),
            },
            api_base_url,
            oauth_url,
        })
    }

    /// Read a dotenv-style file body. Variables already present in the process
    /// environment win over the file.
    pub fn from_dotenv_str(contents: &str) -> Result<Self, StravaError> {
        let vars = parse_dotenv(contents)?;
        Self::from_env_with(|k| std::env::var(k).ok().or_else(|| vars.get(k).cloned()))
    }

    /// Like [`Config::from_dotenv_str`] but ignores the process environment.
    pub fn from_dotenv_str_only(contents: &str) -> Result<Self, StravaError> {
        let vars = parse_dotenv(contents)?;
        Self::from_env_with(|k| vars.get(k).cloned())
    }
}

/// Collect the `KEY = value` pairs of a dotenv file without touching the
/// process environment.
pub fn parse_dotenv(contents: &str) -> Result<HashMap<String, String>, StravaError> {
    dotenvy::from_read_iter(contents.as_bytes())
        .map(|item| item.map_err(|e| StravaError::Config(format!("invalid dotenv file: {e}"))))
        .collect()
}

/// Names of the keys a credentials file must define.
pub fn required_keys() -> &'static [&'static str] {
    &REQUIRED_KEYS
}
