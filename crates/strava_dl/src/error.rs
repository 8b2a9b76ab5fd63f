//! Error types for the downloader binary.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DlError {
    #[error(transparent)]
    Strava(#[from] strava_client::StravaError),

    #[error("credentials file {path}: {message}")]
    Credentials { path: PathBuf, message: String },

    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cannot determine the home directory")]
    NoHomeDir,
}

pub type DlResult<T> = Result<T, DlError>;
