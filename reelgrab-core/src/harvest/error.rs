use std::path::PathBuf;

use thiserror::Error;

use crate::browser::BrowserError;
use crate::media::MediaError;

pub type HarvestResult<T> = Result<T, HarvestError>;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("invalid reel url: {0}")]
    InvalidUrl(String),
    #[error("could not extract video id from {0}")]
    MissingId(String),
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("acquisition failed: {0}")]
    Acquisition(String),
    #[error("downloaded video too small ({size} bytes)")]
    TooSmall { size: u64 },
    #[error("no video found")]
    NoMediaFound,
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("media tool error: {0}")]
    Media(#[from] MediaError),
    #[error("network error: {0}")]
    Network(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl HarvestError {
    /// True for errors caused by the caller's input rather than the pipeline.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            HarvestError::InvalidUrl(_) | HarvestError::MissingId(_) | HarvestError::TooSmall { .. }
        )
    }
}

impl From<reqwest::Error> for HarvestError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            HarvestError::Timeout(format!("fetch: {error}"))
        } else {
            HarvestError::Network(error.to_string())
        }
    }
}
