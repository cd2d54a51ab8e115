//! Optional post-acquisition upload to an external catalog service.
//!
//! Relay failures never invalidate an artifact already on disk; the caller
//! reports them alongside the local URL instead of failing the request.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use thiserror::Error;
use tracing::info;

use crate::config::RelaySection;
use crate::harvest::OutputArtifact;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("relay rejected upload: status {0}")]
    Rejected(u16),
}

pub struct UploadRelay {
    client: Client,
    config: RelaySection,
}

impl UploadRelay {
    pub fn new(config: RelaySection) -> Result<Self, RelayError> {
        let client = Client::builder().timeout(Duration::from_secs(300)).build()?;
        Ok(Self { client, config })
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Posts the artifact file and its description as multipart form data.
    pub async fn upload(
        &self,
        artifact: &OutputArtifact,
        description: &str,
    ) -> Result<(), RelayError> {
        let bytes = tokio::fs::read(&artifact.path).await?;
        let part = Part::bytes(bytes)
            .file_name(artifact.file_name())
            .mime_str("video/mp4")?;
        let form = Form::new()
            .part("video", part)
            .text("description", description.to_string());
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.token)
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RelayError::Rejected(response.status().as_u16()));
        }
        info!(
            id = %artifact.id,
            endpoint = %self.config.endpoint,
            "Artifact relayed to catalog"
        );
        Ok(())
    }
}
