mod acquire;
mod candidate;
mod capture;
mod error;
mod probe;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::page::Page;
use chrono::Utc;
use reqwest::header::{HeaderName, HeaderValue, REFERER};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use url::Url;

use crate::browser::{BrowserLauncher, BrowserSession, ResourceSniffer, SniffReport};
use crate::config::ReelgrabConfig;
use crate::media::{FfmpegToolkit, MediaToolkit};

pub use acquire::Acquirer;
pub use candidate::{dual_pair, filter_and_rank, RankedCandidate, TargetRequest};
pub use capture::LiveCapture;
pub use error::{HarvestError, HarvestResult};
pub use probe::{ProbedWinner, StreamProber};

pub(crate) use candidate::strip_range_params;

/// The final accepted file on durable storage.
#[derive(Debug, Clone, Serialize)]
pub struct OutputArtifact {
    /// Identifier derived from acquisition time; also the file stem.
    pub id: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl OutputArtifact {
    pub fn file_name(&self) -> String {
        format!("{}.mp4", self.id)
    }
}

/// Runs the whole pipeline for one request: sniff, rank, probe, acquire,
/// and fall back to live capture when nothing is directly fetchable.
pub struct Harvester {
    launcher: BrowserLauncher,
    sniffer: ResourceSniffer,
    prober: StreamProber,
    acquirer: Acquirer,
    live: LiveCapture,
}

impl Harvester {
    pub fn new(config: ReelgrabConfig) -> HarvestResult<Self> {
        Self::with_toolkit(config, Arc::new(FfmpegToolkit::default()))
    }

    /// Builds the pipeline around a custom media toolkit; tests inject stubs
    /// here so the loop runs without ffmpeg.
    pub fn with_toolkit(
        config: ReelgrabConfig,
        toolkit: Arc<dyn MediaToolkit>,
    ) -> HarvestResult<Self> {
        let output_dir = config.output_dir();
        std::fs::create_dir_all(&output_dir).map_err(|source| HarvestError::Io {
            source,
            path: output_dir.clone(),
        })?;
        let client = reqwest::Client::builder()
            .user_agent(config.browser.user_agent.clone())
            .build()
            .map_err(|err| HarvestError::Network(err.to_string()))?;
        Ok(Self {
            launcher: BrowserLauncher::new(config.browser.clone()),
            sniffer: ResourceSniffer::new(config.browser.clone()),
            prober: StreamProber::new(
                client.clone(),
                config.harvest.clone(),
                output_dir.clone(),
                Arc::clone(&toolkit),
            ),
            acquirer: Acquirer::new(
                client,
                config.harvest.clone(),
                output_dir.clone(),
                Arc::clone(&toolkit),
            ),
            live: LiveCapture::new(
                config.capture.clone(),
                config.harvest.clone(),
                output_dir,
                toolkit,
            ),
        })
    }

    /// End-to-end harvest of one reel URL.
    ///
    /// Validation happens before the browser launches; the session is torn
    /// down on every exit path.
    pub async fn harvest(&self, url: &str) -> HarvestResult<OutputArtifact> {
        let target = TargetRequest::parse(url)?;
        info!(video_id = %target.video_id, "Targeting reel");
        let session = self.launcher.launch().await?;
        let result = self.run_session(&session, &target).await;
        if let Err(err) = session.shutdown().await {
            warn!(error = %err, "Browser teardown failed");
        }
        result
    }

    async fn run_session(
        &self,
        session: &BrowserSession,
        target: &TargetRequest,
    ) -> HarvestResult<OutputArtifact> {
        let page = session.new_page().await?;
        let report = self.sniffer.collect(&page, &target.url).await?;
        self.resolve(target, &report, Some(&page)).await
    }

    /// Resolves a finished sniffing report into an artifact, trying each
    /// acquisition strategy in order. Exposed separately so the candidate
    /// loop can be exercised without a live browser; `page` is only needed
    /// for the capture fallback.
    pub async fn resolve(
        &self,
        target: &TargetRequest,
        report: &SniffReport,
        page: Option<&Page>,
    ) -> HarvestResult<OutputArtifact> {
        let candidates = filter_and_rank(&report.resources, report.media.as_ref(), target);
        info!(
            observed = report.resources.len(),
            ranked = candidates.len(),
            "Candidates ranked"
        );

        if let Some(winner) = self.prober.select_best(&candidates).await {
            if let Some(artifact) = self.acquirer.single_stream(&winner, &artifact_id()).await? {
                return Ok(artifact);
            }
        }

        if let Some((video, audio)) = dual_pair(&report.resources, target) {
            if let Some(artifact) = self
                .acquirer
                .dual_stream(video, audio, &artifact_id())
                .await?
            {
                return Ok(artifact);
            }
        }

        if let (Some(page), Some(media)) = (page, report.media.as_ref()) {
            if LiveCapture::eligible(Some(media)) {
                return self.live.record(page, media, &artifact_id()).await;
            }
        }

        Err(HarvestError::NoMediaFound)
    }
}

/// Artifact identifiers are acquisition timestamps, like the output files
/// they name.
pub(crate) fn artifact_id() -> String {
    Utc::now().timestamp_millis().to_string()
}

pub(crate) fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "Failed to remove file"),
    }
}

/// Streams `url` to `path`, replaying the captured request headers plus the
/// configured referrer. `file://` URLs are copied directly so the pipeline
/// can be exercised without a network.
pub(crate) async fn fetch_to_file(
    client: &reqwest::Client,
    url: &str,
    headers: &HashMap<String, String>,
    referer: &str,
    timeout: Duration,
    path: &Path,
) -> HarvestResult<u64> {
    if let Ok(parsed) = Url::parse(url) {
        if parsed.scheme() == "file" {
            let source = parsed
                .to_file_path()
                .map_err(|_| HarvestError::Network(format!("invalid file url: {url}")))?;
            return tokio::fs::copy(&source, path)
                .await
                .map_err(|source| HarvestError::Io {
                    source,
                    path: path.to_path_buf(),
                });
        }
    }

    let mut request = client.get(url).timeout(timeout).header(REFERER, referer);
    for (name, value) in headers {
        // CDP reports HTTP/2 pseudo-headers; those cannot be replayed.
        if name.starts_with(':') {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            request = request.header(name, value);
        }
    }
    let response = request.send().await?.error_for_status()?;

    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|source| HarvestError::Io {
            source,
            path: path.to_path_buf(),
        })?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    use futures::StreamExt;
    while let Some(chunk) = stream.next().await {
        let data = chunk?;
        written += data.len() as u64;
        file.write_all(&data)
            .await
            .map_err(|source| HarvestError::Io {
                source,
                path: path.to_path_buf(),
            })?;
    }
    file.flush().await.map_err(|source| HarvestError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    Ok(written)
}
