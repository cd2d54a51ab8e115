use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::browser::CapturedResource;
use crate::config::HarvestSection;
use crate::media::MediaToolkit;

use super::error::{HarvestError, HarvestResult};
use super::probe::ProbedWinner;
use super::{fetch_to_file, remove_quietly, strip_range_params, OutputArtifact};

/// Downloads the chosen media to final storage and enforces the acceptance
/// gates. Contained failures return `Ok(None)` so the caller can try the
/// next strategy; gate violations are reported, never silently dropped.
pub struct Acquirer {
    client: reqwest::Client,
    config: HarvestSection,
    output_dir: PathBuf,
    toolkit: Arc<dyn MediaToolkit>,
}

impl Acquirer {
    pub fn new(
        client: reqwest::Client,
        config: HarvestSection,
        output_dir: PathBuf,
        toolkit: Arc<dyn MediaToolkit>,
    ) -> Self {
        Self {
            client,
            config,
            output_dir,
            toolkit,
        }
    }

    /// Legacy-compatible path: re-download the probe winner as-is.
    pub async fn single_stream(
        &self,
        winner: &ProbedWinner,
        artifact_id: &str,
    ) -> HarvestResult<Option<OutputArtifact>> {
        let path = self.output_dir.join(format!("{artifact_id}.mp4"));
        info!(url = %winner.download_url, height = winner.height, "Downloading best candidate");
        let size = match fetch_to_file(
            &self.client,
            &winner.download_url,
            &winner.request_headers,
            &self.config.referer,
            self.config.fetch_timeout(),
            &path,
        )
        .await
        {
            Ok(size) => size,
            Err(err) => {
                warn!(url = %winner.download_url, error = %err, "Download failed");
                remove_quietly(&path);
                return Ok(None);
            }
        };
        if size <= self.config.min_single_bytes {
            warn!(size, "Downloaded video too small");
            remove_quietly(&path);
            return Err(HarvestError::TooSmall { size });
        }
        info!(path = %path.display(), size, "Video downloaded");
        Ok(Some(OutputArtifact {
            id: artifact_id.to_string(),
            path,
            size_bytes: size,
        }))
    }

    /// Downloads a separate video/audio pair and muxes them into one file,
    /// copying the video stream and re-encoding audio.
    pub async fn dual_stream(
        &self,
        video: &CapturedResource,
        audio: &CapturedResource,
        artifact_id: &str,
    ) -> HarvestResult<Option<OutputArtifact>> {
        let video_path = self.output_dir.join(format!("{artifact_id}_video.mp4"));
        let audio_path = self.output_dir.join(format!("{artifact_id}_track.mp4"));
        let output_path = self.output_dir.join(format!("{artifact_id}.mp4"));

        let cleanup_inputs = || {
            remove_quietly(&video_path);
            remove_quietly(&audio_path);
        };

        info!(video = %video.url, audio = %audio.url, "Downloading dual streams");
        for (resource, path) in [(video, &video_path), (audio, &audio_path)] {
            let download_url = strip_range_params(&resource.url);
            if let Err(err) = fetch_to_file(
                &self.client,
                &download_url,
                &resource.request_headers,
                &self.config.referer,
                self.config.fetch_timeout(),
                path,
            )
            .await
            {
                warn!(url = %download_url, error = %err, "Stream download failed");
                cleanup_inputs();
                return Ok(None);
            }
        }

        if let Err(err) = self
            .toolkit
            .mux(
                &video_path,
                &audio_path,
                &output_path,
                &self.config.mux_audio_bitrate,
            )
            .await
        {
            warn!(error = %err, "Mux failed");
            cleanup_inputs();
            remove_quietly(&output_path);
            return Ok(None);
        }
        cleanup_inputs();

        let size = match std::fs::metadata(&output_path) {
            Ok(metadata) => metadata.len(),
            Err(source) => {
                remove_quietly(&output_path);
                return Err(HarvestError::Io {
                    source,
                    path: output_path,
                });
            }
        };
        if size <= self.config.min_mux_bytes {
            remove_quietly(&output_path);
            return Err(HarvestError::TooSmall { size });
        }
        let probe = match self.toolkit.inspect(&output_path).await {
            Ok(probe) => probe,
            Err(err) => {
                remove_quietly(&output_path);
                return Err(err.into());
            }
        };
        let height = probe.height.unwrap_or(0);
        if !probe.has_audio || height < self.config.min_height {
            remove_quietly(&output_path);
            return Err(HarvestError::Acquisition(format!(
                "mux output failed quality gate (audio={}, height={height})",
                probe.has_audio
            )));
        }
        info!(path = %output_path.display(), size, height, "Dual-stream mux accepted");
        Ok(Some(OutputArtifact {
            id: artifact_id.to_string(),
            path: output_path,
            size_bytes: size,
        }))
    }
}
