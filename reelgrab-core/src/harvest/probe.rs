use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::HarvestSection;
use crate::media::MediaToolkit;

use super::candidate::RankedCandidate;
use super::{artifact_id, fetch_to_file, remove_quietly};

/// The candidate that survived probing, with its combined score.
#[derive(Debug, Clone)]
pub struct ProbedWinner {
    pub download_url: String,
    pub request_headers: HashMap<String, String>,
    pub total_score: i64,
    pub height: u32,
}

/// Probes ranked candidates one at a time, keeping at most one temp file on
/// disk; the winner is re-downloaded later by the acquirer.
pub struct StreamProber {
    client: reqwest::Client,
    config: HarvestSection,
    output_dir: PathBuf,
    toolkit: Arc<dyn MediaToolkit>,
}

impl StreamProber {
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

    /// Sequentially probes every candidate and returns the best acceptable
    /// one. Candidate-local failures are logged and skipped; they never fail
    /// the request.
    pub async fn select_best(&self, candidates: &[RankedCandidate]) -> Option<ProbedWinner> {
        let mut best: Option<ProbedWinner> = None;
        for (index, candidate) in candidates.iter().enumerate() {
            let temp_path = self
                .output_dir
                .join(format!("{}_{index}_probe.mp4", artifact_id()));
            let outcome = self.probe_candidate(candidate, &temp_path).await;
            // The probe file never outlives the probe, accept or reject.
            remove_quietly(&temp_path);
            let probe = match outcome {
                Ok(probe) => probe,
                Err(reason) => {
                    warn!(url = %candidate.download_url, %reason, "Probe failed, skipping candidate");
                    continue;
                }
            };
            if !probe.has_audio {
                info!(url = %candidate.download_url, "Excluded (no audio track)");
                continue;
            }
            let height = probe.height.unwrap_or(0);
            let total_score = candidate.score + i64::from(height);
            let current_best = best.as_ref().map(|winner| winner.total_score).unwrap_or(i64::MIN);
            if total_score > current_best {
                debug!(url = %candidate.download_url, total_score, height, "New best candidate");
                best = Some(ProbedWinner {
                    download_url: candidate.download_url.clone(),
                    request_headers: candidate.resource.request_headers.clone(),
                    total_score,
                    height,
                });
            }
        }
        best
    }

    async fn probe_candidate(
        &self,
        candidate: &RankedCandidate,
        temp_path: &std::path::Path,
    ) -> Result<crate::media::MediaProbe, String> {
        debug!(url = %candidate.download_url, "Probing candidate");
        fetch_to_file(
            &self.client,
            &candidate.download_url,
            &candidate.resource.request_headers,
            &self.config.referer,
            self.config.fetch_timeout(),
            temp_path,
        )
        .await
        .map_err(|err| err.to_string())?;
        self.toolkit
            .inspect(temp_path)
            .await
            .map_err(|err| err.to_string())
    }
}
