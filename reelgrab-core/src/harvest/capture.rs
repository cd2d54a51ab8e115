use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use tracing::{info, warn};

use crate::browser::{BrowserError, MediaElementSnapshot};
use crate::config::{CaptureSection, HarvestSection};
use crate::media::{EncodeProfile, MediaToolkit};

use super::error::{HarvestError, HarvestResult};
use super::{remove_quietly, OutputArtifact};

/// Last-resort strategy: record the still-playing media element's rendered
/// output inside the open page session and transcode the recording.
pub struct LiveCapture {
    capture: CaptureSection,
    harvest: HarvestSection,
    output_dir: PathBuf,
    toolkit: Arc<dyn MediaToolkit>,
}

impl LiveCapture {
    pub fn new(
        capture: CaptureSection,
        harvest: HarvestSection,
        output_dir: PathBuf,
        toolkit: Arc<dyn MediaToolkit>,
    ) -> Self {
        Self {
            capture,
            harvest,
            output_dir,
            toolkit,
        }
    }

    /// The fallback only applies when the element plays from a
    /// browser-internal reference that no fetch could ever reach.
    pub fn eligible(media: Option<&MediaElementSnapshot>) -> bool {
        media
            .and_then(|media| media.current_src.as_deref())
            .map(|src| src.starts_with("blob:"))
            .unwrap_or(false)
    }

    /// Reported duration plus a safety margin, clamped to a floor so short
    /// or unknown durations still capture something playable.
    pub fn recording_duration(&self, reported_seconds: Option<f64>) -> Duration {
        let margin = self.capture.margin_seconds as f64;
        let floor = self.capture.floor_seconds as f64;
        let seconds = reported_seconds
            .map(|duration| duration + margin)
            .unwrap_or(0.0)
            .max(floor);
        Duration::from_secs_f64(seconds)
    }

    pub async fn record(
        &self,
        page: &Page,
        media: &MediaElementSnapshot,
        artifact_id: &str,
    ) -> HarvestResult<OutputArtifact> {
        let duration = self.recording_duration(media.duration);
        info!(
            seconds = duration.as_secs(),
            source = media.current_src.as_deref().unwrap_or(""),
            "Recording media element"
        );

        let script = RECORD_SCRIPT.replace("__DURATION_MS__", &duration.as_millis().to_string());
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(BrowserError::Configuration)?;
        // The promise resolves when the recorder stops; leave headroom for
        // encoding the blob and shipping it over CDP.
        let evaluation = tokio::time::timeout(
            duration + Duration::from_secs(30),
            page.evaluate(params),
        )
        .await
        .map_err(|_| HarvestError::Timeout("live capture recording".into()))?
        .map_err(BrowserError::from)?;
        let data_url: Option<String> = evaluation
            .into_value()
            .map_err(|err| HarvestError::Acquisition(format!("capture payload: {err}")))?;
        let data_url = data_url.ok_or(HarvestError::NoMediaFound)?;

        let raw_path = self.output_dir.join(format!("{artifact_id}.webm"));
        let output_path = self.output_dir.join(format!("{artifact_id}.mp4"));
        let encoded = data_url
            .split_once(',')
            .map(|(_, payload)| payload)
            .ok_or_else(|| HarvestError::Acquisition("malformed capture data url".into()))?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|err| HarvestError::Acquisition(format!("capture decode: {err}")))?;
        store_recording(&bytes, &raw_path)?;
        info!(size = bytes.len(), path = %raw_path.display(), "Recording saved");

        let profile = EncodeProfile::from(&self.capture);
        if let Err(err) = self
            .toolkit
            .encode_capture(&raw_path, &output_path, &profile)
            .await
        {
            remove_quietly(&raw_path);
            remove_quietly(&output_path);
            return Err(err.into());
        }
        remove_quietly(&raw_path);

        self.accept(output_path, artifact_id).await
    }

    async fn accept(&self, path: PathBuf, artifact_id: &str) -> HarvestResult<OutputArtifact> {
        let size = match std::fs::metadata(&path) {
            Ok(metadata) => metadata.len(),
            Err(source) => {
                remove_quietly(&path);
                return Err(HarvestError::Io { source, path });
            }
        };
        let probe = match self.toolkit.inspect(&path).await {
            Ok(probe) => probe,
            Err(err) => {
                remove_quietly(&path);
                return Err(err.into());
            }
        };
        let height = probe.height.unwrap_or(0);
        if size <= self.harvest.min_mux_bytes || !probe.has_audio || height < self.harvest.min_height
        {
            warn!(size, height, has_audio = probe.has_audio, "Capture rejected");
            remove_quietly(&path);
            return Err(HarvestError::NoMediaFound);
        }
        info!(path = %path.display(), size, height, "Live capture accepted");
        Ok(OutputArtifact {
            id: artifact_id.to_string(),
            path,
            size_bytes: size,
        })
    }
}

/// Persists the decoded recording. A partially written file is removed
/// before the error surfaces.
fn store_recording(bytes: &[u8], path: &Path) -> HarvestResult<()> {
    if let Err(source) = std::fs::write(path, bytes) {
        remove_quietly(path);
        return Err(HarvestError::Io {
            source,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

const RECORD_SCRIPT: &str = r#"
(() => {
    const video = document.querySelector('video');
    if (!video) {
        return null;
    }
    const stream = video.captureStream();
    if (!stream) {
        return null;
    }
    const recorder = new MediaRecorder(stream, { mimeType: 'video/webm' });
    const chunks = [];
    recorder.ondataavailable = (event) => {
        chunks.push(event.data);
    };
    recorder.start();
    return new Promise((resolve) => {
        recorder.onstop = () => {
            const blob = new Blob(chunks, { type: 'video/webm' });
            const reader = new FileReader();
            reader.onloadend = () => resolve(reader.result);
            reader.readAsDataURL(blob);
        };
        recorder.onerror = () => resolve(null);
        setTimeout(() => recorder.stop(), __DURATION_MS__);
    });
})()
"#;
