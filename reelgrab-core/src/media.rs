use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::CaptureSection;

pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media command failed: {0}")]
    Command(String),
    #[error("media command timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid ffprobe payload: {0}")]
    Parse(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl From<serde_json::Error> for MediaError {
    fn from(source: serde_json::Error) -> Self {
        MediaError::Parse(source.to_string())
    }
}

/// Stream composition of one downloaded byte stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaProbe {
    pub has_audio: bool,
    pub has_video: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Encoding parameters for the live-capture transcode.
#[derive(Debug, Clone)]
pub struct EncodeProfile {
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub video_bitrate: String,
    pub audio_bitrate: String,
}

impl From<&CaptureSection> for EncodeProfile {
    fn from(section: &CaptureSection) -> Self {
        Self {
            video_codec: section.video_codec.clone(),
            preset: section.preset.clone(),
            crf: section.crf,
            video_bitrate: section.video_bitrate.clone(),
            audio_bitrate: section.audio_bitrate.clone(),
        }
    }
}

/// Subprocess seam for stream inspection, muxing, and capture encoding.
///
/// The harvest pipeline only depends on this trait; tests substitute a stub
/// so the candidate loop can run without ffmpeg installed.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Reports stream composition and dimensions for the file at `path`.
    async fn inspect(&self, path: &Path) -> MediaResult<MediaProbe>;

    /// Combines separate video and audio streams into one container,
    /// copying the video stream and re-encoding audio to AAC.
    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        audio_bitrate: &str,
    ) -> MediaResult<()>;

    /// Encodes a raw screen-capture recording into a standard MP4.
    async fn encode_capture(
        &self,
        input: &Path,
        output: &Path,
        profile: &EncodeProfile,
    ) -> MediaResult<()>;
}

/// Production toolkit backed by the ffprobe/ffmpeg binaries on PATH.
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffprobe_timeout: Duration,
    ffmpeg_timeout: Duration,
}

impl Default for FfmpegToolkit {
    fn default() -> Self {
        Self {
            ffprobe_timeout: Duration::from_secs(20),
            ffmpeg_timeout: Duration::from_secs(120),
        }
    }
}

impl FfmpegToolkit {
    pub fn new(ffprobe_timeout: Duration, ffmpeg_timeout: Duration) -> Self {
        Self {
            ffprobe_timeout,
            ffmpeg_timeout,
        }
    }

    async fn run_ffmpeg(&self, command: &mut Command) -> MediaResult<()> {
        command.kill_on_drop(true);
        let future = timeout(self.ffmpeg_timeout, command.output());
        match future.await {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(MediaError::Command(format!(
                    "ffmpeg exited with {}: {}",
                    output.status,
                    stderr.trim()
                )))
            }
            Ok(Err(err)) => Err(MediaError::Command(format!("ffmpeg failed to start: {err}"))),
            Err(_) => Err(MediaError::Timeout(self.ffmpeg_timeout)),
        }
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn inspect(&self, path: &Path) -> MediaResult<MediaProbe> {
        let mut command = Command::new("ffprobe");
        command
            .kill_on_drop(true)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg(path);
        let future = timeout(self.ffprobe_timeout, command.output());
        match future.await {
            Ok(Ok(output)) if output.status.success() => parse_ffprobe(&output.stdout),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(MediaError::Command(format!(
                    "ffprobe exited with {}: {}",
                    output.status,
                    stderr.trim()
                )))
            }
            Ok(Err(err)) => Err(MediaError::Io {
                path: path.to_path_buf(),
                source: err,
            }),
            Err(_) => Err(MediaError::Timeout(self.ffprobe_timeout)),
        }
    }

    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        audio_bitrate: &str,
    ) -> MediaResult<()> {
        debug!(video = %video.display(), audio = %audio.display(), "Muxing dual streams");
        let mut command = Command::new("ffmpeg");
        command
            .arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .arg("-map")
            .arg("0:v:0")
            .arg("-map")
            .arg("1:a:0")
            .arg("-c:v")
            .arg("copy")
            .arg("-c:a")
            .arg("aac")
            .arg("-b:a")
            .arg(audio_bitrate)
            .arg(output);
        self.run_ffmpeg(&mut command).await
    }

    async fn encode_capture(
        &self,
        input: &Path,
        output: &Path,
        profile: &EncodeProfile,
    ) -> MediaResult<()> {
        debug!(input = %input.display(), "Encoding live capture");
        let mut command = Command::new("ffmpeg");
        command
            .arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-c:v")
            .arg(&profile.video_codec)
            .arg("-crf")
            .arg(profile.crf.to_string())
            .arg("-preset")
            .arg(&profile.preset)
            .arg("-b:v")
            .arg(&profile.video_bitrate)
            .arg("-c:a")
            .arg("aac")
            .arg("-b:a")
            .arg(&profile.audio_bitrate)
            .arg("-f")
            .arg("mp4")
            .arg(output);
        self.run_ffmpeg(&mut command).await
    }
}

pub(crate) fn parse_ffprobe(payload: &[u8]) -> MediaResult<MediaProbe> {
    let output: FfprobeOutput = serde_json::from_slice(payload)?;
    let mut probe = MediaProbe::default();
    for stream in &output.streams {
        match stream.codec_type.as_deref() {
            Some("audio") => probe.has_audio = true,
            Some("video") => {
                probe.has_video = true;
                if probe.width.is_none() {
                    probe.width = stream.width;
                    probe.height = stream.height;
                }
            }
            _ => {}
        }
    }
    Ok(probe)
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_video_with_audio() {
        let payload = br#"{
            "streams": [
                {"codec_type": "video", "width": 1080, "height": 1920},
                {"codec_type": "audio"}
            ]
        }"#;
        let probe = parse_ffprobe(payload).unwrap();
        assert!(probe.has_audio);
        assert!(probe.has_video);
        assert_eq!(probe.height, Some(1920));
    }

    #[test]
    fn parse_video_only() {
        let payload = br#"{"streams": [{"codec_type": "video", "width": 640, "height": 360}]}"#;
        let probe = parse_ffprobe(payload).unwrap();
        assert!(!probe.has_audio);
        assert_eq!(probe.width, Some(640));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_ffprobe(b"not json").is_err());
    }

    #[test]
    fn parse_empty_streams() {
        let probe = parse_ffprobe(br#"{"streams": []}"#).unwrap();
        assert_eq!(probe, MediaProbe::default());
    }
}
