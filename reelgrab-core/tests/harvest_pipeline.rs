//! End-to-end pipeline tests driven by local files instead of a live page.
//!
//! Captured resources point at `file://` URLs inside a temp directory and a
//! stub toolkit reads probe results out of the file contents, so the whole
//! candidate loop runs without a browser, a network, or ffmpeg.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use reelgrab_core::browser::{CapturedResource, MediaElementSnapshot, MediaKind, SniffReport};
use reelgrab_core::config::{
    BrowserSection, CaptureSection, HarvestSection, PathsSection, ReelgrabConfig, RetentionSection,
    ServerSection,
};
use reelgrab_core::harvest::{HarvestError, Harvester, TargetRequest};
use reelgrab_core::media::{EncodeProfile, MediaError, MediaProbe, MediaResult, MediaToolkit};

/// Reads probe answers out of the file text: `audio=true height=1080`.
struct StubToolkit;

#[async_trait]
impl MediaToolkit for StubToolkit {
    async fn inspect(&self, path: &Path) -> MediaResult<MediaProbe> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| MediaError::Io {
                source,
                path: path.to_path_buf(),
            })?;
        let height = text
            .split("height=")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|value| value.parse().ok());
        Ok(MediaProbe {
            has_audio: text.contains("audio=true"),
            has_video: true,
            width: None,
            height,
        })
    }

    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        _audio_bitrate: &str,
    ) -> MediaResult<()> {
        let mut combined = tokio::fs::read(video).await.map_err(|source| MediaError::Io {
            source,
            path: video.to_path_buf(),
        })?;
        let track = tokio::fs::read(audio).await.map_err(|source| MediaError::Io {
            source,
            path: audio.to_path_buf(),
        })?;
        combined.extend_from_slice(&track);
        tokio::fs::write(output, combined)
            .await
            .map_err(|source| MediaError::Io {
                source,
                path: output.to_path_buf(),
            })
    }

    async fn encode_capture(
        &self,
        input: &Path,
        output: &Path,
        _profile: &EncodeProfile,
    ) -> MediaResult<()> {
        tokio::fs::copy(input, output)
            .await
            .map(|_| ())
            .map_err(|source| MediaError::Io {
                source,
                path: output.to_path_buf(),
            })
    }
}

fn test_config(output_dir: &Path) -> ReelgrabConfig {
    ReelgrabConfig {
        server: ServerSection {
            host: "127.0.0.1".into(),
            port: 0,
            public_base_url: "http://localhost:3001".into(),
        },
        paths: PathsSection {
            output_dir: output_dir.to_string_lossy().into_owned(),
        },
        browser: BrowserSection {
            executable_path: None,
            headless: true,
            sandbox: false,
            disable_gpu: true,
            user_agent: "Mozilla/5.0 test".into(),
            viewport_width: 1280,
            viewport_height: 720,
            navigation_timeout_seconds: 5,
            ready_timeout_seconds: 1,
        },
        harvest: HarvestSection {
            referer: "https://www.facebook.com/".into(),
            fetch_timeout_seconds: 5,
            min_single_bytes: 1000,
            min_mux_bytes: 1000,
            min_height: 720,
            mux_audio_bitrate: "192k".into(),
        },
        capture: CaptureSection {
            margin_seconds: 5,
            floor_seconds: 30,
            video_codec: "libx264".into(),
            preset: "medium".into(),
            crf: 23,
            video_bitrate: "5M".into(),
            audio_bitrate: "192k".into(),
        },
        retention: RetentionSection {
            sweep_interval_seconds: 3600,
            max_age_seconds: 3600,
        },
        relay: None,
    }
}

fn harvester(output_dir: &Path) -> Harvester {
    Harvester::with_toolkit(test_config(output_dir), Arc::new(StubToolkit))
        .expect("harvester should build")
}

fn target() -> TargetRequest {
    TargetRequest::parse("https://www.facebook.com/reel/12345").expect("valid target")
}

/// Writes a fixture stream and returns a captured resource pointing at it.
fn seed_resource(
    dir: &Path,
    name: &str,
    content: &str,
    padding: usize,
    kind: MediaKind,
    arrival: usize,
) -> CapturedResource {
    let path = dir.join(name);
    let mut body = String::from(content);
    body.push('\n');
    body.push_str(&"x".repeat(padding));
    std::fs::write(&path, body).expect("fixture write");
    CapturedResource {
        url: format!("file://{}", path.display()),
        request_headers: HashMap::new(),
        response_headers: HashMap::new(),
        kind,
        is_manifest: false,
        arrival,
    }
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read output dir")
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn direct_stream_is_probed_and_downloaded() {
    let remote = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let resource = seed_resource(
        remote.path(),
        "clip_q100.mp4",
        "audio=true height=1080",
        4000,
        MediaKind::Video,
        0,
    );
    let report = SniffReport {
        resources: vec![resource],
        media: None,
    };

    let artifact = harvester(out.path())
        .resolve(&target(), &report, None)
        .await
        .expect("direct download should succeed");

    assert!(artifact.path.exists());
    assert!(artifact.size_bytes > 1000);
    assert_eq!(artifact.path, out.path().join(artifact.file_name()));
    // Probe temp files never outlive the request.
    assert_eq!(files_in(out.path()), vec![artifact.file_name()]);
}

#[tokio::test]
async fn audio_only_capture_yields_nothing() {
    let remote = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let track = seed_resource(
        remote.path(),
        "track_mp4a.mp4",
        "audio=true height=0",
        2000,
        MediaKind::Audio,
        0,
    );
    let report = SniffReport {
        resources: vec![track],
        media: None,
    };

    let err = harvester(out.path())
        .resolve(&target(), &report, None)
        .await
        .expect_err("audio-only capture has no playable candidate");
    assert!(matches!(err, HarvestError::NoMediaFound));
    assert!(files_in(out.path()).is_empty());
}

#[tokio::test]
async fn advertising_streams_are_never_acquired() {
    let remote = TempDir::new().unwrap();
    let ad_dir = remote.path().join("ads");
    std::fs::create_dir(&ad_dir).unwrap();
    let out = TempDir::new().unwrap();
    let ad = seed_resource(
        &ad_dir,
        "spot_q100.mp4",
        "audio=true height=1080",
        4000,
        MediaKind::Video,
        0,
    );
    let report = SniffReport {
        resources: vec![ad],
        media: None,
    };

    let err = harvester(out.path())
        .resolve(&target(), &report, None)
        .await
        .expect_err("ad streams must be excluded");
    assert!(matches!(err, HarvestError::NoMediaFound));
    assert!(files_in(out.path()).is_empty());
}

#[tokio::test]
async fn foreign_video_id_is_excluded() {
    let remote = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let mut foreign = seed_resource(
        remote.path(),
        "clip_q100.mp4",
        "audio=true height=1080",
        4000,
        MediaKind::Video,
        0,
    );
    foreign.url.push_str("?video_id=99999");

    let report = SniffReport {
        resources: vec![foreign],
        media: None,
    };
    let err = harvester(out.path())
        .resolve(&target(), &report, None)
        .await
        .expect_err("mismatched id must be excluded");
    assert!(matches!(err, HarvestError::NoMediaFound));
}

#[tokio::test]
async fn silent_high_tier_loses_to_audible_low_tier() {
    let remote = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let silent = seed_resource(
        remote.path(),
        "clip_q100.mp4",
        "audio=false height=1080",
        4000,
        MediaKind::Video,
        0,
    );
    let audible = seed_resource(
        remote.path(),
        "clip_q80.mp4",
        "audio=true height=480",
        2000,
        MediaKind::Video,
        1,
    );
    let audible_size = std::fs::metadata(
        remote.path().join("clip_q80.mp4"),
    )
    .unwrap()
    .len();

    let report = SniffReport {
        resources: vec![silent, audible],
        media: None,
    };
    let artifact = harvester(out.path())
        .resolve(&target(), &report, None)
        .await
        .expect("audible candidate should win");

    assert_eq!(artifact.size_bytes, audible_size);
}

#[tokio::test]
async fn undersized_download_is_rejected_and_removed() {
    let remote = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let tiny = seed_resource(
        remote.path(),
        "clip_q100.mp4",
        "audio=true height=1080",
        10,
        MediaKind::Video,
        0,
    );
    let report = SniffReport {
        resources: vec![tiny],
        media: None,
    };

    let err = harvester(out.path())
        .resolve(&target(), &report, None)
        .await
        .expect_err("undersized file must be rejected");
    assert!(matches!(err, HarvestError::TooSmall { .. }));
    assert!(err.is_client_error());
    assert!(files_in(out.path()).is_empty());
}

#[tokio::test]
async fn split_streams_are_muxed_when_no_fused_candidate_probes() {
    let remote = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    // The fused candidate probes silent, so the strategy falls through to
    // the split video and audio tracks.
    let video = seed_resource(
        remote.path(),
        "segment_plain.mp4",
        "",
        2000,
        MediaKind::Video,
        0,
    );
    let track = seed_resource(
        remote.path(),
        "track_mp4a.mp4",
        "audio=true height=1080",
        100,
        MediaKind::Audio,
        1,
    );
    let report = SniffReport {
        resources: vec![video, track],
        media: None,
    };

    let artifact = harvester(out.path())
        .resolve(&target(), &report, None)
        .await
        .expect("split streams should mux");

    assert!(artifact.size_bytes > 2000);
    // Intermediate video/track downloads are removed after the mux.
    assert_eq!(files_in(out.path()), vec![artifact.file_name()]);
}

#[tokio::test]
async fn low_resolution_mux_output_is_rejected_and_cleaned() {
    let remote = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    // No fused candidate qualifies, and the muxed result only reaches 480p,
    // so the quality gate has to discard it.
    let video = seed_resource(
        remote.path(),
        "segment_plain.mp4",
        "",
        2000,
        MediaKind::Video,
        0,
    );
    let track = seed_resource(
        remote.path(),
        "track_mp4a.mp4",
        "audio=true height=480",
        100,
        MediaKind::Audio,
        1,
    );
    let report = SniffReport {
        resources: vec![video, track],
        media: None,
    };

    let err = harvester(out.path())
        .resolve(&target(), &report, None)
        .await
        .expect_err("sub-720 mux output must be rejected");
    assert!(matches!(err, HarvestError::Acquisition(_)));
    // The mux output and both stream downloads are gone after the failure.
    assert!(files_in(out.path()).is_empty());
}

#[tokio::test]
async fn page_source_selection_outranks_tier_markers() {
    let remote = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let high_tier = seed_resource(
        remote.path(),
        "clip_q100.mp4",
        "audio=true height=720",
        2000,
        MediaKind::Video,
        0,
    );
    let chosen = seed_resource(
        remote.path(),
        "clip_plain.mp4",
        "audio=true height=720",
        3000,
        MediaKind::Video,
        1,
    );
    let chosen_size = std::fs::metadata(remote.path().join("clip_plain.mp4"))
        .unwrap()
        .len();

    let media = MediaElementSnapshot {
        source_urls: vec![chosen.url.clone()],
        ..Default::default()
    };
    let report = SniffReport {
        resources: vec![high_tier, chosen],
        media: Some(media),
    };

    let artifact = harvester(out.path())
        .resolve(&target(), &report, None)
        .await
        .expect("page-selected source should win");
    assert_eq!(artifact.size_bytes, chosen_size);
}

#[tokio::test]
async fn probing_identical_bytes_is_deterministic() {
    let remote = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let resource = seed_resource(
        remote.path(),
        "clip_q100.mp4",
        "audio=true height=1080",
        4000,
        MediaKind::Video,
        0,
    );
    let report = SniffReport {
        resources: vec![resource],
        media: None,
    };
    let harvester = harvester(out.path());

    let first = harvester
        .resolve(&target(), &report, None)
        .await
        .expect("first pass");
    let second = harvester
        .resolve(&target(), &report, None)
        .await
        .expect("second pass");
    assert_eq!(first.size_bytes, second.size_bytes);
}

#[tokio::test]
async fn empty_capture_reports_no_media() {
    let out = TempDir::new().unwrap();
    let err = harvester(out.path())
        .resolve(&target(), &SniffReport::default(), None)
        .await
        .expect_err("empty report has nothing to acquire");
    assert!(matches!(err, HarvestError::NoMediaFound));
}
