use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::{
    EventRequestWillBeSent, EventResponseReceived, Headers,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::BrowserSection;

use super::error::BrowserResult;

/// Coarse classification of one observed network response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Manifest,
    Unknown,
}

/// One media-looking network response observed during a page visit.
///
/// Request headers are retained so the prober can replay the fetch with the
/// same auth/referrer context the page used.
#[derive(Debug, Clone)]
pub struct CapturedResource {
    pub url: String,
    pub request_headers: HashMap<String, String>,
    pub response_headers: HashMap<String, String>,
    pub kind: MediaKind,
    pub is_manifest: bool,
    /// Network arrival order, used as a weak ranking tie-break.
    pub arrival: usize,
}

/// Snapshot of the page's primary media element taken after the ready wait.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaElementSnapshot {
    pub src: Option<String>,
    pub current_src: Option<String>,
    pub source_urls: Vec<String>,
    pub duration: Option<f64>,
    pub playing: bool,
}

/// Finalized result of one sniffing pass, handed downstream as an immutable
/// snapshot once the navigation+wait phase ends.
#[derive(Debug, Clone, Default)]
pub struct SniffReport {
    pub resources: Vec<CapturedResource>,
    pub media: Option<MediaElementSnapshot>,
}

/// Drives the page and passively records media-looking responses.
#[derive(Debug, Clone)]
pub struct ResourceSniffer {
    config: Arc<BrowserSection>,
}

impl ResourceSniffer {
    pub fn new(config: BrowserSection) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Navigates to `url` and collects responses until the media element
    /// reports it can play through, or the ready deadline lapses.
    ///
    /// Timeouts degrade to a partial report instead of failing the request;
    /// downstream stages may still succeed from what was captured, and the
    /// fallback path needs the element snapshot even when nothing was.
    pub async fn collect(&self, page: &Page, url: &str) -> BrowserResult<SniffReport> {
        let mut requests = page.event_listener::<EventRequestWillBeSent>().await?;
        let mut responses = page.event_listener::<EventResponseReceived>().await?;

        info!(url, "Navigating to target page");
        let navigation = async {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        match tokio::time::timeout(self.config.navigation_timeout(), navigation).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "Navigation reported an error, continuing"),
            Err(_) => warn!(
                timeout_s = self.config.navigation_timeout_seconds,
                "Navigation timed out, continuing with partial capture"
            ),
        }

        // Adaptive players only request real segments once playback starts,
        // and some pages require a user gesture before play() succeeds.
        if let Err(err) = page.evaluate(NUDGE_SCRIPT).await {
            warn!(error = %err, "Playback nudge failed");
        }

        let mut request_headers: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut seen_urls: HashSet<String> = HashSet::new();
        let mut resources: Vec<CapturedResource> = Vec::new();

        let deadline = tokio::time::sleep(self.config.ready_timeout());
        tokio::pin!(deadline);
        let mut poll = tokio::time::interval(Duration::from_millis(500));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(event) = requests.next() => {
                    let request = &event.request;
                    request_headers.insert(request.url.clone(), headers_to_map(&request.headers));
                }
                Some(event) = responses.next() => {
                    let response = &event.response;
                    let content_type = response
                        .headers
                        .inner()
                        .get("content-type")
                        .or_else(|| response.headers.inner().get("Content-Type"))
                        .and_then(|value| value.as_str())
                        .map(String::from)
                        .or_else(|| {
                            if response.mime_type.is_empty() {
                                None
                            } else {
                                Some(response.mime_type.clone())
                            }
                        });
                    if let Some((kind, is_manifest)) =
                        classify_response(&response.url, response.status, content_type.as_deref())
                    {
                        if seen_urls.insert(response.url.clone()) {
                            debug!(url = %response.url, ?kind, "Captured media resource");
                            resources.push(CapturedResource {
                                url: response.url.clone(),
                                request_headers: request_headers
                                    .get(&response.url)
                                    .cloned()
                                    .unwrap_or_default(),
                                response_headers: headers_to_map(&response.headers),
                                kind,
                                is_manifest,
                                arrival: resources.len(),
                            });
                        }
                    }
                }
                _ = poll.tick() => {
                    if self.media_ready(page).await {
                        debug!("Media element reports canplaythrough");
                        break;
                    }
                }
                _ = &mut deadline => {
                    warn!(
                        timeout_s = self.config.ready_timeout_seconds,
                        "Ready wait timed out, finalizing partial capture"
                    );
                    break;
                }
            }
        }

        let media = self.snapshot_media(page).await;
        info!(
            captured = resources.len(),
            has_media = media.is_some(),
            "Sniffing pass complete"
        );
        Ok(SniffReport { resources, media })
    }

    async fn media_ready(&self, page: &Page) -> bool {
        match page.evaluate(READY_STATE_SCRIPT).await {
            Ok(result) => result
                .into_value::<VideoReadyState>()
                .map(|state| state.ready_state >= 4)
                .unwrap_or(false),
            Err(err) => {
                debug!(error = %err, "Ready-state poll failed");
                false
            }
        }
    }

    async fn snapshot_media(&self, page: &Page) -> Option<MediaElementSnapshot> {
        let result = match page.evaluate(SNAPSHOT_SCRIPT).await {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "Failed to snapshot media element");
                return None;
            }
        };
        match result.into_value::<Option<MediaElementSnapshot>>() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "Failed to decode media element snapshot");
                None
            }
        }
    }
}

/// Applies the capture rule: status 200, and either a media-marked URL whose
/// content type matches the same family, or a manifest file extension.
pub fn classify_response(
    url: &str,
    status: i64,
    content_type: Option<&str>,
) -> Option<(MediaKind, bool)> {
    if status != 200 {
        return None;
    }
    let lowered = url.to_ascii_lowercase();
    if lowered.contains(".m3u8") || lowered.contains(".mpd") {
        return Some((MediaKind::Manifest, true));
    }
    let family = content_type.map(str::to_ascii_lowercase)?;
    let audio_marked = lowered.contains("audio") || lowered.contains("mp4a");
    let media_marked = audio_marked || lowered.contains(".mp4") || lowered.contains("video");
    if !media_marked {
        return None;
    }
    if family.starts_with("audio/") || (family.starts_with("video/") && audio_marked) {
        Some((MediaKind::Audio, false))
    } else if family.starts_with("video/") {
        Some((MediaKind::Video, false))
    } else {
        None
    }
}

fn headers_to_map(headers: &Headers) -> HashMap<String, String> {
    headers
        .inner()
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter_map(|(name, value)| {
                    value.as_str().map(|value| (name.clone(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct VideoReadyState {
    ready_state: u32,
}

const NUDGE_SCRIPT: &str = r#"
(() => {
    window.scrollBy(0, 500);
    const video = document.querySelector('video');
    if (video) {
        video.click();
        const played = video.play();
        if (played && played.catch) {
            played.catch(() => {});
        }
    }
})()
"#;

const READY_STATE_SCRIPT: &str = r#"
(() => {
    const video = document.querySelector('video');
    return { ready_state: video ? (video.readyState || 0) : 0 };
})()
"#;

const SNAPSHOT_SCRIPT: &str = r#"
(() => {
    const video = document.querySelector('video');
    if (!video) {
        return null;
    }
    const source_urls = [];
    video.querySelectorAll('source').forEach(src => {
        const url = src.src || (src.dataset ? src.dataset.src : '');
        if (url) {
            source_urls.push(url);
        }
    });
    return {
        src: video.src || null,
        current_src: video.currentSrc || null,
        source_urls,
        duration: isFinite(video.duration) ? video.duration : null,
        playing: !video.paused,
    };
})()
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_requires_success_status() {
        assert!(classify_response("https://cdn/x.mp4", 403, Some("video/mp4")).is_none());
    }

    #[test]
    fn classify_direct_video() {
        let (kind, manifest) =
            classify_response("https://cdn/clip.mp4?oh=1", 200, Some("video/mp4")).unwrap();
        assert_eq!(kind, MediaKind::Video);
        assert!(!manifest);
    }

    #[test]
    fn classify_audio_track_by_url_marker() {
        let (kind, _) =
            classify_response("https://cdn/track_mp4a.mp4", 200, Some("video/mp4")).unwrap();
        assert_eq!(kind, MediaKind::Audio);
    }

    #[test]
    fn classify_manifest_without_content_type() {
        let (kind, manifest) = classify_response("https://cdn/stream.mpd", 200, None).unwrap();
        assert_eq!(kind, MediaKind::Manifest);
        assert!(manifest);
    }

    #[test]
    fn classify_rejects_mismatched_family() {
        assert!(classify_response("https://cdn/clip.mp4", 200, Some("text/html")).is_none());
        assert!(classify_response("https://cdn/page", 200, Some("video/mp4")).is_none());
    }
}
