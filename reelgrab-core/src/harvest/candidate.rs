use regex::Regex;
use tracing::debug;

use crate::browser::{CapturedResource, MediaElementSnapshot, MediaKind};

use super::error::{HarvestError, HarvestResult};

const AUDIO_MARKERS: [&str; 2] = ["audio", "mp4a"];
const AD_MARKERS: [&str; 2] = ["ads", "advert"];

const TIER_HIGH: &str = "_q100";
const TIER_MID: &str = "_q80";
const TIER_LOW: &str = "_q40";

/// Validated harvest input: the page URL plus the content identifier parsed
/// from its `/reel/<digits>` path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRequest {
    pub url: String,
    pub video_id: String,
}

impl TargetRequest {
    /// Validates the URL shape before any browser work starts.
    pub fn parse(url: &str) -> HarvestResult<Self> {
        if !url.contains("/reel") {
            return Err(HarvestError::InvalidUrl(url.to_string()));
        }
        let pattern = Regex::new(r"reel/(\d+)").expect("static regex");
        let video_id = pattern
            .captures(url)
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str().to_string())
            .ok_or_else(|| HarvestError::MissingId(url.to_string()))?;
        Ok(Self {
            url: url.to_string(),
            video_id,
        })
    }
}

/// A captured resource that survived filtering, with its URL-derived score
/// and the byte-range parameters stripped from the download URL.
///
/// Pixel height joins the score at probe time; this value only reflects what
/// the URL itself reveals.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub resource: CapturedResource,
    pub score: i64,
    pub download_url: String,
}

/// Reduces the raw capture list to a scored list, best first.
///
/// An empty result is a valid "no candidate" outcome, not an error.
pub fn filter_and_rank(
    resources: &[CapturedResource],
    media: Option<&MediaElementSnapshot>,
    target: &TargetRequest,
) -> Vec<RankedCandidate> {
    let mut candidates: Vec<RankedCandidate> = Vec::new();
    for resource in resources {
        let decoded = percent_decode(&resource.url);
        if AD_MARKERS.iter().any(|marker| decoded.contains(marker)) {
            debug!(url = %resource.url, "Excluded (advertising)");
            continue;
        }
        // A fused video+audio candidate is being sought, so split-out audio
        // tracks are noise here; the dual-stream path picks them up instead.
        if AUDIO_MARKERS.iter().any(|marker| decoded.contains(marker)) {
            debug!(url = %resource.url, "Excluded (audio track)");
            continue;
        }
        if let Some(id) = embedded_video_id(&decoded) {
            if id != target.video_id {
                debug!(url = %resource.url, found = %id, "Excluded (wrong video id)");
                continue;
            }
        }
        let download_url = strip_range_params(&resource.url);
        let score = url_score(&download_url, media);
        candidates.push(RankedCandidate {
            resource: resource.clone(),
            score,
            download_url,
        });
    }
    // Stable sort keeps network arrival order as the tie-break.
    candidates.sort_by_key(|candidate| std::cmp::Reverse(candidate.score));
    candidates
}

/// Picks the first video-classified and first audio-classified resources for
/// the dual-stream strategy, applying the same ad and identity exclusions.
pub fn dual_pair<'a>(
    resources: &'a [CapturedResource],
    target: &TargetRequest,
) -> Option<(&'a CapturedResource, &'a CapturedResource)> {
    let eligible = |resource: &&CapturedResource| {
        let decoded = percent_decode(&resource.url);
        if AD_MARKERS.iter().any(|marker| decoded.contains(marker)) {
            return false;
        }
        match embedded_video_id(&decoded) {
            Some(id) => id == target.video_id,
            None => true,
        }
    };
    let video = resources
        .iter()
        .filter(eligible)
        .find(|resource| resource.kind == MediaKind::Video)?;
    let audio = resources
        .iter()
        .filter(eligible)
        .find(|resource| resource.kind == MediaKind::Audio)?;
    Some((video, audio))
}

fn url_score(download_url: &str, media: Option<&MediaElementSnapshot>) -> i64 {
    let mut score = 0i64;
    if download_url.contains(TIER_HIGH) {
        score += 1000;
    } else if download_url.contains(TIER_MID) {
        score += 500;
    } else if download_url.contains(TIER_LOW) {
        score -= 500;
    }
    // The page's own choice of source is strongly preferred over guesses.
    if let Some(media) = media {
        if media
            .source_urls
            .iter()
            .any(|source| source == download_url)
        {
            score += 2000;
        }
    }
    score
}

fn embedded_video_id(decoded_url: &str) -> Option<String> {
    let pattern = Regex::new(r"video_id=(\d+)").expect("static regex");
    pattern
        .captures(decoded_url)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
}

/// Drops the request-scoped byte-range parameters so the fetch retrieves the
/// whole stream instead of the window the player asked for.
pub(crate) fn strip_range_params(url: &str) -> String {
    match url.find("&bytestart") {
        Some(index) => url[..index].to_string(),
        None => url.to_string(),
    }
}

// CDN urls nest escaped parameters; markers must match either form.
fn percent_decode(input: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(input.as_bytes())).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resource(url: &str, kind: MediaKind, arrival: usize) -> CapturedResource {
        CapturedResource {
            url: url.to_string(),
            request_headers: HashMap::new(),
            response_headers: HashMap::new(),
            kind,
            is_manifest: kind == MediaKind::Manifest,
            arrival,
        }
    }

    fn target() -> TargetRequest {
        TargetRequest::parse("https://www.facebook.com/reel/12345").unwrap()
    }

    #[test]
    fn parse_accepts_reel_path() {
        let target = target();
        assert_eq!(target.video_id, "12345");
    }

    #[test]
    fn parse_rejects_watch_url() {
        let err = TargetRequest::parse("https://facebook.com/watch").unwrap_err();
        assert!(matches!(err, HarvestError::InvalidUrl(_)));
    }

    #[test]
    fn parse_rejects_reel_without_id() {
        let err = TargetRequest::parse("https://facebook.com/reel/").unwrap_err();
        assert!(matches!(err, HarvestError::MissingId(_)));
    }

    #[test]
    fn filter_drops_ads_and_audio() {
        let resources = vec![
            resource("https://cdn/clip_audio.mp4", MediaKind::Audio, 0),
            resource("https://cdn/spot_ads.mp4", MediaKind::Video, 1),
            resource("https://cdn/advert%2Fclip.mp4", MediaKind::Video, 2),
        ];
        let ranked = filter_and_rank(&resources, None, &target());
        assert!(ranked.is_empty());
    }

    #[test]
    fn filter_drops_wrong_video_id() {
        let resources = vec![
            resource("https://cdn/clip.mp4?video_id=99999", MediaKind::Video, 0),
            resource("https://cdn/clip.mp4?video_id=12345", MediaKind::Video, 1),
        ];
        let ranked = filter_and_rank(&resources, None, &target());
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].download_url.contains("12345"));
    }

    #[test]
    fn filter_detects_encoded_video_id() {
        let resources = vec![resource(
            "https://cdn/clip.mp4?video_id%3D99999",
            MediaKind::Video,
            0,
        )];
        assert!(filter_and_rank(&resources, None, &target()).is_empty());
    }

    #[test]
    fn manifests_without_id_are_exempt() {
        let resources = vec![resource("https://cdn/stream.mpd", MediaKind::Manifest, 0)];
        let ranked = filter_and_rank(&resources, None, &target());
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn quality_tiers_order_candidates() {
        let resources = vec![
            resource("https://cdn/clip_q40.mp4", MediaKind::Video, 0),
            resource("https://cdn/clip_q100.mp4", MediaKind::Video, 1),
            resource("https://cdn/clip_q80.mp4", MediaKind::Video, 2),
        ];
        let ranked = filter_and_rank(&resources, None, &target());
        assert_eq!(ranked[0].download_url, "https://cdn/clip_q100.mp4");
        assert_eq!(ranked[1].download_url, "https://cdn/clip_q80.mp4");
        assert_eq!(ranked[2].download_url, "https://cdn/clip_q40.mp4");
        assert!(ranked.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }

    #[test]
    fn declared_source_outranks_tier() {
        let media = MediaElementSnapshot {
            source_urls: vec!["https://cdn/clip_plain.mp4".to_string()],
            ..Default::default()
        };
        let resources = vec![
            resource("https://cdn/clip_q100.mp4", MediaKind::Video, 0),
            resource("https://cdn/clip_plain.mp4", MediaKind::Video, 1),
        ];
        let ranked = filter_and_rank(&resources, Some(&media), &target());
        assert_eq!(ranked[0].download_url, "https://cdn/clip_plain.mp4");
    }

    #[test]
    fn ties_preserve_arrival_order() {
        let resources = vec![
            resource("https://cdn/first.mp4", MediaKind::Video, 0),
            resource("https://cdn/second.mp4", MediaKind::Video, 1),
        ];
        let ranked = filter_and_rank(&resources, None, &target());
        assert_eq!(ranked[0].resource.arrival, 0);
        assert_eq!(ranked[1].resource.arrival, 1);
    }

    #[test]
    fn range_params_are_stripped() {
        let resources = vec![resource(
            "https://cdn/clip.mp4?oh=1&bytestart=0&byteend=4096",
            MediaKind::Video,
            0,
        )];
        let ranked = filter_and_rank(&resources, None, &target());
        assert_eq!(ranked[0].download_url, "https://cdn/clip.mp4?oh=1");
    }

    #[test]
    fn dual_pair_picks_first_of_each_kind() {
        let resources = vec![
            resource("https://cdn/stream.m3u8", MediaKind::Manifest, 0),
            resource("https://cdn/v1.mp4", MediaKind::Video, 1),
            resource("https://cdn/track_mp4a.mp4", MediaKind::Audio, 2),
            resource("https://cdn/v2.mp4", MediaKind::Video, 3),
        ];
        let (video, audio) = dual_pair(&resources, &target()).unwrap();
        assert_eq!(video.url, "https://cdn/v1.mp4");
        assert_eq!(audio.url, "https://cdn/track_mp4a.mp4");
    }

    #[test]
    fn dual_pair_requires_both_kinds() {
        let resources = vec![resource("https://cdn/v1.mp4", MediaKind::Video, 0)];
        assert!(dual_pair(&resources, &target()).is_none());
    }

    #[test]
    fn percent_decode_tolerates_malformed_input() {
        assert_eq!(percent_decode("a%20b%2Fc"), "a b/c");
        assert_eq!(percent_decode("plain"), "plain");
        assert_eq!(percent_decode("bad%zz"), "bad%zz");
    }
}
