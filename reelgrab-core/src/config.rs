use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReelgrabConfig {
    pub server: ServerSection,
    pub paths: PathsSection,
    pub browser: BrowserSection,
    pub harvest: HarvestSection,
    pub capture: CaptureSection,
    pub retention: RetentionSection,
    pub relay: Option<RelaySection>,
}

impl ReelgrabConfig {
    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.output_dir)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Base URL callers use to fetch finished artifacts, e.g. `http://host:3001`.
    pub public_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub output_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub navigation_timeout_seconds: u64,
    pub ready_timeout_seconds: u64,
}

impl BrowserSection {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_seconds)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarvestSection {
    /// Referrer replayed on candidate fetches, matching the source site.
    pub referer: String,
    pub fetch_timeout_seconds: u64,
    pub min_single_bytes: u64,
    pub min_mux_bytes: u64,
    pub min_height: u32,
    pub mux_audio_bitrate: String,
}

impl HarvestSection {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSection {
    /// Seconds added to the media element's reported duration.
    pub margin_seconds: u64,
    /// Minimum recording duration regardless of the reported duration.
    pub floor_seconds: u64,
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub video_bitrate: String,
    pub audio_bitrate: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionSection {
    pub sweep_interval_seconds: u64,
    pub max_age_seconds: u64,
}

impl RetentionSection {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelaySection {
    pub enabled: bool,
    pub endpoint: String,
    pub token: String,
}

pub fn load_reelgrab_config<P: AsRef<Path>>(path: P) -> Result<ReelgrabConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
