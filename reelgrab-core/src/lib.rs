pub mod browser;
pub mod config;
pub mod error;
pub mod harvest;
pub mod media;
pub mod relay;
pub mod sweeper;

pub use config::{
    load_reelgrab_config, BrowserSection, CaptureSection, HarvestSection, PathsSection,
    ReelgrabConfig, RelaySection, RetentionSection, ServerSection,
};
pub use error::{ConfigError, Result};
pub use harvest::{Harvester, HarvestError, HarvestResult, OutputArtifact, TargetRequest};
pub use media::{FfmpegToolkit, MediaError, MediaProbe, MediaToolkit};
pub use relay::{RelayError, UploadRelay};
pub use sweeper::RetentionSweeper;
