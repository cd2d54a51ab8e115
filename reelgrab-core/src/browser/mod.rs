mod automation;
mod error;
mod sniffer;

pub use automation::{BrowserLauncher, BrowserSession};
pub use error::{BrowserError, BrowserResult};
pub use sniffer::{
    classify_response, CapturedResource, MediaElementSnapshot, MediaKind, ResourceSniffer,
    SniffReport,
};
