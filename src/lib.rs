//! Removes stale directories from an upload staging area.
//!
//! Only the immediate subdirectories of the root are considered. A directory
//! is removed when its creation marker is strictly older than the threshold
//! and its name is not in the exclusion set.

pub mod cleaner;
pub mod clock;
pub mod error;
pub mod policy;
pub mod reaper;
pub mod scanner;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{EntryError, EntryErrorKind, ReapError, ThresholdParseError};
pub use policy::{DEFAULT_EXCLUDED, DEFAULT_THRESHOLD, ReapPolicy, default_root, parse_threshold};
pub use reaper::{ReapReport, Reaper, reap};
pub use scanner::{FixedMarkers, Marker, MarkerSource, ScanOutcome, StaleDir};

pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
