use crate::error::{ReapError, ThresholdParseError};
use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_THRESHOLD: Duration = Duration::from_secs(15 * 60);

/// Version-control placeholders that keep the staging directory in the repo.
pub const DEFAULT_EXCLUDED: &[&str] = &[".gitignore", ".gitkeep"];

const OUTPUT_DIR: &str = "output";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapPolicy {
    pub threshold: Duration,
    pub excluded: BTreeSet<String>,
}

impl Default for ReapPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            excluded: DEFAULT_EXCLUDED.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ReapPolicy {
    pub fn new(threshold: Duration, excluded: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            threshold,
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_excluded(mut self, excluded: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.excluded = excluded.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.excluded.insert(name.into());
        self
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.contains(name)
    }

    /// Strictly greater: an entry exactly at the threshold is kept.
    pub fn is_stale(&self, age: Duration) -> bool {
        age > self.threshold
    }

    pub fn validate(&self) -> Result<(), ReapError> {
        if self.threshold.is_zero() {
            return Err(ReapError::InvalidThreshold);
        }
        Ok(())
    }
}

/// `<directory of the running executable>/output`
pub fn default_root() -> io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("executable path has no parent: {}", exe.display()),
        )
    })?;
    Ok(dir.join(OUTPUT_DIR))
}

/// Parse a threshold such as `15m`, `90s`, `2h` or `1d`.
/// A bare number is read as minutes.
pub fn parse_threshold(input: &str) -> Result<Duration, ThresholdParseError> {
    let input = input.trim();

    let (num_str, unit) = match input.find(|c: char| c.is_alphabetic()) {
        Some(pos) => {
            let (num, unit) = input.split_at(pos);
            (num.trim(), Some(unit))
        }
        None => (input, None),
    };

    let value: u64 = num_str
        .parse()
        .map_err(|_| ThresholdParseError::InvalidNumber(num_str.to_string()))?;

    let unit_secs: u64 = match unit {
        Some("s") | Some("S") => 1,
        None | Some("m") | Some("M") => 60,
        Some("h") | Some("H") => 60 * 60,
        Some("d") | Some("D") => 24 * 60 * 60,
        Some(other) => return Err(ThresholdParseError::InvalidUnit(other.to_string())),
    };

    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| ThresholdParseError::Overflow(input.to_string()))
}
