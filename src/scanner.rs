use crate::error::{EntryError, EntryErrorKind, ReapError};
use crate::policy::ReapPolicy;
use std::collections::HashMap;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Which metadata timestamp stands in for "when this entry was created".
///
/// * `Changed` reads the inode status-change time (`st_ctime`). Off Unix it
///   behaves like `Created`.
/// * `Created` reads the birth time where the platform and filesystem
///   report one, otherwise the modification time.
/// * `Modified` reads the last modification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Changed,
    Created,
    Modified,
}

impl Default for Marker {
    #[cfg(unix)]
    fn default() -> Self {
        Marker::Changed
    }

    #[cfg(not(unix))]
    fn default() -> Self {
        Marker::Created
    }
}

pub trait MarkerSource {
    fn marker(&self, name: &str, path: &Path, meta: &Metadata) -> io::Result<SystemTime>;
}

impl MarkerSource for Marker {
    fn marker(&self, _name: &str, _path: &Path, meta: &Metadata) -> io::Result<SystemTime> {
        match self {
            Marker::Changed => changed_time(meta),
            Marker::Created => meta.created().or_else(|_| meta.modified()),
            Marker::Modified => meta.modified(),
        }
    }
}

/// Markers pinned per entry name. Names without one are read from
/// metadata through `fallback`.
#[derive(Debug, Clone, Default)]
pub struct FixedMarkers {
    markers: HashMap<String, SystemTime>,
    fallback: Marker,
}

impl FixedMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(mut self, fallback: Marker) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, marker: SystemTime) -> Option<SystemTime> {
        self.markers.insert(name.into(), marker)
    }

    pub fn get(&self, name: &str) -> Option<SystemTime> {
        self.markers.get(name).copied()
    }
}

impl<S: Into<String>> FromIterator<(S, SystemTime)> for FixedMarkers {
    fn from_iter<I: IntoIterator<Item = (S, SystemTime)>>(iter: I) -> Self {
        Self {
            markers: iter.into_iter().map(|(name, ts)| (name.into(), ts)).collect(),
            fallback: Marker::default(),
        }
    }
}

impl MarkerSource for FixedMarkers {
    fn marker(&self, name: &str, path: &Path, meta: &Metadata) -> io::Result<SystemTime> {
        match self.get(name) {
            Some(ts) => Ok(ts),
            None => self.fallback.marker(name, path, meta),
        }
    }
}

#[cfg(unix)]
fn changed_time(meta: &Metadata) -> io::Result<SystemTime> {
    use std::os::unix::fs::MetadataExt;

    let secs = meta.ctime();
    let nanos = meta.ctime_nsec().clamp(0, 999_999_999) as u32;
    let ts = if secs >= 0 {
        SystemTime::UNIX_EPOCH + Duration::new(secs as u64, nanos)
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + Duration::from_nanos(nanos as u64)
    };
    Ok(ts)
}

#[cfg(not(unix))]
fn changed_time(meta: &Metadata) -> io::Result<SystemTime> {
    meta.created().or_else(|_| meta.modified())
}

#[derive(Debug, Clone)]
pub struct StaleDir {
    pub name: String,
    pub path: PathBuf,
    pub age: Duration,
    pub size_bytes: u64,
}

impl StaleDir {
    pub fn size_human(&self) -> String {
        crate::format_size(self.size_bytes)
    }
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Oldest first.
    pub stale: Vec<StaleDir>,
    pub fresh: Vec<String>,
    pub excluded: Vec<String>,
    pub vanished: Vec<String>,
    pub failed: Vec<EntryError>,
}

impl ScanOutcome {
    pub fn total_size(&self) -> u64 {
        self.stale.iter().map(|d| d.size_bytes).sum()
    }
}

fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

fn age_at(now: SystemTime, marker: SystemTime) -> Duration {
    now.duration_since(marker).unwrap_or(Duration::ZERO)
}

/// Evaluate the immediate children of `root` against `policy`.
///
/// Nothing is deleted here. Listing errors on the root are fatal; anything
/// that goes wrong with a single entry is recorded in the outcome.
pub fn scan(
    root: &Path,
    policy: &ReapPolicy,
    now: SystemTime,
    markers: &dyn MarkerSource,
) -> Result<ScanOutcome, ReapError> {
    let read_root = |source: io::Error| ReapError::ReadRoot {
        path: root.to_path_buf(),
        source,
    };

    let mut outcome = ScanOutcome::default();

    for entry in fs::read_dir(root).map_err(read_root)? {
        let entry = entry.map_err(read_root)?;
        let name = entry.file_name().to_string_lossy().into_owned();

        if policy.is_excluded(&name) {
            trace!(entry = %name, "excluded");
            outcome.excluded.push(name);
            continue;
        }

        // file_type does not follow symlinks, so a link to a directory is
        // not a candidate
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => {}
            Ok(_) => continue,
            Err(e) => {
                trace!(entry = %name, error = %e, "skipping entry of unknown type");
                continue;
            }
        }

        let path = entry.path();

        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => meta,
            Ok(_) => {
                debug!(entry = %name, "entry is no longer a directory");
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(entry = %name, "directory vanished before it could be inspected");
                outcome.vanished.push(name);
                continue;
            }
            Err(source) => {
                outcome.failed.push(EntryError {
                    name,
                    kind: EntryErrorKind::Metadata,
                    source,
                });
                continue;
            }
        };

        let marker = match markers.marker(&name, &path, &meta) {
            Ok(ts) => ts,
            Err(source) => {
                outcome.failed.push(EntryError {
                    name,
                    kind: EntryErrorKind::Metadata,
                    source,
                });
                continue;
            }
        };

        let age = age_at(now, marker);
        if !policy.is_stale(age) {
            trace!(entry = %name, age_secs = age.as_secs(), "fresh");
            outcome.fresh.push(name);
            continue;
        }

        let size_bytes = dir_size(&path);
        outcome.stale.push(StaleDir {
            name,
            path,
            age,
            size_bytes,
        });
    }

    outcome.stale.sort_by(|a, b| b.age.cmp(&a.age).then_with(|| a.name.cmp(&b.name)));
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const MIN: Duration = Duration::from_secs(60);

    fn markers(now: SystemTime, ages: &[(&str, Duration)]) -> FixedMarkers {
        ages.iter().map(|(name, age)| (*name, now - *age)).collect()
    }

    #[test]
    fn age_is_zero_for_markers_in_the_future() {
        let now = SystemTime::now();
        assert_eq!(age_at(now, now + MIN), Duration::ZERO);
        assert_eq!(age_at(now, now - MIN), MIN);
    }

    #[test]
    fn splits_entries_by_age_and_exclusion() {
        let dir = tempdir().unwrap();
        for name in ["old", "young", ".gitignore"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("old/blob.bin"), vec![0u8; 300]).unwrap();
        fs::write(dir.path().join("stray.txt"), "not a directory").unwrap();

        let now = SystemTime::now();
        let fixed = markers(
            now,
            &[("old", 20 * MIN), ("young", 10 * MIN), (".gitignore", 60 * MIN)],
        );
        let policy = ReapPolicy::default();

        let outcome = scan(dir.path(), &policy, now, &fixed).unwrap();

        let stale: Vec<_> = outcome.stale.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(stale, vec!["old"]);
        assert_eq!(outcome.stale[0].age, 20 * MIN);
        assert_eq!(outcome.stale[0].size_bytes, 300);
        assert_eq!(outcome.total_size(), 300);
        assert_eq!(outcome.fresh, vec!["young".to_string()]);
        assert_eq!(outcome.excluded, vec![".gitignore".to_string()]);
        assert!(outcome.failed.is_empty());
        assert!(outcome.vanished.is_empty());
    }

    #[test]
    fn stale_entries_are_sorted_oldest_first() {
        let dir = tempdir().unwrap();
        for name in ["a", "b", "c"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        let now = SystemTime::now();
        let fixed = markers(now, &[("a", 20 * MIN), ("b", 90 * MIN), ("c", 45 * MIN)]);

        let outcome = scan(dir.path(), &ReapPolicy::default(), now, &fixed).unwrap();
        let names: Vec<_> = outcome.stale.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    #[test]
    fn exact_threshold_is_fresh() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("edge")).unwrap();
        let now = SystemTime::now();
        let fixed = markers(now, &[("edge", 15 * MIN)]);

        let outcome = scan(dir.path(), &ReapPolicy::default(), now, &fixed).unwrap();
        assert!(outcome.stale.is_empty());
        assert_eq!(outcome.fresh, vec!["edge".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_not_candidates() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let now = SystemTime::now() + 24 * 60 * MIN;
        let outcome = scan(dir.path(), &ReapPolicy::default(), now, &Marker::default()).unwrap();
        assert!(outcome.stale.is_empty());
        assert!(outcome.fresh.is_empty());
    }

    #[test]
    fn filesystem_markers_order_against_the_clock() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("upload")).unwrap();
        let policy = ReapPolicy::default();

        for marker in [Marker::Changed, Marker::Created, Marker::Modified] {
            let later = SystemTime::now() + 60 * MIN;
            let outcome = scan(dir.path(), &policy, later, &marker).unwrap();
            assert_eq!(outcome.stale.len(), 1, "{marker:?} should see the entry as stale");

            let earlier = SystemTime::now() - 60 * MIN;
            let outcome = scan(dir.path(), &policy, earlier, &marker).unwrap();
            assert!(outcome.stale.is_empty(), "{marker:?} should see the entry as fresh");
        }
    }

    #[test]
    fn missing_root_is_a_read_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let result = scan(&missing, &ReapPolicy::default(), SystemTime::now(), &Marker::default());
        assert!(matches!(result, Err(ReapError::ReadRoot { .. })));
    }

    #[test]
    fn fixed_markers_fall_back_to_metadata() {
        let dir = tempdir().unwrap();
        for name in ["pinned", "unpinned"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        let now = SystemTime::now();
        let mut fixed = FixedMarkers::new().with_fallback(Marker::Modified);
        assert_eq!(fixed.insert("pinned", now - 30 * MIN), None);
        assert_eq!(fixed.get("pinned"), Some(now - 30 * MIN));
        assert_eq!(fixed.get("unpinned"), None);

        let outcome = scan(dir.path(), &ReapPolicy::default(), now, &fixed).unwrap();

        let stale: Vec<_> = outcome.stale.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(stale, vec!["pinned"]);
        assert_eq!(outcome.fresh, vec!["unpinned".to_string()]);
    }

    #[test]
    fn files_removed_mid_scan_stay_out_of_the_outcome() {
        struct RemoveFiles {
            root: PathBuf,
            at: SystemTime,
        }

        impl MarkerSource for RemoveFiles {
            fn marker(&self, _name: &str, _path: &Path, _meta: &Metadata) -> io::Result<SystemTime> {
                for entry in fs::read_dir(&self.root)?.flatten() {
                    if entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                        let _ = fs::remove_file(entry.path());
                    }
                }
                Ok(self.at)
            }
        }

        let dir = tempdir().unwrap();
        for i in 0..50 {
            fs::create_dir(dir.path().join(format!("d{i}"))).unwrap();
            fs::write(dir.path().join(format!("f{i}.txt")), "upload").unwrap();
        }

        let now = SystemTime::now();
        let source = RemoveFiles {
            root: dir.path().to_path_buf(),
            at: now - 60 * MIN,
        };
        let outcome = scan(dir.path(), &ReapPolicy::default(), now, &source).unwrap();

        assert_eq!(outcome.stale.len(), 50);
        assert!(outcome.stale.iter().all(|d| d.name.starts_with('d')));
        assert!(outcome.vanished.is_empty(), "vanished: {:?}", outcome.vanished);
        assert!(outcome.failed.is_empty());
        assert!(outcome.fresh.is_empty());
    }
}
