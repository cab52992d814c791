use crate::cleaner;
use crate::clock::{Clock, SystemClock};
use crate::error::{EntryError, ReapError};
use crate::policy::ReapPolicy;
use crate::scanner::{self, Marker, MarkerSource, ScanOutcome, StaleDir};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What one run did.
#[derive(Debug, Default)]
pub struct ReapReport {
    pub deleted: Vec<String>,
    pub failed: Vec<EntryError>,
    /// Stale entries that disappeared before we removed them.
    pub vanished: Vec<String>,
    pub reclaimed_bytes: u64,
    pub dry_run: bool,
}

impl ReapReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn deleted_names(&self) -> BTreeSet<&str> {
        self.deleted.iter().map(String::as_str).collect()
    }

    pub fn failed_names(&self) -> BTreeSet<&str> {
        self.failed.iter().map(|e| e.name.as_str()).collect()
    }
}

/// Delete every immediate subdirectory of `root` older than `threshold`,
/// skipping names in `excluded`.
pub fn reap<I, S>(root: &Path, threshold: Duration, excluded: I) -> Result<ReapReport, ReapError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Reaper::new(ReapPolicy::new(threshold, excluded)).run(root)
}

pub struct Reaper {
    policy: ReapPolicy,
    clock: Box<dyn Clock>,
    markers: Box<dyn MarkerSource>,
    dry_run: bool,
}

impl Reaper {
    pub fn new(policy: ReapPolicy) -> Self {
        Self {
            policy,
            clock: Box::new(SystemClock),
            markers: Box::new(Marker::default()),
            dry_run: false,
        }
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn markers(mut self, markers: impl MarkerSource + 'static) -> Self {
        self.markers = Box::new(markers);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn policy(&self) -> &ReapPolicy {
        &self.policy
    }

    fn check(&self, root: &Path) -> Result<(), ReapError> {
        self.policy.validate()?;
        if !root.is_dir() {
            return Err(ReapError::RootNotFound {
                path: root.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Find what would be deleted without touching anything.
    pub fn plan(&self, root: &Path) -> Result<ScanOutcome, ReapError> {
        self.check(root)?;
        let now = self.clock.now();
        scanner::scan(root, &self.policy, now, self.markers.as_ref())
    }

    pub fn run(&self, root: &Path) -> Result<ReapReport, ReapError> {
        let mut outcome = self.plan(root)?;
        let stale = std::mem::take(&mut outcome.stale);
        Ok(self.finish(root, outcome, stale))
    }

    /// Delete `selected`, a subset of the stale entries from an earlier
    /// `plan`. Names that were not stale in that plan are ignored.
    pub fn execute(&self, root: &Path, mut outcome: ScanOutcome, selected: &HashSet<String>) -> ReapReport {
        let stale = std::mem::take(&mut outcome.stale)
            .into_iter()
            .filter(|d| selected.contains(&d.name))
            .collect();
        self.finish(root, outcome, stale)
    }

    fn finish(&self, root: &Path, outcome: ScanOutcome, stale: Vec<StaleDir>) -> ReapReport {
        let result = cleaner::clean(stale, self.dry_run);
        let reclaimed_bytes = result.total_cleaned();
        let (deleted, vanished, remove_failures) = result.into_entry_errors();

        let mut report = ReapReport {
            deleted: deleted.into_iter().map(|d| d.name).collect(),
            failed: outcome.failed,
            vanished: outcome.vanished,
            reclaimed_bytes,
            dry_run: self.dry_run,
        };
        report.failed.extend(remove_failures);
        report.vanished.extend(vanished.into_iter().map(|d| d.name));

        if !report.failed.is_empty() {
            warn!(
                root = %root.display(),
                failures = report.failed.len(),
                "reap finished with per-entry failures"
            );
        }

        if report.deleted.is_empty() {
            debug!(
                root = %root.display(),
                kept = outcome.fresh.len(),
                excluded = outcome.excluded.len(),
                "nothing stale to delete"
            );
        } else {
            info!(
                root = %root.display(),
                deleted = report.deleted.len(),
                reclaimed_bytes = report.reclaimed_bytes,
                kept = outcome.fresh.len(),
                excluded = outcome.excluded.len(),
                dry_run = report.dry_run,
                "reap finished"
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::scanner::FixedMarkers;
    use std::fs;
    use std::time::SystemTime;
    use tempfile::tempdir;

    const MIN: Duration = Duration::from_secs(60);

    #[test]
    fn zero_threshold_fails_before_root_check() {
        let result = reap(Path::new("/definitely/not/here"), Duration::ZERO, [".gitignore"]);
        assert!(matches!(result, Err(ReapError::InvalidThreshold)));
    }

    #[test]
    fn file_as_root_is_not_found() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, "x").unwrap();

        let result = reap(&file, MIN, Vec::<String>::new());
        assert!(matches!(result, Err(ReapError::RootNotFound { .. })));
        assert!(file.exists());
    }

    #[test]
    fn execute_only_deletes_the_selection() {
        let dir = tempdir().unwrap();
        for name in ["a", "b"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        let now = SystemTime::now();
        let markers: FixedMarkers = [("a", now - 30 * MIN), ("b", now - 40 * MIN)]
            .into_iter()
            .collect();
        let reaper = Reaper::new(ReapPolicy::default())
            .clock(FixedClock(now))
            .markers(markers);

        let plan = reaper.plan(dir.path()).unwrap();
        assert_eq!(plan.stale.len(), 2);

        let selected: HashSet<String> = ["a".to_string(), "not-stale".to_string()].into();
        let report = reaper.execute(dir.path(), plan, &selected);

        assert_eq!(report.deleted, vec!["a".to_string()]);
        assert!(!dir.path().join("a").exists());
        assert!(dir.path().join("b").exists());
    }

    #[test]
    fn report_helpers() {
        let report = ReapReport {
            deleted: vec!["x".into(), "y".into()],
            ..Default::default()
        };
        assert!(report.is_clean());
        assert_eq!(report.deleted_names(), BTreeSet::from(["x", "y"]));
        assert!(report.failed_names().is_empty());
    }
}
