use crate::error::{EntryError, EntryErrorKind};
use crate::scanner::StaleDir;
use std::fs;
use std::io;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct CleanResult {
    pub deleted: Vec<StaleDir>,
    /// Already gone when we got to it. Another run or the upload handler
    /// removed it first.
    pub vanished: Vec<StaleDir>,
    pub failed: Vec<(StaleDir, io::Error)>,
}

impl CleanResult {
    pub fn total_cleaned(&self) -> u64 {
        self.deleted.iter().map(|d| d.size_bytes).sum()
    }

    pub fn into_entry_errors(self) -> (Vec<StaleDir>, Vec<StaleDir>, Vec<EntryError>) {
        let failed = self
            .failed
            .into_iter()
            .map(|(dir, source)| EntryError {
                name: dir.name,
                kind: EntryErrorKind::Remove,
                source,
            })
            .collect();
        (self.deleted, self.vanished, failed)
    }
}

/// Remove each directory recursively. One failure never stops the others.
/// With `dry_run` nothing is touched and every entry counts as deleted.
pub fn clean(dirs: Vec<StaleDir>, dry_run: bool) -> CleanResult {
    let mut result = CleanResult::default();

    for dir in dirs {
        if dry_run {
            info!(entry = %dir.name, age_secs = dir.age.as_secs(), "would delete stale directory");
            result.deleted.push(dir);
            continue;
        }

        match fs::remove_dir_all(&dir.path) {
            Ok(()) => {
                info!(
                    entry = %dir.name,
                    age_secs = dir.age.as_secs(),
                    bytes = dir.size_bytes,
                    "deleted stale directory"
                );
                result.deleted.push(dir);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(entry = %dir.name, "stale directory already removed");
                result.vanished.push(dir);
            }
            Err(e) => {
                warn!(entry = %dir.name, error = %e, "failed to delete stale directory");
                result.failed.push((dir, e));
            }
        }
    }

    result
}
