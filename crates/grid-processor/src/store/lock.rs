//! Single-writer exclusion per cycle via an OS file lock on a marker file.
//!
//! The lock belongs to the open file, so a crashed holder releases it when the
//! process exits. The marker records who holds it for `CycleBusy` reports.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nwp_common::ForecastCycle;
use tracing::{debug, warn};

use crate::error::{GridProcessorError, Result};

/// Held for the lifetime of a cycle writer; released on drop.
#[derive(Debug)]
pub struct CycleLock {
    path: PathBuf,
    cycle: ForecastCycle,
    file: File,
}

impl CycleLock {
    /// Take the exclusive lock without waiting.
    ///
    /// A marker left by an interrupted run carries no lock and is reclaimed
    /// with a warning. A live holder older than `stale_after` is still busy,
    /// but is logged as possibly hung.
    pub fn acquire(path: &Path, cycle: ForecastCycle, stale_after: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                let holder = read_holder(path);
                if let Some(age) = holder_age(&holder).filter(|age| *age > stale_after) {
                    warn!(
                        cycle = %cycle,
                        path = %path.display(),
                        age_secs = age.as_secs(),
                        holder = %holder,
                        "Cycle lock held past the stale age"
                    );
                }
                return Err(GridProcessorError::CycleBusy {
                    cycle: cycle.to_string(),
                    holder,
                });
            }
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }

        let previous = read_holder(path);
        if !previous.is_empty() {
            warn!(
                cycle = %cycle,
                path = %path.display(),
                previous = %previous,
                "Reclaiming cycle lock left by an interrupted run"
            );
        }

        let holder = serde_json::json!({
            "pid": std::process::id(),
            "acquired_at": Utc::now().to_rfc3339(),
        });
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(holder.to_string().as_bytes())?;
        file.flush()?;
        debug!(cycle = %cycle, path = %path.display(), "Acquired cycle lock");

        Ok(Self {
            path: path.to_path_buf(),
            cycle,
            file,
        })
    }

    pub fn cycle(&self) -> ForecastCycle {
        self.cycle
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CycleLock {
    // The marker is emptied but not removed: unlinking it would let a waiter
    // lock a file no longer reachable at `path`.
    fn drop(&mut self) {
        if let Err(e) = self.file.set_len(0) {
            warn!(cycle = %self.cycle, error = %e, "Failed to clear cycle lock marker");
        }
        match self.file.unlock() {
            Ok(()) => debug!(cycle = %self.cycle, "Released cycle lock"),
            Err(e) => warn!(cycle = %self.cycle, error = %e, "Failed to release cycle lock"),
        }
    }
}

fn read_holder(path: &Path) -> String {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn holder_age(holder: &str) -> Option<Duration> {
    let record: serde_json::Value = serde_json::from_str(holder).ok()?;
    let acquired = DateTime::parse_from_rfc3339(record.get("acquired_at")?.as_str()?).ok()?;
    (Utc::now() - acquired.with_timezone(&Utc)).to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nwp_common::SourceId;
    use std::sync::Barrier;

    fn cycle() -> ForecastCycle {
        ForecastCycle::parse(SourceId::MetNordic, "20250902", 18).unwrap()
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_second_acquire_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.lock");

        let held = CycleLock::acquire(&path, cycle(), HOUR).unwrap();
        let err = CycleLock::acquire(&path, cycle(), HOUR).unwrap_err();
        assert!(err.is_busy());
        assert!(err.to_string().contains("pid"));

        drop(held);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        assert!(CycleLock::acquire(&path, cycle(), HOUR).is_ok());
    }

    #[test]
    fn test_leftover_marker_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.lock");
        std::fs::write(&path, "{\"pid\": 1, \"acquired_at\": \"2025-09-02T18:00:00+00:00\"}").unwrap();

        let lock = CycleLock::acquire(&path, cycle(), HOUR).unwrap();
        assert_eq!(lock.path(), path.as_path());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains(&std::process::id().to_string()));
        assert!(!contents.contains("2025-09-02"));
    }

    #[test]
    fn test_old_live_holder_is_not_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.lock");

        let _held = CycleLock::acquire(&path, cycle(), Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let err = CycleLock::acquire(&path, cycle(), Duration::from_millis(1)).unwrap_err();
        assert!(err.is_busy());
    }

    #[test]
    fn test_racing_reclaim_of_leftover_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.lock");
        std::fs::write(&path, "{\"pid\": 1, \"acquired_at\": \"2025-09-02T18:00:00+00:00\"}").unwrap();
        let barrier = Barrier::new(2);

        let results: Vec<Result<CycleLock>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        let result = CycleLock::acquire(&path, cycle(), Duration::from_millis(1));
                        // Both attempts happen while the winner still holds the lock.
                        barrier.wait();
                        result
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(r, Err(e) if e.is_busy())));

        // The loser left the winner's marker in place.
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains(&std::process::id().to_string()));

        drop(results);
        assert!(CycleLock::acquire(&path, cycle(), HOUR).is_ok());
    }
}
