//! Exclusive sidecar locks for entity files.
//!
//! State transitions and session-graph updates serialize on a `.lock` file
//! placed next to the state they protect. The lock itself is an advisory
//! `flock(2)` on an owned descriptor: whoever keeps the `File` open keeps
//! the lock, so [`LockGuard`] is just that file plus its path, and dropping
//! the guard releases the lock. The sidecar's content is a small JSON
//! payload naming the holder, so a contender that times out can report who
//! it was waiting on.
//!
//! Acquisition is a poll loop over the non-blocking `LOCK_NB` variant; the
//! caller picks the deadline. A zero timeout degenerates to a single try.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Who holds a lock, as recorded inside the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderInfo {
    pub pid: u32,
    pub owner: String,
    pub purpose: String,
    pub since: DateTime<Utc>,
}

impl HolderInfo {
    fn current(owner: &str, purpose: &str) -> Self {
        Self {
            pid: std::process::id(),
            owner: owner.to_string(),
            purpose: purpose.to_string(),
            since: Utc::now(),
        }
    }
}

impl std::fmt::Display for HolderInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PID {} (owner: {}, purpose: {}, since: {})",
            self.pid, self.owner, self.purpose, self.since
        )
    }
}

/// Best-effort read of the holder payload from a contended sidecar.
pub fn read_holder(lock_path: &Path) -> Option<HolderInfo> {
    let content = std::fs::read_to_string(lock_path).ok()?;
    serde_json::from_str(&content).ok()
}

/// An acquired sidecar lock. Held for as long as this value lives.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the holder payload into the sidecar. Contenders read this
    /// when they give up waiting.
    fn stamp(&mut self, info: &HolderInfo) -> Result<()> {
        self.file.set_len(0).context("Failed to truncate lock sidecar")?;
        self.file
            .seek(SeekFrom::Start(0))
            .context("Failed to rewind lock sidecar")?;
        serde_json::to_writer(&mut self.file, info)
            .context("Failed to record lock holder")?;
        self.file.flush().context("Failed to flush lock sidecar")?;
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Unlock eagerly rather than waiting for the descriptor to close,
        // so a contender's next poll sees the release immediately.
        // SAFETY: the descriptor stays open for the duration of this call;
        // LOCK_UN has no other preconditions.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

fn open_sidecar(lock_path: &Path) -> Result<File> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create lock dir: {}", parent.display()))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .with_context(|| format!("Failed to open lock sidecar: {}", lock_path.display()))
}

fn locked_exclusively(file: &File) -> bool {
    // SAFETY: the descriptor belongs to `file`, which outlives the call.
    // LOCK_NB keeps this a single attempt; the poll loop owns the waiting.
    unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) == 0 }
}

/// Acquire the sidecar at `lock_path`, polling until `timeout` elapses.
///
/// On success the holder payload (pid, owner, purpose, acquisition time) is
/// stamped into the file. On timeout the error names the current holder
/// when its payload is readable.
pub fn acquire_with_timeout(
    lock_path: &Path,
    owner: &str,
    purpose: &str,
    timeout: Duration,
) -> Result<LockGuard> {
    let file = open_sidecar(lock_path)?;
    let deadline = Instant::now() + timeout;

    loop {
        if locked_exclusively(&file) {
            let mut guard = LockGuard {
                file,
                path: lock_path.to_path_buf(),
            };
            guard.stamp(&HolderInfo::current(owner, purpose))?;
            return Ok(guard);
        }

        if Instant::now() >= deadline {
            let holder = read_holder(lock_path)
                .map(|h| h.to_string())
                .unwrap_or_else(|| "unknown holder".to_string());
            anyhow::bail!(
                "Timed out after {}ms waiting for lock {} held by {holder}",
                timeout.as_millis(),
                lock_path.display()
            );
        }
        std::thread::sleep(RETRY_INTERVAL);
    }
}

/// Single-attempt acquire; fails immediately when the sidecar is held.
pub fn try_acquire(lock_path: &Path, owner: &str, purpose: &str) -> Result<LockGuard> {
    acquire_with_timeout(lock_path, owner, purpose, Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_stamps_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("task-1.lock");
        let _guard = try_acquire(&path, "sess-a", "state transition").unwrap();

        let holder = read_holder(&path).expect("holder payload");
        assert_eq!(holder.pid, std::process::id());
        assert_eq!(holder.owner, "sess-a");
        assert_eq!(holder.purpose, "state transition");
    }

    #[test]
    fn test_sidecar_parents_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".locks/deep/entity.lock");
        let guard = try_acquire(&path, "o", "p").unwrap();
        assert_eq!(guard.path(), path);
        assert!(path.exists());
    }

    #[test]
    fn test_restamp_replaces_longer_payload() {
        // A second acquisition in the same process (flock is per open file
        // description) must fully replace the previous payload, even when
        // the new one is shorter.
        let dir = tempdir().unwrap();
        let path = dir.path().join("e.lock");
        drop(try_acquire(&path, "first-owner-with-a-long-name", "long purpose text").unwrap());
        let _guard = try_acquire(&path, "o2", "p2").unwrap();

        let holder = read_holder(&path).expect("holder payload");
        assert_eq!(holder.owner, "o2");
        assert_eq!(holder.purpose, "p2");
    }

    #[test]
    fn test_timeout_reports_holder() {
        // Needs the util-linux flock binary to hold the lock from another
        // process.
        if std::process::Command::new("flock")
            .arg("--version")
            .output()
            .is_err()
        {
            return;
        }
        let dir = tempdir().unwrap();
        let path = dir.path().join("held.lock");

        let mut child = std::process::Command::new("sh")
            .arg("-c")
            .arg(format!(
                "exec 9>{p}; flock -x 9; sleep 5",
                p = path.display()
            ))
            .spawn()
            .unwrap();
        // Give the child a moment to take the lock.
        std::thread::sleep(Duration::from_millis(300));

        let result = acquire_with_timeout(&path, "late", "test", Duration::from_millis(200));
        let _ = child.kill();
        let _ = child.wait();

        let err = result.unwrap_err().to_string();
        assert!(err.contains("Timed out"), "unexpected error: {err}");
    }

    #[test]
    fn test_read_holder_on_garbage_is_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("g.lock");
        std::fs::write(&path, "not json").unwrap();
        assert!(read_holder(&path).is_none());
        assert!(read_holder(&dir.path().join("missing.lock")).is_none());
    }

    #[test]
    fn test_invalid_path_fails() {
        let result = try_acquire(Path::new("/dev/null/locks/x.lock"), "o", "p");
        assert!(result.is_err());
    }
}
