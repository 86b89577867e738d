//! State directory lock.
//!
//! The counters file has a single owner. A second `smart-abl` pointed at the
//! same state directory would interleave read-modify-write cycles, so startup
//! refuses while another live instance holds the lock.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct ProcessLock {
    lock_path: PathBuf,
    owned: bool,
}

impl ProcessLock {
    const LOCK_FILE_NAME: &'static str = ".smart-abl.lock";

    /// Acquire the lock for `state_dir`, creating the directory if needed.
    ///
    /// Returns an error if another live instance holds it. A lock left behind
    /// by a dead process is removed.
    pub fn acquire<P: AsRef<Path>>(state_dir: P) -> Result<Self> {
        let state_dir = state_dir.as_ref();
        fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create state directory: {}", state_dir.display()))?;

        let lock_path = state_dir.join(Self::LOCK_FILE_NAME);

        if lock_path.exists() {
            match Self::holder_pid(&lock_path) {
                Ok(Some(pid)) => {
                    bail!(
                        "Another smart-abl instance owns {} (PID: {})\n\
                         \n\
                         Stop it, or remove the stale lock file if it is not running:\n\
                         rm {}",
                        state_dir.display(),
                        pid,
                        lock_path.display()
                    );
                }
                Ok(None) => {
                    tracing::info!("Removing stale lock file from previous instance");
                    fs::remove_file(&lock_path).context("Failed to remove stale lock file")?;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable lock file, replacing it");
                    let _ = fs::remove_file(&lock_path);
                }
            }
        }

        let pid = std::process::id();
        fs::write(&lock_path, format!("{pid}\n"))
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;

        tracing::debug!(pid, path = %lock_path.display(), "Acquired state directory lock");

        Ok(Self {
            lock_path,
            owned: true,
        })
    }

    /// PID of a live holder, `None` if the recorded process is gone.
    fn holder_pid(lock_path: &Path) -> Result<Option<u32>> {
        let contents = fs::read_to_string(lock_path).context("Failed to read lock file")?;
        let pid: u32 = contents
            .trim()
            .parse()
            .context("Failed to parse PID from lock file")?;

        Ok(Self::is_process_running(pid).then_some(pid))
    }

    #[cfg(unix)]
    fn is_process_running(pid: u32) -> bool {
        // A reused PID belonging to some other program does not count.
        fs::read_to_string(format!("/proc/{pid}/cmdline"))
            .map(|cmdline| cmdline.contains("smart-abl") || cmdline.contains("smart_abl"))
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    fn is_process_running(_pid: u32) -> bool {
        true
    }

    /// Release the lock (called automatically on drop)
    pub fn release(&mut self) {
        if self.owned {
            if let Err(e) = fs::remove_file(&self.lock_path) {
                tracing::warn!("Failed to remove lock file: {}", e);
            }
            self.owned = false;
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}
