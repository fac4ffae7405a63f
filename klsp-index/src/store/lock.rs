use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{backoff_delay, StoreError};

/// File name of the lock marker inside every store directory
pub const LOCK_FILE_NAME: &str = "LOCK";

/// How hard to try when a store is locked by someone else
#[derive(Debug, Clone)]
pub struct LockRetryPolicy {
    /// Attempts before falling back to stale-lock cleanup
    pub max_attempts: u32,
    /// Backoff base; attempt `n` waits `base_delay * 2^(n-1)`
    pub base_delay: Duration,
}

impl Default for LockRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

/// Exclusive lock marker for one store directory
///
/// The marker is a `LOCK` file holding the owner's PID, kept under an
/// exclusive advisory lock for as long as the store is open.
pub struct StoreLock {
    path: PathBuf,
    file: Option<File>,
}

impl StoreLock {
    /// Try to take the lock for the store in `dir`, creating the directory if needed
    pub fn acquire(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE_NAME);

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked {
                path: dir.to_path_buf(),
            });
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", process::id())?;
        file.flush()?;

        debug!("Acquired store lock at {:?} (PID: {})", path, process::id());
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock and remove the marker
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
            drop(file);
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove lock marker {:?}: {}", self.path, e);
                }
            }
            debug!("Released store lock at {:?}", self.path);
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Remove the lock marker in `dir` if the process it names is gone.
///
/// Returns `true` when a marker was removed.
pub fn remove_stale_lock(dir: &Path) -> bool {
    let path = dir.join(LOCK_FILE_NAME);
    let mut contents = String::new();
    match File::open(&path) {
        Ok(mut file) => {
            if let Err(e) = file.read_to_string(&mut contents) {
                warn!("Failed to read lock marker {:?}: {}", path, e);
                return false;
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
        Err(e) => {
            warn!("Failed to open lock marker {:?}: {}", path, e);
            return false;
        }
    }

    // An empty marker may belong to an owner between truncate and PID write
    let pid = match contents.trim().parse::<u32>() {
        Ok(pid) if pid > 0 && pid <= i32::MAX as u32 => pid,
        _ => {
            debug!("Lock marker {:?} holds no PID, leaving it in place", path);
            return false;
        }
    };
    if is_process_running(pid) {
        return false;
    }

    match fs::remove_file(&path) {
        Ok(()) => {
            info!("Removed stale store lock marker: {:?}", path);
            true
        }
        Err(e) => {
            warn!("Failed to remove stale lock marker {:?}: {}", path, e);
            false
        }
    }
}

/// Open something guarded by a store lock, retrying while the lock is held.
///
/// Lock contention is retried `max_attempts` times with exponential backoff,
/// then one stale-lock cleanup is attempted before a final try. Any other
/// error is returned immediately.
pub fn open_with_retry<T, F>(
    dir: &Path,
    policy: &LockRetryPolicy,
    mut open: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match open() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_lock_held() => {
                warn!(
                    "Store lock conflict at {:?} (attempt {}/{})",
                    dir, attempt, attempts
                );
                if attempt < attempts {
                    std::thread::sleep(backoff_delay(policy.base_delay, attempt));
                }
            }
            Err(e) => return Err(e),
        }
    }

    warn!(
        "Failed to acquire store lock at {:?} after {} attempts, cleaning up and retrying once more",
        dir, attempts
    );
    remove_stale_lock(dir);
    open().map_err(|e| {
        if e.is_lock_held() {
            warn!(
                "Store at {:?} is still locked. Only one instance may index a workspace at a time.",
                dir
            );
        }
        e
    })
}

/// Check if a process with the given PID is running
#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks that the process exists
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    // Without a portable liveness probe, never treat a marker as stale
    true
}
