//! Named advisory lock serializing role transitions.
//!
//! keepalived may fire notify hooks in quick succession, each one a fresh
//! process. Transitions take an exclusive `flock` on a well-known file so
//! their interface and conntrackd commands never interleave.

use common::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Default number of acquisition attempts
pub const DEFAULT_LOCK_ATTEMPTS: u32 = 10;

/// Default delay between attempts
pub const DEFAULT_LOCK_BACKOFF: Duration = Duration::from_secs(1);

/// Lock file location and retry policy
#[derive(Debug, Clone)]
pub struct TransitionLock {
    path: PathBuf,
    attempts: u32,
    backoff: Duration,
}

/// Held lock; released on drop
pub struct LockGuard {
    path: PathBuf,
    _lock: Flock<File>,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("path", &self.path).finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "Released transition lock");
    }
}

impl TransitionLock {
    pub fn new(path: impl Into<PathBuf>, attempts: u32, backoff: Duration) -> Self {
        Self {
            path: path.into(),
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock once without waiting.
    ///
    /// Returns `Ok(None)` when another holder owns it.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(Some(LockGuard {
                path: self.path.clone(),
                _lock: lock,
            })),
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
            Err((_, errno)) => Err(Error::Io(errno.into())),
        }
    }

    /// Take the lock, retrying with a fixed backoff.
    ///
    /// Fails with [`Error::LockTimeout`] once every attempt found the lock
    /// held.
    pub async fn acquire(&self) -> Result<LockGuard> {
        for attempt in 1..=self.attempts {
            if let Some(guard) = self.try_acquire()? {
                debug!(path = %self.path.display(), attempt, "Acquired transition lock");
                return Ok(guard);
            }

            warn!(
                path = %self.path.display(),
                attempt,
                max_attempts = self.attempts,
                "Transition lock busy"
            );
            if attempt < self.attempts {
                sleep(self.backoff).await;
            }
        }

        Err(Error::LockTimeout {
            path: self.path.clone(),
            attempts: self.attempts,
        })
    }
}
