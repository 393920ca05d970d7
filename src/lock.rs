//! Per-package exclusive locks.
//!
//! Every install or uninstall of a package holds `<root>/locks/<name>.lock`
//! for its whole duration, so two `mip` processes never modify the same
//! package at once. Different names never contend.

use anyhow::{Context, Result};
use fs4::FileExt;
use log::debug;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::MipError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What to do when another process holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPolicy {
    /// Poll until the timeout elapses, then fail with `LockContention`
    Wait(Duration),
    /// Fail with `LockContention` immediately
    FailFast,
}

impl Default for LockPolicy {
    fn default() -> Self {
        LockPolicy::Wait(Duration::from_secs(30))
    }
}

/// An acquired package lock. Released on drop.
#[derive(Debug)]
pub struct PackageLock {
    file: File,
    path: PathBuf,
    remove_on_release: bool,
}

impl PackageLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the lock file on release. Only for names no other process
    /// can ask for, since a waiter may already hold the old file open.
    pub fn remove_on_release(mut self) -> Self {
        self.remove_on_release = true;
        self
    }

    /// Take the lock for `name` without blocking. `Ok(None)` means another
    /// holder has it.
    pub fn try_acquire(lock_dir: &Path, name: &str) -> Result<Option<Self>> {
        let path = lock_dir.join(format!("{name}.lock"));
        let file = open_lock_file(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path,
                remove_on_release: false,
            })),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err).with_context(|| format!("Failed to lock {}", path.display())),
        }
    }

    /// Take the lock for `name`, waiting according to `policy`.
    #[tracing::instrument(skip(lock_dir))]
    pub async fn acquire(lock_dir: &Path, name: &str, policy: LockPolicy) -> Result<Self> {
        let deadline = match policy {
            LockPolicy::Wait(timeout) => Some(Instant::now() + timeout),
            LockPolicy::FailFast => None,
        };
        let mut announced = false;
        loop {
            if let Some(lock) = Self::try_acquire(lock_dir, name)? {
                return Ok(lock);
            }
            match deadline {
                Some(deadline) if Instant::now() < deadline => {
                    if !announced {
                        debug!("Waiting for lock on '{}'", name);
                        announced = true;
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                _ => return Err(MipError::LockContention(name.to_string()).into()),
            }
        }
    }
}

impl Drop for PackageLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Failed to unlock {:?}: {}", self.path, e);
        }
        if self.remove_on_release
            && let Err(e) = fs::remove_file(&self.path)
        {
            debug!("Failed to remove {:?}: {}", self.path, e);
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create lock directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open lock {}", path.display()))
}
