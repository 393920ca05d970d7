use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::runtime::Runtime;

/// Staging paths to delete if the process is interrupted.
#[derive(Default)]
pub struct CleanupContext {
    paths: Vec<PathBuf>,
}

impl CleanupContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: PathBuf) {
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    pub fn remove(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Delete every registered path that still exists.
    pub fn cleanup<R: Runtime + ?Sized>(&self, runtime: &R) {
        for path in &self.paths {
            if !runtime.exists(path) {
                continue;
            }
            debug!("Cleaning up: {:?}", path);
            let removed = if runtime.is_dir(path) {
                runtime.remove_dir_all(path)
            } else {
                runtime.remove_file(path)
            };
            if let Err(e) = removed {
                warn!("Failed to clean up {:?}: {}", path, e);
            }
        }
    }
}

pub type SharedCleanupContext = Arc<Mutex<CleanupContext>>;

pub fn new_shared() -> SharedCleanupContext {
    Arc::new(Mutex::new(CleanupContext::new()))
}

/// Registers a path for interrupt cleanup until [`CleanupGuard::release`]
/// is called. Dropping the guard leaves the path registered.
pub struct CleanupGuard {
    ctx: SharedCleanupContext,
    path: PathBuf,
}

impl CleanupGuard {
    pub fn new(ctx: SharedCleanupContext, path: PathBuf) -> Self {
        if let Ok(mut guard) = ctx.lock() {
            guard.add(path.clone());
        }
        Self { ctx, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path no longer needs interrupt cleanup.
    pub fn release(self) {
        if let Ok(mut guard) = self.ctx.lock() {
            guard.remove(&self.path);
        }
    }
}

/// On Ctrl-C, delete everything registered in `ctx` and exit with 130.
/// Abort the returned handle once the guarded work is done.
pub fn spawn_interrupt_handler<R: Runtime + ?Sized + 'static>(
    runtime: Arc<R>,
    ctx: SharedCleanupContext,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cleaning up...");
            if let Ok(guard) = ctx.lock() {
                guard.cleanup(runtime.as_ref());
            }
            std::process::exit(130);
        }
    })
}
