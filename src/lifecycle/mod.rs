//! Package lifecycle: install, uninstall, recovery and read-only queries.
//!
//! Every mutating operation runs in the same shape:
//!
//! 1. Refresh the host integration files
//! 2. Sweep stale partial packages left behind by crashed runs
//! 3. Per package, take the package lock and re-check the on-disk state
//! 4. Stage, fetch, extract, commit and bind (or remove and unbind)
//!
//! A package is only `Installed` once its binding exists, so a crash at
//! any point leaves something the next sweep recognises as partial.

mod install;
mod query;
mod recovery;
mod report;
mod uninstall;

#[cfg(test)]
pub(crate) mod test_support;

use anyhow::Result;
use log::warn;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::archive::ArchiveStore;
use crate::binding::NamespaceBinding;
use crate::cleanup::{SharedCleanupContext, new_shared};
use crate::fetch::Fetcher;
use crate::lock::{LockPolicy, PackageLock};
use crate::package::PackageState;
use crate::registry::Registry;
use crate::runtime::Runtime;

pub use query::SymbolCollision;
pub use recovery::RecoveryReport;
pub use report::{
    InstallPhase, InstallReport, PackageOutcome, UninstallOutcome, UninstallReport,
    describe_failure,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleOptions {
    pub lock_policy: LockPolicy,
    /// Clean partial packages without asking
    pub auto_recover: bool,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            lock_policy: LockPolicy::Wait(Duration::from_secs(30)),
            auto_recover: true,
        }
    }
}

pub struct Lifecycle<R, F, G>
where
    R: Runtime + 'static,
    F: Fetcher,
    G: Registry,
{
    runtime: Arc<R>,
    fetcher: F,
    registry: G,
    store: ArchiveStore<R>,
    binding: NamespaceBinding<R>,
    options: LifecycleOptions,
    cleanup: SharedCleanupContext,
}

impl<R, F, G> Lifecycle<R, F, G>
where
    R: Runtime + 'static,
    F: Fetcher,
    G: Registry,
{
    pub fn new(
        runtime: Arc<R>,
        fetcher: F,
        registry: G,
        package_root: PathBuf,
        namespace_root: PathBuf,
        lock_root: PathBuf,
        options: LifecycleOptions,
    ) -> Self {
        Self {
            store: ArchiveStore::new(Arc::clone(&runtime), package_root, lock_root),
            binding: NamespaceBinding::new(Arc::clone(&runtime), namespace_root),
            runtime,
            fetcher,
            registry,
            options,
            cleanup: new_shared(),
        }
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    pub fn store(&self) -> &ArchiveStore<R> {
        &self.store
    }

    pub fn binding(&self) -> &NamespaceBinding<R> {
        &self.binding
    }

    /// Paths to delete if the process is interrupted mid-install.
    pub fn cleanup_context(&self) -> SharedCleanupContext {
        Arc::clone(&self.cleanup)
    }

    /// Current state of `name`, derived from the package root and the
    /// namespace root.
    pub fn state(&self, name: &str) -> PackageState {
        PackageState::derive(
            self.runtime.is_dir(&self.store.package_dir(name)),
            self.runtime.exists(&self.store.staging_dir(name)),
            self.binding.is_bound(name),
        )
    }

    /// Write the host integration files and return the directory the user
    /// adds to the MATLAB path.
    pub fn setup(&self) -> Result<&Path> {
        self.binding.ensure_host_integration()?;
        Ok(self.binding.root())
    }

    fn refresh_host_integration(&self) {
        if let Err(e) = self.binding.ensure_host_integration() {
            warn!("Failed to update MATLAB integration: {:#}", e);
        }
    }

    async fn lock(&self, name: &str) -> Result<PackageLock> {
        PackageLock::acquire(self.store.lock_dir(), name, self.options.lock_policy).await
    }
}
