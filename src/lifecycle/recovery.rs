use anyhow::Result;
use log::{debug, info, warn};
use std::collections::BTreeSet;

use super::Lifecycle;
use crate::fetch::Fetcher;
use crate::lock::PackageLock;
use crate::package::PackageState;
use crate::registry::Registry;
use crate::runtime::Runtime;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Partial packages that were cleaned up
    pub recovered: Vec<String>,
    /// Partial packages locked by another process, presumably mid-operation
    pub in_progress: Vec<String>,
    /// Partial packages the user chose to keep
    pub kept: Vec<String>,
}

impl<R, F, G> Lifecycle<R, F, G>
where
    R: Runtime + 'static,
    F: Fetcher,
    G: Registry,
{
    /// Find packages left partial by an interrupted run and clean them up.
    ///
    /// A package whose lock is held elsewhere is being worked on right now
    /// and is left alone. Leftover staging trees next to a complete install
    /// and the trash area are removed as well.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        if let Err(e) = self.store.clear_trash() {
            warn!("Failed to clear trash: {:#}", e);
        }

        let mut candidates: BTreeSet<String> = BTreeSet::new();
        candidates.extend(self.store.installed_names()?);
        candidates.extend(self.store.staged_names()?);
        candidates.extend(self.binding.bound_names()?);

        for name in candidates {
            let state = self.state(&name);
            let staging = self.store.staging_dir(&name);
            let stray_staging = state == PackageState::Installed && self.runtime.exists(&staging);
            if state != PackageState::Partial && !stray_staging {
                continue;
            }

            let Some(_lock) = PackageLock::try_acquire(self.store.lock_dir(), &name)? else {
                debug!("'{}' is locked by another process, leaving it alone", name);
                if state == PackageState::Partial {
                    report.in_progress.push(name);
                }
                continue;
            };

            if stray_staging {
                debug!("Removing leftover staging tree of '{}'", name);
                self.store.discard(&staging)?;
                continue;
            }
            // Re-check under the lock; the holder may have just finished
            if self.state(&name) != PackageState::Partial {
                continue;
            }

            if !self.options.auto_recover {
                let prompt = format!(
                    "Package '{}' was left incomplete by an interrupted operation. Remove it?",
                    name
                );
                if !self.runtime.confirm(&prompt)? {
                    report.kept.push(name);
                    continue;
                }
            }

            self.clean_partial(&name)?;
            info!("Cleaned up incomplete package '{}'", name);
            report.recovered.push(name);
        }
        Ok(report)
    }

    pub(super) async fn recover_best_effort(&self) {
        match self.recover().await {
            Ok(report) => {
                for name in &report.in_progress {
                    warn!("Package '{}' is being modified by another mip process", name);
                }
            }
            Err(e) => warn!("Recovery sweep failed: {:#}", e),
        }
    }

    /// Remove every trace of a partial package. Caller holds its lock.
    fn clean_partial(&self, name: &str) -> Result<()> {
        self.store.discard(&self.store.staging_dir(name))?;
        let final_path = self.store.package_dir(name);
        if self.runtime.exists(&final_path) {
            self.store.remove(&final_path)?;
        }
        self.binding.unbind(name)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::fetch::MockFetcher;
    use crate::registry::StaticRegistry;
    use crate::runtime::{MockRuntime, RealRuntime};
    use std::fs;
    use std::sync::Arc;

    #[test_log::test(tokio::test)]
    async fn test_sweep_cleans_every_partial_shape() {
        let fixture = Fixture::new();
        let graph = [("chebfun", &[][..])];
        let lifecycle = fixture.lifecycle(archive_fetcher(&graph), registry(&graph));
        lifecycle.install(&names(&["chebfun"]), false).await.unwrap();

        // Crash after staging, crash after commit, crash mid-uninstall
        fs::create_dir_all(fixture.package_root().join(".staging/halfway")).unwrap();
        fs::create_dir_all(fixture.package_root().join("unbound")).unwrap();
        let dangling = fixture.namespace_root().join("+mip/+bindings/pkg_gone.m");
        fs::copy(lifecycle.binding().binding_path("chebfun"), &dangling).unwrap();
        let stub = fs::read_to_string(&dangling).unwrap().replace("chebfun", "gone");
        fs::write(&dangling, stub).unwrap();
        assert_eq!(lifecycle.state("gone"), PackageState::Partial);

        let report = lifecycle.recover().await.unwrap();

        assert_eq!(report.recovered, vec!["gone", "halfway", "unbound"]);
        for name in ["gone", "halfway", "unbound"] {
            assert_eq!(lifecycle.state(name), PackageState::Absent, "{name}");
        }
        assert_eq!(lifecycle.state("chebfun"), PackageState::Installed);
    }

    #[test_log::test(tokio::test)]
    async fn test_sweep_skips_locked_packages() {
        let fixture = Fixture::new();
        let lifecycle = fixture.lifecycle(MockFetcher::new(), StaticRegistry::default());
        let staging = fixture.package_root().join(".staging/busy");
        fs::create_dir_all(&staging).unwrap();
        let held = PackageLock::try_acquire(lifecycle.store().lock_dir(), "busy")
            .unwrap()
            .unwrap();

        let report = lifecycle.recover().await.unwrap();
        assert_eq!(report.in_progress, vec!["busy"]);
        assert!(staging.exists());

        drop(held);
        let report = lifecycle.recover().await.unwrap();
        assert_eq!(report.recovered, vec!["busy"]);
        assert!(!staging.exists());
    }

    #[test_log::test(tokio::test)]
    async fn test_sweep_asks_when_auto_recover_is_off() {
        let fixture = Fixture::new();
        fs::create_dir_all(fixture.package_root().join("unbound")).unwrap();

        let mut runtime = MockRuntime::new();
        let real = RealRuntime;
        runtime.expect_exists().returning(move |p| real.exists(p));
        runtime.expect_is_dir().returning(move |p| real.is_dir(p));
        runtime.expect_read_dir().returning(move |p| real.read_dir(p));
        runtime
            .expect_read_to_string()
            .returning(move |p| real.read_to_string(p));
        runtime
            .expect_confirm()
            .withf(|prompt| prompt.contains("'unbound'"))
            .times(1)
            .returning(|_| Ok(false));

        let mut options = options();
        options.auto_recover = false;
        let lifecycle = super::super::Lifecycle::new(
            Arc::new(runtime),
            MockFetcher::new(),
            StaticRegistry::default(),
            fixture.package_root(),
            fixture.namespace_root(),
            fixture.lock_root(),
            options,
        );

        let report = lifecycle.recover().await.unwrap();
        assert_eq!(report.kept, vec!["unbound"]);
        assert!(fixture.package_root().join("unbound").exists());
    }

    #[test_log::test(tokio::test)]
    async fn test_sweep_restores_tree_of_interrupted_overwrite() {
        let fixture = Fixture::new();
        let graph = [("chebfun", &[][..])];
        let lifecycle = fixture.lifecycle(archive_fetcher(&graph), registry(&graph));
        lifecycle.install(&names(&["chebfun"]), false).await.unwrap();
        let installed = fixture.package_root().join("chebfun");
        let before = snapshot(&installed);

        // Killed between moving the old tree aside and placing the new one
        let aside = lifecycle.store().trash_dir().join("chebfun.99999");
        fs::create_dir_all(lifecycle.store().trash_dir()).unwrap();
        fs::rename(&installed, &aside).unwrap();
        fs::create_dir_all(lifecycle.store().staging_dir("chebfun")).unwrap();

        let report = lifecycle.recover().await.unwrap();

        assert!(report.recovered.is_empty());
        assert_eq!(lifecycle.state("chebfun"), PackageState::Installed);
        assert_eq!(snapshot(&installed), before);
        assert!(!lifecycle.store().staging_dir("chebfun").exists());
        assert!(!lifecycle.store().trash_dir().exists());
    }

    #[test_log::test(tokio::test)]
    async fn test_sweep_removes_stray_staging_of_installed_package() {
        let fixture = Fixture::new();
        let graph = [("chebfun", &[][..])];
        let lifecycle = fixture.lifecycle(archive_fetcher(&graph), registry(&graph));
        lifecycle.install(&names(&["chebfun"]), false).await.unwrap();
        let stray = lifecycle.store().staging_dir("chebfun");
        fs::create_dir_all(&stray).unwrap();
        fs::create_dir_all(lifecycle.store().trash_dir().join("chebfun.1")).unwrap();

        let report = lifecycle.recover().await.unwrap();

        assert!(report.recovered.is_empty());
        assert!(!stray.exists());
        assert!(!lifecycle.store().trash_dir().exists());
        assert_eq!(lifecycle.state("chebfun"), PackageState::Installed);
    }
}
