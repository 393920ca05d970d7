use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use super::{InstallPhase, InstallReport, Lifecycle, PackageOutcome};
use crate::archive::ArchiveFormat;
use crate::cleanup::CleanupGuard;
use crate::fetch::{ArchiveSource, Fetcher, read_source, verify_checksum};
use crate::package::{MANIFEST_FILE, Manifest, PackageState};
use crate::registry::{PackageSpec, Registry, resolve_chain};
use crate::runtime::Runtime;

type PhaseResult<T> = std::result::Result<T, (InstallPhase, anyhow::Error)>;

impl<R, F, G> Lifecycle<R, F, G>
where
    R: Runtime + 'static,
    F: Fetcher,
    G: Registry,
{
    /// Install `names` and their dependencies, dependencies first.
    ///
    /// Resolution errors abort before anything is fetched. Per-package
    /// failures are recorded in the report and stop the rest of the chain;
    /// packages installed before the failure stay installed. `overwrite`
    /// applies to the requested names only, never to their dependencies.
    #[tracing::instrument(skip(self))]
    pub async fn install(&self, names: &[String], overwrite: bool) -> Result<InstallReport> {
        self.refresh_host_integration();
        self.recover_best_effort().await;

        let chain = resolve_chain(&self.registry, names)
            .await
            .context("Failed to resolve dependencies")?;
        debug!(
            "Install order: {:?}",
            chain.iter().map(|s| s.name.as_str()).collect::<Vec<_>>()
        );

        let overwrite_names: HashSet<&str> = if overwrite {
            names.iter().map(String::as_str).collect()
        } else {
            HashSet::new()
        };
        let mut report = InstallReport::default();
        self.install_chain(&chain, &overwrite_names, &mut report)
            .await;
        Ok(report)
    }

    /// Install a package archive given as a local `.mhl` path or a URL.
    ///
    /// Name and dependencies come from the archive's `mip.json`.
    /// Dependencies are installed from the registry first.
    #[tracing::instrument(skip(self))]
    pub async fn install_archive(
        &self,
        source: &ArchiveSource,
        overwrite: bool,
    ) -> Result<InstallReport> {
        self.refresh_host_integration();
        self.recover_best_effort().await;

        let label = source.to_string();
        let mut report = InstallReport::default();

        // Until the manifest is read the package name is unknown, so the
        // archive is staged under a per-process name guarded by its own lock
        let provisional = format!("_archive-{}", std::process::id());
        let _provisional_lock = self.lock(&provisional).await?.remove_on_release();

        let bytes = match read_source(self.runtime.as_ref(), &self.fetcher, source).await {
            Ok(bytes) => bytes,
            Err(error) => {
                report.push(
                    &label,
                    PackageOutcome::RolledBack {
                        phase: InstallPhase::Fetching,
                        error,
                    },
                );
                return Ok(report);
            }
        };

        let staging = self.store.staging_dir(&provisional);
        let guard = CleanupGuard::new(Arc::clone(&self.cleanup), staging.clone());
        let format = ArchiveFormat::from_location(&source.location());
        let manifest = match self.stage_archive(&provisional, &bytes, format, &staging) {
            Ok(manifest) => manifest,
            Err((phase, error)) => {
                let outcome = self.roll_back(&label, &staging, phase, error);
                guard.release();
                report.push(&label, outcome);
                return Ok(report);
            }
        };

        let name = manifest.package.clone();
        let mut spec = PackageSpec::new(&name, source.location())
            .with_dependencies(manifest.dependencies.iter().cloned());
        spec.version = manifest.version.clone();

        if !overwrite && self.state(&name) == PackageState::Installed {
            info!("Package '{}' is already installed", name);
            self.discard_quietly(&staging);
            guard.release();
            report.push(&name, PackageOutcome::Skipped);
            return Ok(report);
        }

        if !manifest.dependencies.is_empty() {
            info!(
                "Package '{}' has dependencies: {}",
                name,
                manifest.dependencies.join(", ")
            );
            let chain = match resolve_chain(&self.registry, &manifest.dependencies).await {
                Ok(chain) => chain,
                Err(e) => {
                    self.discard_quietly(&staging);
                    guard.release();
                    return Err(e.context(format!("Failed to resolve dependencies of '{}'", name)));
                }
            };
            if !self.install_chain(&chain, &HashSet::new(), &mut report).await {
                self.discard_quietly(&staging);
                guard.release();
                report.not_attempted.push(name);
                return Ok(report);
            }
        }

        let outcome = match self.lock(&name).await {
            Err(error) => {
                self.discard_quietly(&staging);
                PackageOutcome::Failed {
                    phase: InstallPhase::Locking,
                    error,
                }
            }
            Ok(_lock) if !overwrite && self.state(&name) == PackageState::Installed => {
                self.discard_quietly(&staging);
                PackageOutcome::Skipped
            }
            Ok(_lock) => match self.commit_and_bind(&spec, &staging, &manifest) {
                Ok(()) => {
                    info!("Successfully installed '{}'", name);
                    PackageOutcome::Installed {
                        version: manifest.version.clone(),
                    }
                }
                Err((phase, error)) => self.roll_back(&name, &staging, phase, error),
            },
        };
        guard.release();
        report.push(&name, outcome);
        Ok(report)
    }

    /// Install resolved specs in order. Returns false after the first failure.
    async fn install_chain(
        &self,
        chain: &[PackageSpec],
        overwrite: &HashSet<&str>,
        report: &mut InstallReport,
    ) -> bool {
        for (i, spec) in chain.iter().enumerate() {
            let outcome = self
                .install_one(spec, overwrite.contains(spec.name.as_str()))
                .await;
            let failed = outcome.is_failure();
            report.push(&spec.name, outcome);
            if failed {
                report
                    .not_attempted
                    .extend(chain[i + 1..].iter().map(|s| s.name.clone()));
                return false;
            }
        }
        true
    }

    #[tracing::instrument(skip(self, spec), fields(name = %spec.name))]
    async fn install_one(&self, spec: &PackageSpec, overwrite: bool) -> PackageOutcome {
        let _lock = match self.lock(&spec.name).await {
            Ok(lock) => lock,
            Err(error) => {
                return PackageOutcome::Failed {
                    phase: InstallPhase::Locking,
                    error,
                };
            }
        };

        // Another process may have finished the same install while we waited
        if !overwrite && self.state(&spec.name) == PackageState::Installed {
            info!("Package '{}' is already installed", spec.name);
            return PackageOutcome::Skipped;
        }

        let staging = self.store.staging_dir(&spec.name);
        let guard = CleanupGuard::new(Arc::clone(&self.cleanup), staging.clone());
        let outcome = match self.run_install(spec, &staging).await {
            Ok(manifest) => {
                info!("Successfully installed '{}'", spec.name);
                PackageOutcome::Installed {
                    version: manifest.version.or_else(|| spec.version.clone()),
                }
            }
            Err((phase, error)) => self.roll_back(&spec.name, &staging, phase, error),
        };
        guard.release();
        outcome
    }

    async fn run_install(&self, spec: &PackageSpec, staging: &Path) -> PhaseResult<Manifest> {
        self.store
            .stage(&spec.name)
            .map_err(|e| (InstallPhase::Fetching, e))?;

        let bytes = self
            .fetcher
            .fetch(&spec.source_url)
            .await
            .with_context(|| format!("Failed to download '{}'", spec.name))
            .map_err(|e| (InstallPhase::Fetching, e))?;
        if let Some(expected) = &spec.sha256 {
            verify_checksum(&bytes, expected).map_err(|e| (InstallPhase::Fetching, e))?;
        }

        let format = ArchiveFormat::from_location(&spec.source_url);
        self.store
            .extract(&bytes, format, staging)
            .map_err(|e| (InstallPhase::Extracting, e))?;
        let manifest = self
            .staged_manifest(spec, staging)
            .map_err(|e| (InstallPhase::Extracting, e))?;

        self.commit_and_bind(spec, staging, &manifest)?;
        Ok(manifest)
    }

    fn stage_archive(
        &self,
        provisional: &str,
        bytes: &[u8],
        format: ArchiveFormat,
        staging: &Path,
    ) -> PhaseResult<Manifest> {
        self.store
            .stage(provisional)
            .map_err(|e| (InstallPhase::Extracting, e))?;
        self.store
            .extract(bytes, format, staging)
            .map_err(|e| (InstallPhase::Extracting, e))?;
        Manifest::load(self.runtime.as_ref(), staging).map_err(|e| (InstallPhase::Extracting, e))
    }

    fn commit_and_bind(
        &self,
        spec: &PackageSpec,
        staging: &Path,
        manifest: &Manifest,
    ) -> PhaseResult<()> {
        let final_path = self.store.package_dir(&spec.name);
        self.store
            .commit(staging, &final_path)
            .map_err(|e| (InstallPhase::Committing, e))?;
        self.binding
            .bind(spec, &final_path, manifest)
            .map_err(|e| (InstallPhase::Binding, e))?;
        Ok(())
    }

    /// The extracted package's manifest, or one synthesized from the
    /// registry entry when the archive ships none.
    fn staged_manifest(&self, spec: &PackageSpec, staging: &Path) -> Result<Manifest> {
        if !self.runtime.exists(&staging.join(MANIFEST_FILE)) {
            debug!("'{}' has no {}", spec.name, MANIFEST_FILE);
            return Ok(Manifest {
                package: spec.name.clone(),
                version: spec.version.clone(),
                dependencies: spec.depends_on.clone(),
                ..Default::default()
            });
        }
        let manifest = Manifest::load(self.runtime.as_ref(), staging)?;
        if manifest.package != spec.name {
            warn!(
                "{} of '{}' names the package '{}'",
                MANIFEST_FILE, spec.name, manifest.package
            );
        }
        Ok(manifest)
    }

    /// Undo a failed install of `name`. Before the commit that means
    /// deleting the staging tree; a failed bind also removes the committed
    /// tree and any binding, leaving the package absent.
    fn roll_back(
        &self,
        name: &str,
        staging: &Path,
        phase: InstallPhase,
        error: anyhow::Error,
    ) -> PackageOutcome {
        warn!("Installing '{}' failed while {}: {:#}", name, phase, error);
        let mut cleanup_errors = Vec::new();
        if let Err(e) = self.store.discard(staging) {
            cleanup_errors.push(e);
        }
        if phase == InstallPhase::Binding {
            if let Err(e) = self.binding.unbind(name) {
                cleanup_errors.push(e);
            }
            let final_path = self.store.package_dir(name);
            if self.runtime.exists(&final_path)
                && let Err(e) = self.store.remove(&final_path)
            {
                cleanup_errors.push(e);
            }
        }

        if cleanup_errors.is_empty() {
            debug!("Rolled back '{}'", name);
            PackageOutcome::RolledBack { phase, error }
        } else {
            let cleanup = cleanup_errors
                .iter()
                .map(|e| format!("{:#}", e))
                .collect::<Vec<_>>()
                .join("; ");
            PackageOutcome::Failed {
                phase,
                error: error.context(format!("cleanup after failure also failed: {}", cleanup)),
            }
        }
    }

    fn discard_quietly(&self, staging: &Path) {
        if let Err(e) = self.store.discard(staging) {
            warn!("Failed to remove {:?}: {:#}", staging, e);
        }
    }
}
