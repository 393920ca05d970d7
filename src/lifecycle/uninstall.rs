use anyhow::Result;
use log::{info, warn};
use std::collections::{BTreeMap, HashSet, VecDeque};

use super::{Lifecycle, UninstallOutcome, UninstallReport};
use crate::error::is_not_installed;
use crate::fetch::Fetcher;
use crate::package::{Manifest, PackageState, is_valid_name};
use crate::registry::Registry;
use crate::runtime::Runtime;

impl<R, F, G> Lifecycle<R, F, G>
where
    R: Runtime + 'static,
    F: Fetcher,
    G: Registry,
{
    /// Uninstall `names` together with every installed package that depends
    /// on them, dependents first.
    ///
    /// Names that are not installed succeed without doing anything. Unless
    /// `assume_yes` is set the plan is confirmed through the runtime first.
    #[tracing::instrument(skip(self))]
    pub async fn uninstall(&self, names: &[String], assume_yes: bool) -> Result<UninstallReport> {
        self.refresh_host_integration();
        self.recover_best_effort().await;

        let mut report = UninstallReport::default();
        let mut targets = Vec::new();
        for name in names {
            if !is_valid_name(name) || self.state(name) == PackageState::Absent {
                info!("Package '{}' is not installed", name);
                report.push(name, UninstallOutcome::NotInstalled);
            } else if !targets.contains(name) {
                targets.push(name.clone());
            }
        }
        if targets.is_empty() {
            return Ok(report);
        }

        let dependencies = self.installed_dependencies()?;
        let plan = uninstall_order(&targets, &dependencies);

        if !assume_yes {
            let prompt = confirmation_prompt(&plan, &targets);
            if !self.runtime.confirm(&prompt)? {
                info!("Uninstallation cancelled");
                report.cancelled = true;
                return Ok(report);
            }
        }

        for name in &plan {
            let outcome = self.uninstall_one(name).await;
            if let UninstallOutcome::Failed { error } = &outcome {
                warn!("Failed to uninstall '{}': {:#}", name, error);
            }
            report.push(name, outcome);
        }
        Ok(report)
    }

    #[tracing::instrument(skip(self))]
    async fn uninstall_one(&self, name: &str) -> UninstallOutcome {
        let _lock = match self.lock(name).await {
            Ok(lock) => lock,
            Err(error) => return UninstallOutcome::Failed { error },
        };
        if self.state(name) == PackageState::Absent {
            return UninstallOutcome::NotInstalled;
        }

        let removed = self.store.remove(&self.store.package_dir(name));
        if let Err(e) = self.store.discard(&self.store.staging_dir(name)) {
            warn!("Failed to remove staging tree of '{}': {:#}", name, e);
        }

        match removed {
            Err(error) if !is_not_installed(&error) => {
                // Without its binding the leftover tree reads as incomplete
                // and the next sweep finishes the job
                if let Err(e) = self.binding.unbind(name) {
                    warn!("Failed to unbind '{}': {:#}", name, e);
                }
                UninstallOutcome::Failed { error }
            }
            _ => match self.binding.unbind(name) {
                Ok(()) => {
                    info!("Successfully uninstalled '{}'", name);
                    UninstallOutcome::Removed
                }
                Err(error) => UninstallOutcome::Failed { error },
            },
        }
    }

    /// Declared dependencies of every installed package, read from their
    /// manifests. Unreadable manifests count as no dependencies.
    fn installed_dependencies(&self) -> Result<BTreeMap<String, Vec<String>>> {
        Ok(self
            .store
            .installed_names()?
            .into_iter()
            .map(|name| {
                let deps = Manifest::load_lenient(
                    self.runtime.as_ref(),
                    &self.store.package_dir(&name),
                )
                .map(|m| m.dependencies)
                .unwrap_or_default();
                (name, deps)
            })
            .collect())
    }
}

/// `targets` plus their transitive dependents, ordered so that every
/// package comes before the packages it depends on.
fn uninstall_order(targets: &[String], dependencies: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let mut plan: Vec<String> = targets.to_vec();
    let mut queue: VecDeque<String> = targets.iter().cloned().collect();
    while let Some(name) = queue.pop_front() {
        for (other, deps) in dependencies {
            if deps.contains(&name) && !plan.contains(other) {
                plan.push(other.clone());
                queue.push_back(other.clone());
            }
        }
    }

    fn visit(
        name: &str,
        plan: &[String],
        dependencies: &BTreeMap<String, Vec<String>>,
        visited: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) {
        if !visited.insert(name.to_string()) {
            return;
        }
        for other in plan {
            let depends = dependencies
                .get(other)
                .is_some_and(|deps| deps.iter().any(|d| d == name));
            if other != name && depends {
                visit(other, plan, dependencies, visited, order);
            }
        }
        order.push(name.to_string());
    }

    let mut visited = HashSet::new();
    let mut order = Vec::new();
    for name in &plan {
        visit(name, &plan, dependencies, &mut visited, &mut order);
    }
    order
}

fn confirmation_prompt(plan: &[String], requested: &[String]) -> String {
    if let [only] = plan {
        return format!("Are you sure you want to uninstall '{}'?", only);
    }
    let mut prompt = String::from("The following packages will be uninstalled:\n");
    for name in plan {
        if requested.contains(name) {
            prompt.push_str(&format!("  - {}\n", name));
        } else {
            prompt.push_str(&format!("  - {} (depends on a package being removed)\n", name));
        }
    }
    prompt.push_str(&format!(
        "Are you sure you want to uninstall these {} packages?",
        plan.len()
    ));
    prompt
}
