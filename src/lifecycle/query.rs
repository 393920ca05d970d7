use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use super::Lifecycle;
use crate::fetch::Fetcher;
use crate::package::{InstalledPackage, Manifest, PackageState};
use crate::registry::Registry;
use crate::runtime::Runtime;

/// A symbol exported by more than one installed package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolCollision {
    pub symbol: String,
    pub packages: Vec<String>,
}

impl<R, F, G> Lifecycle<R, F, G>
where
    R: Runtime + 'static,
    F: Fetcher,
    G: Registry,
{
    /// Installed and partial packages, sorted by name. Read-only.
    #[tracing::instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<InstalledPackage>> {
        let mut names: BTreeSet<String> = BTreeSet::new();
        names.extend(self.store.installed_names()?);
        names.extend(self.store.staged_names()?);
        names.extend(self.binding.bound_names()?);

        Ok(names
            .into_iter()
            .filter_map(|name| {
                let state = self.state(&name);
                if state == PackageState::Absent {
                    return None;
                }
                let install_path = self.store.package_dir(&name);
                let version = Manifest::load_lenient(self.runtime.as_ref(), &install_path)
                    .and_then(|m| m.version);
                Some(InstalledPackage {
                    name,
                    install_path,
                    state,
                    version,
                })
            })
            .collect())
    }

    /// Symbols listed in `exposed_symbols` by more than one installed
    /// package, sorted by symbol.
    pub fn collisions(&self) -> Result<Vec<SymbolCollision>> {
        let mut owners: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for package in self.list()? {
            if package.state != PackageState::Installed {
                continue;
            }
            let Some(manifest) = Manifest::load_lenient(self.runtime.as_ref(), &package.install_path)
            else {
                continue;
            };
            let unique: BTreeSet<String> = manifest.exposed_symbols.into_iter().collect();
            for symbol in unique {
                owners.entry(symbol).or_default().push(package.name.clone());
            }
        }
        Ok(owners
            .into_iter()
            .filter(|(_, packages)| packages.len() > 1)
            .map(|(symbol, packages)| SymbolCollision { symbol, packages })
            .collect())
    }

    /// Directories `mip.import(name)` adds to the session path.
    pub fn activation_paths(&self, name: &str) -> Result<Vec<PathBuf>> {
        self.binding.activation_paths(name)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::error::{ErrorKind, kind_of};
    use crate::fetch::MockFetcher;
    use crate::registry::StaticRegistry;
    use std::fs;

    #[tokio::test]
    async fn test_list_reports_versions_and_incomplete_packages() {
        let fixture = Fixture::new();
        let graph = [("surfacefun", &["chebfun"][..]), ("chebfun", &[][..])];
        let lifecycle = fixture.lifecycle(archive_fetcher(&graph), registry(&graph));
        lifecycle.install(&names(&["surfacefun"]), false).await.unwrap();
        fs::create_dir_all(fixture.package_root().join(".staging/halfway")).unwrap();

        let packages = lifecycle.list().unwrap();

        let summary: Vec<_> = packages
            .iter()
            .map(|p| (p.name.as_str(), p.state, p.version.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("chebfun", PackageState::Installed, Some("1.0.0")),
                ("halfway", PackageState::Partial, None),
                ("surfacefun", PackageState::Installed, Some("1.0.0")),
            ]
        );
        // Listing never repairs anything
        assert!(fixture.package_root().join(".staging/halfway").exists());
    }

    #[test]
    fn test_list_empty_root() {
        let fixture = Fixture::new();
        let lifecycle = fixture.lifecycle(MockFetcher::new(), StaticRegistry::default());
        assert!(lifecycle.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_collisions_report_shared_symbols() {
        let fixture = Fixture::new();
        let graph = [("chebfun", &[][..]), ("surfacefun", &[][..])];
        let lifecycle = fixture.lifecycle(archive_fetcher(&graph), registry(&graph));
        lifecycle
            .install(&names(&["chebfun", "surfacefun"]), false)
            .await
            .unwrap();
        fs::write(
            fixture.package_root().join("surfacefun/mip.json"),
            r#"{"package":"surfacefun","exposed_symbols":["surfacefun","chebfun","chebfun"]}"#,
        )
        .unwrap();

        let collisions = lifecycle.collisions().unwrap();

        assert_eq!(
            collisions,
            vec![SymbolCollision {
                symbol: "chebfun".into(),
                packages: vec!["chebfun".into(), "surfacefun".into()],
            }]
        );
    }

    #[tokio::test]
    async fn test_activation_paths_for_unknown_package() {
        let fixture = Fixture::new();
        let lifecycle = fixture.lifecycle(MockFetcher::new(), StaticRegistry::default());
        let err = lifecycle.activation_paths("chebfun").unwrap_err();
        assert_eq!(kind_of(&err), ErrorKind::NotInstalled);
    }
}
