//! Shared fixtures for lifecycle tests: a temporary mip root, a registry
//! built from a dependency table and a fetcher serving matching archives.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use super::{Lifecycle, LifecycleOptions};
use crate::archive::test_archives::package_zip;
use crate::fetch::{Fetcher, MockFetcher};
use crate::lock::LockPolicy;
use crate::registry::{PackageSpec, StaticRegistry};
use crate::runtime::RealRuntime;

pub type TestLifecycle<F> = Lifecycle<RealRuntime, F, StaticRegistry>;

pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn package_root(&self) -> PathBuf {
        self.dir.path().join("packages")
    }

    pub fn namespace_root(&self) -> PathBuf {
        self.dir.path().join("matlab")
    }

    pub fn lock_root(&self) -> PathBuf {
        self.dir.path().join("locks")
    }

    pub fn lifecycle<F: Fetcher>(&self, fetcher: F, registry: StaticRegistry) -> TestLifecycle<F> {
        self.lifecycle_with(fetcher, registry, options())
    }

    pub fn lifecycle_with<F: Fetcher>(
        &self,
        fetcher: F,
        registry: StaticRegistry,
        options: LifecycleOptions,
    ) -> TestLifecycle<F> {
        Lifecycle::new(
            Arc::new(RealRuntime),
            fetcher,
            registry,
            self.package_root(),
            self.namespace_root(),
            self.lock_root(),
            options,
        )
    }
}

pub fn options() -> LifecycleOptions {
    LifecycleOptions {
        lock_policy: LockPolicy::Wait(Duration::from_secs(10)),
        auto_recover: true,
    }
}

pub fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

pub fn url_for(name: &str) -> String {
    format!("https://pkgs.test/{}-1.0.0.mhl", name)
}

/// Registry from `(name, dependencies)` pairs.
pub fn registry(graph: &[(&str, &[&str])]) -> StaticRegistry {
    StaticRegistry::new(graph.iter().map(|(name, deps)| {
        PackageSpec::new(*name, url_for(name))
            .with_dependencies(deps.iter().copied())
            .with_version("1.0.0")
    }))
}

/// Fetcher serving a package archive for every entry of `graph`.
pub fn archive_fetcher(graph: &[(&str, &[&str])]) -> MockFetcher {
    let archives: HashMap<String, Vec<u8>> = graph
        .iter()
        .map(|(name, deps)| (url_for(name), package_zip(name, deps)))
        .collect();
    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().returning(move |url| {
        archives
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unexpected fetch of {}", url))
    });
    fetcher
}

/// Every entry below `root`, sorted by path: files with their contents,
/// directories (empty ones included) with `None`.
pub fn snapshot(root: &Path) -> Vec<(PathBuf, Option<Vec<u8>>)> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<(PathBuf, Option<Vec<u8>>)>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let rel = path.strip_prefix(root).unwrap().to_path_buf();
            if path.is_dir() {
                out.push((rel, None));
                walk(root, &path, out);
            } else {
                out.push((rel, Some(fs::read(&path).unwrap())));
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}
