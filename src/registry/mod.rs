//! Package name resolution.
//!
//! A [`Registry`] maps a package name to a [`PackageSpec`]. Two
//! implementations exist: [`StaticRegistry`], an in-memory table, and
//! [`IndexRegistry`], which reads the published `index.json` once and then
//! answers lookups from memory.

mod index;
mod static_table;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::HashSet;

use crate::error::MipError;
use crate::package::is_valid_name;

pub use index::{DEFAULT_INDEX_URL, IndexRegistry};
pub use static_table::StaticRegistry;

/// Everything needed to fetch and install one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub source_url: String,
    /// Direct dependencies, in declaration order
    pub depends_on: Vec<String>,
    pub version: Option<String>,
    /// Expected SHA-256 of the archive, lowercase hex
    pub sha256: Option<String>,
}

impl PackageSpec {
    pub fn new(name: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_url: source_url.into(),
            depends_on: Vec::new(),
            version: None,
            sha256: None,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Registry: Send + Sync {
    /// Look up one package. Fails with `MipError::NotFound` for unknown names.
    async fn resolve(&self, name: &str) -> Result<PackageSpec>;
}

struct Frame {
    spec: PackageSpec,
    next_dep: usize,
}

/// Resolve `names` and all of their transitive dependencies.
///
/// The result lists dependencies before their dependents, siblings in
/// declaration order, and every package exactly once. A dependency that
/// leads back to a package on the current resolution path fails with
/// `MipError::Cycle`.
#[tracing::instrument(skip(registry))]
pub async fn resolve_chain<G: Registry + ?Sized>(
    registry: &G,
    names: &[String],
) -> Result<Vec<PackageSpec>> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut order = Vec::new();

    for name in names {
        if visited.contains(name) {
            continue;
        }
        let spec = resolve_checked(registry, name).await?;
        visited.insert(name.clone());
        let mut stack = vec![Frame { spec, next_dep: 0 }];

        while let Some(frame) = stack.last_mut() {
            let Some(dep) = frame.spec.depends_on.get(frame.next_dep).cloned() else {
                if let Some(done) = stack.pop() {
                    debug!("Resolved {}", done.spec.name);
                    order.push(done.spec);
                }
                continue;
            };
            frame.next_dep += 1;

            if stack.iter().any(|f| f.spec.name == dep) {
                let mut cycle: Vec<String> = stack.iter().map(|f| f.spec.name.clone()).collect();
                cycle.push(dep);
                return Err(MipError::Cycle(cycle).into());
            }
            if visited.contains(&dep) {
                continue;
            }
            let spec = resolve_checked(registry, &dep).await?;
            visited.insert(dep);
            stack.push(Frame { spec, next_dep: 0 });
        }
    }

    Ok(order)
}

/// Names become directories under the package root, so anything that is
/// not a plain name is treated as unknown without asking the registry.
async fn resolve_checked<G: Registry + ?Sized>(registry: &G, name: &str) -> Result<PackageSpec> {
    if !is_valid_name(name) {
        warn!("Refusing invalid package name {:?}", name);
        return Err(MipError::NotFound(name.to_string()).into());
    }
    registry.resolve(name).await
}
