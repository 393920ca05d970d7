use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::MipError;
use crate::runtime::Runtime;

/// File name of the manifest at the top of every package tree
pub const MANIFEST_FILE: &str = "mip.json";

/// A package's own `mip.json`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Manifest {
    pub package: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Top-level functions and classes the package puts on the path
    #[serde(default)]
    pub exposed_symbols: Vec<String>,
    /// Sub-directories, relative to the package root, added besides the root itself
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Package names become directory names under the package root, so they
/// must be a single plain path component.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', ':'])
        && name.trim() == name
}

impl Manifest {
    pub fn parse(content: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(content)
            .map_err(|e| MipError::InvalidManifest(e.to_string()))?;
        if manifest.package.trim().is_empty() {
            return Err(MipError::InvalidManifest("missing 'package' field".into()).into());
        }
        if !is_valid_name(&manifest.package) {
            return Err(MipError::InvalidManifest(format!(
                "invalid package name '{}'",
                manifest.package
            ))
            .into());
        }
        Ok(manifest)
    }

    /// Read `mip.json` from the top of a package tree.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R, package_dir: &Path) -> Result<Self> {
        let path = package_dir.join(MANIFEST_FILE);
        if !runtime.exists(&path) {
            return Err(MipError::InvalidManifest(format!(
                "package is missing {} ({})",
                MANIFEST_FILE,
                package_dir.display()
            ))
            .into());
        }
        let content = runtime
            .read_to_string(&path)
            .map_err(|e| MipError::InvalidManifest(e.to_string()))?;
        Self::parse(&content)
    }

    /// Like [`Manifest::load`], but a missing or unreadable manifest is
    /// logged and treated as absent. Used for read-only scans of installed
    /// packages where one bad manifest must not hide the rest.
    pub fn load_lenient<R: Runtime + ?Sized>(runtime: &R, package_dir: &Path) -> Option<Self> {
        if !runtime.exists(&package_dir.join(MANIFEST_FILE)) {
            return None;
        }
        match Self::load(runtime, package_dir) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!("Could not read {} in {:?}: {}", MANIFEST_FILE, package_dir, e);
                None
            }
        }
    }
}
