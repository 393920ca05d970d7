//! Namespace binding: per-package stubs under `<namespace_root>/+mip/+bindings`
//! that make an installed package importable for one MATLAB session.

mod matlab;

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::safe_entry_path;
use crate::error::MipError;
use crate::package::Manifest;
use crate::registry::PackageSpec;
use crate::runtime::{Runtime, write_atomic};

pub use matlab::{BindingRecord, binding_ident};

const PACKAGE_DIR: &str = "+mip";
const BINDINGS_DIR: &str = "+bindings";

pub struct NamespaceBinding<R: Runtime + ?Sized> {
    runtime: Arc<R>,
    root: PathBuf,
}

impl<R: Runtime + ?Sized> NamespaceBinding<R> {
    pub fn new(runtime: Arc<R>, root: PathBuf) -> Self {
        Self { runtime, root }
    }

    /// Directory the user adds to the MATLAB path once.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bindings_dir(&self) -> PathBuf {
        self.root.join(PACKAGE_DIR).join(BINDINGS_DIR)
    }

    pub fn binding_path(&self, name: &str) -> PathBuf {
        self.bindings_dir()
            .join(format!("{}.m", binding_ident(name)))
    }

    /// Write (or rewrite) the binding stub for an installed package.
    #[tracing::instrument(skip(self, spec, manifest), fields(name = %spec.name))]
    pub fn bind(&self, spec: &PackageSpec, install_path: &Path, manifest: &Manifest) -> Result<()> {
        let path = self.binding_path(&spec.name);
        if let Some(existing) = self.read_record(&path)?
            && existing.name != spec.name
        {
            bail!(
                "Binding {:?} already belongs to package '{}'; '{}' maps to the same MATLAB name",
                path,
                existing.name,
                spec.name
            );
        }

        let mut depends_on = spec.depends_on.clone();
        for dep in &manifest.dependencies {
            if !depends_on.contains(dep) {
                depends_on.push(dep.clone());
            }
        }

        let mut paths = vec![install_path.to_path_buf()];
        for sub in &manifest.paths {
            match safe_entry_path(install_path, Path::new(sub)) {
                Some(dir) if self.runtime.is_dir(&dir) => {
                    if !paths.contains(&dir) {
                        paths.push(dir);
                    }
                }
                Some(dir) => warn!("Declared path {:?} of '{}' does not exist", dir, spec.name),
                None => warn!("Ignoring declared path {:?} of '{}'", sub, spec.name),
            }
        }

        let bindings = self.bindings_dir();
        self.runtime
            .create_dir_all(&bindings)
            .map_err(|e| MipError::disk_write(&bindings, e))?;
        let stub = matlab::binding_stub(&spec.name, &depends_on, &paths);
        write_atomic(self.runtime.as_ref(), &path, stub.as_bytes())
            .map_err(|e| MipError::disk_write(&path, e))?;
        debug!("Bound '{}' at {:?}", spec.name, path);
        Ok(())
    }

    /// Remove a package's binding stub. Absent stubs are fine, and so is a
    /// stub at the same path that belongs to a different package.
    #[tracing::instrument(skip(self))]
    pub fn unbind(&self, name: &str) -> Result<()> {
        let path = self.binding_path(name);
        match self.read_record(&path)? {
            Some(record) if record.name == name => {
                self.runtime
                    .remove_file(&path)
                    .map_err(|e| MipError::disk_write(&path, e))?;
                debug!("Unbound '{}'", name);
            }
            Some(record) => debug!("{:?} belongs to '{}', leaving it", path, record.name),
            None => {}
        }
        Ok(())
    }

    /// Whether `name` itself owns a binding stub.
    pub fn is_bound(&self, name: &str) -> bool {
        self.record(name).ok().flatten().is_some()
    }

    /// The binding record of `name`, if the stub at its path is its own.
    fn record(&self, name: &str) -> Result<Option<BindingRecord>> {
        Ok(self
            .read_record(&self.binding_path(name))?
            .filter(|record| record.name == name))
    }

    /// Names of all bound packages, sorted.
    pub fn bound_names(&self) -> Result<Vec<String>> {
        let dir = self.bindings_dir();
        if !self.runtime.is_dir(&dir) {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for path in self.runtime.read_dir(&dir)? {
            if path.extension().is_some_and(|ext| ext == "m")
                && let Some(record) = self.read_record(&path)?
            {
                names.push(record.name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Directories `mip.import(name)` would add to the path, dependencies
    /// first, each directory once.
    #[tracing::instrument(skip(self))]
    pub fn activation_paths(&self, name: &str) -> Result<Vec<PathBuf>> {
        let mut seen_packages = HashSet::new();
        let mut paths = Vec::new();
        self.collect_paths(name, &mut seen_packages, &mut paths)?;
        Ok(paths)
    }

    fn collect_paths(
        &self,
        name: &str,
        seen_packages: &mut HashSet<String>,
        paths: &mut Vec<PathBuf>,
    ) -> Result<()> {
        if !seen_packages.insert(name.to_string()) {
            return Ok(());
        }
        let record = self
            .record(name)?
            .ok_or_else(|| MipError::NotInstalled(name.to_string()))?;
        for dep in &record.depends_on {
            self.collect_paths(dep, seen_packages, paths)
                .with_context(|| format!("Failed to import dependency of '{}'", name))?;
        }
        for path in record.paths {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        Ok(())
    }

    fn read_record(&self, path: &Path) -> Result<Option<BindingRecord>> {
        if !self.runtime.exists(path) {
            return Ok(None);
        }
        let content = self
            .runtime
            .read_to_string(path)
            .with_context(|| format!("Failed to read binding {:?}", path))?;
        Ok(BindingRecord::parse(&content))
    }

    /// Write `mip.m` and `+mip/import.m` into the namespace root and create
    /// the bindings directory.
    #[tracing::instrument(skip(self))]
    pub fn ensure_host_integration(&self) -> Result<()> {
        let package_dir = self.root.join(PACKAGE_DIR);
        let bindings = self.bindings_dir();
        self.runtime
            .create_dir_all(&bindings)
            .map_err(|e| MipError::disk_write(&bindings, e))?;

        for (path, contents) in [
            (self.root.join("mip.m"), matlab::MIP_M),
            (package_dir.join("import.m"), matlab::IMPORT_M),
        ] {
            let current = if self.runtime.exists(&path) {
                self.runtime.read_to_string(&path).ok()
            } else {
                None
            };
            if current.as_deref() == Some(contents) {
                continue;
            }
            debug!("Writing {:?}", path);
            write_atomic(self.runtime.as_ref(), &path, contents.as_bytes())
                .map_err(|e| MipError::disk_write(&path, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, kind_of};
    use crate::runtime::{MockRuntime, RealRuntime};
    use std::fs;
    use tempfile::tempdir;

    fn binding(root: &Path) -> NamespaceBinding<RealRuntime> {
        NamespaceBinding::new(Arc::new(RealRuntime), root.to_path_buf())
    }

    fn manifest(name: &str, deps: &[&str], paths: &[&str]) -> Manifest {
        Manifest {
            package: name.to_string(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            paths: paths.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_bind_unbind_round_trip() {
        let dir = tempdir().unwrap();
        let ns = binding(&dir.path().join("matlab"));
        let install = dir.path().join("packages/chebfun");
        fs::create_dir_all(&install).unwrap();

        let spec = PackageSpec::new("chebfun", "u");
        ns.bind(&spec, &install, &manifest("chebfun", &[], &[])).unwrap();
        assert!(ns.is_bound("chebfun"));
        assert_eq!(ns.bound_names().unwrap(), vec!["chebfun"]);

        // Re-binding is harmless
        ns.bind(&spec, &install, &manifest("chebfun", &[], &[])).unwrap();
        assert_eq!(ns.bound_names().unwrap(), vec!["chebfun"]);

        ns.unbind("chebfun").unwrap();
        ns.unbind("chebfun").unwrap();
        assert!(!ns.is_bound("chebfun"));
        assert!(ns.bound_names().unwrap().is_empty());
    }

    #[test]
    fn test_bind_includes_existing_declared_paths_only() {
        let dir = tempdir().unwrap();
        let ns = binding(&dir.path().join("matlab"));
        let install = dir.path().join("packages/surfacefun");
        fs::create_dir_all(install.join("src")).unwrap();

        let spec = PackageSpec::new("surfacefun", "u");
        ns.bind(
            &spec,
            &install,
            &manifest("surfacefun", &[], &["src", "missing", "../escape"]),
        )
        .unwrap();

        assert_eq!(
            ns.activation_paths("surfacefun").unwrap(),
            vec![install.clone(), install.join("src")]
        );
    }

    #[test]
    fn test_activation_paths_dependencies_first_without_duplicates() {
        let dir = tempdir().unwrap();
        let ns = binding(&dir.path().join("matlab"));
        let pkgs = dir.path().join("packages");
        for name in ["base", "left", "right", "top"] {
            fs::create_dir_all(pkgs.join(name)).unwrap();
        }

        let bind = |name: &str, deps: &[&str]| {
            let spec = PackageSpec::new(name, "u").with_dependencies(deps.iter().copied());
            ns.bind(&spec, &pkgs.join(name), &manifest(name, &[], &[]))
                .unwrap();
        };
        bind("base", &[]);
        bind("left", &["base"]);
        bind("right", &["base"]);
        bind("top", &["left", "right"]);

        assert_eq!(
            ns.activation_paths("top").unwrap(),
            vec![
                pkgs.join("base"),
                pkgs.join("left"),
                pkgs.join("right"),
                pkgs.join("top")
            ]
        );
    }

    #[test]
    fn test_activation_paths_unbound_is_not_installed() {
        let dir = tempdir().unwrap();
        let ns = binding(dir.path());
        let err = ns.activation_paths("chebfun").unwrap_err();
        assert_eq!(kind_of(&err), ErrorKind::NotInstalled);
    }

    #[test]
    fn test_activation_paths_missing_dependency_fails() {
        let dir = tempdir().unwrap();
        let ns = binding(&dir.path().join("matlab"));
        let install = dir.path().join("surfacefun");
        fs::create_dir_all(&install).unwrap();
        let spec = PackageSpec::new("surfacefun", "u").with_dependencies(["chebfun"]);
        ns.bind(&spec, &install, &manifest("surfacefun", &[], &[]))
            .unwrap();

        let err = ns.activation_paths("surfacefun").unwrap_err();
        assert_eq!(kind_of(&err), ErrorKind::NotInstalled);
    }

    #[test]
    fn test_manifest_dependencies_are_merged() {
        let dir = tempdir().unwrap();
        let ns = binding(&dir.path().join("matlab"));
        let install = dir.path().join("surfacefun");
        fs::create_dir_all(&install).unwrap();

        let spec = PackageSpec::new("surfacefun", "u").with_dependencies(["chebfun"]);
        ns.bind(&spec, &install, &manifest("surfacefun", &["chebfun", "extra"], &[]))
            .unwrap();

        let stub = fs::read_to_string(ns.binding_path("surfacefun")).unwrap();
        let record = BindingRecord::parse(&stub).unwrap();
        assert_eq!(record.depends_on, vec!["chebfun", "extra"]);
    }

    #[test]
    fn test_ident_collision_is_rejected() {
        let dir = tempdir().unwrap();
        let ns = binding(dir.path());
        let install = dir.path().join("a-b");
        fs::create_dir_all(&install).unwrap();

        ns.bind(&PackageSpec::new("a-b", "u"), &install, &manifest("a-b", &[], &[]))
            .unwrap();
        let result = ns.bind(&PackageSpec::new("a_b", "u"), &install, &manifest("a_b", &[], &[]));
        assert!(result.is_err());
    }

    #[test]
    fn test_stub_of_other_package_with_same_ident_is_left_alone() {
        let dir = tempdir().unwrap();
        let ns = binding(dir.path());
        let install = dir.path().join("a-b");
        fs::create_dir_all(&install).unwrap();
        ns.bind(&PackageSpec::new("a-b", "u"), &install, &manifest("a-b", &[], &[]))
            .unwrap();

        assert!(!ns.is_bound("a_b"));
        ns.unbind("a_b").unwrap();
        assert_eq!(
            kind_of(&ns.activation_paths("a_b").unwrap_err()),
            ErrorKind::NotInstalled
        );

        assert!(ns.is_bound("a-b"));
        assert_eq!(ns.activation_paths("a-b").unwrap(), vec![install]);
    }

    #[test]
    fn test_ensure_host_integration_writes_entry_points() {
        let dir = tempdir().unwrap();
        let ns = binding(&dir.path().join("matlab"));

        ns.ensure_host_integration().unwrap();
        ns.ensure_host_integration().unwrap();

        let import = fs::read_to_string(dir.path().join("matlab/+mip/import.m")).unwrap();
        assert!(import.contains("persistent activated"));
        assert!(dir.path().join("matlab/mip.m").exists());
    }

    #[test]
    fn test_bind_write_failure_is_disk_write() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().return_const(false);
        runtime.expect_is_dir().return_const(false);
        runtime.expect_create_dir_all().returning(|_| Ok(()));
        runtime
            .expect_write()
            .returning(|_, _| Err(anyhow::anyhow!("read-only file system")));
        let ns = NamespaceBinding::new(Arc::new(runtime), PathBuf::from("/ns"));

        let err = ns
            .bind(
                &PackageSpec::new("chebfun", "u"),
                Path::new("/pkgs/chebfun"),
                &manifest("chebfun", &[], &[]),
            )
            .unwrap_err();
        assert_eq!(kind_of(&err), ErrorKind::DiskWrite);
    }
}
