use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

pub const ROOT_ENV: &str = "MIP_ROOT";

/// Resolve the mip root: explicit flag, then `MIP_ROOT`, then `~/.mip`.
#[tracing::instrument(skip(runtime))]
pub fn resolve_root<R: Runtime + ?Sized>(runtime: &R, root: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(root) = root {
        return Ok(root);
    }
    match runtime.env_var(ROOT_ENV) {
        Ok(value) if !value.trim().is_empty() => Ok(PathBuf::from(value)),
        _ => default_root(runtime),
    }
}

/// Get the default mip root directory
#[tracing::instrument(skip(runtime))]
pub fn default_root<R: Runtime + ?Sized>(runtime: &R) -> Result<PathBuf> {
    let home_dir = runtime
        .home_dir()
        .context("Could not find home directory")?;
    Ok(home_dir.join(".mip"))
}

/// Where installed package trees live.
pub fn package_root(root: &Path) -> PathBuf {
    root.join("packages")
}

/// The directory users add to the MATLAB path.
pub fn namespace_root(root: &Path) -> PathBuf {
    root.join("matlab")
}

/// Per-package lock files, kept apart from the package trees.
pub fn lock_root(root: &Path) -> PathBuf {
    root.join("locks")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;
    use std::env::VarError;

    #[test]
    fn test_resolve_root_prefers_flag() {
        let runtime = MockRuntime::new();
        let root = resolve_root(&runtime, Some(PathBuf::from("/opt/mip"))).unwrap();
        assert_eq!(root, PathBuf::from("/opt/mip"));
    }

    #[test]
    fn test_resolve_root_uses_env() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_env_var()
            .with(eq(ROOT_ENV))
            .returning(|_| Ok("/srv/mip".into()));

        let root = resolve_root(&runtime, None).unwrap();
        assert_eq!(root, PathBuf::from("/srv/mip"));
    }

    #[test]
    fn test_resolve_root_falls_back_to_home() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_env_var()
            .with(eq(ROOT_ENV))
            .returning(|_| Err(VarError::NotPresent));
        runtime
            .expect_home_dir()
            .returning(|| Some(PathBuf::from("/home/user")));

        let root = resolve_root(&runtime, None).unwrap();
        assert_eq!(root, PathBuf::from("/home/user/.mip"));
    }

    #[test]
    fn test_default_root_without_home_fails() {
        let mut runtime = MockRuntime::new();
        runtime.expect_home_dir().returning(|| None);

        let err = default_root(&runtime).unwrap_err();
        assert!(err.to_string().contains("home directory"));
    }

    #[test]
    fn test_layout() {
        let root = Path::new("/home/user/.mip");
        assert_eq!(package_root(root), root.join("packages"));
        assert_eq!(namespace_root(root), root.join("matlab"));
        assert_eq!(lock_root(root), root.join("locks"));
    }
}
