use anyhow::{Context, Result};
use glob::Pattern;
use log::debug;

use super::config::Config;
use crate::fetch::Fetcher;
use crate::lifecycle::Lifecycle;
use crate::package::{InstalledPackage, PackageState};
use crate::registry::Registry;
use crate::runtime::Runtime;

/// List installed packages, optionally filtered by a glob on the name
#[tracing::instrument(skip(config))]
pub fn list<R: Runtime + 'static>(config: Config<R>, pattern: Option<&str>) -> Result<()> {
    run_list(&config.lifecycle(), pattern)
}

pub(crate) fn run_list<R, F, G>(lifecycle: &Lifecycle<R, F, G>, pattern: Option<&str>) -> Result<()>
where
    R: Runtime + 'static,
    F: Fetcher,
    G: Registry,
{
    let pattern = pattern
        .map(|p| Pattern::new(p).with_context(|| format!("Invalid pattern '{}'", p)))
        .transpose()?;

    let packages: Vec<InstalledPackage> = lifecycle
        .list()?
        .into_iter()
        .filter(|p| pattern.as_ref().is_none_or(|pat| pat.matches(&p.name)))
        .collect();
    debug!("Found {} package(s)", packages.len());

    for line in format_list(&packages) {
        println!("{}", line);
    }
    Ok(())
}

pub(crate) fn format_list(packages: &[InstalledPackage]) -> Vec<String> {
    if packages.is_empty() {
        return vec!["No packages installed.".to_string()];
    }

    let mut lines = Vec::new();
    let (installed, incomplete): (Vec<_>, Vec<_>) = packages
        .iter()
        .partition(|p| p.state == PackageState::Installed);

    if !installed.is_empty() {
        lines.push("Installed packages:".to_string());
        for package in installed {
            let version = package.version.as_deref().unwrap_or("(unknown)");
            lines.push(format!("  - {} {}", package.name, version));
        }
    }
    if !incomplete.is_empty() {
        lines.push("Incomplete packages (cleaned up by the next install or uninstall):".to_string());
        for package in incomplete {
            lines.push(format!("  - {}", package.name));
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::test_support::{Fixture, archive_fetcher, names, registry};
    use std::path::PathBuf;

    fn package(name: &str, state: PackageState, version: Option<&str>) -> InstalledPackage {
        InstalledPackage {
            name: name.into(),
            install_path: PathBuf::from("/home/user/.mip/packages").join(name),
            state,
            version: version.map(str::to_string),
        }
    }

    #[test]
    fn test_format_list_empty() {
        assert_eq!(format_list(&[]), vec!["No packages installed."]);
    }

    #[test]
    fn test_format_list_sections() {
        let lines = format_list(&[
            package("chebfun", PackageState::Installed, Some("5.7.0")),
            package("halfway", PackageState::Partial, None),
            package("kdtree", PackageState::Installed, None),
        ]);

        assert_eq!(
            lines,
            vec![
                "Installed packages:",
                "  - chebfun 5.7.0",
                "  - kdtree (unknown)",
                "Incomplete packages (cleaned up by the next install or uninstall):",
                "  - halfway",
            ]
        );
    }

    #[tokio::test]
    async fn test_run_list_with_pattern() {
        let fixture = Fixture::new();
        let graph = [("chebfun", &[][..])];
        let lifecycle = fixture.lifecycle(archive_fetcher(&graph), registry(&graph));
        lifecycle.install(&names(&["chebfun"]), false).await.unwrap();

        assert!(run_list(&lifecycle, Some("cheb*")).is_ok());
        assert!(run_list(&lifecycle, None).is_ok());
    }

    #[test]
    fn test_run_list_invalid_pattern() {
        let fixture = Fixture::new();
        let lifecycle = fixture.lifecycle(archive_fetcher(&[]), registry(&[]));

        let err = run_list(&lifecycle, Some("[")).unwrap_err();
        assert!(err.to_string().contains("Invalid pattern"));
    }
}
