use anyhow::{Result, bail};

use super::config::Config;
use crate::fetch::Fetcher;
use crate::lifecycle::{Lifecycle, UninstallOutcome, describe_failure};
use crate::registry::Registry;
use crate::runtime::Runtime;

/// Uninstall packages and everything installed that depends on them.
#[tracing::instrument(skip(config))]
pub async fn uninstall<R: Runtime + 'static>(
    config: Config<R>,
    names: &[String],
    yes: bool,
) -> Result<()> {
    run_uninstall(&config.lifecycle(), names, yes).await
}

pub(crate) async fn run_uninstall<R, F, G>(
    lifecycle: &Lifecycle<R, F, G>,
    names: &[String],
    yes: bool,
) -> Result<()>
where
    R: Runtime + 'static,
    F: Fetcher,
    G: Registry,
{
    let report = lifecycle.uninstall(names, yes).await?;
    if report.cancelled {
        println!("Uninstallation cancelled.");
        return Ok(());
    }

    let mut failed = Vec::new();
    for (name, outcome) in &report.results {
        match outcome {
            UninstallOutcome::Removed => println!("Uninstalled '{}'", name),
            UninstallOutcome::NotInstalled => println!("Package '{}' is not installed", name),
            UninstallOutcome::Failed { error } => {
                eprintln!("Error: {}", describe_failure(name, None, error));
                failed.push(name.as_str());
            }
        }
    }

    if !failed.is_empty() {
        bail!("Failed to uninstall: {}", failed.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::test_support::{Fixture, archive_fetcher, names, registry};
    use crate::package::PackageState;

    #[tokio::test]
    async fn test_run_uninstall_removes_package_and_dependents() {
        let fixture = Fixture::new();
        let graph = [("chebfun", &[][..]), ("surfacefun", &["chebfun"][..])];
        let lifecycle = fixture.lifecycle(archive_fetcher(&graph), registry(&graph));
        lifecycle
            .install(&names(&["surfacefun"]), false)
            .await
            .unwrap();

        run_uninstall(&lifecycle, &names(&["chebfun"]), true)
            .await
            .unwrap();

        assert_eq!(lifecycle.state("chebfun"), PackageState::Absent);
        assert_eq!(lifecycle.state("surfacefun"), PackageState::Absent);
    }

    #[tokio::test]
    async fn test_run_uninstall_absent_succeeds() {
        let fixture = Fixture::new();
        let lifecycle = fixture.lifecycle(archive_fetcher(&[]), registry(&[]));

        run_uninstall(&lifecycle, &names(&["ghost"]), true)
            .await
            .unwrap();
    }
}
