use anyhow::{Context, Result};

use super::config::Config;
use crate::fetch::Fetcher;
use crate::lifecycle::Lifecycle;
use crate::registry::Registry;
use crate::runtime::Runtime;

/// Print the directories `mip.import(name)` adds to a MATLAB session,
/// dependencies first, one per line.
#[tracing::instrument(skip(config))]
pub fn import<R: Runtime + 'static>(config: Config<R>, name: &str) -> Result<()> {
    for path in activation_lines(&config.lifecycle(), name)? {
        println!("{}", path);
    }
    Ok(())
}

pub(crate) fn activation_lines<R, F, G>(
    lifecycle: &Lifecycle<R, F, G>,
    name: &str,
) -> Result<Vec<String>>
where
    R: Runtime + 'static,
    F: Fetcher,
    G: Registry,
{
    let paths = lifecycle
        .activation_paths(name)
        .with_context(|| format!("Cannot import '{}'", name))?;
    Ok(paths
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, kind_of};
    use crate::lifecycle::test_support::{Fixture, archive_fetcher, names, registry};

    #[tokio::test]
    async fn test_activation_lines_dependencies_first() {
        let fixture = Fixture::new();
        let graph = [("chebfun", &[][..]), ("surfacefun", &["chebfun"][..])];
        let lifecycle = fixture.lifecycle(archive_fetcher(&graph), registry(&graph));
        lifecycle
            .install(&names(&["surfacefun"]), false)
            .await
            .unwrap();

        let lines = activation_lines(&lifecycle, "surfacefun").unwrap();

        let root = fixture.package_root();
        assert_eq!(
            lines,
            vec![
                root.join("chebfun").to_string_lossy().to_string(),
                root.join("surfacefun").to_string_lossy().to_string(),
            ]
        );
    }

    #[test]
    fn test_activation_lines_not_installed() {
        let fixture = Fixture::new();
        let lifecycle = fixture.lifecycle(archive_fetcher(&[]), registry(&[]));

        let err = activation_lines(&lifecycle, "chebfun").unwrap_err();
        assert_eq!(kind_of(&err), ErrorKind::NotInstalled);
        assert!(err.to_string().contains("Cannot import 'chebfun'"));
    }
}
