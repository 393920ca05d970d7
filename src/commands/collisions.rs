use anyhow::Result;

use super::config::Config;
use crate::lifecycle::SymbolCollision;
use crate::runtime::Runtime;

/// Report symbols exported by more than one installed package
#[tracing::instrument(skip(config))]
pub fn collisions<R: Runtime + 'static>(config: Config<R>) -> Result<()> {
    let collisions = config.lifecycle().collisions()?;
    for line in format_collisions(&collisions) {
        println!("{}", line);
    }
    Ok(())
}

pub(crate) fn format_collisions(collisions: &[SymbolCollision]) -> Vec<String> {
    if collisions.is_empty() {
        return vec!["No name collisions found".to_string()];
    }
    let mut lines = vec![format!("Name collisions found: {}", collisions.len())];
    lines.extend(collisions.iter().map(|c| {
        format!("  - {} (found in: {})", c.symbol, c.packages.join(", "))
    }));
    lines
}
