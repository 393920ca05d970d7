use anyhow::Result;
use std::path::Path;

use super::config::Config;
use crate::runtime::Runtime;

/// Write the MATLAB entry points and print how to put them on the path.
#[tracing::instrument(skip(config))]
pub fn setup<R: Runtime + 'static>(config: Config<R>) -> Result<()> {
    let lifecycle = config.lifecycle();
    let dir = lifecycle.setup()?;
    for line in instructions(dir) {
        println!("{}", line);
    }
    Ok(())
}

pub(crate) fn instructions(dir: &Path) -> Vec<String> {
    let dir = dir.to_string_lossy().replace('\'', "''");
    vec![
        format!("MATLAB integration is set up in '{}'.", dir),
        String::new(),
        "Make sure this directory is on your MATLAB path by running in MATLAB:".to_string(),
        format!("  addpath('{}')", dir),
        "  savepath".to_string(),
    ]
}
