use anyhow::{Result, bail};
use log::debug;
use std::sync::Arc;

use super::config::Config;
use crate::cleanup::spawn_interrupt_handler;
use crate::fetch::{ArchiveSource, Fetcher};
use crate::lifecycle::{InstallReport, Lifecycle, PackageOutcome, describe_failure};
use crate::registry::Registry;
use crate::runtime::Runtime;

/// Install packages by registry name, local `.mhl` file or archive URL.
#[tracing::instrument(skip(config))]
pub async fn install<R: Runtime + 'static>(
    config: Config<R>,
    targets: &[String],
    overwrite: bool,
) -> Result<()> {
    let lifecycle = config.lifecycle();
    let interrupt =
        spawn_interrupt_handler(Arc::clone(&config.runtime), lifecycle.cleanup_context());
    let result = run_install(&lifecycle, targets, overwrite).await;
    interrupt.abort();
    result
}

pub(crate) async fn run_install<R, F, G>(
    lifecycle: &Lifecycle<R, F, G>,
    targets: &[String],
    overwrite: bool,
) -> Result<()>
where
    R: Runtime + 'static,
    F: Fetcher,
    G: Registry,
{
    let (archives, names) = split_targets(targets);
    debug!("Archives: {:?}, registry names: {:?}", archives, names);

    let mut failed = Vec::new();
    if !names.is_empty() {
        let report = lifecycle.install(&names, overwrite).await?;
        print_report(&report, &mut failed);
    }
    for source in &archives {
        let report = lifecycle.install_archive(source, overwrite).await?;
        print_report(&report, &mut failed);
    }

    if !failed.is_empty() {
        bail!("Failed to install: {}", failed.join(", "));
    }
    Ok(())
}

/// Separate archive sources (`.mhl` files and URLs) from registry names.
pub(crate) fn split_targets(targets: &[String]) -> (Vec<ArchiveSource>, Vec<String>) {
    let mut archives = Vec::new();
    let mut names = Vec::new();
    for target in targets {
        let is_url = target.starts_with("http://") || target.starts_with("https://");
        if is_url || target.to_lowercase().ends_with(".mhl") {
            archives.push(ArchiveSource::parse(target));
        } else if !names.contains(target) {
            names.push(target.clone());
        }
    }
    (archives, names)
}

fn print_report(report: &InstallReport, failed: &mut Vec<String>) {
    for line in report_lines(report) {
        println!("{}", line);
    }
    for (name, outcome) in &report.results {
        if let PackageOutcome::RolledBack { phase, error } | PackageOutcome::Failed { phase, error } =
            outcome
        {
            eprintln!("Error: {}", describe_failure(name, Some(*phase), error));
            if matches!(outcome, PackageOutcome::Failed { .. }) {
                eprintln!("  '{}' may be left incomplete; it is cleaned up on the next run", name);
            }
            failed.push(name.clone());
        }
    }
}

/// Progress lines for the packages that did not fail.
pub(crate) fn report_lines(report: &InstallReport) -> Vec<String> {
    let mut lines: Vec<String> = report
        .results
        .iter()
        .filter_map(|(name, outcome)| match outcome {
            PackageOutcome::Installed { version: Some(v) } => {
                Some(format!("Successfully installed '{}' ({})", name, v))
            }
            PackageOutcome::Installed { version: None } => {
                Some(format!("Successfully installed '{}'", name))
            }
            PackageOutcome::Skipped => Some(format!("Package '{}' is already installed", name)),
            _ => None,
        })
        .collect();
    if !report.not_attempted.is_empty() {
        lines.push(format!(
            "Not attempted: {}",
            report.not_attempted.join(", ")
        ));
    }
    lines
}
