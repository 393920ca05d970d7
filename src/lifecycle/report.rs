use std::fmt;

use crate::error::kind_of;

/// Step of a package install; failures record where they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPhase {
    Resolving,
    Locking,
    Fetching,
    Extracting,
    Committing,
    Binding,
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallPhase::Resolving => "resolving",
            InstallPhase::Locking => "locking",
            InstallPhase::Fetching => "fetching",
            InstallPhase::Extracting => "extracting",
            InstallPhase::Committing => "committing",
            InstallPhase::Binding => "binding",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum PackageOutcome {
    Installed { version: Option<String> },
    /// Already installed and not asked to overwrite
    Skipped,
    /// Failed, and every trace of the attempt was cleaned up
    RolledBack {
        phase: InstallPhase,
        error: anyhow::Error,
    },
    /// Failed, and cleanup failed too; the package may show as incomplete
    Failed {
        phase: InstallPhase,
        error: anyhow::Error,
    },
}

impl PackageOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            PackageOutcome::RolledBack { .. } | PackageOutcome::Failed { .. }
        )
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        match self {
            PackageOutcome::RolledBack { error, .. } | PackageOutcome::Failed { error, .. } => {
                Some(error)
            }
            _ => None,
        }
    }
}

/// Per-package results of one install request, in install order.
#[derive(Debug, Default)]
pub struct InstallReport {
    pub results: Vec<(String, PackageOutcome)>,
    /// Packages after the first failure that were never started
    pub not_attempted: Vec<String>,
}

impl InstallReport {
    pub fn push(&mut self, name: &str, outcome: PackageOutcome) {
        self.results.push((name.to_string(), outcome));
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(|(_, o)| !o.is_failure())
    }

    pub fn outcome(&self, name: &str) -> Option<&PackageOutcome> {
        self.results
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, o)| o)
    }

    pub fn installed(&self) -> Vec<&str> {
        self.names_where(|o| matches!(o, PackageOutcome::Installed { .. }))
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.names_where(|o| matches!(o, PackageOutcome::Skipped))
    }

    fn names_where(&self, pred: impl Fn(&PackageOutcome) -> bool) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(n, _)| n.as_str())
            .collect()
    }
}

#[derive(Debug)]
pub enum UninstallOutcome {
    Removed,
    /// Nothing to remove; counts as success
    NotInstalled,
    Failed { error: anyhow::Error },
}

#[derive(Debug, Default)]
pub struct UninstallReport {
    pub results: Vec<(String, UninstallOutcome)>,
    /// The confirmation prompt was declined
    pub cancelled: bool,
}

impl UninstallReport {
    pub fn push(&mut self, name: &str, outcome: UninstallOutcome) {
        self.results.push((name.to_string(), outcome));
    }

    pub fn is_success(&self) -> bool {
        self.results
            .iter()
            .all(|(_, o)| !matches!(o, UninstallOutcome::Failed { .. }))
    }

    pub fn outcome(&self, name: &str) -> Option<&UninstallOutcome> {
        self.results
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, o)| o)
    }

    pub fn removed(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, o)| matches!(o, UninstallOutcome::Removed))
            .map(|(n, _)| n.as_str())
            .collect()
    }
}

/// One line of user-facing failure text: package, kind and cause.
pub fn describe_failure(name: &str, phase: Option<InstallPhase>, error: &anyhow::Error) -> String {
    match phase {
        Some(phase) => format!("{}: {} while {}: {:#}", name, kind_of(error), phase, error),
        None => format!("{}: {}: {:#}", name, kind_of(error), error),
    }
}
