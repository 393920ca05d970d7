//! Error taxonomy for package lifecycle operations.
//!
//! Orchestration code propagates `anyhow::Error`; these typed errors are
//! attached at the point of failure so callers can classify them with
//! [`kind_of`] or `downcast_ref`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MipError {
    /// Unknown package name in the registry
    #[error("Package '{0}' not found in repository")]
    NotFound(String),

    /// Dependency chain revisits a name already on the resolution path
    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// Transport failure after retries were exhausted
    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// Server answered with a non-success status that will not be retried
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Checksum mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("Failed to write {path:?}: {message}")]
    DiskWrite { path: PathBuf, message: String },

    /// Uninstall target absent; callers treat this as already satisfied
    #[error("Package '{0}' is not installed")]
    NotInstalled(String),

    #[error("Package '{0}' is locked by another mip process")]
    LockContention(String),

    #[error("Invalid mip.json: {0}")]
    InvalidManifest(String),
}

/// Short, stable name of an error kind for user-facing reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Cycle,
    Network,
    HttpStatus,
    ChecksumMismatch,
    CorruptArchive,
    DiskWrite,
    NotInstalled,
    LockContention,
    InvalidManifest,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Cycle => "dependency cycle",
            ErrorKind::Network => "network error",
            ErrorKind::HttpStatus => "http error",
            ErrorKind::ChecksumMismatch => "checksum mismatch",
            ErrorKind::CorruptArchive => "corrupt archive",
            ErrorKind::DiskWrite => "disk write error",
            ErrorKind::NotInstalled => "not installed",
            ErrorKind::LockContention => "lock contention",
            ErrorKind::InvalidManifest => "invalid manifest",
            ErrorKind::Other => "error",
        };
        f.write_str(name)
    }
}

impl MipError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MipError::NotFound(_) => ErrorKind::NotFound,
            MipError::Cycle(_) => ErrorKind::Cycle,
            MipError::Network { .. } => ErrorKind::Network,
            MipError::HttpStatus { .. } => ErrorKind::HttpStatus,
            MipError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            MipError::CorruptArchive(_) => ErrorKind::CorruptArchive,
            MipError::DiskWrite { .. } => ErrorKind::DiskWrite,
            MipError::NotInstalled(_) => ErrorKind::NotInstalled,
            MipError::LockContention(_) => ErrorKind::LockContention,
            MipError::InvalidManifest(_) => ErrorKind::InvalidManifest,
        }
    }

    pub fn disk_write(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        MipError::DiskWrite {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Classify an error chain by the first `MipError` found in it.
pub fn kind_of(error: &anyhow::Error) -> ErrorKind {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<MipError>())
        .map(MipError::kind)
        .unwrap_or(ErrorKind::Other)
}

/// True when the error chain carries [`MipError::NotInstalled`].
pub fn is_not_installed(error: &anyhow::Error) -> bool {
    kind_of(error) == ErrorKind::NotInstalled
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_cycle_display_joins_path() {
        let err = MipError::Cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> a");
    }

    #[test]
    fn test_kind_of_finds_typed_error_under_context() {
        let err: anyhow::Error = Err::<(), _>(MipError::CorruptArchive("bad header".into()))
            .context("Failed to extract chebfun")
            .unwrap_err();
        assert_eq!(kind_of(&err), ErrorKind::CorruptArchive);
    }

    #[test]
    fn test_kind_of_untyped_error_is_other() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(kind_of(&err), ErrorKind::Other);
        assert!(!is_not_installed(&err));
    }

    #[test]
    fn test_is_not_installed() {
        let err = anyhow::Error::from(MipError::NotInstalled("chebfun".into()));
        assert!(is_not_installed(&err));
        assert_eq!(err.to_string(), "Package 'chebfun' is not installed");
    }
}
