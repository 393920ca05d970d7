use std::fmt;
use std::path::PathBuf;

/// Lifecycle state of a package, derived from what is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageState {
    /// Package tree present and bound into the namespace
    Installed,
    /// Interrupted install or uninstall; the recovery sweep cleans these up
    Partial,
    Absent,
}

impl PackageState {
    /// | package dir | staging dir | binding | state     |
    /// |-------------|-------------|---------|-----------|
    /// | yes         | any         | yes     | Installed |
    /// | yes         | any         | no      | Partial   |
    /// | no          | yes         | any     | Partial   |
    /// | no          | no          | yes     | Partial   |
    /// | no          | no          | no      | Absent    |
    pub fn derive(has_dir: bool, has_staging: bool, has_binding: bool) -> Self {
        match (has_dir, has_staging, has_binding) {
            (true, _, true) => PackageState::Installed,
            (false, false, false) => PackageState::Absent,
            _ => PackageState::Partial,
        }
    }
}

impl fmt::Display for PackageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageState::Installed => write!(f, "installed"),
            PackageState::Partial => write!(f, "incomplete"),
            PackageState::Absent => write!(f, "absent"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub name: String,
    pub install_path: PathBuf,
    pub state: PackageState,
    pub version: Option<String>,
}
