//! Package metadata: the `mip.json` manifest shipped inside each package
//! and the lifecycle state derived from the package root.

mod manifest;
mod state;

pub use manifest::{MANIFEST_FILE, Manifest, is_valid_name};
pub use state::{InstalledPackage, PackageState};
