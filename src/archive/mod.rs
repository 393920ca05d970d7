//! Archive store: extraction of package archives and crash-safe placement
//! of the extracted trees under the package root.

mod store;
mod tar_gz;
mod zip;

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

pub use store::{ArchiveStore, STAGING_DIR, TRASH_DIR};
pub use tar_gz::TarGzExtractor;
pub use zip::ZipExtractor;

/// Declared format of a package archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// `.mhl` and `.zip`
    Zip,
    /// `.tar.gz` and `.tgz`
    TarGz,
}

impl ArchiveFormat {
    /// Infer the format from a URL or file name. Package archives are zip
    /// files unless the name clearly says otherwise.
    pub fn from_location(location: &str) -> Self {
        let name = location
            .split(['?', '#'])
            .next()
            .unwrap_or(location)
            .to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            ArchiveFormat::TarGz
        } else {
            ArchiveFormat::Zip
        }
    }
}

/// Format-specific extraction of in-memory archive bytes.
pub trait Extractor: Send + Sync {
    /// Unpack `bytes` into `dest`, which must already exist.
    fn extract<R: Runtime + ?Sized>(&self, runtime: &R, bytes: &[u8], dest: &Path) -> Result<()>;
}

/// Dispatches to the extractor for a declared format.
pub fn extract_archive<R: Runtime + ?Sized>(
    runtime: &R,
    format: ArchiveFormat,
    bytes: &[u8],
    dest: &Path,
) -> Result<()> {
    match format {
        ArchiveFormat::Zip => ZipExtractor.extract(runtime, bytes, dest),
        ArchiveFormat::TarGz => TarGzExtractor.extract(runtime, bytes, dest),
    }
}

/// Path of an archive entry below `dest`, or `None` for absolute paths and
/// paths that escape through `..`.
pub(crate) fn safe_entry_path(dest: &Path, entry: &Path) -> Option<PathBuf> {
    use std::path::Component;
    let mut out = dest.to_path_buf();
    let mut depth = 0usize;
    for component in entry.components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    if depth == 0 { None } else { Some(out) }
}
