use anyhow::Result;
use flate2::read::GzDecoder;
use log::debug;
use std::io::{Read, Write};
use std::path::Path;
use tar::{Archive, EntryType};

use super::zip::flatten_wrapper_dir;
use super::{Extractor, safe_entry_path};
use crate::error::MipError;
use crate::runtime::Runtime;

/// Extractor for `.tar.gz` / `.tgz` archives
pub struct TarGzExtractor;

impl Extractor for TarGzExtractor {
    fn extract<R: Runtime + ?Sized>(&self, runtime: &R, bytes: &[u8], dest: &Path) -> Result<()> {
        debug!("Extracting tar.gz archive to {:?}...", dest);

        let mut archive = Archive::new(GzDecoder::new(bytes));
        let entries = archive
            .entries()
            .map_err(|e| MipError::CorruptArchive(format!("not a valid tar.gz file: {}", e)))?;

        let mut extracted = 0usize;
        for entry in entries {
            let mut entry =
                entry.map_err(|e| MipError::CorruptArchive(format!("bad tar entry: {}", e)))?;
            let entry_path = entry
                .path()
                .map_err(|e| MipError::CorruptArchive(format!("bad tar path: {}", e)))?
                .into_owned();
            let Some(full_path) = safe_entry_path(dest, &entry_path) else {
                debug!("Skipping entry with unsafe path: {:?}", entry_path);
                continue;
            };

            match entry.header().entry_type() {
                EntryType::Directory => {
                    runtime
                        .create_dir_all(&full_path)
                        .map_err(|e| MipError::disk_write(&full_path, e))?;
                }
                EntryType::Regular | EntryType::Continuous => {
                    if let Some(parent) = full_path.parent() {
                        runtime
                            .create_dir_all(parent)
                            .map_err(|e| MipError::disk_write(parent, e))?;
                    }
                    let mut contents = Vec::new();
                    entry.read_to_end(&mut contents).map_err(|e| {
                        MipError::CorruptArchive(format!("{}: {}", entry_path.display(), e))
                    })?;
                    let mut dest_file = runtime
                        .create_file(&full_path)
                        .map_err(|e| MipError::disk_write(&full_path, e))?;
                    dest_file
                        .write_all(&contents)
                        .map_err(|e| MipError::disk_write(&full_path, e))?;

                    #[cfg(unix)]
                    if let Ok(mode) = entry.header().mode()
                        && let Err(e) = runtime.set_permissions(&full_path, mode)
                    {
                        debug!("Failed to set permissions on {:?}: {}", full_path, e);
                    }
                }
                other => {
                    // Links and device nodes have no place in a package tree
                    debug!("Skipping {:?} entry {:?}", other, entry_path);
                    continue;
                }
            }
            extracted += 1;
        }

        if extracted == 0 {
            return Err(MipError::CorruptArchive("archive is empty".into()).into());
        }

        flatten_wrapper_dir(runtime, dest)?;
        Ok(())
    }
}
