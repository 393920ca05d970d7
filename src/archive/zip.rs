use anyhow::{Context, Result};
use log::debug;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::ZipArchive;

use super::{Extractor, safe_entry_path};
use crate::error::MipError;
use crate::runtime::Runtime;

/// Extractor for `.mhl` / `.zip` archives
pub struct ZipExtractor;

impl Extractor for ZipExtractor {
    fn extract<R: Runtime + ?Sized>(&self, runtime: &R, bytes: &[u8], dest: &Path) -> Result<()> {
        debug!("Extracting zip archive to {:?}...", dest);

        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| MipError::CorruptArchive(format!("not a valid zip file: {}", e)))?;

        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| MipError::CorruptArchive(format!("entry {}: {}", i, e)))?;

            let Some(entry_path) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
                debug!("Skipping entry with unsafe path: {}", entry.name());
                continue;
            };
            let Some(full_path) = safe_entry_path(dest, &entry_path) else {
                continue;
            };

            if entry.is_dir() {
                runtime
                    .create_dir_all(&full_path)
                    .map_err(|e| MipError::disk_write(&full_path, e))?;
                continue;
            }

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
            if let Some(mode) = entry.unix_mode()
                && let Err(e) = runtime.set_permissions(&full_path, mode)
            {
                debug!("Failed to set permissions on {:?}: {}", full_path, e);
            }
        }

        flatten_wrapper_dir(runtime, dest)?;
        Ok(())
    }
}

/// Archives built as `zip -r pkg.mhl pkg/` wrap everything in one folder.
/// When the only top-level entry is a directory holding `mip.json`, its
/// contents are moved up so `mip.json` sits at the package root.
pub(super) fn flatten_wrapper_dir<R: Runtime + ?Sized>(runtime: &R, dest: &Path) -> Result<()> {
    let entries = runtime
        .read_dir(dest)
        .context("Failed to read extraction directory")?;
    let [wrapper] = entries.as_slice() else {
        return Ok(());
    };
    if !runtime.is_dir(wrapper) || !runtime.exists(&wrapper.join("mip.json")) {
        return Ok(());
    }

    debug!("Flattening wrapper directory {:?}", wrapper);
    // Move the wrapper aside first so a child with the same name cannot collide
    let aside = dest.join(".mip-unwrap");
    runtime
        .rename(wrapper, &aside)
        .map_err(|e| MipError::disk_write(wrapper, e))?;
    for item in runtime.read_dir(&aside)? {
        if let Some(name) = item.file_name() {
            let target = dest.join(name);
            runtime
                .rename(&item, &target)
                .map_err(|e| MipError::disk_write(&target, e))?;
        }
    }
    runtime
        .remove_dir_all(&aside)
        .map_err(|e| MipError::disk_write(&aside, e))?;
    Ok(())
}
