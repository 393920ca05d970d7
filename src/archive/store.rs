use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{ArchiveFormat, extract_archive};
use crate::error::MipError;
use crate::lock::PackageLock;
use crate::package::is_valid_name;
use crate::runtime::{Runtime, copy_dir_all};

/// In-flight extractions, one directory per package name
pub const STAGING_DIR: &str = ".staging";
/// Overwritten package trees waiting to be deleted
pub const TRASH_DIR: &str = ".trash";

/// Owns the package root: every package tree lives in `<root>/<name>`,
/// and the dot-directories hold bookkeeping that never shows up in listings.
/// They are removed again once empty.
///
/// Lock files live in `lock_dir`, outside the root.
pub struct ArchiveStore<R: Runtime + ?Sized> {
    runtime: Arc<R>,
    root: PathBuf,
    lock_dir: PathBuf,
}

impl<R: Runtime + ?Sized> ArchiveStore<R> {
    pub fn new(runtime: Arc<R>, root: PathBuf, lock_dir: PathBuf) -> Self {
        Self {
            runtime,
            root,
            lock_dir,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn package_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn staging_dir(&self, name: &str) -> PathBuf {
        self.root.join(STAGING_DIR).join(name)
    }

    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    pub fn trash_dir(&self) -> PathBuf {
        self.root.join(TRASH_DIR)
    }

    /// Create a fresh, empty staging directory for `name`.
    #[tracing::instrument(skip(self))]
    pub fn stage(&self, name: &str) -> Result<PathBuf> {
        let staging = self.staging_dir(name);
        if self.runtime.exists(&staging) {
            debug!("Removing stale staging directory {:?}", staging);
            self.runtime
                .remove_dir_all(&staging)
                .map_err(|e| MipError::disk_write(&staging, e))?;
        }
        if let Err(e) = self.runtime.create_dir_all(&staging) {
            // Another process may have pruned `.staging` halfway through
            debug!("Retrying creation of {:?}: {}", staging, e);
            self.runtime
                .create_dir_all(&staging)
                .map_err(|e| MipError::disk_write(&staging, e))?;
        }
        Ok(staging)
    }

    /// Unpack an archive into `staging` and return the top-level entries,
    /// relative to the package directory.
    #[tracing::instrument(skip(self, bytes))]
    pub fn extract(
        &self,
        bytes: &[u8],
        format: ArchiveFormat,
        staging: &Path,
    ) -> Result<Vec<PathBuf>> {
        extract_archive(self.runtime.as_ref(), format, bytes, staging)?;
        let entries = self
            .runtime
            .read_dir(staging)
            .with_context(|| format!("Failed to read staging directory {:?}", staging))?;
        Ok(entries
            .iter()
            .filter_map(|p| p.file_name().map(PathBuf::from))
            .collect())
    }

    /// Move a fully extracted staging tree into its final location.
    ///
    /// An existing tree at `final_path` is moved into the trash first and
    /// only deleted once the new tree is in place; if placement fails it is
    /// moved back.
    #[tracing::instrument(skip(self))]
    pub fn commit(&self, staging: &Path, final_path: &Path) -> Result<()> {
        if let Some(parent) = final_path.parent() {
            self.runtime
                .create_dir_all(parent)
                .map_err(|e| MipError::disk_write(parent, e))?;
        }

        let trashed = if self.runtime.exists(final_path) {
            Some(self.move_to_trash(final_path)?)
        } else {
            None
        };

        if let Err(e) = self.place(staging, final_path) {
            if let Some(old) = &trashed {
                warn!("Restoring previous copy of {:?}", final_path);
                if self.runtime.exists(final_path)
                    && let Err(cleanup) = self.runtime.remove_dir_all(final_path)
                {
                    warn!("Failed to remove partial tree {:?}: {}", final_path, cleanup);
                }
                if let Err(restore) = self.runtime.rename(old, final_path) {
                    warn!("Failed to restore {:?} from {:?}: {}", final_path, old, restore);
                }
            }
            return Err(e);
        }

        if let Some(old) = trashed {
            match self.runtime.remove_dir_all(&old) {
                Ok(()) => self.prune_if_empty(&self.trash_dir()),
                // Swept by the next clear_trash
                Err(e) => warn!("Failed to delete replaced tree {:?}: {}", old, e),
            }
        }
        if let Some(staging_area) = staging.parent() {
            self.prune_if_empty(staging_area);
        }
        Ok(())
    }

    fn move_to_trash(&self, final_path: &Path) -> Result<PathBuf> {
        let trash = self.trash_dir();
        self.runtime
            .create_dir_all(&trash)
            .map_err(|e| MipError::disk_write(&trash, e))?;
        let name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let aside = trash.join(format!("{}.{}", name, std::process::id()));
        if self.runtime.exists(&aside) {
            self.runtime
                .remove_dir_all(&aside)
                .map_err(|e| MipError::disk_write(&aside, e))?;
        }
        debug!("Moving {:?} aside to {:?}", final_path, aside);
        self.runtime
            .rename(final_path, &aside)
            .map_err(|e| MipError::disk_write(final_path, e))?;
        Ok(aside)
    }

    fn place(&self, staging: &Path, final_path: &Path) -> Result<()> {
        let Err(rename_err) = self.runtime.rename(staging, final_path) else {
            return Ok(());
        };
        debug!(
            "Rename {:?} -> {:?} failed ({}), copying instead",
            staging, final_path, rename_err
        );

        if let Err(e) = copy_dir_all(self.runtime.as_ref(), staging, final_path) {
            if self.runtime.exists(final_path)
                && let Err(cleanup) = self.runtime.remove_dir_all(final_path)
            {
                warn!("Failed to remove partial copy {:?}: {}", final_path, cleanup);
            }
            return Err(MipError::disk_write(final_path, e).into());
        }
        if let Err(e) = self.runtime.remove_dir_all(staging) {
            warn!("Failed to remove staging directory {:?}: {}", staging, e);
        }
        Ok(())
    }

    /// Delete an installed package tree.
    #[tracing::instrument(skip(self))]
    pub fn remove(&self, final_path: &Path) -> Result<()> {
        if !self.runtime.exists(final_path) {
            let name = final_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            return Err(MipError::NotInstalled(name).into());
        }
        self.runtime
            .remove_dir_all(final_path)
            .map_err(|e| MipError::disk_write(final_path, e))?;
        Ok(())
    }

    /// Remove a staging directory if it still exists.
    pub fn discard(&self, staging: &Path) -> Result<()> {
        if self.runtime.exists(staging) {
            debug!("Discarding staging directory {:?}", staging);
            self.runtime
                .remove_dir_all(staging)
                .map_err(|e| MipError::disk_write(staging, e))?;
            if let Some(staging_area) = staging.parent() {
                self.prune_if_empty(staging_area);
            }
        }
        Ok(())
    }

    /// Names of package directories under the root, sorted.
    pub fn installed_names(&self) -> Result<Vec<String>> {
        self.dir_names(&self.root)
    }

    /// Names with a leftover staging directory, sorted.
    pub fn staged_names(&self) -> Result<Vec<String>> {
        self.dir_names(&self.root.join(STAGING_DIR))
    }

    /// Delete trashed trees, except those of packages that are locked by a
    /// running operation which may still move them back.
    ///
    /// A trashed tree whose package directory is missing was left by an
    /// overwrite interrupted between its two renames. It is the only copy
    /// of the package, so it is moved back instead of deleted.
    pub fn clear_trash(&self) -> Result<()> {
        let trash = self.trash_dir();
        if !self.runtime.is_dir(&trash) {
            return Ok(());
        }
        for entry in self.runtime.read_dir(&trash)? {
            let Some(file_name) = entry.file_name().map(|n| n.to_string_lossy().to_string())
            else {
                continue;
            };
            // `<name>.<pid>`
            let name = file_name
                .rsplit_once('.')
                .map_or(file_name.as_str(), |(name, _)| name);
            if !is_valid_name(name) {
                warn!("Ignoring unexpected entry {:?} in trash", entry);
                continue;
            }
            let Some(_lock) = PackageLock::try_acquire(&self.lock_dir, name)? else {
                debug!("Keeping {:?}, '{}' is locked", entry, name);
                continue;
            };

            let final_path = self.package_dir(name);
            if !self.runtime.exists(&final_path) {
                warn!("Restoring '{}' from interrupted overwrite {:?}", name, entry);
                self.runtime
                    .rename(&entry, &final_path)
                    .map_err(|e| MipError::disk_write(&final_path, e))?;
                continue;
            }
            debug!("Deleting trashed tree {:?}", entry);
            self.runtime
                .remove_dir_all(&entry)
                .map_err(|e| MipError::disk_write(&entry, e))?;
        }
        self.prune_if_empty(&trash);
        Ok(())
    }

    /// Remove a bookkeeping directory once nothing is left in it. The
    /// removal itself fails if another process has just added an entry.
    fn prune_if_empty(&self, dir: &Path) {
        if !self.runtime.read_dir(dir).is_ok_and(|entries| entries.is_empty()) {
            return;
        }
        if let Err(e) = self.runtime.remove_dir(dir) {
            debug!("Keeping {:?}: {}", dir, e);
        }
    }

    fn dir_names(&self, dir: &Path) -> Result<Vec<String>> {
        if !self.runtime.is_dir(dir) {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = self
            .runtime
            .read_dir(dir)?
            .into_iter()
            .filter(|p| self.runtime.is_dir(p))
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .filter(|n| !n.starts_with('.'))
            .collect();
        names.sort();
        Ok(names)
    }
}
