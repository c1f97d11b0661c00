//! Scoped plaintext artifacts.
//!
//! A [`ScratchFile`] is created with mode 0600, keeps the extension of the
//! file it stands in for, and is removed when dropped. Every live scratch
//! file is also recorded in a [`ScratchRegistry`] so a signal handler can
//! remove them when the process is interrupted and destructors never run.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tempfile::TempPath;
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

/// Prefix of every scratch file name.
pub const SCRATCH_PREFIX: &str = ".vaultboot-";

/// Shared set of live scratch files.
#[derive(Debug, Clone, Default)]
pub struct ScratchRegistry {
    paths: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl ScratchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths currently registered.
    pub fn tracked(&self) -> Vec<PathBuf> {
        self.lock().iter().cloned().collect()
    }

    /// Remove every registered file. Returns how many were removed.
    ///
    /// Safe to call from a signal watcher while the owning operation is
    /// still running; the owner's later cleanup finds nothing to do.
    pub fn purge(&self) -> usize {
        let paths: Vec<PathBuf> = std::mem::take(&mut *self.lock()).into_iter().collect();
        let mut removed = 0;
        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::error!("could not remove scratch file {}: {e}", path.display()),
            }
        }
        removed
    }

    fn track(&self, path: &Path) {
        self.lock().insert(path.to_path_buf());
    }

    fn untrack(&self, path: &Path) {
        self.lock().remove(path);
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A plaintext temp file removed on drop.
#[derive(Debug)]
pub struct ScratchFile {
    path: TempPath,
    registry: ScratchRegistry,
}

impl ScratchFile {
    /// Create a scratch file in `dir` holding `contents`.
    ///
    /// `suffix` is appended to the random name (e.g. `.yml`) so editors pick
    /// the right syntax mode.
    pub fn create(
        registry: &ScratchRegistry,
        dir: &Path,
        suffix: &str,
        contents: &[u8],
    ) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .suffix(suffix)
            .tempfile_in(dir)
            .map_err(|e| VaultError::from_io(dir, e))?;
        registry.track(file.path());

        let written = file
            .write_all(contents)
            .and_then(|()| file.as_file().sync_all());
        if let Err(e) = written {
            registry.untrack(file.path());
            return Err(VaultError::Io(e));
        }

        Ok(Self {
            path: file.into_temp_path(),
            registry: registry.clone(),
        })
    }

    /// Location of the scratch file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents, in a buffer wiped on drop.
    pub fn read(&self) -> Result<Zeroizing<Vec<u8>>> {
        fs::read(&self.path)
            .map(Zeroizing::new)
            .map_err(|e| VaultError::from_io(&self.path, e))
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        self.registry.untrack(&self.path);
        // `TempPath` removes the file when it drops right after this.
    }
}
