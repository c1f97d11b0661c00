//! Filesystem helpers shared by the key manager, policy editor and
//! secret store.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::RngCore;

use crate::error::{Result, VaultError};
use crate::time;

/// Mode for files holding private key material.
pub const OWNER_ONLY_FILE: u32 = 0o600;
/// Mode for directories holding private key material.
pub const OWNER_ONLY_DIR: u32 = 0o700;

/// How a file was removed by [`secure_delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Contents overwritten with random bytes and synced before unlinking.
    Overwritten,
    /// Overwrite was not possible; the file was only unlinked.
    Unlinked,
}

/// Write `data` to `path` atomically.
///
/// The bytes go to a sibling temporary file which is then renamed over
/// `path`, so an interrupted write never leaves a partial file behind. When
/// `mode` is given it is applied to the temporary file before the rename.
/// The parent directory is created if missing.
pub fn write_atomic(path: &Path, data: &[u8], mode: Option<u32>) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| VaultError::from_io(&parent, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".vaultboot-write-")
        .tempfile_in(&parent)
        .map_err(|e| VaultError::from_io(&parent, e))?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;

    if let Some(mode) = mode {
        set_mode(tmp.path(), mode)?;
    }

    tmp.persist(path)
        .map_err(|e| VaultError::from_io(path, e.error))?;
    Ok(())
}

/// Create `dir` (and parents) and restrict it to its owner.
pub fn ensure_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| VaultError::from_io(dir, e))?;
    set_mode(dir, OWNER_ONLY_DIR)
}

/// Apply a Unix permission mode. No-op on other platforms.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| VaultError::from_io(path, e))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Read the permission bits of `path`.
#[cfg(unix)]
pub fn mode_of(path: &Path) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    let meta = fs::metadata(path).map_err(|e| VaultError::from_io(path, e))?;
    Ok(meta.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
pub fn mode_of(_path: &Path) -> Result<u32> {
    Ok(OWNER_ONLY_FILE)
}

/// Copy `path` to `<name>.backup-<stamp>` beside it and return the copy's
/// path. A numeric suffix keeps same-second backups apart.
pub fn backup(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string());
    let stamp = time::backup_stamp(time::now());

    let mut candidate = path.with_file_name(format!("{name}.backup-{stamp}"));
    let mut n = 1;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{name}.backup-{stamp}-{n}"));
        n += 1;
    }

    fs::copy(path, &candidate).map_err(|e| VaultError::from_io(path, e))?;
    log::debug!("backed up {} to {}", path.display(), candidate.display());
    Ok(candidate)
}

/// Remove `path`, overwriting its contents first where possible.
///
/// The overwrite is hygiene, not a guarantee: journaling and copy-on-write
/// filesystems may keep old blocks around.
pub fn secure_delete(path: &Path) -> Result<Removal> {
    let removal = match overwrite_with_noise(path) {
        Ok(()) => Removal::Overwritten,
        Err(e) => {
            log::debug!("overwrite of {} failed ({e}); unlinking only", path.display());
            Removal::Unlinked
        }
    };
    fs::remove_file(path).map_err(|e| VaultError::from_io(path, e))?;
    Ok(removal)
}

fn overwrite_with_noise(path: &Path) -> std::io::Result<()> {
    let len = fs::metadata(path)?.len() as usize;
    let mut noise = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut noise);
    let mut file = fs::OpenOptions::new().write(true).open(path)?;
    file.write_all(&noise)?;
    file.sync_all()
}
