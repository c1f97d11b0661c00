//! The key-file environment variable.
//!
//! The encryption tooling finds the identity through `SOPS_AGE_KEY_FILE`.
//! The binaries set it for their own process before any worker thread
//! starts, and it can be persisted into the user's shell startup file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, VaultError};
use crate::storage::KEY_FILE_ENV;

/// The `export` line for a shell.
pub fn export_line(key_file: &Path) -> String {
    format!("export {KEY_FILE_ENV}=\"{}\"", key_file.display())
}

/// Point the current process at `key_file`.
///
/// Mutating the environment is only sound while no other thread reads it:
/// call this from `main` before starting a runtime or spawning threads.
pub fn apply_to_process(key_file: &Path) {
    std::env::set_var(KEY_FILE_ENV, key_file);
    log::debug!("{KEY_FILE_ENV} set to {}", key_file.display());
}

/// Startup file for the given login shell: `.zshrc` for zsh, `.bashrc`
/// for everything else.
pub fn shell_rc_file(home: &Path, shell: Option<&str>) -> PathBuf {
    match shell {
        Some(s) if s.ends_with("zsh") => home.join(".zshrc"),
        _ => home.join(".bashrc"),
    }
}

/// Startup file for the invoking user, from `$HOME` and `$SHELL`.
pub fn current_shell_rc_file() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| VaultError::PrerequisiteMissing("a home directory".to_string()))?;
    let shell = std::env::var("SHELL").ok();
    Ok(shell_rc_file(&home, shell.as_deref()))
}

/// Append the export line to `rc_file` unless it already exports the
/// variable. An export pointing at a different key file is replaced.
/// Returns `true` when the file changed.
pub fn persist(rc_file: &Path, key_file: &Path) -> Result<bool> {
    let existing = match fs::read_to_string(rc_file) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(VaultError::from_io(rc_file, e)),
    };

    let wanted = key_file.display().to_string();
    let exported: Vec<&str> = existing.lines().filter_map(exported_value).collect();
    if !exported.is_empty() && exported.iter().all(|v| *v == wanted) {
        log::debug!("{} already exports {KEY_FILE_ENV}", rc_file.display());
        return Ok(false);
    }

    if !exported.is_empty() {
        log::warn!(
            "{} exports {KEY_FILE_ENV}={}; replacing it with {wanted}",
            rc_file.display(),
            exported.join(", ")
        );
        let mut replaced = false;
        let mut out = String::with_capacity(existing.len());
        for line in existing.lines() {
            if exported_value(line).is_none() {
                out.push_str(line);
                out.push('\n');
            } else if !replaced {
                out.push_str(&export_line(key_file));
                out.push('\n');
                replaced = true;
            }
        }
        let mode = crate::storage::fs::mode_of(rc_file).ok();
        crate::storage::fs::write_atomic(rc_file, out.as_bytes(), mode)?;
        return Ok(true);
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(rc_file)
        .map_err(|e| VaultError::from_io(rc_file, e))?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{}", export_line(key_file))?;
    log::info!("added {KEY_FILE_ENV} to {}", rc_file.display());
    Ok(true)
}

/// The path an `export SOPS_AGE_KEY_FILE=...` line sets, unquoted.
fn exported_value(line: &str) -> Option<&str> {
    let value = line
        .trim_start()
        .strip_prefix("export ")?
        .trim_start()
        .strip_prefix(KEY_FILE_ENV)?
        .strip_prefix('=')?
        .trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| value.strip_prefix(*q).and_then(|v| v.strip_suffix(*q)));
    Some(unquoted.unwrap_or(value))
}
