//! The external editor.

use std::path::Path;
use std::process::Command;

use crate::error::{Result, VaultError};

/// Fallback when neither `$VISUAL` nor `$EDITOR` is set.
pub const FALLBACK_EDITOR: &str = "vi";

/// Opens a file for interactive editing and blocks until done.
pub trait Editor {
    fn edit(&mut self, file: &Path) -> Result<()>;
}

impl<F> Editor for F
where
    F: FnMut(&Path) -> Result<()>,
{
    fn edit(&mut self, file: &Path) -> Result<()> {
        self(file)
    }
}

/// Runs an editor command line, e.g. `vim` or `code --wait`.
#[derive(Debug, Clone)]
pub struct CommandEditor {
    command: String,
}

impl CommandEditor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// `$VISUAL`, then `$EDITOR`, then `vi`.
    pub fn from_env() -> Self {
        let command = ["VISUAL", "EDITOR"]
            .iter()
            .filter_map(|v| std::env::var(v).ok())
            .find(|v| !v.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_EDITOR.to_string());
        Self::new(command)
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Editor for CommandEditor {
    fn edit(&mut self, file: &Path) -> Result<()> {
        let mut parts = self.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| VaultError::PrerequisiteMissing("an editor ($EDITOR is blank)".to_string()))?;

        log::debug!("opening {} with {}", file.display(), self.command);
        let status = Command::new(program)
            .args(parts)
            .arg(file)
            .status()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    VaultError::PrerequisiteMissing(format!("editor `{program}`"))
                } else {
                    VaultError::EditorFailed(format!("could not start `{program}`: {e}"))
                }
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(VaultError::EditorFailed(format!("`{}` exited with {status}", self.command)))
        }
    }
}
