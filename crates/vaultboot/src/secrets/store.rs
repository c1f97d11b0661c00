//! Operations over encrypted secret files.
//!
//! Every flow that needs plaintext on disk (edit, view, init) goes through a
//! [`ScratchFile`], which is removed on success, on error and, through the
//! shared [`ScratchRegistry`], on interruption. Re-encryption never touches
//! disk with plaintext at all.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use age::x25519;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::crypto::encryption;
use crate::crypto::keys::AgeKeyPair;
use crate::error::{Result, VaultError};
use crate::policy::{Policy, PolicyEditor, PolicyUpdate};
use crate::secrets::editor::Editor;
use crate::secrets::scratch::{ScratchFile, ScratchRegistry};
use crate::settings::private::PrivateConfig;
use crate::storage::fs as vfs;

/// Mode given to a newly created ciphertext file.
const CIPHERTEXT_MODE: u32 = 0o644;

/// Result of an interactive edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    /// Whether the plaintext differs from what was decrypted.
    pub changed: bool,
    /// SHA-256 of the plaintext that was encrypted, hex encoded.
    pub digest: String,
}

/// Encrypts and decrypts files against the recipient policy.
pub struct SecretStore<'a> {
    identity: &'a AgeKeyPair,
    policy_path: PathBuf,
    scratch: ScratchRegistry,
    scratch_dir: PathBuf,
    normalize_policy: bool,
}

impl<'a> SecretStore<'a> {
    /// A store decrypting with `identity` and resolving recipients from the
    /// policy file at `policy_path`.
    pub fn new(identity: &'a AgeKeyPair, policy_path: impl Into<PathBuf>) -> Self {
        Self {
            identity,
            policy_path: policy_path.into(),
            scratch: ScratchRegistry::new(),
            scratch_dir: std::env::temp_dir(),
            normalize_policy: false,
        }
    }

    /// Directory that scratch plaintext files are created in.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Share `registry` so an outside signal watcher can purge scratch files.
    pub fn with_registry(mut self, registry: ScratchRegistry) -> Self {
        self.scratch = registry;
        self
    }

    /// Rewrite the recipient field in canonical form when `rekey` edits it.
    pub fn normalize_policy(mut self, yes: bool) -> Self {
        self.normalize_policy = yes;
        self
    }

    pub fn registry(&self) -> &ScratchRegistry {
        &self.scratch
    }

    pub fn policy_path(&self) -> &Path {
        &self.policy_path
    }

    pub fn identity(&self) -> &AgeKeyPair {
        self.identity
    }

    /// Recipients the policy grants for `path`.
    ///
    /// # Errors
    ///
    /// `VaultError::ConfigFileNotFound` when the policy file is missing,
    /// `VaultError::NoRecipients` when no rule grants any key for `path`.
    pub fn recipients_for(&self, path: &Path) -> Result<Vec<x25519::Recipient>> {
        let policy = Policy::load(&self.policy_path)?;
        policy.recipients_for(&self.policy_dir(), path)
    }

    /// Replace the plaintext file at `path` with its encryption.
    pub fn encrypt_in_place(&self, path: &Path) -> Result<()> {
        let plaintext = read_existing(path).map(Zeroizing::new)?;
        if encryption::is_age_ciphertext(&plaintext) {
            return Err(VaultError::EncryptionFailed(format!(
                "{} is already encrypted",
                path.display()
            )));
        }
        self.write_encrypted(path, &plaintext)?;
        log::info!("encrypted {}", path.display());
        Ok(())
    }

    /// Decrypt `path` into a scratch file that is removed when dropped.
    pub fn decrypt_to_temp(&self, path: &Path) -> Result<ScratchFile> {
        let plaintext = self.decrypt_to_memory(path)?;
        ScratchFile::create(&self.scratch, &self.scratch_dir, &suffix_of(path), &plaintext)
    }

    /// Decrypt `path` into a buffer wiped on drop.
    ///
    /// # Errors
    ///
    /// `VaultError::ConfigFileNotFound` when `path` is missing,
    /// `VaultError::DecryptionFailed` when the identity is not a recipient
    /// or the ciphertext is malformed.
    pub fn decrypt_to_memory(&self, path: &Path) -> Result<Zeroizing<Vec<u8>>> {
        let ciphertext = read_existing(path)?;
        encryption::decrypt(
            self.identity.identity(),
            &ciphertext,
            &path.display().to_string(),
        )
    }

    /// Open the decrypted content of `path` in `editor`, then encrypt the
    /// result back to `path`.
    ///
    /// When the editor fails nothing is written and the error is returned.
    pub fn edit(&self, path: &Path, editor: &mut dyn Editor) -> Result<EditOutcome> {
        // Resolve recipients first so a policy problem surfaces before any
        // editing work can be lost.
        let recipients = self.recipients_for(path)?;
        let scratch = self.decrypt_to_temp(path)?;
        let before = digest(&scratch.read()?);

        editor.edit(scratch.path())?;

        let plaintext = scratch.read()?;
        warn_if_not_yaml(path, &plaintext);
        let after = digest(&plaintext);
        self.write_with(path, &recipients, &plaintext)?;
        drop(scratch);

        let changed = after != before;
        if changed {
            log::info!("{} updated", path.display());
        } else {
            log::info!("{} unchanged; re-encrypted", path.display());
        }
        Ok(EditOutcome {
            changed,
            digest: after,
        })
    }

    /// Write the decrypted content of `path` to `out`.
    pub fn view(&self, path: &Path, out: &mut dyn Write) -> Result<()> {
        let scratch = self.decrypt_to_temp(path)?;
        let plaintext = scratch.read()?;
        out.write_all(&plaintext)?;
        out.flush()?;
        Ok(())
    }

    /// Create the encrypted file at `path` from `template`.
    ///
    /// The template is edited in a scratch file and only ciphertext is ever
    /// written to `path`. An existing `path` is edited instead.
    pub fn init(&self, template: &Path, path: &Path, editor: &mut dyn Editor) -> Result<EditOutcome> {
        if path.exists() {
            log::info!("{} already exists; editing it", path.display());
            return self.edit(path, editor);
        }

        let recipients = self.recipients_for(path)?;
        let initial = read_existing(template).map(Zeroizing::new)?;
        let scratch = ScratchFile::create(&self.scratch, &self.scratch_dir, &suffix_of(path), &initial)?;

        editor.edit(scratch.path())?;

        let plaintext = scratch.read()?;
        warn_if_not_yaml(path, &plaintext);
        let after = digest(&plaintext);
        self.write_with(path, &recipients, &plaintext)?;
        drop(scratch);

        log::info!("created {} from {}", path.display(), template.display());
        Ok(EditOutcome {
            changed: after != digest(&initial),
            digest: after,
        })
    }

    /// Grant `public_key` access to `path` and re-encrypt it so the new key
    /// can decrypt the existing content.
    pub fn rekey(&self, path: &Path, public_key: &str) -> Result<PolicyUpdate> {
        // Decrypt before touching the policy so an unreadable file leaves
        // the policy unchanged.
        let plaintext = self.decrypt_to_memory(path)?;
        let update = PolicyEditor::new(&self.policy_path)
            .for_file(path)
            .normalize(self.normalize_policy)
            .ensure_recipient(public_key)?;

        let recipients = self.recipients_for(path)?;
        let key = public_key.trim();
        if !recipients.iter().any(|r| r.to_string() == key) {
            return Err(VaultError::PolicyParseAmbiguous(format!(
                "{} does not grant {key} access to {} after the update; review it manually",
                self.policy_path.display(),
                path.display()
            )));
        }
        self.write_with(path, &recipients, &plaintext)?;
        log::info!("re-encrypted {} for the updated recipient set", path.display());
        Ok(update)
    }

    /// Re-encrypt `path` against the current policy without changing its
    /// content. Keys removed from the policy lose access to the new bytes.
    pub fn reencrypt(&self, path: &Path) -> Result<()> {
        let plaintext = self.decrypt_to_memory(path)?;
        self.write_encrypted(path, &plaintext)?;
        log::info!("re-encrypted {}", path.display());
        Ok(())
    }

    /// Decrypt `path` in memory and check it is a well-formed private
    /// settings document.
    pub fn validate(&self, path: &Path) -> Result<PrivateConfig> {
        let plaintext = self.decrypt_to_memory(path)?;
        PrivateConfig::from_yaml(&plaintext, &path.display().to_string())
    }

    // ── internals ────────────────────────────────────────────────────────

    fn policy_dir(&self) -> PathBuf {
        match self.policy_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn write_encrypted(&self, path: &Path, plaintext: &[u8]) -> Result<()> {
        let recipients = self.recipients_for(path)?;
        self.write_with(path, &recipients, plaintext)
    }

    fn write_with(&self, path: &Path, recipients: &[x25519::Recipient], plaintext: &[u8]) -> Result<()> {
        let ciphertext = encryption::encrypt(recipients, plaintext)?;
        let mode = vfs::mode_of(path).unwrap_or(CIPHERTEXT_MODE);
        vfs::write_atomic(path, &ciphertext, Some(mode))?;
        log::debug!(
            "wrote {} for {} recipient(s)",
            path.display(),
            recipients.len()
        );
        Ok(())
    }
}

fn read_existing(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            VaultError::ConfigFileNotFound(path.display().to_string())
        } else {
            VaultError::from_io(path, e)
        }
    })
}

fn suffix_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn warn_if_not_yaml(path: &Path, plaintext: &[u8]) {
    if let Err(e) = serde_yaml::from_slice::<serde_yaml::Value>(plaintext) {
        log::warn!("{} is not valid YAML after editing: {e}", path.display());
    }
}
