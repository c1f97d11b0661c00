//! Error types for Vaultboot.
//!
//! Every fatal condition carries its cause and, where one exists, the
//! command that fixes it. Private key material and decrypted content are
//! never included in error messages.

use std::path::Path;

/// Error taxonomy covering key management, policy editing, secret files
/// and configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Prerequisite missing: {0} (install it or run the prerequisite installer first)")]
    PrerequisiteMissing(String),

    #[error("Permission denied: {path}: {reason}")]
    PermissionDenied { path: String, reason: String },

    #[error("Key file not found: {0} (run `vb-keys generate` or `vb-keys import <file>`)")]
    KeyFileNotFound(String),

    #[error("Key file corrupt: {path}: {reason}")]
    KeyFileCorrupt { path: String, reason: String },

    #[error("Import source not found: {0}")]
    ImportSourceNotFound(String),

    #[error("Configuration file not found: {0}")]
    ConfigFileNotFound(String),

    #[error("Invalid configuration format in {path}: {reason}")]
    InvalidConfigFormat { path: String, reason: String },

    #[error("Decryption failed for {path}: {reason} (is this identity among the file's recipients?)")]
    DecryptionFailed { path: String, reason: String },

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("No recipients authorized for {0} (run `vb-keys config` to add this machine's key)")]
    NoRecipients(String),

    #[error("Policy file needs manual review: {0}")]
    PolicyParseAmbiguous(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Declined: {0}")]
    Declined(String),

    #[error("Editor failed: {0}")]
    EditorFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Classify an I/O failure on `path`, promoting permission problems to
    /// [`VaultError::PermissionDenied`].
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            VaultError::PermissionDenied {
                path: path.display().to_string(),
                reason: err.to_string(),
            }
        } else {
            VaultError::Io(err)
        }
    }

    /// Whether the condition is recoverable (logged and continued) rather
    /// than fatal for the current operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, VaultError::PolicyParseAmbiguous(_))
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, VaultError>;
