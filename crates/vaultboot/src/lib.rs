//! Vaultboot: encrypted provisioning configuration.
//!
//! Manages the local age identity, keeps the recipient policy file in
//! step with the keys that may decrypt the private settings file, runs
//! encrypt/decrypt/edit flows over that file without leaving plaintext
//! behind, and merges the public and private settings documents into
//! one validated model for downstream provisioning steps.

pub mod crypto;
pub mod env;
pub mod error;
pub mod policy;
pub mod secrets;
pub mod settings;
pub mod storage;
pub mod time;

// Re-export primary types
pub use crypto::keys::AgeKeyPair;
pub use error::{Result, VaultError};
pub use policy::{Policy, PolicyEditor, PolicyUpdate, RecipientStyle};
pub use secrets::{CommandEditor, EditOutcome, Editor, ScratchFile, ScratchRegistry, SecretStore};
pub use settings::{ConfigLoader, Features, LoadOptions, LogLevel, Settings};
pub use storage::{Confirmation, KeyManager};
