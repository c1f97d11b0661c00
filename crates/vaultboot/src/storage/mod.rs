//! Storage layer for the identity file and other on-disk artifacts.
//!
//! # Layout
//!
//! ```text
//! ~/.config/sops/age/          (0700)
//! └── keys.txt                 (0600)  identity, age-keygen format
//!
//! <project>/
//! ├── .sops.yaml                       recipient policy
//! ├── .sops.yaml.backup-<stamp>        written before each policy mutation
//! └── config/
//!     ├── public.yml                   plaintext settings
//!     └── private.yml                  age ciphertext
//! ```
//!
//! # Modules
//!
//! - [`fs`]: atomic replacement, permissions, backups, secure deletion.
//! - [`identity_file`]: the key manager: generate, inspect, export, import.

pub mod fs;
pub mod identity_file;

pub use identity_file::{default_key_file, ImportOutcome, KeyManager, KEY_FILE_ENV};

/// Answers a yes/no question before a destructive step.
///
/// Closures work directly: `&mut |_: &str| true`.
pub trait Confirmation {
    /// Return `true` to proceed.
    fn confirm(&mut self, question: &str) -> bool;
}

impl<F> Confirmation for F
where
    F: FnMut(&str) -> bool,
{
    fn confirm(&mut self, question: &str) -> bool {
        self(question)
    }
}
