//! Encrypted secret files.
//!
//! - [`scratch`]: scoped plaintext temp files and the registry that purges
//!   them on interruption.
//! - [`editor`]: the external editor seam.
//! - [`store`]: encrypt, decrypt, edit, view, init, rekey and re-encrypt.

pub mod editor;
pub mod scratch;
pub mod store;

pub use editor::{CommandEditor, Editor};
pub use scratch::{ScratchFile, ScratchRegistry};
pub use store::{EditOutcome, SecretStore};

/// Default location of the private settings file.
pub const DEFAULT_SECRET_FILE: &str = "config/private.yml";

/// Default template used by `init`.
pub const DEFAULT_TEMPLATE_FILE: &str = "config/private.example.yml";
