//! Cryptographic primitives for Vaultboot.
//!
//! Nothing here implements cryptography; it wraps the age file format:
//! - X25519 identity generation and the `age-keygen` key-file layout
//! - whole-file encryption to a recipient set, ASCII-armored
//! - decryption with the local identity

pub mod encryption;
pub mod keys;
