//! Whole-file age encryption.
//!
//! Ciphertext is written ASCII-armored so it diffs and commits cleanly.
//! Decryption accepts both armored and binary age files.

use std::io::{Read, Write};

use age::armor::{ArmoredReader, ArmoredWriter, Format};
use age::x25519;
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

/// First line of an armored age file.
pub const ARMOR_HEADER: &str = "-----BEGIN AGE ENCRYPTED FILE-----";
/// Magic prefix of a binary age file.
const BINARY_MAGIC: &[u8] = b"age-encryption.org/";

/// Encrypt `plaintext` so that any of `recipients` can decrypt it.
///
/// # Errors
///
/// `VaultError::EncryptionFailed` if the recipient list is empty or the
/// stream cannot be written.
pub fn encrypt(recipients: &[x25519::Recipient], plaintext: &[u8]) -> Result<Vec<u8>> {
    if recipients.is_empty() {
        return Err(VaultError::EncryptionFailed(
            "at least one recipient is required".to_string(),
        ));
    }

    let encryptor =
        age::Encryptor::with_recipients(recipients.iter().map(|r| r as &dyn age::Recipient))
            .map_err(|e| VaultError::EncryptionFailed(format!("encryptor: {e}")))?;

    let mut out = Vec::new();
    let armored = ArmoredWriter::wrap_output(&mut out, Format::AsciiArmor)
        .map_err(|e| VaultError::EncryptionFailed(format!("armor: {e}")))?;
    let mut writer = encryptor
        .wrap_output(armored)
        .map_err(|e| VaultError::EncryptionFailed(format!("stream: {e}")))?;
    writer
        .write_all(plaintext)
        .map_err(|e| VaultError::EncryptionFailed(format!("write: {e}")))?;
    writer
        .finish()
        .and_then(|armor| armor.finish())
        .map_err(|e| VaultError::EncryptionFailed(format!("finish: {e}")))?;

    Ok(out)
}

/// Decrypt `ciphertext` with `identity`. `label` names the source in errors.
///
/// # Errors
///
/// `VaultError::DecryptionFailed` when the identity is not a recipient of
/// the file or the ciphertext is malformed.
pub fn decrypt(
    identity: &x25519::Identity,
    ciphertext: &[u8],
    label: &str,
) -> Result<Zeroizing<Vec<u8>>> {
    let failed = |reason: String| VaultError::DecryptionFailed {
        path: label.to_string(),
        reason,
    };

    let decryptor =
        age::Decryptor::new(ArmoredReader::new(ciphertext)).map_err(|e| failed(e.to_string()))?;
    let mut reader = decryptor
        .decrypt(std::iter::once(identity as &dyn age::Identity))
        .map_err(|e| failed(e.to_string()))?;

    let mut plaintext = Zeroizing::new(Vec::new());
    reader
        .read_to_end(&mut plaintext)
        .map_err(|e| failed(e.to_string()))?;
    Ok(plaintext)
}

/// Whether `bytes` look like an age file (armored or binary).
pub fn is_age_ciphertext(bytes: &[u8]) -> bool {
    let trimmed = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|start| &bytes[start..])
        .unwrap_or_default();
    trimmed.starts_with(ARMOR_HEADER.as_bytes()) || trimmed.starts_with(BINARY_MAGIC)
}
