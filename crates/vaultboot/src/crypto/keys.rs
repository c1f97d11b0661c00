//! age X25519 key pairs and the key-file text format.
//!
//! A key file holds one identity plus two comment lines:
//!
//! ```text
//! # created: 2026-01-19T14:30:05Z
//! # public key: age1...
//! AGE-SECRET-KEY-1...
//! ```
//!
//! The `# public key:` marker lets the public half be recovered without
//! touching the secret line.

use std::str::FromStr;

use age::x25519;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};
use crate::time;

/// Comment marker preceding the embedded public key.
pub const PUBLIC_KEY_MARKER: &str = "# public key:";
/// Comment marker preceding the creation stamp.
pub const CREATED_MARKER: &str = "# created:";
/// Prefix of every age X25519 secret key.
pub const SECRET_KEY_PREFIX: &str = "AGE-SECRET-KEY-1";
/// Prefix of every age X25519 public key.
pub const PUBLIC_KEY_PREFIX: &str = "age1";

/// The local encryption identity.
///
/// The secret half never leaves this struct except through
/// [`AgeKeyPair::to_key_file`], which returns a zeroizing buffer.
pub struct AgeKeyPair {
    identity: x25519::Identity,
    public_key: String,
    created_at: Option<DateTime<Utc>>,
}

impl AgeKeyPair {
    /// Generate a new random identity stamped with the current time.
    pub fn generate() -> Self {
        let identity = x25519::Identity::generate();
        let public_key = identity.to_public().to_string();
        Self {
            identity,
            public_key,
            created_at: Some(time::now()),
        }
    }

    /// Parse the contents of a key file.
    ///
    /// The first non-comment line must be an `AGE-SECRET-KEY-1` string. When
    /// a `# public key:` marker is present it must agree with the key derived
    /// from the secret.
    pub fn from_key_file(contents: &str) -> Result<Self> {
        let secret_line = contents
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'))
            .ok_or_else(|| corrupt("no secret key line"))?;

        if !secret_line.starts_with(SECRET_KEY_PREFIX) {
            return Err(corrupt("secret key line has an unexpected prefix"));
        }

        let identity = x25519::Identity::from_str(secret_line)
            .map_err(|e| corrupt(&format!("unparsable secret key: {e}")))?;
        let public_key = identity.to_public().to_string();

        if let Some(marked) = public_key_from_marker(contents) {
            if marked != public_key {
                return Err(corrupt(
                    "public key marker does not match the secret key",
                ));
            }
        }

        let created_at = contents.lines().find_map(|l| {
            l.trim()
                .strip_prefix(CREATED_MARKER)
                .and_then(time::from_key_file_stamp)
        });

        Ok(Self {
            identity,
            public_key,
            created_at,
        })
    }

    /// Render the key file. The caller writes it with owner-only permissions.
    pub fn to_key_file(&self) -> Zeroizing<String> {
        let created = self.created_at.unwrap_or_else(time::now);
        let secret = self.identity.to_string();
        Zeroizing::new(format!(
            "{CREATED_MARKER} {}\n{PUBLIC_KEY_MARKER} {}\n{}\n",
            time::to_key_file_stamp(created),
            self.public_key,
            secret.expose_secret(),
        ))
    }

    /// The identity used for decryption.
    pub fn identity(&self) -> &x25519::Identity {
        &self.identity
    }

    /// The recipient that encrypts to this identity.
    pub fn recipient(&self) -> x25519::Recipient {
        self.identity.to_public()
    }

    /// The public key string (`age1...`).
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Creation time, when the key file recorded one.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

impl std::fmt::Debug for AgeKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgeKeyPair")
            .field("public_key", &self.public_key)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Return the public key recorded after the `# public key:` marker, if any.
pub fn public_key_from_marker(contents: &str) -> Option<&str> {
    contents.lines().find_map(|l| {
        l.trim()
            .strip_prefix(PUBLIC_KEY_MARKER)
            .map(str::trim)
            .filter(|k| !k.is_empty())
    })
}

/// Parse a public key into a recipient.
pub fn parse_recipient(s: &str) -> Result<x25519::Recipient> {
    let s = s.trim();
    if !s.starts_with(PUBLIC_KEY_PREFIX) {
        return Err(VaultError::InvalidKey(format!(
            "public key must start with `{PUBLIC_KEY_PREFIX}`"
        )));
    }
    x25519::Recipient::from_str(s)
        .map_err(|e| VaultError::InvalidKey(format!("unparsable public key: {e}")))
}

/// Whether `s` is a syntactically valid age X25519 public key.
pub fn is_valid_public_key(s: &str) -> bool {
    parse_recipient(s).is_ok()
}

fn corrupt(reason: &str) -> VaultError {
    VaultError::KeyFileCorrupt {
        path: "<key file>".to_string(),
        reason: reason.to_string(),
    }
}
