//! The decrypted private settings document.
//!
//! Sections are optional; an absent section disables the feature it
//! describes. Fields inside a present section are optional too and receive
//! defaults when the model is built.

use std::fmt;

use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::Result;
use crate::settings::parse_document;

/// `config/private.yml` after decryption.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrivateConfig {
    pub identity: Option<IdentitySection>,
    pub ssh: Option<SshSection>,
    pub repository: Option<RepositorySection>,
    pub mounts: Option<Vec<MountSection>>,
}

impl PrivateConfig {
    /// Parse decrypted bytes; `label` names the document in errors.
    ///
    /// # Errors
    ///
    /// `VaultError::InvalidConfigFormat` on malformed structure.
    pub fn from_yaml(bytes: &[u8], label: &str) -> Result<Self> {
        parse_document(bytes, label)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentitySection {
    pub name: Option<String>,
    pub email: Option<String>,
    pub signing_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SshSection {
    pub enable: Option<bool>,
    pub key_type: Option<String>,
    pub email: Option<String>,
    pub passphrase: Option<Passphrase>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RepositorySection {
    pub enable: Option<bool>,
    pub url: Option<String>,
    pub branch: Option<String>,
    pub directory: Option<String>,
    pub auto_update: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MountSection {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub source: Option<String>,
    pub target: Option<String>,
    pub options: Option<Vec<String>>,
    pub dump: Option<u32>,
    pub fsck: Option<u32>,
    pub permissions: Option<PermissionsSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PermissionsSection {
    /// Octal mode, written either as `"0755"` or a bare `0755`.
    pub mode: Option<serde_yaml::Value>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

/// A secret string wiped from memory on drop and never printed.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Passphrase(<empty>)")
        } else {
            f.write_str("Passphrase(<redacted>)")
        }
    }
}
