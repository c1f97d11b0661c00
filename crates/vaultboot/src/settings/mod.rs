//! Public and private settings documents and the merged model.
//!
//! - [`public`]: the plaintext document (`config/public.yml`).
//! - [`private`]: the decrypted private document (`config/private.yml`).
//! - [`model`]: the validated [`Settings`] handed to consumers.
//! - [`loader`]: reads, decrypts, validates and merges both documents.

pub mod loader;
pub mod model;
pub mod private;
pub mod public;

pub use loader::{ConfigLoader, LoadOptions};
pub use model::{Features, LogLevel, Mount, SettingValue, Settings};
pub use private::{Passphrase, PrivateConfig};
pub use public::PublicConfig;

use serde::de::DeserializeOwned;

use crate::error::{Result, VaultError};

/// Default location of the public settings file.
pub const DEFAULT_PUBLIC_FILE: &str = "config/public.yml";

/// Parse a YAML document, treating an empty or comment-only document as
/// all defaults.
pub(crate) fn parse_document<T>(bytes: &[u8], label: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let invalid = |reason: String| VaultError::InvalidConfigFormat {
        path: label.to_string(),
        reason,
    };

    let text = std::str::from_utf8(bytes).map_err(|e| invalid(format!("not UTF-8: {e}")))?;
    if text
        .lines()
        .all(|l| l.trim().is_empty() || l.trim_start().starts_with('#'))
    {
        return Ok(T::default());
    }

    let value: serde_yaml::Value = serde_yaml::from_str(text).map_err(|e| invalid(e.to_string()))?;
    if value.is_null() {
        return Ok(T::default());
    }
    if !value.is_mapping() {
        return Err(invalid("top level must be a mapping".to_string()));
    }
    serde_yaml::from_value(value).map_err(|e| invalid(e.to_string()))
}

/// Render a YAML scalar as a string; `None` for sequences and mappings.
pub(crate) fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
