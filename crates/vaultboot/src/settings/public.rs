//! The public settings document.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

use crate::error::Result;
use crate::settings::{parse_document, scalar_to_string};

/// `config/public.yml` as written. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PublicConfig {
    pub user: Option<String>,
    #[serde(alias = "home")]
    pub home_dir: Option<String>,
    pub log_level: Option<String>,
    /// Tool version pins. Numeric pins such as `3.12` are kept as written.
    #[serde(deserialize_with = "version_pins")]
    pub versions: BTreeMap<String, String>,
}

impl PublicConfig {
    /// Parse the document; `label` names it in errors.
    ///
    /// # Errors
    ///
    /// `VaultError::InvalidConfigFormat` on malformed structure.
    pub fn from_yaml(bytes: &[u8], label: &str) -> Result<Self> {
        parse_document(bytes, label)
    }
}

fn version_pins<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_yaml::Value>> = Option::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|(tool, pin)| {
            scalar_to_string(&pin)
                .map(|v| (tool.clone(), v))
                .ok_or_else(|| {
                    <D::Error as serde::de::Error>::custom(format!(
                        "versions.{tool} must be a scalar"
                    ))
                })
        })
        .collect()
}
