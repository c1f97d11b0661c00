//! The merged, validated settings model.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::settings::private::Passphrase;

/// Logging verbosity from the public document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug = 0,
    #[default]
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    /// Parse a configured value. Blank means the default; an unknown value
    /// is logged and replaced by the default.
    pub fn from_config(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::default(),
            Some(v) => v.parse().unwrap_or_else(|_| {
                log::warn!(
                    "unrecognized log_level `{v}`; using `{}`",
                    Self::default()
                );
                Self::default()
            }),
        }
    }

    /// Numeric ordinal: debug=0, info=1, warn=2, error=3.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Maximum level for the `log` facade.
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            Self::Debug => log::LevelFilter::Debug,
            Self::Info => log::LevelFilter::Info,
            Self::Warn => log::LevelFilter::Warn,
            Self::Error => log::LevelFilter::Error,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Commit author details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
    pub signing_key: Option<String>,
}

/// SSH key generation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ssh {
    pub key_type: String,
    pub email: String,
    pub passphrase: Passphrase,
}

/// Remote repository to clone during provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repository {
    pub url: String,
    pub branch: String,
    pub directory: PathBuf,
    pub auto_update: bool,
}

/// One filesystem mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub target: PathBuf,
    pub options: Vec<String>,
    pub dump: u32,
    pub fsck: u32,
    pub permissions: MountPermissions,
}

/// Ownership and mode applied to a mount target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountPermissions {
    #[serde(serialize_with = "octal")]
    pub mode: u32,
    pub owner: String,
    pub group: String,
}

fn octal<S: Serializer>(mode: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{mode:04o}"))
}

/// Which optional features the settings enable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Features {
    pub identity: bool,
    pub signing: bool,
    pub ssh: bool,
    pub repository: bool,
    pub mounts: bool,
}

impl Features {
    /// Names accepted by [`Features::get`].
    pub const NAMES: [&'static str; 5] = ["identity", "signing", "ssh", "repository", "mounts"];

    pub fn get(&self, name: &str) -> Option<bool> {
        match name {
            "identity" => Some(self.identity),
            "signing" => Some(self.signing),
            "ssh" => Some(self.ssh),
            "repository" => Some(self.repository),
            "mounts" => Some(self.mounts),
            _ => None,
        }
    }
}

/// A value in the flattened settings view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Mounts(Vec<Mount>),
}

impl SettingValue {
    /// Plain-text rendering used for shell output. Mount lists render as
    /// JSON.
    pub fn render(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Str(s) => s.clone(),
            Self::Mounts(m) => serde_json::to_string(m).unwrap_or_else(|_| "[]".to_string()),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

/// Validated settings with every default applied.
///
/// An optional section that was absent, or explicitly disabled, is `None`
/// (or empty for mounts) and its feature flag is off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub user: String,
    pub home_dir: PathBuf,
    pub log_level: LogLevel,
    pub versions: BTreeMap<String, String>,
    pub identity: Option<Identity>,
    pub ssh: Option<Ssh>,
    pub repository: Option<Repository>,
    pub mounts: Vec<Mount>,
}

impl Settings {
    pub fn features(&self) -> Features {
        Features {
            identity: self.identity.is_some(),
            signing: self
                .identity
                .as_ref()
                .and_then(|i| i.signing_key.as_deref())
                .is_some_and(|k| !k.is_empty()),
            ssh: self.ssh.is_some(),
            repository: self.repository.is_some(),
            mounts: !self.mounts.is_empty(),
        }
    }

    /// Stable dotted setting names mapped to typed values.
    ///
    /// The SSH passphrase is reported only as `ssh.has_passphrase`.
    pub fn flatten(&self) -> BTreeMap<String, SettingValue> {
        let features = self.features();
        let mut out = BTreeMap::new();
        let mut put = |k: &str, v: SettingValue| {
            out.insert(k.to_string(), v);
        };

        put("user", self.user.as_str().into());
        put("home_dir", self.home_dir.display().to_string().into());
        put("log_level", self.log_level.as_str().into());
        put("log_level_ordinal", SettingValue::Int(i64::from(self.log_level.ordinal())));
        for (tool, pin) in &self.versions {
            put(&format!("versions.{tool}"), pin.as_str().into());
        }

        put("identity.enabled", features.identity.into());
        put("signing.enabled", features.signing.into());
        if let Some(identity) = &self.identity {
            put("identity.name", identity.name.as_str().into());
            put("identity.email", identity.email.as_str().into());
            if let Some(key) = &identity.signing_key {
                put("identity.signing_key", key.as_str().into());
            }
        }

        put("ssh.enabled", features.ssh.into());
        if let Some(ssh) = &self.ssh {
            put("ssh.key_type", ssh.key_type.as_str().into());
            put("ssh.email", ssh.email.as_str().into());
            put("ssh.has_passphrase", (!ssh.passphrase.is_empty()).into());
        }

        put("repository.enabled", features.repository.into());
        if let Some(repo) = &self.repository {
            put("repository.url", repo.url.as_str().into());
            put("repository.branch", repo.branch.as_str().into());
            put("repository.directory", repo.directory.display().to_string().into());
            put("repository.auto_update", repo.auto_update.into());
        }

        put("mounts.enabled", features.mounts.into());
        put("mounts", SettingValue::Mounts(self.mounts.clone()));
        out
    }

    /// One flattened value by name.
    pub fn get(&self, name: &str) -> Option<SettingValue> {
        self.flatten().remove(name)
    }
}
