//! Structured read model of the policy file.

use std::path::{Component, Path, PathBuf};

use age::x25519;
use regex::Regex;
use serde::Deserialize;

use crate::crypto::keys;
use crate::error::{Result, VaultError};

/// How a rule's recipient list is serialized on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientStyle {
    /// A block scalar (`age: >-`) with one key per line.
    ScalarBlock,
    /// A YAML sequence of quoted keys.
    List,
}

impl std::fmt::Display for RecipientStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipientStyle::ScalarBlock => write!(f, "scalar block"),
            RecipientStyle::List => write!(f, "list"),
        }
    }
}

/// One `creation_rules` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    /// Pattern the file path must match. `None` matches every path.
    pub path_regex: Option<String>,
    /// Authorized public keys, in file order.
    pub recipients: Vec<String>,
    /// Serialization of the recipient field; `None` when the rule has none.
    pub style: Option<RecipientStyle>,
}

impl PolicyRule {
    /// Whether any of `candidates` matches this rule's pattern.
    ///
    /// An invalid pattern matches nothing.
    pub fn matches(&self, candidates: &[String]) -> bool {
        let Some(pattern) = &self.path_regex else {
            return true;
        };
        match Regex::new(pattern) {
            Ok(re) => candidates.iter().any(|c| re.is_match(c)),
            Err(e) => {
                log::warn!("ignoring policy rule with invalid path_regex `{pattern}`: {e}");
                false
            }
        }
    }

    /// Whether `key` is among this rule's recipients.
    pub fn grants(&self, key: &str) -> bool {
        let key = key.trim();
        self.recipients.iter().any(|r| r == key)
    }
}

/// The parsed policy file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    pub rules: Vec<PolicyRule>,
}

#[derive(Deserialize)]
struct RawPolicy {
    #[serde(default)]
    creation_rules: Option<Vec<RawRule>>,
}

#[derive(Deserialize)]
struct RawRule {
    #[serde(default)]
    path_regex: Option<String>,
    #[serde(default)]
    age: Option<RawRecipients>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRecipients {
    List(Vec<String>),
    Scalar(String),
}

impl Policy {
    /// Parse policy text. Both recipient serializations are accepted.
    ///
    /// # Errors
    ///
    /// `VaultError::PolicyParseAmbiguous` when the text is not a policy
    /// document.
    pub fn parse(text: &str) -> Result<Self> {
        if text
            .lines()
            .all(|l| l.trim().is_empty() || l.trim_start().starts_with('#'))
        {
            return Ok(Self::default());
        }

        let raw: RawPolicy = serde_yaml::from_str(text)
            .map_err(|e| VaultError::PolicyParseAmbiguous(format!("unparsable policy: {e}")))?;

        let rules = raw
            .creation_rules
            .unwrap_or_default()
            .into_iter()
            .map(|r| {
                let (recipients, style) = match r.age {
                    Some(RawRecipients::Scalar(s)) => {
                        (split_keys(&s), Some(RecipientStyle::ScalarBlock))
                    }
                    Some(RawRecipients::List(items)) => (
                        items.iter().flat_map(|i| split_keys(i)).collect(),
                        Some(RecipientStyle::List),
                    ),
                    None => (Vec::new(), None),
                };
                PolicyRule {
                    path_regex: r.path_regex,
                    recipients,
                    style,
                }
            })
            .collect();

        Ok(Self { rules })
    }

    /// Read and parse the policy file at `path`.
    ///
    /// # Errors
    ///
    /// `VaultError::ConfigFileNotFound` if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VaultError::ConfigFileNotFound(path.display().to_string())
            } else {
                VaultError::from_io(path, e)
            }
        })?;
        Self::parse(&text)
    }

    /// Index of the first rule matching any of `candidates`.
    pub fn rule_index_for(&self, candidates: &[String]) -> Option<usize> {
        self.rules.iter().position(|r| r.matches(candidates))
    }

    /// The first rule matching any of `candidates`.
    pub fn rule_for(&self, candidates: &[String]) -> Option<&PolicyRule> {
        self.rule_index_for(candidates).map(|i| &self.rules[i])
    }

    /// Recipients authorized for `file`, a path located relative to the
    /// directory holding the policy file.
    ///
    /// # Errors
    ///
    /// `VaultError::NoRecipients` when no rule matches or the matching rule
    /// lists no keys, `VaultError::InvalidKey` for an unparsable key.
    pub fn recipients_for(&self, policy_dir: &Path, file: &Path) -> Result<Vec<x25519::Recipient>> {
        let candidates = match_candidates(policy_dir, file);
        let rule = self
            .rule_for(&candidates)
            .filter(|r| !r.recipients.is_empty())
            .ok_or_else(|| VaultError::NoRecipients(file.display().to_string()))?;

        rule.recipients
            .iter()
            .map(|k| keys::parse_recipient(k))
            .collect()
    }
}

/// Split a recipient scalar on commas and whitespace.
fn split_keys(s: &str) -> Vec<String> {
    s.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Path strings tried against `path_regex`: the path as given, relative to
/// the policy directory, and absolute. Separators are always `/`.
pub fn match_candidates(policy_dir: &Path, file: &Path) -> Vec<String> {
    let abs_file = lexical_absolute(file);
    let abs_dir = lexical_absolute(policy_dir);

    let mut out = vec![slashed(file)];
    if let Ok(rel) = abs_file.strip_prefix(&abs_dir) {
        out.push(slashed(rel));
    }
    out.push(slashed(&abs_file));
    out.dedup();
    out
}

fn lexical_absolute(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };
    let mut out = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn slashed(path: &Path) -> String {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
        .replace("//", "/")
}
