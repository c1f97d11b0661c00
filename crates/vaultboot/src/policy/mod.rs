//! Recipient policy: which public keys may decrypt which files.
//!
//! The policy file is `.sops.yaml`-shaped: a top-level `creation_rules`
//! list, each rule with a `path_regex` and an `age` recipient field. The
//! recipient field is read in either serialization (block scalar or
//! sequence) and edited in place without disturbing anything else.
//!
//! - [`document`]: structured read model and path matching.
//! - [`editor`]: idempotent insertion of a recipient key.

pub mod document;
pub mod editor;

pub use document::{Policy, PolicyRule, RecipientStyle};
pub use editor::{PolicyEditor, PolicyUpdate};

/// Default policy file name, at the project root.
pub const DEFAULT_POLICY_FILE: &str = ".sops.yaml";

/// Path pattern written for the private settings file.
pub const PRIVATE_PATH_REGEX: &str = r"config/private[^/]*\.ya?ml$";

/// Representative path used to find the rule governing private settings.
pub const PRIVATE_SAMPLE_PATH: &str = "config/private.yml";
