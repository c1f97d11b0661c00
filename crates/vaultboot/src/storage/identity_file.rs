//! Key manager: lifecycle of the local age identity.
//!
//! The identity lives in a single key file (default
//! `~/.config/sops/age/keys.txt`, overridable through `SOPS_AGE_KEY_FILE`)
//! with mode 0600 inside a 0700 directory. Generation and import never
//! replace an existing identity without explicit confirmation.

use std::fs;
use std::path::{Path, PathBuf};

use crate::crypto::keys::{self, AgeKeyPair};
use crate::error::{Result, VaultError};
use crate::storage::fs::{self as vfs, Removal, OWNER_ONLY_FILE};
use crate::storage::Confirmation;

/// Environment variable the encryption tooling reads to find the key file.
pub const KEY_FILE_ENV: &str = "SOPS_AGE_KEY_FILE";

/// Key file location relative to the home directory.
const DEFAULT_KEY_FILE: &[&str] = &[".config", "sops", "age", "keys.txt"];

/// Resolve the key file: `$SOPS_AGE_KEY_FILE` when set, otherwise the
/// default location under the home directory.
pub fn default_key_file() -> Result<PathBuf> {
    if let Some(p) = std::env::var_os(KEY_FILE_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(p));
    }
    let home = dirs::home_dir()
        .ok_or_else(|| VaultError::PrerequisiteMissing("a home directory".to_string()))?;
    Ok(DEFAULT_KEY_FILE
        .iter()
        .fold(home, |acc, part| acc.join(part)))
}

/// Result of a successful import.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    /// Public key of the imported identity.
    pub public_key: String,
    /// How the transfer file was removed.
    pub source_removal: Removal,
}

/// Generates, inspects, exports and imports the identity at one key file.
#[derive(Debug, Clone)]
pub struct KeyManager {
    key_file: PathBuf,
}

impl KeyManager {
    /// Manage the identity stored at `key_file`.
    pub fn new(key_file: impl Into<PathBuf>) -> Self {
        Self {
            key_file: key_file.into(),
        }
    }

    /// Manage the identity at [`default_key_file`].
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(default_key_file()?))
    }

    /// Path of the key file.
    pub fn key_file(&self) -> &Path {
        &self.key_file
    }

    /// Whether an identity is present.
    pub fn exists(&self) -> bool {
        self.key_file.is_file()
    }

    /// Create a new identity and return it.
    ///
    /// An existing identity is replaced only if `confirm` agrees.
    ///
    /// # Errors
    ///
    /// `VaultError::Declined` if overwrite was refused,
    /// `VaultError::PermissionDenied` if the directory cannot be created or
    /// secured.
    pub fn generate(&self, confirm: &mut dyn Confirmation) -> Result<AgeKeyPair> {
        self.guard_overwrite(confirm, "generate a new identity")?;

        let pair = AgeKeyPair::generate();
        self.persist(&pair.to_key_file())?;

        log::info!(
            "generated identity {} at {}",
            pair.public_key(),
            self.key_file.display()
        );
        Ok(pair)
    }

    /// Load the full identity.
    ///
    /// # Errors
    ///
    /// `VaultError::KeyFileNotFound` or `VaultError::KeyFileCorrupt`.
    pub fn load(&self) -> Result<AgeKeyPair> {
        let contents = self.read_key_file()?;
        AgeKeyPair::from_key_file(&contents).map_err(|e| self.with_path(e))
    }

    /// Recover the public key from the `# public key:` marker without
    /// parsing the secret.
    ///
    /// # Errors
    ///
    /// `VaultError::KeyFileNotFound` if there is no key file,
    /// `VaultError::KeyFileCorrupt` if the marker is absent or invalid.
    pub fn extract_public_key(&self) -> Result<String> {
        let contents = self.read_key_file()?;
        let marked = keys::public_key_from_marker(&contents).ok_or_else(|| {
            VaultError::KeyFileCorrupt {
                path: self.key_file.display().to_string(),
                reason: format!("missing `{}` line", keys::PUBLIC_KEY_MARKER),
            }
        })?;
        if !keys::is_valid_public_key(marked) {
            return Err(VaultError::KeyFileCorrupt {
                path: self.key_file.display().to_string(),
                reason: "embedded public key is not a valid age recipient".to_string(),
            });
        }
        Ok(marked.to_string())
    }

    /// Copy the key file to `destination` with owner-only permissions.
    ///
    /// Moving the copy off the machine is the caller's business.
    pub fn export(&self, destination: &Path) -> Result<()> {
        let contents = self.read_key_file()?;
        if destination == self.key_file {
            return Err(VaultError::Declined(
                "export destination is the key file itself".to_string(),
            ));
        }
        vfs::write_atomic(destination, contents.as_bytes(), Some(OWNER_ONLY_FILE))?;
        log::info!("exported identity to {}", destination.display());
        Ok(())
    }

    /// Install the identity from `source`, then remove `source`.
    ///
    /// The source is validated before anything is overwritten. Removal of
    /// the source overwrites it first when possible.
    ///
    /// # Errors
    ///
    /// `VaultError::ImportSourceNotFound` if `source` does not exist,
    /// `VaultError::KeyFileCorrupt` if it is not a key file,
    /// `VaultError::Declined` if overwrite of an existing identity was refused.
    pub fn import(&self, source: &Path, confirm: &mut dyn Confirmation) -> Result<ImportOutcome> {
        if !source.is_file() {
            return Err(VaultError::ImportSourceNotFound(source.display().to_string()));
        }
        let contents = zeroize::Zeroizing::new(
            fs::read_to_string(source).map_err(|e| VaultError::from_io(source, e))?,
        );
        let pair = AgeKeyPair::from_key_file(&contents).map_err(|e| match e {
            VaultError::KeyFileCorrupt { reason, .. } => VaultError::KeyFileCorrupt {
                path: source.display().to_string(),
                reason,
            },
            other => other,
        })?;

        self.guard_overwrite(confirm, "import over the existing identity")?;

        // Rewrite through the canonical renderer so the marker line is always present.
        self.persist(&pair.to_key_file())?;

        let source_removal = vfs::secure_delete(source)?;
        if source_removal == Removal::Unlinked {
            log::warn!(
                "{} was removed without an overwrite pass",
                source.display()
            );
        }

        log::info!("imported identity {}", pair.public_key());
        Ok(ImportOutcome {
            public_key: pair.public_key().to_string(),
            source_removal,
        })
    }

    fn guard_overwrite(&self, confirm: &mut dyn Confirmation, action: &str) -> Result<()> {
        if !self.exists() {
            return Ok(());
        }
        let question = format!(
            "An identity already exists at {}. Overwrite it and {action}?",
            self.key_file.display()
        );
        if confirm.confirm(&question) {
            log::warn!("replacing identity at {}", self.key_file.display());
            Ok(())
        } else {
            Err(VaultError::Declined(format!(
                "kept existing identity at {}",
                self.key_file.display()
            )))
        }
    }

    fn persist(&self, contents: &str) -> Result<()> {
        if let Some(dir) = self.key_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            vfs::ensure_private_dir(dir)?;
        }
        vfs::write_atomic(&self.key_file, contents.as_bytes(), Some(OWNER_ONLY_FILE))
    }

    fn read_key_file(&self) -> Result<zeroize::Zeroizing<String>> {
        match fs::read_to_string(&self.key_file) {
            Ok(s) => Ok(zeroize::Zeroizing::new(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                VaultError::KeyFileNotFound(self.key_file.display().to_string()),
            ),
            Err(e) => Err(VaultError::from_io(&self.key_file, e)),
        }
    }

    fn with_path(&self, err: VaultError) -> VaultError {
        match err {
            VaultError::KeyFileCorrupt { reason, .. } => VaultError::KeyFileCorrupt {
                path: self.key_file.display().to_string(),
                reason,
            },
            other => other,
        }
    }
}
