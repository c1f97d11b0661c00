//! Loading and merging the settings documents.

use std::fs;
use std::path::{Path, PathBuf};

use crate::crypto::encryption;
use crate::error::{Result, VaultError};
use crate::secrets::store::SecretStore;
use crate::secrets::DEFAULT_SECRET_FILE;
use crate::settings::model::{
    Identity, LogLevel, Mount, MountPermissions, Repository, Settings, Ssh,
};
use crate::settings::private::{
    IdentitySection, MountSection, PrivateConfig, RepositorySection, SshSection,
};
use crate::settings::public::PublicConfig;
use crate::settings::{scalar_to_string, DEFAULT_PUBLIC_FILE};

const DEFAULT_KEY_TYPE: &str = "ed25519";
const DEFAULT_BRANCH: &str = "main";
const DEFAULT_MOUNT_TYPE: &str = "auto";
const DEFAULT_MOUNT_OPTION: &str = "defaults";
const DEFAULT_MOUNT_MODE: u32 = 0o755;

/// Where the documents live and whether the private one is encrypted.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub public_path: PathBuf,
    pub private_path: PathBuf,
    pub decrypt: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            public_path: PathBuf::from(DEFAULT_PUBLIC_FILE),
            private_path: PathBuf::from(DEFAULT_SECRET_FILE),
            decrypt: true,
        }
    }
}

/// The account settings default to when `user`/`home_dir` are blank.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Account {
    user: String,
    home: Option<PathBuf>,
}

/// Produces a [`Settings`] from the public and private documents.
pub struct ConfigLoader<'s> {
    options: LoadOptions,
    store: Option<&'s SecretStore<'s>>,
    account: Option<Account>,
}

impl<'s> ConfigLoader<'s> {
    pub fn new(options: LoadOptions) -> Self {
        Self {
            options,
            store: None,
            account: None,
        }
    }

    /// Store used to decrypt the private document.
    pub fn with_store(mut self, store: &'s SecretStore<'s>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `user` and `home` in place of the invoking OS account.
    pub fn with_account(mut self, user: impl Into<String>, home: impl Into<PathBuf>) -> Self {
        self.account = Some(Account {
            user: user.into(),
            home: Some(home.into()),
        });
        self
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Read, decrypt, validate and merge both documents.
    ///
    /// # Errors
    ///
    /// - `VaultError::ConfigFileNotFound` naming whichever file is missing
    /// - `VaultError::DecryptionFailed` from the secret store
    /// - `VaultError::InvalidConfigFormat` for malformed structure or an
    ///   invalid mount
    pub fn load(&self) -> Result<Settings> {
        let public_path = &self.options.public_path;
        let private_path = &self.options.private_path;
        for path in [public_path, private_path] {
            if !path.exists() {
                return Err(VaultError::ConfigFileNotFound(path.display().to_string()));
            }
        }

        let public_bytes = fs::read(public_path).map_err(|e| VaultError::from_io(public_path, e))?;
        let public = PublicConfig::from_yaml(&public_bytes, &public_path.display().to_string())?;
        let private = self.read_private(private_path)?;

        let settings = self.merge(public, private)?;
        log::debug!(
            "loaded settings for {} (features: {:?})",
            settings.user,
            settings.features()
        );
        Ok(settings)
    }

    fn read_private(&self, path: &Path) -> Result<PrivateConfig> {
        let label = path.display().to_string();
        if !self.options.decrypt {
            let bytes = fs::read(path).map_err(|e| VaultError::from_io(path, e))?;
            if encryption::is_age_ciphertext(&bytes) {
                return Err(VaultError::InvalidConfigFormat {
                    path: label,
                    reason: "file is encrypted; load it with decryption enabled".to_string(),
                });
            }
            return PrivateConfig::from_yaml(&bytes, &label);
        }

        let store = self.store.ok_or_else(|| {
            VaultError::PrerequisiteMissing("an age identity to decrypt the private settings".to_string())
        })?;
        // The scratch copy lives only until this function returns.
        let scratch = store.decrypt_to_temp(path)?;
        let plaintext = scratch.read()?;
        PrivateConfig::from_yaml(&plaintext, &label)
    }

    fn merge(&self, public: PublicConfig, private: PrivateConfig) -> Result<Settings> {
        let label = self.options.private_path.display().to_string();

        let configured_user = public.user.as_deref().map(str::trim).filter(|u| !u.is_empty());
        let user = match configured_user {
            Some(u) => u.to_string(),
            None => self.account()?.user,
        };
        let home_dir = match public.home_dir.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
            Some(h) => PathBuf::from(h),
            None => self.home_of(&user),
        };

        let log_level = LogLevel::from_config(public.log_level.as_deref());

        let identity = private.identity.map(|s| build_identity(s, &user));
        let ssh = private
            .ssh
            .and_then(|s| build_ssh(s, identity.as_ref(), &user));
        let repository = match private.repository {
            Some(section) => build_repository(section, &home_dir, &label)?,
            None => None,
        };
        let mounts = private
            .mounts
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, m)| build_mount(m, i, &user, &label))
            .collect::<Result<Vec<_>>>()?;

        Ok(Settings {
            user,
            home_dir,
            log_level,
            versions: public.versions,
            identity,
            ssh,
            repository,
            mounts,
        })
    }

    fn account(&self) -> Result<Account> {
        if let Some(account) = &self.account {
            return Ok(account.clone());
        }
        let user = ["USER", "LOGNAME", "USERNAME"]
            .iter()
            .filter_map(|v| std::env::var(v).ok())
            .find(|v| !v.is_empty())
            .ok_or_else(|| {
                VaultError::PrerequisiteMissing("a login name (USER is not set)".to_string())
            })?;
        Ok(Account {
            user,
            home: dirs::home_dir(),
        })
    }

    /// Home directory of `user`: the invoking account's own home, otherwise
    /// the conventional location.
    fn home_of(&self, user: &str) -> PathBuf {
        match self.account() {
            Ok(Account {
                user: current,
                home: Some(home),
            }) if current == user => home,
            _ => conventional_home(user),
        }
    }
}

fn conventional_home(user: &str) -> PathBuf {
    if user == "root" {
        PathBuf::from("/root")
    } else {
        Path::new("/home").join(user)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn build_identity(section: IdentitySection, user: &str) -> Identity {
    Identity {
        name: non_blank(section.name).unwrap_or_else(|| user.to_string()),
        email: non_blank(section.email).unwrap_or_default(),
        signing_key: non_blank(section.signing_key),
    }
}

fn build_ssh(section: SshSection, identity: Option<&Identity>, user: &str) -> Option<Ssh> {
    if section.enable == Some(false) {
        return None;
    }
    let email = non_blank(section.email)
        .or_else(|| identity.map(|i| i.email.clone()).filter(|e| !e.is_empty()))
        .unwrap_or_else(|| user.to_string());
    Some(Ssh {
        key_type: non_blank(section.key_type).unwrap_or_else(|| DEFAULT_KEY_TYPE.to_string()),
        email,
        passphrase: section.passphrase.unwrap_or_default(),
    })
}

fn build_repository(section: RepositorySection, home: &Path, label: &str) -> Result<Option<Repository>> {
    if section.enable == Some(false) {
        return Ok(None);
    }
    let Some(url) = non_blank(section.url) else {
        log::warn!("repository section has no url; repository feature disabled");
        return Ok(None);
    };

    let directory = match non_blank(section.directory) {
        Some(dir) => expand_home(&dir, home),
        None => {
            let name = repository_name(&url).ok_or_else(|| VaultError::InvalidConfigFormat {
                path: label.to_string(),
                reason: format!("cannot derive a directory name from repository url `{url}`"),
            })?;
            home.join(name)
        }
    };

    Ok(Some(Repository {
        url,
        branch: non_blank(section.branch).unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        directory,
        auto_update: section.auto_update.unwrap_or(false),
    }))
}

/// Last path segment of a clone URL without `.git`.
fn repository_name(url: &str) -> Option<&str> {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    (!name.is_empty()).then_some(name)
}

fn expand_home(dir: &str, home: &Path) -> PathBuf {
    match dir.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None if dir == "~" => home.to_path_buf(),
        None => PathBuf::from(dir),
    }
}

fn build_mount(section: MountSection, index: usize, user: &str, label: &str) -> Result<Mount> {
    let invalid = |reason: String| VaultError::InvalidConfigFormat {
        path: label.to_string(),
        reason: format!("mounts[{index}]: {reason}"),
    };

    let source = non_blank(section.source).ok_or_else(|| invalid("source is required".to_string()))?;
    let target = non_blank(section.target).ok_or_else(|| invalid("target is required".to_string()))?;
    if !target.starts_with('/') {
        return Err(invalid(format!("target `{target}` must be an absolute path")));
    }

    let permissions = section.permissions.unwrap_or_default();
    let mode = match &permissions.mode {
        None | Some(serde_yaml::Value::Null) => DEFAULT_MOUNT_MODE,
        Some(value) => parse_mode(value).ok_or_else(|| {
            invalid(format!(
                "permissions.mode `{}` is not an octal mode",
                scalar_to_string(value).unwrap_or_else(|| "<structured>".to_string())
            ))
        })?,
    };

    let options = section
        .options
        .filter(|o| !o.is_empty())
        .unwrap_or_else(|| vec![DEFAULT_MOUNT_OPTION.to_string()]);

    Ok(Mount {
        kind: non_blank(section.kind).unwrap_or_else(|| DEFAULT_MOUNT_TYPE.to_string()),
        source,
        target: PathBuf::from(target),
        options,
        dump: section.dump.unwrap_or(0),
        fsck: section.fsck.unwrap_or(0),
        permissions: MountPermissions {
            mode,
            owner: non_blank(permissions.owner).unwrap_or_else(|| user.to_string()),
            group: non_blank(permissions.group).unwrap_or_else(|| user.to_string()),
        },
    })
}

/// Parse `0755`, `"755"` or `"0o755"`. An unquoted YAML `0755` may arrive as
/// the integer 755; its digits are read as octal either way.
fn parse_mode(value: &serde_yaml::Value) -> Option<u32> {
    let text = match value {
        serde_yaml::Value::String(s) => s.trim().to_string(),
        serde_yaml::Value::Number(n) => n.as_u64()?.to_string(),
        _ => return None,
    };
    let digits = text.strip_prefix("0o").unwrap_or(&text);
    if digits.is_empty() || digits.len() > 4 || !digits.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return None;
    }
    u32::from_str_radix(digits, 8).ok()
}
