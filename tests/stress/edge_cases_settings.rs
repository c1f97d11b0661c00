//! Edge case tests: settings documents with odd shapes, large mount lists,
//! and scratch-file hygiene under repeated decryption.

use std::fs;
use std::path::{Path, PathBuf};

use vaultboot::policy::editor::canonical_document;
use vaultboot::settings::SettingValue;
use vaultboot::{AgeKeyPair, ConfigLoader, LoadOptions, LogLevel, SecretStore, VaultError};

struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    fn new(public: &str, private: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("config")).unwrap();
        fs::write(dir.path().join("config/public.yml"), public).unwrap();
        fs::write(dir.path().join("config/private.yml"), private).unwrap();
        Self { dir }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn options(&self, decrypt: bool) -> LoadOptions {
        LoadOptions {
            public_path: self.path("config/public.yml"),
            private_path: self.path("config/private.yml"),
            decrypt,
        }
    }

    fn load_plain(&self) -> vaultboot::Result<vaultboot::Settings> {
        ConfigLoader::new(self.options(false))
            .with_account("ops", "/home/ops")
            .load()
    }
}

// === Document shapes ===

#[test]
fn edge_every_log_level_spelling() {
    for (value, expected) in [
        ("debug", LogLevel::Debug),
        ("INFO", LogLevel::Info),
        ("warn", LogLevel::Warn),
        ("Warning", LogLevel::Warn),
        ("error", LogLevel::Error),
        ("trace", LogLevel::Info),
        ("\"\"", LogLevel::Info),
    ] {
        let project = Project::new(&format!("log_level: {value}\n"), "");
        assert_eq!(project.load_plain().unwrap().log_level, expected, "{value}");
    }
}

#[test]
fn edge_comment_only_documents() {
    let project = Project::new("# filled in later\n", "# nothing secret yet\n");
    let settings = project.load_plain().unwrap();
    assert_eq!(settings.user, "ops");
    assert_eq!(settings.home_dir, Path::new("/home/ops"));
    assert!(settings.mounts.is_empty());
}

#[test]
fn edge_malformed_public_named_in_error() {
    let project = Project::new("user: [unclosed\n", "");
    match project.load_plain() {
        Err(VaultError::InvalidConfigFormat { path, .. }) => assert!(path.ends_with("public.yml")),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn edge_unicode_identity() {
    let project = Project::new(
        "",
        "identity:\n  name: \"Zoë Ångström\"\n  email: zoe@exämple.org\n  signing_key: ABCDEF0123456789\n",
    );
    let settings = project.load_plain().unwrap();
    let identity = settings.identity.as_ref().unwrap();
    assert_eq!(identity.name, "Zoë Ångström");
    assert!(settings.features().signing);
    assert_eq!(
        settings.get("identity.signing_key"),
        Some(SettingValue::Str("ABCDEF0123456789".to_string()))
    );
}

#[test]
fn edge_one_hundred_mounts() {
    let mut private = String::from("mounts:\n");
    for i in 0..100 {
        private.push_str(&format!(
            "  - source: /dev/disk{i}\n    target: /mnt/disk{i}\n    dump: {}\n",
            i % 2
        ));
    }
    let project = Project::new("", &private);
    let settings = project.load_plain().unwrap();
    assert_eq!(settings.mounts.len(), 100);
    assert_eq!(settings.mounts[99].target, Path::new("/mnt/disk99"));
    assert_eq!(settings.mounts[99].dump, 1);

    let Some(SettingValue::Mounts(flat)) = settings.get("mounts") else {
        panic!("mounts missing from flattened view");
    };
    assert_eq!(flat.len(), 100);
}

#[test]
fn edge_bad_mount_reports_index() {
    let project = Project::new(
        "",
        "mounts:\n  - { source: a, target: /a }\n  - { source: b, target: /b }\n  - { source: c, target: relative }\n",
    );
    match project.load_plain() {
        Err(VaultError::InvalidConfigFormat { reason, .. }) => assert!(reason.contains("mounts[2]")),
        other => panic!("unexpected {other:?}"),
    }
}

// === Encrypted loading ===

#[test]
fn edge_repeated_encrypted_loads_leave_no_scratch() {
    let project = Project::new(
        "user: ops\nhome_dir: /home/ops\n",
        "ssh:\n  passphrase: correct horse\n",
    );
    let key = AgeKeyPair::generate();
    fs::write(project.path(".sops.yaml"), canonical_document(key.public_key())).unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let store = SecretStore::new(&key, project.path(".sops.yaml")).with_scratch_dir(scratch.path());
    store
        .encrypt_in_place(&project.path("config/private.yml"))
        .unwrap();

    for _ in 0..25 {
        let settings = ConfigLoader::new(project.options(true))
            .with_store(&store)
            .load()
            .unwrap();
        let ssh = settings.ssh.as_ref().unwrap();
        assert_eq!(ssh.passphrase.expose(), "correct horse");
        assert!(!format!("{settings:?}").contains("correct horse"));
    }
    assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);
    assert!(store.registry().tracked().is_empty());
}

#[test]
fn edge_decrypt_failure_leaves_no_scratch() {
    let project = Project::new("", "identity: {}\n");
    let owner = AgeKeyPair::generate();
    fs::write(project.path(".sops.yaml"), canonical_document(owner.public_key())).unwrap();
    SecretStore::new(&owner, project.path(".sops.yaml"))
        .encrypt_in_place(&project.path("config/private.yml"))
        .unwrap();

    let stranger = AgeKeyPair::generate();
    let scratch = tempfile::tempdir().unwrap();
    let store = SecretStore::new(&stranger, project.path(".sops.yaml")).with_scratch_dir(scratch.path());
    let result = ConfigLoader::new(project.options(true))
        .with_store(&store)
        .with_account("ops", "/home/ops")
        .load();

    assert!(matches!(result, Err(VaultError::DecryptionFailed { .. })));
    assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);
}
