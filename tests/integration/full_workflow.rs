//! Integration test: full end-to-end workflow.
//!
//! Tests the complete lifecycle across two machines sharing one project:
//! 1. Generate an identity and authorize it in a fresh policy
//! 2. Create the encrypted private settings from a template
//! 3. Load the merged settings
//! 4. Authorize a second machine and re-encrypt for it
//! 5. Revoke the second machine and re-encrypt without it
//! 6. Move an identity between machines by export/import

use std::fs;
use std::path::Path;

use vaultboot::crypto::encryption::is_age_ciphertext;
use vaultboot::{
    ConfigLoader, Features, KeyManager, LoadOptions, PolicyEditor, PolicyUpdate, Result, SecretStore,
    VaultError,
};

const TEMPLATE: &str = "\
identity:
  name: Ada Lovelace
  email: ada@example.com
ssh:
  key_type: ed25519
repository:
  url: https://example.com/ada/dotfiles.git
mounts:
  - source: nas:/backup
    target: /mnt/backup
    type: nfs
    options: [rw, noatime]
";

const PUBLIC: &str = "\
user: ada
home_dir: /home/ada
log_level: warn
versions:
  node: \"20.11.0\"
";

fn no_edit(_: &Path) -> Result<()> {
    Ok(())
}

#[test]
fn full_workflow_generate_to_revocation() {
    let project = tempfile::tempdir().unwrap();
    let laptop_home = tempfile::tempdir().unwrap();
    let desktop_home = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();

    let policy = project.path().join(".sops.yaml");
    let config = project.path().join("config");
    fs::create_dir_all(&config).unwrap();
    let private = config.join("private.yml");
    let template = config.join("private.example.yml");
    fs::write(&template, TEMPLATE).unwrap();
    fs::write(config.join("public.yml"), PUBLIC).unwrap();

    // ── Step 1: Generate and authorize ──────────────────────────────────
    let laptop_keys = KeyManager::new(laptop_home.path().join("age/keys.txt"));
    let laptop = laptop_keys
        .generate(&mut |_: &str| -> bool { panic!("no identity exists yet") })
        .expect("generation should succeed");
    assert_eq!(
        laptop_keys.extract_public_key().unwrap(),
        laptop.public_key()
    );

    let update = PolicyEditor::new(&policy)
        .ensure_recipient(laptop.public_key())
        .unwrap();
    assert_eq!(update, PolicyUpdate::Created);
    let again = PolicyEditor::new(&policy)
        .ensure_recipient(laptop.public_key())
        .unwrap();
    assert_eq!(again, PolicyUpdate::AlreadyPresent);

    // ── Step 2: Create the encrypted file ───────────────────────────────
    let laptop_store = SecretStore::new(&laptop, &policy).with_scratch_dir(scratch.path());
    laptop_store
        .init(&template, &private, &mut no_edit)
        .expect("init should succeed");
    assert!(is_age_ciphertext(&fs::read(&private).unwrap()));
    assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);

    // ── Step 3: Load merged settings ────────────────────────────────────
    let options = LoadOptions {
        public_path: config.join("public.yml"),
        private_path: private.clone(),
        decrypt: true,
    };
    let settings = ConfigLoader::new(options.clone())
        .with_store(&laptop_store)
        .load()
        .expect("settings should load");
    assert_eq!(settings.user, "ada");
    assert_eq!(settings.log_level.ordinal(), 2);
    let features = settings.features();
    assert!(features.identity && features.ssh && features.repository && features.mounts);
    assert!(!features.signing);
    assert_eq!(
        settings.repository.as_ref().unwrap().directory,
        Path::new("/home/ada/dotfiles")
    );
    assert_eq!(settings.mounts[0].kind, "nfs");
    assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);

    // ── Step 4: Authorize a second machine ──────────────────────────────
    let desktop_keys = KeyManager::new(desktop_home.path().join("age/keys.txt"));
    let desktop = desktop_keys.generate(&mut |_: &str| false).unwrap();
    let desktop_store = SecretStore::new(&desktop, &policy).with_scratch_dir(scratch.path());
    assert!(matches!(
        desktop_store.decrypt_to_memory(&private),
        Err(VaultError::DecryptionFailed { .. })
    ));

    let update = laptop_store.rekey(&private, desktop.public_key()).unwrap();
    assert!(update.changed());
    assert!(update.backup().is_some_and(|b| b.exists()));
    let plaintext = desktop_store.decrypt_to_memory(&private).unwrap();
    assert_eq!(plaintext.as_slice(), TEMPLATE.as_bytes());

    // ── Step 5: Revoke and re-encrypt ───────────────────────────────────
    let text = fs::read_to_string(&policy).unwrap();
    let revoked: String = text
        .lines()
        .filter(|l| !l.contains(desktop.public_key()))
        .map(|l| format!("{l}\n"))
        .collect();
    fs::write(&policy, revoked).unwrap();
    laptop_store.reencrypt(&private).unwrap();

    assert!(desktop_store.decrypt_to_memory(&private).is_err());
    assert!(laptop_store.validate(&private).is_ok());

    // ── Step 6: Move the laptop identity to a new machine ───────────────
    let transfer = project.path().join("age-key.txt");
    laptop_keys.export(&transfer).unwrap();
    let replacement_home = tempfile::tempdir().unwrap();
    let replacement_keys = KeyManager::new(replacement_home.path().join("age/keys.txt"));
    let imported = replacement_keys
        .import(&transfer, &mut |_: &str| false)
        .unwrap();
    assert_eq!(imported.public_key, laptop.public_key());
    assert!(!transfer.exists());

    let moved = replacement_keys.load().unwrap();
    let moved_store = SecretStore::new(&moved, &policy);
    let settings = ConfigLoader::new(options)
        .with_store(&moved_store)
        .load()
        .unwrap();
    assert_eq!(settings.identity.unwrap().email, "ada@example.com");
}

#[test]
fn full_workflow_plaintext_settings_without_identity() {
    let project = tempfile::tempdir().unwrap();
    let public = project.path().join("public.yml");
    let private = project.path().join("private.yml");
    fs::write(&public, "user: \"\"\nlog_level: loud\n").unwrap();
    fs::write(&private, "ssh:\n  enable: false\n").unwrap();

    let settings = ConfigLoader::new(LoadOptions {
        public_path: public,
        private_path: private,
        decrypt: false,
    })
    .with_account("builder", "/var/lib/builder")
    .load()
    .unwrap();

    assert_eq!(settings.user, "builder");
    assert_eq!(settings.home_dir, Path::new("/var/lib/builder"));
    assert_eq!(settings.log_level.ordinal(), 1);
    assert_eq!(settings.features(), Features::default());
}
