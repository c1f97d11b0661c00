//! Integration tests for the CLI binaries.
//!
//! Runs `vb-keys`, `vb-secrets` and `vb-config` against throwaway project
//! directories and key files.
//!
//! This test is registered as a [[test]] in the vaultboot-cli crate so that
//! the CARGO_BIN_EXE_* variables are available.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

/// A project directory plus an isolated home.
struct Sandbox {
    project: tempfile::TempDir,
    home: tempfile::TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let sandbox = Self {
            project: tempfile::tempdir().unwrap(),
            home: tempfile::tempdir().unwrap(),
        };
        fs::create_dir_all(sandbox.project.path().join("config")).unwrap();
        sandbox
    }

    fn key_file(&self) -> PathBuf {
        self.home.path().join(".config/sops/age/keys.txt")
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.project.path().join(rel)
    }

    fn command(&self, binary: &str) -> Command {
        let mut cmd = Command::new(binary);
        cmd.current_dir(self.project.path())
            .env("HOME", self.home.path())
            .env("USER", "ops")
            .env_remove("SOPS_AGE_KEY_FILE")
            .env_remove("VISUAL")
            .env_remove("RUST_LOG")
            .stdin(Stdio::null());
        cmd
    }

    fn keys(&self) -> Command {
        let mut cmd = self.command(env!("CARGO_BIN_EXE_vb-keys"));
        cmd.arg("--key-file").arg(self.key_file());
        cmd
    }

    fn secrets(&self) -> Command {
        let mut cmd = self.command(env!("CARGO_BIN_EXE_vb-secrets"));
        cmd.arg("--key-file")
            .arg(self.key_file())
            .arg("--scratch-dir")
            .arg(self.path("scratch"));
        fs::create_dir_all(self.path("scratch")).unwrap();
        cmd
    }

    fn config(&self) -> Command {
        let mut cmd = self.command(env!("CARGO_BIN_EXE_vb-config"));
        cmd.arg("--key-file").arg(self.key_file());
        cmd
    }

    /// `vb-keys init`, then a plaintext private file encrypted in place.
    fn initialized(private: &str) -> Self {
        let sandbox = Self::new();
        assert_success(&run(sandbox.keys().arg("init")));
        fs::write(sandbox.path("config/private.yml"), private).unwrap();
        fs::write(sandbox.path("config/public.yml"), "log_level: info\n").unwrap();
        assert_success(&run(sandbox.secrets().arg("encrypt")));
        sandbox
    }

    fn scratch_is_empty(&self) -> bool {
        fs::read_dir(self.path("scratch")).unwrap().count() == 0
    }
}

fn run(cmd: &mut Command) -> Output {
    cmd.output().expect("failed to execute binary")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "expected success, stderr: {}",
        stderr(output)
    );
}

fn assert_handled_failure(output: &Output) {
    assert_eq!(
        output.status.code(),
        Some(1),
        "expected exit 1, stderr: {}",
        stderr(output)
    );
    assert!(stderr(output).contains("error: "), "stderr: {}", stderr(output));
}

fn public_key_of(key_file: &Path) -> String {
    fs::read_to_string(key_file)
        .unwrap()
        .lines()
        .find_map(|l| l.strip_prefix("# public key: ").map(str::to_string))
        .expect("key file has a public key marker")
}

// ── Basic flags ───────────────────────────────────────────────────────────────

#[test]
fn cli_binaries_respond_to_help_and_version() {
    for binary in [
        env!("CARGO_BIN_EXE_vb-keys"),
        env!("CARGO_BIN_EXE_vb-secrets"),
        env!("CARGO_BIN_EXE_vb-config"),
    ] {
        let help = run(Command::new(binary).arg("--help"));
        assert!(help.status.success(), "{binary} --help");
        assert!(stdout(&help).contains("Usage"), "{binary} --help");

        let version = run(Command::new(binary).arg("--version"));
        assert!(version.status.success(), "{binary} --version");
        assert!(stdout(&version).contains("0.1"), "{binary} --version");
    }
}

#[test]
fn cli_exits_with_error_on_unknown_flag() {
    let output = run(Command::new(env!("CARGO_BIN_EXE_vb-keys")).arg("--nonexistent-flag"));
    assert!(!output.status.success());
}

// ── vb-keys ───────────────────────────────────────────────────────────────────

#[test]
fn keys_init_creates_identity_and_policy() {
    let sandbox = Sandbox::new();
    let output = run(sandbox.keys().arg("init"));
    assert_success(&output);

    let key = public_key_of(&sandbox.key_file());
    let out = stdout(&output);
    assert!(out.contains(&key));
    assert!(out.contains("export SOPS_AGE_KEY_FILE="));
    assert!(fs::read_to_string(sandbox.path(".sops.yaml"))
        .unwrap()
        .contains(&key));

    // Running it again changes nothing.
    let again = run(sandbox.keys().arg("init"));
    assert_success(&again);
    assert!(stdout(&again).contains("already authorized"));
    assert_eq!(public_key_of(&sandbox.key_file()), key);
}

#[cfg(unix)]
#[test]
fn keys_file_modes_are_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let sandbox = Sandbox::new();
    assert_success(&run(sandbox.keys().arg("generate")));
    let file_mode = fs::metadata(sandbox.key_file()).unwrap().permissions().mode() & 0o777;
    let dir_mode = fs::metadata(sandbox.key_file().parent().unwrap())
        .unwrap()
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(file_mode, 0o600);
    assert_eq!(dir_mode, 0o700);

    let show = run(sandbox.keys().arg("show"));
    assert_success(&show);
    assert!(stdout(&show).contains("0600"));
}

#[test]
fn keys_generate_declined_keeps_identity() {
    let sandbox = Sandbox::new();
    assert_success(&run(sandbox.keys().arg("generate")));
    let before = fs::read_to_string(sandbox.key_file()).unwrap();

    let mut child = sandbox
        .keys()
        .arg("generate")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(b"n\n").unwrap();
    let output = child.wait_with_output().unwrap();

    assert_handled_failure(&output);
    assert_eq!(fs::read_to_string(sandbox.key_file()).unwrap(), before);
}

#[test]
fn keys_generate_with_yes_replaces_identity() {
    let sandbox = Sandbox::new();
    assert_success(&run(sandbox.keys().arg("generate")));
    let before = public_key_of(&sandbox.key_file());

    assert_success(&run(sandbox.keys().arg("--yes").arg("generate")));
    assert_ne!(public_key_of(&sandbox.key_file()), before);
}

#[test]
fn keys_show_without_identity_fails() {
    let sandbox = Sandbox::new();
    let output = run(sandbox.keys().arg("show"));
    assert_handled_failure(&output);
    assert!(stderr(&output).contains("Key file not found"));
}

#[test]
fn keys_export_then_import_elsewhere() {
    let source = Sandbox::new();
    assert_success(&run(source.keys().arg("generate")));
    let key = public_key_of(&source.key_file());

    let transfer = source.path("age-key.txt");
    assert_success(&run(source.keys().arg("export").arg("--output").arg(&transfer)));
    assert!(transfer.exists());

    let target = Sandbox::new();
    let output = run(target.keys().arg("import").arg(&transfer));
    assert_success(&output);
    assert!(stdout(&output).contains(&key));
    assert!(!transfer.exists());
    assert_eq!(public_key_of(&target.key_file()), key);
}

#[test]
fn keys_import_missing_source_fails() {
    let sandbox = Sandbox::new();
    let output = run(sandbox.keys().arg("import").arg("no-such-file.txt"));
    assert_handled_failure(&output);
    assert!(stderr(&output).contains("Import source not found"));
}

#[test]
fn keys_env_persist_is_idempotent() {
    let sandbox = Sandbox::new();
    for _ in 0..2 {
        let output = run(
            sandbox
                .keys()
                .env("SHELL", "/bin/zsh")
                .arg("env")
                .arg("--persist"),
        );
        assert_success(&output);
    }
    let rc = fs::read_to_string(sandbox.home.path().join(".zshrc")).unwrap();
    assert_eq!(rc.matches("export SOPS_AGE_KEY_FILE=").count(), 1);
}

#[test]
fn keys_config_strict_rejects_unparsable_policy() {
    let sandbox = Sandbox::new();
    assert_success(&run(sandbox.keys().arg("generate")));
    fs::write(sandbox.path(".sops.yaml"), "creation_rules: [\n").unwrap();

    let output = run(sandbox.keys().arg("config").arg("--strict"));
    assert_handled_failure(&output);
    assert_eq!(
        fs::read_to_string(sandbox.path(".sops.yaml")).unwrap(),
        "creation_rules: [\n"
    );

    let lenient = run(sandbox.keys().arg("config"));
    assert_success(&lenient);
    assert!(stderr(&lenient).contains("WARNING"));
}

// ── vb-secrets ────────────────────────────────────────────────────────────────

#[test]
fn secrets_encrypt_then_view() {
    let sandbox = Sandbox::initialized("identity:\n  name: Ops\n");
    let on_disk = fs::read_to_string(sandbox.path("config/private.yml")).unwrap();
    assert!(on_disk.starts_with("-----BEGIN AGE ENCRYPTED FILE-----"));

    let output = run(sandbox.secrets().arg("view"));
    assert_success(&output);
    assert_eq!(stdout(&output), "identity:\n  name: Ops\n");
    assert!(sandbox.scratch_is_empty());
}

#[test]
fn secrets_encrypt_twice_fails() {
    let sandbox = Sandbox::initialized("a: 1\n");
    let output = run(sandbox.secrets().arg("encrypt"));
    assert_handled_failure(&output);
    assert!(stderr(&output).contains("already encrypted"));
}

#[test]
fn secrets_validate_reports_sections() {
    let sandbox = Sandbox::initialized("ssh:\n  enable: true\n");
    let output = run(sandbox.secrets().arg("validate"));
    assert_success(&output);
    assert!(stdout(&output).contains("is valid"));
}

#[cfg(unix)]
#[test]
fn secrets_edit_without_changes() {
    let sandbox = Sandbox::initialized("a: 1\n");
    let output = run(sandbox.secrets().env("EDITOR", "true").arg("edit"));
    assert_success(&output);
    assert!(stdout(&output).contains("No changes"));
    assert!(sandbox.scratch_is_empty());
}

#[cfg(unix)]
#[test]
fn secrets_failed_editor_leaves_file() {
    let sandbox = Sandbox::initialized("a: 1\n");
    let before = fs::read(sandbox.path("config/private.yml")).unwrap();

    let output = run(sandbox.secrets().env("EDITOR", "false").arg("edit"));
    assert_handled_failure(&output);
    assert!(stderr(&output).contains("Editor failed"));
    assert_eq!(fs::read(sandbox.path("config/private.yml")).unwrap(), before);
    assert!(sandbox.scratch_is_empty());
}

#[cfg(unix)]
#[test]
fn secrets_terminated_edit_removes_scratch() {
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, Instant};

    let sandbox = Sandbox::initialized("identity:\n  name: Ada\n");
    let before = fs::read(sandbox.path("config/private.yml")).unwrap();
    let editor = sandbox.path("slow-editor.sh");
    fs::write(&editor, "#!/bin/sh\nexec sleep 15\n").unwrap();
    fs::set_permissions(&editor, fs::Permissions::from_mode(0o755)).unwrap();

    let mut child = sandbox
        .secrets()
        .env("EDITOR", &editor)
        .arg("edit")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while sandbox.scratch_is_empty() {
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("scratch file never appeared");
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let kill = Command::new("kill")
        .arg("-TERM")
        .arg(child.id().to_string())
        .status()
        .unwrap();
    assert!(kill.success());
    let status = child.wait().unwrap();

    assert_eq!(status.code(), Some(130));
    assert!(sandbox.scratch_is_empty(), "plaintext left behind");
    assert_eq!(fs::read(sandbox.path("config/private.yml")).unwrap(), before);
}

#[test]
fn secrets_missing_editor_is_prerequisite() {
    let sandbox = Sandbox::initialized("a: 1\n");
    let output = run(
        sandbox
            .secrets()
            .env("EDITOR", "vaultboot-no-such-editor")
            .arg("edit"),
    );
    assert_handled_failure(&output);
    assert!(stderr(&output).contains("Prerequisite missing"));
    assert!(sandbox.scratch_is_empty());
}

#[cfg(unix)]
#[test]
fn secrets_init_from_template() {
    let sandbox = Sandbox::new();
    assert_success(&run(sandbox.keys().arg("init")));
    fs::write(sandbox.path("config/private.example.yml"), "ssh: {}\n").unwrap();

    let output = run(sandbox.secrets().env("EDITOR", "true").arg("init"));
    assert_success(&output);
    let on_disk = fs::read_to_string(sandbox.path("config/private.yml")).unwrap();
    assert!(on_disk.starts_with("-----BEGIN AGE ENCRYPTED FILE-----"));
    assert!(sandbox.scratch_is_empty());

    let view = run(sandbox.secrets().arg("view"));
    assert_eq!(stdout(&view), "ssh: {}\n");
}

#[test]
fn secrets_rekey_grants_second_identity() {
    let sandbox = Sandbox::initialized("a: 1\n");
    let other = Sandbox::new();
    assert_success(&run(other.keys().arg("generate")));
    let other_key = public_key_of(&other.key_file());

    assert_success(&run(sandbox.secrets().arg("rekey").arg(&other_key)));

    let output = run(
        sandbox
            .command(env!("CARGO_BIN_EXE_vb-secrets"))
            .arg("--key-file")
            .arg(other.key_file())
            .arg("view"),
    );
    assert_success(&output);
    assert_eq!(stdout(&output), "a: 1\n");
}

#[test]
fn secrets_view_with_wrong_identity_fails() {
    let sandbox = Sandbox::initialized("a: 1\n");
    let other = Sandbox::new();
    assert_success(&run(other.keys().arg("generate")));

    let output = run(
        sandbox
            .command(env!("CARGO_BIN_EXE_vb-secrets"))
            .arg("--key-file")
            .arg(other.key_file())
            .arg("view"),
    );
    assert_handled_failure(&output);
    assert!(stderr(&output).contains("Decryption failed"));
}

// ── vb-config ─────────────────────────────────────────────────────────────────

#[test]
fn config_prints_json() {
    let sandbox = Sandbox::initialized(
        "repository:\n  url: https://example.com/ops/infra.git\n",
    );
    let output = run(sandbox.config().arg("--format").arg("json"));
    assert_success(&output);

    let flat: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(flat["user"], "ops");
    assert_eq!(flat["repository.enabled"], true);
    assert_eq!(flat["repository.branch"], "main");
    assert_eq!(flat["ssh.enabled"], false);
    assert_eq!(flat["log_level_ordinal"], 1);
}

#[test]
fn config_prints_env_assignments() {
    let sandbox = Sandbox::new();
    fs::write(sandbox.path("config/public.yml"), "user: ops\nhome_dir: /home/ops\n").unwrap();
    fs::write(
        sandbox.path("config/private.yml"),
        "identity:\n  name: O'Brien\n",
    )
    .unwrap();

    let output = run(sandbox
        .config()
        .arg("--no-decrypt")
        .arg("--format")
        .arg("env"));
    assert_success(&output);
    let out = stdout(&output);
    assert!(out.contains("VB_USER='ops'"));
    assert!(out.contains("VB_IDENTITY_NAME='O'\\''Brien'"));
    assert!(out.contains("VB_IDENTITY_ENABLED='true'"));
}

#[test]
fn config_feature_exit_status() {
    let sandbox = Sandbox::new();
    fs::write(sandbox.path("config/public.yml"), "").unwrap();
    fs::write(sandbox.path("config/private.yml"), "ssh: {}\n").unwrap();

    let enabled = run(sandbox.config().args(["--no-decrypt", "--feature", "ssh"]));
    assert_eq!(enabled.status.code(), Some(0));

    let disabled = run(sandbox.config().args(["--no-decrypt", "--feature", "mounts"]));
    assert_eq!(disabled.status.code(), Some(1));

    let unknown = run(sandbox.config().args(["--no-decrypt", "--feature", "gpu"]));
    assert_handled_failure(&unknown);
}

#[test]
fn config_missing_file_named() {
    let sandbox = Sandbox::new();
    fs::write(sandbox.path("config/private.yml"), "").unwrap();
    let output = run(sandbox.config().arg("--no-decrypt"));
    assert_handled_failure(&output);
    assert!(stderr(&output).contains("public.yml"));
}
