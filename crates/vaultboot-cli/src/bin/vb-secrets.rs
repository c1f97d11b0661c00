//! `vb-secrets`: work with the encrypted private settings file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use vaultboot::policy::DEFAULT_POLICY_FILE;
use vaultboot::secrets::{CommandEditor, DEFAULT_SECRET_FILE, DEFAULT_TEMPLATE_FILE};
use vaultboot::{EditOutcome, KeyManager, SecretStore};
use vaultboot_cli::{exit_on_error, init_logging, key_manager, report_policy_update, Interrupts};

// ── CLI structure ─────────────────────────────────────────────────────────────

/// vb-secrets: edit, view and re-encrypt the private settings file.
#[derive(Parser, Debug)]
#[command(name = "vb-secrets", about = "Manage the encrypted private settings", version)]
struct Cli {
    /// Identity file (default: $SOPS_AGE_KEY_FILE or ~/.config/sops/age/keys.txt)
    #[arg(long, global = true)]
    key_file: Option<PathBuf>,

    /// Recipient policy file
    #[arg(long, global = true, default_value = DEFAULT_POLICY_FILE)]
    policy: PathBuf,

    /// Directory for decrypted scratch files (default: system temp dir)
    #[arg(long, global = true)]
    scratch_dir: Option<PathBuf>,

    /// Rewrite the policy's recipient field in canonical form on rekey
    #[arg(long, global = true)]
    normalize: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decrypt into the editor, then re-encrypt
    Edit {
        #[arg(default_value = DEFAULT_SECRET_FILE)]
        file: PathBuf,
    },

    /// Print the decrypted content
    View {
        #[arg(default_value = DEFAULT_SECRET_FILE)]
        file: PathBuf,
    },

    /// Check that the file decrypts to a well-formed settings document
    Validate {
        #[arg(default_value = DEFAULT_SECRET_FILE)]
        file: PathBuf,
    },

    /// Create the encrypted file from a template
    Init {
        #[arg(default_value = DEFAULT_SECRET_FILE)]
        file: PathBuf,

        /// Plaintext template
        #[arg(long, default_value = DEFAULT_TEMPLATE_FILE)]
        template: PathBuf,
    },

    /// Encrypt a plaintext file in place
    Encrypt {
        #[arg(default_value = DEFAULT_SECRET_FILE)]
        file: PathBuf,
    },

    /// Authorize another public key and re-encrypt for it
    Rekey {
        /// age public key (age1...)
        public_key: String,

        #[arg(default_value = DEFAULT_SECRET_FILE)]
        file: PathBuf,
    },

    /// Re-encrypt against the current policy (drops removed keys)
    Reencrypt {
        #[arg(default_value = DEFAULT_SECRET_FILE)]
        file: PathBuf,
    },
}

// ── Main entry point ──────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    exit_on_error(start(cli));
}

/// Resolve the identity and export its location while the process is
/// still single-threaded, then run the command under the signal watcher.
fn start(cli: Cli) -> Result<()> {
    let keys = key_manager(cli.key_file.clone())?;
    vaultboot::env::apply_to_process(keys.key_file());

    let interrupts = Interrupts::new();
    let guard = interrupts.clone();
    guard.run(move || run(cli, &keys, &interrupts))
}

fn run(cli: Cli, keys: &KeyManager, interrupts: &Interrupts) -> Result<()> {
    let identity = keys.load()?;

    let mut store = SecretStore::new(&identity, &cli.policy)
        .with_registry(interrupts.registry())
        .normalize_policy(cli.normalize);
    if let Some(dir) = cli.scratch_dir {
        store = store.with_scratch_dir(dir);
    }

    match cli.command {
        Commands::Edit { file } => {
            let mut editor = interrupts.editor(CommandEditor::from_env());
            let outcome = store.edit(&file, &mut editor)?;
            report_edit(&file, &outcome);
        }
        Commands::View { file } => {
            let stdout = std::io::stdout();
            store.view(&file, &mut stdout.lock())?;
        }
        Commands::Validate { file } => {
            let doc = store.validate(&file)?;
            println!("{} is valid", file.display());
            for (section, present) in [
                ("identity", doc.identity.is_some()),
                ("ssh", doc.ssh.is_some()),
                ("repository", doc.repository.is_some()),
                ("mounts", doc.mounts.is_some()),
            ] {
                println!("  {section:<11}{}", if present { "present" } else { "absent" });
            }
        }
        Commands::Init { file, template } => {
            let existed = file.exists();
            let mut editor = interrupts.editor(CommandEditor::from_env());
            let outcome = store
                .init(&template, &file, &mut editor)
                .with_context(|| format!("could not initialize {}", file.display()))?;
            if existed {
                report_edit(&file, &outcome);
            } else {
                println!("Created {} from {}", file.display(), template.display());
            }
        }
        Commands::Encrypt { file } => {
            store.encrypt_in_place(&file)?;
            println!("Encrypted {}", file.display());
        }
        Commands::Rekey { public_key, file } => {
            let update = store.rekey(&file, &public_key)?;
            report_policy_update(&update, &cli.policy);
            println!("Re-encrypted {} for the updated recipients", file.display());
        }
        Commands::Reencrypt { file } => {
            store.reencrypt(&file)?;
            println!("Re-encrypted {}", file.display());
        }
    }
    Ok(())
}

fn report_edit(file: &Path, outcome: &EditOutcome) {
    if outcome.changed {
        println!("Saved changes to {}", file.display());
    } else {
        println!("No changes to {}", file.display());
    }
}
