//! `vb-keys`: manage the local age identity.
//!
//! Generates, shows, exports and imports the identity, authorizes it in
//! the recipient policy, and exposes the key-file environment variable.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use vaultboot::policy::DEFAULT_POLICY_FILE;
use vaultboot::storage::fs::{mode_of, Removal};
use vaultboot::{env, KeyManager, PolicyEditor};
use vaultboot_cli::{exit_on_error, init_logging, key_manager, report_policy_update, stdin_confirm, Interrupts};

// ── CLI structure ─────────────────────────────────────────────────────────────

/// vb-keys: manage the age identity used to decrypt provisioning secrets.
#[derive(Parser, Debug)]
#[command(name = "vb-keys", about = "Manage the local age identity", version)]
struct Cli {
    /// Identity file (default: $SOPS_AGE_KEY_FILE or ~/.config/sops/age/keys.txt)
    #[arg(long, global = true)]
    key_file: Option<PathBuf>,

    /// Recipient policy file
    #[arg(long, global = true, default_value = DEFAULT_POLICY_FILE)]
    policy: PathBuf,

    /// Answer yes to every confirmation prompt
    #[arg(short, long, global = true)]
    yes: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the identity if missing, authorize it and print the env setup
    Init {
        /// Also add the env export to the shell startup file
        #[arg(long)]
        persist: bool,
    },

    /// Generate a new identity (asks before replacing an existing one)
    Generate,

    /// Show the public key and key file details
    Show,

    /// Authorize this identity in the policy file
    Config {
        /// Rewrite the recipient field in canonical form
        #[arg(long)]
        normalize: bool,

        /// Fail instead of appending a fallback rule
        #[arg(long)]
        strict: bool,
    },

    /// Copy the identity to a file for transfer to another machine
    Export {
        /// Destination (default: ./age-key.txt)
        #[arg(short, long, default_value = "age-key.txt")]
        output: PathBuf,
    },

    /// Install an identity exported from another machine, then remove the file
    Import {
        /// Exported key file
        file: PathBuf,
    },

    /// Print the environment variable export
    Env {
        /// Append the export to the shell startup file
        #[arg(long)]
        persist: bool,
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
    env::apply_to_process(keys.key_file());
    Interrupts::new().run(move || run(cli, &keys))
}

fn run(cli: Cli, keys: &KeyManager) -> Result<()> {
    match cli.command {
        Commands::Init { persist } => cmd_init(keys, &cli.policy, cli.yes, persist),
        Commands::Generate => cmd_generate(keys, cli.yes),
        Commands::Show => cmd_show(keys),
        Commands::Config { normalize, strict } => cmd_config(keys, &cli.policy, normalize, strict),
        Commands::Export { output } => cmd_export(keys, &output),
        Commands::Import { file } => cmd_import(keys, &file, cli.yes),
        Commands::Env { persist } => print_env(keys.key_file(), persist),
    }
}

// ── Command implementations ───────────────────────────────────────────────────

/// `vb-keys init [--persist]`
fn cmd_init(keys: &KeyManager, policy: &Path, yes: bool, persist: bool) -> Result<()> {
    let pair = if keys.exists() {
        let pair = keys.load()?;
        println!("Using existing identity at {}", keys.key_file().display());
        pair
    } else {
        let pair = keys.generate(&mut stdin_confirm(yes))?;
        println!("Generated identity at {}", keys.key_file().display());
        pair
    };
    println!("Public key: {}", pair.public_key());

    let update = PolicyEditor::new(policy).ensure_recipient(pair.public_key())?;
    report_policy_update(&update, policy);

    print_env(keys.key_file(), persist)
}

/// `vb-keys generate`
fn cmd_generate(keys: &KeyManager, yes: bool) -> Result<()> {
    let pair = keys.generate(&mut stdin_confirm(yes))?;
    println!("Generated identity");
    println!("  File:       {}", keys.key_file().display());
    println!("  Public key: {}", pair.public_key());
    Ok(())
}

/// `vb-keys show`
fn cmd_show(keys: &KeyManager) -> Result<()> {
    let public_key = keys.extract_public_key()?;
    let pair = keys.load()?;

    println!("Identity: {}", keys.key_file().display());
    println!("  Public key: {public_key}");
    match pair.created_at() {
        Some(at) => println!("  Created:    {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Created:    unknown"),
    }
    let mode = mode_of(keys.key_file())?;
    if mode == 0o600 {
        println!("  Mode:       {mode:04o}");
    } else {
        println!("  Mode:       {mode:04o} (expected 0600)");
    }
    Ok(())
}

/// `vb-keys config [--normalize] [--strict]`
fn cmd_config(keys: &KeyManager, policy: &Path, normalize: bool, strict: bool) -> Result<()> {
    let public_key = keys.extract_public_key()?;
    let update = PolicyEditor::new(policy)
        .normalize(normalize)
        .strict(strict)
        .ensure_recipient(&public_key)?;
    report_policy_update(&update, policy);
    if update.changed() {
        println!("Run `vb-secrets reencrypt` from a machine that can already decrypt to grant access to existing files.");
    }
    Ok(())
}

/// `vb-keys export [--output PATH]`
fn cmd_export(keys: &KeyManager, output: &Path) -> Result<()> {
    keys.export(output)?;
    println!("Exported identity to {}", output.display());
    println!("Transfer it over a secure channel, then delete it.");
    Ok(())
}

/// `vb-keys import <file>`
fn cmd_import(keys: &KeyManager, file: &Path, yes: bool) -> Result<()> {
    let outcome = keys.import(file, &mut stdin_confirm(yes))?;
    println!("Imported identity to {}", keys.key_file().display());
    println!("  Public key: {}", outcome.public_key);
    match outcome.source_removal {
        Removal::Overwritten => println!("  Removed {} (overwritten first)", file.display()),
        Removal::Unlinked => println!("  Removed {} (not overwritten)", file.display()),
    }
    Ok(())
}

/// `vb-keys env [--persist]`
fn print_env(key_file: &Path, persist: bool) -> Result<()> {
    println!("{}", env::export_line(key_file));
    if persist {
        let rc = env::current_shell_rc_file()?;
        if env::persist(&rc, key_file)? {
            println!("Added to {}", rc.display());
        } else {
            println!("{} already exports it", rc.display());
        }
    }
    Ok(())
}
