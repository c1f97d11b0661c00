//! `vb-config`: load the merged settings for provisioning scripts.
//!
//! Prints the flattened settings as JSON or shell assignments, or answers
//! whether one optional feature is enabled through the exit status.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};

use vaultboot::policy::DEFAULT_POLICY_FILE;
use vaultboot::secrets::DEFAULT_SECRET_FILE;
use vaultboot::settings::{SettingValue, DEFAULT_PUBLIC_FILE};
use vaultboot::{ConfigLoader, Features, LoadOptions, SecretStore, Settings};
use vaultboot_cli::{exit_on_error, init_logging, key_manager, Interrupts};

/// Prefix of every shell variable printed by `--format env`.
const ENV_PREFIX: &str = "VB_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Env,
}

/// vb-config: load and print the merged provisioning settings.
#[derive(Parser, Debug)]
#[command(name = "vb-config", about = "Load the merged provisioning settings", version)]
struct Cli {
    /// Public settings file
    #[arg(long, default_value = DEFAULT_PUBLIC_FILE)]
    public: PathBuf,

    /// Private settings file
    #[arg(long, default_value = DEFAULT_SECRET_FILE)]
    private: PathBuf,

    /// The private file is plaintext; do not decrypt it
    #[arg(long)]
    no_decrypt: bool,

    /// Identity file (default: $SOPS_AGE_KEY_FILE or ~/.config/sops/age/keys.txt)
    #[arg(long)]
    key_file: Option<PathBuf>,

    /// Recipient policy file
    #[arg(long, default_value = DEFAULT_POLICY_FILE)]
    policy: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Exit 0 if the feature is enabled, 1 otherwise (identity, signing, ssh, repository, mounts)
    #[arg(long)]
    feature: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let interrupts = Interrupts::new();
    let guard = interrupts.clone();
    exit_on_error(guard.run(move || run(cli, &interrupts)));
}

fn run(cli: Cli, interrupts: &Interrupts) -> Result<()> {
    let options = LoadOptions {
        public_path: cli.public,
        private_path: cli.private,
        decrypt: !cli.no_decrypt,
    };

    let settings = if options.decrypt {
        let keys = key_manager(cli.key_file)?;
        let identity = keys.load()?;
        let store = SecretStore::new(&identity, &cli.policy).with_registry(interrupts.registry());
        ConfigLoader::new(options).with_store(&store).load()?
    } else {
        ConfigLoader::new(options).load()?
    };
    log::set_max_level(settings.log_level.to_level_filter());

    if let Some(name) = cli.feature {
        return check_feature(&settings.features(), &name);
    }

    match cli.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&settings.flatten())?),
        Format::Env => print_env(&settings),
    }
    Ok(())
}

fn check_feature(features: &Features, name: &str) -> Result<()> {
    match features.get(name) {
        Some(true) => {
            println!("{name}: enabled");
            Ok(())
        }
        Some(false) => {
            println!("{name}: disabled");
            std::process::exit(1);
        }
        None => bail!(
            "unknown feature `{name}` (expected one of: {})",
            Features::NAMES.join(", ")
        ),
    }
}

fn print_env(settings: &Settings) {
    for (name, value) in settings.flatten() {
        println!("{}={}", env_name(&name), shell_quote(&value));
    }
}

/// `repository.auto_update` becomes `VB_REPOSITORY_AUTO_UPDATE`.
fn env_name(name: &str) -> String {
    let mangled: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{ENV_PREFIX}{mangled}")
}

fn shell_quote(value: &SettingValue) -> String {
    format!("'{}'", value.render().replace('\'', r"'\''"))
}
