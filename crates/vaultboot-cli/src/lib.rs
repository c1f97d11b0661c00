//! Shared plumbing for the `vb-keys`, `vb-secrets` and `vb-config` tools.
//!
//! Each binary parses its arguments, sets up logging, exports the key-file
//! variable while still single-threaded, then runs its one
//! operation through [`Interrupts::run`]: the operation executes on a
//! blocking task while a background task waits for SIGINT/SIGTERM. A signal
//! purges every live scratch file and exits with status 130; normal
//! completion cancels the watcher.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio_util::sync::CancellationToken;

use vaultboot::policy::PolicyUpdate;
use vaultboot::secrets::CommandEditor;
use vaultboot::{Editor, KeyManager, ScratchRegistry};

/// Exit status after an interrupt (128 + SIGINT).
pub const INTERRUPTED_EXIT: i32 = 130;

// ── Logging ───────────────────────────────────────────────────────────────────

/// Log to stderr at `info` (or `debug` with `--verbose`); `RUST_LOG`
/// overrides either.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// Print a failure the way every tool reports it and exit with status 1.
pub fn exit_on_error(result: Result<()>) {
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

// ── Prompts ───────────────────────────────────────────────────────────────────

/// A confirmation callback reading `y`/`yes` from stdin. With `assume_yes`
/// every question is answered affirmatively without reading.
pub fn stdin_confirm(assume_yes: bool) -> impl FnMut(&str) -> bool {
    move |question: &str| {
        if assume_yes {
            log::info!("{question} (assumed yes)");
            return true;
        }
        eprint!("{question} [y/N] ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

// ── Shared arguments ──────────────────────────────────────────────────────────

/// The key manager for `--key-file`, or the default location.
pub fn key_manager(key_file: Option<PathBuf>) -> Result<KeyManager> {
    Ok(match key_file {
        Some(path) => KeyManager::new(path),
        None => KeyManager::from_env()?,
    })
}

/// Describe what a policy update did.
pub fn report_policy_update(update: &PolicyUpdate, policy: &Path) {
    match update {
        PolicyUpdate::Created => println!("Created {}", policy.display()),
        PolicyUpdate::AlreadyPresent => {
            println!("Key already authorized in {}", policy.display())
        }
        PolicyUpdate::Inserted { style, .. } => {
            println!("Added key to {} ({style})", policy.display())
        }
        PolicyUpdate::RuleAdded { .. } => {
            println!("Added a rule for the private settings to {}", policy.display())
        }
        PolicyUpdate::FallbackAppended { reason, .. } => {
            eprintln!("WARNING: {} could not be edited in place: {reason}", policy.display());
            eprintln!("WARNING: a new rule was appended; review the file before committing");
        }
    }
    if let Some(backup) = update.backup() {
        println!("  Backup: {}", backup.display());
    }
}

// ── Interrupt handling ────────────────────────────────────────────────────────

/// Scratch registry plus the state the signal watcher needs.
#[derive(Debug, Clone, Default)]
pub struct Interrupts {
    registry: ScratchRegistry,
    editing: Arc<AtomicBool>,
}

impl Interrupts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry to hand to the secret store.
    pub fn registry(&self) -> ScratchRegistry {
        self.registry.clone()
    }

    /// Wrap `editor` so terminal interrupts aimed at it are not treated as
    /// interrupts of the tool.
    pub fn editor(&self, editor: CommandEditor) -> GuardedEditor {
        GuardedEditor {
            inner: editor,
            editing: Arc::clone(&self.editing),
        }
    }

    /// Run `op` on a blocking task under the signal watcher.
    pub fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let interrupts = self.clone();

        runtime.block_on(async move {
            let shutdown = CancellationToken::new();
            let watcher = tokio::spawn(interrupts.watch(shutdown.clone()));
            // First poll of the watcher installs the signal handlers; it must
            // happen before the operation can create scratch files.
            tokio::task::yield_now().await;

            let outcome = tokio::task::spawn_blocking(op).await;
            shutdown.cancel();
            let _ = watcher.await;

            match outcome {
                Ok(result) => result,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => Err(anyhow!("operation did not complete: {e}")),
            }
        })
    }

    async fn watch(self, shutdown: CancellationToken) {
        loop {
            let signal = tokio::select! {
                _ = shutdown.cancelled() => return,
                signal = next_signal() => signal,
            };

            // Ctrl-C reaches the editor too; it handles its own.
            if signal == Signal::Interrupt && self.editing.load(Ordering::SeqCst) {
                log::debug!("interrupt ignored while the editor is open");
                continue;
            }

            let removed = self.registry.purge();
            log::warn!("{signal:?} received; removed {removed} scratch file(s)");
            eprintln!("interrupted");
            std::process::exit(INTERRUPTED_EXIT);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Interrupt,
    Terminate,
}

#[cfg(unix)]
async fn next_signal() -> Signal {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            _ = ctrl_c() => Signal::Interrupt,
            _ = term.recv() => Signal::Terminate,
        },
        Err(e) => {
            log::debug!("SIGTERM handler unavailable: {e}");
            ctrl_c().await;
            Signal::Interrupt
        }
    }
}

#[cfg(not(unix))]
async fn next_signal() -> Signal {
    ctrl_c().await;
    Signal::Interrupt
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::debug!("Ctrl-C handler unavailable: {e}");
        std::future::pending::<()>().await;
    }
}

/// An editor that marks the editing session for the signal watcher.
#[derive(Debug)]
pub struct GuardedEditor {
    inner: CommandEditor,
    editing: Arc<AtomicBool>,
}

impl Editor for GuardedEditor {
    fn edit(&mut self, file: &Path) -> vaultboot::Result<()> {
        self.editing.store(true, Ordering::SeqCst);
        let result = self.inner.edit(file);
        self.editing.store(false, Ordering::SeqCst);
        result
    }
}
