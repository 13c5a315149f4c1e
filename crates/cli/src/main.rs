//! `ember` - command-line driver for the Ember scripting language.
//!
//! A thin shell around `ember_vm::Vm`: it owns the one responsibility the
//! base spec explicitly leaves to "external collaborators" (§1) — reading a
//! file, constructing a VM, running the module, and turning a `VmError`
//! into a process exit code.

mod config;

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{generate, Shell};
use config::Config;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(ClapParser)]
#[command(name = "ember")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run Ember scripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Script to run (shorthand for `ember run <script>`)
    script: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run an Ember module to completion
    Run {
        /// Ember source file
        script: PathBuf,
    },
    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let script = match cli.command {
        Some(Commands::Run { script }) => script,
        Some(Commands::Completions { shell }) => {
            run_completions(shell);
            return ExitCode::SUCCESS;
        }
        None => match cli.script {
            Some(script) => script,
            None => {
                eprintln!("Error: no script given (usage: ember <script.ember>)");
                return ExitCode::FAILURE;
            }
        },
    };

    match run(&script) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "ember", &mut io::stdout());
}

/// Reads `Ember.toml` (if present), installs a tracing subscriber, builds a
/// fresh VM (§6 `new_vm`), and runs `script` to completion (§6
/// `execute_module`). The VM is dropped at the end of this function's
/// scope, which is `free_vm` in Rust terms — there is no separate teardown
/// call to make.
fn run(script: &Path) -> Result<(), String> {
    let config = Config::load(script)?;
    init_tracing(config.tracing);

    let source = std::fs::read_to_string(script)
        .map_err(|e| format!("could not read '{}': {e}", script.display()))?;
    let file = script.display().to_string();

    let mut vm = ember_vm::Vm::new().map_err(|e| e.to_string())?;
    if !config.search_paths.is_empty() {
        vm.search_paths = config.search_paths;
    } else if let Some(dir) = script.parent() {
        vm.search_paths = vec![dir.to_path_buf()];
    }

    vm.execute_module(&file, &source).map_err(|e| e.to_string())?;
    Ok(())
}

/// Ember is an embeddable library first (§[FULL-1]): logging is opt-in
/// noise at `debug`/`trace` levels driven by `RUST_LOG`, the way
/// `navicore-cem3/crates/lsp` installs its subscriber, not printed by
/// default just because the CLI ran.
fn init_tracing(force_enable: bool) {
    let filter = if force_enable {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("ember_vm=debug".parse().unwrap())
            .add_directive("ember_compiler=debug".parse().unwrap())
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
