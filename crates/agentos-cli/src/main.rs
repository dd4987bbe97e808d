//! AgentOS CLI — entry point.
//!
//! # Commands
//!
//! - `agentos migrate` — apply schema migrations
//! - `agentos extensions <action>` — manage installed extensions
//! - `agentos status` — configuration, store health, exposure warning
//!
//! # Exit codes
//!
//! 0 success; 1 generic failure; 2 validation error; 451 sandbox
//! unavailable / execution blocked.

mod extensions_cmd;
mod status;

use clap::{Parser, Subcommand};
use tracing::info;

use agentos_core::config::{load_config, KernelConfig};
use agentos_core::error::{ErrorClass, ErrorCode, KernelError};
use agentos_core::store::Db;
use agentos_core::utils::expand_home;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// AgentOS — governance kernel for multi-channel agents
#[derive(Parser)]
#[command(name = "agentos", version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true, default_value_t = false)]
    logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply schema migrations to the kernel database
    Migrate,

    /// Manage extensions
    Extensions {
        #[command(subcommand)]
        action: extensions_cmd::ExtensionsCommands,
    },

    /// Show configuration and store health
    Status,
}

// ─────────────────────────────────────────────
// Exit codes
// ─────────────────────────────────────────────

const EXIT_OK: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_VALIDATION: i32 = 2;
const EXIT_SANDBOX_BLOCKED: i32 = 451;

/// Map a kernel error onto the CLI exit-code contract.
fn exit_code_for(error: &KernelError) -> i32 {
    if error.code == ErrorCode::SandboxUnavailable {
        return EXIT_SANDBOX_BLOCKED;
    }
    match error.code.class() {
        ErrorClass::Validation => EXIT_VALIDATION,
        _ => EXIT_FAILURE,
    }
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

fn open_db(config: &KernelConfig) -> Result<Db, KernelError> {
    Db::open(&expand_home(&config.store.path))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.logs { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config = load_config(None);

    let result: Result<(), KernelError> = match cli.command {
        Commands::Migrate => run_migrate(&config),
        Commands::Extensions { action } => extensions_cmd::run(&config, action).await,
        Commands::Status => status::run(&config),
    };

    match result {
        Ok(()) => std::process::exit(EXIT_OK),
        Err(error) => {
            eprintln!("{error}");
            if let Some(hint) = &error.hint {
                eprintln!("hint: {hint}");
            }
            std::process::exit(exit_code_for(&error));
        }
    }
}

fn run_migrate(config: &KernelConfig) -> Result<(), KernelError> {
    let db = open_db(config)?;
    let applied = db.migrate()?;
    let version = db.schema_version()?;
    info!(applied, version, "migrations complete");
    println!("schema at version {version} ({applied} migration(s) applied)");
    Ok(())
}
