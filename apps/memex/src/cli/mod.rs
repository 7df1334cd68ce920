//! # Memex CLI Module
//!
//! This module implements the CLI interface for Memex.
//!
//! ## Available Commands
//!
//! - `init` - Initialize a new database
//! - `write` / `read` / `remove` - Path-addressed values
//! - `secret` / `noise` - Stealth scope declarations
//! - `pointer` / `identity` / `operator` - Structural declarations
//! - `derive` / `collect` - Live formulas and batch reads
//! - `explain` / `inspect` / `verify` - Diagnostics
//! - `export` / `import` / `replay` - Portability

mod commands;

use crate::config::{DATABASE_ENV, FileConfig, Overrides, Settings};
use clap::{Parser, Subcommand};
use memex_core::MemexError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Memex - path-addressed semantic data engine
///
/// Every write is a hash-chained thought; reads come from the
/// last-writer-wins index, secret scopes stay out of it.
#[derive(Parser, Debug)]
#[command(name = "memex")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the database (default: memex.db, or $MEMEX_DB)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend: "redb" (journal) or "file" (snapshot file)
    #[arg(short = 'B', long, global = true)]
    pub backend: Option<String>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Configuration file (default: ./memex.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Write a value (JSON, or plain text) at a path
    Write {
        /// Semantic path, optionally ending in an operator symbol
        path: String,

        /// Value as JSON; anything that is not valid JSON is stored as text
        value: String,

        /// Operator symbol applied as if appended to the path
        #[arg(long)]
        op: Option<String>,
    },

    /// Read the value at a path (selectors allowed)
    Read { path: String },

    /// Remove a path and everything under it
    Remove { path: String },

    /// Declare a secret scope
    Secret { scope: String, secret: String },

    /// Declare noise on a scope, starting a new secret lineage
    Noise { scope: String, noise: String },

    /// Make a path point at another path
    Pointer { path: String, target: String },

    /// Claim a username at a path
    Identity { path: String, username: String },

    /// Bind an operator symbol to a kind
    Operator { symbol: String, kind: String },

    /// Derive a path from an expression
    Derive { path: String, expression: String },

    /// Read several paths at once
    Collect {
        #[arg(required = true)]
        paths: Vec<String>,

        /// Record the collected values at this scope
        #[arg(long)]
        at: Option<String>,
    },

    /// Show a value with its derivation and inputs
    Explain { path: String },

    /// Show the ledger tail, the index and the declared scopes
    Inspect {
        /// Number of ledger records to show (0 = all)
        #[arg(short, long)]
        last: Option<usize>,
    },

    /// Recheck every hash and chain link
    Verify,

    /// Export a snapshot
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Export format (binary, json)
        #[arg(short = 't', long, default_value = "binary")]
        format: String,
    },

    /// Replace the store with a snapshot (binary or JSON)
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Rebuild the store by re-applying a snapshot's ledger
    Replay {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Resolve settings from flags, environment and configuration file.
pub fn settings_for(cli: &Cli) -> Result<Settings, MemexError> {
    let file = FileConfig::load(cli.config.as_deref())?;
    Settings::resolve(
        Overrides {
            database: cli.database.clone(),
            backend: cli.backend.clone(),
            json_mode: cli.json_mode,
        },
        file,
        std::env::var(DATABASE_ENV).ok(),
    )
}

/// Execute the CLI with parsed arguments and print the result.
pub fn execute(cli: Cli) -> Result<(), MemexError> {
    let settings = settings_for(&cli)?;
    let command = cli.command.unwrap_or(Commands::Inspect { last: None });
    let output = run(&settings, command)?;
    output.print(settings.json_mode);
    Ok(())
}

/// Run one command against the configured database.
pub fn run(settings: &Settings, command: Commands) -> Result<Output, MemexError> {
    match command {
        Commands::Init { force } => cmd_init(settings, force),
        Commands::Write { path, value, op } => cmd_write(settings, &path, &value, op.as_deref()),
        Commands::Read { path } => cmd_read(settings, &path),
        Commands::Remove { path } => cmd_remove(settings, &path),
        Commands::Secret { scope, secret } => cmd_secret(settings, &scope, &secret),
        Commands::Noise { scope, noise } => cmd_noise(settings, &scope, &noise),
        Commands::Pointer { path, target } => cmd_pointer(settings, &path, &target),
        Commands::Identity { path, username } => cmd_identity(settings, &path, &username),
        Commands::Operator { symbol, kind } => cmd_operator(settings, &symbol, &kind),
        Commands::Derive { path, expression } => cmd_derive(settings, &path, &expression),
        Commands::Collect { paths, at } => cmd_collect(settings, &paths, at.as_deref()),
        Commands::Explain { path } => cmd_explain(settings, &path),
        Commands::Inspect { last } => cmd_inspect(settings, last),
        Commands::Verify => cmd_verify(settings),
        Commands::Export { output, format } => cmd_export(settings, &output, &format),
        Commands::Import { input } => cmd_import(settings, &input),
        Commands::Replay { input } => cmd_replay(settings, &input),
    }
}
