//! Stash CLI
//!
//! Save, read, delete and query records in a Stash namespace from the shell.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stash")]
#[command(author, version, about = "Stash - an in-process table store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Namespace to operate on (overrides settings and STASH_NAMESPACE)
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Save a record; fields are given as key=value
    Save {
        table: String,

        /// Field assignments, e.g. name=alice age=30
        #[arg(required = true)]
        fields: Vec<String>,
    },

    /// Show one record
    Get { table: String, id: u64 },

    /// Delete one record
    Delete { table: String, id: u64 },

    /// List records in identifier order
    Query {
        table: String,

        /// Only show records whose field equals the value (key=value)
        #[arg(short, long = "where")]
        filters: Vec<String>,
    },

    /// List tables that have allocated identifiers
    Tables,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "stash_cli=debug,stash_core=debug"
    } else {
        "stash_cli=info"
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    debug!("Starting Stash CLI");

    let namespace = cli.namespace.as_deref();
    let result = match cli.command {
        Commands::Save { table, fields } => {
            commands::records::save(namespace, &table, &fields).await
        }
        Commands::Get { table, id } => commands::records::get(namespace, &table, id).await,
        Commands::Delete { table, id } => commands::records::delete(namespace, &table, id).await,
        Commands::Query { table, filters } => {
            commands::records::query(namespace, &table, &filters).await
        }
        Commands::Tables => commands::records::tables(namespace).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show(namespace).await,
        },
    };

    if let Err(ref e) = result {
        error!("Command failed: {:#}", e);
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    result
}
