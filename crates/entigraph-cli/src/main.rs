//! Entigraph Command-Line Tool
//!
//! Compiles criteria against a schema file and runs them, or reconciles
//! payloads, against a local store.

mod commands;
mod formatter;

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use formatter::OutputFormat;

/// Entigraph Command-Line Tool
#[derive(Parser, Debug)]
#[command(name = "entigraph")]
#[command(version, about = "Compile, run and reconcile entigraph queries")]
pub struct Args {
    /// Schema file (JSON schema bundle)
    #[arg(short, long, global = true)]
    pub schema: Option<PathBuf>,

    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Store directory, overriding the configuration
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "json", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Query options shared by every read command.
#[derive(ClapArgs, Debug, Clone)]
pub struct QueryArgs {
    /// Root entity
    #[arg(short, long)]
    pub entity: String,

    /// Criteria payload, inline JSON or @file
    #[arg(long)]
    pub criteria: Option<String>,

    /// Domain expression over `self`
    #[arg(long)]
    pub filter: Option<String>,

    /// Positional parameter for the domain expression (JSON value)
    #[arg(short = 'p', long = "param")]
    pub params: Vec<String>,

    /// Ordering, e.g. `-total` or `customer.name`
    #[arg(short, long)]
    pub order: Vec<String>,

    /// Fields to project
    #[arg(long, value_delimiter = ',')]
    pub fields: Vec<String>,

    /// Drop filters that cannot be used instead of failing
    #[arg(long)]
    pub best_effort: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the compiled statement and its parameters
    Explain {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Count matching rows
    Count {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Fetch matching rows
    Select {
        #[command(flatten)]
        query: QueryArgs,

        /// Page size; zero uses the configured default
        #[arg(long, default_value_t = 0)]
        limit: usize,

        /// Rows to skip
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Reconcile a payload into the store
    Edit {
        /// Root entity
        #[arg(short, long)]
        entity: String,

        /// Payload, inline JSON or @file
        #[arg(long)]
        payload: String,

        /// Only check versions, write nothing
        #[arg(long)]
        verify: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("entigraph=info,entigraph_core=warn")),
        )
        .init();

    let args = Args::parse();
    match commands::run(&args) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
