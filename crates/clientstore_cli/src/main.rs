//! Command-line front end for the client store.
//!
//! # Responsibility
//! - Drive every store operation against a configured database.
//! - Map store error statuses to process exit codes.

use clap::{Parser, Subcommand};
use clientstore_core::db::{open_db, open_db_in_memory};
use clientstore_core::{
    init_logging, Client, ClientRepository, ErrorStatus, SqliteClientRepository, StoreConfig,
    StoreError, DEFAULT_ORGANIZATION,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "clientstore", version, about = "Inspect and edit persisted API clients")]
struct Cli {
    /// JSON config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite file, overriding `database_path` from the config.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print one client as JSON.
    Show { name: String },
    /// Print every client name.
    List,
    /// Print the number of admin clients.
    CountAdmins,
    /// Insert or replace a client from a JSON document.
    Merge { json: String },
    /// Rename a client.
    Rename { old_name: String, new_name: String },
    /// Delete a client.
    Delete { name: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            eprintln!("error: {}", failure.message);
            ExitCode::from(failure.code)
        }
    }
}

/// Exit code for store errors with internal status. Distinct from the code
/// used when an aggregate read aborts the process.
const EXIT_INTERNAL: u8 = 5;

struct Failure {
    message: String,
    code: u8,
}

impl Failure {
    fn setup(message: impl ToString) -> Self {
        Self {
            message: message.to_string(),
            code: 2,
        }
    }
}

impl From<StoreError> for Failure {
    fn from(err: StoreError) -> Self {
        let code = match err.status() {
            ErrorStatus::NotFound => 4,
            ErrorStatus::Conflict => 9,
            ErrorStatus::Internal => EXIT_INTERNAL,
        };
        Self {
            message: format!("{err} (status {})", err.status().http_code()),
            code,
        }
    }
}

fn run(cli: Cli) -> Result<(), Failure> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path).map_err(Failure::setup)?,
        None => StoreConfig::default(),
    };
    if cli.db.is_some() {
        config.database_path = cli.db.clone();
    }

    if let Some(dir) = &config.log_dir {
        init_logging(&config.log_level, &dir.to_string_lossy()).map_err(Failure::setup)?;
    }

    let conn = match &config.database_path {
        Some(path) => open_db(path, config.busy_timeout()),
        None => open_db_in_memory(),
    }
    .map_err(Failure::setup)?;
    let repo =
        SqliteClientRepository::try_new(&conn)?.with_aggregate_failure(config.aggregate_failure);

    match cli.command {
        Command::Show { name } => {
            let client = repo.fetch(&name)?;
            println!("{}", to_json(&client)?);
        }
        Command::List => {
            for name in repo.list_names()? {
                println!("{name}");
            }
        }
        Command::CountAdmins => println!("{}", repo.count_admins()?),
        Command::Merge { json } => {
            let client: Client = serde_json::from_str(&json).map_err(Failure::setup)?;
            repo.merge(&client)?;
            log::info!("event=cli_merge module=cli status=ok name={}", client.name);
        }
        Command::Rename { old_name, new_name } => {
            repo.rename(&Client::new(old_name, DEFAULT_ORGANIZATION), &new_name)?;
        }
        Command::Delete { name } => {
            repo.delete(&Client::new(name, DEFAULT_ORGANIZATION))?;
        }
    }
    Ok(())
}

fn to_json(client: &Client) -> Result<String, Failure> {
    serde_json::to_string_pretty(client).map_err(Failure::setup)
}
