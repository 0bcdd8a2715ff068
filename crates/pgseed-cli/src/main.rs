//! pgseed: schema dumps, seed data and migration flattening for Postgres.

mod commands;
mod config;
mod error;
mod runner;

use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{ArgAction, Parser, Subcommand};
use pgseed::TableFilter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::commands::SeedCreate;
use crate::config::Overrides;
use crate::error::CliError;

/// Schema dumps, seed data and migration flattening for Postgres.
#[derive(Parser, Debug)]
#[command(name = "pgseed", version, about)]
struct Cli {
    /// Database connection URL
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Migrations directory [default: migrations]
    #[arg(long, global = true, env = "PGSEED_MIGRATIONS_DIR")]
    migrations_dir: Option<Utf8PathBuf>,

    /// Seed directory [default: seed]
    #[arg(long, global = true, env = "PGSEED_SEED_DIR")]
    seed_dir: Option<Utf8PathBuf>,

    /// Migration ledger table [default: goose_db_version]
    #[arg(long, global = true, env = "PGSEED_LEDGER_TABLE")]
    ledger_table: Option<String>,

    /// Config file [default: nearest .config/pgseed.toml]
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect the database schema
    Schema {
        #[command(subcommand)]
        command: SchemaCommand,
    },
    /// Capture and load seed data
    Seed {
        #[command(subcommand)]
        command: SeedCommand,
    },
    /// Replace applied migrations with a single baseline migration
    Flatten {
        /// Skip the confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
    /// Manage migration files
    Migrate {
        #[command(subcommand)]
        command: MigrateCommand,
    },
}

#[derive(Subcommand, Debug)]
enum SchemaCommand {
    /// Print the schema as executable DDL
    Dump {
        /// Table to leave out, as `table` or `schema.table` (repeatable)
        #[arg(long, short = 'x')]
        exclude: Vec<String>,

        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<Utf8PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum SeedCommand {
    /// Capture seed data by running <seed-dir>/<name>/dump.sql
    Create {
        /// Seed name
        name: String,

        /// Schemas to capture, comma-separated [default: public]
        #[arg(long, value_delimiter = ',', conflicts_with = "all_schemas")]
        schemas: Vec<String>,

        /// Capture every non-system schema
        #[arg(long, short = 'a')]
        all_schemas: bool,

        /// Show what would be captured without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Do not flatten migrations after writing the seed
        #[arg(long)]
        no_flatten: bool,
    },
    /// Load a seed into the database
    Apply {
        /// Seed name
        name: String,

        /// Do not run migrations around the load
        #[arg(long)]
        no_migrate: bool,
    },
}

#[derive(Subcommand, Debug)]
enum MigrateCommand {
    /// Create an empty timestamped migration
    New {
        /// Migration name (e.g. "add_users")
        name: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // a missing .env is fine
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => "pgseed=info",
        1 => "pgseed=debug",
        _ => "pgseed=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Cancel in-flight work on SIGINT or SIGTERM.
fn setup_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let (mut sigint, mut sigterm) =
                match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                    (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!(error = %e, "could not install signal handlers");
                        return;
                    }
                };
            tokio::select! {
                _ = sigint.recv() => info!("received SIGINT, cancelling"),
                _ = sigterm.recv() => info!("received SIGTERM, cancelling"),
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "could not install Ctrl-C handler");
                return;
            }
            info!("received Ctrl-C, cancelling");
        }

        cancel.cancel();
    });

    token
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let overrides = Overrides {
        database_url: cli.database_url,
        migrations_dir: cli.migrations_dir,
        seed_dir: cli.seed_dir,
        ledger_table: cli.ledger_table,
    };
    let settings = config::load(&overrides, cli.config.as_deref())?;
    if let Some(path) = &settings.config_path {
        debug!(config = %path, "loaded config file");
    }

    let cancel = setup_signal_handler();

    match cli.command {
        Commands::Schema {
            command: SchemaCommand::Dump { exclude, output },
        } => commands::schema_dump(&settings, exclude, output.as_deref(), &cancel).await,
        Commands::Seed {
            command:
                SeedCommand::Create {
                    name,
                    schemas,
                    all_schemas,
                    dry_run,
                    no_flatten,
                },
        } => {
            let filter = if all_schemas {
                TableFilter::AllSchemas
            } else if schemas.is_empty() {
                TableFilter::default()
            } else {
                TableFilter::Schemas(schemas)
            };
            let args = SeedCreate {
                name,
                filter,
                dry_run,
                no_flatten,
            };
            commands::seed_create(&settings, args, &cancel).await
        }
        Commands::Seed {
            command: SeedCommand::Apply { name, no_migrate },
        } => commands::seed_apply(&settings, &name, no_migrate, &cancel).await,
        Commands::Flatten { force } => commands::flatten(&settings, force, &cancel).await,
        Commands::Migrate {
            command: MigrateCommand::New { name },
        } => commands::migrate_new(&settings, &name),
    }
}
