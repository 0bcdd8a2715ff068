use std::io::{BufRead, Write};

use camino::Utf8Path;
use owo_colors::OwoColorize;
use pgseed::seed::{SCRIPT_FILE, list_tables, read_seed_dir, write_seed_dir};
use pgseed::{
    CaptureOptions, ConnectionExt, DumpOptions, ExcludeSet, FlattenOptions, FlattenOutcome,
    SeedSet, TableFilter,
};
use tokio_postgres::{Client, NoTls};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::CliError;
use crate::runner::GooseRunner;

/// Open a connection and drive it in the background.
pub async fn connect(settings: &Settings) -> Result<Client, CliError> {
    let url = settings.database_url()?;
    debug!(database = %mask_password(url), "connecting");
    let (client, connection) =
        tokio_postgres::connect(url, NoTls)
            .await
            .map_err(|source| CliError::Connect {
                url: mask_password(url),
                source,
            })?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!(error = %e, "connection closed with error");
        }
    });
    Ok(client)
}

fn excludes(settings: &Settings) -> ExcludeSet {
    ExcludeSet::new(settings.exclude.iter().cloned())
}

pub async fn schema_dump(
    settings: &Settings,
    extra_exclude: Vec<String>,
    output: Option<&Utf8Path>,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let mut exclude = excludes(settings);
    for table in extra_exclude {
        exclude.insert(table);
    }

    let mut client = connect(settings).await?;
    let opts = DumpOptions {
        exclude,
        ledger: settings.ledger_table.clone(),
        cancel: cancel.clone(),
    };
    let ddl = pgseed::dump_schema(&mut client, &opts).await?;

    match output {
        Some(path) => {
            std::fs::write(path, &ddl).map_err(|source| CliError::Io {
                path: path.to_owned(),
                source,
            })?;
            eprintln!("{} wrote {}", "✓".green(), path);
        }
        None => print!("{ddl}"),
    }
    Ok(())
}

pub struct SeedCreate {
    pub name: String,
    pub filter: TableFilter,
    pub dry_run: bool,
    pub no_flatten: bool,
}

pub async fn seed_create(
    settings: &Settings,
    args: SeedCreate,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let dir = settings.seed_dir.join(&args.name);
    let exclude = excludes(settings).with_ledger(&settings.ledger_table);

    let mut client = connect(settings).await?;
    let tables = list_tables(&client.traced_with(cancel), &args.filter, &exclude).await?;
    info!(seed = %args.name, tables = tables.len(), "capturing seed");

    let opts = CaptureOptions {
        tables,
        script: Some(dir.join(SCRIPT_FILE)),
        cancel: cancel.clone(),
    };
    let seeds = pgseed::capture(&mut client, &opts).await?;

    if args.dry_run {
        print_summary(&seeds);
        println!("{}", "Dry run: nothing written.".yellow());
        return Ok(());
    }

    let path = write_seed_dir(&dir, &seeds)?;
    println!(
        "{} wrote {} ({} tables, {} rows)",
        "✓".green(),
        path,
        seeds.artifacts.len(),
        seeds.row_count()
    );

    if !args.no_flatten {
        run_flatten(&mut client, settings, cancel).await?;
    }
    Ok(())
}

fn print_summary(seeds: &SeedSet) {
    for artifact in &seeds.artifacts {
        println!("  {:<40} {:>8} rows", artifact.table.to_string(), artifact.rows.len());
    }
    println!(
        "{} tables, {} rows",
        seeds.artifacts.len().bold(),
        seeds.row_count().bold()
    );
}

pub async fn seed_apply(
    settings: &Settings,
    name: &str,
    no_migrate: bool,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let dir = settings.seed_dir.join(name);
    // fail on a bad seed before touching the database
    let seeds = read_seed_dir(&dir)?;

    let runner = if no_migrate {
        None
    } else {
        Some(GooseRunner::new(
            settings.migrations_dir.clone(),
            settings.database_url()?,
        ))
    };

    if let Some(runner) = &runner {
        runner.up_by_one().await?;
    }

    let mut client = connect(settings).await?;
    let stats = pgseed::replay(&mut client, &seeds, cancel).await?;
    println!(
        "{} loaded seed {} ({} tables, {} rows)",
        "✓".green(),
        name.bold(),
        stats.tables,
        stats.rows
    );

    if let Some(runner) = &runner {
        runner.up().await?;
    }
    Ok(())
}

pub async fn flatten(
    settings: &Settings,
    force: bool,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    if !force {
        let prompt = format!(
            "Replace the applied migrations in {} with a single baseline?",
            settings.migrations_dir
        );
        let stdin = std::io::stdin();
        let confirmed = confirm(&prompt, &mut stdin.lock(), &mut std::io::stderr())
            .map_err(CliError::Prompt)?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let mut client = connect(settings).await?;
    run_flatten(&mut client, settings, cancel).await
}

async fn run_flatten(
    client: &mut Client,
    settings: &Settings,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let opts = FlattenOptions {
        ledger: settings.ledger_table.clone(),
        exclude: excludes(settings),
        cancel: cancel.clone(),
        ..FlattenOptions::new(settings.migrations_dir.clone())
    };
    match pgseed::flatten(client, &opts).await? {
        FlattenOutcome::NothingApplied => {
            println!("No applied migrations; nothing to flatten.");
        }
        FlattenOutcome::Flattened { baseline, removed } => {
            println!(
                "{} flattened {} migrations into {}",
                "✓".green(),
                removed.len(),
                baseline
            );
        }
    }
    Ok(())
}

pub fn migrate_new(settings: &Settings, name: &str) -> Result<(), CliError> {
    let path = pgseed::migrations::new_migration(&settings.migrations_dir, name, chrono::Utc::now())?;
    println!("{} created {}", "✓".green(), path);
    Ok(())
}

/// Ask a yes/no question; only `y` or `yes` confirms.
fn confirm(prompt: &str, input: &mut impl BufRead, output: &mut impl Write) -> std::io::Result<bool> {
    write!(output, "{prompt} [y/N] ")?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

/// Mask the password in a database URL for display.
fn mask_password(url: &str) -> String {
    if let Some(start) = url.find("://")
        && let Some(at) = url.rfind('@')
        && at > start
        && let Some(colon) = url[start + 3..at].find(':')
    {
        let user = &url[start + 3..start + 3 + colon];
        return format!("{}{}:***{}", &url[..start + 3], user, &url[at..]);
    }
    url.to_string()
}
