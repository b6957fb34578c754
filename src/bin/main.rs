//! relmap CLI - Generate and apply schemas for described model types
//!
//! Usage:
//!   relmap script <model.toml> [--type <key>] [--schema <name>]
//!   relmap describe <model.toml> <key>
//!   relmap procedures <model.toml> <key>
//!   relmap install <model.toml> --dataset <name> [--type <key>]
//!   relmap uninstall <model.toml> --dataset <name> --type <key>
//!
//! Logging is controlled with `RELMAP_LOG` (e.g. `RELMAP_LOG=relmap=debug`).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use relmap::cache::fingerprint;
use relmap::config::Settings;
use relmap::metadata::{load_descriptor_file, Inspector};
use relmap::migrate::{MigrationPlan, TableState};
use relmap::provider::{DataProvider, ProviderOptions, WorkerFactory};
use relmap::schema::{LanguageSet, SchemaBuilder, TableSchema};
use relmap::sql::{Dialect, Script};
use relmap::statement::procedure;
use relmap::{Error, Result};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relmap")]
#[command(about = "relmap - metadata-driven tables, statements and migrations for SQL Server")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to RELMAP_CONFIG, ./relmap.toml, then the user config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the creation script for every type, or one type
    Script {
        /// Path to the descriptor file
        file: PathBuf,

        /// Type key (Module.Name); all types when omitted
        #[arg(short, long = "type")]
        type_key: Option<String>,

        /// Schema (owner) override
        #[arg(short, long)]
        schema: Option<String>,
    },

    /// Print the tables a type maps to, as JSON
    Describe {
        file: PathBuf,
        type_key: String,
    },

    /// Print the stored procedures and table types of a type
    Procedures {
        file: PathBuf,
        type_key: String,
    },

    /// Create or migrate tables through the configured worker
    Install {
        file: PathBuf,

        /// Dataset whose connection and schema to use
        #[arg(short, long)]
        dataset: String,

        #[arg(short, long = "type")]
        type_key: Option<String>,
    },

    /// Drop the tables of a type through the configured worker
    Uninstall {
        file: PathBuf,

        #[arg(short, long)]
        dataset: String,

        #[arg(short, long = "type")]
        type_key: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RELMAP_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Script {
            file,
            type_key,
            schema,
        } => load_settings(cli.config.as_ref())
            .and_then(|s| cmd_script(&s, file, type_key, schema)),
        Commands::Describe { file, type_key } => {
            load_settings(cli.config.as_ref()).and_then(|s| cmd_describe(&s, file, &type_key))
        }
        Commands::Procedures { file, type_key } => {
            load_settings(cli.config.as_ref()).and_then(|s| cmd_procedures(&s, file, &type_key))
        }
        Commands::Install {
            file,
            dataset,
            type_key,
        } => load_settings(cli.config.as_ref())
            .and_then(|s| run_async(cmd_install(s, file, dataset, type_key))),
        Commands::Uninstall {
            file,
            dataset,
            type_key,
        } => load_settings(cli.config.as_ref())
            .and_then(|s| run_async(cmd_uninstall(s, file, dataset, type_key))),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::FAILURE
        }
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings> {
    Ok(match path {
        Some(p) => Settings::from_file(p)?,
        None => Settings::load()?,
    })
}

fn run_async(fut: impl std::future::Future<Output = Result<()>>) -> Result<()> {
    tokio::runtime::Runtime::new()?.block_on(fut)
}

fn load_model(file: &Path) -> Result<(Arc<Inspector>, Vec<String>)> {
    let inspector = Inspector::new(Arc::new(load_descriptor_file(file)?));
    let mut keys = inspector.type_keys();
    keys.sort();
    Ok((Arc::new(inspector), keys))
}

/// Desired tables of the selected types, base tables once.
fn desired_tables(
    inspector: &Inspector,
    languages: &LanguageSet,
    schema: &str,
    keys: &[String],
) -> Result<Vec<TableSchema>> {
    let builder = SchemaBuilder::new(inspector, languages, schema);
    let mut out: Vec<TableSchema> = Vec::new();
    for key in keys {
        let model = inspector.describe(key)?;
        for table in builder.build_all(&model)? {
            if !out.iter().any(|t| t.name.eq_ignore_ascii_case(&table.name)) {
                out.push(table);
            }
        }
    }
    Ok(out)
}

fn cmd_script(
    settings: &Settings,
    file: PathBuf,
    type_key: Option<String>,
    schema: Option<String>,
) -> Result<()> {
    let (inspector, all) = load_model(&file)?;
    let keys = type_key.map(|k| vec![k]).unwrap_or(all);
    let languages = LanguageSet::new(&settings.engine.languages)?;
    let schema = schema.unwrap_or_else(|| settings.engine.schema.clone());
    let tables = desired_tables(&inspector, &languages, &schema, &keys)?;

    let states: Vec<TableState<'_>> = tables
        .iter()
        .flat_map(|t| t.walk())
        .map(|t| TableState::new(t, None, false))
        .collect();
    let plan = MigrationPlan::install(&states)?;

    println!("-- relmap creation script");
    println!("-- Source: {}", file.display());
    println!("-- Fingerprint: {}", fingerprint(&tables)?);
    println!();
    print!("{}", plan.to_script());

    if settings.engine.emit_procedures {
        let mut script = Script::new();
        for table in tables
            .iter()
            .filter(|t| t.derived.is_none() && procedure::supports_procedures(t))
        {
            script.extend(procedure::install_statements(table)?);
        }
        print!("{}", script.to_sql(Dialect::TSql));
    }
    Ok(())
}

fn cmd_describe(settings: &Settings, file: PathBuf, type_key: &str) -> Result<()> {
    let (inspector, _) = load_model(&file)?;
    let languages = LanguageSet::new(&settings.engine.languages)?;
    let model = inspector.describe(type_key)?;
    let tables = SchemaBuilder::new(&inspector, &languages, settings.engine.schema.clone())
        .build_all(&model)?;
    println!("{}", serde_json::to_string_pretty(&tables)?);
    Ok(())
}

fn cmd_procedures(settings: &Settings, file: PathBuf, type_key: &str) -> Result<()> {
    let (inspector, _) = load_model(&file)?;
    let languages = LanguageSet::new(&settings.engine.languages)?;
    let model = inspector.describe(type_key)?;
    let tables = SchemaBuilder::new(&inspector, &languages, settings.engine.schema.clone())
        .build_all(&model)?;
    let table = tables
        .last()
        .filter(|t| t.derived.is_none())
        .ok_or_else(|| Error::Internal(format!("{} is derived and has no procedures", type_key)))?;

    let mut script = Script::new();
    script.extend(procedure::install_statements(table)?);
    print!("{}", script.to_sql(Dialect::TSql));
    Ok(())
}

fn connect(settings: &Settings, file: &Path, dataset: &str) -> Result<(DataProvider, Vec<String>)> {
    let (inspector, keys) = load_model(file)?;
    let worker = settings.connection_for(dataset)?.worker_path()?.ok_or_else(|| {
        Error::Internal(format!("no worker configured for the connection of {}", dataset))
    })?;
    let options = ProviderOptions::from_settings(settings, dataset)?;
    let factory = WorkerFactory::new(worker, options.statement_timeout);
    let provider = DataProvider::builder(options)
        .inspector(inspector)
        .factory(Arc::new(factory))
        .build()?;
    Ok((provider, keys))
}

async fn cmd_install(
    settings: Settings,
    file: PathBuf,
    dataset: String,
    type_key: Option<String>,
) -> Result<()> {
    let (provider, all) = connect(&settings, &file, &dataset)?;
    for key in type_key.map(|k| vec![k]).unwrap_or(all) {
        let plan = provider.install(&key).await?;
        if plan.is_empty() {
            println!("{}: up to date", key);
        } else {
            println!("{}: {} statement(s) executed", key, plan.len());
        }
    }
    Ok(())
}

async fn cmd_uninstall(
    settings: Settings,
    file: PathBuf,
    dataset: String,
    type_key: String,
) -> Result<()> {
    let (provider, _) = connect(&settings, &file, &dataset)?;
    let plan = provider.uninstall(&type_key).await?;
    println!("{}: {} statement(s) executed", type_key, plan.len());
    Ok(())
}
