pub mod audit;
pub mod cli;
pub mod coerce;
pub mod config;
pub mod data;
pub mod document;
pub mod error;
pub mod execute;
pub mod mapping;
pub mod normalize;
pub mod path;
pub mod reconcile;
pub mod report;
pub mod schema;
pub mod statement;
pub mod store;

use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use log::{LevelFilter, debug, info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{
    cli::{Cli, Commands, ExecuteArgs, GenerateArgs, ModeArg, ValidateArgs},
    config::{EngineConfig, LoadMode},
    document::SourceDocument,
    execute::{ExecutionResult, MappingExecutor},
    mapping::{MappingRecord, MappingSet, load_mappings, sort_by_confidence},
    normalize::normalize,
    schema::TargetSchema,
    statement::generate,
    store::SqliteStore,
};

static LOGGER: OnceLock<()> = OnceLock::new();

pub fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("mapping_executor", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Generate(args) => handle_generate(&args),
        Commands::Validate(args) => handle_validate(&args),
        Commands::Execute(args) => handle_execute(&args),
    }
}

fn load_config(path: Option<&Path>, mode: Option<ModeArg>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(mode) = mode {
        config.mode = LoadMode::from(mode);
    }
    debug!("Engine configuration: {config:?}");
    Ok(config)
}

fn handle_generate(args: &GenerateArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), args.mode)?;
    let records = load_mappings(&args.mappings)?;
    let schema = TargetSchema::load(&args.schema)?;
    let mapping_set = MappingSet::from_records(&records);
    info!(
        "Generating {} load(s) for {} table(s) from {:?}",
        config.mode,
        mapping_set.len(),
        args.mappings
    );

    let mut artifacts = BTreeMap::new();
    let mut failures = 0usize;
    for (table, table_records) in mapping_set.tables() {
        let generated = normalize(table, table_records)
            .map_err(anyhow::Error::from)
            .and_then(|normalized| {
                generate(table, &normalized.kept, &schema, config.mode, &config)
                    .map_err(anyhow::Error::from)
            });
        match generated {
            Ok(statement) => {
                let text = statement.text();
                println!(
                    "-- {} ({} into {})\n{text}\n",
                    statement.table, statement.mode, statement.target
                );
                artifacts.insert(statement.table.clone(), text);
            }
            Err(err) => {
                warn!("Skipping table {table}: {err}");
                failures += 1;
            }
        }
    }

    if let Some(dir) = &args.artifacts {
        let manifest = write_artifacts(dir, config.mode, &artifacts)?;
        info!(
            "Wrote {} artifact(s) and manifest {:?}",
            artifacts.len(),
            manifest
        );
    }
    if failures > 0 {
        bail!("{failures} table(s) could not be generated");
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ArtifactEntry {
    table: String,
    file: String,
    sha256: String,
}

#[derive(Debug, Serialize)]
struct ArtifactManifest {
    mode: LoadMode,
    generated_at: String,
    artifacts: Vec<ArtifactEntry>,
}

/// Writes one `.sql` file per table and a `manifest.json` listing their
/// SHA-256 digests. Returns the manifest path.
pub fn write_artifacts(
    dir: &Path,
    mode: LoadMode,
    artifacts: &BTreeMap<String, String>,
) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Creating artifact directory {dir:?}"))?;
    let mut entries = Vec::with_capacity(artifacts.len());
    for (table, text) in artifacts {
        let file = format!("{table}.sql");
        let path = dir.join(&file);
        fs::write(&path, text).with_context(|| format!("Writing artifact {path:?}"))?;
        entries.push(ArtifactEntry {
            table: table.clone(),
            file,
            sha256: format!("{:x}", Sha256::digest(text.as_bytes())),
        });
    }
    let manifest = ArtifactManifest {
        mode,
        generated_at: Utc::now().to_rfc3339(),
        artifacts: entries,
    };
    let manifest_path = dir.join("manifest.json");
    let json = serde_json::to_string_pretty(&manifest).context("Serializing artifact manifest")?;
    fs::write(&manifest_path, json)
        .with_context(|| format!("Writing manifest {manifest_path:?}"))?;
    Ok(manifest_path)
}

/// Reads the schema file when given, otherwise the catalog of `database`.
fn resolve_schema(
    store: &SqliteStore,
    schema: Option<&Path>,
    records: &[MappingRecord],
    database: &Path,
) -> Result<TargetSchema> {
    match schema {
        Some(path) => TargetSchema::load(path),
        None => {
            let tables = MappingSet::from_records(records).table_names();
            info!(
                "Introspecting {} table(s) from {:?}",
                tables.len(),
                database
            );
            store
                .introspect(&tables)
                .with_context(|| format!("Reading catalog of {database:?}"))
        }
    }
}

fn print_result(result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        let json = serde_json::to_string_pretty(result).context("Serializing execution result")?;
        println!("{json}");
    } else {
        print!("{}", report::render_summary(result));
    }
    Ok(())
}

fn handle_validate(args: &ValidateArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), args.mode)?;
    let records = load_mappings(&args.mappings)?;
    let mut store = SqliteStore::open(&args.database)
        .with_context(|| format!("Opening database {:?}", args.database))?;
    let schema = resolve_schema(&store, args.schema.as_deref(), &records, &args.database)?;

    let result = MappingExecutor::new(&mut store, &config).validate(&records, &schema);
    print_result(&result, args.json)?;
    if !result.failed_tables.is_empty() {
        bail!(
            "Validation {} found {} invalid table(s)",
            result.execution_id,
            result.failed_tables.len()
        );
    }
    Ok(())
}

fn handle_execute(args: &ExecuteArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref(), args.mode)?;
    if let Some(secs) = args.timeout_secs {
        config.statement_timeout_secs = secs;
    }
    let mut records = load_mappings(&args.mappings)?;
    if args.prefer_confidence {
        sort_by_confidence(&mut records);
    }
    let document = SourceDocument::load(&args.document)?;
    let mut store = SqliteStore::open(&args.database)
        .with_context(|| format!("Opening database {:?}", args.database))?;
    let schema = resolve_schema(&store, args.schema.as_deref(), &records, &args.database)?;

    let result = MappingExecutor::new(&mut store, &config).execute(
        &args.document_id,
        &document,
        &mut records,
        &schema,
    );
    if args.persist_audit {
        audit::persist(&mut store, &result, &config)
            .with_context(|| format!("Persisting audit for {}", result.execution_id))?;
    }

    print_result(&result, args.json)?;
    if !result.failed_tables.is_empty() {
        bail!(
            "Execution {} finished with {} failed table(s)",
            result.execution_id,
            result.failed_tables.len()
        );
    }
    Ok(())
}
