//! Command execution.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use entigraph_core::reconcile;
use entigraph_core::{EngineConfig, Query, QueryConfig, Registry, StorageEngine};
use entigraph_proto::{Criterion, Pagination, Value, ValueMap};
use thiserror::Error;
use tracing::{debug, info};

use crate::formatter;
use crate::{Args, Command, QueryArgs};

/// CLI errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] entigraph_core::Error),

    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

/// Run the parsed command and return its output.
pub fn run(args: &Args) -> Result<String, CliError> {
    let config = load_config(args.config.as_deref())?;
    let registry = Arc::new(load_registry(args.schema.as_deref())?);

    match &args.command {
        Command::Explain { query } => {
            let compiled = build_query(&registry, &config.query, query)?.compile_select()?;
            Ok(formatter::compiled(args.format, &compiled))
        }
        Command::Count { query } => {
            let engine = open_store(args, &config, registry.clone())?;
            let count = build_query(&registry, &config.query, query)?.count(&engine)?;
            Ok(formatter::count(args.format, count))
        }
        Command::Select { query, limit, offset } => {
            let engine = open_store(args, &config, registry.clone())?;
            let result = build_query(&registry, &config.query, query)?
                .fetch_rows(&engine, Pagination::new(*limit, *offset))?;
            Ok(formatter::rows(args.format, &result))
        }
        Command::Edit {
            entity,
            payload,
            verify,
        } => {
            let engine = open_store(args, &config, registry.clone())?;
            let values = read_payload(payload)?;
            if *verify {
                reconcile::verify(&engine, entity, &values)?;
                return Ok(formatter::message(args.format, "payload is current"));
            }
            let (id, summary) = reconcile::save(&engine, &config.reconcile, entity, &values)?;
            engine.flush()?;
            Ok(formatter::saved(args.format, id, &summary))
        }
    }
}

fn read_file(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Inline text, or the contents of a file when prefixed with `@`.
fn read_input(text: &str) -> Result<String, CliError> {
    match text.strip_prefix('@') {
        Some(path) => read_file(Path::new(path)),
        None => Ok(text.to_string()),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, CliError> {
    match path {
        Some(path) => Ok(EngineConfig::from_json(&read_file(path)?)?),
        None => Ok(EngineConfig::default()),
    }
}

fn load_registry(path: Option<&Path>) -> Result<Registry, CliError> {
    let path = path.ok_or_else(|| CliError::Usage("a schema file is required (--schema)".to_string()))?;
    let registry = Registry::from_json(&read_file(path)?)?;
    debug!(schema = %path.display(), entities = registry.entity_names().len(), "loaded schema");
    Ok(registry)
}

fn open_store(args: &Args, config: &EngineConfig, registry: Arc<Registry>) -> Result<StorageEngine, CliError> {
    let mut storage = config.storage.clone();
    if let Some(dir) = &args.data_dir {
        storage.path = dir.clone();
        storage.temporary = false;
    }
    let engine = StorageEngine::open(&storage, registry)?;
    info!(path = %storage.path.display(), recovered = engine.was_recovered(), "opened store");
    Ok(engine)
}

fn read_payload(text: &str) -> Result<ValueMap, CliError> {
    let json: serde_json::Value = serde_json::from_str(&read_input(text)?)?;
    match Value::from(json) {
        Value::Map(map) => Ok(map),
        other => Err(CliError::Usage(format!(
            "payload must be a JSON object, got {}",
            other.type_name()
        ))),
    }
}

/// A positional parameter: JSON when it parses, a plain string otherwise.
fn parse_param(text: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(text)
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(text.to_string()))
}

fn build_query<'r>(registry: &'r Registry, config: &QueryConfig, args: &QueryArgs) -> Result<Query<'r>, CliError> {
    let mut config = config.clone();
    config.best_effort_search |= args.best_effort;
    let mut query = Query::new(registry, &args.entity)?.with_config(config);

    if let Some(criteria) = &args.criteria {
        let criterion = Criterion::from_json(&read_input(criteria)?).map_err(entigraph_core::Error::from)?;
        query = query.criteria(&criterion);
    }
    if let Some(filter) = &args.filter {
        let params = args.params.iter().map(|p| parse_param(p)).collect();
        query = query.filter(filter.clone(), params);
    }
    for spec in &args.order {
        query = query.order(spec)?;
    }
    if !args.fields.is_empty() {
        let names: Vec<&str> = args.fields.iter().map(String::as_str).collect();
        query = query.select(&names);
    }
    Ok(query)
}
