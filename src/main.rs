use anyhow::Context;
use clap::builder::{RangedI64ValueParser, TypedValueParser};
use clap::{ArgAction, Parser, Subcommand};
use fleetql::backend::{build_select, FilterBackend, SqliteBackend, TableCatalog};
use fleetql::error::QueryError;
use fleetql::macros::TimeMacros;
use fleetql::output::{
    filter_id, json_response, CompileResponse, ErrorResponse, FieldsResponse, MatchResponse,
    OutputFormat, SearchResponse, SuggestResponse, ValidateResponse,
};
use fleetql::output_common::{
    format_field, format_partial_footer, format_suggestion, format_total_header, is_json_format, render_json_response,
};
use fleetql::schema::SchemaRegistry;
use fleetql::tenant::{
    PollingIntervals, SqliteTenantConfig, StaticTenantConfig, TenantConfigSource, TenantIntervalCache,
};
use fleetql::{QueryEngine, QueryOptions, UnknownMacroPolicy};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// clap has no RangedUsizeValueParser
fn ranged_usize(min: i64, max: i64) -> impl TypedValueParser<Value = usize> {
    let inner = RangedI64ValueParser::new().range(min..=max);
    inner.map(|v: i64| v as usize)
}

#[derive(Parser)]
#[command(
    name = "fleetql",
    version = env!("CARGO_PKG_VERSION"),
    about = "RSQL filter compiler for fleet management entities"
)]
struct Cli {
    #[arg(long, global = true, default_value_t = OutputFormat::Human)]
    output: OutputFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Entity type the query filters
    #[arg(long, global = true, default_value = "target")]
    entity: String,

    /// Tenant whose polling intervals feed ${OVERDUE_TS}
    #[arg(long, global = true, default_value = "default")]
    tenant: String,

    /// Polling interval as HH:MM:SS
    #[arg(long, global = true, default_value = "00:05:00")]
    polling_time: String,

    /// Polling overdue interval as HH:MM:SS
    #[arg(long, global = true, default_value = "00:05:00")]
    polling_overdue: String,

    /// Read polling intervals from the tenant_configuration table instead
    #[arg(long, global = true)]
    tenant_db: Option<PathBuf>,

    /// The database compares text case-insensitively; skip UPPER() folding
    #[arg(long, global = true)]
    case_insensitive_db: bool,

    /// Compare text exactly as written
    #[arg(long, global = true)]
    no_ignore_case: bool,

    #[arg(long, global = true, value_enum, default_value_t = UnknownMacroPolicy::Reject)]
    unknown_macros: UnknownMacroPolicy,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a query against the entity schema
    Validate { query: String },

    /// Compile a query into a predicate tree
    #[command(after_help = COMPILE_EXAMPLES)]
    Compile {
        query: String,

        /// Also lower the filter to SQL for the fleet tables
        #[arg(long)]
        sql: bool,
    },

    /// Completion candidates at a cursor position
    Suggest {
        query: String,

        /// Byte offset of the cursor; defaults to the end of the query
        #[arg(long)]
        cursor: Option<usize>,
    },

    /// Run a query against a fleet database
    Search {
        query: String,

        #[arg(long)]
        db: PathBuf,

        #[arg(long, default_value_t = 50, value_parser = ranged_usize(1, 10000))]
        limit: usize,
    },

    /// Evaluate a query against records from a JSON array file
    Match {
        query: String,

        #[arg(long)]
        records: PathBuf,
    },

    /// List the filterable fields of the entity type
    Fields,

    /// Create the fleet tables, optionally loading targets from a JSON array file
    InitDb {
        #[arg(long)]
        db: PathBuf,

        #[arg(long)]
        seed: Option<PathBuf>,
    },
}

const COMPILE_EXAMPLES: &str = r#"Examples:
  fleetql compile 'name==web*;tag==prod'
  fleetql compile 'attribute.hwRevision!=2' --sql
  fleetql --entity action compile 'status==pending'
  fleetql compile 'lastcontrollerrequestat=lt=${OVERDUE_TS}' --polling-time 00:10:00
"#;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(err) = dispatch(&cli) {
        emit_error(&cli, &err);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose >= 2)
        .with_writer(std::io::stderr)
        .init();
    tracing::trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());
}

fn dispatch(cli: &Cli) -> Result<(), QueryError> {
    let engine = build_engine(cli)?;
    match &cli.command {
        Command::Validate { query } => run_validate(cli, &engine, query),
        Command::Compile { query, sql } => run_compile(cli, &engine, query, *sql),
        Command::Suggest { query, cursor } => {
            run_suggest(cli, &engine, query, cursor.unwrap_or(query.len()))
        }
        Command::Search { query, db, limit } => run_search(cli, &engine, query, db, *limit),
        Command::Match { query, records } => {
            run_match(cli, &engine, query, records).map_err(into_query_error)
        }
        Command::Fields => run_fields(cli, &engine),
        Command::InitDb { db, seed } => run_init_db(cli, db, seed.as_deref()).map_err(into_query_error),
    }
}

fn build_engine(cli: &Cli) -> Result<QueryEngine, QueryError> {
    let options = QueryOptions {
        ignore_case: !cli.no_ignore_case,
        case_insensitive_db: cli.case_insensitive_db,
        unknown_macros: cli.unknown_macros,
    };
    let source: Arc<dyn TenantConfigSource> = match &cli.tenant_db {
        Some(path) => Arc::new(SqliteTenantConfig::new(path.clone())),
        None => {
            let intervals = PollingIntervals::parse(&cli.tenant, &cli.polling_time, &cli.polling_overdue)?;
            Arc::new(StaticTenantConfig::new(intervals))
        }
    };
    let macros = TimeMacros::new(cli.tenant.clone(), Arc::new(TenantIntervalCache::new(source)));
    QueryEngine::new(SchemaRegistry::fleet()?)
        .with_options(options)
        .with_macros(Arc::new(macros))
}

fn print_json<T: serde::Serialize>(cli: &Cli, data: &T, partial: bool) -> Result<(), QueryError> {
    println!("{}", render_json_response(data, partial, cli.output)?);
    Ok(())
}

fn run_validate(cli: &Cli, engine: &QueryEngine, query: &str) -> Result<(), QueryError> {
    let tree = engine.validate(&cli.entity, query)?;
    let response = ValidateResponse {
        entity: cli.entity.clone(),
        query: query.to_string(),
        normalized: tree.to_string(),
        comparisons: tree.comparisons().len(),
    };
    if is_json_format(cli.output) {
        return print_json(cli, &response, false);
    }
    println!("valid: {}", response.normalized);
    println!("comparisons: {}", response.comparisons);
    Ok(())
}

fn run_compile(cli: &Cli, engine: &QueryEngine, query: &str, with_sql: bool) -> Result<(), QueryError> {
    let filter = engine.compile(&cli.entity, query)?;
    let sql = if with_sql {
        let catalog = TableCatalog::fleet();
        let (sql, _) = build_select(&filter, catalog.mapping(&filter.entity)?, false, None)?;
        Some(sql)
    } else {
        None
    };
    let response = CompileResponse {
        entity: cli.entity.clone(),
        query: query.to_string(),
        filter_id: filter_id(&filter),
        rendered: filter.to_string(),
        sql,
        filter,
    };
    if is_json_format(cli.output) {
        return print_json(cli, &response, false);
    }
    println!("filter {}", response.filter_id);
    println!("{}", response.rendered);
    if let Some(sql) = &response.sql {
        println!("{}", sql);
    }
    Ok(())
}

fn run_suggest(cli: &Cli, engine: &QueryEngine, query: &str, cursor: usize) -> Result<(), QueryError> {
    let context = engine.suggest(&cli.entity, query, cursor);
    let response = SuggestResponse {
        entity: cli.entity.clone(),
        query: query.to_string(),
        cursor,
        context,
    };
    if is_json_format(cli.output) {
        return print_json(cli, &response, false);
    }
    if let Some(message) = &response.context.error_message {
        println!("{}", message);
    }
    for token in &response.context.suggestions {
        println!("{}", format_suggestion(token));
    }
    Ok(())
}

fn open_existing(db: &Path) -> Result<SqliteBackend, QueryError> {
    if !db.is_file() {
        return Err(QueryError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("database '{}' does not exist", db.display()),
        )));
    }
    SqliteBackend::open(db, TableCatalog::fleet())
}

fn run_search(cli: &Cli, engine: &QueryEngine, query: &str, db: &Path, limit: usize) -> Result<(), QueryError> {
    let filter = engine.compile(&cli.entity, query)?;
    let backend = open_existing(db)?;
    let results = backend.search(&filter, Some(limit))?;
    let total_count = backend.count(&filter)?;
    let partial = total_count > results.len() as u64;
    let response = SearchResponse {
        entity: cli.entity.clone(),
        query: query.to_string(),
        filter_id: filter_id(&filter),
        results,
        total_count,
    };
    if is_json_format(cli.output) {
        return print_json(cli, &response, partial);
    }
    println!("{}", format_total_header(response.total_count));
    for id in &response.results {
        println!("{}", id);
    }
    if partial {
        println!("{}", format_partial_footer(response.results.len(), response.total_count));
    }
    Ok(())
}

fn read_records(path: &Path) -> anyhow::Result<Vec<JsonValue>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let records: Vec<JsonValue> =
        serde_json::from_str(&raw).with_context(|| format!("{} is not a JSON array of records", path.display()))?;
    Ok(records)
}

fn run_match(cli: &Cli, engine: &QueryEngine, query: &str, records_path: &Path) -> anyhow::Result<()> {
    let matcher = engine.matcher(&cli.entity, query)?;
    let records = read_records(records_path)?;
    let matched: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, record)| matcher.matches(record))
        .map(|(index, _)| index)
        .collect();
    let response = MatchResponse {
        entity: cli.entity.clone(),
        query: query.to_string(),
        matched,
        total_records: records.len(),
    };
    if is_json_format(cli.output) {
        print_json(cli, &response, false)?;
        return Ok(());
    }
    println!("{}", format_total_header(response.matched.len() as u64));
    for index in &response.matched {
        println!("{}", index);
    }
    Ok(())
}

fn run_fields(cli: &Cli, engine: &QueryEngine) -> Result<(), QueryError> {
    let schema = engine.registry().resolve(&cli.entity)?;
    let response = FieldsResponse::from_schema(&schema);
    if is_json_format(cli.output) {
        return print_json(cli, &response, false);
    }
    for field in &response.fields {
        println!("{}", format_field(field));
    }
    Ok(())
}

fn run_init_db(cli: &Cli, db: &Path, seed: Option<&Path>) -> anyhow::Result<()> {
    let backend = SqliteBackend::open(db, TableCatalog::fleet())?;
    backend.init_fleet_schema()?;
    let mut inserted = 0usize;
    if let Some(seed) = seed {
        for (index, record) in read_records(seed)?.iter().enumerate() {
            backend
                .insert_target(record)
                .with_context(|| format!("seed record #{}", index))?;
            inserted += 1;
        }
    }
    tracing::debug!(db = %db.display(), inserted, "initialized fleet database");
    if is_json_format(cli.output) {
        let data = serde_json::json!({ "database": db.display().to_string(), "inserted": inserted });
        print_json(cli, &data, false)?;
    } else {
        println!("initialized {} ({} targets)", db.display(), inserted);
    }
    Ok(())
}

/// Keep the structured code of a wrapped `QueryError`; anything else is I/O
/// or parsing around it.
fn into_query_error(err: anyhow::Error) -> QueryError {
    match err.downcast::<QueryError>() {
        Ok(err) => err,
        Err(err) => QueryError::Io(std::io::Error::new(std::io::ErrorKind::Other, format!("{:#}", err))),
    }
}

fn emit_error(cli: &Cli, err: &QueryError) {
    match cli.output {
        OutputFormat::Human => {
            eprintln!("ERROR [{}]: {}", err.error_code(), err);
            if let Some(hint) = err.remediation() {
                eprintln!("Hint: {}", hint);
            }
        }
        OutputFormat::Json | OutputFormat::Pretty => {
            let error = ErrorResponse {
                code: err.error_code().to_string(),
                error: err.severity().to_string(),
                message: err.to_string(),
                remediation: err.remediation().map(|s| s.to_string()),
            };
            let response = json_response(error);
            let result = if matches!(cli.output, OutputFormat::Pretty) {
                serde_json::to_string_pretty(&response)
            } else {
                serde_json::to_string(&response)
            };
            match result {
                Ok(payload) => println!("{}", payload),
                Err(ser_err) => eprintln!("ERROR: {}", ser_err),
            }
        }
    }
}
