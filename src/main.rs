use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mneme::cli;
use mneme::config::{default_config_path, MnemeConfig};
use mneme::journal::{self, NewSummary};
use mneme::memory::search::SearchMethod;
use mneme::memory::types::{MemoryType, TimeRange};

#[derive(Parser)]
#[command(name = "mneme", version, about = "Durable cross-session memory for AI assistants")]
struct Cli {
    /// Config file (default: ~/.mneme/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Append a fact to today's log
    SaveFact {
        content: String,
        /// W (world), B (biographical), O (opinion) or S (running summary)
        #[arg(long = "type", default_value = "W")]
        memory_type: MemoryType,
        /// Entity tags, repeatable or comma-separated
        #[arg(long = "entity")]
        entities: Vec<String>,
        #[arg(long, default_value_t = mneme::memory::types::DEFAULT_CONFIDENCE)]
        confidence: f64,
        #[arg(long)]
        session: Option<String>,
    },
    /// Append a session summary (skipped if the session already has one)
    SaveSummary {
        #[arg(long)]
        summary: String,
        #[arg(long, default_value = "")]
        topic: String,
        #[arg(long = "decision")]
        decisions: Vec<String>,
        #[arg(long = "todo")]
        todos: Vec<String>,
        #[arg(long)]
        session: Option<String>,
    },
    /// Project new log entries into the search index
    Sync {
        /// Drop and reproject every source (takes the management lock)
        #[arg(long)]
        rebuild: bool,
    },
    /// Search the index
    Search {
        query: String,
        #[arg(long, default_value = "hybrid")]
        method: SearchMethod,
        #[arg(long)]
        max_results: Option<usize>,
        /// Only the last N days, today included
        #[arg(long)]
        days: Option<u32>,
        /// Earliest day, YYYY-MM-DD
        #[arg(long)]
        from: Option<String>,
        /// Latest day, YYYY-MM-DD
        #[arg(long)]
        to: Option<String>,
    },
    /// Print session-start context, read straight from the logs
    Context {
        /// Record a session start for this id
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        workspace: Option<String>,
    },
    /// Record a session end and sync the index within the configured timeout
    EndSession {
        #[arg(long)]
        session: String,
        #[arg(long, default_value = "completed")]
        reason: String,
        #[arg(long)]
        duration_ms: Option<u64>,
    },
    /// Hide entries by id without removing them (takes the management lock)
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Undo `delete` for the given ids (takes the management lock)
    Restore {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Permanently remove entries by id (takes the management lock)
    Purge {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Read-only index inspection
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
    /// Check logs, index and model files
    Doctor,
    /// Entry counts across the logs
    Stats,
    /// Show the effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum DbAction {
    /// List tables with row counts
    Tables,
    /// Describe a table's columns
    Schema { table: String },
    /// Dump rows (binary columns redacted)
    Show {
        table: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Run a read-only SQL statement
    Query { sql: String },
    /// Chunk, embedding and cursor counts
    Stats,
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Get { key: String },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to <cache_dir>/<model>/
    Download,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::SaveFact { .. } => "save-fact",
            Self::SaveSummary { .. } => "save-summary",
            Self::Sync { .. } => "sync",
            Self::Search { .. } => "search",
            Self::Context { .. } => "context",
            Self::EndSession { .. } => "end-session",
            Self::Delete { .. } => "delete",
            Self::Restore { .. } => "restore",
            Self::Purge { .. } => "purge",
            Self::Db { action } => match action {
                DbAction::Tables => "db tables",
                DbAction::Schema { .. } => "db schema",
                DbAction::Show { .. } => "db show",
                DbAction::Query { .. } => "db query",
                DbAction::Stats => "db stats",
            },
            Self::Doctor => "doctor",
            Self::Stats => "stats",
            Self::Config { .. } => "config",
            Self::Model { .. } => "model download",
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let command = cli.command.name();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    let config = match MnemeConfig::load_from(&config_path) {
        Ok(c) => c,
        Err(e) => std::process::exit(i32::from(cli::emit_error(command, &e))),
    };

    // Log to stderr so stdout carries only the JSON envelope.
    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli.command, &config, &config_path).await {
        Ok(()) => 0,
        Err(e) => cli::emit_error(command, &e),
    };
    // Exit directly: a timed-out end-session sync may still own a blocking
    // thread that runtime shutdown would otherwise wait for.
    std::process::exit(i32::from(code));
}

async fn run(command: Command, config: &MnemeConfig, config_path: &std::path::Path) -> anyhow::Result<()> {
    let name = command.name();
    match command {
        Command::SaveFact {
            content,
            memory_type,
            entities,
            confidence,
            session,
        } => {
            let entry = cli::write::save_fact(config, content, memory_type, entities, confidence, session)?;
            cli::emit_ok(name, &entry)
        }
        Command::SaveSummary {
            summary,
            topic,
            decisions,
            todos,
            session,
        } => {
            let outcome = cli::write::save_summary(
                config,
                NewSummary {
                    session_id: session,
                    topic,
                    summary,
                    decisions,
                    todos,
                },
            )?;
            cli::emit_ok(name, &outcome)
        }
        Command::Sync { rebuild } => cli::emit_ok(name, &cli::search::sync(config, rebuild)?),
        Command::Search {
            query,
            method,
            max_results,
            days,
            from,
            to,
        } => {
            let range = TimeRange::from_args(days, from.as_deref(), to.as_deref(), journal::today())?;
            cli::emit_ok(
                name,
                &cli::search::search(config, &query, method, max_results, range).await?,
            )
        }
        Command::Context { session, workspace } => cli::emit_ok(
            name,
            &cli::session::context(config, session.as_deref(), workspace.as_deref())?,
        ),
        Command::EndSession {
            session,
            reason,
            duration_ms,
        } => cli::emit_ok(
            name,
            &cli::session::end_session(config, session, reason, duration_ms).await?,
        ),
        Command::Delete { ids } => cli::emit_ok(name, &cli::manage::delete(config, ids)?),
        Command::Restore { ids } => cli::emit_ok(name, &cli::manage::restore(config, ids)?),
        Command::Purge { ids } => cli::emit_ok(name, &cli::manage::purge(config, ids)?),
        Command::Db { action } => match action {
            DbAction::Tables => cli::emit_ok(name, &cli::inspect::tables(config)?),
            DbAction::Schema { table } => cli::emit_ok(name, &cli::inspect::schema(config, &table)?),
            DbAction::Show { table, limit, offset } => {
                cli::emit_ok(name, &cli::inspect::show(config, &table, limit, offset)?)
            }
            DbAction::Query { sql } => cli::emit_ok(name, &cli::inspect::query(config, &sql)?),
            DbAction::Stats => cli::emit_ok(name, &cli::inspect::stats(config)?),
        },
        Command::Doctor => cli::emit_ok(name, &cli::doctor::doctor(config)?),
        Command::Stats => cli::emit_ok(name, &cli::stats::stats(config)?),
        Command::Config { action } => match action {
            ConfigAction::Show => cli::emit_ok(name, &cli::config::show(config, config_path)?),
            ConfigAction::Get { key } => cli::emit_ok(name, &cli::config::get(config, &key)?),
        },
        Command::Model { action } => match action {
            ModelAction::Download => cli::emit_ok(name, &cli::model_download(&config.embedding).await?),
        },
    }
}
