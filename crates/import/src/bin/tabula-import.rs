use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use tabula_connector::{AdapterKind, ConnectionSession, SessionEvent, SourceDescriptor};
use tabula_core::config::{self, Config};
use tabula_import::{ImportOptions, ImportOrchestrator, ImportSpecification, JsonlSink};

/// Connect to tabular sources, inspect them and import them.
#[derive(Parser, Debug)]
#[command(name = "tabula-import", about = "Tabular source import pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the tables of a source
    Tables {
        /// Source type (guessed from the path when omitted)
        #[arg(long)]
        kind: Option<AdapterKind>,
        #[arg(long)]
        source: String,
    },
    /// Print the first rows of one table
    Preview {
        #[arg(long)]
        kind: Option<AdapterKind>,
        #[arg(long)]
        source: String,
        #[arg(long)]
        table: String,
        /// Row limit (PREVIEW_ROWS when omitted)
        #[arg(long)]
        rows: Option<usize>,
    },
    /// Run an import specification over one or more sources
    Run {
        /// Import specification JSON file
        #[arg(long)]
        spec: PathBuf,
        #[arg(long, required = true, num_args = 1..)]
        source: Vec<String>,
        /// JSON lines output (IMPORT_SINK_PATH when omitted)
        #[arg(long)]
        sink: Option<PathBuf>,
        #[arg(long)]
        cancel_on_error: bool,
        #[arg(long)]
        logs_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    config::load_dotenv();
    let config = Config::from_env();
    config.log_summary();

    let cli = Cli::parse();
    match cli.command {
        Command::Tables { kind, source } => {
            let mut session = open(&config, kind, &source).await?;
            session.list_tables()?;
            let tables = match session.next_event().await {
                Some(SessionEvent::TablesReady(tables)) => tables,
                other => {
                    session.close().await;
                    return Err(unexpected(other));
                }
            };
            for table in &tables {
                let options = serde_json::to_string(&session.store().get_options(table))?;
                println!("{}\t{}", table, options);
            }
            session.close().await;
        }
        Command::Preview {
            kind,
            source,
            table,
            rows,
        } => {
            let mut session = open(&config, kind, &source).await?;
            session.preview(&table, Some(rows.unwrap_or(config.session.preview_rows)))?;
            let event = session.next_event().await;
            session.close().await;
            let (header, rows) = match event {
                Some(SessionEvent::DataReady { header, rows, .. }) => (header, rows),
                other => return Err(unexpected(other)),
            };
            if !header.is_empty() {
                println!("{}", header.join("\t"));
            }
            for row in rows {
                println!("{}", row.join("\t"));
            }
        }
        Command::Run {
            spec,
            source,
            sink,
            cancel_on_error,
            logs_dir,
        } => {
            let mut specification = ImportSpecification::load(&spec)
                .await
                .with_context(|| format!("failed to load {}", spec.display()))?;
            if specification.source_type == AdapterKind::Sql {
                specification
                    .settings
                    .entry("max_connections".into())
                    .or_insert_with(|| config.sql.max_connections.to_string());
            }

            let mut options = ImportOptions::from_config(&config);
            options.cancel_on_error |= cancel_on_error;
            if let Some(dir) = logs_dir {
                options.logs_dir = dir;
            }
            let sink = JsonlSink::new(sink.unwrap_or_else(|| config.import.sink_path.clone()));
            info!(spec = %spec.display(), sink = %sink.path().display(), "starting import");

            let orchestrator = ImportOrchestrator::new(specification, options).with_sink(sink);
            let cancel = orchestrator.cancel_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, stopping after the current table");
                    cancel.cancel();
                }
            });

            let report = orchestrator.run(&source).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                error!(failures = report.failures.len(), "import did not complete");
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

/// Open `source` and wait for the connection to settle.
async fn open(config: &Config, kind: Option<AdapterKind>, source: &str) -> Result<ConnectionSession> {
    let kind = match kind.or_else(|| AdapterKind::from_path(source)) {
        Some(kind) => kind,
        None => bail!("cannot guess the source type of '{}', pass --kind", source),
    };
    let mut descriptor = SourceDescriptor::new(kind, source);
    if kind == AdapterKind::Sql {
        descriptor = descriptor.with_setting("max_connections", config.sql.max_connections.to_string());
    }

    let mut session = ConnectionSession::new(config.session.clone());
    session.open(descriptor).await?;
    match session.next_event().await {
        Some(SessionEvent::Connected) => Ok(session),
        Some(SessionEvent::ConnectionFailed(message)) => {
            session.close().await;
            Err(anyhow!(message)).with_context(|| format!("failed to connect to {}", source))
        }
        other => {
            session.close().await;
            Err(unexpected(other))
        }
    }
}

fn unexpected(event: Option<SessionEvent>) -> anyhow::Error {
    match event {
        Some(SessionEvent::Error(e)) => anyhow!(e),
        other => anyhow!("unexpected session reply: {:?}", other),
    }
}
