//! crossdb-migrate CLI - cross-engine migration between SQL Server and PostgreSQL.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use crossdb_migrate::{
    Config, InsertStrategy, MigrateError, MigrationResult, Orchestrator, ProgressReporter,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "crossdb-migrate")]
#[command(about = "Cross-engine migration between SQL Server and PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate schema and data from source to target
    Run {
        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,

        /// Override number of workers
        #[arg(long)]
        workers: Option<usize>,

        /// Insert strategy: default, single_row, batch_row, block_copy
        #[arg(long)]
        strategy: Option<String>,

        /// Create tables and constraints without copying rows
        #[arg(long)]
        no_data: bool,
    },

    /// Write the migration as a SQL script instead of executing it
    Dump {
        /// Script file to write
        #[arg(short, long)]
        output: PathBuf,

        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,
    },

    /// Execute a SQL script against the target
    Import {
        /// Script file to replay
        #[arg(short, long)]
        script: PathBuf,
    },

    /// Print the source schema as JSON
    Inspect,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?.with_auto_tuning();
    info!("Loaded configuration from {:?}", cli.config);

    let cancel_token = setup_signal_handler()?;
    let progress = if cli.progress {
        progress_printer()
    } else {
        ProgressReporter::disabled()
    };

    match cli.command {
        Commands::Run {
            target_schema,
            workers,
            strategy,
            no_data,
        } => {
            if let Some(schema) = target_schema {
                config.target.schema = Some(schema);
            }
            if let Some(w) = workers {
                config.migration.workers = Some(w);
            }
            if let Some(s) = strategy {
                config.migration.insert_strategy = s.parse::<InsertStrategy>()?;
            }
            if no_data {
                config.migration.migrate_data = false;
            }
            config.validate()?;

            let result = Orchestrator::new(config)
                .with_progress(progress)
                .with_cancellation(cancel_token)
                .run()
                .await?;
            print_result("Migration completed!", &result, cli.output_json)?;
        }

        Commands::Dump {
            output,
            target_schema,
        } => {
            if let Some(schema) = target_schema {
                config.target.schema = Some(schema);
            }
            let file = File::create(&output)?;
            let result = Orchestrator::new(config)
                .with_progress(progress)
                .with_cancellation(cancel_token)
                .dump(Box::new(BufWriter::new(file)))
                .await?;
            info!("Script written to {:?}", output);
            print_result("Dump completed!", &result, cli.output_json)?;
        }

        Commands::Import { script } => {
            let executed = Orchestrator::new(config)
                .with_cancellation(cancel_token)
                .import(&script)
                .await?;
            if cli.output_json {
                println!("{}", serde_json::json!({ "statements": executed }));
            } else {
                println!("Import completed: {} statements executed", executed);
            }
        }

        Commands::Inspect => {
            let db = Orchestrator::new(config).inspect().await?;
            println!("{}", serde_json::to_string_pretty(&db)?);
        }

        Commands::HealthCheck => {
            let source_engine = config.source.engine.clone();
            let target_engine = config.target.engine.clone();
            let result = Orchestrator::new(config).health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source ({}): {} ({}ms)",
                    source_engine,
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target ({}): {} ({}ms)",
                    target_engine,
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::Config("Health check failed".to_string()));
            }
        }
    }

    Ok(())
}

fn print_result(
    headline: &str,
    result: &MigrationResult,
    as_json: bool,
) -> Result<(), MigrateError> {
    if as_json {
        println!("{}", result.to_json()?);
        return Ok(());
    }
    println!("\n{}", headline);
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!("  Tables: {}/{}", result.tables_success, result.tables_total);
    println!("  Rows: {}", result.rows_transferred);
    println!("  Throughput: {} rows/sec", result.rows_per_second);
    if !result.failed_tables.is_empty() {
        println!("  Failed tables: {:?}", result.failed_tables);
    }
    Ok(())
}

/// Reporter whose events are printed to stderr as JSON lines.
fn progress_printer() -> ProgressReporter {
    let (reporter, mut rx) = ProgressReporter::channel();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                eprintln!("{}", line);
            }
        }
    });
    reporter
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT (Ctrl-C) or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!("\nReceived {}. Stopping after the current page...", name);
        token.cancel();
    });

    Ok(cancel_token)
}

#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current page...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
