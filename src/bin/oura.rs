//! Oura CLI - Command-line interface for the Oura poller
//!
//! Commands:
//! - fetch: Run one regular refresh cycle and print the metric map
//! - replay: Backfill history and print the day-bucketed series
//! - watch: Refresh on an interval until interrupted
//! - metrics: Print the metric metadata table
//! - doctor: Diagnose configuration and credentials

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use oura_poller::auth::{resolve_bearer_token, FileTokenStore, StaticTokenProvider, TokenProvider};
use oura_poller::config::{PollerConfig, MAX_HISTORICAL_DAYS, MIN_HISTORICAL_DAYS};
use oura_poller::statistics::METRICS;
use oura_poller::{Coordinator, EndpointFetcher, MemorySink, PollError, VERSION};

/// Oura - Poll and normalize Oura Ring health data
#[derive(Parser)]
#[command(name = "oura")]
#[command(version = VERSION)]
#[command(about = "Poll the Oura cloud API into flat health metrics", long_about = None)]
struct Cli {
    /// Personal access token
    #[arg(long, env = "OURA_ACCESS_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Stored credential file (`{"token": {...}}`), used when no token is given
    #[arg(long, env = "OURA_TOKEN_FILE", global = true)]
    token_file: Option<PathBuf>,

    /// Override the API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one refresh cycle and print the metric map
    Fetch {
        /// Days to look back from today
        #[arg(long)]
        lookback_days: Option<u32>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Backfill historical data and print snapshot and series
    Replay {
        /// Days of history to load (1-90)
        #[arg(long)]
        days: Option<u32>,

        /// Output format (ndjson emits one series point per line)
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Refresh periodically until Ctrl-C, printing each snapshot
    Watch {
        /// Update interval in minutes (1-60)
        #[arg(long)]
        interval_minutes: Option<u64>,

        /// Load this many days of history before the first refresh
        #[arg(long)]
        backfill_days: Option<u32>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Print the metric metadata table
    Metrics {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and credentials
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<(), OuraCliError> {
    let base_url = cli.base_url;
    let load_config = || -> Result<PollerConfig, PollError> {
        let mut config = PollerConfig::from_env()?;
        if let Some(url) = &base_url {
            config.api_base_url = url.clone();
        }
        Ok(config)
    };

    match cli.command {
        Commands::Fetch {
            lookback_days,
            output_format,
        } => {
            let mut config = load_config()?;
            if let Some(days) = lookback_days {
                config.lookback_days = days;
            }
            config.validate()?;
            let tokens = token_provider(cli.token, cli.token_file)?;
            cmd_fetch(config, tokens, output_format).await
        }

        Commands::Replay { days, output_format } => {
            let config = load_config()?;
            let days = days.unwrap_or(config.historical_days);
            let tokens = token_provider(cli.token, cli.token_file)?;
            cmd_replay(config, tokens, days, output_format).await
        }

        Commands::Watch {
            interval_minutes,
            backfill_days,
            output_format,
        } => {
            let mut config = load_config()?;
            if let Some(minutes) = interval_minutes {
                config.update_interval_minutes = minutes;
            }
            config.validate()?;
            let tokens = token_provider(cli.token, cli.token_file)?;
            cmd_watch(config, tokens, backfill_days, output_format).await
        }

        Commands::Metrics { json } => cmd_metrics(json),

        Commands::Doctor { json } => {
            cmd_doctor(load_config(), cli.token, cli.token_file.as_deref(), json).await
        }
    }
}

fn token_provider(
    token: Option<String>,
    token_file: Option<PathBuf>,
) -> Result<Arc<dyn TokenProvider>, OuraCliError> {
    match (token, token_file) {
        (Some(token), _) if !token.trim().is_empty() => Ok(Arc::new(StaticTokenProvider::new(token))),
        (_, Some(path)) => Ok(Arc::new(FileTokenStore::new(path))),
        _ => Err(OuraCliError::NoCredentials),
    }
}

fn coordinator(config: PollerConfig, tokens: Arc<dyn TokenProvider>) -> Result<Coordinator, OuraCliError> {
    let fetcher = EndpointFetcher::new(&config, tokens)?;
    Ok(Coordinator::new(config, Arc::new(fetcher), Arc::new(MemorySink::new())))
}

async fn cmd_fetch(
    config: PollerConfig,
    tokens: Arc<dyn TokenProvider>,
    output_format: OutputFormat,
) -> Result<(), OuraCliError> {
    let mut coordinator = coordinator(config, tokens)?;
    let snapshot = coordinator.refresh().await?;

    if snapshot.is_empty() {
        return Err(OuraCliError::NoData);
    }
    print!("{}", format_record(snapshot, &output_format)?);
    Ok(())
}

async fn cmd_replay(
    config: PollerConfig,
    tokens: Arc<dyn TokenProvider>,
    days: u32,
    output_format: OutputFormat,
) -> Result<(), OuraCliError> {
    let mut coordinator = coordinator(config, tokens)?;
    let outcome = coordinator.load_historical(days).await?;

    let output = match output_format {
        OutputFormat::Ndjson => format_output(&outcome.series, &output_format)?,
        _ => format_record(&outcome, &output_format)?,
    };
    print!("{}", output);
    Ok(())
}

async fn cmd_watch(
    config: PollerConfig,
    tokens: Arc<dyn TokenProvider>,
    backfill_days: Option<u32>,
    output_format: OutputFormat,
) -> Result<(), OuraCliError> {
    let period = config.update_interval();
    let mut coordinator = coordinator(config, tokens)?;

    let mut updates = coordinator.subscribe();
    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            match format_record(&snapshot, &output_format) {
                Ok(line) => {
                    let mut stdout = io::stdout();
                    let _ = write!(stdout, "{}", line);
                    let _ = stdout.flush();
                }
                Err(e) => warn!(error = ?e, "Cannot format snapshot"),
            }
        }
    });

    if let Some(days) = backfill_days {
        // regular polling continues even when the backfill fails
        if let Err(e) = coordinator.load_historical(days).await {
            warn!(error = %e, "Historical backfill failed, continuing with regular refresh");
        }
    }

    coordinator
        .run_until(period, async {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("Cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;
    info!("Shutting down");

    drop(coordinator);
    let _ = printer.await;
    Ok(())
}

fn cmd_metrics(json: bool) -> Result<(), OuraCliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(METRICS)?);
        return Ok(());
    }

    println!("{:<30} {:<32} {:<10} {}", "KEY", "NAME", "UNIT", "ROLLUP");
    for metric in METRICS {
        let rollup = match (metric.has_mean, metric.has_sum) {
            (_, true) => "sum",
            (true, false) => "mean",
            (false, false) => "-",
        };
        println!(
            "{:<30} {:<32} {:<10} {}",
            metric.key,
            metric.name,
            metric.unit.unwrap_or("-"),
            rollup
        );
    }
    Ok(())
}

async fn cmd_doctor(
    config: Result<PollerConfig, PollError>,
    token: Option<String>,
    token_file: Option<&Path>,
    json: bool,
) -> Result<(), OuraCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("oura-poller {}", VERSION),
    });

    checks.push(match config.and_then(|c| c.validate().map(|()| c)) {
        Ok(config) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "{} (every {} min, {} days history)",
                config.api_base_url, config.update_interval_minutes, config.historical_days
            ),
        },
        Err(e) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    });

    let credential = match token_provider(token, token_file.map(Path::to_path_buf)) {
        Ok(provider) => match resolve_bearer_token(provider.as_ref()).await {
            Ok(_) => DoctorCheck {
                name: "credentials".to_string(),
                status: CheckStatus::Ok,
                message: match token_file {
                    Some(path) => format!("Usable access token ({})", path.display()),
                    None => "Usable access token".to_string(),
                },
            },
            Err(e) => DoctorCheck {
                name: "credentials".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        },
        Err(_) => DoctorCheck {
            name: "credentials".to_string(),
            status: CheckStatus::Warning,
            message: "No --token or --token-file configured".to_string(),
        },
    };
    checks.push(credential);

    checks.push(DoctorCheck {
        name: "stdout".to_string(),
        status: CheckStatus::Ok,
        message: if atty::is(atty::Stream::Stdout) {
            "stdout is a TTY (json-pretty reads best)".to_string()
        } else {
            "stdout is a pipe (ndjson recommended)".to_string()
        },
    });

    let report = DoctorReport {
        version: VERSION.to_string(),
        historical_days_range: [MIN_HISTORICAL_DAYS, MAX_HISTORICAL_DAYS],
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Oura Doctor Report");
        println!("==================");
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(OuraCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn format_output<T: Serialize>(records: &[T], format: &OutputFormat) -> Result<String, OuraCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)? + "\n"),
    }
}

fn format_record<T: Serialize>(record: &T, format: &OutputFormat) -> Result<String, OuraCliError> {
    match format {
        OutputFormat::Ndjson | OutputFormat::Json => Ok(serde_json::to_string(record)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(record)? + "\n"),
    }
}

// Error types

#[derive(Debug)]
enum OuraCliError {
    Poll(PollError),
    Json(serde_json::Error),
    NoCredentials,
    NoData,
    DoctorFailed,
}

impl From<PollError> for OuraCliError {
    fn from(e: PollError) -> Self {
        OuraCliError::Poll(e)
    }
}

impl From<serde_json::Error> for OuraCliError {
    fn from(e: serde_json::Error) -> Self {
        OuraCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<OuraCliError> for CliError {
    fn from(e: OuraCliError) -> Self {
        match e {
            OuraCliError::Poll(e) => {
                let (code, hint) = match &e {
                    PollError::Auth(_) => ("AUTH_ERROR", Some("Check the access token or re-authorize")),
                    PollError::InvalidConfig(_) | PollError::InvalidRange(_) => {
                        ("CONFIG_ERROR", Some("Run 'oura doctor' to review settings"))
                    }
                    PollError::Normalization(_) | PollError::UpdateFailed(_) => {
                        ("UPDATE_FAILED", Some("The API returned data in an unexpected shape"))
                    }
                    PollError::Remote { .. } | PollError::AggregateFailure(_) => {
                        ("REMOTE_ERROR", Some("Check network connectivity and API status"))
                    }
                    PollError::Sink(_) => ("SINK_ERROR", None),
                    PollError::JsonError(_) => ("JSON_ERROR", Some("Check JSON syntax")),
                    PollError::Io(_) => ("IO_ERROR", Some("Check file paths and permissions")),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: hint.map(str::to_string),
                }
            }
            OuraCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            OuraCliError::NoCredentials => CliError {
                code: "NO_CREDENTIALS".to_string(),
                message: "No access token configured".to_string(),
                hint: Some("Pass --token, set OURA_ACCESS_TOKEN, or use --token-file".to_string()),
            },
            OuraCliError::NoData => CliError {
                code: "NO_DATA".to_string(),
                message: "No metrics were returned".to_string(),
                hint: Some("Check the logs for per-resource fetch errors".to_string()),
            },
            OuraCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct DoctorReport {
    version: String,
    historical_days_range: [u32; 2],
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
