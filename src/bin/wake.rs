//! Wake CLI - Command-line interface for Synheart Wake
//!
//! Commands:
//! - analyze: Derive the sleep pattern from a history snapshot
//! - predict: Predict a wake time for a window and bedtime
//! - feedback: Print feedback statistics, insights and adjustments
//! - import: Merge sleep sessions into a history snapshot
//! - doctor: Diagnose configuration and history health

use clap::{Parser, Subcommand, ValueEnum};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use synheart_wake::analyzer::MIN_DATA_DAYS;
use synheart_wake::{
    parse_local_datetime, EngineConfig, FeedbackReport, HistoryStore, ScheduledWake, SleepSession,
    SleepStage, SleepStore, WakeEngine, WakeError, WakePrediction, WakeWindow, PRODUCER_NAME,
    WAKE_VERSION,
};

/// Wake - On-device sleep pattern analysis and smart-alarm wake prediction
#[derive(Parser)]
#[command(name = "wake")]
#[command(author = "Synheart AI Inc")]
#[command(version = WAKE_VERSION)]
#[command(about = "Predict the best moment to wake up from sleep history", long_about = None)]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive the sleep pattern from a history snapshot
    Analyze {
        /// History snapshot path (use - for stdin)
        #[arg(long)]
        history: PathBuf,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Predict a wake time for tonight
    Predict {
        /// History snapshot path (use - for stdin)
        #[arg(long)]
        history: PathBuf,

        /// Wake window file (JSON); defaults to the next stored window
        #[arg(long, conflicts_with = "hard_wake")]
        window: Option<PathBuf>,

        /// Hard wake deadline, e.g. 07:00
        #[arg(long)]
        hard_wake: Option<String>,

        /// Window duration in minutes (15, 30, 45 or 60)
        #[arg(long, default_value = "30")]
        window_minutes: u32,

        /// Estimated local bedtime, e.g. 2024-01-15T23:00
        #[arg(long)]
        bedtime: String,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Print feedback statistics, insights and adjustments
    Feedback {
        /// History snapshot path (use - for stdin)
        #[arg(long)]
        history: PathBuf,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Merge sleep sessions into a history snapshot
    Import {
        /// Session input path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// History snapshot to update; created when missing
        #[arg(long)]
        history: PathBuf,
    },

    /// Diagnose configuration and history health
    Doctor {
        /// Check a history snapshot
        #[arg(long)]
        history: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one session per line)
    Ndjson,
    /// JSON array of sessions
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

/// A session as delivered by the sync layer: either a full record or just
/// its stage list
#[derive(Deserialize)]
#[serde(untagged)]
enum SessionRecord {
    Full(SleepSession),
    Stages { date: NaiveDate, stages: Vec<SleepStage> },
}

#[derive(Serialize)]
struct PredictOutput {
    prediction: WakePrediction,
    schedule: ScheduledWake,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let error = CliError::from(e);
            eprintln!(
                "{}",
                serde_json::to_string(&error).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr, filtered by RUST_LOG (default: warn)
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<(), WakeCliError> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            history,
            output_format,
        } => cmd_analyze(&history, config, &output_format),

        Commands::Predict {
            history,
            window,
            hard_wake,
            window_minutes,
            bedtime,
            output_format,
        } => cmd_predict(
            &history,
            config,
            window.as_deref(),
            hard_wake.as_deref(),
            window_minutes,
            &bedtime,
            &output_format,
        ),

        Commands::Feedback {
            history,
            output_format,
        } => cmd_feedback(&history, config, &output_format),

        Commands::Import {
            input,
            input_format,
            history,
        } => cmd_import(&input, input_format, &history, config),

        Commands::Doctor { history, json } => {
            cmd_doctor(cli.config.as_deref(), history.as_deref(), json)
        }
    }
}

fn cmd_analyze(
    history: &Path,
    config: EngineConfig,
    format: &OutputFormat,
) -> Result<(), WakeCliError> {
    let engine = load_engine(history, config)?;
    let pattern = engine.analyze()?;
    if pattern.is_none() {
        info!(required = MIN_DATA_DAYS, "Not enough history for a sleep pattern");
    }
    println!("{}", format_output(&pattern, format)?);
    Ok(())
}

fn cmd_predict(
    history: &Path,
    config: EngineConfig,
    window: Option<&Path>,
    hard_wake: Option<&str>,
    window_minutes: u32,
    bedtime: &str,
    format: &OutputFormat,
) -> Result<(), WakeCliError> {
    let engine = load_engine(history, config)?;
    let bedtime = parse_local_datetime(bedtime)?;

    let prediction = match (window, hard_wake) {
        (Some(path), _) => {
            let window: WakeWindow = serde_json::from_str(&read_input(path)?)?;
            window.validate()?;
            engine.predict(&window, bedtime)?
        }
        (None, Some(hard_wake)) => {
            let window = WakeWindow::new(parse_time_of_day(hard_wake)?, window_minutes);
            window.validate()?;
            engine.predict(&window, bedtime)?
        }
        (None, None) => engine.predict_next(bedtime)?,
    };
    let schedule = engine.schedule(&prediction)?;

    debug!(
        predicted = %prediction.predicted_wake_time,
        confidence = prediction.confidence,
        uses_prediction = schedule.uses_prediction,
        "Prediction ready"
    );

    let output = PredictOutput {
        prediction,
        schedule,
    };
    println!("{}", format_output(&output, format)?);
    Ok(())
}

fn cmd_feedback(
    history: &Path,
    config: EngineConfig,
    format: &OutputFormat,
) -> Result<(), WakeCliError> {
    let engine = load_engine(history, config)?;
    let report: FeedbackReport = engine.feedback_report()?;
    println!("{}", format_output(&report, format)?);
    Ok(())
}

fn cmd_import(
    input: &Path,
    input_format: InputFormat,
    history: &Path,
    config: EngineConfig,
) -> Result<(), WakeCliError> {
    let input_data = read_input(input)?;

    let records: Vec<SessionRecord> = match input_format {
        InputFormat::Ndjson => input_data
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|e| {
                    WakeCliError::ParseError(format!(
                        "Failed to parse session on line {}: {}",
                        index + 1,
                        e
                    ))
                })
            })
            .collect::<Result<_, _>>()?,
        InputFormat::Json => serde_json::from_str(&input_data)?,
    };

    let sessions: Vec<SleepSession> = records.into_iter().filter_map(session_from_record).collect();

    if sessions.is_empty() {
        return Err(WakeCliError::NoSessions);
    }

    let store = if history.exists() {
        parse_history(&fs::read_to_string(history)?)?
    } else {
        HistoryStore::default()
    };

    let mut engine = WakeEngine::with_config(store, config)?;
    let imported = sessions.len();
    for session in sessions {
        engine.record_session(session)?;
    }

    let store = engine.into_store();
    fs::write(history, store.to_json_pretty()?)?;

    info!(
        imported,
        retained = store.sessions()?.len(),
        history = %history.display(),
        "Sessions imported"
    );
    Ok(())
}

fn cmd_doctor(
    config: Option<&Path>,
    history: Option<&Path>,
    json: bool,
) -> Result<(), WakeCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "wake_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Wake version {}", WAKE_VERSION),
    });

    if let Some(config_path) = config {
        checks.push(match load_config(Some(config_path)) {
            Ok(config) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Config valid (typical bedtime {}, retention {} days)",
                    config.typical_bedtime.format("%H:%M"),
                    config.retention_days
                ),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: CliError::from(e).message,
            },
        });
    }

    if let Some(history_path) = history {
        if history_path.exists() {
            match fs::read_to_string(history_path) {
                Ok(content) => match HistoryStore::from_json(&content) {
                    Ok(store) => check_history(&store, &mut checks)?,
                    Err(e) => checks.push(DoctorCheck {
                        name: "history".to_string(),
                        status: CheckStatus::Error,
                        message: format!("Invalid history JSON: {}", e),
                    }),
                },
                Err(e) => checks.push(DoctorCheck {
                    name: "history".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read history file: {}", e),
                }),
            }
        } else {
            checks.push(DoctorCheck {
                name: "history".to_string(),
                status: CheckStatus::Warning,
                message: "History file does not exist".to_string(),
            });
        }
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (history can be piped with --history -)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: WAKE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Wake Doctor Report");
        println!("==================");
        println!("Producer: {}", report.producer);
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
        Err(WakeCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn check_history(store: &HistoryStore, checks: &mut Vec<DoctorCheck>) -> Result<(), WakeCliError> {
    let sessions = store.sessions()?;
    checks.push(if sessions.len() >= MIN_DATA_DAYS {
        DoctorCheck {
            name: "history".to_string(),
            status: CheckStatus::Ok,
            message: format!("{} nights recorded, pattern analysis ready", sessions.len()),
        }
    } else {
        DoctorCheck {
            name: "history".to_string(),
            status: CheckStatus::Warning,
            message: format!(
                "{} nights recorded, {} needed before predictions use sleep patterns",
                sessions.len(),
                MIN_DATA_DAYS
            ),
        }
    });

    let malformed = sessions
        .iter()
        .flat_map(|s| &s.stages)
        .filter(|stage| !stage.is_well_formed())
        .count();
    if malformed > 0 {
        checks.push(DoctorCheck {
            name: "stages".to_string(),
            status: CheckStatus::Warning,
            message: format!("{} stages end before they start and will be ignored", malformed),
        });
    }

    let windows = store.wake_windows()?;
    let enabled = windows.iter().filter(|w| w.enabled).count();
    checks.push(DoctorCheck {
        name: "wake_windows".to_string(),
        status: if enabled > 0 { CheckStatus::Ok } else { CheckStatus::Warning },
        message: format!("{} wake windows ({} enabled)", windows.len(), enabled),
    });

    checks.push(DoctorCheck {
        name: "ratings".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} feedback ratings", store.ratings()?.len()),
    });

    Ok(())
}

// Helper functions

/// Build a session from an import record; stage-only records with no stages
/// are skipped with a warning
fn session_from_record(record: SessionRecord) -> Option<SleepSession> {
    match record {
        SessionRecord::Full(session) => Some(session),
        SessionRecord::Stages { date, stages } => {
            let session = SleepSession::from_stages(date, stages);
            if session.is_none() {
                warn!(date = %date, "Skipping session without stages");
            }
            session
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, WakeCliError> {
    match path {
        Some(path) => {
            let config = EngineConfig::from_json(&fs::read_to_string(path)?)?;
            config.validate()?;
            Ok(config)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn load_engine(
    history: &Path,
    config: EngineConfig,
) -> Result<WakeEngine<HistoryStore>, WakeCliError> {
    let store = parse_history(&read_input(history)?)?;
    Ok(WakeEngine::with_config(store, config)?)
}

fn parse_history(json: &str) -> Result<HistoryStore, WakeError> {
    HistoryStore::from_json(json).map_err(|e| WakeError::ParseError(e.to_string()))
}

fn read_input(path: &Path) -> Result<String, WakeCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn parse_time_of_day(value: &str) -> Result<NaiveTime, WakeCliError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| WakeCliError::InvalidArgument(format!("'{}' is not a time like 07:00", value)))
}

fn format_output<T: Serialize>(value: &T, format: &OutputFormat) -> Result<String, WakeCliError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(value)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(value)?),
    }
}

// Error types

#[derive(Debug)]
enum WakeCliError {
    Io(io::Error),
    Wake(WakeError),
    Json(serde_json::Error),
    NoSessions,
    DoctorFailed,
    InvalidArgument(String),
    ParseError(String),
}

impl From<io::Error> for WakeCliError {
    fn from(e: io::Error) -> Self {
        WakeCliError::Io(e)
    }
}

impl From<WakeError> for WakeCliError {
    fn from(e: WakeError) -> Self {
        WakeCliError::Wake(e)
    }
}

impl From<serde_json::Error> for WakeCliError {
    fn from(e: serde_json::Error) -> Self {
        WakeCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<WakeCliError> for CliError {
    fn from(e: WakeCliError) -> Self {
        match e {
            WakeCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            WakeCliError::Wake(e) => {
                let (code, hint) = match &e {
                    WakeError::ParseError(_) | WakeError::JsonError(_) => {
                        ("PARSE_ERROR", "Ensure the history file is a wake history snapshot")
                    }
                    WakeError::DateParseError(_) => {
                        ("DATE_ERROR", "Use local times like 2024-01-15T23:00")
                    }
                    WakeError::InvalidRating(_) => ("INVALID_RATING", "Ratings range from 1 to 5"),
                    WakeError::DuplicateRating(_) => {
                        ("DUPLICATE_RATING", "Each feedback entry can be rated once")
                    }
                    WakeError::InvalidConfig(_) => {
                        ("INVALID_CONFIG", "retention_days must be between 1 and 3650")
                    }
                    WakeError::InvalidWakeWindow(_) => (
                        "INVALID_WINDOW",
                        "Use a 15, 30, 45 or 60 minute window; an earliest time must be \
                         at most 60 minutes before the deadline",
                    ),
                    WakeError::WindowNotFound(_) => (
                        "WINDOW_NOT_FOUND",
                        "Pass --window or --hard-wake, or store an enabled wake window",
                    ),
                    WakeError::StorageError(_) | WakeError::EncodingError(_) => {
                        ("STORAGE_ERROR", "Check the history file")
                    }
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            WakeCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            WakeCliError::NoSessions => CliError {
                code: "NO_SESSIONS".to_string(),
                message: "No sleep sessions found in input".to_string(),
                hint: Some("Ensure input file is not empty and sessions have stages".to_string()),
            },
            WakeCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            WakeCliError::InvalidArgument(msg) => CliError {
                code: "INVALID_ARGUMENT".to_string(),
                message: msg,
                hint: Some("Run 'wake --help' for usage".to_string()),
            },
            WakeCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
