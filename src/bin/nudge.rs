//! nudge - Command-line interface for NeuroNudge core
//!
//! Commands:
//! - replay: Feed timed signals through the engine and print snapshots
//! - classify: Classify hosts against a rules file
//! - copy: Print the local nudge copy for a state and mood
//! - ritual: Validate a break-ritual or re-entry request and dry-run it
//! - doctor: Diagnose configuration and store health

use chrono::{DateTime, FixedOffset};
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use neuronudge_core::actor::spawn_engine;
use neuronudge_core::clock::{Clock, ManualClock, SystemClock};
use neuronudge_core::nudge::{LocalCopy, Mood, NudgePresenter};
use neuronudge_core::ritual::{BreakRitualRequest, DryRunBridge, ReentryRequest, RitualBridge};
use neuronudge_core::rules::RuleIndex;
use neuronudge_core::storage::{JsonFileStore, MemoryStore, Storage};
use neuronudge_core::{
    CoreConfig, CoreError, EngineOutput, FocusEngine, FocusState, Signal, SignalOutcome, SnapshotEncoder,
    CORE_VERSION, PRODUCER_NAME,
};

/// nudge - Activity accounting and focus-state engine
#[derive(Parser)]
#[command(name = "nudge")]
#[command(author = "NeuroNudge Contributors")]
#[command(version = CORE_VERSION)]
#[command(about = "Replay browser activity through the NeuroNudge focus engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay timed signals (NDJSON: {"at": <rfc3339>, "signal": {...}})
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Configuration document written into the store before replaying
        #[arg(long)]
        config: Option<PathBuf>,

        /// Persist state in this directory instead of memory
        #[arg(long)]
        store: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Print only the snapshot after the last signal
        #[arg(long)]
        final_only: bool,
    },

    /// Classify hosts against a rules file ({"pattern": "Label"})
    Classify {
        /// Rules file path
        #[arg(short, long)]
        rules: PathBuf,

        /// Hosts to classify
        #[arg(required = true)]
        hosts: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the local nudge copy for a focus state
    Copy {
        /// steady, drift or overload
        #[arg(value_parser = parse_wire::<FocusState>)]
        state: FocusState,

        /// calm, neutral, tired or stressed
        #[arg(long, default_value = "neutral", value_parser = parse_wire::<Mood>)]
        mood: Mood,
    },

    /// Validate and dry-run an automation bridge request
    Ritual {
        #[arg(value_enum)]
        kind: RitualKind,

        /// Request JSON file (use - for stdin); defaults apply when omitted
        #[arg(short, long)]
        request: Option<PathBuf>,
    },

    /// Diagnose configuration and store health
    Doctor {
        /// Configuration document to check
        #[arg(long)]
        config: Option<PathBuf>,

        /// Store directory to check
        #[arg(long)]
        store: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one snapshot per line)
    Ndjson,
    /// Pretty-printed JSON array
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum RitualKind {
    /// Short reset after overload
    Break,
    /// Return to the last focused document
    Reentry,
}

#[derive(Deserialize)]
struct TimedSignal {
    at: DateTime<FixedOffset>,
    signal: Signal,
}

fn parse_wire<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_ascii_lowercase())).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("NUDGE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), NudgeCliError> {
    match cli.command {
        Commands::Replay {
            input,
            config,
            store,
            output_format,
            final_only,
        } => cmd_replay(&input, config.as_deref(), store.as_deref(), output_format, final_only),

        Commands::Classify { rules, hosts, json } => cmd_classify(&rules, &hosts, json),

        Commands::Copy { state, mood } => cmd_copy(state, mood),

        Commands::Ritual { kind, request } => cmd_ritual(kind, request.as_deref()),

        Commands::Doctor { config, store, json } => cmd_doctor(config.as_deref(), store.as_deref(), json),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, NudgeCliError> {
    Ok(tokio::runtime::Builder::new_multi_thread().enable_all().build()?)
}

fn read_input(path: &Path) -> Result<String, NudgeCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn cmd_replay(
    input: &Path,
    config: Option<&Path>,
    store: Option<&Path>,
    output_format: OutputFormat,
    final_only: bool,
) -> Result<(), NudgeCliError> {
    let mut signals = Vec::new();
    for (index, line) in read_input(input)?.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let timed: TimedSignal = serde_json::from_str(trimmed)
            .map_err(|e| NudgeCliError::ParseError(format!("line {}: {}", index + 1, e)))?;
        signals.push(timed);
    }
    let Some(first_at) = signals.first().map(|s| s.at) else {
        return Err(NudgeCliError::NoSignals);
    };

    let config = match config {
        Some(path) => Some(CoreConfig::from_json(&fs::read_to_string(path)?)?),
        None => None,
    };

    let outputs = match store {
        Some(dir) => replay(JsonFileStore::open(dir)?, config, first_at, signals, final_only)?,
        None => replay(MemoryStore::new(), config, first_at, signals, final_only)?,
    };

    let encoder = SnapshotEncoder::new();
    let mut stdout = io::stdout().lock();
    match output_format {
        OutputFormat::Ndjson => {
            for output in &outputs {
                writeln!(stdout, "{}", encoder.to_json(output)?)?;
            }
        }
        OutputFormat::JsonPretty => {
            let payloads = outputs
                .iter()
                .map(|output| encoder.encode(output))
                .collect::<Result<Vec<_>, _>>()?;
            writeln!(stdout, "{}", serde_json::to_string_pretty(&payloads)?)?;
        }
    }
    stdout.flush()?;
    Ok(())
}

fn replay<S: Storage + 'static>(
    store: S,
    config: Option<CoreConfig>,
    first_at: DateTime<FixedOffset>,
    signals: Vec<TimedSignal>,
    final_only: bool,
) -> Result<Vec<EngineOutput>, NudgeCliError> {
    let engine = match config {
        Some(config) => FocusEngine::with_config(store, config, first_at)?,
        None => FocusEngine::open(store, first_at)?,
    };

    runtime()?.block_on(async move {
        let clock = ManualClock::new(first_at);
        let handle = spawn_engine(engine, Arc::new(clock.clone()));
        let total = signals.len();
        let mut outputs = Vec::new();

        for timed in signals {
            clock.set(timed.at);
            match handle.signal(timed.signal).await? {
                SignalOutcome::Applied(output) if !final_only => outputs.push(*output),
                SignalOutcome::Applied(_) => {}
                SignalOutcome::Discarded(reason) => debug!(?reason, at = %timed.at, "signal discarded"),
            }
        }
        if final_only {
            outputs.push(handle.snapshot().await?);
        }
        handle.shutdown().await?;
        info!(signals = total, snapshots = outputs.len(), "replay finished");
        Ok::<_, NudgeCliError>(outputs)
    })
}

fn cmd_classify(rules: &Path, hosts: &[String], json: bool) -> Result<(), NudgeCliError> {
    let rules: BTreeMap<String, String> = serde_json::from_str(&fs::read_to_string(rules)?)?;
    let index = RuleIndex::compile(&rules);

    let rows: Vec<ClassifyRow> = hosts
        .iter()
        .map(|host| ClassifyRow {
            host: host.clone(),
            label: index.classify(host).to_string(),
            category: format!("{:?}", index.classify_base(host)),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for row in &rows {
            println!("{:<32} {:<12} {}", row.host, row.category, row.label);
        }
        if index.dropped() > 0 {
            println!("\n{} rule(s) dropped as invalid", index.dropped());
        }
    }
    Ok(())
}

fn cmd_copy(state: FocusState, mood: Mood) -> Result<(), NudgeCliError> {
    let nudge = runtime()?.block_on(NudgePresenter::new(LocalCopy).nudge(state, mood));
    println!("{}", nudge.text);
    Ok(())
}

fn cmd_ritual(kind: RitualKind, request: Option<&Path>) -> Result<(), NudgeCliError> {
    let raw = request.map(read_input).transpose()?;
    let bridge = DryRunBridge;
    let response = runtime()?.block_on(async {
        match kind {
            RitualKind::Break => {
                let request: BreakRitualRequest = match &raw {
                    Some(json) => serde_json::from_str(json)?,
                    None => BreakRitualRequest::default(),
                };
                Ok::<_, NudgeCliError>(bridge.break_ritual(&request).await?)
            }
            RitualKind::Reentry => {
                let json = raw.as_deref().ok_or_else(|| {
                    NudgeCliError::ParseError("a reentry request needs --request".to_string())
                })?;
                let request: ReentryRequest = serde_json::from_str(json)?;
                Ok(bridge.reentry(&request).await?)
            }
        }
    })?;
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, store: Option<&Path>, json: bool) -> Result<(), NudgeCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck::ok("core_version", format!("NeuroNudge core {}", CORE_VERSION)));

    if let Some(path) = config {
        let check = match fs::read_to_string(path) {
            Ok(content) => match CoreConfig::from_json(&content) {
                Ok(config) => {
                    let index = RuleIndex::compile(&config.classification_rules);
                    if index.dropped() > 0 {
                        DoctorCheck::warning(
                            "config",
                            format!("{} rules compiled, {} dropped as invalid", index.len(), index.dropped()),
                        )
                    } else {
                        DoctorCheck::ok("config", format!("{} rules compiled", index.len()))
                    }
                }
                Err(e) => DoctorCheck::error("config", e.to_string()),
            },
            Err(e) => DoctorCheck::error("config", format!("Cannot read config file: {}", e)),
        };
        checks.push(check);
    }

    if let Some(dir) = store {
        let check = if !dir.exists() {
            DoctorCheck::warning("store", "Store directory does not exist".to_string())
        } else {
            match JsonFileStore::open(dir).and_then(|store| {
                let keys = store.keys()?;
                let engine = FocusEngine::open(store, SystemClock.now())?;
                Ok((keys, engine.config().classification_rules.len()))
            }) {
                Ok((keys, rules)) => DoctorCheck::ok(
                    "store",
                    format!("{} keys readable, {} classification rules", keys.len(), rules),
                ),
                Err(e) => DoctorCheck::error("store", e.to_string()),
            }
        };
        checks.push(check);
    }

    // replay reads stdin when no input file is given
    checks.push(if atty::is(atty::Stream::Stdin) {
        DoctorCheck::ok("stdin", "stdin is a TTY (interactive mode)".to_string())
    } else {
        DoctorCheck::ok("stdin", "stdin is a pipe (replay ready)".to_string())
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: CORE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("nudge Doctor Report");
        println!("===================");
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

    if report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error)) {
        Err(NudgeCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

#[derive(Debug)]
enum NudgeCliError {
    Io(io::Error),
    Core(CoreError),
    Json(serde_json::Error),
    NoSignals,
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for NudgeCliError {
    fn from(e: io::Error) -> Self {
        NudgeCliError::Io(e)
    }
}

impl From<CoreError> for NudgeCliError {
    fn from(e: CoreError) -> Self {
        NudgeCliError::Core(e)
    }
}

impl From<serde_json::Error> for NudgeCliError {
    fn from(e: serde_json::Error) -> Self {
        NudgeCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<NudgeCliError> for CliError {
    fn from(e: NudgeCliError) -> Self {
        match e {
            NudgeCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            NudgeCliError::Core(e) => {
                let hint = match e {
                    CoreError::InvalidConfig(_) => "Run 'nudge doctor --config <file>' for details",
                    CoreError::InvalidRequest(_) => "Check the request against the documented bounds",
                    CoreError::Storage(_) => "Check the store directory",
                    _ => "Re-run with NUDGE_LOG=debug for details",
                };
                CliError {
                    code: "CORE_ERROR".to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            NudgeCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            NudgeCliError::NoSignals => CliError {
                code: "NO_SIGNALS".to_string(),
                message: "No signals found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            NudgeCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            NudgeCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Each line must be {\"at\": <rfc3339>, \"signal\": {...}}".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ClassifyRow {
    host: String,
    label: String,
    category: String,
}

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

impl DoctorCheck {
    fn ok(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message,
        }
    }

    fn warning(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message,
        }
    }

    fn error(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message,
        }
    }
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
