//! hflux CLI - Command-line interface for the Healthflux engine
//!
//! Commands:
//! - replay: Feed recorded samples through a worker tick by tick
//! - check: Build and bind a worker, then print its health tables
//! - units: List the builtin function units

use clap::{ArgAction, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use healthflux::{
    BlockedWorker, Context, FeatureSample, FluxError, FunctionCategory, FunctionRegistry,
    HealthInfo, StreamSet, SummaryConfig, SummaryWorker, UnitSpec, Worker, WorkerConfig,
    WorkerProcess, FLUX_VERSION,
};

/// hflux - Worker execution engine for condition-monitoring analytics
#[derive(Parser)]
#[command(name = "hflux")]
#[command(version = FLUX_VERSION)]
#[command(about = "Drive diagnostic workers over device feature streams", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed NDJSON samples through a worker and print published results
    Replay {
        /// Worker configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Sample input, one {"device","time","values"} object per line (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Number of samples pushed between two ticks
        #[arg(long, default_value = "1")]
        tick_size: usize,

        /// Treat the configuration as a summary worker
        #[arg(long)]
        summary: bool,

        /// Parameter document applied before the first tick
        #[arg(long)]
        parameters: Option<PathBuf>,

        /// Run through the configured block window
        #[arg(long)]
        ignore_block_time: bool,
    },

    /// Build and bind a worker, then print its per-device health tables
    Check {
        /// Worker configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Treat the configuration as a summary worker
        #[arg(long)]
        summary: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the builtin function units
    Units {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// One line of replay input
#[derive(Debug, Deserialize)]
struct InputRecord {
    device: String,
    #[serde(flatten)]
    sample: FeatureSample,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .parse_default_env()
        .format_timestamp(None)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), HfluxError> {
    match cli.command {
        Commands::Replay {
            config,
            input,
            output,
            tick_size,
            summary,
            parameters,
            ignore_block_time,
        } => cmd_replay(
            &config,
            &input,
            &output,
            tick_size,
            summary,
            parameters.as_deref(),
            ignore_block_time,
        ),

        Commands::Check {
            config,
            summary,
            json,
        } => cmd_check(&config, summary, json),

        Commands::Units { json } => cmd_units(json),
    }
}

/// A worker ready to be bound, plus the devices it needs streams for
struct Built {
    process: Box<dyn WorkerProcess>,
    devices: Vec<String>,
}

fn build_process(path: &Path, summary: bool, honor_block_time: bool) -> Result<Built, HfluxError> {
    let json = fs::read_to_string(path)?;
    let registry = FunctionRegistry::builtin();

    if summary {
        let config = SummaryConfig::from_json(&json)?;
        let worker = SummaryWorker::new(&config, &registry)?;
        let process: Box<dyn WorkerProcess> =
            if honor_block_time && config.block_time.is_enabled() {
                Box::new(BlockedWorker::new(worker, config.block_time))
            } else {
                Box::new(worker)
            };
        Ok(Built {
            process,
            devices: config.devices,
        })
    } else {
        let config = WorkerConfig::from_json(&json)?;
        let worker = Worker::new(&config, &registry)?;
        let process: Box<dyn WorkerProcess> =
            if honor_block_time && config.block_time.is_enabled() {
                Box::new(BlockedWorker::new(worker, config.block_time))
            } else {
                Box::new(worker)
            };
        Ok(Built {
            process,
            devices: config.devices,
        })
    }
}

fn open_input(input: &Path) -> Result<Box<dyn BufRead>, HfluxError> {
    if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            log::warn!("reading samples from an interactive terminal, end input with Ctrl-D");
        }
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        Ok(Box::new(BufReader::new(fs::File::open(input)?)))
    }
}

fn open_output(output: &Path) -> Result<Box<dyn Write>, HfluxError> {
    if output.to_string_lossy() == "-" {
        Ok(Box::new(io::stdout()))
    } else {
        Ok(Box::new(fs::File::create(output)?))
    }
}

fn cmd_replay(
    config: &Path,
    input: &Path,
    output: &Path,
    tick_size: usize,
    summary: bool,
    parameters: Option<&Path>,
    ignore_block_time: bool,
) -> Result<(), HfluxError> {
    if tick_size == 0 {
        return Err(HfluxError::ZeroTickSize);
    }

    let built = build_process(config, summary, !ignore_block_time)?;
    let mut ctx = Context::new(built.process);
    ctx.bind(StreamSet::new(&built.devices))?;

    if let Some(path) = parameters {
        let document: serde_json::Value = serde_json::from_str(&fs::read_to_string(path)?)?;
        ctx.set_parameter(document)?;
    }

    let reader = open_input(input)?;
    let mut out = open_output(output)?;
    let mut pending = 0usize;
    let mut published = 0usize;

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: InputRecord = serde_json::from_str(&line)
            .map_err(|source| HfluxError::BadRecord { line: i + 1, source })?;
        ctx.push_sample(&record.device, record.sample)?;
        pending += 1;

        if pending == tick_size {
            published += tick(&mut ctx, &mut out)?;
            pending = 0;
        }
    }
    if pending > 0 {
        published += tick(&mut ctx, &mut out)?;
    }
    out.flush()?;

    log::info!(
        "replay finished: {} tick(s), {} result(s), {} failure(s)",
        ctx.ticks(),
        published,
        ctx.failures()
    );
    if ctx.failures() > 0 {
        return Err(HfluxError::TickFailed(ctx.failures()));
    }
    Ok(())
}

/// Run one tick and write its results as NDJSON. A failing tick has already
/// been rolled back by the context, so replay goes on.
fn tick(ctx: &mut Context, out: &mut dyn Write) -> Result<usize, HfluxError> {
    match ctx.tick() {
        Ok(results) => {
            for result in &results {
                writeln!(out, "{}", serde_json::to_string(result)?)?;
            }
            Ok(results.len())
        }
        Err(e) => {
            log::error!("tick {} failed: {}", ctx.ticks(), e);
            Ok(0)
        }
    }
}

fn cmd_check(config: &Path, summary: bool, json: bool) -> Result<(), HfluxError> {
    let built = build_process(config, summary, false)?;
    let mut ctx = Context::new(built.process);
    ctx.bind(StreamSet::new(&built.devices))?;
    let tables = ctx.worker().get_health_info();

    if json {
        println!("{}", serde_json::to_string_pretty(&tables)?);
        return Ok(());
    }

    println!("hflux check: {}", ctx.worker().tag());
    println!("====================");
    for (device, info) in &tables {
        print_table(device, info);
    }
    println!();
    print!("{}", ctx.worker().print_message());
    Ok(())
}

fn print_table(device: &str, info: &HealthInfo) {
    println!("\n{}:", device);
    if !info.column.is_empty() {
        let columns: Vec<&str> = info.column.iter().map(String::as_str).collect();
        println!("  columns: {}", columns.join(", "));
    }
    if info.health_define.is_empty() {
        println!("  (no health defines)");
    }
    for (i, name) in info.health_define.iter().enumerate() {
        let default = info.default_score.get(i).copied().unwrap_or_default();
        let raw = info.score_limit.get(i).copied().unwrap_or(false);
        let reverse = info.score_reverse.get(i).copied().unwrap_or(false);
        println!(
            "  [{}] {:<20} default={:<6} {}{}",
            i,
            name,
            default,
            if raw { "raw" } else { "0-100" },
            if reverse { " reverse" } else { "" }
        );
    }
}

#[derive(Serialize)]
struct UnitListing {
    name: String,
    category: FunctionCategory,
    realtime: bool,
    multi_device: bool,
}

fn cmd_units(json: bool) -> Result<(), HfluxError> {
    let registry = FunctionRegistry::builtin();
    let mut listing = Vec::new();
    for name in registry.names() {
        let unit = registry.build(&UnitSpec::new(name), 1).map_err(FluxError::from)?;
        listing.push(UnitListing {
            name: name.to_string(),
            category: unit.function_type(),
            realtime: unit.is_realtime_function(),
            multi_device: unit.requires_multi_device(),
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        println!("Builtin function units");
        println!("======================");
        for unit in &listing {
            println!(
                "  {:<12} {:<10} {}{}",
                unit.name,
                unit.category.as_str(),
                if unit.realtime { "realtime" } else { "stack" },
                if unit.multi_device { ", multi-device" } else { "" }
            );
        }
    }
    Ok(())
}

// Error handling

#[derive(Debug)]
enum HfluxError {
    Io(io::Error),
    Flux(FluxError),
    Json(serde_json::Error),
    BadRecord { line: usize, source: serde_json::Error },
    TickFailed(u64),
    ZeroTickSize,
}

impl From<io::Error> for HfluxError {
    fn from(e: io::Error) -> Self {
        HfluxError::Io(e)
    }
}

impl From<FluxError> for HfluxError {
    fn from(e: FluxError) -> Self {
        HfluxError::Flux(e)
    }
}

impl From<serde_json::Error> for HfluxError {
    fn from(e: serde_json::Error) -> Self {
        HfluxError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<HfluxError> for CliError {
    fn from(e: HfluxError) -> Self {
        match e {
            HfluxError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            HfluxError::Flux(e) => {
                let (code, hint) = match &e {
                    FluxError::Config(_) | FluxError::Json(_) => (
                        "CONFIG_ERROR",
                        "Run `hflux check` against the configuration for details",
                    ),
                    FluxError::Parameter { .. } => (
                        "PARAMETER_ERROR",
                        "Parameter documents are keyed by function id",
                    ),
                    FluxError::Runtime { .. } => {
                        ("RUNTIME_ERROR", "Re-run with -vv to see the failing step")
                    }
                    FluxError::UnknownDevice(_) => (
                        "UNKNOWN_DEVICE",
                        "Every input device must be listed in the worker devices",
                    ),
                    FluxError::NotReady(_) => ("NOT_READY", "The worker was never bound"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            HfluxError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Ensure the file contains valid JSON".to_string()),
            },
            HfluxError::BadRecord { line, source } => CliError {
                code: "INPUT_ERROR".to_string(),
                message: format!("line {}: {}", line, source),
                hint: Some(
                    "Each line must be {\"device\": ..., \"time\": ..., \"values\": {...}}"
                        .to_string(),
                ),
            },
            HfluxError::TickFailed(n) => CliError {
                code: "TICK_FAILED".to_string(),
                message: format!("{} tick(s) failed and were rolled back", n),
                hint: Some("Re-run with -v to see the failing ticks".to_string()),
            },
            HfluxError::ZeroTickSize => CliError {
                code: "INVALID_ARGUMENT".to_string(),
                message: "--tick-size must be at least 1".to_string(),
                hint: None,
            },
        }
    }
}
