//! Battery History CLI Application
//!
//! This is the command-line interface for the battery history analyzer.
//! It uses the history-analyzer library and adds:
//! - Loading the history and checkin dumps from disk
//! - UID to package resolution from the checkin `apk` lines
//! - Report generation (TXT/JSON)
//! - Summary and timeline CSV export

use anyhow::{Context, Result};
use clap::Parser;
use history_analyzer::{Analyzer, CsvTimeline, NullTimeline, SummaryFormat, TimelineSink, UidPackageMap};
use std::fs;
use std::path::{Path, PathBuf};

mod config;
mod report;

use config::{AppConfig, OutputFormat};

/// Battery History Analyzer - Summarize Android battery history dumps
#[derive(Parser, Debug)]
#[command(name = "history-cli")]
#[command(about = "Summarize Android checkin battery history dumps", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the battery history dump
    #[arg(long, value_name = "FILE")]
    history: Option<PathBuf>,

    /// Path to a checkin dump with `apk` lines, used to name packages
    #[arg(long, value_name = "FILE")]
    checkin: Option<PathBuf>,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Report format
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Output file for the report (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Write the per-window summary CSV to FILE
    #[arg(long, value_name = "FILE")]
    summary_csv: Option<PathBuf>,

    /// Write the timeline CSV to FILE
    #[arg(long, value_name = "FILE")]
    timeline_csv: Option<PathBuf>,

    /// Window mode: batteryLevel or totalTime
    #[arg(long, value_name = "MODE")]
    summary_format: Option<SummaryFormat>,

    /// Keep account names in string pool entries
    #[arg(long)]
    no_scrub: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("Battery History CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using analyzer library v{}", history_analyzer::VERSION);

    let Some(config) = build_config(&args)? else {
        println!("Battery History Analyzer - No input specified");
        println!("\nQuick Start:");
        println!("  history-cli --history history.txt");
        println!("  history-cli --history history.txt --checkin checkin.txt --format json");
        println!("\nWith a configuration file:");
        println!("  history-cli --config config.toml");
        println!("\nUse --help for more options");
        return Ok(());
    };

    run(&config)
}

/// Merge the configuration file (if any) with the command-line flags.
/// Flags win. Returns `None` when no history file was named anywhere.
fn build_config(args: &Args) -> Result<Option<AppConfig>> {
    let mut config = match (&args.config, &args.history) {
        (Some(path), _) => {
            log::info!("Loading configuration from: {:?}", path);
            let config = config::load_config(path)?;
            log::debug!("Configuration loaded successfully");
            config
        }
        (None, Some(history)) => AppConfig::for_history(history.clone()),
        (None, None) => return Ok(None),
    };

    if let Some(history) = &args.history {
        config.input.history = history.clone();
    }
    if let Some(checkin) = &args.checkin {
        config.input.checkin = Some(checkin.clone());
    }
    if let Some(format) = args.format {
        config.output.format = format;
    }
    if let Some(output) = &args.output {
        config.output.report = Some(output.clone());
    }
    if let Some(path) = &args.summary_csv {
        config.output.summary_csv = Some(path.clone());
    }
    if let Some(path) = &args.timeline_csv {
        config.output.timeline_csv = Some(path.clone());
    }
    if let Some(format) = args.summary_format {
        config.analysis.summary_format = format;
    }
    if args.no_scrub {
        config.analysis.scrub_pii = false;
    }
    Ok(Some(config))
}

fn load_packages(path: &Path) -> Result<UidPackageMap> {
    let checkin = fs::read_to_string(path)
        .with_context(|| format!("Failed to read checkin file: {:?}", path))?;
    let (packages, errors) = UidPackageMap::from_checkin(&checkin);
    for err in &errors {
        log::warn!("{}", err);
    }
    log::info!("Loaded {} packages from {:?}", packages.len(), path);
    Ok(packages)
}

fn write_output(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write output file: {:?}", path))
}

/// Analyze the configured history and write every requested output
fn run(config: &AppConfig) -> Result<()> {
    let history_path = &config.input.history;
    log::info!("Reading history: {:?}", history_path);
    let history = fs::read_to_string(history_path)
        .with_context(|| format!("Failed to read history file: {:?}", history_path))?;

    let mut analyzer = Analyzer::new().with_config(config.analysis.clone());
    if let Some(checkin) = &config.input.checkin {
        analyzer = analyzer.with_resolver(load_packages(checkin)?);
    }

    // Timeline rows are only collected when someone asked for them
    let mut timeline = config.output.timeline_csv.as_ref().map(|_| CsvTimeline::new());
    let mut discard = NullTimeline;
    let sink: &mut dyn TimelineSink = match timeline.as_mut() {
        Some(timeline) => timeline,
        None => &mut discard,
    };
    let analysis = analyzer.analyze(&history, sink);

    if analysis.has_errors() {
        log::warn!("{} errors while analyzing {:?}", analysis.errors.len(), history_path);
    }

    let rendered = match config.output.format {
        OutputFormat::Txt => report::render_text(&analysis),
        OutputFormat::Json => report::render_json(&analysis)?,
    };
    match &config.output.report {
        Some(path) => {
            let path = config.output.resolve(path);
            write_output(&path, &rendered)?;
            log::info!("Report written to {:?}", path);
        }
        None => print!("{}", rendered),
    }

    if let Some(path) = &config.output.summary_csv {
        let path = config.output.resolve(path);
        write_output(&path, &history_analyzer::report::summary_csv(&analysis.summaries))?;
        log::info!("Summary CSV written to {:?}", path);
    }
    if let (Some(path), Some(timeline)) = (&config.output.timeline_csv, &timeline) {
        let path = config.output.resolve(path);
        write_output(&path, &timeline.to_csv())?;
        log::info!("Timeline CSV written to {:?} ({} rows)", path, timeline.entries().len());
    }

    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
