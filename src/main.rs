use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use uuid::Uuid;

use sweepware_lib::app::adb::bridge::AdbBridge;
use sweepware_lib::app::adb::locator::{resolve_adb_program, validate_adb_program};
use sweepware_lib::app::adb::scrcpy::{check_scrcpy_availability, launch_scrcpy, SCRCPY_HOMEPAGE};
use sweepware_lib::app::cancel::CancelToken;
use sweepware_lib::app::config::{
    config_path, load_settings_from_path, reset_settings_at, set_excluded_top_y_at,
    set_file_name_at, set_output_dir_at, validate_excluded_top_y, validate_file_name, Settings,
};
use sweepware_lib::app::error::{
    AppError, ERR_CONNECTIVITY, ERR_DEPENDENCY, ERR_VALIDATION,
};
use sweepware_lib::app::logging::init_logging;
use sweepware_lib::app::models::{ScrapeEvent, ScrapeSummary, StopReason};
use sweepware_lib::app::scrape::engine::{probe_labels, EventEmitter, ScrapeConfig};
use sweepware_lib::app::state::AppState;

const BAR_WIDTH: usize = 40;

const WELCOME: &str = "
Welcome to Sweepware - Android Content Scraper!

This tool scrapes the text from an app using adb and saves it to a .csv file.

**Start scrcpy on your desktop (`sweepware mirror`) and open the app you want to scrape.
**Scroll your phone to the place where the scraping should begin.
**Don't touch your phone while the tool scrolls to the bottom.
**If scrolling does not begin after 10 seconds, close and re-open the app on your phone.

Press [ENTER] to start.";

#[derive(Debug, Parser)]
#[command(
    name = "sweepware",
    version,
    about = "Scroll an Android app over adb and save every visible text label to CSV"
)]
struct Cli {
    /// Device serial, passed to adb as `-s`. adb falls back to $ANDROID_SERIAL.
    #[arg(long, global = true)]
    serial: Option<String>,

    /// Human-readable diagnostics on stderr even in release builds.
    #[arg(long, global = true)]
    pretty_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scroll the foreground app and export its text (default).
    Scrape(ScrapeArgs),
    /// Capture one screen and list what a scrape would collect from it.
    Probe(ProbeArgs),
    /// Show or change persisted settings.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Launch scrcpy to mirror the device screen.
    Mirror,
    /// Check that adb and scrcpy are usable and list connected devices.
    Doctor,
}

#[derive(Debug, Default, Args)]
struct ScrapeArgs {
    /// Start without waiting for ENTER.
    #[arg(short, long)]
    yes: bool,

    /// Output CSV path for this run only.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Header threshold for this run only.
    #[arg(long)]
    excluded_top_y: Option<i32>,

    /// Print the run summary as JSON instead of the loading bar.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ProbeArgs {
    /// Threshold to preview instead of the saved one.
    #[arg(long)]
    excluded_top_y: Option<i32>,

    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Show,
    /// Elements whose top edge is above this y coordinate are skipped.
    SetThreshold { value: i32 },
    SetOutputDir { dir: String },
    /// Must end in .csv.
    SetFileName { name: String },
    Reset,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging("info", cli.pretty_logs);
    let trace_id = Uuid::new_v4().to_string();

    match run(cli, &trace_id) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(trace_id = %err.trace_id, code = %err.code, error = %err.error, "command failed");
            eprintln!("Error: {}", err.error);
            ExitCode::from(exit_status(&err))
        }
    }
}

fn exit_status(err: &AppError) -> u8 {
    match err.code.as_str() {
        ERR_VALIDATION => 2,
        ERR_DEPENDENCY => 3,
        ERR_CONNECTIVITY => 4,
        _ => 1,
    }
}

fn run(cli: Cli, trace_id: &str) -> Result<(), AppError> {
    let settings_path = config_path();
    let serial = cli.serial;
    match cli.command.unwrap_or_else(|| Command::Scrape(ScrapeArgs::default())) {
        Command::Scrape(args) => scrape(&settings_path, serial, args, trace_id),
        Command::Probe(args) => probe(&settings_path, serial, args, trace_id),
        Command::Config(command) => config(&settings_path, command, trace_id),
        Command::Mirror => mirror(serial.as_deref(), trace_id),
        Command::Doctor => doctor(&settings_path, serial, trace_id),
    }
}

fn adb_bridge(settings: &Settings, serial: Option<String>, trace_id: &str) -> Result<AdbBridge, AppError> {
    let program = resolve_adb_program(&settings.adb_path);
    validate_adb_program(&program).map_err(|message| AppError::dependency(message, trace_id))?;
    Ok(AdbBridge::new(program, Duration::from_secs(settings.command_timeout_secs)).with_serial(serial))
}

fn threshold_override(value: Option<i32>, trace_id: &str) -> Result<Option<i32>, AppError> {
    if let Some(value) = value {
        validate_excluded_top_y(value).map_err(|message| AppError::validation(message, trace_id))?;
    }
    Ok(value)
}

fn scrape(settings_path: &Path, serial: Option<String>, args: ScrapeArgs, trace_id: &str) -> Result<(), AppError> {
    let settings = load_settings_from_path(settings_path, trace_id)?;
    let bridge = adb_bridge(&settings, serial, trace_id)?;

    let mut config = ScrapeConfig::from_settings(&settings, trace_id);
    if let Some(value) = threshold_override(args.excluded_top_y, trace_id)? {
        config.excluded_top_y = value;
    }
    if let Some(output) = args.output {
        let name = output
            .file_name()
            .map(|value| value.to_string_lossy().to_string())
            .unwrap_or_default();
        validate_file_name(&name).map_err(|message| AppError::validation(message, trace_id))?;
        config.output_path = output;
    }

    if !args.yes {
        println!("{WELCOME}");
        io::stdin()
            .lock()
            .read_line(&mut String::new())
            .map_err(|err| AppError::system(format!("Failed to read stdin: {err}"), trace_id))?;
    }

    let (tx, rx) = mpsc::channel::<ScrapeEvent>();
    let tx = Mutex::new(tx);
    let emit: EventEmitter = Arc::new(move |event| {
        if let Ok(tx) = tx.lock() {
            let _ = tx.send(event);
        }
    });

    let state = AppState::new();
    state.start(bridge, config, emit)?;

    if let Some(token) = state.cancel_token() {
        install_interrupt_handler(token, trace_id);
    }

    render_events(rx, !args.json);
    let summary = state.wait(trace_id)?;
    report_summary(&summary, args.json, trace_id)
}

fn install_interrupt_handler(token: CancelToken, trace_id: &str) {
    let result = ctrlc::set_handler(move || {
        if !token.is_cancelled() {
            token.cancel();
        }
    });
    if let Err(err) = result {
        warn!(trace_id = %trace_id, error = %err, "failed to install Ctrl-C handler");
    }
}

fn render_events(rx: mpsc::Receiver<ScrapeEvent>, interactive: bool) {
    let mut stdout = io::stdout();
    let mut bar_visible = false;
    for event in rx {
        match event {
            ScrapeEvent::Progress { percent } => {
                if interactive {
                    let _ = write!(stdout, "\r{}", loading_bar(percent));
                    let _ = stdout.flush();
                    bar_visible = true;
                }
            }
            ScrapeEvent::Log { line, .. } => {
                if bar_visible {
                    let _ = writeln!(stdout);
                    bar_visible = false;
                }
                if interactive {
                    let _ = writeln!(stdout, "{line}");
                } else {
                    eprintln!("{line}");
                }
            }
            ScrapeEvent::Finished { .. } | ScrapeEvent::Failed { .. } => break,
        }
    }
    if bar_visible {
        let _ = writeln!(stdout);
    }
}

fn loading_bar(percent: u8) -> String {
    let percent = percent.min(100);
    let filled = (BAR_WIDTH * usize::from(percent) + 50) / 100;
    format!(
        "Loading... [{}{}] {percent}%",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled)
    )
}

fn report_summary(summary: &ScrapeSummary, json: bool, trace_id: &str) -> Result<(), AppError> {
    info!(
        trace_id = %summary.trace_id,
        unique = summary.unique_count,
        reason = %summary.stop_reason.describe(),
        "scrape summary"
    );
    if json {
        let body = serde_json::to_string_pretty(summary)
            .map_err(|err| AppError::system(format!("Failed to encode summary: {err}"), trace_id))?;
        println!("{body}");
        return Ok(());
    }
    println!(
        "Saved {} unique entries to {}",
        summary.unique_count,
        summary.output_path.display()
    );
    match &summary.stop_reason {
        StopReason::Exhausted | StopReason::Cancelled => {}
        other => println!("Note: the scan ended early ({}).", other.describe()),
    }
    Ok(())
}

fn probe(settings_path: &Path, serial: Option<String>, args: ProbeArgs, trace_id: &str) -> Result<(), AppError> {
    let settings = load_settings_from_path(settings_path, trace_id)?;
    let bridge = adb_bridge(&settings, serial, trace_id)?;
    let mut config = ScrapeConfig::from_settings(&settings, trace_id);
    if let Some(value) = threshold_override(args.excluded_top_y, trace_id)? {
        config.excluded_top_y = value;
    }

    let cancel = CancelToken::new();
    install_interrupt_handler(cancel.clone(), trace_id);
    let (screen, labels) = probe_labels(&bridge, &config, &cancel)?;

    if args.json {
        let body = serde_json::to_string_pretty(&labels)
            .map_err(|err| AppError::system(format!("Failed to encode labels: {err}"), trace_id))?;
        println!("{body}");
        return Ok(());
    }
    println!(
        "Screen {}x{}, excluded_top_y {}: {} labels",
        screen.width,
        screen.height,
        config.excluded_top_y,
        labels.len()
    );
    for label in &labels {
        let bounds = label.bounds;
        println!(
            "{:>5} {:>5}  [{},{}][{},{}]  {}",
            bounds.top, bounds.bottom, bounds.left, bounds.top, bounds.right, bounds.bottom, label.text
        );
    }
    Ok(())
}

fn config(settings_path: &Path, command: ConfigCommand, trace_id: &str) -> Result<(), AppError> {
    let settings = match command {
        ConfigCommand::Show => load_settings_from_path(settings_path, trace_id)?,
        ConfigCommand::SetThreshold { value } => set_excluded_top_y_at(settings_path, value, trace_id)?,
        ConfigCommand::SetOutputDir { dir } => set_output_dir_at(settings_path, &dir, trace_id)?,
        ConfigCommand::SetFileName { name } => set_file_name_at(settings_path, &name, trace_id)?,
        ConfigCommand::Reset => reset_settings_at(settings_path, trace_id)?,
    };
    let body = serde_json::to_string_pretty(&settings)
        .map_err(|err| AppError::system(format!("Failed to encode settings: {err}"), trace_id))?;
    println!("# {}", settings_path.display());
    println!("{body}");
    println!("# output: {}", settings.output_path().display());
    Ok(())
}

fn mirror(serial: Option<&str>, trace_id: &str) -> Result<(), AppError> {
    let availability = check_scrcpy_availability();
    let pid = launch_scrcpy(&availability, serial, trace_id)?;
    println!("scrcpy started ({}, pid {pid})", availability.command_path);
    Ok(())
}

fn doctor(settings_path: &Path, serial: Option<String>, trace_id: &str) -> Result<(), AppError> {
    let settings = load_settings_from_path(settings_path, trace_id)?;
    let cancel = CancelToken::new();
    let mut adb_ok = false;

    match adb_bridge(&settings, serial, trace_id) {
        Ok(bridge) => match bridge.version(&cancel, trace_id) {
            Ok(version) => {
                adb_ok = true;
                println!("adb:    ok ({}) {version}", bridge.program());
                match bridge.list_devices(&cancel, trace_id) {
                    Ok(devices) if devices.is_empty() => {
                        println!("device: none connected. Enable USB debugging and plug the phone in.")
                    }
                    Ok(devices) => {
                        for device in devices {
                            println!(
                                "device: {} ({}){}",
                                device.serial,
                                device.state,
                                device.model.map(|model| format!(" {model}")).unwrap_or_default()
                            );
                        }
                    }
                    Err(err) => println!("device: {}", err.error),
                }
            }
            Err(err) => println!("adb:    missing ({})", err.error),
        },
        Err(err) => println!("adb:    missing ({})", err.error),
    }

    let scrcpy = check_scrcpy_availability();
    if scrcpy.available {
        println!("scrcpy: ok ({}) {}", scrcpy.command_path, scrcpy.version_output);
    } else {
        println!("scrcpy: missing, optional. Download it from {SCRCPY_HOMEPAGE}");
    }

    if adb_ok {
        Ok(())
    } else {
        Err(AppError::dependency(
            "adb is required. Install Android platform-tools and make sure adb is on PATH",
            trace_id,
        ))
    }
}
