use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::app::adb::bridge::{retry_transient, DeviceBridge};
use crate::app::adb::parse::parse_wm_size;
use crate::app::cancel::CancelToken;
use crate::app::config::Settings;
use crate::app::error::AppError;
use crate::app::models::{
    ExtractedLabel, LogLevel, ScrapeEvent, ScrapeSummary, ScreenSize, StopReason, SwipeGesture,
};
use crate::app::scrape::output::{dedup_first_seen, write_single_column_csv};
use crate::app::scrape::stability::{capture_stable_snapshot, CaptureSlot, StabilityPolicy, StableSnapshot};
use crate::app::scrape::tracker::{Observation, RunState};
use crate::app::ui_xml::extract_labels;

pub const DEFAULT_MAX_NO_CHANGE: u32 = 3;
const ALMOST_FINISHED_PERCENT: u8 = 90;

pub type EventEmitter = Arc<dyn Fn(ScrapeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeTiming {
    pub settle: Duration,
    pub restabilize: Duration,
    pub post_scroll: Duration,
    pub retry_backoff: Duration,
}

impl Default for ScrapeTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(2),
            restabilize: Duration::from_secs(1),
            post_scroll: Duration::from_secs(2),
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl ScrapeTiming {
    pub fn immediate() -> Self {
        Self {
            settle: Duration::ZERO,
            restabilize: Duration::ZERO,
            post_scroll: Duration::ZERO,
            retry_backoff: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeConfig {
    pub trace_id: String,
    pub excluded_top_y: i32,
    pub output_path: PathBuf,
    pub gesture: SwipeGesture,
    pub max_no_change: u32,
    pub max_stability_attempts: Option<u32>,
    pub transient_retries: u32,
    pub timing: ScrapeTiming,
}

impl ScrapeConfig {
    pub fn from_settings(settings: &Settings, trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            excluded_top_y: settings.excluded_top_y,
            output_path: settings.output_path(),
            gesture: SwipeGesture::default(),
            max_no_change: DEFAULT_MAX_NO_CHANGE,
            max_stability_attempts: Some(settings.max_stability_attempts),
            transient_retries: settings.transient_retries,
            timing: ScrapeTiming::default(),
        }
    }

    fn stability_policy(&self) -> StabilityPolicy {
        StabilityPolicy {
            settle: self.timing.settle,
            restabilize: self.timing.restabilize,
            max_attempts: self.max_stability_attempts,
        }
    }
}

fn capture_slot<B: DeviceBridge + ?Sized>(
    bridge: &B,
    config: &ScrapeConfig,
    cancel: &CancelToken,
    dir: &Path,
    iteration: u32,
    slot: CaptureSlot,
) -> Result<Vec<u8>, AppError> {
    let trace_id = config.trace_id.as_str();
    let suffix = match slot {
        CaptureSlot::First => 1,
        CaptureSlot::Second => 2,
    };
    let path = dir.join(format!("ui_dump_{iteration}_{suffix}.xml"));
    retry_transient(
        "ui dump",
        config.transient_retries,
        config.timing.retry_backoff,
        cancel,
        trace_id,
        || bridge.dump_hierarchy(&path, cancel, trace_id),
    )?;
    fs::read(&path)
        .map_err(|err| AppError::system(format!("Failed to read {}: {err}", path.display()), trace_id))
}

fn query_screen_size<B: DeviceBridge + ?Sized>(
    bridge: &B,
    cancel: &CancelToken,
    trace_id: &str,
    emit: Option<&EventEmitter>,
) -> Result<ScreenSize, AppError> {
    let raw = bridge.screen_size_output(cancel, trace_id)?;
    if let Some(emit) = emit {
        log_line(emit, LogLevel::Info, &format!("Screen size output: {raw}"));
    }
    parse_wm_size(&raw).ok_or_else(|| {
        AppError::connectivity(
            format!("Unexpected output from adb: {raw}. Connect your android device and enable USB debugging."),
            trace_id,
        )
    })
}

fn snapshot_tempdir(trace_id: &str) -> Result<TempDir, AppError> {
    tempfile::Builder::new()
        .prefix("sweepware-")
        .tempdir()
        .map_err(|err| AppError::system(format!("Failed to create snapshot dir: {err}"), trace_id))
}

// Runs with a fresh token so that a cancelled run still removes the dump.
fn cleanup_device<B: DeviceBridge + ?Sized>(bridge: &B, trace_id: &str) {
    if let Err(err) = bridge.cleanup(&CancelToken::new(), trace_id) {
        debug!(trace_id = %trace_id, error = %err, "failed to remove device-side dump");
    }
}

pub fn timestamped(message: &str) -> String {
    format!("{} - {message}", Local::now().format("%Y-%m-%d %H:%M:%S"))
}

fn log_line(emit: &EventEmitter, level: LogLevel, message: &str) {
    emit(ScrapeEvent::Log {
        level,
        line: timestamped(message),
    });
}

/// Nothing is written when the device cannot be reached before the first
/// capture; every other stop still exports what was collected.
pub fn run_scrape<B: DeviceBridge + ?Sized>(
    bridge: &B,
    config: &ScrapeConfig,
    cancel: &CancelToken,
    emit: &EventEmitter,
) -> Result<ScrapeSummary, AppError> {
    let trace_id = config.trace_id.as_str();
    info!(
        trace_id = %trace_id,
        excluded_top_y = config.excluded_top_y,
        output = %config.output_path.display(),
        "scrape started"
    );

    let screen = match query_screen_size(bridge, cancel, trace_id, Some(emit)) {
        Ok(size) => Some(size),
        Err(err) if err.is_cancelled() => None,
        Err(err) => return Err(err),
    };
    let snapshot_dir = snapshot_tempdir(trace_id)?;
    if screen.is_some() {
        emit(ScrapeEvent::Progress { percent: 0 });
    }

    let policy = config.stability_policy();
    let mut state = RunState::new(config.max_no_change);
    let mut collected: Vec<String> = Vec::new();

    let stop_reason = loop {
        if screen.is_none() || cancel.is_cancelled() {
            break StopReason::Cancelled;
        }
        let iteration = state.begin_iteration();

        let captured = capture_stable_snapshot(&policy, cancel, trace_id, |slot| {
            capture_slot(bridge, config, cancel, snapshot_dir.path(), iteration, slot)
        });
        let snapshot = match captured {
            Ok(StableSnapshot::Stable(bytes)) => bytes,
            Ok(StableSnapshot::Cancelled) => break StopReason::Cancelled,
            Ok(StableSnapshot::Unstable { attempts }) => break StopReason::Unstable { attempts },
            Err(err) if err.is_cancelled() => break StopReason::Cancelled,
            Err(err) => break StopReason::BridgeFailure { message: err.error },
        };

        let labels = match extract_labels(&String::from_utf8_lossy(&snapshot), config.excluded_top_y) {
            Ok(labels) => labels,
            Err(message) => {
                break StopReason::BridgeFailure {
                    message: format!("unreadable UI dump: {message}"),
                }
            }
        };

        let observation = state.observe(labels.iter().map(|label| label.text.as_str()));
        debug!(
            trace_id = %trace_id,
            iteration,
            labels = labels.len(),
            observation = ?observation,
            "snapshot extracted"
        );
        if observation == Observation::Exhausted {
            break StopReason::Exhausted;
        }
        collected.extend(labels.into_iter().map(|label| label.text));

        let message = if iteration == 1 {
            "Scrolling, please be patient."
        } else {
            "Sweeping..."
        };
        log_line(emit, LogLevel::Info, message);

        let swiped = retry_transient(
            "swipe",
            config.transient_retries,
            config.timing.retry_backoff,
            cancel,
            trace_id,
            || bridge.swipe(&config.gesture, cancel, trace_id),
        );
        match swiped {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => break StopReason::Cancelled,
            Err(err) => break StopReason::BridgeFailure { message: err.error },
        }
        if !cancel.sleep(config.timing.post_scroll) {
            break StopReason::Cancelled;
        }

        let percent = state.progress_percent();
        emit(ScrapeEvent::Progress { percent });
        if percent > ALMOST_FINISHED_PERCENT {
            log_line(emit, LogLevel::Info, "Almost finished.");
        }
    };

    match &stop_reason {
        StopReason::Exhausted => {}
        StopReason::Cancelled => {
            log_line(emit, LogLevel::Info, "Scan interrupted. Saving collected data...");
        }
        other => {
            warn!(trace_id = %trace_id, reason = %other.describe(), "scrape stopped early");
            log_line(
                emit,
                LogLevel::Warn,
                &format!("Stopped early ({}). Saving collected data...", other.describe()),
            );
        }
    }

    let unique = dedup_first_seen(collected);
    let written = write_single_column_csv(&config.output_path, &unique, trace_id);

    cleanup_device(bridge, trace_id);
    if let Err(err) = snapshot_dir.close() {
        debug!(trace_id = %trace_id, error = %err, "failed to remove snapshot dir");
    }
    written?;
    emit(ScrapeEvent::Progress { percent: 100 });

    log_line(emit, LogLevel::Info, "Complete.");
    info!(
        trace_id = %trace_id,
        iterations = state.iteration(),
        unique = unique.len(),
        reason = %stop_reason.describe(),
        "scrape finished"
    );

    Ok(ScrapeSummary {
        trace_id: config.trace_id.clone(),
        output_path: config.output_path.clone(),
        screen,
        iterations: state.iteration(),
        unique_count: unique.len(),
        stop_reason,
    })
}

pub fn probe_labels<B: DeviceBridge + ?Sized>(
    bridge: &B,
    config: &ScrapeConfig,
    cancel: &CancelToken,
) -> Result<(ScreenSize, Vec<ExtractedLabel>), AppError> {
    let trace_id = config.trace_id.as_str();
    let screen = query_screen_size(bridge, cancel, trace_id, None)?;
    let snapshot_dir = snapshot_tempdir(trace_id)?;

    let captured = capture_stable_snapshot(&config.stability_policy(), cancel, trace_id, |slot| {
        capture_slot(bridge, config, cancel, snapshot_dir.path(), 1, slot)
    });
    cleanup_device(bridge, trace_id);
    let snapshot = match captured? {
        StableSnapshot::Stable(bytes) => bytes,
        StableSnapshot::Cancelled => return Err(AppError::cancelled(trace_id)),
        StableSnapshot::Unstable { attempts } => {
            return Err(AppError::transient(
                format!("UI never stabilized after {attempts} attempts"),
                trace_id,
            ))
        }
    };
    let labels = extract_labels(&String::from_utf8_lossy(&snapshot), config.excluded_top_y)
        .map_err(|message| AppError::system(format!("Unreadable UI dump: {message}"), trace_id))?;
    Ok((screen, labels))
}
