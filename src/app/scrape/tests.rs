use super::engine::*;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::app::adb::bridge::DeviceBridge;
use crate::app::cancel::CancelToken;
use crate::app::error::{AppError, ERR_CONNECTIVITY, ERR_VALIDATION};
use crate::app::models::{ScrapeEvent, StopReason, SwipeGesture};
use crate::app::state::AppState;

#[derive(Debug, Default)]
struct DeviceLog {
    dumps: usize,
    swipes: usize,
    cleanups: usize,
    failing_swipes: usize,
    jitter: bool,
}

#[derive(Clone)]
struct ScriptedDevice {
    size_output: String,
    pages: Vec<String>,
    log: Arc<Mutex<DeviceLog>>,
}

impl ScriptedDevice {
    fn new(pages: &[&[&str]]) -> Self {
        Self {
            size_output: "Physical size: 1080x2400".to_string(),
            pages: pages.iter().map(|labels| page(labels)).collect(),
            log: Arc::new(Mutex::new(DeviceLog::default())),
        }
    }

    fn log(&self) -> std::sync::MutexGuard<'_, DeviceLog> {
        self.log.lock().expect("device log")
    }
}

fn page(labels: &[&str]) -> String {
    let mut xml = String::from(
        "<?xml version='1.0' encoding='UTF-8' standalone='yes' ?><hierarchy rotation=\"0\">\
         <node text=\"\" bounds=\"[0,0][1080,2400]\">\
         <node text=\"Header\" bounds=\"[0,100][1080,499]\" />",
    );
    for (index, label) in labels.iter().enumerate() {
        let top = 500 + index * 100;
        xml.push_str(&format!(
            "<node text=\"{label}\" bounds=\"[0,{top}][1080,{}]\" />",
            top + 90
        ));
    }
    xml.push_str("</node></hierarchy>");
    xml
}

impl DeviceBridge for ScriptedDevice {
    fn screen_size_output(&self, _cancel: &CancelToken, _trace_id: &str) -> Result<String, AppError> {
        Ok(self.size_output.clone())
    }

    fn dump_hierarchy(&self, local_path: &Path, _cancel: &CancelToken, trace_id: &str) -> Result<(), AppError> {
        let mut log = self.log();
        log.dumps += 1;
        let index = log.swipes.min(self.pages.len() - 1);
        let mut contents = self.pages[index].clone();
        if log.jitter {
            contents.push_str(&format!("<!-- frame {} -->", log.dumps));
        }
        std::fs::write(local_path, contents)
            .map_err(|err| AppError::system(format!("write dump: {err}"), trace_id))
    }

    fn swipe(&self, _gesture: &SwipeGesture, _cancel: &CancelToken, trace_id: &str) -> Result<(), AppError> {
        let mut log = self.log();
        if log.failing_swipes > 0 {
            log.failing_swipes -= 1;
            return Err(AppError::transient("input swipe failed: exit code 1", trace_id));
        }
        log.swipes += 1;
        Ok(())
    }

    fn cleanup(&self, _cancel: &CancelToken, _trace_id: &str) -> Result<(), AppError> {
        self.log().cleanups += 1;
        Ok(())
    }
}

fn test_config(output_path: PathBuf) -> ScrapeConfig {
    ScrapeConfig {
        trace_id: "trace-test".to_string(),
        excluded_top_y: 500,
        output_path,
        gesture: SwipeGesture::default(),
        max_no_change: DEFAULT_MAX_NO_CHANGE,
        max_stability_attempts: Some(5),
        transient_retries: 2,
        timing: ScrapeTiming::immediate(),
    }
}

fn recording_emitter() -> (EventEmitter, Arc<Mutex<Vec<ScrapeEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let emitter: EventEmitter = Arc::new(move |event| {
        sink.lock().expect("events").push(event);
    });
    (emitter, events)
}

fn progress_values(events: &[ScrapeEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            ScrapeEvent::Progress { percent } => Some(*percent),
            _ => None,
        })
        .collect()
}

fn read_rows(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .expect("output file")
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn stops_after_three_unchanged_iterations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("sweep.csv");
    let device = ScriptedDevice::new(&[&["A", "B"], &["A", "B", "C"]]);
    let (emit, events) = recording_emitter();

    let summary = run_scrape(&device, &test_config(output.clone()), &CancelToken::new(), &emit)
        .expect("scrape");

    assert_eq!(summary.stop_reason, StopReason::Exhausted);
    assert_eq!(summary.iterations, 5);
    assert_eq!(summary.unique_count, 3);
    assert_eq!(read_rows(&output), vec!["A", "B", "C"]);

    let log = device.log();
    assert_eq!(log.swipes, 4);
    assert_eq!(log.dumps, 10);
    assert_eq!(log.cleanups, 1);

    let events = events.lock().expect("events");
    assert_eq!(progress_values(&events), vec![0, 25, 40, 50, 58, 100]);
}

#[test]
fn header_region_is_never_collected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("sweep.csv");
    let device = ScriptedDevice::new(&[&["Only"]]);
    let (emit, _events) = recording_emitter();

    run_scrape(&device, &test_config(output.clone()), &CancelToken::new(), &emit).expect("scrape");
    assert_eq!(read_rows(&output), vec!["Only"]);

    let mut config = test_config(output.clone());
    config.excluded_top_y = 0;
    run_scrape(&device, &config, &CancelToken::new(), &emit).expect("scrape");
    assert_eq!(read_rows(&output), vec!["Header", "Only"]);
}

#[test]
fn aggregates_in_first_seen_order_across_pages() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("sweep.csv");
    let device = ScriptedDevice::new(&[&["A", "B", "C"], &["C", "D", "E"], &["E", "F"]]);
    let (emit, _events) = recording_emitter();

    let summary = run_scrape(&device, &test_config(output.clone()), &CancelToken::new(), &emit)
        .expect("scrape");
    assert_eq!(summary.stop_reason, StopReason::Exhausted);
    assert_eq!(read_rows(&output), vec!["A", "B", "C", "D", "E", "F"]);
}

#[test]
fn unparsable_screen_size_fails_before_any_dump() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("sweep.csv");
    let mut device = ScriptedDevice::new(&[&["A"]]);
    device.size_output = "Error: device offline".to_string();
    let (emit, _events) = recording_emitter();

    let err = run_scrape(&device, &test_config(output.clone()), &CancelToken::new(), &emit)
        .expect_err("should fail");

    assert_eq!(err.code, ERR_CONNECTIVITY);
    assert_eq!(err.trace_id, "trace-test");
    assert!(err.error.contains("device offline"));
    assert_eq!(device.log().dumps, 0);
    assert!(!output.exists());
}

#[test]
fn cancellation_still_writes_collected_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("sweep.csv");
    let device = ScriptedDevice::new(&[&["A", "B"], &["C", "D"], &["E", "F"]]);
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let emit: EventEmitter = Arc::new(move |event| {
        if matches!(event, ScrapeEvent::Progress { percent } if percent > 0 && percent < 100) {
            trigger.cancel();
        }
    });

    let summary = run_scrape(&device, &test_config(output.clone()), &cancel, &emit).expect("scrape");

    assert_eq!(summary.stop_reason, StopReason::Cancelled);
    assert_eq!(summary.iterations, 1);
    assert_eq!(read_rows(&output), vec!["A", "B"]);
    assert_eq!(device.log().swipes, 1);
}

#[test]
fn cancelled_before_start_writes_empty_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("sweep.csv");
    let device = ScriptedDevice::new(&[&["A"]]);
    let cancel = CancelToken::new();
    cancel.cancel();
    let (emit, _events) = recording_emitter();

    let summary = run_scrape(&device, &test_config(output.clone()), &cancel, &emit).expect("scrape");
    assert_eq!(summary.stop_reason, StopReason::Cancelled);
    assert_eq!(summary.iterations, 0);
    assert!(output.exists());
    assert!(read_rows(&output).is_empty());
}

#[test]
fn transient_swipe_failures_are_retried() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("sweep.csv");
    let device = ScriptedDevice::new(&[&["A"], &["B"]]);
    device.log().failing_swipes = 2;
    let (emit, _events) = recording_emitter();

    let summary = run_scrape(&device, &test_config(output.clone()), &CancelToken::new(), &emit)
        .expect("scrape");
    assert_eq!(summary.stop_reason, StopReason::Exhausted);
    assert_eq!(read_rows(&output), vec!["A", "B"]);
}

#[test]
fn exhausted_retries_stop_but_keep_collected_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("sweep.csv");
    let device = ScriptedDevice::new(&[&["A"], &["B"]]);
    device.log().failing_swipes = 10;
    let (emit, _events) = recording_emitter();

    let summary = run_scrape(&device, &test_config(output.clone()), &CancelToken::new(), &emit)
        .expect("scrape");
    match &summary.stop_reason {
        StopReason::BridgeFailure { message } => assert!(message.contains("swipe failed after 3 attempts")),
        other => panic!("unexpected stop reason: {other:?}"),
    }
    assert_eq!(read_rows(&output), vec!["A"]);
}

#[test]
fn never_stable_ui_is_capped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("sweep.csv");
    let device = ScriptedDevice::new(&[&["A"]]);
    device.log().jitter = true;
    let (emit, events) = recording_emitter();

    let summary = run_scrape(&device, &test_config(output.clone()), &CancelToken::new(), &emit)
        .expect("scrape");
    assert_eq!(summary.stop_reason, StopReason::Unstable { attempts: 5 });
    assert_eq!(device.log().dumps, 7);
    assert!(output.exists());

    let events = events.lock().expect("events");
    assert!(events.iter().any(|event| matches!(
        event,
        ScrapeEvent::Log { line, .. } if line.contains("never stabilized")
    )));
}

#[test]
fn app_state_runs_one_scrape_at_a_time() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("sweep.csv");
    let device = ScriptedDevice::new(&[&["A"], &["B"], &["C"], &["D"]]);
    let mut config = test_config(output.clone());
    config.timing.post_scroll = Duration::from_secs(30);
    let (emit, events) = recording_emitter();

    let state = AppState::new();
    let trace_id = state
        .start(device.clone(), config.clone(), Arc::clone(&emit))
        .expect("start");
    assert_eq!(trace_id, "trace-test");

    let err = state
        .start(device.clone(), config, Arc::clone(&emit))
        .expect_err("second start should be rejected");
    assert_eq!(err.code, ERR_VALIDATION);

    // Cancel only once the first page has been collected.
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while !events.lock().expect("events").iter().any(|event| {
        matches!(event, ScrapeEvent::Log { line, .. } if line.contains("Scrolling"))
    }) {
        assert!(std::time::Instant::now() < deadline, "worker never reached the first scroll");
        std::thread::sleep(Duration::from_millis(10));
    }

    assert!(state.cancel());
    let summary = state.wait("trace-test").expect("summary");
    assert_eq!(summary.stop_reason, StopReason::Cancelled);
    assert!(!state.is_running());
    assert_eq!(read_rows(&output), vec!["A"]);

    let events = events.lock().expect("events");
    assert!(matches!(events.last(), Some(ScrapeEvent::Finished { .. })));
}

#[test]
fn worker_reports_failure_event() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut device = ScriptedDevice::new(&[&["A"]]);
    device.size_output = "error: no devices/emulators found".to_string();
    let (emit, events) = recording_emitter();

    let state = AppState::new();
    state
        .start(device, test_config(dir.path().join("sweep.csv")), emit)
        .expect("start");
    let err = state.wait("trace-test").expect_err("should fail");
    assert_eq!(err.code, ERR_CONNECTIVITY);

    let events = events.lock().expect("events");
    assert!(matches!(
        events.last(),
        Some(ScrapeEvent::Failed { code, .. }) if code == ERR_CONNECTIVITY
    ));
}

#[test]
fn probe_reads_one_snapshot_without_scrolling() {
    let device = ScriptedDevice::new(&[&["First", "Second"], &["Third"]]);
    let config = test_config(PathBuf::from("/unused/sweep.csv"));

    let (screen, labels) = probe_labels(&device, &config, &CancelToken::new()).expect("probe");
    assert_eq!((screen.width, screen.height), (1080, 2400));
    let texts: Vec<&str> = labels.iter().map(|label| label.text.as_str()).collect();
    assert_eq!(texts, vec!["First", "Second"]);
    assert_eq!(labels[1].bounds.top, 600);

    let log = device.log();
    assert_eq!(log.swipes, 0);
    assert_eq!(log.dumps, 2);
    assert_eq!(log.cleanups, 1);
}

#[test]
fn probe_surfaces_unstable_ui() {
    let device = ScriptedDevice::new(&[&["A"]]);
    device.log().jitter = true;
    let err = probe_labels(&device, &test_config(PathBuf::from("/unused.csv")), &CancelToken::new())
        .expect_err("should fail");
    assert!(err.is_transient());
    assert!(err.error.contains("never stabilized"));
}

#[test]
fn failed_export_still_removes_device_dump() {
    let dir = tempfile::tempdir().expect("tempdir");
    // A directory in the way makes the final rename fail.
    let output = dir.path().join("taken.csv");
    std::fs::create_dir(&output).expect("blocker dir");
    let device = ScriptedDevice::new(&[&["A"]]);
    let (emit, events) = recording_emitter();

    let err = run_scrape(&device, &test_config(output), &CancelToken::new(), &emit)
        .expect_err("export should fail");
    assert_eq!(err.code, crate::app::error::ERR_SYSTEM);
    assert_eq!(device.log().cleanups, 1);

    let events = events.lock().expect("events");
    assert!(!progress_values(&events).contains(&100));
}
