use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::app::adb::parse::parse_adb_devices;
use crate::app::adb::runner::{run_command_with_timeout, CommandOutput};
use crate::app::cancel::CancelToken;
use crate::app::error::AppError;
use crate::app::models::{DeviceSummary, SwipeGesture};

pub const DEFAULT_REMOTE_DUMP_PATH: &str = "/sdcard/sweepware_dump.xml";

pub trait DeviceBridge: Send {
    // Unparsed on purpose: an offline device answers with an error line.
    fn screen_size_output(&self, cancel: &CancelToken, trace_id: &str) -> Result<String, AppError>;

    fn dump_hierarchy(
        &self,
        local_path: &Path,
        cancel: &CancelToken,
        trace_id: &str,
    ) -> Result<(), AppError>;

    fn swipe(&self, gesture: &SwipeGesture, cancel: &CancelToken, trace_id: &str) -> Result<(), AppError>;

    fn cleanup(&self, _cancel: &CancelToken, _trace_id: &str) -> Result<(), AppError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AdbBridge {
    program: String,
    serial: Option<String>,
    timeout: Duration,
    remote_dump_path: String,
}

impl AdbBridge {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            serial: None,
            timeout,
            remote_dump_path: DEFAULT_REMOTE_DUMP_PATH.to_string(),
        }
    }

    pub fn with_serial(mut self, serial: Option<String>) -> Self {
        self.serial = serial
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn args(&self, tail: &[&str]) -> Vec<String> {
        let mut args = Vec::with_capacity(tail.len() + 2);
        if let Some(serial) = &self.serial {
            args.push("-s".to_string());
            args.push(serial.clone());
        }
        args.extend(tail.iter().map(|value| value.to_string()));
        args
    }

    fn run(&self, tail: &[&str], cancel: &CancelToken, trace_id: &str) -> Result<CommandOutput, AppError> {
        run_command_with_timeout(&self.program, &self.args(tail), self.timeout, cancel, trace_id)
    }

    fn run_checked(
        &self,
        step: &str,
        tail: &[&str],
        cancel: &CancelToken,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        let output = self.run(tail, cancel, trace_id)?;
        if !output.success() {
            return Err(AppError::transient(
                format!("{step} failed: {}", output.failure_detail()),
                trace_id,
            ));
        }
        Ok(output)
    }

    pub fn list_devices(&self, cancel: &CancelToken, trace_id: &str) -> Result<Vec<DeviceSummary>, AppError> {
        let output = run_command_with_timeout(
            &self.program,
            &["devices".to_string(), "-l".to_string()],
            self.timeout,
            cancel,
            trace_id,
        )?;
        if !output.success() {
            return Err(AppError::dependency(
                format!("adb devices failed: {}", output.failure_detail()),
                trace_id,
            ));
        }
        Ok(parse_adb_devices(&output.stdout))
    }

    pub fn version(&self, cancel: &CancelToken, trace_id: &str) -> Result<String, AppError> {
        let output = run_command_with_timeout(
            &self.program,
            &["version".to_string()],
            self.timeout,
            cancel,
            trace_id,
        )?;
        if !output.success() {
            return Err(AppError::dependency(
                format!("adb version failed: {}", output.failure_detail()),
                trace_id,
            ));
        }
        Ok(output.stdout.lines().next().unwrap_or_default().trim().to_string())
    }
}

impl DeviceBridge for AdbBridge {
    fn screen_size_output(&self, cancel: &CancelToken, trace_id: &str) -> Result<String, AppError> {
        let output = self.run(&["shell", "wm", "size"], cancel, trace_id)?;
        let stdout = output.stdout.trim();
        if !stdout.is_empty() {
            return Ok(stdout.to_string());
        }
        Ok(output.stderr.trim().to_string())
    }

    fn dump_hierarchy(
        &self,
        local_path: &Path,
        cancel: &CancelToken,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let remote = self.remote_dump_path.as_str();
        let dump = self.run_checked("uiautomator dump", &["shell", "uiautomator", "dump", remote], cancel, trace_id)?;
        // uiautomator reports idle-state failures on stdout with exit code 0.
        if dump.stdout.contains("ERROR") {
            return Err(AppError::transient(
                format!("uiautomator dump failed: {}", dump.stdout.trim()),
                trace_id,
            ));
        }
        let local = local_path.to_string_lossy().to_string();
        self.run_checked("adb pull", &["pull", remote, local.as_str()], cancel, trace_id)?;
        debug!(trace_id = %trace_id, local = %local, "pulled ui dump");
        Ok(())
    }

    fn swipe(&self, gesture: &SwipeGesture, cancel: &CancelToken, trace_id: &str) -> Result<(), AppError> {
        let values = [
            gesture.start_x.to_string(),
            gesture.start_y.to_string(),
            gesture.end_x.to_string(),
            gesture.end_y.to_string(),
            gesture.duration_ms.to_string(),
        ];
        let mut tail = vec!["shell", "input", "swipe"];
        tail.extend(values.iter().map(String::as_str));
        self.run_checked("input swipe", &tail, cancel, trace_id)?;
        Ok(())
    }

    fn cleanup(&self, cancel: &CancelToken, trace_id: &str) -> Result<(), AppError> {
        self.run_checked(
            "remove remote dump",
            &["shell", "rm", "-f", self.remote_dump_path.as_str()],
            cancel,
            trace_id,
        )?;
        Ok(())
    }
}

pub fn retry_transient<T>(
    step: &str,
    retries: u32,
    backoff: Duration,
    cancel: &CancelToken,
    trace_id: &str,
    mut op: impl FnMut() -> Result<T, AppError>,
) -> Result<T, AppError> {
    let mut attempt: u32 = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                // A cancelled adb child exits non-zero; that is not a device fault.
                if cancel.is_cancelled() {
                    return Err(AppError::cancelled(trace_id));
                }
                attempt += 1;
                if attempt > retries {
                    return Err(AppError::connectivity(
                        format!("{step} failed after {attempt} attempts: {}", err.error),
                        trace_id,
                    ));
                }
                warn!(
                    trace_id = %trace_id,
                    step = %step,
                    attempt,
                    error = %err,
                    "transient bridge failure, retrying"
                );
                if !cancel.sleep(backoff) {
                    return Err(AppError::cancelled(trace_id));
                }
            }
            Err(err) => return Err(err),
        }
    }
}
