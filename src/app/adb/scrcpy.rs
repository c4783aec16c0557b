use std::path::Path;
use std::process::{Command, Stdio};

use tracing::info;

use crate::app::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrcpyAvailability {
    pub available: bool,
    pub version_output: String,
    pub command_path: String,
}

pub const SCRCPY_HOMEPAGE: &str = "https://github.com/Genymobile/scrcpy";

pub fn check_scrcpy_availability() -> ScrcpyAvailability {
    let mut result = ScrcpyAvailability {
        available: false,
        version_output: String::new(),
        command_path: "scrcpy".to_string(),
    };

    if let Some(output) = try_version("scrcpy") {
        result.available = true;
        result.version_output = output;
        return result;
    }

    for path in candidate_paths() {
        let expanded = expand_home(path);
        if !Path::new(&expanded).is_file() {
            continue;
        }
        if let Some(output) = try_version(&expanded) {
            result.available = true;
            result.version_output = output;
            result.command_path = expanded;
            return result;
        }
    }

    result
}

fn candidate_paths() -> &'static [&'static str] {
    if cfg!(target_os = "macos") {
        &[
            "/opt/homebrew/bin/scrcpy",
            "/usr/local/bin/scrcpy",
            "~/Applications/scrcpy.app/Contents/MacOS/scrcpy",
        ]
    } else if cfg!(windows) {
        &["C:\\scrcpy\\scrcpy.exe", "~/scoop/shims/scrcpy.exe"]
    } else {
        &[
            "/usr/bin/scrcpy",
            "/usr/local/bin/scrcpy",
            "/snap/bin/scrcpy",
            "~/.local/bin/scrcpy",
            "/opt/scrcpy/scrcpy",
        ]
    }
}

pub fn build_scrcpy_args(serial: Option<&str>) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(serial) = serial.map(str::trim).filter(|value| !value.is_empty()) {
        args.push("-s".to_string());
        args.push(serial.to_string());
    }
    args.push("--stay-awake".to_string());
    args
}

pub fn launch_scrcpy(
    availability: &ScrcpyAvailability,
    serial: Option<&str>,
    trace_id: &str,
) -> Result<u32, AppError> {
    if !availability.available {
        return Err(AppError::dependency(
            format!("scrcpy is not installed. Download it from {SCRCPY_HOMEPAGE}"),
            trace_id,
        ));
    }
    let child = Command::new(&availability.command_path)
        .args(build_scrcpy_args(serial))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| AppError::dependency(format!("Failed to launch scrcpy: {err}"), trace_id))?;
    info!(trace_id = %trace_id, pid = child.id(), "scrcpy launched");
    Ok(child.id())
}

fn try_version(command: &str) -> Option<String> {
    let output = Command::new(command)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .ok()?;
    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        Some(stdout.lines().next().unwrap_or_default().trim().to_string())
    } else {
        None
    }
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    }
    path.to_string()
}
