use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::app::error::AppError;

pub const DEFAULT_EXCLUDED_TOP_Y: i32 = 500;
pub const DEFAULT_FILE_NAME: &str = "sweep.csv";
pub const OUTPUT_EXTENSION: &str = ".csv";
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TRANSIENT_RETRIES: u32 = 2;
pub const DEFAULT_MAX_STABILITY_ATTEMPTS: u32 = 30;

const CONFIG_ENV: &str = "SWEEPWARE_CONFIG_PATH";

fn default_excluded_top_y() -> i32 {
    DEFAULT_EXCLUDED_TOP_Y
}

fn default_file_name() -> String {
    DEFAULT_FILE_NAME.to_string()
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

fn default_transient_retries() -> u32 {
    DEFAULT_TRANSIENT_RETRIES
}

fn default_max_stability_attempts() -> u32 {
    DEFAULT_MAX_STABILITY_ATTEMPTS
}

// Every field has a serde default so a bare `{"excluded_top_y": 500}` loads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default = "default_excluded_top_y")]
    pub excluded_top_y: i32,
    /// Empty means the user documents directory.
    #[serde(default)]
    pub output_dir: String,
    #[serde(default = "default_file_name")]
    pub file_name: String,
    /// Empty means auto-detect.
    #[serde(default)]
    pub adb_path: String,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,
    #[serde(default = "default_max_stability_attempts")]
    pub max_stability_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            excluded_top_y: DEFAULT_EXCLUDED_TOP_Y,
            output_dir: String::new(),
            file_name: default_file_name(),
            adb_path: String::new(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            transient_retries: DEFAULT_TRANSIENT_RETRIES,
            max_stability_attempts: DEFAULT_MAX_STABILITY_ATTEMPTS,
        }
    }
}

impl Settings {
    pub fn output_dir(&self) -> PathBuf {
        if self.output_dir.trim().is_empty() {
            default_output_dir()
        } else {
            PathBuf::from(self.output_dir.trim())
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir().join(&self.file_name)
    }
}

pub fn default_output_dir() -> PathBuf {
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sweepware")
        .join("settings.json")
}

pub fn backup_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|value| value.to_string_lossy().to_string())
        .unwrap_or_else(|| "settings".to_string());
    path.with_file_name(format!("{stem}.backup.json"))
}

pub fn load_settings(trace_id: &str) -> Result<Settings, AppError> {
    load_settings_from_path(&config_path(), trace_id)
}

pub fn save_settings(settings: &Settings, trace_id: &str) -> Result<(), AppError> {
    save_settings_to_path(settings, &config_path(), trace_id)
}

// A missing file is written with defaults.
pub fn load_settings_from_path(path: &Path, trace_id: &str) -> Result<Settings, AppError> {
    if !path.exists() {
        let settings = Settings::default();
        save_settings_to_path(&settings, path, trace_id)?;
        info!(trace_id = %trace_id, path = %path.display(), "wrote default settings");
        return Ok(settings);
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read settings: {err}"), trace_id))?;
    let settings: Settings = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse settings: {err}"), trace_id))?;
    Ok(validate_settings(settings, trace_id))
}

pub fn save_settings_to_path(settings: &Settings, path: &Path, trace_id: &str) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            AppError::system(format!("Failed to create settings dir: {err}"), trace_id)
        })?;
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path_for(path));
    }
    let payload = serde_json::to_string_pretty(settings)
        .map_err(|err| AppError::system(format!("Failed to serialize settings: {err}"), trace_id))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write settings: {err}"), trace_id))?;
    Ok(())
}

fn validate_settings(mut settings: Settings, trace_id: &str) -> Settings {
    if settings.excluded_top_y < 0 {
        warn!(trace_id = %trace_id, value = settings.excluded_top_y, "negative excluded_top_y, using default");
        settings.excluded_top_y = DEFAULT_EXCLUDED_TOP_Y;
    }
    if validate_file_name(&settings.file_name).is_err() {
        warn!(trace_id = %trace_id, value = %settings.file_name, "invalid file_name, using default");
        settings.file_name = default_file_name();
    }
    if settings.command_timeout_secs == 0 {
        settings.command_timeout_secs = DEFAULT_COMMAND_TIMEOUT_SECS;
    }
    if settings.max_stability_attempts == 0 {
        settings.max_stability_attempts = DEFAULT_MAX_STABILITY_ATTEMPTS;
    }
    settings
}

pub fn validate_file_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.len() <= OUTPUT_EXTENSION.len() || !trimmed.ends_with(OUTPUT_EXTENSION) {
        return Err(format!("File name must end with {OUTPUT_EXTENSION}"));
    }
    if trimmed.contains('/') || trimmed.contains('\\') || trimmed.contains('\0') {
        return Err("File name must not contain path separators".to_string());
    }
    Ok(())
}

pub fn validate_excluded_top_y(value: i32) -> Result<(), String> {
    if value < 0 {
        return Err("Excluded top Y must be zero or greater".to_string());
    }
    Ok(())
}

fn update_settings_at(
    path: &Path,
    trace_id: &str,
    mutate: impl FnOnce(&mut Settings) -> Result<(), String>,
) -> Result<Settings, AppError> {
    let mut settings = load_settings_from_path(path, trace_id)?;
    mutate(&mut settings).map_err(|message| AppError::validation(message, trace_id))?;
    save_settings_to_path(&settings, path, trace_id)?;
    Ok(settings)
}

pub fn set_excluded_top_y_at(path: &Path, value: i32, trace_id: &str) -> Result<Settings, AppError> {
    update_settings_at(path, trace_id, |settings| {
        validate_excluded_top_y(value)?;
        settings.excluded_top_y = value;
        Ok(())
    })
}

pub fn set_file_name_at(path: &Path, name: &str, trace_id: &str) -> Result<Settings, AppError> {
    update_settings_at(path, trace_id, |settings| {
        validate_file_name(name)?;
        settings.file_name = name.trim().to_string();
        Ok(())
    })
}

pub fn set_output_dir_at(path: &Path, dir: &str, trace_id: &str) -> Result<Settings, AppError> {
    update_settings_at(path, trace_id, |settings| {
        let trimmed = dir.trim();
        if trimmed.is_empty() {
            return Err("Output directory is required".to_string());
        }
        if Path::new(trimmed).is_file() {
            return Err("Output directory points to a file".to_string());
        }
        settings.output_dir = trimmed.to_string();
        Ok(())
    })
}

pub fn reset_settings_at(path: &Path, trace_id: &str) -> Result<Settings, AppError> {
    let settings = Settings::default();
    save_settings_to_path(&settings, path, trace_id)?;
    Ok(settings)
}
