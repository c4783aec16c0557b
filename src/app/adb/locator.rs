use std::path::{Path, PathBuf};

const DEFAULT_ADB: &str = "adb";

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|candidate| candidate.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

pub fn resolve_adb_program(configured: &str) -> String {
    resolve_adb_program_with(configured, |key| std::env::var(key).ok())
}

pub(crate) fn resolve_adb_program_with(
    configured: &str,
    env: impl Fn(&str) -> Option<String>,
) -> String {
    let normalized = normalize_command_path(configured);
    if !normalized.is_empty() {
        return normalized;
    }
    if let Some(explicit) = env("ADB").map(|value| normalize_command_path(&value)) {
        if !explicit.is_empty() {
            return explicit;
        }
    }
    for key in ["ANDROID_HOME", "ANDROID_SDK_ROOT"] {
        if let Some(root) = env(key).filter(|value| !value.trim().is_empty()) {
            let candidate = sdk_adb_path(Path::new(root.trim()));
            if candidate.is_file() {
                return candidate.to_string_lossy().to_string();
            }
        }
    }
    DEFAULT_ADB.to_string()
}

fn sdk_adb_path(root: &Path) -> PathBuf {
    let name = if cfg!(windows) { "adb.exe" } else { "adb" };
    root.join("platform-tools").join(name)
}

pub fn validate_adb_program(program: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err("ADB command is empty".to_string());
    }
    if program == DEFAULT_ADB {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err("ADB path must point to an executable file".to_string());
    }
    if !path.exists() {
        return Err("ADB executable not found at the configured path".to_string());
    }
    Ok(())
}
