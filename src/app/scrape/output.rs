use std::collections::HashSet;
use std::fs;
use std::path::Path;

use csv::WriterBuilder;
use tempfile::NamedTempFile;

use crate::app::error::AppError;

#[cfg(unix)]
const EXPORT_MODE: u32 = 0o644;

pub fn dedup_first_seen(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

pub fn write_single_column_csv(path: &Path, rows: &[String], trace_id: &str) -> Result<(), AppError> {
    let dir = match path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        Some(parent) => parent,
        None => Path::new("."),
    };
    fs::create_dir_all(dir)
        .map_err(|err| AppError::system(format!("Failed to create output dir: {err}"), trace_id))?;

    let staging = NamedTempFile::new_in(dir)
        .map_err(|err| AppError::system(format!("Failed to create temp file: {err}"), trace_id))?;
    {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(staging.as_file());
        for row in rows {
            writer
                .write_record([row.as_str()])
                .map_err(|err| AppError::system(format!("Failed to write CSV row: {err}"), trace_id))?;
        }
        writer
            .flush()
            .map_err(|err| AppError::system(format!("Failed to flush CSV: {err}"), trace_id))?;
    }
    set_export_permissions(staging.as_file(), trace_id)?;
    staging
        .persist(path)
        .map_err(|err| AppError::system(format!("Failed to save {}: {err}", path.display()), trace_id))?;
    Ok(())
}

// Temp files are created owner-only; the export should be readable like any
// other document.
#[cfg(unix)]
fn set_export_permissions(file: &fs::File, trace_id: &str) -> Result<(), AppError> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(EXPORT_MODE))
        .map_err(|err| AppError::system(format!("Failed to set output permissions: {err}"), trace_id))
}

#[cfg(not(unix))]
fn set_export_permissions(_file: &fs::File, _trace_id: &str) -> Result<(), AppError> {
    Ok(())
}
