use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};
use tracing::debug;

pub const REPORT_FILE_PREFIX: &str = "ccrecap-report";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to create report directory {path}: {source}")]
    CreateDir { path: String, source: io::Error },

    #[error("failed to write report {path}: {source}")]
    Write { path: String, source: io::Error },
}

/// `<prefix>-YYYY-MM-DD.html`
pub fn report_file_name(prefix: &str, date: Date) -> String {
    let format = format_description!("[year]-[month]-[day]");
    let stamp = date
        .format(&format)
        .unwrap_or_else(|_| format!("{}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day()));
    format!("{prefix}-{stamp}.html")
}

/// Local UTC offset, falling back to UTC.
///
/// On Unix the offset can only be read while the process is single-threaded,
/// so this must run before any thread is spawned.
pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or_else(|error| {
        debug!(%error, "local offset unavailable; using UTC");
        UtcOffset::UTC
    })
}

pub fn now_at(offset: UtcOffset) -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(offset)
}

/// Writes the finalized report into `dir`, replacing a report from the same day.
pub fn save_report(
    dir: &Path,
    prefix: &str,
    date: Date,
    html: &str,
) -> Result<PathBuf, PersistError> {
    fs::create_dir_all(dir).map_err(|source| PersistError::CreateDir {
        path: dir.display().to_string(),
        source,
    })?;
    let path = dir.join(report_file_name(prefix, date));
    fs::write(&path, html).map_err(|source| PersistError::Write {
        path: path.display().to_string(),
        source,
    })?;
    debug!(path = %path.display(), bytes = html.len(), "report saved");
    Ok(path)
}

/// Whether `dir` already holds an HTML artifact named with `prefix`.
pub fn has_html_artifact(dir: &Path, prefix: &str) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        name.starts_with(prefix) && name.ends_with(".html")
    })
}
