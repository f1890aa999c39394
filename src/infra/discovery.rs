use crate::domain::{ProjectSummary, Timeframe};
use dirs::home_dir;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ResolveClaudeProjectsDirError {
    #[error("home directory not found")]
    HomeDirNotFound,
}

pub fn resolve_claude_projects_dir() -> Result<PathBuf, ResolveClaudeProjectsDirError> {
    if let Some(override_dir) = std::env::var_os("CLAUDE_PROJECTS_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let Some(home) = home_dir() else {
        return Err(ResolveClaudeProjectsDirError::HomeDirNotFound);
    };

    Ok(home.join(".claude").join("projects"))
}

#[derive(Clone, Debug, Default)]
pub struct DiscoveryOutput {
    pub projects: Vec<ProjectSummary>,
    pub warnings: usize,
    pub notice: Option<String>,
}

struct SessionFile {
    path: PathBuf,
    modified: SystemTime,
    bytes: u64,
}

/// Projects with at least one session log modified inside `timeframe`,
/// most recently active first.
pub fn discover_projects(projects_dir: &Path, timeframe: Timeframe, now: SystemTime) -> DiscoveryOutput {
    if !projects_dir.is_dir() {
        return DiscoveryOutput {
            notice: Some(format!(
                "Claude projects dir not found: {}",
                projects_dir.display()
            )),
            ..DiscoveryOutput::default()
        };
    }

    let cutoff = timeframe.cutoff(now);
    let mut warnings = 0usize;
    let mut by_key: BTreeMap<PathBuf, Vec<SessionFile>> = BTreeMap::new();

    let walker = WalkDir::new(projects_dir)
        .min_depth(2)
        .max_depth(2)
        .follow_links(false)
        .into_iter();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => {
                warnings += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            warnings += 1;
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            warnings += 1;
            continue;
        };
        if modified < cutoff {
            continue;
        }
        let Some(key_dir) = entry.path().parent() else {
            continue;
        };
        by_key
            .entry(key_dir.to_path_buf())
            .or_default()
            .push(SessionFile {
                path: entry.path().to_path_buf(),
                modified,
                bytes: metadata.len(),
            });
    }

    let mut projects: Vec<ProjectSummary> = by_key
        .into_iter()
        .map(|(key_dir, mut sessions)| {
            sessions.sort_by(|a, b| b.modified.cmp(&a.modified));
            let path = sessions
                .iter()
                .find_map(|session| scan_session_cwd_hint(&session.path))
                .unwrap_or_else(|| key_dir.clone());
            ProjectSummary {
                name: project_display_name(&path),
                last_activity: sessions.first().map(|session| session.modified),
                session_count: sessions.len(),
                total_bytes: sessions.iter().map(|session| session.bytes).sum(),
                session_paths: sessions.into_iter().map(|session| session.path).collect(),
                path,
            }
        })
        .collect();

    projects.sort_by(|a, b| {
        b.last_activity
            .cmp(&a.last_activity)
            .then_with(|| a.name.cmp(&b.name))
    });
    debug!(
        projects = projects.len(),
        warnings,
        dir = %projects_dir.display(),
        "discovered projects"
    );

    DiscoveryOutput {
        projects,
        warnings,
        notice: None,
    }
}

/// Keeps projects whose name or path matches one of `names` (case-insensitive).
/// An empty filter keeps everything.
pub fn filter_projects(projects: Vec<ProjectSummary>, names: &[String]) -> Vec<ProjectSummary> {
    if names.is_empty() {
        return projects;
    }
    let wanted: Vec<String> = names.iter().map(|name| name.to_lowercase()).collect();
    projects
        .into_iter()
        .filter(|project| {
            let name = project.name.to_lowercase();
            let path = project.path.display().to_string().to_lowercase();
            wanted.iter().any(|want| *want == name || *want == path)
        })
        .collect()
}

fn project_display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

const MAX_META_SCAN_LINES: usize = 50;
const MAX_META_SCAN_BYTES: usize = 256 * 1024;

fn scan_session_cwd_hint(path: &Path) -> Option<PathBuf> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);

    let mut bytes_read = 0usize;
    for _ in 0..MAX_META_SCAN_LINES {
        let mut line = String::new();
        let bytes = reader.read_line(&mut line).ok()?;
        if bytes == 0 {
            break;
        }
        bytes_read = bytes_read.saturating_add(bytes);
        if bytes_read > MAX_META_SCAN_BYTES {
            break;
        }

        let Ok(value) = serde_json::from_str::<Value>(line.trim_end()) else {
            continue;
        };
        let cwd = value
            .get("cwd")
            .or_else(|| value.get("projectPath"))
            .and_then(|v| v.as_str())
            .filter(|v| !v.trim().is_empty());
        if let Some(cwd) = cwd {
            return Some(PathBuf::from(cwd));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    fn write_log(path: &Path, cwd: &str) {
        fs::write(
            path,
            format!(
                "{{\"type\":\"summary\"}}\n{{\"type\":\"user\",\"cwd\":\"{cwd}\",\"message\":{{\"content\":\"hi\"}}}}\n"
            ),
        )
        .expect("write log");
    }

    fn age(path: &Path, days: u64) {
        let file = File::options().write(true).open(path).expect("open");
        let when = SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60);
        file.set_modified(when).expect("set mtime");
    }

    #[test]
    fn groups_sessions_by_project_and_resolves_cwd() {
        let dir = tempdir().expect("tempdir");
        let key_a = dir.path().join("-tmp-alpha");
        let key_b = dir.path().join("-tmp-beta");
        fs::create_dir_all(&key_a).expect("create");
        fs::create_dir_all(&key_b).expect("create");
        write_log(&key_a.join("s1.jsonl"), "/tmp/alpha");
        write_log(&key_a.join("s2.jsonl"), "/tmp/alpha");
        write_log(&key_b.join("s3.jsonl"), "/tmp/beta");
        age(&key_a.join("s1.jsonl"), 2);
        age(&key_a.join("s2.jsonl"), 3);
        fs::write(key_b.join("notes.txt"), "ignored").expect("write");

        let output = discover_projects(dir.path(), Timeframe::LastDays(7), SystemTime::now());
        assert!(output.notice.is_none());
        assert_eq!(output.warnings, 0);
        assert_eq!(output.projects.len(), 2);

        let beta = &output.projects[0];
        assert_eq!(beta.name, "beta");
        assert_eq!(beta.path, PathBuf::from("/tmp/beta"));
        assert_eq!(beta.session_count, 1);

        let alpha = &output.projects[1];
        assert_eq!(alpha.name, "alpha");
        assert_eq!(alpha.session_count, 2);
        assert_eq!(alpha.session_paths[0], key_a.join("s1.jsonl"));
        assert!(alpha.total_bytes > 0);
    }

    #[test]
    fn sessions_outside_timeframe_are_skipped() {
        let dir = tempdir().expect("tempdir");
        let key = dir.path().join("-tmp-old");
        fs::create_dir_all(&key).expect("create");
        write_log(&key.join("s1.jsonl"), "/tmp/old");
        age(&key.join("s1.jsonl"), 10);

        let output = discover_projects(dir.path(), Timeframe::LastDays(7), SystemTime::now());
        assert!(output.projects.is_empty());

        let output = discover_projects(dir.path(), Timeframe::LastDays(30), SystemTime::now());
        assert_eq!(output.projects.len(), 1);
    }

    #[test]
    fn falls_back_to_key_dir_without_cwd() {
        let dir = tempdir().expect("tempdir");
        let key = dir.path().join("-tmp-anon");
        fs::create_dir_all(&key).expect("create");
        fs::write(key.join("s1.jsonl"), "not json\n").expect("write");

        let output = discover_projects(dir.path(), Timeframe::Today, SystemTime::now());
        assert_eq!(output.projects.len(), 1);
        assert_eq!(output.projects[0].path, key);
        assert_eq!(output.projects[0].name, "-tmp-anon");
    }

    #[test]
    fn missing_projects_dir_returns_notice() {
        let dir = tempdir().expect("tempdir");
        let output = discover_projects(&dir.path().join("missing"), Timeframe::Today, SystemTime::now());
        assert!(output.projects.is_empty());
        assert!(output.notice.is_some());
    }

    #[test]
    fn filters_by_name_or_path() {
        let make = |name: &str, path: &str| ProjectSummary {
            name: name.to_string(),
            path: PathBuf::from(path),
            last_activity: None,
            session_count: 1,
            session_paths: Vec::new(),
            total_bytes: 0,
        };
        let projects = vec![make("alpha", "/tmp/alpha"), make("beta", "/tmp/beta")];

        let kept = filter_projects(projects.clone(), &["ALPHA".to_string()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "alpha");

        let kept = filter_projects(projects.clone(), &["/tmp/beta".to_string()]);
        assert_eq!(kept[0].name, "beta");

        assert_eq!(filter_projects(projects, &[]).len(), 2);
    }
}
