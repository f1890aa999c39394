use dirs::home_dir;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CLAUDE_PATH_ENV: &str = "CCRECAP_CLAUDE_PATH";
const EXECUTABLE_NAME: &str = "claude";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutableCheck {
    pub found: bool,
    pub path: PathBuf,
}

struct LookupInputs {
    explicit: Option<PathBuf>,
    env_override: Option<PathBuf>,
    path_var: Option<OsString>,
    home: Option<PathBuf>,
}

/// Resolves the agent executable: explicit override, then `CCRECAP_CLAUDE_PATH`,
/// then `PATH`, then `~/.claude/local/claude`.
///
/// When nothing is found the returned path is the bare command name so callers
/// can still show a manual command line.
pub fn locate_agent_executable(explicit: Option<&Path>) -> ExecutableCheck {
    let check = locate_with(LookupInputs {
        explicit: explicit.map(Path::to_path_buf),
        env_override: std::env::var_os(CLAUDE_PATH_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from),
        path_var: std::env::var_os("PATH"),
        home: home_dir(),
    });
    debug!(found = check.found, path = %check.path.display(), "agent executable lookup");
    check
}

fn locate_with(inputs: LookupInputs) -> ExecutableCheck {
    if let Some(path) = inputs.explicit.or(inputs.env_override) {
        return ExecutableCheck {
            found: path.is_file() || search_path_var(&path, inputs.path_var.as_ref()).is_some(),
            path,
        };
    }

    if let Some(path) = search_path_var(Path::new(EXECUTABLE_NAME), inputs.path_var.as_ref()) {
        return ExecutableCheck { found: true, path };
    }

    if let Some(home) = inputs.home {
        let local = home.join(".claude").join("local").join(EXECUTABLE_NAME);
        if local.is_file() {
            return ExecutableCheck {
                found: true,
                path: local,
            };
        }
    }

    ExecutableCheck {
        found: false,
        path: PathBuf::from(EXECUTABLE_NAME),
    }
}

fn candidate_names(name: &Path) -> Vec<PathBuf> {
    let mut names = vec![name.to_path_buf()];
    if cfg!(windows) && name.extension().is_none() {
        names.push(name.with_extension("cmd"));
        names.push(name.with_extension("exe"));
    }
    names
}

/// Bare names are looked up in every `PATH` entry; paths with a directory are not.
fn search_path_var(name: &Path, path_var: Option<&OsString>) -> Option<PathBuf> {
    if name.components().count() != 1 {
        return None;
    }
    let path_var = path_var?;
    for dir in std::env::split_paths(path_var) {
        for candidate in candidate_names(name) {
            let full = dir.join(candidate);
            if full.is_file() {
                return Some(full);
            }
        }
    }
    None
}
