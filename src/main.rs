mod app;
mod cli;
mod domain;
mod infra;
mod ui;

use crate::cli::{CliInvocation, CliRunError};
use crate::infra::{ResolveClaudeProjectsDirError, local_offset, resolve_claude_projects_dir};
use std::io::{self, Write};
use thiserror::Error;
use time::UtcOffset;

#[derive(Debug, Error)]
enum MainError {
    #[error(transparent)]
    ProjectsDir(#[from] ResolveClaudeProjectsDirError),

    #[error(transparent)]
    Cli(#[from] CliRunError),
}

impl MainError {
    fn already_reported(&self) -> bool {
        matches!(self, Self::Cli(error) if error.already_reported())
    }
}

fn main() {
    // Read before any thread exists; the lookup fails on Unix once a second thread runs.
    let utc_offset = local_offset();
    let debug = cli::debug_enabled();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(debug))
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    if let Err(error) = run_main(debug, utc_offset) {
        if !error.already_reported() {
            let mut err = io::stderr().lock();
            let _ = writeln!(err, "{error}");
        }
        std::process::exit(1);
    }
}

fn run_main(debug: bool, utc_offset: UtcOffset) -> Result<(), MainError> {
    let args = std::env::args().collect::<Vec<_>>();
    let invocation = match cli::parse_invocation(&args) {
        Ok(invocation) => invocation,
        Err(error) => {
            let mut err = io::stderr().lock();
            let _ = writeln!(err, "{error}");
            let _ = writeln!(err);
            print_help();
            std::process::exit(2);
        }
    };

    match invocation {
        CliInvocation::PrintHelp => {
            print_help();
            Ok(())
        }
        CliInvocation::PrintVersion => {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliInvocation::Command(command) => {
            let projects_dir = resolve_claude_projects_dir()?;
            cli::run(command, &projects_dir, debug, utc_offset)?;
            Ok(())
        }
    }
}

fn log_filter(debug: bool) -> tracing_subscriber::EnvFilter {
    let level = if let Ok(v) = std::env::var("RUST_LOG") {
        v
    } else if let Ok(v) = std::env::var("CCRECAP_LOG") {
        match v.as_str() {
            "silent" => "off".to_string(),
            "fatal" => "error".to_string(),
            other => other.to_string(),
        }
    } else if debug {
        "debug".to_string()
    } else {
        "warn".to_string()
    };

    tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

fn print_help() {
    let text = format!(
        "{name} - recap recent Claude Code sessions as an HTML report\n\nUSAGE:\n  {name} [report] [--days N | --today] [--project NAME]... [--claude PATH] [--out DIR]\n                                   Summarize recent sessions (default: last 7 days)\n  {name} projects [--days N | --today]  List projects with sessions in the window\n  {name} check [--claude PATH]          Check that the claude executable can be found\n  {name} --help | --version\n\nREPORT FLAGS:\n  --days N, -d N      Look back N days (default: 7)\n  --today             Only the last 24 hours\n  --project NAME, -p  Limit to a project name or path (repeatable)\n  --claude PATH       Use this claude executable\n  --out DIR, -o DIR   Directory for the report (default: current folder)\n\nOUTPUT:\n  projects: name<TAB>path<TAB>last_activity<TAB>session_count<TAB>size\n  report:   ccrecap-report-YYYY-MM-DD.html in the output directory\n\nENV:\n  CLAUDE_PROJECTS_DIR   Override Claude projects dir (default: ~/.claude/projects)\n  CCRECAP_CLAUDE_PATH   Override the claude executable (--claude wins)\n  CCRECAP_DEBUG         1|true|yes|on prints unhandled events and agent stderr\n  CCRECAP_LOG           Log level (silent|error|warn|info|debug); RUST_LOG wins\n  NO_COLOR              Disable colors\n",
        name = env!("CARGO_PKG_NAME")
    );
    let mut out = io::stdout().lock();
    let _ = write!(out, "{text}");
}
