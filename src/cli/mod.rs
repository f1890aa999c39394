use crate::app::TerminalGate;
use crate::domain::{DEFAULT_TIMEFRAME_DAYS, ProjectSummary, Timeframe, build_report_prompt};
use crate::infra::{
    DiscoveryOutput, DriverError, DriverRequest, ProcessDriver, REPORT_FILE_PREFIX,
    discover_projects, filter_projects, locate_agent_executable, manual_command,
};
use crate::ui::Console;
use humansize::{DECIMAL, format_size};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use time::{OffsetDateTime, UtcOffset};
use time::format_description::well_known::Rfc3339;
use tracing::warn;

pub const DEBUG_ENV: &str = "CCRECAP_DEBUG";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliInvocation {
    PrintHelp,
    PrintVersion,
    Command(CliCommand),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliCommand {
    Projects { timeframe: Timeframe },
    Check { claude: Option<PathBuf> },
    Report(ReportOptions),
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReportOptions {
    pub timeframe: Timeframe,
    pub projects: Vec<String>,
    pub claude: Option<PathBuf>,
    pub out: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum CliParseError {
    #[error("unknown subcommand: {0}")]
    UnknownSubcommand(String),

    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    #[error("missing value for flag: {0}")]
    MissingFlagValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidFlagValue { flag: String, value: String },

    #[error("--days and --today cannot be combined")]
    ConflictingTimeframe,

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
}

pub fn parse_invocation(args: &[String]) -> Result<CliInvocation, CliParseError> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        return Ok(CliInvocation::PrintHelp);
    }
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        return Ok(CliInvocation::PrintVersion);
    }

    let mut iter = args.iter().skip(1).peekable();
    let has_subcommand = iter.peek().is_some_and(|arg| !arg.starts_with('-'));
    let subcommand = if has_subcommand {
        iter.next().map(String::as_str)
    } else {
        None
    };

    match subcommand {
        Some("projects") => {
            let mut timeframe = TimeframeFlags::default();
            let mut args = iter;
            while let Some(arg) = args.next() {
                if timeframe.accept(arg, &mut args)? {
                    continue;
                }
                return Err(unexpected(arg));
            }
            Ok(CliInvocation::Command(CliCommand::Projects {
                timeframe: timeframe.resolve(),
            }))
        }
        Some("check") => {
            let mut claude: Option<PathBuf> = None;
            let mut args = iter;
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--claude" => claude = Some(PathBuf::from(flag_value("--claude", &mut args)?)),
                    _ => return Err(unexpected(arg)),
                }
            }
            Ok(CliInvocation::Command(CliCommand::Check { claude }))
        }
        Some("report") | None => {
            let mut timeframe = TimeframeFlags::default();
            let mut options = ReportOptions::default();
            let mut args = iter;
            while let Some(arg) = args.next() {
                if timeframe.accept(arg, &mut args)? {
                    continue;
                }
                match arg.as_str() {
                    "--project" | "-p" => {
                        options.projects.push(flag_value("--project", &mut args)?);
                    }
                    "--claude" => {
                        options.claude = Some(PathBuf::from(flag_value("--claude", &mut args)?));
                    }
                    "--out" | "-o" => {
                        options.out = Some(PathBuf::from(flag_value("--out", &mut args)?));
                    }
                    _ => return Err(unexpected(arg)),
                }
            }
            options.timeframe = timeframe.resolve();
            Ok(CliInvocation::Command(CliCommand::Report(options)))
        }
        Some(other) => Err(CliParseError::UnknownSubcommand(other.to_string())),
    }
}

#[derive(Default)]
struct TimeframeFlags {
    days: Option<u32>,
    today: bool,
}

impl TimeframeFlags {
    fn accept<'a>(
        &mut self,
        arg: &str,
        args: &mut impl Iterator<Item = &'a String>,
    ) -> Result<bool, CliParseError> {
        match arg {
            "--days" | "-d" => {
                let value = flag_value("--days", args)?;
                let days = value
                    .parse::<u32>()
                    .ok()
                    .filter(|days| *days > 0)
                    .ok_or_else(|| CliParseError::InvalidFlagValue {
                        flag: "--days".to_string(),
                        value,
                    })?;
                self.days = Some(days);
            }
            "--today" => self.today = true,
            _ => return Ok(false),
        }
        if self.today && self.days.is_some() {
            return Err(CliParseError::ConflictingTimeframe);
        }
        Ok(true)
    }

    fn resolve(self) -> Timeframe {
        match (self.today, self.days) {
            (true, _) => Timeframe::Today,
            (false, Some(days)) => Timeframe::LastDays(days),
            (false, None) => Timeframe::LastDays(DEFAULT_TIMEFRAME_DAYS),
        }
    }
}

fn flag_value<'a>(
    flag: &str,
    args: &mut impl Iterator<Item = &'a String>,
) -> Result<String, CliParseError> {
    args.next()
        .cloned()
        .ok_or_else(|| CliParseError::MissingFlagValue(flag.to_string()))
}

fn unexpected(arg: &str) -> CliParseError {
    if arg.starts_with('-') {
        CliParseError::UnknownFlag(arg.to_string())
    } else {
        CliParseError::UnexpectedArgument(arg.to_string())
    }
}

#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("no Claude sessions found in {timeframe}\nHint: widen the window with --days N.")]
    NoProjects { timeframe: String },

    #[error(
        "no project matches {0}\nHint: run `ccrecap projects` and pass a name or path from the first two columns."
    )]
    ProjectNotMatched(String),

    #[error(
        "claude executable not found: {0}\nHint: install Claude Code, or pass --claude PATH (or set CCRECAP_CLAUDE_PATH)."
    )]
    ExecutableNotFound(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    WriteOutput(#[from] io::Error),

    #[error("failed to resolve current directory: {0}")]
    CurrentDir(String),
}

impl CliRunError {
    /// Driver failures are already shown as an error block on the console.
    pub fn already_reported(&self) -> bool {
        matches!(self, Self::Driver(_))
    }
}

pub fn debug_enabled() -> bool {
    std::env::var(DEBUG_ENV).is_ok_and(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

pub fn run(
    command: CliCommand,
    projects_dir: &Path,
    debug: bool,
    utc_offset: UtcOffset,
) -> Result<(), CliRunError> {
    match command {
        CliCommand::Projects { timeframe } => {
            let stdout = io::stdout();
            let mut out = io::BufWriter::new(stdout.lock());
            let stderr = io::stderr();
            let mut err = io::BufWriter::new(stderr.lock());

            let discovery = discover_projects(projects_dir, timeframe, SystemTime::now());
            for project in &discovery.projects {
                if !write_line(&mut out, &format_project_line(project))? {
                    return Ok(());
                }
            }
            write_scan_notice(&mut err, &discovery)?;
            Ok(())
        }
        CliCommand::Check { claude } => {
            let check = locate_agent_executable(claude.as_deref());
            if !check.found {
                return Err(CliRunError::ExecutableNotFound(
                    check.path.display().to_string(),
                ));
            }
            let stdout = io::stdout();
            let mut out = stdout.lock();
            write_line(&mut out, &format!("found\t{}", check.path.display()))?;
            Ok(())
        }
        CliCommand::Report(options) => run_report(options, projects_dir, debug, utc_offset),
    }
}

fn run_report(
    options: ReportOptions,
    projects_dir: &Path,
    debug: bool,
    utc_offset: UtcOffset,
) -> Result<(), CliRunError> {
    let discovery = discover_projects(projects_dir, options.timeframe, SystemTime::now());
    {
        let stderr = io::stderr();
        let mut err = stderr.lock();
        write_scan_notice(&mut err, &discovery)?;
    }
    if discovery.projects.is_empty() {
        return Err(CliRunError::NoProjects {
            timeframe: options.timeframe.label(),
        });
    }
    let projects = filter_projects(discovery.projects, &options.projects);
    if projects.is_empty() {
        return Err(CliRunError::ProjectNotMatched(options.projects.join(", ")));
    }

    let check = locate_agent_executable(options.claude.as_deref());
    if !check.found {
        return Err(CliRunError::ExecutableNotFound(
            check.path.display().to_string(),
        ));
    }

    let working_dir =
        std::env::current_dir().map_err(|error| CliRunError::CurrentDir(error.to_string()))?;
    let output_dir = options.out.unwrap_or_else(|| working_dir.clone());
    let prompt = build_report_prompt(options.timeframe, &projects);
    let request = DriverRequest {
        prompt: prompt.prompt,
        system_prompt: Some(prompt.system_prompt),
        working_dir,
        executable: check.path,
        output_dir,
        report_prefix: REPORT_FILE_PREFIX.to_string(),
        utc_offset,
        debug,
    };

    let mut console = Console::stdout();
    let sessions: usize = projects.iter().map(|project| project.session_count).sum();
    let heading = console.paint(
        crate::ui::theme::BOLD,
        &format!(
            "Recapping {} project{} ({} session{}) from {}",
            projects.len(),
            plural(projects.len()),
            sessions,
            plural(sessions),
            options.timeframe.label()
        ),
    );
    console.line(&heading);
    if debug {
        console.debug(&format!("executable: {}", request.executable.display()));
        console.debug(&format!("output dir: {}", request.output_dir.display()));
    }

    let driver = ProcessDriver::for_current_platform();
    match driver.run(&request, &mut console, &mut TerminalGate) {
        Ok(_result) => Ok(()),
        Err(error) => {
            console.dim("Run the analysis manually with:");
            console.line(&manual_command(&request));
            Err(error.into())
        }
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

fn format_project_line(project: &ProjectSummary) -> String {
    let last_activity = project
        .last_activity
        .and_then(system_time_to_rfc3339)
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}\t{}\t{}\t{}\t{}",
        project.name,
        project.path.display(),
        last_activity,
        project.session_count,
        format_size(project.total_bytes, DECIMAL)
    )
}

fn system_time_to_rfc3339(value: SystemTime) -> Option<String> {
    OffsetDateTime::from(value).format(&Rfc3339).ok()
}

fn write_scan_notice(err: &mut impl Write, discovery: &DiscoveryOutput) -> Result<(), CliRunError> {
    if let Some(notice) = discovery.notice.as_deref() {
        warn!(notice, "project discovery");
        write_line(err, notice)?;
    }
    if discovery.warnings > 0 {
        write_line(err, &format!("warnings: {}", discovery.warnings))?;
    }
    Ok(())
}

fn write_line(out: &mut impl Write, line: &str) -> io::Result<bool> {
    match writeln!(out, "{line}") {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(error) => Err(error),
    }
}
