use crate::app::{CompletionGate, DriverState, GateOutcome};
use crate::domain::{DEFAULT_LINK_RULES, StreamDecoder, finalize_report};
use crate::infra::{has_html_artifact, now_at, save_report};
use crate::ui::{Console, SPINNER_INTERVAL};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use thiserror::Error;
use time::UtcOffset;
use tracing::{debug, info, warn};
use uuid::Uuid;

const OUTPUT_FORMAT_ARGS: [&str; 3] = ["--output-format", "stream-json", "--verbose"];
const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Clone, Debug)]
pub struct DriverRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub working_dir: PathBuf,
    pub executable: PathBuf,
    pub output_dir: PathBuf,
    pub report_prefix: String,
    pub utc_offset: UtcOffset,
    pub debug: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessResult {
    pub exit_code: Option<i32>,
    pub stderr_text: String,
    pub report_saved: bool,
    pub report_path: Option<PathBuf>,
    pub gate: GateOutcome,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to write prompt file {path}: {source}")]
    PromptFile { path: String, source: io::Error },

    #[error("failed to start {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("{}", describe_abnormal_exit(.code, .stderr, .hint))]
    AbnormalExit {
        code: i32,
        stderr: String,
        hint: Option<String>,
    },

    #[error("{}", describe_termination(.stderr))]
    Terminated { stderr: String },

    #[error("failed to open {0} pipe")]
    Pipe(&'static str),

    #[error("failed to wait for agent process: {0}")]
    Wait(io::Error),
}

impl DriverError {
    pub fn title(&self) -> &'static str {
        match self {
            Self::PromptFile { .. } => "Could not prepare the prompt",
            Self::Spawn { .. } | Self::Pipe(_) => "Could not start Claude",
            Self::AbnormalExit { .. } => "Claude exited with an error",
            Self::Terminated { .. } | Self::Wait(_) => "Claude terminated unexpectedly",
        }
    }
}

fn describe_abnormal_exit(code: &i32, stderr: &str, hint: &Option<String>) -> String {
    let mut message = format!("agent process exited with code {code}");
    if !stderr.is_empty() {
        message.push_str(":\n");
        message.push_str(stderr);
    }
    if let Some(hint) = hint.as_deref() {
        message.push_str("\nHint: ");
        message.push_str(hint);
    }
    message
}

fn describe_termination(stderr: &str) -> String {
    let mut message = "agent process terminated unexpectedly (no exit code)".to_string();
    if !stderr.is_empty() {
        message.push_str(":\n");
        message.push_str(stderr);
    }
    message
}

const PLATFORM_HINTS: &[(&str, &str)] = &[
    (
        "not recognized",
        "the shell could not find the claude command. Install it or pass --claude PATH.",
    ),
    (
        "command not found",
        "the shell could not find the claude command. Install it or pass --claude PATH.",
    ),
    (
        "Access is denied",
        "the executable could not be launched. Check its permissions or run the terminal as a regular user.",
    ),
];

/// Maps the child's exit status to the run outcome; `None` means killed by a signal.
pub fn classify_exit(code: Option<i32>, stderr: &str) -> Result<(), DriverError> {
    match code {
        Some(0) => Ok(()),
        Some(code) => Err(DriverError::AbnormalExit {
            code,
            stderr: stderr.to_string(),
            hint: PLATFORM_HINTS
                .iter()
                .find(|(needle, _)| stderr.contains(needle))
                .map(|(_, hint)| hint.to_string()),
        }),
        None => Err(DriverError::Terminated {
            stderr: stderr.to_string(),
        }),
    }
}

/// How the prompt reaches the agent process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transport {
    /// Prompt passed as the trailing command argument.
    DirectArgument,
    /// Prompt written to a temp file and piped into stdin through `cmd /C type`.
    PromptFilePipe,
}

impl Transport {
    pub fn for_current_platform() -> Self {
        if cfg!(windows) {
            Self::PromptFilePipe
        } else {
            Self::DirectArgument
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Invocation {
    Direct { program: PathBuf, args: Vec<String> },
    ShellPipe { shell: String, line: String },
}

impl Invocation {
    pub fn build(transport: Transport, request: &DriverRequest, prompt_file: Option<&Path>) -> Self {
        match (transport, prompt_file) {
            (Transport::PromptFilePipe, Some(prompt_file)) => {
                let mut line = format!(
                    "type \"{}\" | \"{}\" -p",
                    prompt_file.display(),
                    request.executable.display()
                );
                if let Some(system_prompt) = request.system_prompt.as_deref() {
                    line.push_str(" --append-system-prompt \"");
                    line.push_str(&quote_for_cmd(system_prompt));
                    line.push('"');
                }
                for arg in OUTPUT_FORMAT_ARGS {
                    line.push(' ');
                    line.push_str(arg);
                }
                Self::ShellPipe {
                    shell: "cmd".to_string(),
                    line,
                }
            }
            _ => {
                let mut args = vec!["-p".to_string()];
                if let Some(system_prompt) = request.system_prompt.as_deref() {
                    args.push("--append-system-prompt".to_string());
                    args.push(system_prompt.to_string());
                }
                args.extend(OUTPUT_FORMAT_ARGS.iter().map(|arg| arg.to_string()));
                args.push(request.prompt.clone());
                Self::Direct {
                    program: request.executable.clone(),
                    args,
                }
            }
        }
    }

    fn program_label(&self) -> String {
        match self {
            Self::Direct { program, .. } => program.display().to_string(),
            Self::ShellPipe { shell, .. } => shell.clone(),
        }
    }

    fn to_command(&self, working_dir: &Path) -> Command {
        let mut command = match self {
            Self::Direct { program, args } => {
                let mut command = Command::new(program);
                command.args(args);
                command
            }
            Self::ShellPipe { shell, line } => shell_pipe_command(shell, line),
        };
        command
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

#[cfg(windows)]
fn shell_pipe_command(shell: &str, line: &str) -> Command {
    use std::os::windows::process::CommandExt;
    let mut command = Command::new(shell);
    command.raw_arg("/C").raw_arg(line);
    command
}

#[cfg(not(windows))]
fn shell_pipe_command(shell: &str, line: &str) -> Command {
    let mut command = Command::new(shell);
    command.arg("/C").arg(line);
    command
}

/// Body of a double-quoted cmd.exe argument.
///
/// cmd has no escape for `"` inside quotes, so double quotes become single
/// quotes and the text never leaves the quoted region where `&`, `|`, `<`, `>`
/// and `^` are literal. `%` is dropped since cmd expands `%VAR%` even inside
/// quotes. Newlines collapse to spaces.
fn quote_for_cmd(text: &str) -> String {
    text.split(['\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .replace('"', "'")
        .replace('%', "")
}

/// Temp file holding the prompt; removed when dropped.
struct PromptFile {
    path: PathBuf,
}

impl PromptFile {
    fn write(prompt: &str) -> Result<Self, DriverError> {
        let path = std::env::temp_dir().join(format!("ccrecap-prompt-{}.txt", Uuid::new_v4()));
        fs::write(&path, prompt).map_err(|source| DriverError::PromptFile {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { path })
    }
}

impl Drop for PromptFile {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(&self.path) {
            debug!(%error, path = %self.path.display(), "failed to remove prompt file");
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum StreamKind {
    Stdout,
    Stderr,
}

enum DriverSignal {
    Chunk(StreamKind, Vec<u8>),
    Closed(StreamKind),
}

fn pipe_reader_thread(kind: StreamKind, mut pipe: impl Read, tx: Sender<DriverSignal>) {
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        match pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(DriverSignal::Chunk(kind, buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => {
                debug!(%error, ?kind, "pipe read failed");
                break;
            }
        }
    }
    let _ = tx.send(DriverSignal::Closed(kind));
}

/// Spawns the agent, streams its events onto the console and persists the report.
pub struct ProcessDriver {
    transport: Transport,
}

impl ProcessDriver {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub fn for_current_platform() -> Self {
        Self::new(Transport::for_current_platform())
    }

    pub fn run<W: Write, G: CompletionGate>(
        &self,
        request: &DriverRequest,
        console: &mut Console<W>,
        gate: &mut G,
    ) -> Result<ProcessResult, DriverError> {
        let result = self.run_inner(request, console, gate);
        if let Err(error) = &result {
            console.stop_spinner();
            console.error_block(error.title(), &error.to_string());
        }
        result
    }

    fn run_inner<W: Write, G: CompletionGate>(
        &self,
        request: &DriverRequest,
        console: &mut Console<W>,
        gate: &mut G,
    ) -> Result<ProcessResult, DriverError> {
        let prompt_file = match self.transport {
            Transport::PromptFilePipe => Some(PromptFile::write(&request.prompt)?),
            Transport::DirectArgument => None,
        };
        let invocation = Invocation::build(
            self.transport,
            request,
            prompt_file.as_ref().map(|file| file.path.as_path()),
        );
        debug!(
            transport = ?self.transport,
            program = %invocation.program_label(),
            prompt_chars = request.prompt.chars().count(),
            working_dir = %request.working_dir.display(),
            "spawning agent process"
        );

        let mut child = invocation
            .to_command(&request.working_dir)
            .spawn()
            .map_err(|source| DriverError::Spawn {
                program: invocation.program_label(),
                source,
            })?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DriverError::Pipe("stdout/stderr"));
        };

        let (tx, rx) = mpsc::channel::<DriverSignal>();
        let stdout_tx = tx.clone();
        std::thread::spawn(move || pipe_reader_thread(StreamKind::Stdout, stdout, stdout_tx));
        std::thread::spawn(move || pipe_reader_thread(StreamKind::Stderr, stderr, tx));

        let mut state = DriverState::new(request.debug);
        let mut decoder = StreamDecoder::new();
        let mut stderr_bytes: Vec<u8> = Vec::new();
        let mut open_streams = 2usize;

        while open_streams > 0 {
            match rx.recv_timeout(SPINNER_INTERVAL) {
                Ok(DriverSignal::Chunk(StreamKind::Stdout, bytes)) => {
                    for event in decoder.push(&bytes) {
                        state.handle_event(event, console);
                    }
                }
                Ok(DriverSignal::Chunk(StreamKind::Stderr, bytes)) => {
                    if request.debug {
                        for line in String::from_utf8_lossy(&bytes).lines() {
                            if !line.trim().is_empty() {
                                console.debug(&format!("stderr: {line}"));
                            }
                        }
                    }
                    stderr_bytes.extend_from_slice(&bytes);
                }
                Ok(DriverSignal::Closed(kind)) => {
                    debug!(?kind, "agent stream closed");
                    open_streams -= 1;
                }
                Err(RecvTimeoutError::Timeout) => console.tick(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        if let Some(event) = decoder.finish() {
            state.handle_event(event, console);
        }

        let status = child.wait().map_err(DriverError::Wait)?;
        drop(prompt_file);
        console.stop_spinner();

        let exit_code = status.code();
        let stderr_text = String::from_utf8_lossy(&stderr_bytes).trim().to_string();
        info!(
            exit_code = ?exit_code,
            messages = state.message_count(),
            tool_calls = state.tool_calls(),
            capture = ?state.capture_state(),
            cost_usd = ?state.execution_stats().and_then(|stats| stats.total_cost_usd),
            discarded_lines = decoder.discarded(),
            "agent process exited"
        );
        classify_exit(exit_code, &stderr_text)?;

        let (report, stats) = state.into_outcome();
        let mut report_path = None;
        match report {
            Some(raw) => {
                let now = now_at(request.utc_offset);
                let html = finalize_report(&raw, stats.as_ref(), DEFAULT_LINK_RULES, now);
                match save_report(&request.output_dir, &request.report_prefix, now.date(), &html) {
                    Ok(path) => {
                        console.blank();
                        let link = console.file_link(&path);
                        console.success(&format!("Report saved to {link}"));
                        report_path = Some(path);
                    }
                    Err(error) => {
                        warn!(%error, "failed to save report");
                        console.failure(&format!("Failed to save report: {error}"));
                    }
                }
            }
            None => {
                console.blank();
                console.warning("No report was generated.");
            }
        }
        if let Some(stats) = stats.as_ref() {
            console.dim(&stats.summary_line());
        }

        let report_saved = report_path.is_some();
        let gate = if report_saved || has_html_artifact(&request.output_dir, &request.report_prefix)
        {
            gate.wait(console)
        } else {
            GateOutcome::Skipped
        };

        Ok(ProcessResult {
            exit_code,
            stderr_text,
            report_saved,
            report_path,
            gate,
        })
    }
}

/// Command line a user can paste to run the same analysis by hand.
pub fn manual_command(request: &DriverRequest) -> String {
    let mut parts = vec![shell_quote(&request.executable.display().to_string())];
    parts.push("-p".to_string());
    if let Some(system_prompt) = request.system_prompt.as_deref() {
        parts.push("--append-system-prompt".to_string());
        parts.push(shell_quote(system_prompt));
    }
    parts.push(shell_quote(&request.prompt));
    parts.join(" ")
}

fn shell_quote(text: &str) -> String {
    if !text.is_empty()
        && text
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':'))
    {
        return text.to_string();
    }
    if cfg!(windows) {
        format!("\"{}\"", text.replace('"', "\\\""))
    } else {
        format!("'{}'", text.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dir: &Path, executable: PathBuf) -> DriverRequest {
        DriverRequest {
            prompt: "summarize".to_string(),
            system_prompt: Some("be brief\nuse markers".to_string()),
            working_dir: dir.to_path_buf(),
            executable,
            output_dir: dir.to_path_buf(),
            report_prefix: "ccrecap-report".to_string(),
            utc_offset: UtcOffset::UTC,
            debug: false,
        }
    }

    #[test]
    fn direct_argument_invocation_puts_prompt_last() {
        let req = request(Path::new("/tmp"), PathBuf::from("claude"));
        let invocation = Invocation::build(Transport::DirectArgument, &req, None);
        assert_eq!(
            invocation,
            Invocation::Direct {
                program: PathBuf::from("claude"),
                args: vec![
                    "-p".to_string(),
                    "--append-system-prompt".to_string(),
                    "be brief\nuse markers".to_string(),
                    "--output-format".to_string(),
                    "stream-json".to_string(),
                    "--verbose".to_string(),
                    "summarize".to_string(),
                ],
            }
        );
    }

    #[test]
    fn prompt_file_invocation_pipes_file_into_stdin() {
        let mut req = request(Path::new("/tmp"), PathBuf::from("C:/bin/claude.cmd"));
        req.system_prompt = Some("say \"hi\"\nthen stop".to_string());
        let invocation = Invocation::build(
            Transport::PromptFilePipe,
            &req,
            Some(Path::new("C:/tmp/prompt.txt")),
        );
        let Invocation::ShellPipe { shell, line } = invocation else {
            panic!("expected shell pipe");
        };
        assert_eq!(shell, "cmd");
        assert_eq!(
            line,
            r#"type "C:/tmp/prompt.txt" | "C:/bin/claude.cmd" -p --append-system-prompt "say 'hi' then stop" --output-format stream-json --verbose"#
        );
        assert!(!line.contains("summarize"));
    }

    #[test]
    fn cmd_quoting_keeps_metacharacters_inside_quotes() {
        let quoted = quote_for_cmd("a\" & del x | more > out < in %PATH% ^b");
        assert!(!quoted.contains('"'));
        assert!(!quoted.contains('%'));
        assert_eq!(quoted, "a' & del x | more > out < in PATH ^b");
    }

    #[test]
    fn exit_codes_are_classified() {
        assert!(classify_exit(Some(0), "").is_ok());

        let error = classify_exit(Some(127), "sh: claude: command not found").expect_err("127");
        let DriverError::AbnormalExit { code, hint, .. } = &error else {
            panic!("expected abnormal exit, got {error:?}");
        };
        assert_eq!(*code, 127);
        assert!(hint.is_some());
        let message = error.to_string();
        assert!(message.contains("127"));
        assert!(message.contains("command not found"));

        let error = classify_exit(Some(2), "bad flag").expect_err("2");
        assert!(matches!(error, DriverError::AbnormalExit { hint: None, .. }));

        let error = classify_exit(None, "").expect_err("signal");
        assert!(matches!(error, DriverError::Terminated { .. }));
        assert!(error.to_string().contains("terminated unexpectedly"));
    }

    #[test]
    fn prompt_file_is_removed_on_drop() {
        let file = PromptFile::write("hello").expect("write prompt");
        let path = file.path.clone();
        assert_eq!(fs::read_to_string(&path).expect("read"), "hello");
        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn manual_command_quotes_prompt() {
        let mut req = request(Path::new("/tmp"), PathBuf::from("/usr/bin/claude"));
        req.system_prompt = None;
        req.prompt = "it's done".to_string();
        let command = manual_command(&req);
        assert!(command.starts_with("/usr/bin/claude -p "));
        if cfg!(unix) {
            assert!(command.ends_with(r"'it'\''s done'"));
        }
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::sync::Mutex;

        static SPAWN_LOCK: Mutex<()> = Mutex::new(());

        #[derive(Default)]
        struct CountingGate {
            calls: usize,
        }

        impl CompletionGate for CountingGate {
            fn wait<W: Write>(&mut self, _console: &mut Console<W>) -> GateOutcome {
                self.calls += 1;
                GateOutcome::Continued
            }
        }

        fn stub_agent(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-claude");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write stub");
            let mut permissions = fs::metadata(&path).expect("metadata").permissions();
            permissions.set_mode(0o755);
            fs::set_permissions(&path, permissions).expect("chmod");
            path
        }

        fn run_stub(
            body: &str,
        ) -> (tempfile::TempDir, Result<ProcessResult, DriverError>, String, usize) {
            let _lock = SPAWN_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let dir = tempfile::tempdir().expect("tempdir");
            let executable = stub_agent(dir.path(), body);
            let req = request(dir.path(), executable);
            let mut console = Console::new(Vec::new(), false);
            let mut gate = CountingGate::default();
            let result = ProcessDriver::new(Transport::DirectArgument).run(&req, &mut console, &mut gate);
            let output = String::from_utf8(console.into_inner()).expect("utf8");
            (dir, result, output, gate.calls)
        }

        #[test]
        fn end_to_end_report_is_saved_with_stats() {
            let body = r#"cat <<'EOF'
{"type":"system","subtype":"init"}
{"type":"assistant","message":{"content":[{"type":"text","text":"=== REPORT START ===<html>ok</html>=== REPORT END ==="}]}}
{"type":"result","subtype":"success","duration_ms":1200,"num_turns":1,"total_cost_usd":0.01}
EOF
exit 0"#;
            let (dir, result, output, gate_calls) = run_stub(body);
            let result = result.expect("driver succeeds");

            assert_eq!(result.exit_code, Some(0));
            assert!(result.report_saved);
            assert_eq!(gate_calls, 1);
            assert_eq!(result.gate, GateOutcome::Continued);

            let path = result.report_path.expect("report path");
            assert!(path.starts_with(dir.path()));
            let name = path.file_name().expect("file name").to_string_lossy().to_string();
            assert!(name.starts_with("ccrecap-report-") && name.ends_with(".html"));

            let html = fs::read_to_string(&path).expect("read report");
            assert!(html.starts_with("<html>ok</html>"));
            assert!(html.contains("1200ms"));
            assert!(html.contains("1 turn"));
            assert!(!output.contains("<html>ok</html>"));
            assert!(output.contains("Report saved to"));
        }

        #[test]
        fn stream_without_report_is_not_a_failure() {
            let body = r#"echo '{"type":"system","subtype":"init"}'
echo 'diagnostic noise'
printf '%s' '{"type":"assistant","message":{"content":[{"type":"text","text":"nothing to report"}]}}'
exit 0"#;
            let (_dir, result, output, gate_calls) = run_stub(body);
            let result = result.expect("driver succeeds");
            assert!(!result.report_saved);
            assert_eq!(result.gate, GateOutcome::Skipped);
            assert_eq!(gate_calls, 0);
            assert!(output.contains("nothing to report"));
            assert!(output.contains("No report was generated."));
        }

        #[test]
        fn non_zero_exit_embeds_stderr() {
            let (_dir, result, output, gate_calls) = run_stub("echo 'boom' >&2\nexit 127");
            let error = result.expect_err("driver fails");
            assert!(matches!(error, DriverError::AbnormalExit { code: 127, .. }));
            assert!(error.to_string().contains("boom"));
            assert!(output.contains("Claude exited with an error"));
            assert_eq!(gate_calls, 0);
        }

        #[test]
        fn signal_termination_is_distinct() {
            let (_dir, result, _output, _gate_calls) = run_stub("kill -9 $$");
            assert!(matches!(result, Err(DriverError::Terminated { .. })));
        }

        #[test]
        fn missing_executable_is_a_spawn_error() {
            let _lock = SPAWN_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let dir = tempfile::tempdir().expect("tempdir");
            let req = request(dir.path(), dir.path().join("does-not-exist"));
            let mut console = Console::new(Vec::new(), false);
            let result = ProcessDriver::new(Transport::DirectArgument).run(
                &req,
                &mut console,
                &mut CountingGate::default(),
            );
            assert!(matches!(result, Err(DriverError::Spawn { .. })));
            let output = String::from_utf8(console.into_inner()).expect("utf8");
            assert!(output.contains("Could not start Claude"));
        }
    }
}
