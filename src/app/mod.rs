mod gate;

pub use gate::*;

use crate::domain::{
    CaptureState, ContentBlock, ContentDelta, ExecutionStats, REPORT_START_MARKER, ReportCapture,
    ResultEvent, StreamEvent, format_duration, tool_result_text,
};
use crate::ui::{Console, theme, truncate_end};
use std::io::Write;
use std::time::Instant;
use tracing::{debug, trace};

const PREVIEW_CHARS: usize = 160;
const STATUS_STARTING: &str = "Starting agent…";
const STATUS_THINKING: &str = "Analyzing sessions…";
const STATUS_TOOL: &str = "Waiting for tool…";
const STATUS_REPORT: &str = "Writing report…";

/// Mutable state of one agent run, updated event by event.
///
/// Kept separate from the process so transitions can be driven directly in tests.
#[derive(Debug)]
pub struct DriverState {
    has_shown_thinking: bool,
    last_response_at: Option<Instant>,
    message_count: usize,
    tool_calls: usize,
    execution_stats: Option<ExecutionStats>,
    report: ReportCapture,
    streaming_text: bool,
    debug: bool,
}

impl DriverState {
    pub fn new(debug: bool) -> Self {
        Self {
            has_shown_thinking: false,
            last_response_at: None,
            message_count: 0,
            tool_calls: 0,
            execution_stats: None,
            report: ReportCapture::new(),
            streaming_text: false,
            debug,
        }
    }

    pub fn message_count(&self) -> usize {
        self.message_count
    }

    pub fn tool_calls(&self) -> usize {
        self.tool_calls
    }

    pub fn execution_stats(&self) -> Option<&ExecutionStats> {
        self.execution_stats.as_ref()
    }

    pub fn capture_state(&self) -> CaptureState {
        self.report.state()
    }

    /// Consumes the state, moving out the finished report (if any) and the stats.
    pub fn into_outcome(self) -> (Option<String>, Option<ExecutionStats>) {
        (self.report.into_report(), self.execution_stats)
    }

    pub fn handle_event<W: Write>(&mut self, event: StreamEvent, console: &mut Console<W>) {
        trace!(kind = event.kind(), "stream event");
        match event {
            StreamEvent::System { subtype, session_id } => {
                if subtype.as_deref() == Some("init") {
                    debug!(session_id = ?session_id, "agent session initialized");
                    console.start_spinner(STATUS_STARTING);
                } else {
                    debug!(subtype = ?subtype, "system event");
                }
            }
            StreamEvent::User { content } => {
                for block in content {
                    if let ContentBlock::ToolResult { is_error, content } = block {
                        self.on_tool_result(is_error.unwrap_or(false), content.as_ref(), console);
                    }
                }
            }
            StreamEvent::Assistant { content } => {
                for block in content {
                    match block {
                        ContentBlock::Text { text } => self.on_text(&text, console),
                        ContentBlock::ToolUse { .. } => self.on_tool_use(&block, console),
                        ContentBlock::ToolResult { .. } | ContentBlock::Other => {
                            debug!("ignoring non-text assistant block");
                        }
                    }
                }
            }
            StreamEvent::Result(result) => self.on_result(result, console),
            StreamEvent::MessageStart => debug!("message start"),
            StreamEvent::ContentBlockStart { block } => match block {
                Some(block @ ContentBlock::ToolUse { .. }) => self.on_tool_use(&block, console),
                _ => debug!("content block start"),
            },
            StreamEvent::ContentBlockDelta { delta } => match delta {
                ContentDelta::Text(text) => {
                    if !self.streaming_text {
                        console.suspend_spinner();
                        self.streaming_text = true;
                    }
                    console.raw(&text);
                }
                ContentDelta::Other(kind) => debug!(kind = %kind, "ignoring delta"),
            },
            StreamEvent::MessageStop => {
                if self.streaming_text {
                    self.streaming_text = false;
                    console.raw("\n");
                    console.resume_spinner(None);
                }
            }
            StreamEvent::Unknown { kind, subtype } => {
                debug!(kind = %kind, subtype = ?subtype, "unrecognized stream event");
                if self.debug {
                    let suffix = subtype.map(|s| format!("/{s}")).unwrap_or_default();
                    console.debug(&format!("unhandled event: {kind}{suffix}"));
                }
            }
        }
    }

    fn on_text<W: Write>(&mut self, text: &str, console: &mut Console<W>) {
        self.message_count = self.message_count.saturating_add(1);
        let now = Instant::now();
        let elapsed = self.last_response_at.map(|at| now.duration_since(at));
        self.last_response_at = Some(now);

        let was_capturing = self.report.is_capturing();
        let was_done = self.report.is_done();
        let narrative = self.report.feed(text);
        let started_capture =
            !was_capturing && !was_done && self.report.state() != CaptureState::Idle;
        let finished_capture = !was_done && self.report.is_done();
        if finished_capture {
            debug!(chars = self.report.captured_chars(), "report captured");
        }

        if narrative.is_empty() && !started_capture && !finished_capture {
            return;
        }

        console.suspend_spinner();
        if !self.has_shown_thinking {
            self.has_shown_thinking = true;
            console.dim("Agent is working through your sessions:");
        }

        let mut first = true;
        for piece in &narrative {
            for line in piece.lines().map(str::trim_end).filter(|l| !l.trim().is_empty()) {
                if first {
                    first = false;
                    let stamp = match elapsed {
                        Some(elapsed) => format!(" (+{})", format_duration(elapsed)),
                        None => String::new(),
                    };
                    let bullet = console.paint(theme::ACCENT, "●");
                    let stamp = console.paint(theme::DIM, &stamp);
                    console.line(&format!("{bullet} {}{stamp}", line.trim_start()));
                } else {
                    console.line(&format!("  {line}"));
                }
            }
        }

        if started_capture && !finished_capture {
            console.dim(&format!("  {REPORT_START_MARKER} received, capturing report…"));
        }
        if finished_capture {
            console.dim(&format!(
                "  Report received ({} characters).",
                self.report.captured_chars()
            ));
        }

        let status = if self.report.is_capturing() {
            STATUS_REPORT
        } else {
            STATUS_THINKING
        };
        console.resume_spinner(Some(status));
    }

    fn on_tool_use<W: Write>(&mut self, block: &ContentBlock, console: &mut Console<W>) {
        let ContentBlock::ToolUse { name, input } = block else {
            return;
        };
        self.tool_calls = self.tool_calls.saturating_add(1);

        console.suspend_spinner();
        let status = match block.delegated_agent() {
            Some(agent) => {
                let label = console.paint(theme::ACCENT, agent);
                console.line(&format!("↳ Launching sub-agent {label}"));
                format!("Sub-agent {agent} running…")
            }
            None => {
                console.line(&format!("⚙ Calling tool {name}"));
                STATUS_TOOL.to_string()
            }
        };
        if self.debug {
            if let Some(input) = input {
                console.debug(&format!(
                    "input: {}",
                    truncate_end(&input.to_string(), PREVIEW_CHARS)
                ));
            }
        }
        console.resume_spinner(Some(&status));
    }

    fn on_tool_result<W: Write>(
        &mut self,
        is_error: bool,
        content: Option<&serde_json::Value>,
        console: &mut Console<W>,
    ) {
        console.suspend_spinner();
        if is_error {
            console.failure("Tool reported an error");
        } else {
            console.success("Tool finished");
        }
        if self.debug {
            if let Some(text) = content.and_then(tool_result_text) {
                let first_line = text.lines().next().unwrap_or("");
                console.debug(&format!("output: {}", truncate_end(first_line, PREVIEW_CHARS)));
            }
        }
        console.resume_spinner(Some(STATUS_THINKING));
    }

    fn on_result<W: Write>(&mut self, result: ResultEvent, console: &mut Console<W>) {
        let Some(stats) = ExecutionStats::from_result(&result) else {
            debug!(subtype = ?result.subtype, "ignoring non-terminal result event");
            return;
        };
        debug!(stats = ?stats, "execution finished");
        self.execution_stats = Some(stats);
        console.stop_spinner();

        if result.is_error {
            let subtype = result.subtype.as_deref().unwrap_or("error");
            console.failure(&format!("Agent finished with an error ({subtype})"));
        }

        if result.has_message {
            return;
        }
        let Some(text) = result.result.as_deref() else {
            return;
        };
        if text.contains(REPORT_START_MARKER) {
            console.dim("Agent delivered its final message.");
            return;
        }
        if let Some(line) = text.lines().map(str::trim).find(|line| !line.is_empty()) {
            console.line(&format!("» {}", truncate_end(line, 200)));
        }
    }
}
