pub mod theme;

use std::io::{self, IsTerminal, Stdout, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use unicode_width::UnicodeWidthStr;

pub const SPINNER_INTERVAL: Duration = Duration::from_millis(100);
const FALLBACK_WIDTH: usize = 80;

#[derive(Debug)]
struct Spinner {
    started: bool,
    active: bool,
    stopped: bool,
    visible: bool,
    frame: usize,
    status: String,
    started_at: Instant,
}

/// Terminal writer that owns the spinner line.
///
/// Every write erases the spinner first and redraws it afterwards while it is
/// active, so timer ticks and event output never interleave on one line.
/// Writes are best-effort: a closed terminal must not abort a run.
pub struct Console<W: Write> {
    out: W,
    color: bool,
    width: usize,
    spinner: Spinner,
}

impl Console<Stdout> {
    pub fn stdout() -> Self {
        let width = crossterm::terminal::size()
            .map(|(cols, _rows)| usize::from(cols))
            .unwrap_or(FALLBACK_WIDTH);
        Console::new(io::stdout(), should_color_stdout()).with_width(width)
    }
}

impl<W: Write> Console<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self {
            out,
            color,
            width: FALLBACK_WIDTH,
            spinner: Spinner {
                started: false,
                active: false,
                stopped: false,
                visible: false,
                frame: 0,
                status: String::new(),
                started_at: Instant::now(),
            },
        }
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width.max(10);
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            theme::paint(code, text)
        } else {
            text.to_string()
        }
    }

    pub fn start_spinner(&mut self, status: &str) {
        if self.spinner.stopped {
            return;
        }
        self.spinner.status = status.to_string();
        self.spinner.started_at = Instant::now();
        self.spinner.started = true;
        self.spinner.active = true;
        self.render_spinner();
    }

    pub fn tick(&mut self) {
        if !self.spinner.active {
            return;
        }
        self.spinner.frame = self.spinner.frame.wrapping_add(1);
        self.render_spinner();
    }

    pub fn suspend_spinner(&mut self) {
        self.erase_spinner();
        self.spinner.active = false;
    }

    /// Redraws a suspended spinner; no-op before `start_spinner` or after `stop_spinner`.
    pub fn resume_spinner(&mut self, status: Option<&str>) {
        if !self.spinner.started || self.spinner.stopped {
            return;
        }
        if let Some(status) = status {
            self.spinner.status = status.to_string();
        }
        self.spinner.active = true;
        self.render_spinner();
    }

    /// Stops the spinner for the rest of the run.
    pub fn stop_spinner(&mut self) {
        self.erase_spinner();
        self.spinner.active = false;
        self.spinner.stopped = true;
    }

    pub fn line(&mut self, text: &str) {
        self.erase_spinner();
        let _ = writeln!(self.out, "{text}");
        if self.spinner.active {
            self.render_spinner();
        } else {
            let _ = self.out.flush();
        }
    }

    /// Writes text without a trailing newline; the spinner must be suspended.
    pub fn raw(&mut self, text: &str) {
        self.erase_spinner();
        let _ = write!(self.out, "{text}");
        let _ = self.out.flush();
    }

    pub fn blank(&mut self) {
        self.line("");
    }

    pub fn success(&mut self, text: &str) {
        let line = format!("{} {text}", self.paint(theme::SUCCESS, "✔"));
        self.line(&line);
    }

    pub fn warning(&mut self, text: &str) {
        let line = format!("{} {text}", self.paint(theme::WARNING, "⚠"));
        self.line(&line);
    }

    pub fn failure(&mut self, text: &str) {
        let line = format!("{} {text}", self.paint(theme::ERROR, "✖"));
        self.line(&line);
    }

    pub fn dim(&mut self, text: &str) {
        let line = self.paint(theme::DIM, text);
        self.line(&line);
    }

    pub fn debug(&mut self, text: &str) {
        let line = self.paint(theme::MUTED, &format!("[debug] {text}"));
        self.line(&line);
    }

    pub fn error_block(&mut self, title: &str, message: &str) {
        self.erase_spinner();
        let header = self.paint(
            &format!("{};{}", theme::BOLD, theme::ERROR),
            &format!("✖ {title}"),
        );
        self.line("");
        self.line(&header);
        for line in message.lines() {
            let body = self.paint(theme::ERROR, &format!("  {line}"));
            self.line(&body);
        }
        self.line("");
    }

    /// Clickable reference to a local file (OSC 8) when styling is enabled.
    pub fn file_link(&self, path: &Path) -> String {
        let display = path.display().to_string();
        if !self.color {
            return display;
        }
        let target = file_url(path);
        let label = theme::paint(theme::ACCENT, &display);
        format!("\x1b]8;;{target}\x1b\\{label}\x1b]8;;\x1b\\")
    }

    fn render_spinner(&mut self) {
        let frame = theme::SPINNER_FRAMES[self.spinner.frame % theme::SPINNER_FRAMES.len()];
        let elapsed = crate::domain::format_duration(self.spinner.started_at.elapsed());
        let text = truncate_end(
            &format!("{frame} {} ({elapsed})", self.spinner.status),
            self.width.saturating_sub(1),
        );
        let painted = self.paint(theme::ACCENT, &text);
        let _ = write!(self.out, "\r{painted}");
        let _ = self.out.flush();
        self.spinner.visible = true;
    }

    fn erase_spinner(&mut self) {
        if !self.spinner.visible {
            return;
        }
        let blank = " ".repeat(self.width.saturating_sub(1));
        let _ = write!(self.out, "\r{blank}\r");
        let _ = self.out.flush();
        self.spinner.visible = false;
    }
}

pub fn should_color_stdout() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var("TERM").is_ok_and(|term| term == "dumb") {
        return false;
    }
    io::stdout().is_terminal()
}

fn file_url(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let text = absolute.display().to_string().replace('\\', "/");
    let encoded = text.replace(' ', "%20");
    if encoded.starts_with('/') {
        format!("file://{encoded}")
    } else {
        format!("file:///{encoded}")
    }
}

pub fn truncate_end(text: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0usize;
    for ch in text.chars() {
        let ch_width = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + ch_width > width.saturating_sub(1) {
            break;
        }
        used += ch_width;
        out.push(ch);
    }
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(console: Console<Vec<u8>>) -> String {
        String::from_utf8(console.into_inner()).expect("utf8")
    }

    #[test]
    fn line_erases_and_redraws_active_spinner() {
        let mut console = Console::new(Vec::new(), false).with_width(12);
        console.start_spinner("work");
        console.line("hello");
        let text = output(console);

        let erase = format!("\r{}\r", " ".repeat(11));
        let erase_at = text.find(&erase).expect("spinner erased");
        let hello_at = text.find("hello\n").expect("line printed");
        assert!(erase_at < hello_at);
        let after = &text[hello_at + "hello\n".len()..];
        assert!(after.starts_with('\r'));
        assert!(after.contains("work"));
    }

    #[test]
    fn stopped_spinner_never_redraws() {
        let mut console = Console::new(Vec::new(), false).with_width(20);
        console.start_spinner("busy");
        console.stop_spinner();
        console.resume_spinner(Some("again"));
        console.tick();
        console.line("done");
        let text = output(console);
        assert!(!text.contains("again"));
        assert!(text.ends_with("done\n"));
    }

    #[test]
    fn lines_without_spinner_are_plain() {
        let mut console = Console::new(Vec::new(), false);
        console.success("saved");
        console.failure("broken");
        assert_eq!(output(console), "✔ saved\n✖ broken\n");
    }

    #[test]
    fn file_link_is_plain_without_color() {
        let console = Console::new(Vec::new(), false);
        assert_eq!(
            console.file_link(Path::new("/tmp/report.html")),
            "/tmp/report.html"
        );
        let colored = Console::new(Vec::new(), true);
        let link = colored.file_link(Path::new("/tmp/report.html"));
        assert!(link.starts_with("\x1b]8;;file:///tmp/report.html\x1b\\"));
    }

    #[test]
    fn truncates_to_display_width() {
        assert_eq!(truncate_end("abcdef", 4), "abc…");
        assert_eq!(truncate_end("abc", 4), "abc");
    }
}
