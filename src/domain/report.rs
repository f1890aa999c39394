use crate::domain::{ExecutionStats, format_duration_ms};
use time::OffsetDateTime;
use time::macros::format_description;

pub const REPORT_START_MARKER: &str = "=== REPORT START ===";
pub const REPORT_END_MARKER: &str = "=== REPORT END ===";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CaptureState {
    Idle,
    Capturing,
    Done,
}

/// Pulls the delimited report payload out of streamed narrative text.
#[derive(Clone, Debug)]
pub struct ReportCapture {
    state: CaptureState,
    content: String,
}

impl Default for ReportCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportCapture {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            content: String::new(),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_capturing(&self) -> bool {
        self.state == CaptureState::Capturing
    }

    pub fn is_done(&self) -> bool {
        self.state == CaptureState::Done
    }

    /// Feeds one text block and returns the narrative pieces that should be printed.
    ///
    /// A block carrying both markers replaces any partial buffer with the text
    /// between them. Otherwise markers are scanned left to right, so a block may
    /// open the report or close one opened by an earlier block. A closing marker
    /// seen before any opening marker is ordinary text.
    pub fn feed(&mut self, text: &str) -> Vec<String> {
        let mut narrative = Vec::new();
        let mut rest = text;

        loop {
            let span = match self.state {
                CaptureState::Done => None,
                CaptureState::Idle | CaptureState::Capturing => complete_span(rest),
            };
            if let Some((start, end)) = span {
                push_piece(&mut narrative, &rest[..start]);
                self.content.clear();
                self.content
                    .push_str(&rest[start + REPORT_START_MARKER.len()..end]);
                self.state = CaptureState::Done;
                rest = &rest[end + REPORT_END_MARKER.len()..];
                continue;
            }

            match self.state {
                CaptureState::Idle => match rest.find(REPORT_START_MARKER) {
                    Some(idx) => {
                        push_piece(&mut narrative, &rest[..idx]);
                        self.state = CaptureState::Capturing;
                        rest = &rest[idx + REPORT_START_MARKER.len()..];
                    }
                    None => {
                        push_piece(&mut narrative, rest);
                        break;
                    }
                },
                CaptureState::Capturing => match rest.find(REPORT_END_MARKER) {
                    Some(idx) => {
                        self.content.push_str(&rest[..idx]);
                        self.state = CaptureState::Done;
                        rest = &rest[idx + REPORT_END_MARKER.len()..];
                    }
                    None => {
                        self.content.push_str(rest);
                        break;
                    }
                },
                CaptureState::Done => {
                    push_piece(&mut narrative, rest);
                    break;
                }
            }
        }

        narrative
    }

    /// Hands the captured payload over once both markers were seen.
    pub fn into_report(self) -> Option<String> {
        match self.state {
            CaptureState::Done => Some(self.content),
            CaptureState::Idle | CaptureState::Capturing => None,
        }
    }

    pub fn captured_chars(&self) -> usize {
        self.content.chars().count()
    }
}

/// Byte offsets of the first start marker and the first end marker, when the
/// start marker comes first.
fn complete_span(text: &str) -> Option<(usize, usize)> {
    let start = text.find(REPORT_START_MARKER)?;
    let end = text.find(REPORT_END_MARKER)?;
    (start + REPORT_START_MARKER.len() <= end).then_some((start, end))
}

fn push_piece(out: &mut Vec<String>, piece: &str) {
    if !piece.trim().is_empty() {
        out.push(piece.to_string());
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LinkRule {
    pub text: &'static str,
    pub href: &'static str,
}

pub const DEFAULT_LINK_RULES: &[LinkRule] = &[LinkRule {
    text: "claude.ai/code",
    href: "https://claude.ai/code",
}];

/// Trims the captured payload, applies link rules and injects the stats footer.
pub fn finalize_report(
    raw: &str,
    stats: Option<&ExecutionStats>,
    rules: &[LinkRule],
    generated_at: OffsetDateTime,
) -> String {
    let mut html = raw.trim().to_string();
    for rule in rules {
        html = link_bare_references(&html, rule);
    }

    let footer = match stats {
        Some(stats) => stats_footer(stats, generated_at),
        None => fallback_footer(generated_at),
    };
    inject_before_container_close(&html, &footer)
}

fn link_bare_references(html: &str, rule: &LinkRule) -> String {
    let mut out = String::with_capacity(html.len());
    let mut last = 0usize;
    for (idx, matched) in html.match_indices(rule.text) {
        let preceding = html[..idx].chars().next_back();
        if matches!(preceding, Some('/' | '"' | '\'' | '.' | '=')) || inside_anchor(&html[..idx])
        {
            continue;
        }
        out.push_str(&html[last..idx]);
        out.push_str(&format!(r#"<a href="{}">{matched}</a>"#, rule.href));
        last = idx + matched.len();
    }
    out.push_str(&html[last..]);
    out
}

fn inside_anchor(before: &str) -> bool {
    let open = before.rfind("<a ").or_else(|| before.rfind("<a>"));
    let close = before.rfind("</a>");
    match (open, close) {
        (Some(open), Some(close)) => open > close,
        (Some(_), None) => true,
        _ => false,
    }
}

fn inject_before_container_close(html: &str, fragment: &str) -> String {
    match html.rfind("</body>") {
        Some(idx) => format!("{}{fragment}\n{}", &html[..idx], &html[idx..]),
        None => format!("{html}\n{fragment}"),
    }
}

fn stats_footer(stats: &ExecutionStats, generated_at: OffsetDateTime) -> String {
    let mut parts = Vec::new();
    if let Some(ms) = stats.duration_ms {
        parts.push(format!(
            "<span>Duration: {ms}ms ({})</span>",
            format_duration_ms(ms)
        ));
    }
    if let Some(ms) = stats.duration_api_ms {
        parts.push(format!("<span>API time: {ms}ms</span>"));
    }
    if let Some(turns) = stats.num_turns {
        let suffix = if turns == 1 { "" } else { "s" };
        parts.push(format!("<span>{turns} turn{suffix}</span>"));
    }
    if let Some(cost) = stats.total_cost_usd {
        parts.push(format!("<span>Cost: ${cost:.4}</span>"));
    }
    if let Some(session_id) = stats.session_id.as_deref() {
        parts.push(format!("<span>Session: {}</span>", escape_html(session_id)));
    }
    parts.push(format!("<span>Generated {}</span>", format_generated_at(generated_at)));

    format!(
        r#"<div class="ccrecap-stats" style="margin-top:24px;padding-top:12px;border-top:1px solid #e5e7eb;color:#6b7280;font-size:12px;display:flex;flex-wrap:wrap;gap:12px">{}</div>"#,
        parts.join("")
    )
}

fn fallback_footer(generated_at: OffsetDateTime) -> String {
    format!(
        r#"<div class="ccrecap-stats" style="margin-top:24px;padding-top:12px;border-top:1px solid #e5e7eb;color:#6b7280;font-size:12px">Generated by ccrecap {}</div>"#,
        format_generated_at(generated_at)
    )
}

fn format_generated_at(value: OffsetDateTime) -> String {
    value
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .unwrap_or_default()
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn capture_all(blocks: &[&str]) -> (ReportCapture, Vec<String>) {
        let mut capture = ReportCapture::new();
        let mut narrative = Vec::new();
        for block in blocks {
            narrative.extend(capture.feed(block));
        }
        (capture, narrative)
    }

    #[test]
    fn extracts_report_from_single_block() {
        let (capture, narrative) = capture_all(&[
            "pre === REPORT START === <h1>X</h1> === REPORT END === post",
        ]);
        assert_eq!(narrative, vec!["pre ".to_string(), " post".to_string()]);
        let report = capture.into_report().expect("report");
        assert_eq!(report.trim(), "<h1>X</h1>");
    }

    #[test]
    fn extracts_report_split_across_blocks() {
        let (capture, narrative) = capture_all(&[
            "=== REPORT START ===<A>",
            "<B>",
            "<C>=== REPORT END ===tail",
        ]);
        assert_eq!(narrative, vec!["tail".to_string()]);
        assert_eq!(capture.into_report().as_deref(), Some("<A><B><C>"));
    }

    #[test]
    fn end_marker_without_start_is_ordinary_text() {
        let (capture, narrative) = capture_all(&["oops === REPORT END === more"]);
        assert_eq!(capture.state(), CaptureState::Idle);
        assert_eq!(
            narrative,
            vec!["oops === REPORT END === more".to_string()]
        );
        assert!(capture.into_report().is_none());
    }

    #[test]
    fn unfinished_capture_yields_no_report() {
        let (capture, narrative) = capture_all(&["intro", "=== REPORT START === <p>half"]);
        assert!(capture.is_capturing());
        assert_eq!(narrative, vec!["intro".to_string()]);
        assert!(capture.into_report().is_none());
    }

    #[test]
    fn complete_block_replaces_partial_capture() {
        let (capture, narrative) = capture_all(&[
            "=== REPORT START === draft that was abandoned",
            "retrying === REPORT START ===<html>final</html>=== REPORT END === bye",
        ]);
        assert_eq!(narrative, vec!["retrying ".to_string(), " bye".to_string()]);
        assert_eq!(capture.into_report().as_deref(), Some("<html>final</html>"));
    }

    #[test]
    fn end_marker_before_complete_pair_closes_partial_capture() {
        let (capture, narrative) = capture_all(&[
            "=== REPORT START ===<A>",
            "<B>=== REPORT END === then === REPORT START ===x=== REPORT END ===",
        ]);
        assert_eq!(
            narrative,
            vec![" then === REPORT START ===x=== REPORT END ===".to_string()]
        );
        assert_eq!(capture.into_report().as_deref(), Some("<A><B>"));
    }

    #[test]
    fn text_after_done_is_narrative() {
        let (capture, narrative) = capture_all(&[
            "=== REPORT START ===a=== REPORT END ===",
            "all done",
        ]);
        assert!(capture.is_done());
        assert_eq!(narrative, vec!["all done".to_string()]);
    }

    #[test]
    fn finalize_injects_stats_before_body_close() {
        let stats = ExecutionStats {
            duration_ms: Some(1200),
            duration_api_ms: None,
            num_turns: Some(1),
            total_cost_usd: Some(0.01),
            session_id: None,
            subtype: Some("success".to_string()),
            is_error: false,
        };
        let html = finalize_report(
            "\n  <html><body><p>hi</p></body></html>  \n",
            Some(&stats),
            &[],
            datetime!(2026-10-19 09:30 UTC),
        );
        assert!(html.starts_with("<html><body><p>hi</p><div class=\"ccrecap-stats\""));
        assert!(html.ends_with("</body></html>"));
        assert!(html.contains("1200ms"));
        assert!(html.contains("1 turn<"));
        assert!(html.contains("$0.0100"));
        assert!(html.contains("2026-10-19 09:30"));
    }

    #[test]
    fn finalize_appends_fallback_footer_without_body() {
        let html = finalize_report("<p>x</p>", None, &[], datetime!(2026-10-19 09:30 UTC));
        assert!(html.starts_with("<p>x</p>\n<div class=\"ccrecap-stats\""));
        assert!(html.contains("Generated by ccrecap"));
    }

    #[test]
    fn links_bare_references_only() {
        let rule = LinkRule {
            text: "example.dev",
            href: "https://example.dev",
        };
        let html = r#"<p>see example.dev</p><a href="https://example.dev">example.dev</a>"#;
        let linked = link_bare_references(html, &rule);
        assert_eq!(
            linked,
            r#"<p>see <a href="https://example.dev">example.dev</a></p><a href="https://example.dev">example.dev</a>"#
        );
    }
}
