use crate::domain::ResultEvent;
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionStats {
    pub duration_ms: Option<u64>,
    pub duration_api_ms: Option<u64>,
    pub num_turns: Option<u64>,
    pub total_cost_usd: Option<f64>,
    pub session_id: Option<String>,
    pub subtype: Option<String>,
    pub is_error: bool,
}

impl ExecutionStats {
    /// Snapshot of a terminal `result` event; `None` for non-qualifying subtypes.
    pub fn from_result(result: &ResultEvent) -> Option<Self> {
        if !result.is_terminal() {
            return None;
        }
        Some(Self {
            duration_ms: result.duration_ms,
            duration_api_ms: result.duration_api_ms,
            num_turns: result.num_turns,
            total_cost_usd: result.total_cost_usd,
            session_id: result.session_id.clone(),
            subtype: result.subtype.clone(),
            is_error: result.is_error,
        })
    }

    pub fn summary_line(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ms) = self.duration_ms {
            parts.push(format_duration_ms(ms));
        }
        if let Some(turns) = self.num_turns {
            let suffix = if turns == 1 { "" } else { "s" };
            parts.push(format!("{turns} turn{suffix}"));
        }
        if let Some(cost) = self.total_cost_usd {
            parts.push(format!("${cost:.4}"));
        }
        if parts.is_empty() {
            return "no statistics reported".to_string();
        }
        parts.join(" · ")
    }
}

pub fn format_duration_ms(ms: u64) -> String {
    format_duration(Duration::from_millis(ms))
}

pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis() as u64;
    if total_ms < 1000 {
        return format!("{total_ms}ms");
    }
    if total_ms < 10_000 {
        let seconds = total_ms / 1000;
        let tenths = (total_ms % 1000) / 100;
        return format!("{seconds}.{tenths}s");
    }
    if total_ms < 60_000 {
        let seconds = total_ms / 1000;
        return format!("{seconds}s");
    }
    if total_ms < 3_600_000 {
        let total_s = total_ms / 1000;
        let minutes = total_s / 60;
        let seconds = total_s % 60;
        return format!("{minutes}m {seconds:02}s");
    }

    let total_m = total_ms / 60_000;
    let hours = total_m / 60;
    let minutes = total_m % 60;
    format!("{hours}h {minutes:02}m")
}
