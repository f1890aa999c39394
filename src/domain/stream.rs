use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

pub const RESULT_SUBTYPE_SUCCESS: &str = "success";
pub const RESULT_SUBTYPE_MAX_TURNS: &str = "error_max_turns";
pub const RESULT_SUBTYPE_EXECUTION_ERROR: &str = "error_during_execution";

/// One decoded line of the agent's `stream-json` output.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    System {
        subtype: Option<String>,
        session_id: Option<String>,
    },
    User {
        content: Vec<ContentBlock>,
    },
    Assistant {
        content: Vec<ContentBlock>,
    },
    Result(ResultEvent),
    MessageStart,
    ContentBlockStart {
        block: Option<ContentBlock>,
    },
    ContentBlockDelta {
        delta: ContentDelta,
    },
    MessageStop,
    Unknown {
        kind: String,
        subtype: Option<String>,
    },
}

impl StreamEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Result(_) => "result",
            Self::MessageStart => "message_start",
            Self::ContentBlockStart { .. } => "content_block_start",
            Self::ContentBlockDelta { .. } => "content_block_delta",
            Self::MessageStop => "message_stop",
            Self::Unknown { kind, .. } => kind.as_str(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultEvent {
    pub subtype: Option<String>,
    pub duration_ms: Option<u64>,
    pub duration_api_ms: Option<u64>,
    pub num_turns: Option<u64>,
    pub total_cost_usd: Option<f64>,
    pub session_id: Option<String>,
    pub is_error: bool,
    pub result: Option<String>,
    pub has_message: bool,
}

impl ResultEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.subtype.as_deref(),
            Some(RESULT_SUBTYPE_SUCCESS | RESULT_SUBTYPE_MAX_TURNS | RESULT_SUBTYPE_EXECUTION_ERROR)
        )
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Option<Value>,
    },
    ToolResult {
        #[serde(default)]
        is_error: Option<bool>,
        #[serde(default)]
        content: Option<Value>,
    },
    #[serde(other)]
    Other,
}

impl ContentBlock {
    /// Sub-agent name when this block is a `Task` delegation.
    pub fn delegated_agent(&self) -> Option<&str> {
        let Self::ToolUse { name, input } = self else {
            return None;
        };
        if name != "Task" {
            return None;
        }
        input
            .as_ref()
            .and_then(|input| input.get("subagent_type"))
            .and_then(|value| value.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ContentDelta {
    Text(String),
    Other(String),
}

#[derive(Debug, Deserialize)]
struct RawStreamEvent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    duration_api_ms: Option<u64>,
    #[serde(default)]
    num_turns: Option<u64>,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    #[serde(default)]
    is_error: Option<bool>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    content_block: Option<Value>,
    #[serde(default)]
    delta: Option<Value>,
    #[serde(default)]
    event: Option<Box<RawStreamEvent>>,
}

pub fn parse_stream_line(line: &str) -> Result<StreamEvent, serde_json::Error> {
    let raw: RawStreamEvent = serde_json::from_str(line)?;
    Ok(into_stream_event(raw))
}

fn into_stream_event(raw: RawStreamEvent) -> StreamEvent {
    match raw.kind.as_str() {
        "system" => StreamEvent::System {
            subtype: raw.subtype,
            session_id: raw.session_id,
        },
        "user" => StreamEvent::User {
            content: message_content(raw.message.as_ref()),
        },
        "assistant" => StreamEvent::Assistant {
            content: message_content(raw.message.as_ref()),
        },
        "result" => StreamEvent::Result(ResultEvent {
            subtype: raw.subtype,
            duration_ms: raw.duration_ms,
            duration_api_ms: raw.duration_api_ms,
            num_turns: raw.num_turns,
            total_cost_usd: raw.total_cost_usd,
            session_id: raw.session_id,
            is_error: raw.is_error.unwrap_or(false),
            result: raw.result,
            has_message: raw.message.is_some(),
        }),
        "message_start" => StreamEvent::MessageStart,
        "content_block_start" => StreamEvent::ContentBlockStart {
            block: raw
                .content_block
                .and_then(|value| serde_json::from_value::<ContentBlock>(value).ok()),
        },
        "content_block_delta" => StreamEvent::ContentBlockDelta {
            delta: parse_delta(raw.delta.as_ref()),
        },
        "message_stop" => StreamEvent::MessageStop,
        "stream_event" => match raw.event {
            Some(inner) => into_stream_event(*inner),
            None => StreamEvent::Unknown {
                kind: raw.kind,
                subtype: raw.subtype,
            },
        },
        _ => StreamEvent::Unknown {
            kind: raw.kind,
            subtype: raw.subtype,
        },
    }
}

fn message_content(message: Option<&Value>) -> Vec<ContentBlock> {
    let Some(content) = message.and_then(|message| message.get("content")) else {
        return Vec::new();
    };
    match content {
        Value::String(text) => vec![ContentBlock::Text { text: text.clone() }],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match serde_json::from_value::<ContentBlock>(item.clone()) {
                Ok(block) => Some(block),
                Err(error) => {
                    debug!(%error, "skipping undecodable content block");
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_delta(delta: Option<&Value>) -> ContentDelta {
    let Some(delta) = delta else {
        return ContentDelta::Other(String::new());
    };
    let kind = delta
        .get("type")
        .and_then(|value| value.as_str())
        .unwrap_or("");
    match (kind, delta.get("text").and_then(|value| value.as_str())) {
        ("text_delta", Some(text)) => ContentDelta::Text(text.to_string()),
        _ => ContentDelta::Other(kind.to_string()),
    }
}

/// Flattens tool result content (plain string or an array of text blocks).
pub fn tool_result_text(content: &Value) -> Option<String> {
    match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => {
            let parts = items
                .iter()
                .filter_map(|item| item.get("text").and_then(|text| text.as_str()))
                .collect::<Vec<_>>();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        _ => None,
    }
}

/// Splits an arbitrarily chunked byte stream into `StreamEvent`s.
///
/// Incomplete trailing fragments are held until the next chunk; lines that fail
/// to decode are dropped with a debug log.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Vec<u8>,
    discarded: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line = self.pending.drain(..=pos).collect::<Vec<u8>>();
            if let Some(event) = self.decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Decodes whatever is left once the stream has closed.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        self.decode_line(&line)
    }

    pub fn discarded(&self) -> usize {
        self.discarded
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<StreamEvent> {
        let text = String::from_utf8_lossy(line);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        match parse_stream_line(trimmed) {
            Ok(event) => Some(event),
            Err(error) => {
                self.discarded = self.discarded.saturating_add(1);
                debug!(%error, line = %preview(trimmed, 120), "discarding non-json output line");
                None
            }
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out = text.chars().take(max_chars).collect::<String>();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out
}
