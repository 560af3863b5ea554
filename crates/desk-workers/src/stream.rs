//! Newline-delimited JSON protocol parsing for the assistant's stream output.
//!
//! Output arrives in arbitrary chunks. [`LineBuffer`] keeps one residual
//! segment per stream so a line split across chunks is parsed exactly once;
//! [`StreamParser`] turns each complete line into zero or more
//! [`ProtocolEvent`]s. Malformed lines are logged and skipped without
//! affecting later lines.
//!
//! Wire shape (one object per line):
//!
//! ```json
//! {"type":"system","subtype":"init","model":"...","session_id":"..."}
//! {"type":"assistant","message":{"content":[{"type":"text","text":"Hi"}]}}
//! {"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1"}]}}
//! {"type":"result","subtype":"success","result":"Hi","is_error":false}
//! {"type":"control_request","request_id":"r1","request":{"subtype":"can_use_tool","tool_name":"Bash","input":{}}}
//! ```

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Accumulates raw bytes and yields complete newline-terminated lines.
///
/// Works on bytes so a multi-byte character split across chunks is decoded
/// only once the line is complete.
#[derive(Debug, Default)]
pub struct LineBuffer {
    residual: Vec<u8>,
    /// Prefix of `residual` already known to hold no newline
    scanned: usize,
}

impl LineBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completes, without the
    /// trailing `\n` (and `\r`).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.residual.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.residual[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let mut line = &self.residual[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
            self.scanned = start;
        }
        self.residual.drain(..start);
        self.scanned = self.residual.len();
        lines
    }

    /// Take whatever remains after the last newline.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.residual.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.residual);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Typed event decoded from one protocol line.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// `system/init`
    Init {
        /// Model in use, when reported
        model: Option<String>,
        /// Resumable session token, when reported
        session_id: Option<String>,
    },
    /// Assistant text
    TextDelta {
        /// Text content
        text: String,
    },
    /// Assistant tool invocation
    ToolUse {
        /// Tool call id
        id: Option<String>,
        /// Tool name
        name: String,
        /// Tool arguments
        input: Value,
    },
    /// Tool result echoed back in a `user` message
    ToolResult {
        /// Id of the matching tool call
        tool_use_id: Option<String>,
        /// Whether the tool failed
        is_error: bool,
    },
    /// Final result of the request
    Result {
        /// Result text
        text: Option<String>,
        /// Whether the request failed
        is_error: bool,
        /// Error text, chosen as `error_message` > `error` > joined `errors`
        error_message: Option<String>,
        /// Resumable session token, when reported
        session_id: Option<String>,
    },
    /// Tool permission prompt over the stdio control channel
    PermissionRequest {
        /// Correlation id for the response
        request_id: String,
        /// Tool asking for permission
        tool_name: String,
        /// Tool arguments
        input: Value,
    },
}

#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<Value>>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    request: Option<RawControlRequest>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    content: Value,
}

#[derive(Debug, Deserialize)]
struct RawControlRequest {
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    input: Value,
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(value.to_string())),
        other => Some(other.to_string()),
    }
}

fn pick_error_message(raw: &RawLine) -> Option<String> {
    if let Some(ref m) = raw.error_message {
        if !m.is_empty() {
            return Some(m.clone());
        }
    }
    if let Some(m) = raw.error.as_ref().and_then(value_text) {
        if !m.is_empty() {
            return Some(m);
        }
    }
    if let Some(ref errors) = raw.errors {
        let joined = errors
            .iter()
            .filter_map(value_text)
            .collect::<Vec<_>>()
            .join("; ");
        if !joined.is_empty() {
            return Some(joined);
        }
    }
    None
}

fn content_events(content: &Value, out: &mut Vec<ProtocolEvent>) {
    match content {
        Value::String(text) if !text.is_empty() => {
            out.push(ProtocolEvent::TextDelta { text: text.clone() });
        }
        Value::Array(blocks) => {
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            out.push(ProtocolEvent::TextDelta {
                                text: text.to_string(),
                            });
                        }
                    }
                    Some("tool_use") => {
                        let name = block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        out.push(ProtocolEvent::ToolUse {
                            id: block.get("id").and_then(Value::as_str).map(str::to_string),
                            name,
                            input: block.get("input").cloned().unwrap_or(Value::Null),
                        });
                    }
                    Some("tool_result") => {
                        out.push(ProtocolEvent::ToolResult {
                            tool_use_id: block
                                .get("tool_use_id")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            is_error: block
                                .get("is_error")
                                .and_then(Value::as_bool)
                                .unwrap_or(false),
                        });
                    }
                    other => debug!(block_type = ?other, "ignoring content block"),
                }
            }
        }
        _ => {}
    }
}

/// Decode one complete line.
///
/// Returns an empty list for blank lines, lines that do not start with `{`,
/// malformed JSON (logged at `warn`), and unrecognized message types.
pub fn parse_line(line: &str) -> Vec<ProtocolEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() || !trimmed.starts_with('{') {
        return Vec::new();
    }

    let raw: RawLine = match serde_json::from_str(trimmed) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(
                error = %e,
                line = %agent_desk_core::text::truncate_chars(trimmed, 200, "..."),
                "skipping malformed protocol line"
            );
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    match raw.kind.as_str() {
        "system" => {
            if raw.subtype.as_deref() == Some("init") {
                events.push(ProtocolEvent::Init {
                    model: raw.model.clone(),
                    session_id: raw.session_id.clone(),
                });
            } else {
                debug!(subtype = ?raw.subtype, "ignoring system message");
            }
        }
        "assistant" | "user" => {
            if let Some(ref message) = raw.message {
                content_events(&message.content, &mut events);
            }
        }
        "result" => {
            let error_message = pick_error_message(&raw);
            events.push(ProtocolEvent::Result {
                text: raw.result.as_ref().and_then(value_text),
                is_error: raw.is_error,
                error_message,
                session_id: raw.session_id.clone(),
            });
        }
        "control_request" => match (raw.request_id, raw.request) {
            (Some(request_id), Some(request))
                if request.subtype.as_deref() == Some("can_use_tool") =>
            {
                events.push(ProtocolEvent::PermissionRequest {
                    request_id,
                    tool_name: request.tool_name.unwrap_or_default(),
                    input: request.input,
                });
            }
            _ => debug!("ignoring unsupported control request"),
        },
        other => debug!(kind = other, "ignoring protocol message"),
    }
    events
}

/// Incremental parser: one residual buffer per stream.
#[derive(Debug, Default)]
pub struct StreamParser {
    lines: LineBuffer,
}

impl StreamParser {
    /// New parser with an empty residual buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the events of every completed line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ProtocolEvent> {
        self.lines
            .push(chunk)
            .iter()
            .flat_map(|line| parse_line(line))
            .collect()
    }

    /// End of stream: parse the residual segment once more.
    pub fn finish(&mut self) -> Vec<ProtocolEvent> {
        self.lines
            .finish()
            .map(|rest| parse_line(&rest))
            .unwrap_or_default()
    }
}
