//! Network API variant: streams a Messages API response over server-sent
//! events.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use agent_desk_core::config::WorkerVariant;

use super::{Turn, TurnOutcome, WorkerBackend, WorkerContext};
use crate::error::WorkerError;
use crate::message::{Message, MessageContent, Role, UserInput};
use crate::stream::LineBuffer;

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

const MISSING_CREDENTIAL: &str = "No API key is configured. Set the API key in settings \
(or the credential environment variable), then send your message again.";

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    stream: bool,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: Role,
    content: &'a MessageContent,
}

#[derive(Deserialize)]
struct SseEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<SseDelta>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize)]
struct SseDelta {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

impl ApiErrorBody {
    fn describe(&self) -> String {
        match (&self.kind, &self.message) {
            (Some(kind), Some(message)) => format!("{kind}: {message}"),
            (None, Some(message)) => message.clone(),
            (Some(kind), None) => kind.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

/// What one SSE `data:` payload means for the request.
#[derive(Debug, PartialEq)]
enum SseAction {
    Text(String),
    Error(String),
    Stop,
    Ignore,
}

fn interpret(line: &str) -> SseAction {
    let Some(data) = line.strip_prefix("data:") else {
        return SseAction::Ignore;
    };
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return SseAction::Ignore;
    }
    let event: SseEvent = match serde_json::from_str(data) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "skipping malformed server event");
            return SseAction::Ignore;
        }
    };
    match event.kind.as_str() {
        "content_block_delta" => match event.delta {
            Some(SseDelta {
                kind: Some(ref kind),
                text: Some(text),
            }) if kind == "text_delta" => SseAction::Text(text),
            _ => SseAction::Ignore,
        },
        "error" => SseAction::Error(
            event
                .error
                .map(|e| e.describe())
                .unwrap_or_else(|| "unknown error".to_string()),
        ),
        "message_stop" => SseAction::Stop,
        _ => SseAction::Ignore,
    }
}

/// History as API messages: empty messages are skipped.
fn api_messages(history: &[Message]) -> Vec<ApiMessage<'_>> {
    history
        .iter()
        .filter(|m| !m.content.is_empty())
        .map(|m| ApiMessage {
            role: m.role,
            content: &m.content,
        })
        .collect()
}

fn api_error_message(status: reqwest::StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|env| env.error.describe())
        .unwrap_or_else(|_| body.trim().to_string());
    if detail.is_empty() {
        format!("API error ({status})")
    } else {
        format!("API error ({status}): {detail}")
    }
}

/// Backend for [`RemoteApiWorker`](super::RemoteApiWorker).
#[derive(Debug, Clone)]
pub struct RemoteApiBackend {
    client: reqwest::Client,
}

impl Default for RemoteApiBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteApiBackend {
    /// Backend with a fresh HTTP client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Backend sharing an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkerBackend for RemoteApiBackend {
    fn variant(&self) -> WorkerVariant {
        WorkerVariant::Api
    }

    async fn initialize(&self, ctx: &WorkerContext) -> anyhow::Result<()> {
        if ctx.credential.as_deref().is_none_or(str::is_empty) {
            anyhow::bail!("no API key configured for session {}", ctx.session_id);
        }
        Ok(())
    }

    async fn run_turn(&self, turn: &Turn<'_>, _input: &UserInput) -> Result<TurnOutcome, WorkerError> {
        let ctx = turn.context();
        let Some(api_key) = ctx.credential.as_deref().filter(|k| !k.is_empty()) else {
            return Err(WorkerError::Configuration(MISSING_CREDENTIAL.to_string()));
        };

        let history = turn.prior_history();
        let body = ApiRequest {
            model: ctx.model.as_deref().unwrap_or(DEFAULT_MODEL),
            max_tokens: ctx.max_tokens,
            stream: true,
            messages: api_messages(&history),
        };
        let url = format!("{}/v1/messages", ctx.base_url.trim_end_matches('/'));
        debug!(session = %ctx.session_id, %url, messages = body.messages.len(), "sending API request");

        let send = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", &ctx.api_version)
            .header("content-type", "application/json")
            .json(&body)
            .send();
        let response = tokio::select! {
            _ = turn.token().cancelled() => return Ok(TurnOutcome::Cancelled),
            response = send => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Ok(TurnOutcome::Failed(api_error_message(status, &text)));
        }

        let mut bytes = response.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut ended = false;
        while !ended {
            let chunk = tokio::select! {
                _ = turn.token().cancelled() => return Ok(TurnOutcome::Cancelled),
                chunk = bytes.next() => chunk,
            };
            let pending: Vec<String> = match chunk {
                Some(Ok(chunk)) => lines.push(&chunk),
                Some(Err(e)) => {
                    if turn.streamed_text().trim().is_empty() {
                        return Err(WorkerError::Http(e));
                    }
                    return Ok(TurnOutcome::Partial {
                        error: format!("The connection ended early ({e}); the answer may be incomplete."),
                    });
                }
                None => {
                    ended = true;
                    lines.finish().into_iter().collect()
                }
            };
            for line in pending {
                match interpret(&line) {
                    SseAction::Text(text) => turn.stream(&text),
                    SseAction::Error(message) => return Ok(TurnOutcome::Failed(message)),
                    SseAction::Stop => return Ok(TurnOutcome::Answer(turn.streamed_text())),
                    SseAction::Ignore => {}
                }
            }
        }

        let text = turn.streamed_text();
        if text.trim().is_empty() {
            return Err(WorkerError::Transport(
                "the response ended without any content".to_string(),
            ));
        }
        Ok(TurnOutcome::Partial {
            error: "The response ended before completion; the answer may be incomplete.".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interprets_text_deltas_and_errors() {
        assert_eq!(
            interpret(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#),
            SseAction::Text("Hi".into())
        );
        assert_eq!(
            interpret(r#"data: {"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{"}}"#),
            SseAction::Ignore
        );
        assert_eq!(
            interpret(r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#),
            SseAction::Error("overloaded_error: Overloaded".into())
        );
        assert_eq!(interpret(r#"data: {"type":"message_stop"}"#), SseAction::Stop);
        assert_eq!(interpret("event: ping"), SseAction::Ignore);
        assert_eq!(interpret("data: {broken"), SseAction::Ignore);
    }

    #[test]
    fn history_skips_empty_messages() {
        let history = vec![Message::user("hi"), Message::assistant(""), Message::user("again")];
        let messages = api_messages(&history);
        assert_eq!(messages.len(), 2);
        let json = serde_json::to_value(&messages[1]).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "again"}));
    }

    #[test]
    fn error_body_is_summarized() {
        let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        assert_eq!(
            api_error_message(reqwest::StatusCode::UNAUTHORIZED, body),
            "API error (401 Unauthorized): authentication_error: invalid x-api-key"
        );
        assert_eq!(
            api_error_message(reqwest::StatusCode::BAD_GATEWAY, ""),
            "API error (502 Bad Gateway)"
        );
    }
}
