//! Streaming-SDK variant: a bidirectional stream-json connection to the
//! assistant tool, resumable across requests and able to ask the user before
//! a tool runs.
//!
//! Per request the tool is launched with
//! `-p --input-format stream-json --output-format stream-json --verbose
//! --permission-prompt-tool stdio [--model M] [--resume TOKEN]`. The user
//! turn is written to stdin as one JSON line; permission prompts arrive as
//! `control_request` lines and are answered with `control_response` lines.
//! Stdin is closed once the `result` line arrives.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use agent_desk_core::config::WorkerVariant;

use super::classify::{classify_failure, friendly_failure, FailureClass};
use super::process::{ProcessStream, StreamItem};
use super::progress::{describe_tool_result, describe_tool_use, is_progress_line};
use super::spawned::{base_spec, spawn_failure, NO_WORKING_DIR};
use super::{Turn, TurnOutcome, WorkerBackend, WorkerContext, GENERIC_SUCCESS};
use crate::error::WorkerError;
use crate::events::{Progress, ProgressKind, WorkerEvent};
use crate::message::UserInput;
use crate::stream::ProtocolEvent;

/// Arguments for a streaming connection, resuming `resume` when set.
pub fn sdk_args(model: Option<&str>, resume: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = [
        "-p",
        "--input-format",
        "stream-json",
        "--output-format",
        "stream-json",
        "--verbose",
        "--permission-prompt-tool",
        "stdio",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    if let Some(model) = model {
        args.push("--model".to_string());
        args.push(model.to_string());
    }
    if let Some(token) = resume {
        args.push("--resume".to_string());
        args.push(token.to_string());
    }
    args
}

/// The user turn as a stream-json input line.
///
/// Plain text is sent as a string; with images attached the content is an
/// ordered block list, images first.
pub fn user_turn_line(input: &UserInput) -> String {
    let content = if input.images.is_empty() {
        Value::String(input.text.clone())
    } else {
        let mut blocks: Vec<Value> = input
            .images
            .iter()
            .map(|img| {
                json!({
                    "type": "image",
                    "source": {"type": "base64", "media_type": img.media_type, "data": img.data},
                })
            })
            .collect();
        if !input.text.is_empty() {
            blocks.push(json!({"type": "text", "text": input.text}));
        }
        Value::Array(blocks)
    };
    json!({
        "type": "user",
        "message": {"role": "user", "content": content},
    })
    .to_string()
}

/// Answer to a tool permission prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionDecision {
    /// Run the tool with its original input
    Allow,
    /// Refuse, telling the assistant why
    Deny(String),
}

/// Wire form of a permission answer.
pub fn control_response_line(request_id: &str, decision: &PermissionDecision, input: &Value) -> String {
    let response = match decision {
        PermissionDecision::Allow => json!({"behavior": "allow", "updatedInput": input}),
        PermissionDecision::Deny(message) => json!({"behavior": "deny", "message": message}),
    };
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": response,
        },
    })
    .to_string()
}

fn target_path(input: &Value, cwd: Option<&Path>) -> Option<PathBuf> {
    let raw = ["file_path", "notebook_path", "path"]
        .iter()
        .find_map(|key| input.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())?;
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        return Some(path);
    }
    Some(match cwd {
        Some(dir) => dir.join(path),
        None => path,
    })
}

/// Policy checks that need no user interaction.
pub(crate) fn policy_decision(ctx: &WorkerContext, tool: &str, input: &Value) -> Option<PermissionDecision> {
    if let Some(command) = input.get("command").and_then(Value::as_str) {
        if ctx.permissions.is_command_blacklisted(command) {
            return Some(PermissionDecision::Deny(format!(
                "The command `{command}` is blocked in this workspace."
            )));
        }
    }
    if let Some(path) = target_path(input, ctx.working_dir().as_deref()) {
        if !ctx.permissions.is_path_authorized(&path) {
            return Some(PermissionDecision::Deny(format!(
                "{tool} may not access {}: outside the authorized folders.",
                path.display()
            )));
        }
    }
    None
}

fn confirmation_message(tool: &str, input: &Value) -> String {
    let progress = describe_tool_use(tool, input);
    format!("Allow the assistant to run {tool}? {}", progress.message)
}

/// Backend for [`StreamingSdkWorker`](super::StreamingSdkWorker).
#[derive(Debug, Default)]
pub struct StreamingSdkBackend {
    session_token: Mutex<Option<String>>,
}

/// Per-request accumulation.
#[derive(Default)]
struct TurnState {
    result: Option<Result<(), String>>,
    suppressed: Vec<String>,
}

impl StreamingSdkBackend {
    /// Backend with no session to resume.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token the next request resumes, if any.
    pub fn session_token(&self) -> Option<String> {
        self.token_slot().clone()
    }

    fn token_slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.session_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remember_token(&self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            *self.token_slot() = Some(token);
        }
    }

    async fn decide(&self, turn: &Turn<'_>, tool: &str, input: &Value) -> PermissionDecision {
        let ctx = turn.context();
        if let Some(decision) = policy_decision(ctx, tool, input) {
            info!(session = %ctx.session_id, tool, ?decision, "permission denied by policy");
            return decision;
        }
        if !ctx.confirm_tools.iter().any(|t| t == tool) {
            return PermissionDecision::Allow;
        }

        let id = uuid::Uuid::new_v4().to_string();
        let rx = turn.broker().create(id.clone(), tool);
        turn.emit(WorkerEvent::ConfirmRequest {
            id: id.clone(),
            tool: tool.to_string(),
            input: input.clone(),
            message: confirmation_message(tool, input),
        });

        let approved = tokio::select! {
            _ = turn.token().cancelled() => None,
            answer = tokio::time::timeout(ctx.confirm_timeout, rx) => match answer {
                Ok(Ok(approved)) => Some(approved),
                Ok(Err(_)) => None,
                Err(_) => {
                    warn!(session = %ctx.session_id, tool, "confirmation timed out");
                    None
                }
            },
        };
        turn.broker().discard(&id);

        match approved {
            Some(true) => PermissionDecision::Allow,
            Some(false) => PermissionDecision::Deny("The user declined this action.".to_string()),
            None => PermissionDecision::Deny("No approval was given in time.".to_string()),
        }
    }

    async fn handle_event(
        &self,
        turn: &Turn<'_>,
        stream: &mut ProcessStream,
        state: &mut TurnState,
        event: ProtocolEvent,
    ) -> std::io::Result<()> {
        match event {
            ProtocolEvent::Init { model, session_id } => {
                self.remember_token(session_id);
                let message = match model {
                    Some(m) => format!("Connected ({m})"),
                    None => "Connected".to_string(),
                };
                turn.progress(Progress::new(ProgressKind::Init, message));
            }
            ProtocolEvent::TextDelta { text } => {
                if is_progress_line(&text) {
                    let line = text.trim().to_string();
                    turn.progress(Progress::new(ProgressKind::ToolUse, line.clone()));
                    state.suppressed.push(line);
                } else {
                    turn.stream(&text);
                }
            }
            ProtocolEvent::ToolUse { name, input, .. } => {
                turn.progress(describe_tool_use(&name, &input));
            }
            ProtocolEvent::ToolResult { is_error, .. } => {
                turn.progress(describe_tool_result(is_error));
            }
            ProtocolEvent::Result {
                text,
                is_error,
                error_message,
                session_id,
            } => {
                self.remember_token(session_id);
                if is_error {
                    let message = error_message
                        .or(text)
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| "The assistant reported an error.".to_string());
                    state.result = Some(Err(message));
                } else {
                    if let Some(text) = text {
                        if !turn.streamed_text().trim_end().ends_with(text.trim()) {
                            turn.stream(&text);
                        }
                    }
                    state.result = Some(Ok(()));
                }
                turn.progress(Progress::new(ProgressKind::Complete, "Finished"));
                stream.close_stdin().await;
            }
            ProtocolEvent::PermissionRequest {
                request_id,
                tool_name,
                input,
            } => {
                let decision = self.decide(turn, &tool_name, &input).await;
                debug!(request_id, tool = %tool_name, ?decision, "answering permission request");
                stream
                    .write_line(&control_response_line(&request_id, &decision, &input))
                    .await?;
            }
        }
        Ok(())
    }

    async fn drive(
        &self,
        turn: &Turn<'_>,
        stream: &mut ProcessStream,
        state: &mut TurnState,
        input: &UserInput,
    ) -> std::io::Result<bool> {
        stream.write_line(&user_turn_line(input)).await?;
        loop {
            match stream.next(turn.token()).await? {
                StreamItem::Event(event) => self.handle_event(turn, stream, state, event).await?,
                StreamItem::Cancelled => return Ok(false),
                StreamItem::End => return Ok(true),
            }
        }
    }
}

#[async_trait]
impl WorkerBackend for StreamingSdkBackend {
    fn variant(&self) -> WorkerVariant {
        WorkerVariant::Sdk
    }

    async fn initialize(&self, ctx: &WorkerContext) -> anyhow::Result<()> {
        let env = ctx.resolver.resolve(&ctx.cli_bin).await;
        if let Some(ref e) = env.runtime.error {
            warn!(session = %ctx.session_id, error = %e, "runtime check failed");
        }
        match env.executable {
            Ok(ref path) => {
                debug!(session = %ctx.session_id, executable = %path.display(), "connection executable located");
                Ok(())
            }
            Err(e) => anyhow::bail!("assistant CLI unavailable: {e}"),
        }
    }

    async fn run_turn(&self, turn: &Turn<'_>, input: &UserInput) -> Result<TurnOutcome, WorkerError> {
        let ctx = turn.context();
        if ctx.working_dir().is_none() {
            return Err(WorkerError::Configuration(NO_WORKING_DIR.to_string()));
        }

        let env = ctx.resolver.resolve(&ctx.cli_bin).await;
        let resume = self.session_token();
        let mut spec = base_spec(ctx, &env, sdk_args(ctx.model.as_deref(), resume.as_deref()));
        spec.pipe_stdin = true;
        if resume.is_some() {
            debug!(session = %ctx.session_id, "resuming previous conversation");
        }

        let process = ctx
            .launcher
            .launch(spec)
            .await
            .map_err(|e| spawn_failure(&e, ctx, &env))?;
        let mut stream = ProcessStream::new(process);
        let mut state = TurnState::default();

        let driven = self.drive(turn, &mut stream, &mut state, input).await;
        if matches!(driven, Ok(false)) {
            return Ok(TurnOutcome::Cancelled);
        }
        if driven.is_err() {
            stream.kill().await;
        }
        let exit = stream.finish().await;
        let stderr = exit.as_ref().map(|e| e.stderr.clone()).unwrap_or_default();

        match state.result {
            Some(Err(message)) => Ok(TurnOutcome::Failed(message)),
            Some(Ok(())) => Ok(TurnOutcome::Answer(final_answer(
                &ctx.session_id,
                turn.streamed_text(),
                &state.suppressed,
            ))),
            None => {
                let reason = match (&driven, &exit) {
                    (Err(e), _) => e.to_string(),
                    (Ok(_), Ok(exit)) => match exit.code {
                        Some(code) => format!("connection closed (exit code {code})"),
                        None => "connection closed".to_string(),
                    },
                    (Ok(_), Err(e)) => e.to_string(),
                };
                if !turn.streamed_text().trim().is_empty() {
                    return Ok(TurnOutcome::Partial {
                        error: format!("The connection ended early ({reason}); the answer may be incomplete."),
                    });
                }
                if let FailureClass::RuntimeTooOld { .. } = classify_failure(&stderr) {
                    return Ok(TurnOutcome::Failed(friendly_failure(&stderr, &reason)));
                }
                let detail = stderr.trim();
                Err(WorkerError::Transport(if detail.is_empty() {
                    reason
                } else {
                    format!("{reason}: {detail}")
                }))
            }
        }
    }

    fn on_history_cleared(&self) {
        *self.token_slot() = None;
    }
}

fn final_answer(session: &str, streamed: String, suppressed: &[String]) -> String {
    if !streamed.trim().is_empty() {
        return streamed;
    }
    match suppressed.last() {
        Some(line) => {
            warn!(
                session,
                line = %line,
                "progress-line filter left no answer; using the last suppressed line"
            );
            line.clone()
        }
        None => GENERIC_SUCCESS.to_string(),
    }
}
