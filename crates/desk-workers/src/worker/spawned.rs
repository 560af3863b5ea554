//! Spawned-process variant: one non-interactive assistant process per request.
//!
//! Invocation: `<cli> -p --output-format stream-json --verbose
//! --dangerously-skip-permissions [--model M] <prompt>`, run in the session
//! working directory with the augmented `PATH` and without the credential
//! variable.

use async_trait::async_trait;
use std::io;
use tracing::{debug, info, warn};

use agent_desk_core::config::WorkerVariant;

use super::classify::friendly_failure;
use super::process::{ProcessExit, ProcessStream, StreamItem};
use super::progress::{describe_tool_result, describe_tool_use};
use super::{Turn, TurnOutcome, WorkerBackend, WorkerContext, GENERIC_SUCCESS};
use crate::environment::ResolvedEnvironment;
use crate::error::WorkerError;
use crate::events::{Progress, ProgressKind};
use crate::message::UserInput;
use crate::stream::ProtocolEvent;
use crate::transport::LaunchSpec;

/// Message shown when no working directory is configured.
pub const NO_WORKING_DIR: &str = "No working directory is set for this session. \
Add an authorized folder in settings, then send your message again.";

/// Arguments for a print-mode streaming run.
pub fn spawn_args(model: Option<&str>, prompt: &str) -> Vec<String> {
    let mut args: Vec<String> = [
        "-p",
        "--output-format",
        "stream-json",
        "--verbose",
        "--dangerously-skip-permissions",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    if let Some(model) = model {
        args.push("--model".to_string());
        args.push(model.to_string());
    }
    args.push(prompt.to_string());
    args
}

/// Spawn error with install guidance, including runtime discovery notes.
pub(crate) fn spawn_failure(err: &io::Error, ctx: &WorkerContext, env: &ResolvedEnvironment) -> WorkerError {
    let mut remediation = match env.executable {
        Err(ref lookup) => format!(
            "{lookup}. Install the assistant CLI (npm install -g @anthropic-ai/claude-code) \
             or set `cli_bin` in the [sections.workers] config table."
        ),
        Ok(ref path) => format!("Check that {} is executable.", path.display()),
    };
    if let Some(ref runtime_error) = env.runtime.error {
        remediation.push(' ');
        remediation.push_str(runtime_error);
    }
    WorkerError::spawn(format!("'{}': {err}", ctx.cli_bin), remediation)
}

/// Launch spec shared by the process-backed variants.
pub(crate) fn base_spec(ctx: &WorkerContext, env: &ResolvedEnvironment, args: Vec<String>) -> LaunchSpec {
    LaunchSpec {
        program: env.program(&ctx.cli_bin),
        args,
        cwd: ctx.working_dir(),
        env_set: vec![("PATH".to_string(), env.search_path.clone())],
        env_remove: vec![ctx.credential_env.clone()],
        pipe_stdin: false,
    }
}

/// Backend for [`SpawnedProcessWorker`](super::SpawnedProcessWorker).
#[derive(Debug, Default, Clone)]
pub struct SpawnedProcessBackend;

#[async_trait]
impl WorkerBackend for SpawnedProcessBackend {
    fn variant(&self) -> WorkerVariant {
        WorkerVariant::Cli
    }

    async fn initialize(&self, ctx: &WorkerContext) -> anyhow::Result<()> {
        let env = ctx.resolver.resolve(&ctx.cli_bin).await;
        if let Some(ref e) = env.runtime.error {
            warn!(session = %ctx.session_id, error = %e, "runtime check failed");
        }
        match env.executable {
            Ok(ref path) => {
                info!(session = %ctx.session_id, executable = %path.display(), "assistant CLI located");
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
        if !input.images.is_empty() {
            warn!(
                session = %ctx.session_id,
                count = input.images.len(),
                "print mode cannot carry images; sending text only"
            );
        }

        let env = ctx.resolver.resolve(&ctx.cli_bin).await;
        let spec = base_spec(ctx, &env, spawn_args(ctx.model.as_deref(), &input.text));
        let process = ctx
            .launcher
            .launch(spec)
            .await
            .map_err(|e| spawn_failure(&e, ctx, &env))?;

        let mut stream = ProcessStream::new(process);
        let mut result_text: Option<String> = None;
        let mut result_error: Option<String> = None;

        loop {
            match stream.next(turn.token()).await? {
                StreamItem::Event(event) => match event {
                    ProtocolEvent::Init { model, .. } => {
                        let message = match model {
                            Some(m) => format!("Session started ({m})"),
                            None => "Session started".to_string(),
                        };
                        turn.progress(Progress::new(ProgressKind::Init, message));
                    }
                    ProtocolEvent::TextDelta { text } => turn.stream(&text),
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
                        ..
                    } => {
                        if is_error {
                            result_error = error_message.or(text);
                        } else {
                            result_text = text;
                        }
                        turn.progress(Progress::new(ProgressKind::Complete, "Finished"));
                    }
                    ProtocolEvent::PermissionRequest { request_id, .. } => {
                        debug!(request_id, "unexpected permission request in bypass mode");
                    }
                },
                StreamItem::Cancelled => return Ok(TurnOutcome::Cancelled),
                StreamItem::End => break,
            }
        }

        let ProcessExit { code, stderr } = stream.finish().await?;
        debug!(session = %ctx.session_id, ?code, "assistant process exited");
        Ok(outcome_for_exit(code, &stderr, result_text, result_error, &turn.streamed_text()))
    }
}

fn outcome_for_exit(
    code: Option<i32>,
    stderr: &str,
    result_text: Option<String>,
    result_error: Option<String>,
    streamed: &str,
) -> TurnOutcome {
    match code {
        Some(0) => {
            if let Some(error) = result_error {
                return TurnOutcome::Failed(error);
            }
            let answer = result_text
                .filter(|t| !t.trim().is_empty())
                .or_else(|| Some(streamed.to_string()).filter(|s| !s.trim().is_empty()))
                .unwrap_or_else(|| GENERIC_SUCCESS.to_string());
            TurnOutcome::Answer(answer)
        }
        Some(code) => {
            let detail = if stderr.trim().is_empty() {
                result_error.unwrap_or_default()
            } else {
                stderr.to_string()
            };
            TurnOutcome::Failed(friendly_failure(
                &detail,
                &format!("The assistant exited with code {code}."),
            ))
        }
        None => TurnOutcome::Failed(friendly_failure(
            stderr,
            "The assistant process was terminated.",
        )),
    }
}
