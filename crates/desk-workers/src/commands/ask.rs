//! `ask` subcommand: send one prompt through the session registry.
//!
//! Streamed text goes to stdout; progress, errors and confirmation prompts go
//! to stderr. Ctrl-C aborts the request and leaves the partial answer in the
//! session history.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::warn;

use crate::cli::AskArgs;
use crate::collaborators::{
    ConfigStore, JsonFileSessionStore, NullSessionStore, SessionStore, StaticPermissions,
};
use crate::config::{resolve_config, ResolvedConfig};
use crate::events::{ChannelSink, ProgressKind, WorkerEvent};
use crate::message::{ImageAttachment, Message, Role, UserInput};
use crate::registry::{keys, ConfiguredWorkerFactory, SessionRegistry};

/// Registry wired from resolved configuration, with `args` overrides applied.
///
/// # Errors
///
/// Returns an error if an override cannot be written to the config store.
pub fn build_registry(resolved: &ResolvedConfig, args: &AskArgs) -> anyhow::Result<SessionRegistry> {
    let store = resolved.to_config_store();
    if let Some(variant) = args.variant {
        store.set(keys::VARIANT, variant.as_str())?;
    }
    if let Some(ref model) = args.model {
        store.set(keys::MODEL, model)?;
    }

    let session_store: Arc<dyn SessionStore> = match resolved.workers.history_dir {
        Some(ref dir) => Arc::new(JsonFileSessionStore::new(dir.clone())),
        None => Arc::new(NullSessionStore),
    };
    let permissions = StaticPermissions::new(
        resolved.workspace.authorized_folders.clone(),
        resolved.workspace.blacklisted_commands.clone(),
    );

    let factory = ConfiguredWorkerFactory::new(Arc::new(store), resolved.workers.clone())
        .with_credential_env(resolved.core.credential_env())
        .with_permissions(Arc::new(permissions))
        .with_session_store(session_store);
    Ok(SessionRegistry::new(Arc::new(factory)))
}

/// Run the `ask` subcommand.
///
/// # Errors
///
/// Returns an error if configuration cannot be resolved, an image cannot be
/// read, no worker can be created, or the request fails to start.
pub async fn run(config_path: &Option<PathBuf>, cwd: &Option<PathBuf>, args: AskArgs) -> anyhow::Result<()> {
    let resolved = resolve_config(config_path.as_deref(), cwd.clone())?;
    let images = args
        .images
        .iter()
        .map(|p| ImageAttachment::from_path(p))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let registry = Arc::new(build_registry(&resolved, &args)?);
    let session_id = args
        .session
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let (sink, rx) = ChannelSink::new();
    registry.register_observer(&session_id, sink);
    let worker = registry.get_or_create_worker(&session_id).with_context(|| {
        format!(
            "no worker available for variant '{}': the api variant needs the {} environment variable",
            args.variant.unwrap_or(resolved.core.variant()),
            resolved.core.credential_env()
        )
    })?;
    if let Err(e) = worker.initialize().await {
        warn!(error = %e, "worker initialization failed");
    }

    let printer = tokio::spawn(print_events(rx, registry.clone(), session_id.clone(), args.yes));

    let input = UserInput {
        text: args.prompt,
        images,
    };
    let request = worker.process_user_message(input);
    tokio::pin!(request);
    let result = tokio::select! {
        r = &mut request => r,
        Ok(()) = tokio::signal::ctrl_c() => {
            eprintln!("\ninterrupted; aborting");
            worker.abort().await;
            request.await
        }
    };

    if let Err(e) = printer.await {
        warn!(error = %e, "event printer failed");
    }
    registry.destroy_all().await;
    result.map_err(|e| anyhow::anyhow!(e.user_message()))
}

async fn print_events(
    mut rx: mpsc::UnboundedReceiver<WorkerEvent>,
    registry: Arc<SessionRegistry>,
    session_id: String,
    auto_approve: bool,
) {
    let mut streamed = false;
    let mut latest: Vec<Message> = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            WorkerEvent::StreamToken(text) => {
                streamed = true;
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            WorkerEvent::Progress(p) => {
                let marker = match p.kind {
                    ProgressKind::Init => "*",
                    ProgressKind::ToolUse => ">",
                    ProgressKind::ToolResult => "<",
                    ProgressKind::Complete => "=",
                };
                eprintln!("{marker} {}", p.message);
            }
            WorkerEvent::Error(message) => eprintln!("error: {message}"),
            WorkerEvent::ConfirmRequest { id, message, .. } => {
                let approved = auto_approve || ask_user(message).await;
                registry.handle_confirm_response(&session_id, &id, approved);
            }
            WorkerEvent::HistoryUpdate(history) => latest = history,
            WorkerEvent::StreamStart => {}
            WorkerEvent::Complete => {
                // Answers set without streaming (configuration and spawn errors).
                if !streamed {
                    if let Some(last) = latest.last().filter(|m| m.role == Role::Assistant) {
                        print!("{}", last.text());
                    }
                }
                println!();
                break;
            }
        }
    }
}

async fn ask_user(message: String) -> bool {
    let answer = tokio::task::spawn_blocking(move || {
        eprint!("{message} [y/N] ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await;
    match answer {
        Ok(Ok(line)) => is_yes(&line),
        _ => false,
    }
}

fn is_yes(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
