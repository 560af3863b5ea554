//! Workers: one per session, owning the conversation history, the
//! single-flight processing guard and whatever process or connection backs
//! the session.
//!
//! [`Worker`] is the uniform contract callers and the registry use.
//! [`SessionWorker`] implements it once for every variant; the variant-specific
//! part is a [`WorkerBackend`] that runs a single request (a [`Turn`]) and
//! reports a [`TurnOutcome`]. The shared lifecycle (busy rejection,
//! placeholder message, guaranteed finalization, observers, confirmations)
//! lives here.

mod classify;
mod process;
pub mod progress;
pub mod remote_api;
pub mod sdk;
pub mod spawned;

pub use classify::{classify_failure, friendly_failure, FailureClass};
pub use remote_api::RemoteApiBackend;
pub use sdk::StreamingSdkBackend;
pub use spawned::SpawnedProcessBackend;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_desk_core::config::{WorkerVariant, DEFAULT_CREDENTIAL_ENV};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collaborators::{NullSessionStore, PermissionProvider, SessionStore, StaticPermissions};
use crate::config::WorkerConfig;
use crate::confirm::ConfirmationBroker;
use crate::environment::EnvironmentResolver;
use crate::error::WorkerError;
use crate::events::{EventSink, ObserverSet, Progress, WorkerEvent};
use crate::message::{Message, MessageContent, Role, UserInput};
use crate::transport::{ProcessLauncher, TokioLauncher};

/// Answer used when a successful run produced no text.
pub const GENERIC_SUCCESS: &str = "Task completed successfully.";

/// Explicit per-worker context: everything a worker reads from its host.
#[derive(Clone)]
pub struct WorkerContext {
    /// Session this worker belongs to
    pub session_id: String,
    /// API credential (network API variant)
    pub credential: Option<String>,
    /// Environment variable removed from spawned children
    pub credential_env: String,
    /// Model override
    pub model: Option<String>,
    /// Network API base URL
    pub base_url: String,
    /// Network API version header
    pub api_version: String,
    /// Network API output token limit
    pub max_tokens: u32,
    /// Assistant executable name or path
    pub cli_bin: String,
    /// Tools that need user approval over the SDK connection
    pub confirm_tools: Vec<String>,
    /// How long to wait for a confirmation before denying
    pub confirm_timeout: Duration,
    /// Authorized folders and blacklisted commands
    pub permissions: Arc<dyn PermissionProvider>,
    /// History persistence
    pub session_store: Arc<dyn SessionStore>,
    /// Runtime and executable discovery
    pub resolver: Arc<EnvironmentResolver>,
    /// Process spawning
    pub launcher: Arc<dyn ProcessLauncher>,
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("session_id", &self.session_id)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("cli_bin", &self.cli_bin)
            .finish_non_exhaustive()
    }
}

impl WorkerContext {
    /// Context with defaults from [`WorkerConfig::default`], no permissions,
    /// no history persistence, the system resolver and real processes.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::from_config(session_id, &WorkerConfig::default())
    }

    /// Context seeded from worker configuration.
    pub fn from_config(session_id: impl Into<String>, config: &WorkerConfig) -> Self {
        Self {
            session_id: session_id.into(),
            credential: None,
            credential_env: DEFAULT_CREDENTIAL_ENV.to_string(),
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            api_version: config.api_version.clone(),
            max_tokens: config.max_tokens,
            cli_bin: config.cli_bin.clone(),
            confirm_tools: config.confirm_tools.clone(),
            confirm_timeout: Duration::from_secs(config.confirm_timeout_secs),
            permissions: Arc::new(StaticPermissions::default()),
            session_store: Arc::new(NullSessionStore),
            resolver: Arc::new(EnvironmentResolver::system(Duration::from_millis(
                config.probe_timeout_ms,
            ))),
            launcher: Arc::new(TokioLauncher),
        }
    }

    /// Session working directory: the first authorized folder.
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.permissions.authorized_folders().into_iter().next()
    }
}

/// Uniform worker contract.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Which backend drives this worker.
    fn variant(&self) -> WorkerVariant;

    /// Best-effort preparation (history restore, environment checks).
    /// Runs once; callers log failures.
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Run one request to completion.
    ///
    /// # Errors
    ///
    /// [`WorkerError::Busy`] immediately when a request is in flight.
    /// Spawn and connection failures are returned after the request has been
    /// finalized and the error shown to observers.
    async fn process_user_message(&self, input: UserInput) -> Result<(), WorkerError>;

    /// Stop the in-flight request, if any. Idempotent; history is untouched.
    async fn abort(&self);

    /// Release variant-specific resources before the worker is dropped.
    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Add an observer sink; adding twice is a no-op.
    fn add_observer(&self, sink: Arc<dyn EventSink>);

    /// Remove an observer sink.
    fn remove_observer(&self, sink: &Arc<dyn EventSink>);

    /// Replace the history and notify observers.
    fn load_history(&self, messages: Vec<Message>);

    /// Empty the history and notify observers.
    fn clear_history(&self);

    /// Snapshot of the history.
    fn history(&self) -> Vec<Message>;

    /// Whether a request is in flight.
    fn is_processing(&self) -> bool;

    /// Answer a pending confirmation. Unknown ids are ignored.
    fn handle_confirm_response(&self, id: &str, approved: bool) -> bool;
}

/// How a backend's request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Final answer replacing the placeholder text
    Answer(String),
    /// The assistant reported an error; shown as a message and an error event
    Failed(String),
    /// The connection broke after content arrived; streamed text is kept
    Partial {
        /// What went wrong
        error: String,
    },
    /// The request was aborted
    Cancelled,
}

/// Variant-specific part of a worker.
#[async_trait]
pub trait WorkerBackend: Send + Sync + 'static {
    /// Variant tag.
    fn variant(&self) -> WorkerVariant;

    /// One-time preparation.
    async fn initialize(&self, _ctx: &WorkerContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Run one request.
    async fn run_turn(&self, turn: &Turn<'_>, input: &UserInput) -> Result<TurnOutcome, WorkerError>;

    /// Called after the history was cleared.
    fn on_history_cleared(&self) {}

    /// Release resources.
    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared by every variant.
pub struct WorkerCore {
    ctx: WorkerContext,
    observers: ObserverSet,
    history: Mutex<Vec<Message>>,
    processing: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    broker: ConfirmationBroker,
    restored: tokio::sync::OnceCell<()>,
    init: tokio::sync::OnceCell<()>,
}

impl WorkerCore {
    fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            observers: ObserverSet::new(),
            history: Mutex::new(Vec::new()),
            processing: AtomicBool::new(false),
            cancel: Mutex::new(None),
            broker: ConfirmationBroker::new(),
            restored: tokio::sync::OnceCell::new(),
            init: tokio::sync::OnceCell::new(),
        }
    }

    fn emit(&self, event: WorkerEvent) {
        self.observers.publish(&event);
    }

    fn history(&self) -> Vec<Message> {
        lock(&self.history).clone()
    }

    fn emit_history(&self) {
        self.emit(WorkerEvent::HistoryUpdate(self.history()));
    }

    fn with_placeholder<R>(&self, id: &str, f: impl FnOnce(&mut String) -> R) -> Option<R> {
        let mut history = lock(&self.history);
        let message = history.iter_mut().find(|m| m.id.as_deref() == Some(id))?;
        match message.content {
            MessageContent::Text(ref mut text) => Some(f(text)),
            MessageContent::Blocks(_) => None,
        }
    }

    /// Load stored history once. Concurrent callers wait for the first load.
    async fn ensure_restored(&self) {
        self.restored.get_or_init(|| async { self.restore_history() }).await;
    }

    fn restore_history(&self) {
        let stored = match self.ctx.session_store.load(&self.ctx.session_id) {
            Ok(Some(messages)) if !messages.is_empty() => messages,
            Ok(_) => return,
            Err(e) => {
                warn!(session = %self.ctx.session_id, error = %e, "failed to load history");
                return;
            }
        };
        {
            // Checked under the same lock as the assignment.
            let mut history = lock(&self.history);
            if self.processing.load(Ordering::SeqCst) || !history.is_empty() {
                debug!(session = %self.ctx.session_id, "history already populated; stored copy not applied");
                return;
            }
            info!(session = %self.ctx.session_id, count = stored.len(), "restored history");
            *history = stored;
        }
        self.emit_history();
    }

    fn finish_request(&self, placeholder_id: &str) {
        {
            let mut history = lock(&self.history);
            if let Some(pos) = history
                .iter()
                .position(|m| m.id.as_deref() == Some(placeholder_id))
            {
                if history[pos].content.text().trim().is_empty() {
                    history.remove(pos);
                }
            }
        }
        *lock(&self.cancel) = None;
        self.processing.store(false, Ordering::SeqCst);

        let snapshot = self.history();
        if let Err(e) = self.ctx.session_store.persist(&self.ctx.session_id, &snapshot) {
            warn!(session = %self.ctx.session_id, error = %e, "failed to persist history");
        }
        self.emit(WorkerEvent::HistoryUpdate(snapshot));
        self.emit(WorkerEvent::Complete);
    }

    fn settle(&self, turn: &Turn<'_>, outcome: Result<TurnOutcome, WorkerError>) -> Result<(), WorkerError> {
        let session = &self.ctx.session_id;
        match outcome {
            Ok(TurnOutcome::Answer(text)) => {
                turn.set_text(text);
                Ok(())
            }
            Ok(TurnOutcome::Failed(message)) => {
                warn!(%session, error = %message, "assistant reported an error");
                turn.append_paragraph(&message);
                self.emit(WorkerEvent::Error(message));
                Ok(())
            }
            Ok(TurnOutcome::Partial { error }) => {
                warn!(%session, %error, "connection failed after partial response");
                self.emit(WorkerEvent::Error(error));
                Ok(())
            }
            Ok(TurnOutcome::Cancelled) => {
                info!(%session, "request aborted");
                Ok(())
            }
            Err(WorkerError::Configuration(message)) => {
                warn!(%session, %message, "configuration error");
                turn.set_text(message);
                Ok(())
            }
            Err(e @ WorkerError::Spawn { .. }) => {
                error!(%session, error = %e, "failed to start assistant");
                let message = e.user_message();
                turn.set_text(message.clone());
                self.emit(WorkerEvent::Error(message));
                Err(e)
            }
            Err(e) => {
                warn!(%session, error = %e, "request failed");
                self.emit(WorkerEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }
}

/// Finalizes a request on every exit path.
struct ProcessingGuard<'a> {
    core: &'a WorkerCore,
    placeholder_id: String,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.core.finish_request(&self.placeholder_id);
    }
}

/// One in-flight request, as seen by a backend.
pub struct Turn<'a> {
    core: &'a WorkerCore,
    placeholder_id: String,
    token: CancellationToken,
}

impl<'a> Turn<'a> {
    /// Worker context.
    pub fn context(&self) -> &WorkerContext {
        &self.core.ctx
    }

    /// Cancelled when the worker is aborted.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Pending confirmations of this worker.
    pub fn broker(&self) -> &ConfirmationBroker {
        &self.core.broker
    }

    /// Broadcast an event.
    pub fn emit(&self, event: WorkerEvent) {
        self.core.emit(event);
    }

    /// Broadcast a progress event.
    pub fn progress(&self, progress: Progress) {
        self.core.emit(WorkerEvent::Progress(progress));
    }

    /// Append `text` to the placeholder and broadcast it as a token.
    pub fn stream(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.core
            .with_placeholder(&self.placeholder_id, |t| t.push_str(text));
        self.core.emit(WorkerEvent::StreamToken(text.to_string()));
    }

    /// Text streamed into the placeholder so far.
    pub fn streamed_text(&self) -> String {
        self.core
            .with_placeholder(&self.placeholder_id, |t| t.clone())
            .unwrap_or_default()
    }

    /// History before this request's placeholder (includes the new user message).
    pub fn prior_history(&self) -> Vec<Message> {
        lock(&self.core.history)
            .iter()
            .filter(|m| m.id.as_deref() != Some(self.placeholder_id.as_str()))
            .cloned()
            .collect()
    }

    fn set_text(&self, text: String) {
        self.core.with_placeholder(&self.placeholder_id, |t| *t = text);
    }

    fn append_paragraph(&self, text: &str) {
        self.core.with_placeholder(&self.placeholder_id, |t| {
            if !t.trim().is_empty() {
                t.push_str("\n\n");
            }
            t.push_str(text);
        });
    }
}

/// A [`Worker`] driven by backend `B`.
pub struct SessionWorker<B> {
    core: WorkerCore,
    backend: B,
}

/// Worker spawning one command-line process per request.
pub type SpawnedProcessWorker = SessionWorker<SpawnedProcessBackend>;
/// Worker talking to the command-line tool over its streaming JSON connection.
pub type StreamingSdkWorker = SessionWorker<StreamingSdkBackend>;
/// Worker calling the network API directly.
pub type RemoteApiWorker = SessionWorker<RemoteApiBackend>;

impl<B: WorkerBackend> SessionWorker<B> {
    /// Worker for `ctx` driven by `backend`.
    pub fn with_backend(ctx: WorkerContext, backend: B) -> Self {
        Self {
            core: WorkerCore::new(ctx),
            backend,
        }
    }

    /// Worker context.
    pub fn context(&self) -> &WorkerContext {
        &self.core.ctx
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of confirmations awaiting an answer.
    pub fn pending_confirmations(&self) -> usize {
        self.core.broker.len()
    }
}

impl<B: WorkerBackend> fmt::Debug for SessionWorker<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionWorker")
            .field("variant", &self.backend.variant())
            .field("session_id", &self.core.ctx.session_id)
            .field("processing", &self.is_processing())
            .finish()
    }
}

/// Build the worker for `variant`.
pub fn create_worker(variant: WorkerVariant, ctx: WorkerContext) -> Arc<dyn Worker> {
    match variant {
        WorkerVariant::Api => Arc::new(RemoteApiWorker::with_backend(ctx, RemoteApiBackend::new())),
        WorkerVariant::Cli => Arc::new(SpawnedProcessWorker::with_backend(ctx, SpawnedProcessBackend)),
        WorkerVariant::Sdk => Arc::new(StreamingSdkWorker::with_backend(ctx, StreamingSdkBackend::new())),
    }
}

#[async_trait]
impl<B: WorkerBackend> Worker for SessionWorker<B> {
    fn variant(&self) -> WorkerVariant {
        self.backend.variant()
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        self.core
            .init
            .get_or_try_init(|| async {
                self.core.ensure_restored().await;
                self.backend.initialize(&self.core.ctx).await
            })
            .await
            .map(|_| ())
    }

    async fn process_user_message(&self, input: UserInput) -> Result<(), WorkerError> {
        let core = &self.core;
        core.ensure_restored().await;

        // Claimed under the cancel lock: `abort` never sees `processing`
        // without a token.
        let token = CancellationToken::new();
        {
            let mut cancel = lock(&core.cancel);
            if core
                .processing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(WorkerError::Busy);
            }
            *cancel = Some(token.clone());
        }

        let placeholder_id = uuid::Uuid::new_v4().to_string();
        {
            let mut history = lock(&core.history);
            history.push(input.to_message());
            history.push(Message {
                id: Some(placeholder_id.clone()),
                role: Role::Assistant,
                content: MessageContent::Text(String::new()),
            });
        }
        let _guard = ProcessingGuard {
            core,
            placeholder_id: placeholder_id.clone(),
        };
        core.emit_history();
        core.emit(WorkerEvent::StreamStart);

        info!(
            session = %core.ctx.session_id,
            variant = %self.backend.variant(),
            images = input.images.len(),
            "processing request"
        );
        let turn = Turn {
            core,
            placeholder_id,
            token,
        };
        let outcome = self.backend.run_turn(&turn, &input).await;
        core.settle(&turn, outcome)
    }

    async fn abort(&self) {
        let token = lock(&self.core.cancel).clone();
        if let Some(token) = token {
            info!(session = %self.core.ctx.session_id, "aborting request");
            token.cancel();
        }
        let denied = self.core.broker.cancel_all();
        if denied > 0 {
            info!(session = %self.core.ctx.session_id, denied, "denied pending confirmations");
        }
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        self.backend.cleanup().await
    }

    fn add_observer(&self, sink: Arc<dyn EventSink>) {
        self.core.observers.add(sink);
    }

    fn remove_observer(&self, sink: &Arc<dyn EventSink>) {
        self.core.observers.remove(sink);
    }

    fn load_history(&self, messages: Vec<Message>) {
        if self.is_processing() {
            warn!(session = %self.core.ctx.session_id, "ignoring history load while processing");
            return;
        }
        *lock(&self.core.history) = messages;
        self.core.emit_history();
    }

    fn clear_history(&self) {
        if self.is_processing() {
            warn!(session = %self.core.ctx.session_id, "ignoring history clear while processing");
            return;
        }
        lock(&self.core.history).clear();
        self.backend.on_history_cleared();
        self.core.emit_history();
    }

    fn history(&self) -> Vec<Message> {
        self.core.history()
    }

    fn is_processing(&self) -> bool {
        self.core.processing.load(Ordering::SeqCst)
    }

    fn handle_confirm_response(&self, id: &str, approved: bool) -> bool {
        self.core.broker.resolve(id, approved)
    }
}
