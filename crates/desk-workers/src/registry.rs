//! Session registry: one worker and a set of observer sinks per session.
//!
//! Workers are created lazily by [`SessionRegistry::get_or_create_worker`]
//! and only once the session has at least one observer, so events always
//! have somewhere to go. Creation reads the current configuration through a
//! [`WorkerFactory`]; "no worker" (no observer yet, no variant configured, no
//! credential for the network API) is a normal outcome.
//!
//! # Thread safety
//!
//! `SessionRegistry` is `Send + Sync`. The session map sits behind a
//! `std::sync::Mutex` that is never held across an await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use agent_desk_core::config::WorkerVariant;

use crate::collaborators::{
    ConfigStore, NullSessionStore, PermissionProvider, SessionStore, StaticPermissions,
};
use crate::config::WorkerConfig;
use crate::environment::EnvironmentResolver;
use crate::events::{same_sink, EventSink};
use crate::transport::{ProcessLauncher, TokioLauncher};
use crate::worker::{create_worker, Worker, WorkerContext};

/// Config store keys read at worker creation.
pub mod keys {
    /// Worker variant: `api`, `cli` or `sdk`
    pub const VARIANT: &str = "variant";
    /// Network API credential
    pub const API_KEY: &str = "api_key";
    /// Model override
    pub const MODEL: &str = "model";
    /// Network API base URL
    pub const BASE_URL: &str = "base_url";
    /// Assistant executable
    pub const CLI_BIN: &str = "cli_bin";
}

/// Builds the worker for a new session.
pub trait WorkerFactory: Send + Sync {
    /// Worker for `session_id`, or `None` when configuration does not allow
    /// one yet.
    fn create(&self, session_id: &str) -> Option<Arc<dyn Worker>>;
}

/// [`WorkerFactory`] reading the variant and credentials from a
/// [`ConfigStore`] at every creation.
pub struct ConfiguredWorkerFactory {
    config: Arc<dyn ConfigStore>,
    defaults: WorkerConfig,
    credential_env: String,
    permissions: Arc<dyn PermissionProvider>,
    session_store: Arc<dyn SessionStore>,
    resolver: Arc<EnvironmentResolver>,
    launcher: Arc<dyn ProcessLauncher>,
}

impl ConfiguredWorkerFactory {
    /// Factory over `config` with worker defaults from `defaults`, no
    /// permissions, no persistence, the system resolver and real processes.
    pub fn new(config: Arc<dyn ConfigStore>, defaults: WorkerConfig) -> Self {
        let resolver = EnvironmentResolver::system(Duration::from_millis(defaults.probe_timeout_ms));
        Self {
            config,
            defaults,
            credential_env: agent_desk_core::config::DEFAULT_CREDENTIAL_ENV.to_string(),
            permissions: Arc::new(StaticPermissions::default()),
            session_store: Arc::new(NullSessionStore),
            resolver: Arc::new(resolver),
            launcher: Arc::new(TokioLauncher),
        }
    }

    /// Environment variable stripped from spawned children.
    pub fn with_credential_env(mut self, name: impl Into<String>) -> Self {
        self.credential_env = name.into();
        self
    }

    /// Permission collaborator.
    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionProvider>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Session store collaborator.
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = store;
        self
    }

    /// Runtime resolver.
    pub fn with_resolver(mut self, resolver: Arc<EnvironmentResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Process launcher.
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    fn get(&self, key: &str) -> Option<String> {
        self.config
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Context for `session_id` from the current configuration values.
    pub fn context(&self, session_id: &str) -> WorkerContext {
        let mut ctx = WorkerContext::from_config(session_id, &self.defaults);
        ctx.credential_env = self.credential_env.clone();
        ctx.credential = self.get(keys::API_KEY);
        if let Some(model) = self.get(keys::MODEL) {
            ctx.model = Some(model);
        }
        if let Some(base_url) = self.get(keys::BASE_URL) {
            ctx.base_url = base_url;
        }
        if let Some(cli_bin) = self.get(keys::CLI_BIN) {
            ctx.cli_bin = cli_bin;
        }
        ctx.permissions = self.permissions.clone();
        ctx.session_store = self.session_store.clone();
        ctx.resolver = self.resolver.clone();
        ctx.launcher = self.launcher.clone();
        ctx
    }
}

impl WorkerFactory for ConfiguredWorkerFactory {
    fn create(&self, session_id: &str) -> Option<Arc<dyn Worker>> {
        let Some(raw) = self.get(keys::VARIANT) else {
            info!(session = session_id, "no worker variant configured");
            return None;
        };
        let variant: WorkerVariant = match raw.parse() {
            Ok(v) => v,
            Err(e) => {
                warn!(session = session_id, "cannot create worker: {e}");
                return None;
            }
        };
        let ctx = self.context(session_id);
        if variant == WorkerVariant::Api && ctx.credential.is_none() {
            info!(session = session_id, "network API selected but no API key configured");
            return None;
        }
        debug!(session = session_id, %variant, "creating worker");
        Some(create_worker(variant, ctx))
    }
}

#[derive(Default)]
struct Slot {
    sinks: Vec<Arc<dyn EventSink>>,
    worker: Option<Arc<dyn Worker>>,
}

/// Maps session ids to their worker and observer sinks.
pub struct SessionRegistry {
    factory: Arc<dyn WorkerFactory>,
    sessions: Mutex<HashMap<String, Slot>>,
}

impl SessionRegistry {
    /// Empty registry creating workers through `factory`.
    pub fn new(factory: Arc<dyn WorkerFactory>) -> Self {
        Self {
            factory,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attach `sink` to a session, and to its worker if one exists.
    pub fn register_observer(&self, session_id: &str, sink: Arc<dyn EventSink>) {
        let mut sessions = self.lock();
        let slot = sessions.entry(session_id.to_string()).or_default();
        if !slot.sinks.iter().any(|s| same_sink(s, &sink)) {
            slot.sinks.push(sink.clone());
        }
        if let Some(ref worker) = slot.worker {
            worker.add_observer(sink);
        }
    }

    /// Forget a session's observers and destroy its worker.
    pub async fn unregister_observer(&self, session_id: &str) {
        let slot = self.lock().remove(session_id);
        if let Some(worker) = slot.and_then(|s| s.worker) {
            shutdown(session_id, worker).await;
        }
        debug!(session = session_id, "session unregistered");
    }

    /// Existing worker for the session, or a new one.
    ///
    /// A new worker gets every registered sink and is initialized in the
    /// background; initialization failures are logged. Returns `None` when
    /// the session has no observer yet or the factory declines.
    pub fn get_or_create_worker(&self, session_id: &str) -> Option<Arc<dyn Worker>> {
        let worker = {
            let mut sessions = self.lock();
            let slot = sessions.get_mut(session_id)?;
            if let Some(ref worker) = slot.worker {
                return Some(worker.clone());
            }
            if slot.sinks.is_empty() {
                return None;
            }
            let worker = self.factory.create(session_id)?;
            for sink in &slot.sinks {
                worker.add_observer(sink.clone());
            }
            slot.worker = Some(worker.clone());
            worker
        };

        info!(session = session_id, variant = %worker.variant(), "worker created");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let init = worker.clone();
                let session = session_id.to_string();
                handle.spawn(async move {
                    if let Err(e) = init.initialize().await {
                        warn!(session = %session, error = %e, "worker initialization failed");
                    }
                });
            }
            Err(_) => debug!(session = session_id, "no runtime; history is restored on the first request"),
        }
        Some(worker)
    }

    /// Worker for the session if one exists.
    pub fn worker(&self, session_id: &str) -> Option<Arc<dyn Worker>> {
        self.lock().get(session_id).and_then(|s| s.worker.clone())
    }

    /// Abort and clean up the session's worker. The entry is removed even if
    /// cleanup fails; observers stay registered.
    pub async fn destroy_worker(&self, session_id: &str) {
        let worker = self
            .lock()
            .get_mut(session_id)
            .and_then(|slot| slot.worker.take());
        if let Some(worker) = worker {
            shutdown(session_id, worker).await;
        }
    }

    /// Destroy every worker, best effort.
    pub async fn destroy_all(&self) {
        let workers: Vec<(String, Arc<dyn Worker>)> = self
            .lock()
            .iter_mut()
            .filter_map(|(id, slot)| slot.worker.take().map(|w| (id.clone(), w)))
            .collect();
        info!(count = workers.len(), "destroying all workers");
        for (session_id, worker) in workers {
            shutdown(&session_id, worker).await;
        }
    }

    /// Route a confirmation answer to the session's worker.
    pub fn handle_confirm_response(&self, session_id: &str, id: &str, approved: bool) -> bool {
        match self.worker(session_id) {
            Some(worker) => worker.handle_confirm_response(id, approved),
            None => false,
        }
    }

    /// Ids of sessions with observers or a worker.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of live workers.
    pub fn worker_count(&self) -> usize {
        self.lock().values().filter(|s| s.worker.is_some()).count()
    }
}

async fn shutdown(session_id: &str, worker: Arc<dyn Worker>) {
    worker.abort().await;
    if let Err(e) = worker.cleanup().await {
        warn!(session = session_id, error = %e, "worker cleanup failed");
    }
    info!(session = session_id, "worker destroyed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryConfigStore;
    use crate::events::ChannelSink;

    fn factory(pairs: &[(&str, &str)]) -> Arc<ConfiguredWorkerFactory> {
        let store = MemoryConfigStore::new();
        for (k, v) in pairs {
            store.insert(k, v);
        }
        Arc::new(ConfiguredWorkerFactory::new(Arc::new(store), WorkerConfig::default()))
    }

    #[tokio::test]
    async fn no_worker_without_observer() {
        let registry = SessionRegistry::new(factory(&[("variant", "cli")]));
        assert!(registry.get_or_create_worker("s").is_none());
    }

    #[tokio::test]
    async fn no_worker_without_variant_or_key() {
        let registry = SessionRegistry::new(factory(&[]));
        let (sink, _rx) = ChannelSink::new();
        registry.register_observer("s", sink);
        assert!(registry.get_or_create_worker("s").is_none());

        let registry = SessionRegistry::new(factory(&[("variant", "api")]));
        let (sink, _rx) = ChannelSink::new();
        registry.register_observer("s", sink);
        assert!(registry.get_or_create_worker("s").is_none());

        let registry = SessionRegistry::new(factory(&[("variant", "telepathy")]));
        let (sink, _rx) = ChannelSink::new();
        registry.register_observer("s", sink);
        assert!(registry.get_or_create_worker("s").is_none());
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let registry = SessionRegistry::new(factory(&[("variant", "api"), ("api_key", "k")]));
        let (sink, _rx) = ChannelSink::new();
        registry.register_observer("s", sink);

        let a = registry.get_or_create_worker("s").unwrap();
        let b = registry.get_or_create_worker("s").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.variant(), WorkerVariant::Api);
        assert_eq!(registry.worker_count(), 1);
    }

    #[tokio::test]
    async fn destroy_keeps_observers_and_unregister_drops_session() {
        let registry = SessionRegistry::new(factory(&[("variant", "sdk")]));
        let (sink, _rx) = ChannelSink::new();
        registry.register_observer("s", sink);
        registry.get_or_create_worker("s").unwrap();

        registry.destroy_worker("s").await;
        assert!(registry.worker("s").is_none());
        assert!(registry.get_or_create_worker("s").is_some(), "observers survive destroy");

        registry.unregister_observer("s").await;
        assert!(registry.session_ids().is_empty());
        assert!(registry.get_or_create_worker("s").is_none());
    }

    #[tokio::test]
    async fn factory_context_reads_store() {
        let factory = factory(&[
            ("model", "opus"),
            ("base_url", "http://localhost:1"),
            ("cli_bin", " /opt/claude "),
            ("api_key", ""),
        ]);
        let ctx = factory.context("s");
        assert_eq!(ctx.model.as_deref(), Some("opus"));
        assert_eq!(ctx.base_url, "http://localhost:1");
        assert_eq!(ctx.cli_bin, "/opt/claude");
        assert_eq!(ctx.credential, None);
    }

    #[test]
    fn worker_created_outside_runtime_restores_history_on_first_request() {
        use crate::collaborators::MemorySessionStore;
        use crate::message::Message;

        let history = Arc::new(MemorySessionStore::new());
        history
            .persist("s", &[Message::user("before"), Message::assistant("earlier answer")])
            .unwrap();
        let store = MemoryConfigStore::new();
        store.insert("variant", "cli");
        let factory = ConfiguredWorkerFactory::new(Arc::new(store), WorkerConfig::default())
            .with_session_store(history);
        let registry = SessionRegistry::new(Arc::new(factory));
        let (sink, _rx) = ChannelSink::new();
        registry.register_observer("s", sink);

        let worker = registry.get_or_create_worker("s").unwrap();
        assert!(worker.history().is_empty());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(worker.process_user_message("after".into())).unwrap();

        let texts: Vec<String> = worker.history().iter().map(Message::text).collect();
        assert_eq!(texts.len(), 4);
        assert_eq!(texts[..3], ["before", "earlier answer", "after"]);
    }

    #[tokio::test]
    async fn confirm_for_unknown_session_is_noop() {
        let registry = SessionRegistry::new(factory(&[]));
        assert!(!registry.handle_confirm_response("nope", "id", true));
    }
}
