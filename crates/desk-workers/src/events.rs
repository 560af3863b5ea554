//! Events delivered to observer sinks and the observer set that fans them out.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

use crate::message::Message;

/// Kind of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// Session initialized
    Init,
    /// A tool was invoked
    ToolUse,
    /// A tool returned
    ToolResult,
    /// The request finished
    Complete,
}

/// One entry of a todo-list tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    /// What to do
    pub content: String,
    /// `pending`, `in_progress` or `completed`
    pub status: String,
}

/// Progress notification for observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Event kind
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    /// Human-readable description
    pub message: String,
    /// Tool name for tool events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Tool input for tool events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    /// Reshaped todo list for todo-list tool calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todos: Option<Vec<TodoItem>>,
    /// File the tool touches
    #[serde(default, rename = "filePath", skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Whether the tool produces a user-visible artifact
    #[serde(default, rename = "isArtifact", skip_serializing_if = "Option::is_none")]
    pub is_artifact: Option<bool>,
    /// Whether a tool result reported failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl Progress {
    /// Progress event with only a kind and message.
    pub fn new(kind: ProgressKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            tool: None,
            input: None,
            todos: None,
            file_path: None,
            is_artifact: None,
            is_error: None,
        }
    }
}

/// Event broadcast by a worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum WorkerEvent {
    /// A response began streaming
    StreamStart,
    /// A chunk of response text
    StreamToken(String),
    /// Tool or lifecycle progress
    Progress(Progress),
    /// The full message list after a change
    HistoryUpdate(Vec<Message>),
    /// An error shown to the user
    Error(String),
    /// The assistant asks the user to approve a tool call
    ConfirmRequest {
        /// Confirmation id to pass back to `handle_confirm_response`
        id: String,
        /// Tool name
        tool: String,
        /// Tool input
        input: serde_json::Value,
        /// Prompt shown to the user
        message: String,
    },
    /// The request is fully resolved
    Complete,
}

/// Destination for worker events.
///
/// A sink's lifetime is independent of the worker; once
/// [`is_destroyed`](EventSink::is_destroyed) reports `true` it is dropped from
/// every observer set on the next broadcast.
pub trait EventSink: Send + Sync {
    /// Whether the sink can no longer receive events.
    fn is_destroyed(&self) -> bool;

    /// Deliver one event.
    fn deliver(&self, event: &WorkerEvent);
}

/// Sink forwarding events into an unbounded tokio channel.
///
/// Reports itself destroyed once the receiver is dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver that observes it.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl EventSink for ChannelSink {
    fn is_destroyed(&self) -> bool {
        self.tx.is_closed()
    }

    fn deliver(&self, event: &WorkerEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Set of observer sinks with identity-based idempotent add and remove.
#[derive(Default)]
pub struct ObserverSet {
    sinks: Mutex<Vec<Arc<dyn EventSink>>>,
}

impl std::fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet")
            .field("len", &self.len())
            .finish()
    }
}

pub(crate) fn same_sink(a: &Arc<dyn EventSink>, b: &Arc<dyn EventSink>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl ObserverSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink; adding the same sink twice is a no-op.
    pub fn add(&self, sink: Arc<dyn EventSink>) {
        let mut sinks = self.lock();
        if !sinks.iter().any(|s| same_sink(s, &sink)) {
            sinks.push(sink);
        }
    }

    /// Remove a sink; removing an absent sink is a no-op.
    pub fn remove(&self, sink: &Arc<dyn EventSink>) {
        self.lock().retain(|s| !same_sink(s, sink));
    }

    /// Deliver `event` to every live sink, dropping destroyed ones.
    pub fn publish(&self, event: &WorkerEvent) {
        // Snapshot so delivery never runs under the lock.
        let live: Vec<Arc<dyn EventSink>> = {
            let mut sinks = self.lock();
            let before = sinks.len();
            sinks.retain(|s| !s.is_destroyed());
            if sinks.len() != before {
                debug!(removed = before - sinks.len(), "dropped destroyed observer sinks");
            }
            sinks.clone()
        };
        for sink in live {
            sink.deliver(event);
        }
    }

    /// Number of registered sinks, destroyed or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no sinks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn EventSink>>> {
        self.sinks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
