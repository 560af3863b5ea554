//! Pending tool-call confirmations.
//!
//! When the assistant asks to run a tool that needs user approval, the worker
//! registers a confirmation with [`ConfirmationBroker::create`], emits a
//! confirm-request event, and awaits the returned receiver. The user's answer
//! arrives through [`ConfirmationBroker::resolve`], which delivers it exactly
//! once and forgets the id.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::debug;

/// A single confirmation waiting for the user's answer.
pub struct PendingConfirmation {
    /// Tool the confirmation is for.
    pub tool: String,
    /// When the confirmation was created.
    pub created_at: Instant,
    resolver: oneshot::Sender<bool>,
}

impl std::fmt::Debug for PendingConfirmation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingConfirmation")
            .field("tool", &self.tool)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Registry of pending confirmations keyed by id.
///
/// Safe to share between the request task and the caller answering
/// confirmations.
///
/// # Examples
///
/// ```
/// use desk_workers::confirm::ConfirmationBroker;
///
/// let broker = ConfirmationBroker::new();
/// let mut rx = broker.create("c-1", "Bash");
/// assert!(broker.resolve("c-1", true));
/// assert_eq!(rx.try_recv(), Ok(true));
/// assert!(!broker.resolve("c-1", false));
/// ```
#[derive(Debug, Default)]
pub struct ConfirmationBroker {
    pending: Mutex<HashMap<String, PendingConfirmation>>,
}

impl ConfirmationBroker {
    /// Empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single-use resolver for `id`.
    ///
    /// Registering an id that is already pending replaces the old entry; its
    /// receiver observes a closed channel.
    pub fn create(&self, id: impl Into<String>, tool: impl Into<String>) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(
            id.into(),
            PendingConfirmation {
                tool: tool.into(),
                created_at: Instant::now(),
                resolver: tx,
            },
        );
        rx
    }

    /// Deliver the user's answer for `id` and remove the entry.
    ///
    /// Returns `true` if a pending entry was found. Unknown or already
    /// resolved ids are a no-op returning `false`.
    pub fn resolve(&self, id: &str, approved: bool) -> bool {
        match self.lock().remove(id) {
            Some(entry) => {
                // Receiver may be gone if the request already timed out.
                let _ = entry.resolver.send(approved);
                true
            }
            None => {
                debug!(id, "ignoring response for unknown confirmation");
                false
            }
        }
    }

    /// Forget `id` without answering (e.g. after a timeout).
    pub fn discard(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Deny every pending confirmation. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingConfirmation> = self.lock().drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            let _ = entry.resolver.send(false);
        }
        count
    }

    /// Whether `id` is still awaiting an answer.
    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Number of pending confirmations.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingConfirmation>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
