//! Worker error types.

use thiserror::Error;

/// Errors surfaced by worker operations.
///
/// Most failures during a request are folded into the conversation as
/// assistant messages; only the variants returned from
/// [`Worker::process_user_message`](crate::worker::Worker::process_user_message)
/// reach the caller.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// A request is already in flight for this worker.
    #[error("worker is busy processing another request")]
    Busy,

    /// Missing or invalid local configuration (working directory, credential).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The external executable could not be launched.
    #[error("failed to start assistant: {message}")]
    Spawn {
        /// What went wrong
        message: String,
        /// Suggested fix shown to the user
        remediation: String,
    },

    /// The connection failed before any content arrived.
    #[error("connection failed: {0}")]
    Transport(String),

    /// I/O failure on the owned process pipes or history files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP failure in the network API variant.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl WorkerError {
    /// Build a spawn error with a remediation hint.
    pub fn spawn(message: impl Into<String>, remediation: impl Into<String>) -> Self {
        Self::Spawn {
            message: message.into(),
            remediation: remediation.into(),
        }
    }

    /// Text shown to the user in the conversation.
    pub fn user_message(&self) -> String {
        match self {
            Self::Spawn {
                message,
                remediation,
            } => format!("Failed to start the assistant: {message}\n\n{remediation}"),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_user_message_includes_remediation() {
        let err = WorkerError::spawn("not found", "Install the CLI and retry.");
        let text = err.user_message();
        assert!(text.contains("not found"));
        assert!(text.ends_with("Install the CLI and retry."));
    }

    #[test]
    fn busy_display() {
        assert_eq!(
            WorkerError::Busy.to_string(),
            "worker is busy processing another request"
        );
    }
}
