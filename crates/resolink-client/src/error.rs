use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::CorrelationId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Failures reported by a [`crate::Transport`] or its [`crate::FrameSink`].
pub enum TransportError {
    #[error("failed to open connection to {url}: {detail}")]
    Connect { url: String, detail: String },
    #[error("failed to send frame: {0}")]
    Send(String),
    #[error("link error: {0}")]
    Link(String),
    #[error("connection is closed")]
    Closed,
}

#[derive(Debug, Error)]
/// Failures of a single dispatcher call or connection attempt.
pub enum DispatchError {
    #[error("not connected: cannot send {operation}")]
    NotConnected { operation: String },
    #[error(
        "request timeout after {}ms: {operation}{}",
        .timeout.as_millis(),
        describe_message_id(.message_id)
    )]
    Timeout {
        operation: String,
        message_id: Option<CorrelationId>,
        timeout: Duration,
    },
    #[error("send failed for {operation}{}: {source}", describe_message_id(.message_id))]
    Send {
        operation: String,
        message_id: Option<CorrelationId>,
        #[source]
        source: TransportError,
    },
    #[error("connection closed while {operation}{} was pending", describe_message_id(.message_id))]
    ConnectionClosed {
        operation: String,
        message_id: Option<CorrelationId>,
    },
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("correlation id {message_id} is already pending")]
    DuplicateCorrelationId { message_id: CorrelationId },
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to open traffic log {}: {message}", .path.display())]
    TrafficLog { path: PathBuf, message: String },
}

impl DispatchError {
    /// Whether the caller may reasonably re-issue the call.
    ///
    /// The dispatcher itself never retries; this only classifies.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Send { .. }
                | Self::ConnectionClosed { .. }
                | Self::Transport(_)
        )
    }
}

fn describe_message_id(message_id: &Option<CorrelationId>) -> String {
    match message_id {
        Some(id) => format!(" ({id})"),
        None => String::new(),
    }
}
