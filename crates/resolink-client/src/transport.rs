//! Transport seam below the dispatcher.
//!
//! A transport opens a [`TransportLink`]: a sink for outgoing frames plus a
//! channel of [`TransportEvent`]s. The receiving half is consumed by exactly
//! one reader, so handlers are registered once per link.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Frame, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Event surfaced by an open link.
pub enum TransportEvent {
    Message(Frame),
    Error(String),
    Closed,
}

#[async_trait]
/// Write half of an open link.
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An open connection returned by [`Transport::open`].
pub struct TransportLink {
    pub sink: Box<dyn FrameSink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl std::fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportLink").finish_non_exhaustive()
    }
}

#[async_trait]
/// Opens links to a url. Owns the underlying socket.
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str) -> Result<TransportLink, TransportError>;
}
