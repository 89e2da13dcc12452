//! One connection per call.
//!
//! Some endpoints answer on a loop-back channel that first echoes the
//! caller's own frame. [`SingleShotClient::request`] skips a frame that is
//! byte-identical to what it sent and, for endpoints whose commands are not
//! JSON, any frame that does not parse as JSON. [`SingleShotClient::call`]
//! matches structurally on `sourceMessageId` instead.

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::{
    parse_inbound_envelope, CorrelationId, DispatchError, Frame, InboundEnvelope,
    OutboundEnvelope, Transport, TransportError, TransportEvent, TransportLink,
    WebSocketTransport,
};

#[derive(Clone)]
/// Client that opens a fresh link for every exchange and closes it afterwards.
pub struct SingleShotClient {
    url: String,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for SingleShotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleShotClient")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl SingleShotClient {
    /// Client for `url` over `transport`.
    pub fn new(url: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            url: url.into(),
            transport,
        }
    }

    /// Client over [`WebSocketTransport`].
    pub fn websocket(url: impl Into<String>) -> Self {
        Self::new(url, Arc::new(WebSocketTransport::new()))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends `command` as one text frame and returns the first JSON frame
    /// that is not an echo of it.
    ///
    /// `timeout` bounds the whole exchange, connection setup included.
    pub async fn request(&self, command: &str, timeout: Duration) -> Result<Value, DispatchError> {
        self.exchange(command, None, command.to_string(), timeout, |text| {
            match serde_json::from_str::<Value>(text) {
                Ok(value) => Some(value),
                Err(_) => {
                    debug!(frame_len = text.len(), "skipping non-JSON frame");
                    None
                }
            }
        })
        .await
    }

    /// Sends `envelope` and waits for the inbound envelope answering it.
    pub async fn call(
        &self,
        envelope: OutboundEnvelope,
        timeout: Duration,
    ) -> Result<InboundEnvelope, DispatchError> {
        let message_id = envelope.message_id.clone();
        let encoded = envelope.to_json()?;
        self.exchange(
            &envelope.operation,
            Some(message_id.clone()),
            encoded,
            timeout,
            |text| match parse_inbound_envelope(text) {
                Ok(reply) if reply.source_message_id == message_id => Some(reply),
                Ok(reply) => {
                    debug!(
                        message_id = %reply.source_message_id,
                        "skipping reply for another call"
                    );
                    None
                }
                Err(_) => {
                    debug!(frame_len = text.len(), "skipping frame that is not a reply");
                    None
                }
            },
        )
        .await
    }

    async fn exchange<T, F>(
        &self,
        operation: &str,
        message_id: Option<CorrelationId>,
        outbound: String,
        timeout: Duration,
        accept: F,
    ) -> Result<T, DispatchError>
    where
        F: FnMut(&str) -> Option<T> + Send,
        T: Send,
    {
        let deadline = Instant::now() + timeout;
        let timed_out = || DispatchError::Timeout {
            operation: operation.to_string(),
            message_id: message_id.clone(),
            timeout,
        };

        info!(url = %self.url, operation, "opening single-shot link");
        let mut link = match timeout_at(deadline, self.transport.open(&self.url)).await {
            Ok(Ok(link)) => link,
            Ok(Err(error)) => {
                warn!(url = %self.url, operation, %error, "single-shot connect failed");
                return Err(DispatchError::Transport(error));
            }
            Err(_) => return Err(timed_out()),
        };

        let outcome = timeout_at(
            deadline,
            await_reply(&mut link, operation, message_id.clone(), outbound, accept),
        )
        .await
        .unwrap_or_else(|_| Err(timed_out()));

        if let Err(error) = link.sink.close().await {
            debug!(%error, "error while closing single-shot link");
        }
        if let Err(error) = &outcome {
            warn!(operation, %error, "single-shot call failed");
        }
        outcome
    }
}

async fn await_reply<T, F>(
    link: &mut TransportLink,
    operation: &str,
    message_id: Option<CorrelationId>,
    outbound: String,
    mut accept: F,
) -> Result<T, DispatchError>
where
    F: FnMut(&str) -> Option<T> + Send,
{
    debug!(operation, "sending single-shot frame");
    if let Err(source) = link.sink.send(Frame::Text(outbound.clone())).await {
        return Err(DispatchError::Send {
            operation: operation.to_string(),
            message_id,
            source,
        });
    }

    loop {
        match link.events.recv().await {
            Some(TransportEvent::Message(frame)) => {
                let Some(text) = frame.into_text() else {
                    debug!("skipping non-UTF-8 binary frame");
                    continue;
                };
                if text == outbound {
                    debug!(operation, "skipping echo of outbound frame");
                    continue;
                }
                if let Some(reply) = accept(&text) {
                    debug!(operation, "single-shot reply received");
                    return Ok(reply);
                }
            }
            Some(TransportEvent::Error(detail)) => {
                return Err(DispatchError::Transport(TransportError::Link(detail)));
            }
            Some(TransportEvent::Closed) | None => {
                return Err(DispatchError::ConnectionClosed {
                    operation: operation.to_string(),
                    message_id,
                });
            }
        }
    }
}
