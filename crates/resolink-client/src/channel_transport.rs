//! In-memory transport.
//!
//! Every [`Transport::open`] on a [`ChannelTransport`] hands a [`ChannelPeer`]
//! to the paired [`ChannelAcceptor`], which plays the remote endpoint: it reads
//! the frames the client sent and injects messages, errors and closes.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Frame, FrameSink, Transport, TransportError, TransportEvent, TransportLink};

/// Creates a connected transport/acceptor pair.
pub fn channel_transport() -> (ChannelTransport, ChannelAcceptor) {
    let (peers_tx, peers_rx) = mpsc::unbounded_channel();
    (
        ChannelTransport {
            peers: peers_tx,
            refusing: Arc::new(AtomicBool::new(false)),
            opened_links: Arc::new(AtomicUsize::new(0)),
        },
        ChannelAcceptor { peers: peers_rx },
    )
}

#[derive(Debug, Clone)]
/// In-memory [`Transport`] whose links surface on a [`ChannelAcceptor`].
pub struct ChannelTransport {
    peers: mpsc::UnboundedSender<ChannelPeer>,
    refusing: Arc<AtomicBool>,
    opened_links: Arc<AtomicUsize>,
}

impl ChannelTransport {
    /// While set, every `open` fails with [`TransportError::Connect`].
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of links successfully opened so far.
    pub fn opened_links(&self) -> usize {
        self.opened_links.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn open(&self, url: &str) -> Result<TransportLink, TransportError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                url: url.to_string(),
                detail: "connection refused".to_string(),
            });
        }
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let peer = ChannelPeer {
            url: url.to_string(),
            frames: Some(frames_rx),
            events: events_tx.clone(),
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::Connect {
                url: url.to_string(),
                detail: "no acceptor is listening".to_string(),
            })?;
        self.opened_links.fetch_add(1, Ordering::SeqCst);
        Ok(TransportLink {
            sink: Box::new(ChannelSink {
                frames: Some(frames_tx),
                events: events_tx,
            }),
            events: events_rx,
        })
    }
}

#[derive(Debug)]
/// Remote side of a [`ChannelTransport`]: yields one peer per opened link.
pub struct ChannelAcceptor {
    peers: mpsc::UnboundedReceiver<ChannelPeer>,
}

impl ChannelAcceptor {
    /// Waits for the next link; `None` once every transport clone is dropped.
    pub async fn accept(&mut self) -> Option<ChannelPeer> {
        self.peers.recv().await
    }
}

/// Remote end of one in-memory link.
#[derive(Debug)]
pub struct ChannelPeer {
    url: String,
    frames: Option<mpsc::UnboundedReceiver<Frame>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl ChannelPeer {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next frame written by the client; `None` after the client closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        match self.frames.as_mut() {
            Some(frames) => frames.recv().await,
            None => None,
        }
    }

    /// Delivers `frame` to the client; `false` once the link is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.events.send(TransportEvent::Message(frame)).is_ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(text.into()))
    }

    /// Surfaces a transport error event on the client side.
    pub fn send_error(&self, detail: impl Into<String>) -> bool {
        self.events.send(TransportEvent::Error(detail.into())).is_ok()
    }

    /// Closes the link from the remote side.
    pub fn close(&self) -> bool {
        self.events.send(TransportEvent::Closed).is_ok()
    }

    /// Drops the read side so that further client writes fail.
    pub fn stop_receiving(&mut self) {
        self.frames = None;
    }
}

struct ChannelSink {
    frames: Option<mpsc::UnboundedSender<Frame>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let Some(frames) = self.frames.as_ref() else {
            return Err(TransportError::Closed);
        };
        frames
            .send(frame)
            .map_err(|_| TransportError::Send("peer stopped receiving".to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.frames.take().is_some() {
            let _ = self.events.send(TransportEvent::Closed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::channel_transport;
    use crate::{Frame, Transport, TransportError, TransportEvent};

    #[tokio::test]
    async fn functional_channel_link_carries_frames_both_ways() {
        let (transport, mut acceptor) = channel_transport();
        let mut link = transport.open("mem://link").await.expect("open");
        let mut peer = acceptor.accept().await.expect("peer");
        assert_eq!(peer.url(), "mem://link");

        link.sink
            .send(Frame::Text("hello".to_string()))
            .await
            .expect("send");
        assert_eq!(peer.recv().await, Some(Frame::Text("hello".to_string())));

        assert!(peer.send_text("reply"));
        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Message(Frame::Text("reply".to_string())))
        );
        assert_eq!(transport.opened_links(), 1);
    }

    #[tokio::test]
    async fn regression_channel_sink_fails_after_peer_stops_receiving() {
        let (transport, mut acceptor) = channel_transport();
        let mut link = transport.open("mem://link").await.expect("open");
        let mut peer = acceptor.accept().await.expect("peer");
        peer.stop_receiving();

        let error = link
            .sink
            .send(Frame::Binary(vec![1, 2, 3]))
            .await
            .expect_err("send should fail");
        assert!(matches!(error, TransportError::Send(_)));
    }

    #[tokio::test]
    async fn unit_refusing_transport_reports_connect_error() {
        let (transport, _acceptor) = channel_transport();
        transport.set_refusing(true);
        let error = transport.open("mem://link").await.expect_err("refused");
        assert!(matches!(error, TransportError::Connect { .. }));
        assert_eq!(transport.opened_links(), 0);
    }

    #[tokio::test]
    async fn unit_closing_sink_ends_peer_stream_and_reports_closed() {
        let (transport, mut acceptor) = channel_transport();
        let mut link = transport.open("mem://link").await.expect("open");
        let mut peer = acceptor.accept().await.expect("peer");

        link.sink.close().await.expect("close");
        assert_eq!(peer.recv().await, None);
        assert_eq!(link.events.recv().await, Some(TransportEvent::Closed));
    }
}
