//! WebSocket transport built on tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

use crate::{Frame, FrameSink, Transport, TransportError, TransportEvent, TransportLink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, Default)]
/// Opens `ws://` and `wss://` links.
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<TransportLink, TransportError> {
        let (stream, _response) = connect_async(url).await.map_err(|error| {
            TransportError::Connect {
                url: url.to_string(),
                detail: error.to_string(),
            }
        })?;
        let (sink, source) = stream.split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump_socket_events(source, events_tx, url.to_string()));
        Ok(TransportLink {
            sink: Box::new(WebSocketSink { sink }),
            events: events_rx,
        })
    }
}

async fn pump_socket_events(
    mut source: futures_util::stream::SplitStream<WsStream>,
    events: mpsc::UnboundedSender<TransportEvent>,
    url: String,
) {
    while let Some(message) = source.next().await {
        let event = match message {
            Ok(WsMessage::Text(text)) => {
                TransportEvent::Message(Frame::Text(text.as_str().to_owned()))
            }
            Ok(WsMessage::Binary(bytes)) => TransportEvent::Message(Frame::Binary(bytes.to_vec())),
            Ok(WsMessage::Close(close)) => {
                debug!(url = %url, ?close, "websocket close frame received");
                break;
            }
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) | Ok(WsMessage::Frame(_)) => continue,
            Err(error) => {
                warn!(url = %url, %error, "websocket read failed");
                let _ = events.send(TransportEvent::Error(error.to_string()));
                break;
            }
        };
        if events.send(event).is_err() {
            // Reader is gone; nobody is listening for this link any more.
            return;
        }
    }
    let _ = events.send(TransportEvent::Closed);
}

struct WebSocketSink {
    sink: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(bytes) => WsMessage::Binary(bytes.into()),
        };
        self.sink.send(message).await.map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.sink.close().await {
            Ok(()) => Ok(()),
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(error) => Err(map_ws_error(error)),
        }
    }
}

fn map_ws_error(error: WsError) -> TransportError {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        other => TransportError::Send(other.to_string()),
    }
}
