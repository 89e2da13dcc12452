//! Request/response client for the link endpoint of a live virtual-world scene.
//!
//! The [`Dispatcher`] multiplexes concurrent calls over one message stream and
//! correlates replies by `messageId`/`sourceMessageId`. Transports plug in
//! through [`Transport`]; [`WebSocketTransport`] is the production one and
//! [`ChannelTransport`] keeps everything in memory.

mod channel_transport;
mod dispatcher;
mod envelope;
mod error;
pub mod requests;
mod single_shot;
pub mod slot_queries;
mod traffic_log;
mod transport;
mod websocket_transport;

pub use channel_transport::{channel_transport, ChannelAcceptor, ChannelPeer, ChannelTransport};
pub use dispatcher::{
    CallOptions, ConnectionState, Dispatcher, DispatcherConfig, DEFAULT_BULK_REQUEST_TIMEOUT_MS,
    DEFAULT_RECONNECT_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_MS,
};
pub use envelope::{
    parse_inbound_envelope, CorrelationId, Frame, InboundEnvelope, OutboundEnvelope,
};
pub use error::{DispatchError, TransportError};
pub use single_shot::SingleShotClient;
pub use traffic_log::TrafficLog;
pub use transport::{FrameSink, Transport, TransportEvent, TransportLink};
pub use websocket_transport::WebSocketTransport;
