//! Correlating dispatcher for the link endpoint.
//!
//! One [`Dispatcher`] owns one logical connection. Calls register a pending
//! entry keyed by their `messageId`, queue the envelope (and an optional
//! binary attachment right behind it) for the link's writer task, and wait for
//! the inbound envelope whose `sourceMessageId` matches. A single reader task
//! per link routes transport events back into the dispatcher. Callers never
//! hold a lock across network I/O, so a stalled write cannot outlive a call's
//! deadline or block `disconnect`.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::Duration,
};

use serde_json::{json, Value};
use tokio::{
    sync::{mpsc, oneshot, watch, Mutex as AsyncMutex},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::{
    parse_inbound_envelope, CorrelationId, DispatchError, Frame, FrameSink, InboundEnvelope, OutboundEnvelope,
    TrafficLog, Transport, TransportError, TransportEvent, WebSocketTransport,
};

mod pending;

use pending::{PendingCall, PendingRegistry, PendingSlot};

/// Delay between automatic reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5_000;
/// Deadline for ordinary calls.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Deadline for calls that upload large payloads.
pub const DEFAULT_BULK_REQUEST_TIMEOUT_MS: u64 = 120_000;

const LINK_CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
/// Runtime configuration for a [`Dispatcher`].
pub struct DispatcherConfig {
    pub url: String,
    pub auto_reconnect: bool,
    pub reconnect_interval: Duration,
    pub request_timeout: Duration,
    pub bulk_request_timeout: Duration,
    pub traffic_log_path: Option<PathBuf>,
}

impl DispatcherConfig {
    /// Config for `url` with auto-reconnect off and the default deadlines.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auto_reconnect: false,
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            bulk_request_timeout: Duration::from_millis(DEFAULT_BULK_REQUEST_TIMEOUT_MS),
            traffic_log_path: None,
        }
    }

    /// Reconnects every `reconnect_interval` after an unexpected close.
    pub fn with_auto_reconnect(mut self, reconnect_interval: Duration) -> Self {
        self.auto_reconnect = true;
        self.reconnect_interval = reconnect_interval;
        self
    }

    /// Overrides the deadline for ordinary calls.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Overrides the deadline for bulk calls.
    pub fn with_bulk_request_timeout(mut self, timeout: Duration) -> Self {
        self.bulk_request_timeout = timeout;
        self
    }

    /// Appends every send, reply and lifecycle event to a JSONL file at `path`.
    pub fn with_traffic_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.traffic_log_path = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Per-call knobs. `timeout` wins over the configured deadlines.
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub bulk: bool,
}

impl CallOptions {
    /// Uses the bulk deadline, for calls carrying large attachments.
    pub fn bulk() -> Self {
        Self {
            timeout: None,
            bulk: true,
        }
    }

    /// Uses `timeout` instead of the configured deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            bulk: false,
        }
    }

    fn resolve_timeout(&self, config: &DispatcherConfig) -> Duration {
        match (self.timeout, self.bulk) {
            (Some(timeout), _) => timeout,
            (None, true) => config.bulk_request_timeout,
            (None, false) => config.request_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Lifecycle of the dispatcher's link, observable through [`Dispatcher::subscribe_state`].
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// Frames of one call, written back to back by the link's writer task.
struct OutboundCall {
    message_id: CorrelationId,
    operation: String,
    frames: Vec<Frame>,
}

struct ActiveLink {
    epoch: u64,
    outbox: mpsc::UnboundedSender<OutboundCall>,
    writer: JoinHandle<()>,
}

#[derive(Default)]
struct DispatcherTasks {
    reader: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

struct DispatcherInner {
    config: DispatcherConfig,
    transport: Arc<dyn Transport>,
    state: watch::Sender<ConnectionState>,
    pending: PendingRegistry,
    link: Mutex<Option<ActiveLink>>,
    connect_gate: AsyncMutex<()>,
    epoch: AtomicU64,
    auto_reconnect: AtomicBool,
    reconnect_scheduled: AtomicBool,
    tasks: Mutex<DispatcherTasks>,
    traffic_log: Mutex<Option<TrafficLog>>,
}

impl DispatcherInner {
    fn tasks(&self) -> MutexGuard<'_, DispatcherTasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn link(&self) -> MutexGuard<'_, Option<ActiveLink>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DispatcherInner {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in [tasks.reader.take(), tasks.reconnect.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
        if let Some(link) = self.link.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            link.writer.abort();
        }
    }
}

#[derive(Clone)]
/// Multiplexes correlated calls over one transport link.
///
/// Cloning is cheap; every clone drives the same connection.
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}

impl Dispatcher {
    /// Builds a disconnected dispatcher. Opens the traffic log if configured.
    pub fn new(config: DispatcherConfig, transport: Arc<dyn Transport>) -> Result<Self, DispatchError> {
        let traffic_log = match config.traffic_log_path.as_ref() {
            Some(path) => {
                let log = TrafficLog::open(path).map_err(|error| DispatchError::TrafficLog {
                    path: path.clone(),
                    message: error.to_string(),
                })?;
                log.record("session_started", json!({ "url": config.url }));
                Some(log)
            }
            None => None,
        };
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let auto_reconnect = config.auto_reconnect;
        Ok(Self {
            inner: Arc::new(DispatcherInner {
                config,
                transport,
                state,
                pending: PendingRegistry::default(),
                link: Mutex::new(None),
                connect_gate: AsyncMutex::new(()),
                epoch: AtomicU64::new(0),
                auto_reconnect: AtomicBool::new(auto_reconnect),
                reconnect_scheduled: AtomicBool::new(false),
                tasks: Mutex::new(DispatcherTasks::default()),
                traffic_log: Mutex::new(traffic_log),
            }),
        })
    }

    /// Dispatcher over [`WebSocketTransport`].
    pub fn websocket(config: DispatcherConfig) -> Result<Self, DispatchError> {
        Self::new(config, Arc::new(WebSocketTransport::new()))
    }

    /// Configuration the dispatcher was built with.
    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Current link state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch channel that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Number of calls currently waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Opens the link. A no-op when already connected.
    pub async fn connect(&self) -> Result<(), DispatchError> {
        let _gate = self.inner.connect_gate.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let url = self.inner.config.url.as_str();
        info!(url, "connecting to link endpoint");
        self.inner.state.send_replace(ConnectionState::Connecting);
        let link = match self.inner.transport.open(url).await {
            Ok(link) => link,
            Err(error) => {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                error!(url, %error, "failed to connect to link endpoint");
                return Err(DispatchError::Transport(error));
            }
        };

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (outbox, queued) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_link_writer(
            Arc::downgrade(&self.inner),
            link.sink,
            queued,
            epoch,
        ));
        if let Some(previous) = self.inner.link().replace(ActiveLink {
            epoch,
            outbox,
            writer,
        }) {
            previous.writer.abort();
        }
        self.inner.state.send_replace(ConnectionState::Connected);
        let reader = tokio::spawn(run_link_reader(
            Arc::downgrade(&self.inner),
            link.events,
            epoch,
        ));
        if let Some(previous) = self.inner.tasks().reader.replace(reader) {
            previous.abort();
        }
        info!(url, epoch, "connected to link endpoint");
        self.record_traffic("connected", json!({ "url": url, "epoch": epoch }));
        Ok(())
    }

    /// Tears the link down for good: no further automatic reconnects, every
    /// pending call fails with `ConnectionClosed`, the traffic log is closed.
    pub async fn disconnect(&self) {
        self.inner.auto_reconnect.store(false, Ordering::SeqCst);
        let reconnect = self.inner.tasks().reconnect.take();
        if let Some(reconnect) = reconnect {
            reconnect.abort();
        }

        let _gate = self.inner.connect_gate.lock().await;
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let reader = self.inner.tasks().reader.take();
        if let Some(reader) = reader {
            reader.abort();
        }
        let active = self.inner.link().take();
        self.inner.state.send_replace(ConnectionState::Disconnected);
        let rejected = self.reject_all_pending();

        if let Some(active) = active {
            info!(url = %self.inner.config.url, "disconnecting from link endpoint");
            let ActiveLink {
                outbox, mut writer, ..
            } = active;
            // Closing the outbox lets the writer close the sink once it is idle.
            drop(outbox);
            if tokio::time::timeout(LINK_CLOSE_GRACE, &mut writer)
                .await
                .is_err()
            {
                warn!(
                    url = %self.inner.config.url,
                    grace_ms = LINK_CLOSE_GRACE.as_millis() as u64,
                    "link writer still busy; aborting it"
                );
                writer.abort();
            }
        }
        let traffic_log = self
            .inner
            .traffic_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(traffic_log) = traffic_log {
            traffic_log.record("session_ended", json!({ "rejectedCalls": rejected }));
        }
    }

    /// Sends `envelope` (plus an optional binary attachment) and waits for the
    /// reply with the standard deadline.
    pub async fn call(
        &self,
        envelope: OutboundEnvelope,
        attachment: Option<Vec<u8>>,
    ) -> Result<InboundEnvelope, DispatchError> {
        self.call_with(envelope, attachment, CallOptions::default())
            .await
    }

    /// Like [`Dispatcher::call`], with per-call deadline options. The deadline
    /// covers writing the frames as well as waiting for the reply.
    pub async fn call_with(
        &self,
        envelope: OutboundEnvelope,
        attachment: Option<Vec<u8>>,
        options: CallOptions,
    ) -> Result<InboundEnvelope, DispatchError> {
        let operation = envelope.operation.clone();
        let message_id = envelope.message_id.clone();
        if !self.is_connected() {
            warn!(operation, "call rejected: not connected");
            return Err(DispatchError::NotConnected { operation });
        }

        let encoded = envelope.to_json()?;
        let timeout = options.resolve_timeout(&self.inner.config);
        let deadline = Instant::now() + timeout;
        let (responder, mut response) = oneshot::channel();
        self.inner.pending.register(
            message_id.clone(),
            PendingCall::new(operation.clone(), responder),
        )?;
        let mut slot = PendingSlot::new(&self.inner.pending, message_id.clone());

        let attachment_len = attachment.as_ref().map(Vec::len);
        debug!(
            operation,
            message_id = %message_id,
            attachment_len,
            timeout_ms = timeout.as_millis() as u64,
            "sending call"
        );
        self.record_traffic("send", send_summary(&envelope, attachment_len));

        let mut frames = vec![Frame::Text(encoded)];
        frames.extend(attachment.map(Frame::Binary));
        let queued = self.enqueue_call(OutboundCall {
            message_id: message_id.clone(),
            operation: operation.clone(),
            frames,
        });
        if let Err(source) = queued {
            error!(operation, message_id = %message_id, %source, "failed to send call");
            return Err(DispatchError::Send {
                operation,
                message_id: Some(message_id),
                source,
            });
        }

        let waited = tokio::time::timeout_at(deadline, &mut response).await;
        let outcome = match waited {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(DispatchError::ConnectionClosed {
                operation,
                message_id: Some(message_id),
            }),
            Err(_elapsed) => {
                if self.inner.pending.take(&message_id).is_some() {
                    warn!(
                        operation,
                        message_id = %message_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "call timed out"
                    );
                    Err(DispatchError::Timeout {
                        operation,
                        message_id: Some(message_id),
                        timeout,
                    })
                } else {
                    // Another path removed the entry first and is settling it.
                    response.await.unwrap_or(Err(DispatchError::ConnectionClosed {
                        operation,
                        message_id: Some(message_id),
                    }))
                }
            }
        };
        slot.disarm();
        outcome
    }

    fn enqueue_call(&self, call: OutboundCall) -> Result<(), TransportError> {
        let link = self.inner.link();
        let Some(link) = link.as_ref() else {
            return Err(TransportError::Closed);
        };
        link.outbox.send(call).map_err(|_| TransportError::Closed)
    }

    fn handle_frame(&self, frame: Frame) {
        let frame_len = frame.len();
        let Some(text) = frame.into_text() else {
            warn!(frame_len, "dropping non-UTF-8 binary frame");
            return;
        };
        let envelope = match parse_inbound_envelope(&text) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(frame_len, %error, "failed to parse inbound frame");
                return;
            }
        };

        debug!(
            kind = envelope.kind,
            message_id = %envelope.source_message_id,
            success = envelope.success,
            "received reply"
        );
        self.record_traffic(
            "recv",
            json!({
                "kind": envelope.kind,
                "messageId": envelope.source_message_id,
                "success": envelope.success,
                "errorInfo": envelope.error_info,
            }),
        );
        if !envelope.success {
            warn!(
                message_id = %envelope.source_message_id,
                error_info = envelope.error_info.as_deref().unwrap_or(""),
                "link reported failure for call"
            );
        }

        match self.inner.pending.take(&envelope.source_message_id) {
            Some(call) => {
                debug!(
                    operation = %call.operation,
                    elapsed_ms = call.issued_at.elapsed().as_millis() as u64,
                    "call settled"
                );
                let message_id = envelope.source_message_id.clone();
                if !call.settle(Ok(envelope)) {
                    debug!(message_id = %message_id, "caller went away before its reply");
                }
            }
            None => debug!(
                message_id = %envelope.source_message_id,
                "no pending call for reply; dropping"
            ),
        }
    }

    fn handle_transport_error(&self, epoch: u64, detail: &str) {
        error!(epoch, detail, "link transport error");
        self.record_traffic("transport_error", json!({ "epoch": epoch, "detail": detail }));
    }

    fn handle_close(&self, epoch: u64) {
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            debug!(epoch, "ignoring close of superseded link");
            return;
        }
        let closed = {
            let mut link = self.inner.link();
            if link.as_ref().is_some_and(|link| link.epoch == epoch) {
                link.take()
            } else {
                None
            }
        };
        if let Some(closed) = closed {
            closed.writer.abort();
        }
        self.inner.state.send_replace(ConnectionState::Disconnected);
        let rejected = self.reject_all_pending();
        warn!(url = %self.inner.config.url, epoch, rejected, "link connection closed");
        self.record_traffic(
            "connection_closed",
            json!({ "epoch": epoch, "rejectedCalls": rejected }),
        );

        if self.inner.auto_reconnect.load(Ordering::SeqCst)
            && !self.inner.reconnect_scheduled.swap(true, Ordering::SeqCst)
        {
            self.spawn_reconnect_loop();
        }
    }

    fn spawn_reconnect_loop(&self) {
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.config.reconnect_interval;
        let task = tokio::spawn(async move {
            let mut attempt = 0_u64;
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let dispatcher = Dispatcher { inner };
                if !dispatcher.inner.auto_reconnect.load(Ordering::SeqCst) {
                    dispatcher
                        .inner
                        .reconnect_scheduled
                        .store(false, Ordering::SeqCst);
                    return;
                }
                attempt = attempt.saturating_add(1);
                info!(attempt, "attempting automatic reconnect");
                match dispatcher.connect().await {
                    Ok(()) => {
                        dispatcher
                            .inner
                            .reconnect_scheduled
                            .store(false, Ordering::SeqCst);
                        if dispatcher.is_connected()
                            || !dispatcher.inner.auto_reconnect.load(Ordering::SeqCst)
                        {
                            return;
                        }
                        // The new link dropped before the flag was cleared.
                        if dispatcher
                            .inner
                            .reconnect_scheduled
                            .swap(true, Ordering::SeqCst)
                        {
                            return;
                        }
                    }
                    Err(error) => warn!(attempt, %error, "automatic reconnect failed"),
                }
            }
        });
        if let Some(previous) = self.inner.tasks().reconnect.replace(task) {
            if !previous.is_finished() {
                debug!("replacing still-running reconnect task");
            }
        }
    }

    fn reject_all_pending(&self) -> usize {
        let drained = self.inner.pending.drain();
        let rejected = drained.len();
        for (message_id, call) in drained {
            let operation = call.operation.clone();
            call.settle(Err(DispatchError::ConnectionClosed {
                operation,
                message_id: Some(message_id),
            }));
        }
        rejected
    }

    fn record_traffic(&self, event: &str, fields: Value) {
        let traffic_log = self
            .inner
            .traffic_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(traffic_log) = traffic_log {
            traffic_log.record(event, fields);
        }
    }
}

fn send_summary(envelope: &OutboundEnvelope, attachment_len: Option<usize>) -> Value {
    let mut summary = serde_json::Map::new();
    summary.insert(
        "operation".to_string(),
        Value::String(envelope.operation.clone()),
    );
    summary.insert(
        "messageId".to_string(),
        Value::String(envelope.message_id.to_string()),
    );
    for key in ["slotId", "componentType", "containerSlotId", "componentId", "filePath"] {
        if let Some(value) = envelope.fields.get(key) {
            summary.insert(key.to_string(), value.clone());
        }
    }
    if let Some(len) = attachment_len {
        summary.insert("attachmentLen".to_string(), Value::from(len));
    }
    Value::Object(summary)
}

async fn run_link_reader(
    inner: Weak<DispatcherInner>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    epoch: u64,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let dispatcher = Dispatcher { inner };
        match event {
            TransportEvent::Message(frame) => dispatcher.handle_frame(frame),
            TransportEvent::Error(detail) => dispatcher.handle_transport_error(epoch, &detail),
            TransportEvent::Closed => {
                dispatcher.handle_close(epoch);
                return;
            }
        }
    }
    if let Some(inner) = inner.upgrade() {
        Dispatcher { inner }.handle_close(epoch);
    }
}

/// Owns the sink of one link and writes queued calls in order. A failed write
/// settles that call's entry with `DispatchError::Send`.
async fn run_link_writer(
    inner: Weak<DispatcherInner>,
    mut sink: Box<dyn FrameSink>,
    mut queued: mpsc::UnboundedReceiver<OutboundCall>,
    epoch: u64,
) {
    while let Some(call) = queued.recv().await {
        let still_pending = inner
            .upgrade()
            .is_some_and(|inner| inner.pending.contains(&call.message_id));
        if !still_pending {
            debug!(epoch, message_id = %call.message_id, "skipping write of settled call");
            continue;
        }
        let Err(source) = write_frames(sink.as_mut(), call.frames).await else {
            continue;
        };
        error!(
            epoch,
            operation = %call.operation,
            message_id = %call.message_id,
            %source,
            "failed to send call"
        );
        let entry = inner
            .upgrade()
            .and_then(|inner| inner.pending.take(&call.message_id));
        if let Some(entry) = entry {
            entry.settle(Err(DispatchError::Send {
                operation: call.operation,
                message_id: Some(call.message_id),
                source,
            }));
        }
    }
    if let Err(error) = sink.close().await {
        debug!(epoch, %error, "error while closing link");
    }
}

async fn write_frames(sink: &mut dyn FrameSink, frames: Vec<Frame>) -> Result<(), TransportError> {
    for frame in frames {
        sink.send(frame).await?;
    }
    Ok(())
}
