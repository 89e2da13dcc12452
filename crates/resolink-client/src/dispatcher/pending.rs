use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use tokio::sync::oneshot;

use crate::{CorrelationId, DispatchError, InboundEnvelope};

pub(super) type CallOutcome = Result<InboundEnvelope, DispatchError>;

pub(super) struct PendingCall {
    pub(super) operation: String,
    pub(super) issued_at: Instant,
    responder: oneshot::Sender<CallOutcome>,
}

impl PendingCall {
    pub(super) fn new(operation: String, responder: oneshot::Sender<CallOutcome>) -> Self {
        Self {
            operation,
            issued_at: Instant::now(),
            responder,
        }
    }

    /// Delivers the outcome; `false` if the caller has already gone away.
    pub(super) fn settle(self, outcome: CallOutcome) -> bool {
        self.responder.send(outcome).is_ok()
    }
}

/// In-flight calls keyed by correlation id.
///
/// Removing an entry is what settles it: whichever path takes the entry out
/// (reply, deadline, close, abandoned caller) is the only one allowed to
/// complete the call.
#[derive(Default)]
pub(super) struct PendingRegistry {
    calls: Mutex<HashMap<CorrelationId, PendingCall>>,
}

impl PendingRegistry {
    fn calls(&self) -> MutexGuard<'_, HashMap<CorrelationId, PendingCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn register(
        &self,
        message_id: CorrelationId,
        call: PendingCall,
    ) -> Result<(), DispatchError> {
        let mut calls = self.calls();
        if calls.contains_key(&message_id) {
            return Err(DispatchError::DuplicateCorrelationId { message_id });
        }
        calls.insert(message_id, call);
        Ok(())
    }

    pub(super) fn take(&self, message_id: &CorrelationId) -> Option<PendingCall> {
        self.calls().remove(message_id)
    }

    pub(super) fn contains(&self, message_id: &CorrelationId) -> bool {
        self.calls().contains_key(message_id)
    }

    pub(super) fn drain(&self) -> Vec<(CorrelationId, PendingCall)> {
        self.calls().drain().collect()
    }

    pub(super) fn len(&self) -> usize {
        self.calls().len()
    }
}

/// Removes the caller's entry if the call future is dropped before it settles.
pub(super) struct PendingSlot<'a> {
    registry: &'a PendingRegistry,
    message_id: CorrelationId,
    armed: bool,
}

impl<'a> PendingSlot<'a> {
    pub(super) fn new(registry: &'a PendingRegistry, message_id: CorrelationId) -> Self {
        Self {
            registry,
            message_id,
            armed: true,
        }
    }

    pub(super) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if self.armed && self.registry.take(&self.message_id).is_some() {
            tracing::debug!(message_id = %self.message_id, "released pending entry of abandoned call");
        }
    }
}
