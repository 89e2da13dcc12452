//! Convenience lookups over `getSlot` replies.
//!
//! Slot payloads stay untyped: a slot is a JSON object whose name sits at
//! `name.value` and whose child slots sit in `children`.

use serde_json::Value;
use tracing::debug;

use crate::{
    requests::{self, ROOT_SLOT_ID},
    DispatchError, Dispatcher, InboundEnvelope,
};

/// Depth that asks for the whole subtree.
pub const UNLIMITED_DEPTH: i64 = -1;
/// Depth used by hierarchy lookups unless the caller asks for more.
pub const DEFAULT_HIERARCHY_DEPTH: i64 = 1;

/// Fetches the scene root.
pub async fn get_root_slot(
    dispatcher: &Dispatcher,
    depth: i64,
    include_component_data: bool,
) -> Result<InboundEnvelope, DispatchError> {
    requests::get_slot(ROOT_SLOT_ID, depth, include_component_data)
        .send(dispatcher)
        .await
}

/// Fetches the subtree under `start_slot_id` and returns the first slot named
/// `name` in depth-first pre-order. `None` when nothing matches or the link
/// reports failure for the lookup.
pub async fn find_slot_by_name(
    dispatcher: &Dispatcher,
    name: &str,
    start_slot_id: Option<&str>,
    depth: i64,
) -> Result<Option<Value>, DispatchError> {
    let start_slot_id = start_slot_id.unwrap_or(ROOT_SLOT_ID);
    let reply = requests::get_slot(start_slot_id, depth, false)
        .send(dispatcher)
        .await?;
    if !reply.success {
        debug!(start_slot_id, error_info = ?reply.error_info, "slot search start not found");
        return Ok(None);
    }
    Ok(reply
        .field("data")
        .and_then(|root| find_named_slot(root, name))
        .cloned())
}

/// Fetches `slot_id` with component data. `None` when the link reports failure.
pub async fn get_slot_hierarchy(
    dispatcher: &Dispatcher,
    slot_id: &str,
    depth: i64,
) -> Result<Option<Value>, DispatchError> {
    let reply = requests::get_slot(slot_id, depth, true)
        .send(dispatcher)
        .await?;
    if !reply.success {
        return Ok(None);
    }
    Ok(reply.field("data").cloned())
}

/// Depth-first pre-order search of an already fetched slot tree.
pub fn find_named_slot<'a>(slot: &'a Value, name: &str) -> Option<&'a Value> {
    if slot_name(slot) == Some(name) {
        return Some(slot);
    }
    slot.get("children")
        .and_then(Value::as_array)?
        .iter()
        .find_map(|child| find_named_slot(child, name))
}

fn slot_name(slot: &Value) -> Option<&str> {
    slot.get("name")?.get("value")?.as_str()
}

#[cfg(test)]
mod tests;
