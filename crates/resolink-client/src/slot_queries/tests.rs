use std::sync::Arc;

use serde_json::{json, Value};

use super::{
    find_named_slot, find_slot_by_name, get_root_slot, get_slot_hierarchy, DEFAULT_HIERARCHY_DEPTH,
    UNLIMITED_DEPTH,
};
use crate::{channel_transport, ChannelPeer, Dispatcher, DispatcherConfig, OutboundEnvelope};

fn scene() -> Value {
    json!({
        "id": "Root",
        "name": {"value": "Root"},
        "children": [
            {
                "id": "S1",
                "name": {"value": "Table"},
                "children": [
                    {"id": "S2", "name": {"value": "Lamp"}, "children": []},
                ],
            },
            {"id": "S3", "name": {"value": "Lamp"}},
            {"id": "S4"},
        ],
    })
}

async fn connected() -> (Dispatcher, ChannelPeer) {
    let (transport, mut acceptor) = channel_transport();
    let dispatcher = Dispatcher::new(DispatcherConfig::new("mem://link"), Arc::new(transport))
        .expect("dispatcher");
    dispatcher.connect().await.expect("connect");
    let peer = acceptor.accept().await.expect("peer");
    (dispatcher, peer)
}

/// Answers the next `getSlot` with `data`, or with a failure when `data` is null.
fn answer_next_get_slot(
    mut peer: ChannelPeer,
    data: Value,
) -> tokio::task::JoinHandle<OutboundEnvelope> {
    tokio::spawn(async move {
        let text = peer
            .recv()
            .await
            .and_then(|frame| frame.into_text())
            .expect("text envelope");
        let sent: OutboundEnvelope = serde_json::from_str(&text).expect("envelope");
        let reply = if data.is_null() {
            json!({
                "$type": "slotData",
                "sourceMessageId": sent.message_id,
                "success": false,
                "errorInfo": "slot not found",
            })
        } else {
            json!({
                "$type": "slotData",
                "sourceMessageId": sent.message_id,
                "success": true,
                "data": data,
            })
        };
        assert!(peer.send_text(reply.to_string()));
        sent
    })
}

#[test]
fn unit_named_slot_search_is_depth_first_pre_order() {
    let scene = scene();
    let lamp = find_named_slot(&scene, "Lamp").expect("lamp");
    assert_eq!(lamp["id"], "S2");
    assert_eq!(find_named_slot(&scene, "Root").expect("root")["id"], "Root");
    assert!(find_named_slot(&scene, "Chair").is_none());
}

#[test]
fn unit_named_slot_search_tolerates_missing_names_and_children() {
    let unnamed = json!({"id": "S9", "children": "not a list"});
    assert!(find_named_slot(&unnamed, "S9").is_none());
}

#[tokio::test]
async fn functional_find_slot_by_name_walks_whole_tree_from_root() {
    let (dispatcher, peer) = connected().await;
    let remote = answer_next_get_slot(peer, scene());

    let found = find_slot_by_name(&dispatcher, "Table", None, UNLIMITED_DEPTH)
        .await
        .expect("reply");
    assert_eq!(found.expect("table")["id"], "S1");

    let sent = remote.await.expect("remote");
    assert_eq!(sent.operation, "getSlot");
    assert_eq!(sent.fields.get("slotId"), Some(&json!("Root")));
    assert_eq!(sent.fields.get("depth"), Some(&json!(-1)));
    assert_eq!(sent.fields.get("includeComponentData"), Some(&json!(false)));
}

#[tokio::test]
async fn regression_find_slot_by_name_returns_none_on_failure_reply() {
    let (dispatcher, peer) = connected().await;
    let remote = answer_next_get_slot(peer, Value::Null);

    let found = find_slot_by_name(&dispatcher, "Table", Some("S404"), 2)
        .await
        .expect("reply");
    assert!(found.is_none());
    let sent = remote.await.expect("remote");
    assert_eq!(sent.fields.get("slotId"), Some(&json!("S404")));
}

#[tokio::test]
async fn functional_slot_hierarchy_includes_component_data() {
    let (dispatcher, peer) = connected().await;
    let remote = answer_next_get_slot(peer, json!({"id": "S1", "components": []}));

    let hierarchy = get_slot_hierarchy(&dispatcher, "S1", DEFAULT_HIERARCHY_DEPTH)
        .await
        .expect("reply");
    assert_eq!(hierarchy, Some(json!({"id": "S1", "components": []})));

    let sent = remote.await.expect("remote");
    assert_eq!(sent.fields.get("depth"), Some(&json!(1)));
    assert_eq!(sent.fields.get("includeComponentData"), Some(&json!(true)));
}

#[tokio::test]
async fn unit_slot_hierarchy_is_none_when_slot_is_missing() {
    let (dispatcher, peer) = connected().await;
    answer_next_get_slot(peer, Value::Null);

    let hierarchy = get_slot_hierarchy(&dispatcher, "gone", DEFAULT_HIERARCHY_DEPTH)
        .await
        .expect("reply");
    assert!(hierarchy.is_none());
}

#[tokio::test]
async fn unit_root_slot_targets_root() {
    let (dispatcher, peer) = connected().await;
    let remote = answer_next_get_slot(peer, scene());

    let reply = get_root_slot(&dispatcher, 0, false).await.expect("reply");
    assert!(reply.success);
    assert_eq!(reply.field("data").map(|data| &data["id"]), Some(&json!("Root")));
    let sent = remote.await.expect("remote");
    assert_eq!(sent.fields.get("slotId"), Some(&json!("Root")));
    assert_eq!(sent.fields.get("depth"), Some(&json!(0)));
}
