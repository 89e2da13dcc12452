use std::{net::SocketAddr, time::Duration};

use futures_util::{SinkExt, StreamExt};
use resolink_camera::{CameraClient, CameraClientConfig, CameraPose};
use resolink_client::{
    requests, ConnectionState, DispatchError, Dispatcher, DispatcherConfig, SingleShotClient,
};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};

async fn spawn_server<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(tokio_tungstenite::WebSocketStream<TcpStream>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let socket = accept_async(stream).await.expect("websocket handshake");
            tokio::spawn(handler(socket));
        }
    });
    addr
}

/// Link endpoint: answers every envelope, pairing raw texture imports with the
/// binary frame that follows them. `crash` removals close the socket instead.
async fn serve_link_endpoint(mut socket: tokio_tungstenite::WebSocketStream<TcpStream>) {
    while let Some(Ok(message)) = socket.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let request: Value = serde_json::from_str(text.as_str()).expect("request json");
        let message_id = request["messageId"].clone();
        let reply = match request["$type"].as_str().unwrap_or_default() {
            "importTexture2DRawData" => {
                let Some(Ok(Message::Binary(pixels))) = socket.next().await else {
                    panic!("attachment must follow its envelope");
                };
                json!({
                    "$type": "assetData",
                    "sourceMessageId": message_id,
                    "success": true,
                    "assetURL": format!("local://texture/{}", pixels.len()),
                })
            }
            "removeSlot" if request["slotId"] == "crash" => {
                socket.close(None).await.expect("close");
                return;
            }
            "getSlot" if request["slotId"] == "missing" => json!({
                "$type": "slotData",
                "sourceMessageId": message_id,
                "success": false,
                "errorInfo": "slot not found",
            }),
            "getSlot" => json!({
                "$type": "slotData",
                "sourceMessageId": message_id,
                "success": true,
                "data": {"id": request["slotId"]},
            }),
            _ => json!({
                "$type": "response",
                "sourceMessageId": message_id,
                "success": true,
            }),
        };
        socket
            .send(Message::Text(reply.to_string().into()))
            .await
            .expect("send reply");
    }
}

/// Camera relay: echoes each command before answering it.
async fn serve_camera_relay(mut socket: tokio_tungstenite::WebSocketStream<TcpStream>) {
    while let Some(Ok(message)) = socket.next().await {
        let Message::Text(command) = message else {
            continue;
        };
        let command = command.as_str().to_string();
        socket
            .send(Message::Text(command.clone().into()))
            .await
            .expect("echo");
        let reply = if command == "getCamera()" {
            json!({"cameraAvailable": true})
        } else if command.starts_with("setCamera(") {
            json!({"success": true, "command": command})
        } else if command == "takePhoto()" {
            json!({"uploadedImageUrl": "URL:https://img.example/relay.webp"})
        } else {
            json!({"error": "unknown command"})
        };
        socket
            .send(Message::Text(reply.to_string().into()))
            .await
            .expect("reply");
    }
}

#[tokio::test]
async fn integration_dispatcher_roundtrips_over_real_websocket() {
    let addr = spawn_server(serve_link_endpoint).await;
    let dispatcher =
        Dispatcher::websocket(DispatcherConfig::new(format!("ws://{addr}"))).expect("dispatcher");
    dispatcher.connect().await.expect("connect");

    let (root, missing, texture) = tokio::join!(
        requests::get_slot(requests::ROOT_SLOT_ID, 1, false).send(&dispatcher),
        requests::get_slot("missing", 0, false).send(&dispatcher),
        requests::import_texture_2d_raw_data(4, 4, None, vec![128; 64]).send(&dispatcher),
    );

    let root = root.expect("root reply");
    assert!(root.success);
    assert_eq!(root.field("data"), Some(&json!({"id": "Root"})));
    let missing = missing.expect("missing reply");
    assert!(!missing.success);
    assert_eq!(missing.error_info.as_deref(), Some("slot not found"));
    let texture = texture.expect("texture reply");
    assert_eq!(texture.field("assetURL"), Some(&json!("local://texture/64")));

    assert_eq!(dispatcher.pending_calls(), 0);
    dispatcher.disconnect().await;
    assert!(!dispatcher.is_connected());
}

#[tokio::test]
async fn integration_server_close_rejects_pending_call() {
    let addr = spawn_server(serve_link_endpoint).await;
    let dispatcher =
        Dispatcher::websocket(DispatcherConfig::new(format!("ws://{addr}"))).expect("dispatcher");
    dispatcher.connect().await.expect("connect");

    let error = requests::remove_slot("crash")
        .send(&dispatcher)
        .await
        .expect_err("socket closed");
    assert!(matches!(error, DispatchError::ConnectionClosed { .. }));
    assert_eq!(dispatcher.pending_calls(), 0);
}

#[tokio::test]
async fn integration_auto_reconnect_recovers_after_server_close() {
    let addr = spawn_server(serve_link_endpoint).await;
    let config = DispatcherConfig::new(format!("ws://{addr}"))
        .with_auto_reconnect(Duration::from_millis(50));
    let dispatcher = Dispatcher::websocket(config).expect("dispatcher");
    dispatcher.connect().await.expect("connect");

    let error = requests::remove_slot("crash")
        .send(&dispatcher)
        .await
        .expect_err("socket closed");
    assert!(error.is_retryable());

    tokio::time::timeout(Duration::from_secs(5), async {
        dispatcher
            .subscribe_state()
            .wait_for(|state| *state == ConnectionState::Connected)
            .await
            .expect("state channel");
    })
    .await
    .expect("reconnected in time");

    let reply = requests::get_slot("after", 0, false)
        .send(&dispatcher)
        .await
        .expect("reply after reconnect");
    assert!(reply.success);
    dispatcher.disconnect().await;
}

#[tokio::test]
async fn integration_single_shot_skips_real_echo() {
    let addr = spawn_server(serve_camera_relay).await;
    let client = SingleShotClient::websocket(format!("ws://{addr}"));

    let reply = client
        .request("getCamera()", Duration::from_secs(5))
        .await
        .expect("reply");
    assert_eq!(reply, json!({"cameraAvailable": true}));
}

#[tokio::test]
async fn integration_camera_client_drives_relay() {
    let addr = spawn_server(serve_camera_relay).await;
    let client = CameraClient::new(CameraClientConfig {
        url: format!("ws://{addr}"),
        timeout: Duration::from_secs(5),
    });

    assert!(client.get_camera().await.expect("status").camera_available);
    let ack = client
        .set_camera(CameraPose {
            x: 1.0,
            y: 2.0,
            z: 3.0,
            xrot: 0.0,
            yrot: 90.0,
            zrot: 0.0,
        })
        .await
        .expect("ack");
    assert!(ack.success);
    assert_eq!(
        ack.extra.get("command"),
        Some(&json!("setCamera(1, 2, 3, 0, 90, 0)"))
    );
    let capture = client.take_photo().await.expect("photo");
    assert_eq!(capture.uploaded_image_url, "https://img.example/relay.webp");
}
