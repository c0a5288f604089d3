// Event channel against an in-process WebSocket server.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use nanocas_view_client::{Envelope, EventChannel};
use nanocas_view_types::{names, InboundEvent, OutboundEvent};
use serde_json::json;
use tokio::sync::mpsc;

/// Minimal stand-in for the analysis server's notification handlers.
async fn ws_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(handle_socket)
}

async fn handle_socket(socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    while let Some(Ok(msg)) = stream.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(frame) = serde_json::from_str::<Envelope>(text.as_str()) else {
            continue;
        };
        let project_id = frame.data["projectId"].clone();
        let reply = match (frame.ack, frame.event.as_str()) {
            (Some(ack), event) => Envelope {
                event: event.to_owned(),
                data: json!({ "received": event }),
                ack: Some(ack),
            },
            (None, names::CHECK_LISTENER) => Envelope::new(
                names::LISTENER_STATUS,
                json!({ "projectId": project_id, "is_running": false }),
            ),
            (None, names::START_LISTENER) => Envelope::new(
                names::LISTENER_STARTED,
                json!({ "projectId": project_id }),
            ),
            (None, names::REMOVE_ANALYSIS) => Envelope::new(
                names::ANALYSIS_REMOVED,
                json!({ "success": true, "message": "Analysis removed successfully" }),
            ),
            _ => continue,
        };
        let text = serde_json::to_string(&reply).unwrap();
        if sink.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
}

async fn spawn_server() -> String {
    let app = Router::new().route("/ws", get(ws_handler));
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

async fn next(rx: &mut mpsc::UnboundedReceiver<InboundEvent>) -> InboundEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no notification within 5s")
        .expect("handler dropped")
}

#[tokio::test]
async fn status_query_round_trip() {
    let channel = EventChannel::connect(spawn_server().await);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = channel.subscribe(names::LISTENER_STATUS, move |event| {
        let _ = tx.send(event.clone());
    });

    // Queued until the socket is up.
    channel
        .emit(&OutboundEvent::CheckListener {
            project_id: "p1".into(),
        })
        .unwrap();

    assert_eq!(
        next(&mut rx).await,
        InboundEvent::ListenerStatus {
            project_id: "p1".into(),
            is_running: false
        }
    );
}

#[tokio::test]
async fn notifications_arrive_in_emission_order() {
    let channel = EventChannel::connect(spawn_server().await);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let status_tx = tx.clone();
    let _status = channel.subscribe(names::LISTENER_STATUS, move |event| {
        let _ = status_tx.send(event.clone());
    });
    let _started = channel.subscribe(names::LISTENER_STARTED, move |event| {
        let _ = tx.send(event.clone());
    });

    channel
        .emit(&OutboundEvent::CheckListener {
            project_id: "p1".into(),
        })
        .unwrap();
    channel
        .emit(&OutboundEvent::StartListener {
            project_id: "p1".into(),
            source_path: "/data/run1".into(),
        })
        .unwrap();

    assert_eq!(next(&mut rx).await.name(), names::LISTENER_STATUS);
    assert_eq!(next(&mut rx).await.name(), names::LISTENER_STARTED);
}

#[tokio::test]
async fn emit_with_ack_over_socket() {
    let channel = EventChannel::connect(spawn_server().await);
    let reply = tokio::time::timeout(
        Duration::from_secs(5),
        channel.emit_with_ack(&OutboundEvent::StopListener {
            project_id: "p1".into(),
        }),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(reply, json!({ "received": names::STOP_LISTENER }));
}

#[tokio::test]
async fn connect_failure_dispatches_connect_error() {
    let unused = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", unused.local_addr().unwrap());
    drop(unused);

    let channel = EventChannel::connect(url);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = channel.subscribe(names::CONNECT_ERROR, move |event| {
        let _ = tx.send(event.clone());
    });

    assert!(matches!(next(&mut rx).await, InboundEvent::ConnectError { .. }));

    // The transport is gone; later emissions fail instead of queueing.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(channel.is_closed());
}
