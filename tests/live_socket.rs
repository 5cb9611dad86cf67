//! End-to-end tests of the hub against a local axum WebSocket server.

#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};

use ws_hub::domain::LifecycleEvent;
use ws_hub::{
    ConnectionHub, ConnectionState, EndpointResolver, PageLocation, StaticLocation, Subscriber,
    TungsteniteFactory, subscriber,
};

const WAIT: Duration = Duration::from_secs(5);

async fn ws_route(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(serve_socket)
}

/// Answers each request with a canned prediction.
///
/// `"garbage"` is preceded by a malformed frame; `"bye"` makes the server
/// close the socket.
async fn serve_socket(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        let input = request
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        match input.as_str() {
            "bye" => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            "garbage" => {
                if socket.send(Message::text("not json".to_string())).await.is_err() {
                    return;
                }
            }
            _ => {}
        }

        let reply = json!({
            "input": input,
            "context": request.get("additional_context").cloned().unwrap_or(Value::Null),
            "label": "positive",
        });
        if socket.send(Message::text(reply.to_string())).await.is_err() {
            return;
        }
    }
}

/// Closes right after the upgrade, then reports whether the client answered
/// with its own close frame before the stream ended.
async fn close_and_report(mut socket: WebSocket, acked: mpsc::UnboundedSender<bool>) {
    if socket.send(Message::Close(None)).await.is_err() {
        let _ = acked.send(false);
        return;
    }
    let mut saw_reply = false;
    while let Some(Ok(msg)) = socket.recv().await {
        if matches!(msg, Message::Close(_)) {
            saw_reply = true;
        }
    }
    let _ = acked.send(saw_reply);
}

async fn start_server() -> SocketAddr {
    start_server_with_close_report(mpsc::unbounded_channel().0).await
}

/// Serves `/api/ws` plus `/closing/api/ws`, whose sockets report the close
/// handshake outcome on `acked`.
async fn start_server_with_close_report(acked: mpsc::UnboundedSender<bool>) -> SocketAddr {
    let closing = get(move |ws: WebSocketUpgrade| {
        let acked = acked.clone();
        async move { ws.on_upgrade(move |socket| close_and_report(socket, acked)) }
    });
    let app = Router::new()
        .route("/api/ws", get(ws_route))
        .route("/closing/api/ws", closing);
    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("failed to bind test listener");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("listener has no address");
    };
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}

fn channel_subscriber() -> (Subscriber, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = subscriber(move |message| {
        tx.send(message.clone())?;
        Ok(())
    });
    (callback, rx)
}

async fn next_event(events: &mut broadcast::Receiver<LifecycleEvent>) -> LifecycleEvent {
    let Ok(Ok(event)) = tokio::time::timeout(WAIT, events.recv()).await else {
        panic!("no lifecycle event within {WAIT:?}");
    };
    event
}

async fn next_message(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    let Ok(Some(message)) = tokio::time::timeout(WAIT, rx.recv()).await else {
        panic!("no message within {WAIT:?}");
    };
    message
}

fn new_hub() -> ConnectionHub {
    ConnectionHub::new(Arc::new(TungsteniteFactory::new()))
}

#[tokio::test]
async fn prediction_round_trip() {
    let addr = start_server().await;
    let hub = new_hub();
    let mut events = hub.events();
    let (cb, mut rx) = channel_subscriber();

    assert!(hub.connect(&format!("ws://{addr}"), Some(cb)).is_ok());
    let LifecycleEvent::Connected { url, .. } = next_event(&mut events).await else {
        panic!("expected connected event");
    };
    assert_eq!(url, format!("ws://{addr}/api/ws"));
    assert_eq!(hub.connection_state(), ConnectionState::Open);

    assert!(hub.send_text("great movie", "review").is_ok());
    let reply = next_message(&mut rx).await;

    assert_eq!(reply.get("input"), Some(&json!("great movie")));
    assert_eq!(reply.get("context"), Some(&json!("review")));
    assert_eq!(hub.last_message(), Some(reply));
}

#[tokio::test]
async fn malformed_frame_is_skipped() {
    let addr = start_server().await;
    let hub = new_hub();
    let mut events = hub.events();
    let (cb, mut rx) = channel_subscriber();

    assert!(hub.connect(&format!("ws://{addr}"), Some(cb)).is_ok());
    next_event(&mut events).await;

    assert!(hub.send_text("garbage", "").is_ok());
    let reply = next_message(&mut rx).await;
    assert_eq!(reply.get("input"), Some(&json!("garbage")));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn server_close_resets_hub() {
    let addr = start_server().await;
    let hub = new_hub();
    let mut events = hub.events();
    let (cb, mut rx) = channel_subscriber();

    assert!(hub.connect(&format!("ws://{addr}"), Some(cb)).is_ok());
    next_event(&mut events).await;
    assert!(hub.send_text("hello", "").is_ok());
    next_message(&mut rx).await;

    assert!(hub.send_text("bye", "").is_ok());
    let closed = next_event(&mut events).await;
    assert_eq!(closed.event_type_str(), "disconnected");

    assert_eq!(hub.connection_state(), ConnectionState::Absent);
    assert_eq!(hub.subscriber_count(), 0);
    assert_eq!(hub.last_message(), None);
    assert!(hub.send_text("again", "").is_err());

    // A fresh connection works and the old subscriber stays detached.
    assert!(hub.connect(&format!("ws://{addr}"), None).is_ok());
    next_event(&mut events).await;
    assert!(hub.send_text("again", "").is_ok());
    let (cb2, mut rx2) = channel_subscriber();
    hub.subscribe(cb2, true);
    next_message(&mut rx2).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn client_close_reports_normal_closure() {
    let addr = start_server().await;
    let hub = new_hub();
    let mut events = hub.events();

    assert!(hub.connect(&format!("ws://{addr}"), None).is_ok());
    next_event(&mut events).await;

    hub.close();
    let LifecycleEvent::Disconnected { code, .. } = next_event(&mut events).await else {
        panic!("expected disconnected event");
    };
    assert_eq!(code, Some(1000));
    assert_eq!(hub.connection_state(), ConnectionState::Absent);
}

#[tokio::test]
async fn unreachable_endpoint_reports_error_then_close() {
    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("failed to bind test listener");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("listener has no address");
    };
    drop(listener);

    let hub = new_hub();
    let mut events = hub.events();
    assert!(hub.connect(&format!("ws://{addr}"), None).is_ok());

    assert_eq!(next_event(&mut events).await.event_type_str(), "transport_error");
    assert_eq!(next_event(&mut events).await.event_type_str(), "disconnected");
    assert_eq!(hub.connection_state(), ConnectionState::Absent);
}

#[tokio::test]
async fn server_initiated_close_is_acknowledged() {
    let (acked_tx, mut acked_rx) = mpsc::unbounded_channel();
    let addr = start_server_with_close_report(acked_tx).await;
    let hub = new_hub();
    let mut events = hub.events();

    assert!(hub.connect(&format!("ws://{addr}/closing"), None).is_ok());
    assert_eq!(next_event(&mut events).await.event_type_str(), "connected");
    assert_eq!(next_event(&mut events).await.event_type_str(), "disconnected");

    let Ok(Some(acked)) = tokio::time::timeout(WAIT, acked_rx.recv()).await else {
        panic!("server never finished the socket");
    };
    assert!(acked, "client dropped the socket without a close reply");
    assert_eq!(hub.connection_state(), ConnectionState::Absent);
}

#[tokio::test]
async fn secure_page_reaches_tls_handshake() {
    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("failed to bind test listener");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("listener has no address");
    };
    // Plain TCP peer: accepts, then hangs up mid TLS handshake.
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });

    let page = PageLocation::new("https:", "127.0.0.1", Some(addr.port()));
    let base = EndpointResolver::new(StaticLocation::new(page)).resolve_url();
    assert_eq!(base, format!("wss://{addr}"));

    let hub = new_hub();
    let mut events = hub.events();
    assert!(hub.connect(&base, None).is_ok());

    let LifecycleEvent::TransportError { message, .. } = next_event(&mut events).await else {
        panic!("expected transport error");
    };
    assert!(
        !message.contains("TLS support not compiled in"),
        "wss rejected before any TLS attempt: {message}"
    );
    assert_eq!(next_event(&mut events).await.event_type_str(), "disconnected");
    assert_eq!(hub.connection_state(), ConnectionState::Absent);
}
