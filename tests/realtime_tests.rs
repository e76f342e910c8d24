// Realtime gateway client tests
// Exercises the connection driver against an in-process WebSocket server.

mod common;
use common::{setup_logging, unused_ws_url, TestGateway};

use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;

use chatroom::realtime::protocol::UserEvent;
use chatroom::realtime::{ConnectionSettings, ConnectionStatus, FixedBackoff, InboundEvent, OutboundFrame};
use chatroom::RealtimeClient;

const WAIT: Duration = Duration::from_secs(5);

fn fast_settings(url: &str) -> ConnectionSettings {
    let mut settings = ConnectionSettings::new(url);
    settings.backoff = Arc::new(FixedBackoff(Duration::from_millis(50)));
    settings.max_retries = 3;
    settings
}

async fn next_status(rx: &mut broadcast::Receiver<ConnectionStatus>) -> ConnectionStatus {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a status change")
        .expect("status channel closed")
}

async fn next_json<S>(server: &mut S) -> Value
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(WAIT, server.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client went away")
            .expect("socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("client sent JSON");
        }
    }
}

#[tokio::test]
async fn inbound_frames_are_published_and_garbage_is_dropped() {
    setup_logging();
    let mut gateway = TestGateway::start().await;
    let client = RealtimeClient::connect(fast_settings(&gateway.url));
    let mut events = client.subscribe();

    let mut server = gateway.next_connection().await;
    server.send(Message::Text("not json".to_string())).await.unwrap();
    server.send(Message::Text(json!({"msg_type": 99}).to_string())).await.unwrap();
    server.send(Message::Text(json!({"text": "no type"}).to_string())).await.unwrap();
    server
        .send(Message::Text(json!({"msg_type": 1, "user_pk": "2"}).to_string()))
        .await
        .unwrap();

    let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event, InboundEvent::WentOnline(UserEvent { user_pk: 2 }));
    assert!(client.is_running());

    client.shutdown().await;
}

#[tokio::test]
async fn event_stream_yields_parsed_events() {
    setup_logging();
    let mut gateway = TestGateway::start().await;
    let client = RealtimeClient::connect(fast_settings(&gateway.url));
    let mut stream = client.event_stream();

    let mut server = gateway.next_connection().await;
    server
        .send(Message::Text(json!({"msg_type": 8, "random_id": -5, "db_id": 17}).to_string()))
        .await
        .unwrap();

    let event = tokio::time::timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap();
    assert!(matches!(event, InboundEvent::MessageIdCreated(e) if e.db_id == 17 && e.random_id == -5));

    client.shutdown().await;
}

#[tokio::test]
async fn outbound_frames_use_the_gateway_wire_shape() {
    setup_logging();
    let mut gateway = TestGateway::start().await;
    let client = RealtimeClient::connect(fast_settings(&gateway.url));

    // Queued before the socket is open; delivered once it is.
    assert!(client.send(OutboundFrame::IsTyping { dialog_pk: 1 }));
    assert!(client.send(OutboundFrame::text(1, "Hello there")));

    let mut server = gateway.next_connection().await;
    assert_eq!(next_json(&mut server).await, json!({"msg_type": 5, "dialog_pk": "1"}));

    let text = next_json(&mut server).await;
    assert_eq!(text["msg_type"], 3);
    assert_eq!(text["dialog_pk"], "1");
    assert_eq!(text["text"], "Hello there");
    assert!(text["random_id"].as_i64().unwrap() < 0);

    client.send(OutboundFrame::MessageRead { dialog_pk: 1, message_id: 42 });
    assert_eq!(
        next_json(&mut server).await,
        json!({"msg_type": 6, "dialog_pk": "1", "message_id": 42})
    );

    client.shutdown().await;
}

#[tokio::test]
async fn dropped_connection_is_reestablished() {
    setup_logging();
    let mut gateway = TestGateway::start().await;
    let client = RealtimeClient::connect(fast_settings(&gateway.url));
    let mut status = client.subscribe_status();

    let first = gateway.next_connection().await;
    assert_eq!(next_status(&mut status).await, ConnectionStatus::Connected);

    drop(first);
    assert_eq!(next_status(&mut status).await, ConnectionStatus::Disconnected);

    let mut second = gateway.next_connection().await;
    assert_eq!(next_status(&mut status).await, ConnectionStatus::Connected);

    client.send(OutboundFrame::TypingStopped { dialog_pk: 4 });
    assert_eq!(next_json(&mut second).await, json!({"msg_type": 10, "dialog_pk": "4"}));

    client.shutdown().await;
}

#[tokio::test]
async fn gives_up_after_retry_budget() {
    setup_logging();
    let mut settings = ConnectionSettings::new(&unused_ws_url().await);
    settings.backoff = Arc::new(FixedBackoff(Duration::from_millis(10)));
    settings.max_retries = 2;
    let client = RealtimeClient::connect(settings);

    tokio::time::timeout(WAIT, async {
        while client.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client kept retrying");

    assert!(!client.send(OutboundFrame::IsTyping { dialog_pk: 1 }));
    client.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_the_socket() {
    setup_logging();
    let mut gateway = TestGateway::start().await;
    let client = RealtimeClient::connect(fast_settings(&gateway.url));
    let mut status = client.subscribe_status();

    let mut server = gateway.next_connection().await;
    assert_eq!(next_status(&mut status).await, ConnectionStatus::Connected);

    client.shutdown().await;

    let closed = tokio::time::timeout(WAIT, server.next()).await.expect("socket left open");
    assert!(matches!(closed, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}

#[tokio::test]
async fn handshake_carries_the_session_cookie() {
    setup_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/chat_ws", listener.local_addr().unwrap());
    let (cookie_tx, cookie_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = move |request: &Request, response: Response| {
            let cookie = request
                .headers()
                .get("cookie")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let _ = cookie_tx.send(cookie);
            Ok::<Response, ErrorResponse>(response)
        };
        let ws = accept_hdr_async(stream, callback).await.unwrap();
        tokio::time::sleep(WAIT).await;
        drop(ws);
    });

    let mut settings = fast_settings(&url);
    settings.cookie = Some("sessionid=abc; csrftoken=xyz".to_string());
    let client = RealtimeClient::connect(settings);

    let cookie = tokio::time::timeout(WAIT, cookie_rx).await.unwrap().unwrap();
    assert_eq!(cookie.as_deref(), Some("sessionid=abc; csrftoken=xyz"));

    client.shutdown().await;
}

#[tokio::test]
async fn stalled_handshakes_time_out_and_use_up_the_retries() {
    setup_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/chat_ws", listener.local_addr().unwrap());
    let (accepted_tx, mut accepted) = mpsc::unbounded_channel();

    // Accepts TCP but never answers the upgrade request.
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if accepted_tx.send(stream).is_err() {
                break;
            }
        }
    });

    let mut settings = ConnectionSettings::new(&url);
    settings.connect_timeout = Duration::from_millis(100);
    settings.backoff = Arc::new(FixedBackoff(Duration::from_millis(10)));
    settings.max_retries = 2;
    let client = RealtimeClient::connect(settings);

    tokio::time::timeout(WAIT, async {
        while client.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client kept retrying");

    let mut attempts = 0;
    while accepted.try_recv().is_ok() {
        attempts += 1;
    }
    assert_eq!(attempts, 3);
    assert!(!client.send(OutboundFrame::IsTyping { dialog_pk: 1 }));
    client.shutdown().await;
}

#[tokio::test]
async fn frames_sent_while_backing_off_are_dropped() {
    setup_logging();
    let mut gateway = TestGateway::start().await;
    let mut settings = ConnectionSettings::new(&gateway.url);
    settings.backoff = Arc::new(FixedBackoff(Duration::from_millis(300)));
    let client = RealtimeClient::connect(settings);
    let mut status = client.subscribe_status();

    let first = gateway.next_connection().await;
    assert_eq!(next_status(&mut status).await, ConnectionStatus::Connected);
    drop(first);
    assert_eq!(next_status(&mut status).await, ConnectionStatus::Disconnected);

    assert!(client.send(OutboundFrame::IsTyping { dialog_pk: 9 }));

    let mut second = gateway.next_connection().await;
    assert_eq!(next_status(&mut status).await, ConnectionStatus::Connected);
    client.send(OutboundFrame::TypingStopped { dialog_pk: 4 });

    // The first frame the new socket sees is the one sent after reconnecting.
    assert_eq!(next_json(&mut second).await, json!({"msg_type": 10, "dialog_pk": "4"}));

    client.shutdown().await;
}
