//! Wire-level tests against a running peer.

use futures_util::{SinkExt, StreamExt};
use ml_peer::AppState;
use ml_proto::Frame;
use serde_json::json;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_test::assert_ok;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_peer() -> (String, AppState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::with_builtin();
    let served = state.clone();
    tokio::spawn(async move {
        let _ = ml_peer::serve(listener, served).await;
    });
    (format!("ws://{addr}/ws"), state)
}

async fn send(client: &mut Client, frame: Frame) {
    client
        .send(Message::Text(frame.encode().unwrap()))
        .await
        .unwrap();
}

async fn recv(client: &mut Client) -> Frame {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("peer went quiet")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = message {
            return Frame::decode(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_connect_frame_carries_session_id() {
    let (url, state) = spawn_peer().await;
    let (mut client, _) = assert_ok!(tokio_tungstenite::connect_async(url.as_str()).await);

    match recv(&mut client).await {
        Frame::Connect { sid } => assert!(!sid.is_empty()),
        other => panic!("expected connect, got {other:?}"),
    }
    assert_eq!(state.connection_count(), 1);
}

#[tokio::test]
async fn test_script_start_and_input() {
    let (url, _state) = spawn_peer().await;
    let (mut client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    assert!(matches!(recv(&mut client).await, Frame::Connect { .. }));

    send(&mut client, Frame::event("startScript", "demo_script")).await;
    assert_eq!(recv(&mut client).await, Frame::event("log", "Starting script demo_script"));
    assert_eq!(recv(&mut client).await, Frame::event("scriptStarted", "demo_script"));

    send(
        &mut client,
        Frame::request(
            "sendInput",
            json!({"targetFunction": "onJsonInput", "inputData": "hello"}),
            1,
        ),
    )
    .await;
    assert_eq!(recv(&mut client).await, Frame::ack(1, vec![json!("hello-processed")]));

    send(
        &mut client,
        Frame::request(
            "sendInput",
            json!({"inputData": [1.0, 2.0, 3.0], "targetFunction": "onFloatArrayInput"}),
            2,
        ),
    )
    .await;
    assert_eq!(
        recv(&mut client).await,
        Frame::ack(
            2,
            vec![json!({"inputData": [2.0, 4.0, 6.0], "targetFunction": "onFloatArrayInput"})]
        )
    );
}

#[tokio::test]
async fn test_disconnect_unregisters_connection() {
    let (url, state) = spawn_peer().await;
    let (mut client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    assert!(matches!(recv(&mut client).await, Frame::Connect { .. }));
    assert_eq!(state.connection_count(), 1);

    send(&mut client, Frame::disconnect("client disconnect")).await;

    for _ in 0..50 {
        if state.connection_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("connection still registered after disconnect");
}

#[tokio::test]
async fn test_health_route() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(ml_peer::serve(listener, AppState::with_builtin()));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(
        &mut stream,
        b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await
    .unwrap();

    let mut response = String::new();
    tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response)
        .await
        .unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));

    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let health: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 0);
    assert!(health["uptime_secs"].as_i64().unwrap() >= 0);
}
