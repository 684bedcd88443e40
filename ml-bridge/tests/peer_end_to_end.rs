//! Bridge against the development peer over a real socket.

use ml_bridge::{
    BridgeConfig, BridgeEvent, MlBridge, ReconnectPolicy, ScriptSession, DEFAULT_JSON_FUNCTION,
    DEFAULT_RAW_FUNCTION,
};
use ml_peer::AppState;
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};

async fn spawn_peer() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(ml_peer::serve(listener, AppState::with_builtin()));
    address
}

async fn running(bridge: &MlBridge) -> ScriptSession {
    let mut session = bridge.watch_script_session();
    let running = tokio::time::timeout(Duration::from_secs(5), session.wait_for(ScriptSession::is_running))
        .await
        .unwrap()
        .unwrap()
        .clone();
    running
}

#[tokio::test]
async fn test_demo_script_round_trip() {
    let address = spawn_peer().await;
    let bridge = MlBridge::start(
        BridgeConfig::new(address)
            .with_auto_start(Some("demo_script"))
            .with_reconnect(ReconnectPolicy::disabled())
            .with_reply_timeout(Duration::from_secs(5)),
    );

    assert_eq!(
        running(&bridge).await,
        ScriptSession::Running {
            name: "demo_script".to_string()
        }
    );

    let text = assert_ok!(
        bridge
            .send_string_input_await("hello", DEFAULT_JSON_FUNCTION)
            .await
    );
    assert_eq!(text, "hello-processed");

    let structured = bridge
        .send_json_input(json!({"tokens": [1, 2]}), DEFAULT_JSON_FUNCTION)
        .await
        .unwrap();
    assert_eq!(structured, json!({"tokens": [1, 2]}));

    let doubled = assert_ok!(
        bridge
            .send_raw_input_await(vec![1.0, 2.0, 3.0], DEFAULT_RAW_FUNCTION)
            .await
    );
    assert_eq!(doubled, vec![2.0, 4.0, 6.0]);

    bridge.disconnect().await;
    assert!(!bridge.is_connected());
}

#[tokio::test]
async fn test_default_script_echoes_and_logs() {
    let address = spawn_peer().await;
    let bridge = MlBridge::new(
        BridgeConfig::new(address.clone()).with_reconnect(ReconnectPolicy::disabled()),
    );
    let mut events = bridge.subscribe();
    bridge.connect(&address);

    let mut log_lines = Vec::new();
    let started = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.unwrap() {
                BridgeEvent::Log(line) => log_lines.push(line),
                BridgeEvent::ScriptStarted(name) => break name,
                _ => {}
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(started, "empty_example");
    assert_eq!(log_lines, vec!["Starting script empty_example".to_string()]);

    bridge.send_raw_input(vec![0.5, -1.5], DEFAULT_RAW_FUNCTION);
    let echoed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let BridgeEvent::RawInputResult { data, .. } = events.recv().await.unwrap() {
                break data;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(echoed, vec![0.5, -1.5]);
}

#[tokio::test]
async fn test_unknown_script_reported_in_log() {
    let address = spawn_peer().await;
    let bridge = MlBridge::new(
        BridgeConfig::new(address.clone())
            .with_auto_start(Some("missing"))
            .with_reconnect(ReconnectPolicy::disabled()),
    );
    let mut events = bridge.subscribe();
    bridge.connect(&address);

    let line = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let BridgeEvent::Log(line) = events.recv().await.unwrap() {
                break line;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(line, "Unknown script: missing");
    assert!(!bridge.is_script_running());

    // No active script: the peer acknowledges with no entries.
    let err = assert_err!(bridge.send_json_input(json!(1), DEFAULT_JSON_FUNCTION).await);
    assert!(matches!(err, ml_bridge::BridgeError::NoReply));
}
