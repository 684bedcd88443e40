//! In-process WebSocket peer with a scripted responder.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use ml_bridge::BridgeEvent;
use ml_proto::Frame;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;

/// What the peer does in answer to one client frame
#[derive(Debug, Clone)]
pub enum Action {
    Send(Frame),
    /// Drop the socket without a close handshake
    Hangup,
}

pub type Responder = Arc<dyn Fn(&Frame) -> Vec<Action> + Send + Sync>;

pub struct ScriptedPeer {
    /// `host:port` to hand to the bridge
    pub address: String,
    /// Every frame the clients sent, in arrival order
    pub received: mpsc::UnboundedReceiver<Frame>,
    connections: Arc<AtomicUsize>,
}

impl ScriptedPeer {
    /// Accept connections forever. Each one is greeted with
    /// `connect{sid: "sid-N"}`, N counting from 1.
    pub async fn spawn<F>(responder: F) -> Self
    where
        F: Fn(&Frame) -> Vec<Action> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let responder: Responder = Arc::new(responder);
        let connections = Arc::new(AtomicUsize::new(0));
        let (tx, received) = mpsc::unbounded_channel();

        let counter = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let responder = Arc::clone(&responder);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    let (mut sink, mut stream) = ws.split();
                    let hello = Frame::Connect { sid: format!("sid-{n}") };
                    if sink.send(Message::Text(hello.encode().unwrap())).await.is_err() {
                        return;
                    }

                    while let Some(Ok(message)) = stream.next().await {
                        let Message::Text(text) = message else { continue };
                        let Ok(frame) = Frame::decode(&text) else { continue };
                        let _ = tx.send(frame.clone());

                        for action in responder(&frame) {
                            match action {
                                Action::Send(reply) => {
                                    let text = reply.encode().unwrap();
                                    if sink.send(Message::Text(text)).await.is_err() {
                                        return;
                                    }
                                }
                                Action::Hangup => return,
                            }
                        }
                    }
                });
            }
        });

        Self {
            address,
            received,
            connections,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Next frame from any client, skipping ones `keep` rejects
    pub async fn next_frame(&mut self, keep: impl Fn(&Frame) -> bool) -> Frame {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), self.received.recv())
                .await
                .expect("no frame from the bridge")
                .expect("peer stopped");
            if keep(&frame) {
                return frame;
            }
        }
    }
}

/// Answer acknowledged events with `reply(event, data)`; ignore the rest
pub fn acking<F>(reply: F) -> impl Fn(&Frame) -> Vec<Action> + Send + Sync + 'static
where
    F: Fn(&str, &Value) -> Vec<Value> + Send + Sync + 'static,
{
    move |frame| match frame {
        Frame::Event {
            event,
            data,
            id: Some(id),
        } => {
            let data = data.clone().unwrap_or(Value::Null);
            vec![Action::Send(Frame::ack(*id, reply(event, &data)))]
        }
        _ => Vec::new(),
    }
}

/// Never answer anything
pub fn silent(_: &Frame) -> Vec<Action> {
    Vec::new()
}

/// `inputData` of a `sendInput` envelope
pub fn input_data(envelope: &Value) -> Value {
    envelope.get("inputData").cloned().unwrap_or(Value::Null)
}

/// Wait for the first notification matching `pick`
pub async fn next_event<T>(
    events: &mut broadcast::Receiver<BridgeEvent>,
    pick: impl Fn(BridgeEvent) -> Option<T>,
) -> T {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(event) {
                        return found;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("expected bridge event never arrived")
}

/// Poll `check` until it holds
pub async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}
