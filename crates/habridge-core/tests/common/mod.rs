#![allow(clippy::unwrap_used, dead_code)]
// A tiny Home Assistant stand-in: plain HTTP for `/api/states/{id}` and
// the realtime handshake on `/api/websocket`, served from one port so the
// bridge can derive both URLs from a single base.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;

pub const TOKEN: &str = "test-token";

pub struct FakeHomeAssistant {
    pub addr: SocketAddr,
    /// Frames the bridge sent over the realtime connection, in order.
    pub received: mpsc::UnboundedReceiver<Value>,
    push: mpsc::UnboundedSender<String>,
}

impl FakeHomeAssistant {
    /// Serve `states` (entity id → JSON body) and accept `TOKEN` on the
    /// realtime endpoint.
    pub async fn start(states: &[(&str, Value)]) -> Self {
        Self::serve(states, true).await
    }

    /// Same REST surface, but the realtime endpoint answers every `auth`
    /// with `auth_invalid`.
    pub async fn start_rejecting_realtime(states: &[(&str, Value)]) -> Self {
        Self::serve(states, false).await
    }

    async fn serve(states: &[(&str, Value)], accept_realtime: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let states: Arc<HashMap<String, String>> = Arc::new(
            states
                .iter()
                .map(|(id, doc)| (format!("/api/states/{id}"), doc.to_string()))
                .collect(),
        );
        let (received_tx, received) = mpsc::unbounded_channel();
        let (push, push_rx) = mpsc::unbounded_channel::<String>();
        let push_rx = Arc::new(Mutex::new(Some(push_rx)));

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let states = Arc::clone(&states);
                let received_tx = received_tx.clone();
                let push_rx = Arc::clone(&push_rx);
                tokio::spawn(async move {
                    if is_websocket(&stream).await {
                        let push_rx = push_rx.lock().await.take();
                        serve_websocket(stream, accept_realtime, received_tx, push_rx).await;
                    } else {
                        serve_http(stream, &states).await;
                    }
                });
            }
        });

        Self {
            addr,
            received,
            push,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Send a raw frame to the connected bridge.
    pub fn push(&self, frame: &Value) {
        self.push.send(frame.to_string()).unwrap();
    }

    pub async fn next_frame(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.received.recv())
            .await
            .expect("timed out waiting for a realtime frame")
            .expect("fake server stopped")
    }
}

pub fn state_changed(entity_id: &str, new_state: &Value) -> Value {
    serde_json::json!({
        "id": 1,
        "type": "event",
        "event": {
            "event_type": "state_changed",
            "data": { "entity_id": entity_id, "new_state": new_state }
        }
    })
}

async fn is_websocket(stream: &TcpStream) -> bool {
    let mut buf = [0u8; 4096];
    for _ in 0..100 {
        let n = stream.peek(&mut buf).await.unwrap_or(0);
        if n == 0 {
            return false;
        }
        let head = String::from_utf8_lossy(&buf[..n]).to_ascii_lowercase();
        if head.contains("\r\n\r\n") {
            return head.contains("upgrade: websocket");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

async fn serve_http(mut stream: TcpStream, states: &HashMap<String, String>) {
    let mut request = Vec::new();
    let mut chunk = [0u8; 1024];
    while !String::from_utf8_lossy(&request).contains("\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&chunk[..n]),
        }
    }
    let request = String::from_utf8_lossy(&request);
    let path = request.split_whitespace().nth(1).unwrap_or("/");
    let authorized = request
        .to_ascii_lowercase()
        .contains(&format!("authorization: bearer {TOKEN}"));

    let (status, body) = if !authorized {
        ("401 Unauthorized", String::new())
    } else if let Some(body) = states.get(path) {
        ("200 OK", body.clone())
    } else {
        ("404 Not Found", "Entity not found.".to_owned())
    };
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn serve_websocket(
    stream: TcpStream,
    accept_auth: bool,
    received: mpsc::UnboundedSender<Value>,
    mut push: Option<mpsc::UnboundedReceiver<String>>,
) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    if ws
        .send(Message::text(r#"{"type":"auth_required","ha_version":"2026.10.0"}"#))
        .await
        .is_err()
    {
        return;
    }

    loop {
        let outgoing = async {
            match push.as_mut() {
                Some(rx) => rx.recv().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            incoming = ws.next() => {
                let Some(Ok(Message::Text(text))) = incoming else { break };
                let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else { continue };
                let reply = match frame["type"].as_str() {
                    Some("auth") if accept_auth && frame["access_token"] == TOKEN => {
                        Some(r#"{"type":"auth_ok","ha_version":"2026.10.0"}"#.to_owned())
                    }
                    Some("auth") => {
                        Some(r#"{"type":"auth_invalid","message":"Invalid access token"}"#.to_owned())
                    }
                    Some("subscribe_events") => Some(format!(
                        r#"{{"id":{},"type":"result","success":true,"result":null}}"#,
                        frame["id"]
                    )),
                    _ => None,
                };
                let _ = received.send(frame);
                if let Some(reply) = reply {
                    if ws.send(Message::text(reply)).await.is_err() {
                        break;
                    }
                }
            }
            Some(frame) = outgoing => {
                if ws.send(Message::text(frame)).await.is_err() {
                    break;
                }
            }
        }
    }
}
