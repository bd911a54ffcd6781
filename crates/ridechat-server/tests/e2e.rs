//! End-to-end tests over a real WebSocket against the in-memory backends.

use futures_util::{SinkExt, StreamExt};
use ridechat_core::memory::StaticAuthenticator;
use ridechat_core::{AllowAnonymous, AppendLog, Authenticator, Identity};
use ridechat_protocol::ChatMessage;
use ridechat_server::config::{BackendKind, Config};
use ridechat_server::{serve, AppState, Backends};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
}

async fn start(
    configure: impl FnOnce(&mut Config),
    auth: Arc<dyn Authenticator>,
    seed: &[ChatMessage],
) -> TestServer {
    let mut config = Config::default();
    config.backend = BackendKind::Memory;
    config.metrics.enabled = false;
    configure(&mut config);

    let backends = Backends::memory(&config);
    for message in seed {
        backends.log.append(&message.room_id, message).await.unwrap();
    }

    let state = AppState::start(config, backends, auth);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, Arc::clone(&state)));

    TestServer { addr, state }
}

impl TestServer {
    async fn connect(&self, query: &str) -> Result<Client, tungstenite::Error> {
        let url = format!("ws://{}/ws{}", self.addr, query);
        connect_async(url).await.map(|(ws, _)| ws)
    }

    async fn join(&self, room: &str) -> (Client, Vec<Value>) {
        let mut ws = self.connect(&format!("?roomId={room}")).await.unwrap();
        let history = next_json(&mut ws).await;
        let history = history.as_array().expect("first frame is an array").clone();
        (ws, history)
    }

    async fn wait_for_members(&self, room: &str, count: usize) {
        for _ in 0..200 {
            if self.state.registry.members_of(room).len() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("room {room} never reached {count} members");
    }
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Binary(data) => return serde_json::from_slice(&data).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

async fn assert_quiet(ws: &mut Client) {
    assert!(timeout(Duration::from_millis(150), ws.next()).await.is_err());
}

async fn send(ws: &mut Client, body: Value) {
    ws.send(Message::Text(body.to_string())).await.unwrap();
}

fn http_status(err: tungstenite::Error) -> u16 {
    match err {
        tungstenite::Error::Http(response) => response.status().as_u16(),
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_room_broadcast_example() {
    let seed: Vec<_> = ["hello", "anyone?"]
        .iter()
        .map(|text| ChatMessage::new("r1", *text))
        .collect();
    let server = start(|_| {}, Arc::new(AllowAnonymous), &seed).await;

    let (mut a, history_a) = server.join("r1").await;
    let (mut b, history_b) = server.join("r1").await;
    let (mut c, history_c) = server.join("r2").await;
    server.wait_for_members("r1", 2).await;
    server.wait_for_members("r2", 1).await;

    assert_eq!(history_a.len(), 2);
    assert_eq!(history_a[0]["content"], "hello");
    assert_eq!(history_a[1]["content"], "anyone?");
    assert_eq!(history_b, history_a);
    assert!(history_c.is_empty());

    send(&mut a, json!({ "content": "on my way", "roomId": "r2" })).await;

    let at_a = next_json(&mut a).await;
    let at_b = next_json(&mut b).await;
    for received in [&at_a, &at_b] {
        assert!(received.is_object());
        assert_eq!(received["content"], "on my way");
        assert_eq!(received["roomId"], "r1");
    }
    assert_quiet(&mut c).await;

    // A late joiner sees the new message in history, not twice.
    let (mut d, history_d) = server.join("r1").await;
    assert_eq!(history_d.len(), 3);
    assert_eq!(history_d[2]["content"], "on my way");
    assert_quiet(&mut d).await;
}

#[tokio::test]
async fn test_messages_arrive_in_send_order() {
    let server = start(|_| {}, Arc::new(AllowAnonymous), &[]).await;
    let (mut a, _) = server.join("ride-1").await;
    let (mut b, _) = server.join("ride-1").await;
    server.wait_for_members("ride-1", 2).await;

    for i in 0..10 {
        send(&mut a, json!({ "content": format!("m{i}") })).await;
    }
    for i in 0..10 {
        assert_eq!(next_json(&mut b).await["content"], format!("m{i}"));
    }
}

#[tokio::test]
async fn test_disconnect_removes_connection() {
    let server = start(|_| {}, Arc::new(AllowAnonymous), &[]).await;
    let (mut a, _) = server.join("r1").await;
    let (mut b, _) = server.join("r1").await;
    server.wait_for_members("r1", 2).await;

    b.close(None).await.unwrap();
    server.wait_for_members("r1", 1).await;

    send(&mut a, json!({ "content": "still here" })).await;
    assert_eq!(next_json(&mut a).await["content"], "still here");
    assert_eq!(server.state.registry.len(), 1);
}

#[tokio::test]
async fn test_default_room_when_unspecified() {
    let server = start(|_| {}, Arc::new(AllowAnonymous), &[]).await;
    let mut ws = server.connect("").await.unwrap();
    assert_eq!(next_json(&mut ws).await, json!([]));
    server.wait_for_members("general", 1).await;
}

#[tokio::test]
async fn test_invalid_room_rejected() {
    let server = start(|_| {}, Arc::new(AllowAnonymous), &[]).await;
    let long_room = "x".repeat(300);
    let err = server
        .connect(&format!("?roomId={long_room}"))
        .await
        .unwrap_err();
    assert_eq!(http_status(err), 400);

    let err = server.connect("?roomId=ride%0A1").await.unwrap_err();
    assert_eq!(http_status(err), 400);

    // Longest accepted key.
    let widest = format!("ride:{}", "y".repeat(251));
    let mut ws = server.connect(&format!("?roomId={widest}")).await.unwrap();
    assert_eq!(next_json(&mut ws).await, json!([]));
    server.wait_for_members(&widest, 1).await;
}

#[tokio::test]
async fn test_required_auth() {
    let auth = StaticAuthenticator::new().with_token("good", Identity::new("u1", "Ana", "driver"));
    let server = start(|c| c.auth.required = true, Arc::new(auth), &[]).await;

    assert_eq!(http_status(server.connect("?roomId=r1").await.unwrap_err()), 401);
    assert_eq!(
        http_status(server.connect("?roomId=r1&token=bad").await.unwrap_err()),
        401
    );

    let mut ws = server.connect("?roomId=r1&token=good").await.unwrap();
    assert_eq!(next_json(&mut ws).await, json!([]));
    server.wait_for_members("r1", 1).await;

    send(&mut ws, json!({ "senderId": "mallory", "content": "hi" })).await;
    let live = next_json(&mut ws).await;
    assert_eq!(live["senderId"], "u1");
}

#[tokio::test]
async fn test_stats_endpoint() {
    let server = start(|_| {}, Arc::new(AllowAnonymous), &[]).await;
    let (_a, _) = server.join("r1").await;
    let (_b, _) = server.join("r2").await;
    server.wait_for_members("r2", 1).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /stats HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let stats: Value = serde_json::from_str(body).unwrap();
    assert_eq!(stats["connections"], 2);
    assert_eq!(stats["rooms"], 2);
    assert_eq!(stats["authenticated"], 0);
}
