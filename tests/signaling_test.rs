//! End-to-end tests: real server, real websockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use signalroom::app_state::AppState;
use signalroom::auth::JwtVerifier;
use signalroom::connection::ConnectionSettings;
use signalroom::persistence::NullStore;
use signalroom::registry::Registry;
use signalroom::routes::build_router;

const SECRET: &[u8] = b"integration-secret";
const WAIT: Duration = Duration::from_secs(3);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start the server on a random port and return its address and registry.
async fn start_test_server() -> (SocketAddr, Arc<Registry>) {
    let state = AppState::new(
        Arc::new(JwtVerifier::new(SECRET)),
        Arc::new(NullStore),
        ConnectionSettings::default(),
    );
    let registry = state.registry.clone();
    let app = build_router(state, None);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });

    (addr, registry)
}

fn token_for(identity: &str) -> String {
    JwtVerifier::new(SECRET)
        .issue(identity, chrono::Duration::minutes(30))
        .unwrap()
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

async fn join(addr: SocketAddr, registry: &Registry, room: &str, identity: &str) -> Socket {
    let url = format!("ws://{}/ws/signaling/{}?token={}", addr, room, token_for(identity));
    let (socket, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("upgrade failed");
    wait_until(|| registry.members(room).contains(identity)).await;
    socket
}

async fn recv_json(socket: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for message")
            .expect("socket ended")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn expect_silence(socket: &mut Socket) {
    match tokio::time::timeout(Duration::from_millis(150), socket.next()).await {
        Err(_) => {}
        Ok(other) => panic!("unexpected message: {other:?}"),
    }
}

async fn send_json(socket: &mut Socket, value: Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_upgrade_rejected_with_bad_token() {
    let (addr, registry) = start_test_server().await;

    let forged = JwtVerifier::new(b"someone-else")
        .issue("mallory", chrono::Duration::minutes(30))
        .unwrap();
    let url = format!("ws://{}/ws/signaling/r1?token={}", addr, forged);
    match tokio_tungstenite::connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 401),
        Err(e) => panic!("expected 401, got {e}"),
        Ok(_) => panic!("expected 401, upgrade succeeded"),
    }

    let url = format!("ws://{}/ws/signaling/r1", addr);
    match tokio_tungstenite::connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 401),
        Err(e) => panic!("expected 401, got {e}"),
        Ok(_) => panic!("expected 401, upgrade succeeded"),
    }

    assert_eq!(registry.room_count(), 0);
}

#[tokio::test]
async fn test_offer_relayed_to_target_only() {
    let (addr, registry) = start_test_server().await;
    let mut alice = join(addr, &registry, "r1", "alice").await;
    let mut bob = join(addr, &registry, "r1", "bob").await;
    assert_eq!(
        recv_json(&mut alice).await,
        json!({"type": "user_joined", "username": "bob", "room_id": "r1"})
    );
    let mut carol = join(addr, &registry, "r1", "carol").await;
    assert_eq!(recv_json(&mut alice).await["username"], "carol");
    assert_eq!(recv_json(&mut bob).await["username"], "carol");

    send_json(&mut alice, json!({"type": "offer", "target": "bob", "sdp": "x"})).await;
    assert_eq!(
        recv_json(&mut bob).await,
        json!({"type": "offer", "from": "alice", "sdp": "x"})
    );

    let candidate = json!({"candidate": "candidate:0 1 UDP 1 10.0.0.1 9 typ host", "sdpMLineIndex": 0});
    send_json(
        &mut alice,
        json!({"type": "candidate", "target": "carol", "candidate": candidate}),
    )
    .await;
    assert_eq!(
        recv_json(&mut carol).await,
        json!({"type": "candidate", "from": "alice", "candidate": candidate})
    );

    expect_silence(&mut bob).await;
    expect_silence(&mut alice).await;
}

#[tokio::test]
async fn test_heartbeat_response() {
    let (addr, registry) = start_test_server().await;
    let mut alice = join(addr, &registry, "r1", "alice").await;

    send_json(&mut alice, json!({"type": "heartbeat"})).await;
    assert_eq!(
        recv_json(&mut alice).await,
        json!({"type": "heartbeat_response"})
    );
}

#[tokio::test]
async fn test_disconnect_broadcasts_user_left() {
    let (addr, registry) = start_test_server().await;
    let mut alice = join(addr, &registry, "r1", "alice").await;
    let mut bob = join(addr, &registry, "r1", "bob").await;
    recv_json(&mut alice).await;
    let mut carol = join(addr, &registry, "r1", "carol").await;
    recv_json(&mut alice).await;
    recv_json(&mut bob).await;

    bob.close(None).await.unwrap();

    let left = json!({"type": "user_left", "username": "bob", "room_id": "r1"});
    assert_eq!(recv_json(&mut alice).await, left);
    assert_eq!(recv_json(&mut carol).await, left);
    wait_until(|| registry.members("r1").len() == 2).await;
    assert!(!registry.members("r1").contains("bob"));

    expect_silence(&mut alice).await;
    expect_silence(&mut carol).await;
}

#[tokio::test]
async fn test_malformed_frame_closes_connection() {
    let (addr, registry) = start_test_server().await;
    let mut alice = join(addr, &registry, "r1", "alice").await;
    let mut bob = join(addr, &registry, "r1", "bob").await;
    recv_json(&mut alice).await;

    bob.send(Message::Text("definitely not json".into()))
        .await
        .unwrap();

    assert_eq!(
        recv_json(&mut alice).await,
        json!({"type": "user_left", "username": "bob", "room_id": "r1"})
    );

    // The server closes bob's socket.
    let closed = tokio::time::timeout(WAIT, async {
        loop {
            match bob.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let (addr, registry) = start_test_server().await;
    let mut alice = join(addr, &registry, "r1", "alice").await;
    let mut bob = join(addr, &registry, "r2", "bob").await;

    send_json(&mut alice, json!({"type": "offer", "target": "bob", "sdp": "x"})).await;
    expect_silence(&mut bob).await;
    expect_silence(&mut alice).await;
    assert_eq!(registry.room_count(), 2);
}

#[tokio::test]
async fn test_empty_room_is_removed() {
    let (addr, registry) = start_test_server().await;
    let mut alice = join(addr, &registry, "solo", "alice").await;
    assert_eq!(registry.room_count(), 1);

    alice.close(None).await.unwrap();
    wait_until(|| registry.room_count() == 0).await;
    assert!(registry.members("solo").is_empty());
}
