//! End-to-end tests against a real server on an ephemeral port.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    ed25519_dalek::{Signer, SigningKey},
    futures::{SinkExt, StreamExt},
    meshrelay_auth::TokenService,
    meshrelay_config::RelayConfig,
    meshrelay_gateway::{GatewayServices, GatewayState, build_gateway_app, serve_gateway},
    meshrelay_protocol::{Envelope, MessageType},
    meshrelay_store::SqliteMessageStore,
    rand::rngs::OsRng,
    secrecy::SecretString,
    tokio::{net::TcpListener, task::JoinHandle},
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async,
        tungstenite::{Error as WsError, Message},
    },
};

type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct TestRelay {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    tokens: Arc<TokenService>,
    messages: SqliteMessageStore,
    server: JoinHandle<anyhow::Result<()>>,
    _dir: tempfile::TempDir,
}

impl TestRelay {
    async fn start() -> Self {
        Self::start_with(RelayConfig::default()).await
    }

    async fn start_with(config: RelayConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("relay.db").display());
        let pool = meshrelay_store::connect(&url).await.unwrap();
        meshrelay_store::init_schema(&pool).await.unwrap();

        let tokens = Arc::new(TokenService::new(
            &SecretString::new("integration-secret".into()),
            "meshrelay",
            Duration::from_secs(900),
        ));
        let state = GatewayState::new(
            &config,
            GatewayServices::sqlite(pool.clone(), Arc::clone(&tokens)),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_gateway_app(Arc::clone(&state));
        let server = tokio::spawn(serve_gateway(listener, Arc::clone(&state), app));

        Self {
            addr,
            state,
            tokens,
            messages: SqliteMessageStore::new(pool),
            server,
            _dir: dir,
        }
    }

    fn http(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn token(&self, user: &str) -> String {
        self.tokens.issue(user).unwrap().token
    }

    async fn connect(&self, user: &str) -> Ws {
        let url = format!("ws://{}/ws?token={}", self.addr, self.token(user));
        let (ws, _) = connect_async(url).await.unwrap();
        self.wait_online(user, true).await;
        ws
    }

    async fn wait_online(&self, user: &str, online: bool) {
        tokio::time::timeout(WAIT, async {
            while self.state.registry.lookup(user).await.is_some() != online {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{user} online={online} never observed"));
    }

    async fn wait_stored(&self, id: &str) -> meshrelay_store::StoredMessage {
        tokio::time::timeout(WAIT, async {
            loop {
                if let Some(row) = self.messages.get(id).await.unwrap() {
                    return row;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("message {id} never stored"))
    }
}

fn text(id: &str, recipient: &str, body: &[u8]) -> Envelope {
    Envelope::new(id, MessageType::Text, recipient, body.to_vec(), 1_700_000_000)
}

async fn send(ws: &mut Ws, envelope: &Envelope) {
    let frame = meshrelay_protocol::encode(envelope).unwrap();
    ws.send(Message::Binary(frame.into())).await.unwrap();
}

async fn recv(ws: &mut Ws) -> Envelope {
    tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Binary(frame))) => {
                    return meshrelay_protocol::decode(&frame).unwrap();
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => panic!("unexpected websocket event: {other:?}"),
            }
        }
    })
    .await
    .unwrap()
}

/// Wait for the server to close the socket; returns the close code if one
/// was sent.
async fn close_code(ws: &mut Ws) -> Option<u16> {
    tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .unwrap()
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

// ── Relay behaviour ──────────────────────────────────────────────────────────

#[tokio::test]
async fn online_delivery_then_offline_persistence() {
    let relay = TestRelay::start().await;
    let mut alice = relay.connect("alice").await;
    let mut bob = relay.connect("bob").await;

    // Bob claims to be mallory; the relay stamps the authenticated sender.
    let mut m1 = text("m1", "alice", b"hello alice");
    m1.sender = "mallory".into();
    send(&mut bob, &m1).await;

    let got = recv(&mut alice).await;
    assert_eq!(got.id, "m1");
    assert_eq!(got.sender, "bob");
    assert_eq!(got.payload, b"hello alice");

    let stored = relay.wait_stored("m1").await;
    assert_eq!(stored.sender, "bob");
    assert_eq!(stored.recipient, "alice");
    assert_eq!(stored.kind, "text");

    alice.close(None).await.unwrap();
    relay.wait_online("alice", false).await;

    send(&mut bob, &text("m2", "alice", b"are you there")).await;
    let stored = relay.wait_stored("m2").await;
    assert_eq!(stored.sender, "bob");

    // Bob's connection is unaffected: an echo still comes back.
    send(&mut bob, &Envelope::new("c1", MessageType::Control, "", Vec::new(), 0)).await;
    let echo = recv(&mut bob).await;
    assert_eq!(echo.id, "c1");
    assert_eq!(echo.sender, "bob");
}

#[tokio::test]
async fn empty_recipient_echoes_to_sender() {
    let relay = TestRelay::start().await;
    let mut bob = relay.connect("bob").await;

    send(&mut bob, &text("e1", "", b"note to self")).await;
    let echo = recv(&mut bob).await;
    assert_eq!(echo.id, "e1");
    assert_eq!(echo.sender, "bob");
    assert_eq!(relay.wait_stored("e1").await.sender, "bob");
}

#[tokio::test]
async fn empty_recipient_rejected_when_configured() {
    let mut config = RelayConfig::default();
    config.relay.reject_empty_recipient = true;
    let relay = TestRelay::start_with(config).await;
    let mut bob = relay.connect("bob").await;

    send(&mut bob, &text("e1", "", b"dropped")).await;
    send(&mut bob, &text("e2", "bob", b"kept")).await;
    let got = recv(&mut bob).await;
    assert_eq!(got.id, "e2");
    relay.wait_stored("e2").await;
    assert!(relay.messages.get("e1").await.unwrap().is_none());
}

#[tokio::test]
async fn malformed_frames_are_ignored() {
    let relay = TestRelay::start().await;
    let mut bob = relay.connect("bob").await;

    bob.send(Message::Binary(vec![0xff, 0xff, 0xff, 0xff].into()))
        .await
        .unwrap();
    bob.send(Message::Binary(Vec::new().into())).await.unwrap();
    bob.send(Message::Text("not an envelope".into())).await.unwrap();

    send(&mut bob, &Envelope::new("c1", MessageType::Control, "", Vec::new(), 0)).await;
    assert_eq!(recv(&mut bob).await.id, "c1");
    assert!(relay.state.registry.lookup("bob").await.is_some());
}

#[tokio::test]
async fn non_durable_messages_are_not_stored() {
    let relay = TestRelay::start().await;
    let mut alice = relay.connect("alice").await;
    let mut bob = relay.connect("bob").await;

    send(&mut bob, &Envelope::new("p1", MessageType::Ping, "alice", Vec::new(), 0)).await;
    assert_eq!(recv(&mut alice).await.id, "p1");
    // A later durable message is stored; the ping before it never is.
    send(&mut bob, &text("m1", "alice", b"x")).await;
    relay.wait_stored("m1").await;
    assert!(relay.messages.get("p1").await.unwrap().is_none());
}

#[tokio::test]
async fn second_connection_evicts_first() {
    let relay = TestRelay::start().await;
    let mut first = relay.connect("alice").await;
    let old = relay.state.registry.lookup("alice").await.unwrap();

    let url = format!("ws://{}/ws?token={}", relay.addr, relay.token("alice"));
    let (mut second, _) = connect_async(url).await.unwrap();

    assert_eq!(close_code(&mut first).await, Some(4000));
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(current) = relay.state.registry.lookup("alice").await
                && !Arc::ptr_eq(&current, &old)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(relay.state.registry.size().await, 1);

    send(&mut second, &Envelope::new("c1", MessageType::Control, "", Vec::new(), 0)).await;
    assert_eq!(recv(&mut second).await.id, "c1");
}

#[tokio::test]
async fn idle_connection_is_closed() {
    let mut config = RelayConfig::default();
    config.relay.heartbeat_interval_secs = 1;
    config.relay.idle_timeout_secs = 1;
    let relay = TestRelay::start_with(config).await;

    // A raw socket that never reads cannot answer pings.
    let url = format!("ws://{}/ws?token={}", relay.addr, relay.token("quiet"));
    let (_quiet, _) = connect_async(url).await.unwrap();
    relay.wait_online("quiet", true).await;
    relay.wait_online("quiet", false).await;
}

#[tokio::test]
async fn shutdown_closes_sessions() {
    let relay = TestRelay::start().await;
    let mut alice = relay.connect("alice").await;

    relay.state.shutdown.cancel();
    assert_eq!(close_code(&mut alice).await, Some(1001));
    assert_eq!(relay.state.registry.size().await, 0);
    tokio::time::timeout(WAIT, relay.server).await.unwrap().unwrap().unwrap();
}

// ── Authentication ───────────────────────────────────────────────────────────

#[tokio::test]
async fn connect_without_token_is_401() {
    let relay = TestRelay::start().await;
    let err = connect_async(format!("ws://{}/ws", relay.addr))
        .await
        .unwrap_err();
    match err {
        WsError::Http(resp) => assert_eq!(resp.status().as_u16(), 401),
        other => panic!("expected http error, got {other:?}"),
    }
    assert_eq!(relay.state.registry.size().await, 0);
}

#[tokio::test]
async fn connect_with_bad_token_is_401() {
    let relay = TestRelay::start().await;
    let other_issuer = TokenService::new(
        &SecretString::new("someone-else".into()),
        "meshrelay",
        Duration::from_secs(60),
    );
    let forged = other_issuer.issue("alice").unwrap().token;

    for token in ["garbage", forged.as_str()] {
        let err = connect_async(format!("ws://{}/ws?token={token}", relay.addr))
            .await
            .unwrap_err();
        match err {
            WsError::Http(resp) => assert_eq!(resp.status().as_u16(), 401),
            other => panic!("expected http error, got {other:?}"),
        }
    }
    assert_eq!(relay.state.registry.size().await, 0);
}

// ── Accounts ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn register_lookup_and_token_flow() {
    let relay = TestRelay::start().await;
    let client = reqwest::Client::new();
    let signing = SigningKey::generate(&mut OsRng);
    let signing_b64 = STANDARD.encode(signing.verifying_key().to_bytes());
    let exchange_b64 = STANDARD.encode([7u8; 32]);

    let body = serde_json::json!({
        "username": "alice",
        "public_key": exchange_b64,
        "signing_key": signing_b64,
    });
    let resp = client
        .post(relay.http("/register"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 201);
    let created: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(created["status"], "created");
    let user_id = created["user_id"].as_str().unwrap().to_string();

    let resp = client
        .post(relay.http("/register"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 409);

    let keys: serde_json::Value = client
        .get(relay.http(&format!("/keys/{user_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(keys["user_id"], user_id.as_str());
    assert_eq!(keys["public_key"], exchange_b64.as_str());

    let ts = unix_now();
    let challenge = meshrelay_protocol::auth_challenge(&user_id, ts);
    let signature = STANDARD.encode(signing.sign(challenge.as_bytes()).to_bytes());

    // The signature does not cover a different timestamp.
    let resp = client
        .post(relay.http("/token"))
        .json(&serde_json::json!({ "user_id": user_id, "timestamp": ts + 1, "signature": signature }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);

    let resp = client
        .post(relay.http("/token"))
        .json(&serde_json::json!({ "user_id": user_id, "timestamp": ts, "signature": signature }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let issued: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(issued["expires_in"], 900);
    let token = issued["token"].as_str().unwrap();

    let (mut ws, _) = connect_async(format!("ws://{}/ws?token={token}", relay.addr))
        .await
        .unwrap();
    relay.wait_online(&user_id, true).await;
    send(&mut ws, &text("m1", "", b"hi me")).await;
    assert_eq!(recv(&mut ws).await.sender, user_id);
}

#[tokio::test]
async fn token_for_unknown_user_is_401() {
    let relay = TestRelay::start().await;
    let resp = reqwest::Client::new()
        .post(relay.http("/token"))
        .json(&serde_json::json!({ "user_id": "ghost", "timestamp": unix_now(), "signature": "AAAA" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "unknown user");
}

#[tokio::test]
async fn register_rejects_bad_signing_key() {
    let relay = TestRelay::start().await;
    let resp = reqwest::Client::new()
        .post(relay.http("/register"))
        .json(&serde_json::json!({
            "username": "alice",
            "public_key": "cGs=",
            "signing_key": "not-a-key",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn health_reports_sessions_and_database() {
    let relay = TestRelay::start().await;
    let _alice = relay.connect("alice").await;

    let resp = reqwest::get(relay.http("/health")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "ok");
    assert_eq!(body["sessions"], 1);
}
