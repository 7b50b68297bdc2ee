use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use consultation_cell::services::{
    ConsultationService, InMemoryConsultationStore, StaticProfileResolver,
};
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};
use signaling_cell::handlers::SignalingCellState;
use signaling_cell::router::signaling_routes;
use signaling_cell::services::{JwtCredentialVerifier, RelaySettings, RoomRegistry, SignalingRelay};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    registry: Arc<RoomRegistry>,
    config: TestConfig,
}

async fn spawn_server() -> TestServer {
    let config = TestConfig::default();
    let app_config = config.to_arc();
    let store = Arc::new(InMemoryConsultationStore::new());
    let profiles = Arc::new(StaticProfileResolver::new());
    let consultations = Arc::new(ConsultationService::new(store, profiles));
    let registry = Arc::new(RoomRegistry::new());
    let relay = Arc::new(SignalingRelay::new(
        registry.clone(),
        consultations.clone(),
        Arc::new(JwtCredentialVerifier::new(app_config.clone())),
        RelaySettings::from_config(&app_config),
    ));

    let state = Arc::new(SignalingCellState {
        config: app_config,
        relay,
        consultations,
    });
    let app = Router::new().nest("/signaling", signaling_routes(state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, registry, config }
}

impl TestServer {
    async fn connect(&self, room_id: Uuid, token: &str) -> Client {
        let url = format!("ws://{}/signaling/ws?room_id={}&token={}", self.addr, room_id, token);
        let (client, _) = connect_async(url).await.unwrap();
        client
    }

    fn token(&self, user: &TestUser) -> String {
        JwtTestUtils::create_test_token(user, &self.config.jwt_secret, None)
    }
}

enum Frame {
    Json(Value),
    Closed(u16),
}

async fn next_frame(client: &mut Client) -> Frame {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("valid frame");

        match message {
            Message::Text(text) => return Frame::Json(serde_json::from_str(text.as_str()).unwrap()),
            Message::Close(frame) => return Frame::Closed(frame.map(|f| u16::from(f.code)).unwrap_or(1005)),
            _ => continue,
        }
    }
}

async fn next_json(client: &mut Client) -> Value {
    match next_frame(client).await {
        Frame::Json(value) => value,
        Frame::Closed(code) => panic!("expected a message, connection closed with {}", code),
    }
}

async fn next_close(client: &mut Client) -> u16 {
    loop {
        if let Frame::Closed(code) = next_frame(client).await {
            return code;
        }
    }
}

async fn send(client: &mut Client, json: &str) {
    client.send(Message::Text(json.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn test_invalid_credential_closes_with_4001() {
    let server = spawn_server().await;
    let room = server.registry.create_standalone();

    let mut client = server
        .connect(room.id, &JwtTestUtils::create_malformed_token())
        .await;

    let error = next_json(&mut client).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "invalid_credential");
    assert_eq!(next_close(&mut client).await, 4001);
}

#[tokio::test]
async fn test_unknown_room_closes_with_4004() {
    let server = spawn_server().await;
    let user = TestUser::patient("patient@example.com");

    let mut client = server.connect(Uuid::new_v4(), &server.token(&user)).await;
    assert_eq!(next_close(&mut client).await, 4004);
}

#[tokio::test]
async fn test_two_party_session_over_websocket() {
    let server = spawn_server().await;
    let room = server.registry.create_standalone();
    let alice = TestUser::patient("alice@example.com");
    let bob = TestUser::doctor("bob@example.com");

    let mut a = server.connect(room.id, &server.token(&alice)).await;
    send(&mut a, r#"{"type":"join","role":"patient"}"#).await;
    let joined = next_json(&mut a).await;
    assert_eq!(joined["type"], "joined");
    assert_eq!(joined["room_id"], room.id.to_string());

    let mut b = server.connect(room.id, &server.token(&bob)).await;
    send(&mut b, r#"{"type":"join","role":"doctor"}"#).await;
    assert_eq!(next_json(&mut b).await["type"], "joined");
    assert_eq!(next_json(&mut b).await["type"], "ready");

    let peer_joined = next_json(&mut a).await;
    assert_eq!(peer_joined["type"], "peer-joined");
    assert_eq!(peer_joined["role"], "clinician");
    assert_eq!(next_json(&mut a).await["type"], "ready");

    send(&mut a, r#"{"type":"offer","payload":{"sdp":"v=0"}}"#).await;
    let offer = next_json(&mut b).await;
    assert_eq!(offer["type"], "offer");
    assert_eq!(offer["from"], alice.id);
    assert_eq!(offer["payload"]["sdp"], "v=0");

    send(&mut b, r#"{"type":"end"}"#).await;
    let end = next_json(&mut a).await;
    assert_eq!(end["type"], "end");
    assert_eq!(end["by"], bob.id);
    assert_eq!(next_close(&mut a).await, 4010);
    assert_eq!(next_close(&mut b).await, 4010);

    assert!(server.registry.get(room.id).is_none());
}
