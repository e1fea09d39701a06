//! WebSocket Session Tests
//!
//! Full stack: HTTP handshake against wiremock, then RTVI over a real
//! WebSocket to a scripted bot on localhost.

mod fixtures;

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use wiremock::MockServer;

use fixtures::*;
use rtvi_client::{
    EventKind, Message, MessageType, RtviError, SessionState, TransportState, VoiceClient,
    VoiceEvent, WebSocketTransport,
};

/// Scripted bot: answers `client-ready` with `bot-ready`, `get-config` with
/// the sample config and every other request with `error-response`.
async fn spawn_scripted_bot() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        while let Some(Ok(frame)) = ws.next().await {
            let WsMessage::Text(text) = frame else {
                continue;
            };
            let request = Message::parse(&text).unwrap();
            let replies = match request.message_type {
                MessageType::ClientReady => vec![
                    Message::new(MessageType::BotStartedSpeaking, json!({})),
                    bot_ready_message("2.0.0"),
                ],
                MessageType::GetConfig => vec![Message::with_id(
                    MessageType::Config,
                    json!({"config_list": sample_config()}),
                    request.id,
                )],
                _ => vec![Message::with_id(
                    MessageType::ErrorResponse,
                    json!({"error": "unsupported"}),
                    request.id,
                )],
            };
            for reply in replies {
                let json = reply.serialize().unwrap();
                if ws.send(WsMessage::Text(json.into())).await.is_err() {
                    return;
                }
            }
        }
    });

    format!("ws://{}", addr)
}

async fn connected_client() -> (MockServer, VoiceClient) {
    let ws_url = spawn_scripted_bot().await;
    let server = MockServer::start().await;
    mount_handshake(&server, json!({"ws_url": ws_url, "token": "abc"})).await;

    let client = VoiceClient::new(
        options_for(&server),
        Arc::new(WebSocketTransport::default()),
    );
    (server, client)
}

#[tokio::test]
async fn test_websocket_session_lifecycle() {
    let (_server, client) = connected_client().await;
    let states = EventRecorder::attach(&client, &[EventKind::SessionStateChanged]);
    let speaking = EventRecorder::attach(&client, &[EventKind::BotStartedSpeaking]);

    client.connect().await.unwrap();
    assert_eq!(client.state(), SessionState::Ready);
    assert_eq!(client.bot_version().as_deref(), Some("2.0.0"));
    assert_eq!(client.transport_state(), TransportState::Connected);
    wait_until(|| speaking.len() == 1).await;

    let config = client.get_bot_config().await.unwrap();
    assert_eq!(config, sample_config());

    match client.describe_config().await {
        Err(RtviError::ErrorResponse(reply)) => {
            assert_eq!(reply.data["error"], "unsupported")
        }
        other => panic!("Expected ErrorResponse, got {:?}", other),
    }

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), SessionState::Disconnected);
    assert_eq!(client.transport_state(), TransportState::Disconnected);

    let seen: Vec<SessionState> = states
        .events()
        .into_iter()
        .filter_map(|e| match e {
            VoiceEvent::SessionStateChanged(state) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        seen,
        vec![
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Ready,
            SessionState::Disconnecting,
            SessionState::Disconnected,
        ]
    );
}

#[tokio::test]
async fn test_websocket_unreachable_bot_fails_connect() {
    // Reserve a port, then free it so nothing listens there
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server = MockServer::start().await;
    mount_handshake(&server, json!({"ws_url": format!("ws://{}", addr)})).await;

    let client = VoiceClient::new(
        options_for(&server),
        Arc::new(WebSocketTransport::default()),
    );
    assert!(matches!(
        client.connect().await,
        Err(RtviError::Transport(_))
    ));
    assert_eq!(client.state(), SessionState::Error);
}

#[tokio::test]
async fn test_websocket_bundle_without_url_fails_connect() {
    let server = MockServer::start().await;
    mount_handshake(&server, json!({"room_url": "https://rooms.example.com/abc"})).await;

    let client = VoiceClient::new(
        options_for(&server),
        Arc::new(WebSocketTransport::default()),
    );
    assert!(matches!(
        client.connect().await,
        Err(RtviError::Transport(_))
    ));
    assert_eq!(client.state(), SessionState::Error);
}
