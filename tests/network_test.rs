//! HTTP and WebSocket tests against an in-process axum backend.

use axum::{
    extract::{
        ws::{Message as WsFrame, WebSocket, WebSocketUpgrade},
        Path, Query,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chatsync_core::protocol::{RoomRef, TypingPayload};
use chatsync_core::*;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpListener;

async fn spawn_backend(app: Router) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some("Bearer tok")
}

async fn create_message(
    Path(room): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if room == "broken" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "db down").into_response();
    }
    Json(json!({
        "id": "srv-1",
        "chatRoomId": room,
        "senderId": body["senderId"],
        "type": body["type"],
        "content": body["content"],
        "createdAt": "2024-05-01T10:00:00Z",
        "readers": [body["senderId"]]
    }))
    .into_response()
}

async fn list_rooms(Path(user): Path<String>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!([
        { "id": "r1", "updatedAt": "2024-05-01T09:00:00Z" },
        {
            "id": "r2",
            "updatedAt": "2024-05-01T10:00:00Z",
            "lastMessage": {
                "id": "m7",
                "chatRoomId": "r2",
                "senderId": "bob",
                "type": "AUDIO",
                "mediaUrl": "https://cdn.example.com/a.ogg",
                "duration": 4,
                "createdAt": "2024-05-01T10:00:00Z",
                "readers": ["bob", user]
            }
        }
    ]))
    .into_response()
}

async fn create_chat_room(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if body["currentUserId"].is_null() || body["otherUserId"].is_null() {
        return (StatusCode::BAD_REQUEST, "missing member").into_response();
    }
    Json(json!({
        "id": "r9",
        "members": [
            { "userId": body["currentUserId"] },
            { "userId": body["otherUserId"] }
        ],
        "updatedAt": "2024-05-01T11:00:00Z"
    }))
    .into_response()
}

fn http_backend() -> Router {
    Router::new()
        .route("/chatrooms", post(create_chat_room))
        .route("/chatrooms/:room/messages", post(create_message))
        .route("/chatrooms/user/:user", get(list_rooms))
}

#[tokio::test]
async fn test_create_message_over_http() {
    let port = spawn_backend(http_backend()).await;
    let api = ApiClient::new(&ClientConfig::new("127.0.0.1", port, false)).unwrap();

    let request = CreateMessageRequest {
        sender_id: "alice".to_string(),
        message: OutgoingMessage::text("hello"),
    };
    let message = api.create_message("tok", "r1", &request).await.unwrap();

    assert_eq!(message.id, "srv-1");
    assert_eq!(message.chat_room_id, "r1");
    assert_eq!(message.sender_id, "alice");
    assert_eq!(message.content, "hello");
    assert!(!message.pending);
}

#[tokio::test]
async fn test_http_errors_carry_status() {
    let port = spawn_backend(http_backend()).await;
    let api = ApiClient::new(&ClientConfig::new("127.0.0.1", port, false)).unwrap();
    let request = CreateMessageRequest {
        sender_id: "alice".to_string(),
        message: OutgoingMessage::text("hello"),
    };

    match api.create_message("tok", "broken", &request).await {
        Err(Error::Http(reason)) => {
            assert!(reason.contains("500"));
            assert!(reason.contains("db down"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(matches!(
        api.create_message("wrong", "r1", &request).await,
        Err(Error::Http(_))
    ));
}

#[tokio::test]
async fn test_list_chat_rooms_over_http() {
    let port = spawn_backend(http_backend()).await;
    let api = ApiClient::new(&ClientConfig::new("127.0.0.1", port, false)).unwrap();

    let rooms = api.list_chat_rooms("tok", "alice").await.unwrap();

    assert_eq!(rooms.len(), 2);
    assert!(rooms[0].last_message.is_none());
    let last = rooms[1].last_message.as_ref().unwrap();
    assert_eq!(last.kind, MessageKind::Audio);
    assert!(last.is_read_by("alice"));
}

#[tokio::test]
async fn test_create_chat_room_over_http() {
    let port = spawn_backend(http_backend()).await;
    let api = ApiClient::new(&ClientConfig::new("127.0.0.1", port, false)).unwrap();

    let request = CreateChatRoomRequest {
        current_user_id: "alice".to_string(),
        other_user_id: "carol".to_string(),
    };
    let room = api.create_chat_room("tok", &request).await.unwrap();

    assert_eq!(room.id, "r9");
    assert_eq!(room.counterpart("alice"), Some("carol"));
    assert!(room.last_message.is_none());
    assert!(matches!(
        api.create_chat_room("wrong", &request).await,
        Err(Error::Http(_))
    ));
}

#[tokio::test]
async fn test_api_prefix_routes_requests() {
    let port = spawn_backend(Router::new().nest("/chatserver/chat", http_backend())).await;
    let mut config = ClientConfig::new("127.0.0.1", port, false);
    config.server.api_prefix = "/chatserver/chat/".to_string();
    let api = ApiClient::new(&config).unwrap();

    let rooms = api.list_chat_rooms("tok", "alice").await.unwrap();
    assert_eq!(rooms.len(), 2);

    let bare = ApiClient::new(&ClientConfig::new("127.0.0.1", port, false)).unwrap();
    assert!(matches!(
        bare.list_chat_rooms("tok", "alice").await,
        Err(Error::Http(_))
    ));
}

// ============================================================================
// WebSocket
// ============================================================================

async fn ws_handler(ws: WebSocketUpgrade, Query(params): Query<HashMap<String, String>>) -> Response {
    ws.on_upgrade(move |socket| typing_echo(socket, params))
}

/// Greets with `typing:show` for the connecting user, then answers each
/// `joinRoom` with a `typing:hide` for that room.
async fn typing_echo(mut socket: WebSocket, params: HashMap<String, String>) {
    let user_id = params.get("userId").cloned().unwrap_or_default();
    let greeting = ServerEvent::TypingShow(TypingPayload {
        chat_room_id: "lobby".to_string(),
        user_id: user_id.clone(),
    });
    if socket
        .send(WsFrame::Text(greeting.to_frame().unwrap()))
        .await
        .is_err()
    {
        return;
    }

    while let Some(Ok(frame)) = socket.recv().await {
        let WsFrame::Text(text) = frame else {
            continue;
        };
        if let Ok(ClientEvent::JoinRoom(room)) = ClientEvent::from_frame(&text) {
            let reply = ServerEvent::TypingHide(TypingPayload {
                chat_room_id: room.chat_room_id,
                user_id: user_id.clone(),
            });
            let _ = socket.send(WsFrame::Text(reply.to_frame().unwrap())).await;
        }
    }
}

async fn next_event(link: &mut TransportLink) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), link.recv())
        .await
        .expect("transport event did not arrive")
}

#[tokio::test]
async fn test_websocket_round_trip() {
    let port = spawn_backend(Router::new().route("/ws", get(ws_handler))).await;
    let connector = WsConnector::new(ClientConfig::new("127.0.0.1", port, false));

    let mut link = connector.open(&Identity::new("alice", "tok")).unwrap();

    assert_eq!(next_event(&mut link).await, TransportEvent::Connected);
    assert_eq!(
        next_event(&mut link).await,
        TransportEvent::Event(ServerEvent::TypingShow(TypingPayload {
            chat_room_id: "lobby".to_string(),
            user_id: "alice".to_string(),
        }))
    );

    link.send(ClientEvent::JoinRoom(RoomRef::new("r1"))).unwrap();
    assert_eq!(
        next_event(&mut link).await,
        TransportEvent::Event(ServerEvent::TypingHide(TypingPayload {
            chat_room_id: "r1".to_string(),
            user_id: "alice".to_string(),
        }))
    );
}

async fn close_immediately(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let _ = socket.send(WsFrame::Close(None)).await;
    })
}

#[tokio::test]
async fn test_websocket_reconnects_after_drop() {
    let port = spawn_backend(Router::new().route("/ws", get(close_immediately))).await;
    let mut config = ClientConfig::new("127.0.0.1", port, false);
    config.reconnect.initial_delay_ms = 10;

    let mut link = WsConnector::new(config)
        .open(&Identity::new("alice", "tok"))
        .unwrap();

    assert_eq!(next_event(&mut link).await, TransportEvent::Connected);
    assert!(matches!(
        next_event(&mut link).await,
        TransportEvent::Disconnected { .. }
    ));
    assert_eq!(next_event(&mut link).await, TransportEvent::Connected);
}

#[tokio::test]
async fn test_reconnect_gives_up_after_policy() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut config = ClientConfig::new("127.0.0.1", port, false);
    config.reconnect = ReconnectPolicy {
        max_attempts: 2,
        initial_delay_ms: 10,
        max_delay_ms: 20,
        multiplier: 2,
    };

    let mut link = WsConnector::new(config)
        .open(&Identity::new("alice", "tok"))
        .unwrap();

    assert!(matches!(
        next_event(&mut link).await,
        TransportEvent::ConnectError { attempt: 1, .. }
    ));
    assert!(matches!(
        next_event(&mut link).await,
        TransportEvent::ConnectError { attempt: 2, .. }
    ));
    assert_eq!(
        next_event(&mut link).await,
        TransportEvent::ReconnectExhausted { attempts: 2 }
    );
    assert!(matches!(
        next_event(&mut link).await,
        TransportEvent::Disconnected { .. }
    ));
}
