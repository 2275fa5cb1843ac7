// ABOUTME: Tests for the transaction webhook routes
// ABOUTME: Drives the router in-process with recording mocks for the homeserver and IRC sides

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use matrix_irc_bridge::identity::IdentityMapper;
use matrix_irc_bridge::traits::{IrcConnector, IrcSender, RoomClient};
use matrix_irc_bridge::webhook::{router, WebhookState};
use matrix_irc_bridge::{BridgeResult, RelayEngine, RelaySettings};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

const ROOM: &str = "!room:example.org";
const CHANNEL: &str = "#meta";

#[derive(Default)]
struct NullRoom;

#[async_trait]
impl RoomClient for NullRoom {
    async fn join(&self, _user_id: &str) -> BridgeResult<()> {
        Ok(())
    }

    async fn send_message(&self, _user_id: &str, _text: &str) -> BridgeResult<()> {
        Ok(())
    }
}

struct RecordingSession {
    nick: String,
    lines: Arc<Mutex<Vec<(String, String, String)>>>,
}

impl IrcSender for RecordingSession {
    fn nick(&self) -> &str {
        &self.nick
    }

    fn send(&self, channel: &str, text: &str) -> BridgeResult<()> {
        self.lines
            .lock()
            .unwrap()
            .push((self.nick.clone(), channel.to_string(), text.to_string()));
        Ok(())
    }

    fn is_registered(&self) -> bool {
        true
    }

    fn is_closed(&self) -> bool {
        false
    }

    fn quit(&self, _reason: &str) {}
}

#[derive(Default)]
struct RecordingConnector {
    connects: AtomicUsize,
    lines: Arc<Mutex<Vec<(String, String, String)>>>,
}

#[async_trait]
impl IrcConnector for RecordingConnector {
    async fn connect(&self, nick: &str, _user: &str) -> BridgeResult<Arc<dyn IrcSender>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingSession {
            nick: nick.to_string(),
            lines: Arc::clone(&self.lines),
        }))
    }
}

fn setup(hs_token: Option<&str>) -> (axum::Router, Arc<RecordingConnector>) {
    let connector = Arc::new(RecordingConnector::default());
    let engine = RelayEngine::new(
        RelaySettings {
            room_id: ROOM.to_string(),
            channel: CHANNEL.to_string(),
            bridge_nick: "matrixbridge".to_string(),
        },
        IdentityMapper::new("example.org"),
        Arc::new(NullRoom),
        connector.clone(),
    );
    let state = WebhookState::new(Arc::new(engine), hs_token.map(str::to_string));
    (router(state), connector)
}

fn message(user_id: &str, body: &str) -> Value {
    json!({
        "event_id": "$evt",
        "type": "m.room.message",
        "room_id": ROOM,
        "user_id": user_id,
        "content": { "msgtype": "m.text", "body": body },
    })
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: String) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_transaction_relays_message_to_irc() {
    let (app, connector) = setup(None);
    let body = json!({ "events": [message("@alice:example.org", "hello")] }).to_string();

    let (status, json) = send(&app, "POST", "/transactions/", body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({}));
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    assert_eq!(
        connector.lines.lock().unwrap().clone(),
        vec![("M-alice".to_string(), CHANNEL.to_string(), "hello".to_string())]
    );
}

#[tokio::test]
async fn test_put_transaction_with_id() {
    let (app, connector) = setup(None);
    let body = json!({ "events": [message("@alice:example.org", "one")] }).to_string();

    let (status, _) = send(&app, "PUT", "/transactions/txn1", body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(connector.lines.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_versioned_path_accepted() {
    let (app, connector) = setup(None);
    let body = json!({ "events": [message("@bob:example.org", "hey")] }).to_string();

    let (status, _) = send(&app, "PUT", "/_matrix/app/v1/transactions/abc", body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(connector.lines.lock().unwrap()[0].0, "M-bob");
}

#[tokio::test]
async fn test_replayed_transaction_id_processed_once() {
    let (app, connector) = setup(None);
    let body = json!({ "events": [message("@alice:example.org", "once")] }).to_string();

    send(&app, "PUT", "/transactions/dup", body.clone()).await;
    let (status, _) = send(&app, "PUT", "/transactions/dup", body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(connector.lines.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_malformed_body_still_acknowledged() {
    let (app, connector) = setup(None);

    let (status, json) = send(&app, "POST", "/transactions/", "{not json".to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({}));
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_bad_event_does_not_block_batch() {
    let (app, connector) = setup(None);
    let body = json!({
        "events": [
            { "type": "m.room.message", "room_id": ROOM },
            message("@irc.bob:example.org", "echo"),
            message("@carol:example.org", "still here"),
        ]
    })
    .to_string();

    let (status, _) = send(&app, "POST", "/transactions/", body).await;

    assert_eq!(status, StatusCode::OK);
    let lines = connector.lines.lock().unwrap().clone();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].0, "M-carol");
}

#[tokio::test]
async fn test_missing_token_rejected_when_configured() {
    let (app, connector) = setup(Some("hs-secret"));
    let body = json!({ "events": [message("@alice:example.org", "hello")] }).to_string();

    let (status, json) = send(&app, "PUT", "/transactions/t1", body).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["errcode"], "M_FORBIDDEN");
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_query_token_accepted() {
    let (app, connector) = setup(Some("hs-secret"));
    let body = json!({ "events": [message("@alice:example.org", "hello")] }).to_string();

    let (status, _) = send(&app, "PUT", "/transactions/t1?access_token=hs-secret", body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(connector.lines.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_bearer_token_accepted() {
    let (app, connector) = setup(Some("hs-secret"));
    let body = json!({ "events": [message("@alice:example.org", "hello")] }).to_string();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/transactions/")
                .header("authorization", "Bearer hs-secret")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(connector.lines.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_get_on_transactions_not_allowed() {
    let (app, _) = setup(None);
    let (status, _) = send(&app, "GET", "/transactions/", String::new()).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}
