//! Integration test: run a mock Bot API server on a free port and drive `BotApiClient` against it.
//! Does not require network access or a real bot token.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use lib::client::{
    BotApiClient, ChannelRef, ClientError, IncomingMessage, Media, MediaKind, MessagingClient,
    ParseMode,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const TOKEN: &str = "123456:test-token";
const SOURCE: i64 = -1001234567890;
const DEST: i64 = -1009876543210;

#[derive(Clone, Default)]
struct MockApi {
    requests: Arc<Mutex<Vec<(String, Value)>>>,
    scripted: Arc<Mutex<HashMap<String, VecDeque<(u16, Value)>>>>,
}

impl MockApi {
    fn script(&self, method: &str, status: u16, body: Value) {
        self.scripted
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back((status, body));
    }

    fn requests_for(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, b)| b.clone())
            .collect()
    }
}

async fn handle(
    State(api): State<MockApi>,
    Path((bot, method)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if bot != format!("bot{}", TOKEN) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "ok": false, "error_code": 401, "description": "Unauthorized" })),
        );
    }
    api.requests
        .lock()
        .unwrap()
        .push((method.clone(), body.clone()));

    let scripted = api
        .scripted
        .lock()
        .unwrap()
        .get_mut(&method)
        .and_then(|q| q.pop_front());
    if let Some((status, reply)) = scripted {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
        return (status, Json(reply));
    }

    let reply = match method.as_str() {
        "getMe" => json!({ "ok": true, "result": { "id": 42, "is_bot": true, "username": "relay_bot" } }),
        "getChat" => json!({
            "ok": true,
            "result": { "id": body["chat_id"], "type": "channel", "title": format!("Chat {}", body["chat_id"]) }
        }),
        "getUpdates" => {
            tokio::time::sleep(Duration::from_millis(20)).await;
            json!({ "ok": true, "result": [] })
        }
        _ => json!({ "ok": true, "result": { "message_id": 1 } }),
    };
    (StatusCode::OK, Json(reply))
}

async fn start_mock() -> (MockApi, String) {
    let api = MockApi::default();
    let app = Router::new()
        .route("/:bot/:method", post(handle))
        .with_state(api.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (api, format!("http://{}", addr))
}

async fn wait_for_polls(api: &MockApi, count: usize) -> Vec<Value> {
    for _ in 0..200 {
        if api.requests_for("getUpdates").len() >= count {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let polls = api.requests_for("getUpdates");
    assert!(polls.len() >= count, "only {} getUpdates calls", polls.len());
    polls
}

fn channel(id: i64) -> ChannelRef {
    ChannelRef {
        id,
        title: format!("Chat {}", id),
    }
}

#[tokio::test]
async fn connect_resolve_and_send_html() {
    let (api, base) = start_mock().await;
    let client = BotApiClient::new(TOKEN.to_string(), Some(base));

    assert!(!client.is_connected());
    client.connect().await.unwrap();
    assert!(client.is_connected());

    let dest = client.resolve_channel(DEST).await.unwrap();
    assert_eq!(dest.id, DEST);
    assert_eq!(dest.title, format!("Chat {}", DEST));

    client
        .send_text(&dest, "<b>hi</b>", ParseMode::Html)
        .await
        .unwrap();
    client
        .send_text(&dest, "a < b", ParseMode::Plain)
        .await
        .unwrap();

    let sent = api.requests_for("sendMessage");
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0]["chat_id"], json!(DEST));
    assert_eq!(sent[0]["parse_mode"], json!("HTML"));
    assert_eq!(sent[1]["text"], json!("a < b"));
    assert!(sent[1].get("parse_mode").is_none());
}

#[tokio::test]
async fn wrong_token_is_unauthorized() {
    let (_api, base) = start_mock().await;
    let client = BotApiClient::new("999:wrong".to_string(), Some(base));
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::Unauthorized(_)));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn too_many_requests_maps_to_rate_limited() {
    let (api, base) = start_mock().await;
    api.script(
        "sendMessage",
        429,
        json!({
            "ok": false,
            "error_code": 429,
            "description": "Too Many Requests: retry after 5",
            "parameters": { "retry_after": 5 }
        }),
    );
    let client = BotApiClient::new(TOKEN.to_string(), Some(base));
    let err = client
        .send_text(&channel(DEST), "hello", ParseMode::Plain)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ClientError::RateLimited {
            retry_after: Duration::from_secs(5)
        }
    );
}

#[tokio::test]
async fn missing_channel_maps_to_channel_unavailable() {
    let (api, base) = start_mock().await;
    api.script(
        "getChat",
        400,
        json!({ "ok": false, "error_code": 400, "description": "Bad Request: chat not found" }),
    );
    let client = BotApiClient::new(TOKEN.to_string(), Some(base));
    let err = client.resolve_channel(SOURCE).await.unwrap_err();
    assert!(matches!(err, ClientError::ChannelUnavailable(_)));
}

#[tokio::test]
async fn media_is_resent_by_file_id_or_copied() {
    let (api, base) = start_mock().await;
    let client = BotApiClient::new(TOKEN.to_string(), Some(base));
    let (source, dest) = (channel(SOURCE), channel(DEST));

    let photo = IncomingMessage {
        id: 5,
        chat_id: SOURCE,
        text: Some("caption".to_string()),
        html: None,
        media: Some(Media {
            kind: MediaKind::Photo,
            file_id: Some("AgACAgIAAx0".to_string()),
        }),
    };
    client
        .send_media(&dest, &photo, &source, "caption")
        .await
        .unwrap();

    let other = IncomingMessage {
        id: 6,
        chat_id: SOURCE,
        text: None,
        html: None,
        media: Some(Media {
            kind: MediaKind::Other,
            file_id: None,
        }),
    };
    client.send_media(&dest, &other, &source, "").await.unwrap();

    let photos = api.requests_for("sendPhoto");
    assert_eq!(photos.len(), 1);
    assert_eq!(photos[0]["photo"], json!("AgACAgIAAx0"));
    assert_eq!(photos[0]["caption"], json!("caption"));

    let copies = api.requests_for("copyMessage");
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0]["from_chat_id"], json!(SOURCE));
    assert_eq!(copies[0]["message_id"], json!(6));
    assert!(copies[0].get("caption").is_none());
}

#[tokio::test]
async fn forward_keeps_source_reference() {
    let (api, base) = start_mock().await;
    let client = BotApiClient::new(TOKEN.to_string(), Some(base));
    let message = IncomingMessage {
        id: 77,
        chat_id: SOURCE,
        text: None,
        html: None,
        media: None,
    };
    client
        .forward(&channel(DEST), &message, &channel(SOURCE))
        .await
        .unwrap();

    let forwards = api.requests_for("forwardMessage");
    assert_eq!(
        forwards,
        vec![json!({ "chat_id": DEST, "from_chat_id": SOURCE, "message_id": 77 })]
    );
}

#[tokio::test]
async fn subscription_delivers_only_source_channel_posts() {
    let (api, base) = start_mock().await;
    // Nothing pending at startup.
    api.script("getUpdates", 200, json!({ "ok": true, "result": [] }));
    api.script(
        "getUpdates",
        200,
        json!({
            "ok": true,
            "result": [
                { "update_id": 100, "channel_post": { "message_id": 1, "chat": { "id": -1005555555555i64 }, "text": "other" } },
                { "update_id": 101, "channel_post": { "message_id": 2, "chat": { "id": SOURCE }, "text": "ours" } }
            ]
        }),
    );
    let client = BotApiClient::new(TOKEN.to_string(), Some(base));

    let (tx, mut rx) = mpsc::channel(8);
    let not_connected = client.subscribe(&channel(SOURCE), tx.clone()).await;
    assert!(matches!(not_connected, Err(ClientError::NotConnected)));

    client.connect().await.unwrap();
    let mut subscription = client.subscribe(&channel(SOURCE), tx).await.unwrap();
    assert!(subscription.is_running());

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within 5s")
        .expect("channel open")
        .expect("no subscription error");
    let message = event.message.expect("message");
    assert_eq!(message.chat_id, SOURCE);
    assert_eq!(message.text.as_deref(), Some("ours"));

    // The next poll acknowledges both updates.
    let polls = wait_for_polls(&api, 3).await;
    assert_eq!(polls[0]["offset"], json!(-1));
    assert_eq!(polls[0]["timeout"], json!(0));
    assert!(polls[1].get("offset").is_none());
    assert_eq!(polls[1]["allowed_updates"], json!(["channel_post"]));
    assert_eq!(polls[2]["offset"], json!(102));

    subscription.stop();
    assert!(!subscription.is_running());
}

#[tokio::test]
async fn posts_queued_before_startup_are_skipped() {
    let (api, base) = start_mock().await;
    api.script(
        "getUpdates",
        200,
        json!({
            "ok": true,
            "result": [
                { "update_id": 500, "channel_post": { "message_id": 9, "chat": { "id": SOURCE }, "text": "posted while offline" } }
            ]
        }),
    );
    let client = BotApiClient::new(TOKEN.to_string(), Some(base));
    client.connect().await.unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let mut subscription = client.subscribe(&channel(SOURCE), tx).await.unwrap();

    let nothing = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(nothing.is_err(), "backlog post was delivered");

    let polls = wait_for_polls(&api, 2).await;
    assert_eq!(polls[0]["offset"], json!(-1));
    assert_eq!(polls[1]["offset"], json!(501));

    subscription.stop();
}

#[tokio::test]
async fn polling_conflict_ends_the_subscription() {
    let (api, base) = start_mock().await;
    api.script("getUpdates", 200, json!({ "ok": true, "result": [] }));
    api.script(
        "getUpdates",
        409,
        json!({
            "ok": false,
            "error_code": 409,
            "description": "Conflict: terminated by other getUpdates request"
        }),
    );
    let client = BotApiClient::new(TOKEN.to_string(), Some(base));
    client.connect().await.unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let _subscription = client.subscribe(&channel(SOURCE), tx).await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("error within 5s")
        .expect("channel open")
        .expect_err("conflict is reported");
    assert!(matches!(err, ClientError::Api { code: 409, .. }));

    // The loop stops polling after a conflict.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(api.requests_for("getUpdates").len(), 2);
}
