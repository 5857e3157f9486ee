//! Telegram Bot API client: getMe/getChat/sendMessage/forwardMessage and a getUpdates long-poll
//! loop for channel posts.

use super::{
    ChannelRef, ChatId, ClientError, EventSender, IncomingMessage, Media, MediaKind,
    MessagingClient, NewMessageEvent, ParseMode, SubscriptionHandle,
};
use crate::format::{entities_to_html, MessageEntity};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT: u64 = 30;
const POLL_ERROR_DELAY: Duration = Duration::from_secs(2);

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    id: i64,
    #[serde(default)]
    username: Option<String>,
}

/// Telegram update payload (getUpdates result item). Only channel posts are requested.
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub channel_post: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub caption_entities: Vec<MessageEntity>,
    #[serde(default)]
    pub photo: Vec<FileRef>,
    #[serde(default)]
    pub video: Option<FileRef>,
    #[serde(default)]
    pub animation: Option<FileRef>,
    #[serde(default)]
    pub audio: Option<FileRef>,
    #[serde(default)]
    pub voice: Option<FileRef>,
    #[serde(default)]
    pub document: Option<FileRef>,
    #[serde(default)]
    pub sticker: Option<FileRef>,
    #[serde(default)]
    pub video_note: Option<FileRef>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    pub file_id: String,
}

impl TelegramMessage {
    fn media(&self) -> Option<Media> {
        let with = |kind, file: &FileRef| Media {
            kind,
            file_id: Some(file.file_id.clone()),
        };
        // Animations also carry `document`, so they are checked first.
        if let Some(largest) = self.photo.last() {
            Some(with(MediaKind::Photo, largest))
        } else if let Some(f) = &self.animation {
            Some(with(MediaKind::Animation, f))
        } else if let Some(f) = &self.video {
            Some(with(MediaKind::Video, f))
        } else if let Some(f) = &self.audio {
            Some(with(MediaKind::Audio, f))
        } else if let Some(f) = &self.voice {
            Some(with(MediaKind::Voice, f))
        } else if let Some(f) = &self.document {
            Some(with(MediaKind::Document, f))
        } else if let Some(f) = &self.sticker {
            Some(with(MediaKind::Sticker, f))
        } else {
            self.video_note.as_ref().map(|f| with(MediaKind::Other, f))
        }
    }

    /// Convert to the bridge's message type. Captions become the message text.
    pub fn into_incoming(self) -> IncomingMessage {
        let media = self.media();
        let (text, entities) = match self.text {
            Some(t) => (Some(t), self.entities),
            None => (self.caption, self.caption_entities),
        };
        let html = match &text {
            Some(t) if !entities.is_empty() => Some(entities_to_html(t, &entities)),
            _ => None,
        };
        IncomingMessage {
            id: self.message_id,
            chat_id: self.chat.id,
            text,
            html,
            media,
        }
    }
}

/// Map a Bot API failure to the bridge's error taxonomy.
pub(crate) fn classify_error(
    code: i64,
    description: &str,
    retry_after: Option<u64>,
) -> ClientError {
    let upper = description.to_ascii_uppercase();
    if upper.contains("PERSISTENT_TIMESTAMP") {
        return ClientError::StaleSync(description.to_string());
    }
    match code {
        429 => ClientError::RateLimited {
            retry_after: Duration::from_secs(retry_after.unwrap_or(1)),
        },
        401 => ClientError::Unauthorized(description.to_string()),
        403 => ClientError::WriteForbidden(description.to_string()),
        400 if upper.contains("CHAT NOT FOUND")
            || upper.contains("CHANNEL_PRIVATE")
            || upper.contains("CHANNEL_INVALID") =>
        {
            ClientError::ChannelUnavailable(description.to_string())
        }
        400 if upper.contains("NOT ENOUGH RIGHTS") || upper.contains("CHAT_WRITE_FORBIDDEN") => {
            ClientError::WriteForbidden(description.to_string())
        }
        _ => ClientError::Api {
            code,
            description: description.to_string(),
        },
    }
}

/// Bot API client. The session credential is the bot token. Cheap to clone; clones share
/// the connection flag.
#[derive(Clone)]
pub struct BotApiClient {
    token: String,
    base_url: String,
    connected: Arc<AtomicBool>,
    client: reqwest::Client,
}

impl BotApiClient {
    pub fn new(token: String, base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| TELEGRAM_API_BASE.to_string());
        Self {
            token,
            base_url,
            connected: Arc::new(AtomicBool::new(false)),
            client: reqwest::Client::new(),
        }
    }

    /// POST a Bot API method with a JSON body and decode `result`.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, ClientError> {
        let url = format!("{}/bot{}/{}", self.base_url, self.token, method);
        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.without_url().to_string()))?;
        let status = res.status();
        let data: ApiResponse<T> = res.json().await.map_err(|e| {
            ClientError::Transport(format!("{} {}: {}", method, status, e.without_url()))
        })?;
        if data.ok {
            return data.result.ok_or_else(|| ClientError::Api {
                code: i64::from(status.as_u16()),
                description: format!("{} returned no result", method),
            });
        }
        let code = data.error_code.unwrap_or_else(|| i64::from(status.as_u16()));
        let description = data
            .description
            .unwrap_or_else(|| format!("{} failed", method));
        let retry_after = data.parameters.and_then(|p| p.retry_after);
        Err(classify_error(code, &description, retry_after))
    }

    /// Call getUpdates (long poll) for channel posts.
    async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<TelegramUpdate>, ClientError> {
        let mut body = json!({
            "timeout": LONG_POLL_TIMEOUT,
            "allowed_updates": ["channel_post"],
        });
        if let Some(off) = offset {
            body["offset"] = json!(off);
        }
        self.call("getUpdates", body).await
    }

    /// Confirm every update queued before now and return the offset of the first new one.
    /// Posts made while the bridge was down are not relayed.
    async fn skip_pending_updates(&self) -> Option<i64> {
        let body = json!({
            "offset": -1,
            "timeout": 0,
            "allowed_updates": ["channel_post"],
        });
        match self.call::<Vec<TelegramUpdate>>("getUpdates", body).await {
            Ok(updates) => updates.last().map(|u| u.update_id + 1),
            Err(e) => {
                log::warn!("telegram: could not skip pending updates: {}", e);
                None
            }
        }
    }

    fn media_method(kind: MediaKind) -> Option<(&'static str, &'static str)> {
        match kind {
            MediaKind::Photo => Some(("sendPhoto", "photo")),
            MediaKind::Video => Some(("sendVideo", "video")),
            MediaKind::Animation => Some(("sendAnimation", "animation")),
            MediaKind::Audio => Some(("sendAudio", "audio")),
            MediaKind::Voice => Some(("sendVoice", "voice")),
            MediaKind::Document => Some(("sendDocument", "document")),
            MediaKind::Sticker => Some(("sendSticker", "sticker")),
            MediaKind::Other => None,
        }
    }
}

async fn run_get_updates_loop(
    client: BotApiClient,
    chat_id: ChatId,
    events: EventSender,
    running: Arc<AtomicBool>,
    mut offset: Option<i64>,
) {
    let mut last_error: Option<String> = None;
    while running.load(Ordering::SeqCst) && !events.is_closed() {
        match client.get_updates(offset).await {
            Ok(updates) => {
                last_error = None;
                for u in updates {
                    offset = Some(u.update_id + 1);
                    let Some(post) = u.channel_post else { continue };
                    if post.chat.id != chat_id {
                        continue;
                    }
                    let event = NewMessageEvent::new(post.into_incoming());
                    if events.send(Ok(event)).await.is_err() {
                        log::debug!("telegram: event receiver closed, stopping loop");
                        return;
                    }
                }
            }
            Err(ClientError::RateLimited { retry_after }) => {
                log::warn!("telegram getUpdates rate limited, waiting {}s", retry_after.as_secs());
                tokio::time::sleep(retry_after).await;
            }
            Err(e @ ClientError::Unauthorized(_)) => {
                log::error!("telegram getUpdates rejected the token: {}", e);
                client.connected.store(false, Ordering::SeqCst);
                let _ = events.send(Err(e)).await;
                return;
            }
            // Webhook set or another instance polling the same token.
            Err(e @ ClientError::Api { code: 409, .. }) => {
                log::error!("telegram getUpdates conflict: {}", e);
                let _ = events.send(Err(e)).await;
                return;
            }
            Err(e) => {
                let message = e.to_string();
                if last_error.as_deref() == Some(message.as_str()) {
                    log::debug!("telegram getUpdates error: {}", message);
                } else {
                    log::warn!("telegram getUpdates error: {}", message);
                    last_error = Some(message);
                }
                tokio::time::sleep(POLL_ERROR_DELAY).await;
            }
        }
    }
    log::info!("telegram: getUpdates loop stopped");
}

#[async_trait]
impl MessagingClient for BotApiClient {
    async fn connect(&self) -> Result<(), ClientError> {
        let me: BotUser = self.call("getMe", json!({})).await?;
        log::info!(
            "telegram: authorized as @{} ({})",
            me.username.as_deref().unwrap_or("unknown"),
            me.id
        );
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn resolve_channel(&self, id: ChatId) -> Result<ChannelRef, ClientError> {
        let chat: TelegramChat = self.call("getChat", json!({ "chat_id": id })).await?;
        Ok(ChannelRef {
            id: chat.id,
            title: chat.title.unwrap_or_else(|| "Unknown".to_string()),
        })
    }

    async fn send_text(
        &self,
        to: &ChannelRef,
        text: &str,
        mode: ParseMode,
    ) -> Result<(), ClientError> {
        let mut body = json!({ "chat_id": to.id, "text": text });
        if mode == ParseMode::Html {
            body["parse_mode"] = json!("HTML");
        }
        let _: serde_json::Value = self.call("sendMessage", body).await?;
        Ok(())
    }

    async fn send_media(
        &self,
        to: &ChannelRef,
        message: &IncomingMessage,
        from: &ChannelRef,
        caption: &str,
    ) -> Result<(), ClientError> {
        let (caption, parse_mode) = match message.html.as_deref() {
            Some(html) => (html, Some("HTML")),
            None => (caption, None),
        };
        let media = message.media.as_ref();
        let direct = media.and_then(|m| {
            let file_id = m.file_id.as_deref()?;
            Self::media_method(m.kind).map(|(method, field)| (m.kind, method, field, file_id))
        });
        let (method, body) = match direct {
            Some((kind, method, field, file_id)) => {
                let mut body = json!({ "chat_id": to.id });
                body[field] = json!(file_id);
                if kind != MediaKind::Sticker && !caption.is_empty() {
                    body["caption"] = json!(caption);
                    if let Some(mode) = parse_mode {
                        body["parse_mode"] = json!(mode);
                    }
                }
                (method, body)
            }
            // No reusable file id: copy the post, which also makes a new message.
            None => {
                let mut body = json!({
                    "chat_id": to.id,
                    "from_chat_id": from.id,
                    "message_id": message.id,
                });
                if !caption.is_empty() {
                    body["caption"] = json!(caption);
                    if let Some(mode) = parse_mode {
                        body["parse_mode"] = json!(mode);
                    }
                }
                ("copyMessage", body)
            }
        };
        let _: serde_json::Value = self.call(method, body).await?;
        Ok(())
    }

    async fn forward(
        &self,
        to: &ChannelRef,
        message: &IncomingMessage,
        from: &ChannelRef,
    ) -> Result<(), ClientError> {
        let body = json!({
            "chat_id": to.id,
            "from_chat_id": from.id,
            "message_id": message.id,
        });
        let _: serde_json::Value = self.call("forwardMessage", body).await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &ChannelRef,
        events: EventSender,
    ) -> Result<SubscriptionHandle, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let offset = self.skip_pending_updates().await;
        let running = Arc::new(AtomicBool::new(true));
        log::info!("telegram: starting getUpdates long-poll loop for {}", channel.id);
        let task = tokio::spawn(run_get_updates_loop(
            self.clone(),
            channel.id,
            events,
            running.clone(),
            offset,
        ));
        Ok(SubscriptionHandle::new(running, task))
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
