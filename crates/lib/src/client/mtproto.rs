//! [`MessagingClient`] over a user-account MTProto session (feature `mtproto`).

use super::{
    ChannelRef, ChatId, ClientError, EventSender, IncomingMessage, Media, MediaKind,
    MessagingClient, NewMessageEvent, ParseMode, SubscriptionHandle,
};
use async_trait::async_trait;
use mtproto_client::{MtprotoClient, MtprotoError, ReceivedMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use mtproto_client::{login_interactive, LoginPrompt, LoginSummary};

const UPDATE_ERROR_DELAY: Duration = Duration::from_secs(2);

/// Map an MTProto failure onto the bridge's error classes by RPC error name.
pub(crate) fn classify(err: MtprotoError) -> ClientError {
    match err {
        MtprotoError::Rpc { code, name, value } => {
            if name.starts_with("PERSISTENT_TIMESTAMP") {
                ClientError::StaleSync(name)
            } else if name.starts_with("FLOOD_WAIT") || name.starts_with("SLOWMODE_WAIT") {
                ClientError::RateLimited {
                    retry_after: Duration::from_secs(u64::from(value.unwrap_or(0))),
                }
            } else if matches!(
                name.as_str(),
                "CHANNEL_PRIVATE" | "CHANNEL_INVALID" | "CHAT_ID_INVALID" | "PEER_ID_INVALID"
            ) {
                ClientError::ChannelUnavailable(name)
            } else if name.starts_with("CHAT_WRITE_FORBIDDEN")
                || name.starts_with("CHAT_ADMIN_REQUIRED")
                || name.starts_with("CHAT_SEND_")
            {
                ClientError::WriteForbidden(name)
            } else if code == 401 {
                ClientError::Unauthorized(name)
            } else {
                ClientError::Api {
                    code: i64::from(code),
                    description: name,
                }
            }
        }
        MtprotoError::NotAuthorized => ClientError::Unauthorized(err.to_string()),
        MtprotoError::InvalidSession(_) => ClientError::Unauthorized(err.to_string()),
        MtprotoError::NotConnected => ClientError::NotConnected,
        MtprotoError::ChatNotFound(_) => ClientError::ChannelUnavailable(err.to_string()),
        other => ClientError::Transport(other.to_string()),
    }
}

fn into_incoming(message: ReceivedMessage) -> IncomingMessage {
    let media = message.media.map(|kind| Media {
        kind: match kind {
            mtproto_client::MediaKind::Photo => MediaKind::Photo,
            mtproto_client::MediaKind::Sticker => MediaKind::Sticker,
            mtproto_client::MediaKind::Document => MediaKind::Document,
            mtproto_client::MediaKind::Other => MediaKind::Other,
        },
        file_id: None,
    });
    IncomingMessage {
        id: i64::from(message.id),
        chat_id: message.chat_id,
        text: Some(message.text).filter(|t| !t.is_empty()),
        html: message.html,
        media,
    }
}

fn message_id(message: &IncomingMessage) -> Result<i32, ClientError> {
    i32::try_from(message.id).map_err(|_| ClientError::Api {
        code: 400,
        description: format!("message id {} out of range", message.id),
    })
}

pub struct MtprotoBridgeClient {
    inner: Arc<MtprotoClient>,
}

impl MtprotoBridgeClient {
    pub fn new(api_id: i32, api_hash: String, session: String) -> Self {
        Self {
            inner: Arc::new(MtprotoClient::new(api_id, api_hash, session)),
        }
    }
}

#[async_trait]
impl MessagingClient for MtprotoBridgeClient {
    async fn connect(&self) -> Result<(), ClientError> {
        self.inner.connect().await.map_err(classify)
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn resolve_channel(&self, id: ChatId) -> Result<ChannelRef, ClientError> {
        let chat = self.inner.resolve(id).await.map_err(classify)?;
        Ok(ChannelRef {
            id: chat.id,
            title: chat.title,
        })
    }

    async fn send_text(
        &self,
        to: &ChannelRef,
        text: &str,
        mode: ParseMode,
    ) -> Result<(), ClientError> {
        self.inner
            .send_text(to.id, text, mode == ParseMode::Html)
            .await
            .map_err(classify)
    }

    async fn send_media(
        &self,
        to: &ChannelRef,
        message: &IncomingMessage,
        from: &ChannelRef,
        caption: &str,
    ) -> Result<(), ClientError> {
        let (caption, html) = match message.html.as_deref() {
            Some(html) => (html, true),
            None => (caption, false),
        };
        self.inner
            .copy_media(to.id, from.id, message_id(message)?, caption, html)
            .await
            .map_err(classify)
    }

    async fn forward(
        &self,
        to: &ChannelRef,
        message: &IncomingMessage,
        from: &ChannelRef,
    ) -> Result<(), ClientError> {
        self.inner
            .forward(to.id, from.id, message_id(message)?)
            .await
            .map_err(classify)
    }

    async fn subscribe(
        &self,
        channel: &ChannelRef,
        events: EventSender,
    ) -> Result<SubscriptionHandle, ClientError> {
        if !self.inner.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let client = self.inner.clone();
        let chat_id = channel.id;
        let task = tokio::spawn(async move {
            while flag.load(Ordering::SeqCst) {
                match client.next_message().await {
                    Ok(Some(message)) if message.chat_id == chat_id => {
                        let event = NewMessageEvent::new(into_incoming(message));
                        if events.send(Ok(event)).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => match classify(e) {
                        ClientError::RateLimited { retry_after } => {
                            tokio::time::sleep(retry_after).await;
                        }
                        err @ (ClientError::Unauthorized(_) | ClientError::NotConnected) => {
                            let _ = events.send(Err(err)).await;
                            break;
                        }
                        err => {
                            log::debug!("update stream error: {}", err);
                            tokio::time::sleep(UPDATE_ERROR_DELAY).await;
                        }
                    },
                }
            }
            flag.store(false, Ordering::SeqCst);
        });
        Ok(SubscriptionHandle::new(running, task))
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        self.inner.disconnect();
        Ok(())
    }
}
