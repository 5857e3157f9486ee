//! Messages and channel handles exchanged between a client and the bridge.

use crate::format;

/// Telegram chat id in marked form (channels are `-100` followed by the bare id).
pub type ChatId = i64;

/// A resolved channel: numeric id plus the title reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub id: ChatId,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Plain,
    Html,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Animation,
    Audio,
    Voice,
    Document,
    Sticker,
    Other,
}

/// Media attached to a message. `file_id` is set when the transport can re-send by file id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    pub kind: MediaKind,
    pub file_id: Option<String>,
}

/// A message posted in a subscribed channel. Text carries the caption for media messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub id: i64,
    pub chat_id: ChatId,
    pub text: Option<String>,
    /// `text` rendered as Telegram HTML, present when the message had inline formatting.
    pub html: Option<String>,
    pub media: Option<Media>,
}

impl IncomingMessage {
    /// Non-empty text, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    /// Short log preview of the content.
    pub fn preview(&self) -> String {
        format::preview(self.text(), 50)
    }
}

/// One new-message update. `message` is `None` when the update carried nothing usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessageEvent {
    pub message: Option<IncomingMessage>,
}

impl NewMessageEvent {
    pub fn new(message: IncomingMessage) -> Self {
        Self {
            message: Some(message),
        }
    }

    pub fn empty() -> Self {
        Self { message: None }
    }
}
