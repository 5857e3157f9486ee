//! Messaging client seam.
//!
//! The bridge only talks to Telegram through [`MessagingClient`]. The Bot API client is always
//! available; the MTProto user-account client is compiled in with the `mtproto` feature.
//! New messages reach the bridge through a subscription: the client pushes events into an mpsc
//! sender and the bridge's single loop consumes them.

mod error;
mod message;
#[cfg(feature = "mtproto")]
mod mtproto;
mod telegram;

pub use error::ClientError;
pub use message::{
    ChannelRef, ChatId, IncomingMessage, Media, MediaKind, NewMessageEvent, ParseMode,
};
#[cfg(feature = "mtproto")]
pub use mtproto::{login_interactive, LoginPrompt, LoginSummary, MtprotoBridgeClient};
pub use telegram::{BotApiClient, TelegramMessage, TelegramUpdate};

use crate::config::{BridgeConfig, ConfigError, Transport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Sending half of a subscription. `Err` items are fatal for the listening loop.
pub type EventSender = mpsc::Sender<Result<NewMessageEvent, ClientError>>;

/// Connection to the messaging service: session, entity resolution, send/forward and updates.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Establish an authenticated session from the stored credential.
    async fn connect(&self) -> Result<(), ClientError>;

    fn is_connected(&self) -> bool;

    /// Resolve a numeric chat id to a live handle.
    async fn resolve_channel(&self, id: ChatId) -> Result<ChannelRef, ClientError>;

    async fn send_text(
        &self,
        to: &ChannelRef,
        text: &str,
        mode: ParseMode,
    ) -> Result<(), ClientError>;

    /// Send a new message carrying the media of `message` (posted in `from`) with `caption`.
    async fn send_media(
        &self,
        to: &ChannelRef,
        message: &IncomingMessage,
        from: &ChannelRef,
        caption: &str,
    ) -> Result<(), ClientError>;

    /// Forward `message` by reference from `from` to `to`, keeping source attribution.
    async fn forward(
        &self,
        to: &ChannelRef,
        message: &IncomingMessage,
        from: &ChannelRef,
    ) -> Result<(), ClientError>;

    /// Start delivering new messages posted in `channel` to `events`.
    async fn subscribe(
        &self,
        channel: &ChannelRef,
        events: EventSender,
    ) -> Result<SubscriptionHandle, ClientError>;

    async fn disconnect(&self) -> Result<(), ClientError>;
}

/// Handle to a running subscription. Stops the producer task on [`stop`](Self::stop) or drop.
pub struct SubscriptionHandle {
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn new(running: Arc<AtomicBool>, task: JoinHandle<()>) -> Self {
        Self {
            running,
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the client selected by `config.transport`.
pub fn build_client(config: &BridgeConfig) -> Result<Arc<dyn MessagingClient>, ConfigError> {
    match config.transport {
        Transport::BotApi => Ok(Arc::new(BotApiClient::new(
            config.session.clone(),
            config.api_base.clone(),
        ))),
        #[cfg(feature = "mtproto")]
        Transport::Mtproto => Ok(Arc::new(MtprotoBridgeClient::new(
            config.api_id,
            config.api_hash.clone(),
            config.session.clone(),
        ))),
        #[cfg(not(feature = "mtproto"))]
        Transport::Mtproto => Err(ConfigError::UnsupportedTransport(
            "mtproto transport requires building with --features mtproto".to_string(),
        )),
    }
}
