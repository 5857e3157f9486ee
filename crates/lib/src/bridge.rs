//! Bridge process: connect, resolve both channels, verify write access, then relay every new
//! post from the source channel to the destination until shutdown.
//!
//! Startup phases retry with linearly increasing delays (see [`crate::retry`]). Per-message
//! failures are isolated: the listening loop only ends on shutdown, when the subscription
//! closes, or when the subscription reports a fatal error.

use crate::client::{
    ChannelRef, ChatId, ClientError, MessagingClient, NewMessageEvent, ParseMode,
};
use crate::config::BridgeConfig;
use crate::retry::{self, RetryPolicy};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Uninitialized,
    Connecting,
    ResolvingChannels,
    Verifying,
    Listening,
    Terminated,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Connecting => write!(f, "connecting"),
            Self::ResolvingChannels => write!(f, "resolving_channels"),
            Self::Verifying => write!(f, "verifying"),
            Self::Listening => write!(f, "listening"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("startup aborted while {phase}: {error}")]
    Startup {
        phase: BridgeState,
        error: ClientError,
    },
    #[error("listening loop failed: {0}")]
    Listen(ClientError),
}

impl BridgeError {
    /// True when the underlying cause is the stale-timestamp class.
    pub fn is_stale_sync(&self) -> bool {
        match self {
            Self::Startup { error, .. } | Self::Listen(error) => error.is_tolerated_sync(),
        }
    }
}

/// How a message was relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Text,
    Media,
    Forward,
}

/// Result of handling one new-message event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Empty event or a message from another chat.
    Ignored,
    Relayed(RelayKind),
    /// The service asked to slow down; the bridge waited this long and dropped the message.
    RateLimited(Duration),
    Dropped(ClientError),
}

#[derive(Debug, Clone, Copy)]
enum ChannelRole {
    Source,
    Destination,
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Destination => write!(f, "destination"),
        }
    }
}

impl ChannelRole {
    fn capitalized(self) -> &'static str {
        match self {
            Self::Source => "Source",
            Self::Destination => "Destination",
        }
    }
}

pub struct Bridge {
    config: BridgeConfig,
    client: Arc<dyn MessagingClient>,
    source: Option<ChannelRef>,
    dest: Option<ChannelRef>,
    state: BridgeState,
    connect_policy: RetryPolicy,
    resolve_policy: RetryPolicy,
}

impl Bridge {
    pub fn new(config: BridgeConfig, client: Arc<dyn MessagingClient>) -> Self {
        Self {
            config,
            client,
            source: None,
            dest: None,
            state: BridgeState::Uninitialized,
            connect_policy: retry::CONNECT,
            resolve_policy: retry::RESOLVE,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn source(&self) -> Option<&ChannelRef> {
        self.source.as_ref()
    }

    pub fn destination(&self) -> Option<&ChannelRef> {
        self.dest.as_ref()
    }

    fn transition(&mut self, next: BridgeState) {
        log::debug!("bridge state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Run the startup phases. On failure the bridge is left in the failing phase's state.
    pub async fn start(&mut self) -> Result<(), BridgeError> {
        self.transition(BridgeState::Connecting);
        self.connect_with_retry()
            .await
            .map_err(|error| BridgeError::Startup {
                phase: BridgeState::Connecting,
                error,
            })?;

        self.transition(BridgeState::ResolvingChannels);
        for role in [ChannelRole::Source, ChannelRole::Destination] {
            let id = match role {
                ChannelRole::Source => self.config.source_chat_id,
                ChannelRole::Destination => self.config.dest_chat_id,
            };
            let channel = self
                .resolve_with_retry(role, id)
                .await
                .map_err(|error| BridgeError::Startup {
                    phase: BridgeState::ResolvingChannels,
                    error,
                })?;
            match role {
                ChannelRole::Source => self.source = Some(channel),
                ChannelRole::Destination => self.dest = Some(channel),
            }
        }

        self.transition(BridgeState::Verifying);
        self.verify_destination()
            .await
            .map_err(|error| BridgeError::Startup {
                phase: BridgeState::Verifying,
                error,
            })?;
        Ok(())
    }

    async fn connect_with_retry(&self) -> Result<(), ClientError> {
        let policy = self.connect_policy;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.client.connect().await {
                Ok(()) => {
                    log::info!("✅ Client started successfully");
                    return Ok(());
                }
                Err(e) => e,
            };
            if error.is_tolerated_sync() {
                log::warn!(
                    "⚠️ Timestamp outdated during start (attempt {}): {}",
                    attempt,
                    error
                );
            } else {
                log::error!("❌ Failed to start client (attempt {}): {}", attempt, error);
            }
            match policy.delay_after(attempt) {
                Some(delay) => tokio::time::sleep(delay).await,
                None if error.is_tolerated_sync() => {
                    log::warn!("⚠️ Proceeding despite timestamp error");
                    return Ok(());
                }
                None => return Err(error),
            }
        }
    }

    async fn resolve_with_retry(
        &self,
        role: ChannelRole,
        id: ChatId,
    ) -> Result<ChannelRef, ClientError> {
        let policy = self.resolve_policy;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.client.resolve_channel(id).await {
                Ok(channel) => {
                    log::info!("✅ {} channel: {}", role.capitalized(), channel.title);
                    return Ok(channel);
                }
                Err(e) => e,
            };
            if error.is_tolerated_sync() {
                log::warn!(
                    "⚠️ Timestamp error getting {} entity (attempt {}): {}",
                    role,
                    attempt,
                    error
                );
            } else {
                log::error!(
                    "❌ Failed to get {} entity (attempt {}): {}",
                    role,
                    attempt,
                    error
                );
            }
            match policy.delay_after(attempt) {
                Some(delay) => tokio::time::sleep(delay).await,
                None if error.is_tolerated_sync() => {
                    log::warn!(
                        "⚠️ Proceeding with {} entity despite timestamp error",
                        role
                    );
                    return match self.client.resolve_channel(id).await {
                        Ok(channel) => {
                            log::info!("✅ {} channel: {}", role.capitalized(), channel.title);
                            Ok(channel)
                        }
                        Err(e) => {
                            log::error!("❌ Could not get {} entity after all retries", role);
                            Err(e)
                        }
                    };
                }
                None => return Err(error),
            }
        }
    }

    /// Send one message to the destination to prove write access. Only a permission error fails.
    async fn verify_destination(&self) -> Result<(), ClientError> {
        let dest = self.dest.as_ref().ok_or(ClientError::NotConnected)?;
        let text = format!(
            "🤖 Bridge started at {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        match self.client.send_text(dest, &text, ParseMode::Plain).await {
            Ok(()) => {
                log::info!("✅ Test message sent successfully");
                Ok(())
            }
            Err(e) if e.is_write_forbidden() => {
                log::error!("❌ No permission to write to destination channel");
                Err(e)
            }
            Err(e) => {
                log::warn!("⚠️ Test message failed: {}", e);
                Ok(())
            }
        }
    }

    /// Relay one event to the destination. Never fails: errors are logged and the message dropped.
    pub async fn forward_message(&self, event: &NewMessageEvent) -> ForwardOutcome {
        let Some(message) = event.message.as_ref() else {
            return ForwardOutcome::Ignored;
        };
        if message.chat_id != self.config.source_chat_id {
            return ForwardOutcome::Ignored;
        }
        let (Some(source), Some(dest)) = (self.source.as_ref(), self.dest.as_ref()) else {
            log::warn!("message {} received before channels were resolved", message.id);
            return ForwardOutcome::Dropped(ClientError::NotConnected);
        };

        log::info!("📨 Received: {}", message.preview());

        let (kind, result) = if message.media.is_some() {
            let caption = message.text().unwrap_or("");
            (
                RelayKind::Media,
                self.client.send_media(dest, message, source, caption).await,
            )
        } else if let Some(text) = message.text() {
            let result = match message.html.as_deref() {
                Some(html) => self.client.send_text(dest, html, ParseMode::Html).await,
                None => self.client.send_text(dest, text, ParseMode::Plain).await,
            };
            (RelayKind::Text, result)
        } else {
            (
                RelayKind::Forward,
                self.client.forward(dest, message, source).await,
            )
        };

        match result {
            Ok(()) => {
                log::info!("✅ Message forwarded successfully");
                ForwardOutcome::Relayed(kind)
            }
            Err(ClientError::RateLimited { retry_after }) => {
                log::warn!("⏳ Rate limited, waiting {} seconds", retry_after.as_secs());
                tokio::time::sleep(retry_after).await;
                ForwardOutcome::RateLimited(retry_after)
            }
            Err(e) if e.is_write_forbidden() => {
                log::error!("❌ No permission to write to destination channel");
                ForwardOutcome::Dropped(e)
            }
            Err(e) => {
                log::error!("❌ Failed to forward message: {}", e);
                ForwardOutcome::Dropped(e)
            }
        }
    }

    /// Run until SIGINT/SIGTERM, the subscription closes, or a fatal error.
    pub async fn run(&mut self) -> Result<(), BridgeError> {
        self.run_until(shutdown_signal()).await
    }

    /// Start, listen until `shutdown` resolves, and always release the connection.
    /// `shutdown` also interrupts startup retries and rate-limit waits.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let started = tokio::select! {
            _ = &mut shutdown => None,
            result = self.start() => Some(result),
        };
        match started {
            None => {
                log::info!("👋 Bridge stopped by user");
                self.cleanup().await;
                self.transition(BridgeState::Terminated);
                return Ok(());
            }
            Some(Err(e)) => {
                log::error!("❌ Failed to initialize bridge: {}", e);
                self.cleanup().await;
                self.transition(BridgeState::Terminated);
                return Err(e);
            }
            Some(Ok(())) => {}
        }

        let result = self.listen(shutdown.as_mut()).await;
        if let Err(ref e) = result {
            log::error!("❌ Bridge crashed: {}", e);
        }
        self.cleanup().await;
        self.transition(BridgeState::Terminated);
        result.map_err(BridgeError::Listen)
    }

    async fn listen<F>(&mut self, shutdown: F) -> Result<(), ClientError>
    where
        F: Future<Output = ()>,
    {
        let source = self.source.clone().ok_or(ClientError::NotConnected)?;
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let mut subscription = self.client.subscribe(&source, tx).await?;
        self.transition(BridgeState::Listening);
        log::info!("🚀 Bridge is live and listening for messages...");

        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("👋 Bridge stopped by user");
                    break Ok(());
                }
                event = rx.recv() => match event {
                    Some(Ok(event)) => {
                        let stopped = tokio::select! {
                            _ = &mut shutdown => true,
                            _ = self.forward_message(&event) => false,
                        };
                        if stopped {
                            log::info!("👋 Bridge stopped by user");
                            break Ok(());
                        }
                    }
                    Some(Err(e)) => break Err(e),
                    None => {
                        log::info!("subscription closed, client disconnected");
                        break Ok(());
                    }
                },
            }
        };
        subscription.stop();
        result
    }

    /// Release the connection if it is open. Errors are logged, never propagated.
    pub async fn cleanup(&mut self) {
        if !self.client.is_connected() {
            return;
        }
        match self.client.disconnect().await {
            Ok(()) => log::info!("✅ Client disconnected"),
            Err(e) => log::error!("❌ Error during cleanup: {}", e),
        }
    }
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}
