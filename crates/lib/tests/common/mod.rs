//! Scripted in-memory messaging client shared by the integration tests.
//!
//! Every call is recorded with the (paused) tokio clock so tests can assert retry timings.
//! Scripted results are consumed in order; once a script runs out, the call succeeds.

#![allow(dead_code)]

use async_trait::async_trait;
use lib::client::{
    ChannelRef, ChatId, ClientError, EventSender, IncomingMessage, Media, MediaKind,
    MessagingClient, NewMessageEvent, ParseMode, SubscriptionHandle,
};
use lib::config::{BridgeConfig, Config};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const SOURCE: ChatId = -1001234567890;
pub const DEST: ChatId = -1009876543210;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Resolve(ChatId),
    SendText {
        to: ChatId,
        text: String,
        mode: ParseMode,
    },
    SendMedia {
        to: ChatId,
        message_id: i64,
        caption: String,
    },
    Forward {
        to: ChatId,
        message_id: i64,
    },
    Subscribe(ChatId),
    Disconnect,
}

/// What one `subscribe` call delivers.
pub struct SubscriptionScript {
    pub events: Vec<Result<NewMessageEvent, ClientError>>,
    /// Close the event channel once the events are delivered.
    pub close: bool,
}

pub struct MockClient {
    started: Instant,
    calls: Mutex<Vec<(Call, Duration)>>,
    connect: Mutex<VecDeque<Result<(), ClientError>>>,
    resolve: Mutex<HashMap<ChatId, VecDeque<Result<ChannelRef, ClientError>>>>,
    send: Mutex<VecDeque<Result<(), ClientError>>>,
    subscriptions: Mutex<VecDeque<SubscriptionScript>>,
    connected: AtomicBool,
}

impl MockClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            calls: Mutex::new(Vec::new()),
            connect: Mutex::new(VecDeque::new()),
            resolve: Mutex::new(HashMap::new()),
            send: Mutex::new(VecDeque::new()),
            subscriptions: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(false),
        })
    }

    pub fn script_connect(&self, results: Vec<Result<(), ClientError>>) {
        self.connect.lock().unwrap().extend(results);
    }

    pub fn script_resolve(&self, id: ChatId, results: Vec<Result<ChannelRef, ClientError>>) {
        self.resolve
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .extend(results);
    }

    /// Results for send_text, send_media and forward, shared in call order.
    pub fn script_send(&self, results: Vec<Result<(), ClientError>>) {
        self.send.lock().unwrap().extend(results);
    }

    pub fn script_subscription(&self, events: Vec<Result<NewMessageEvent, ClientError>>, close: bool) {
        self.subscriptions
            .lock()
            .unwrap()
            .push_back(SubscriptionScript { events, close });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
    }

    /// Seconds since creation at which each call matching `pred` was made.
    pub fn times_of(&self, pred: impl Fn(&Call) -> bool) -> Vec<u64> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| pred(c))
            .map(|(_, t)| t.as_secs())
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    /// Calls that delivered content to the destination, excluding the startup test message.
    pub fn relays(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| match c {
                Call::SendText { text, .. } => !text.starts_with("🤖 Bridge started at"),
                Call::SendMedia { .. } | Call::Forward { .. } => true,
                _ => false,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        let at = Instant::now().duration_since(self.started);
        self.calls.lock().unwrap().push((call, at));
    }

    fn next_send(&self) -> Result<(), ClientError> {
        self.send.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

pub fn channel(id: ChatId) -> ChannelRef {
    ChannelRef {
        id,
        title: format!("Channel {}", id),
    }
}

#[async_trait]
impl MessagingClient for MockClient {
    async fn connect(&self) -> Result<(), ClientError> {
        self.record(Call::Connect);
        let result = self.connect.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.connected.store(true, Ordering::SeqCst);
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn resolve_channel(&self, id: ChatId) -> Result<ChannelRef, ClientError> {
        self.record(Call::Resolve(id));
        self.resolve
            .lock()
            .unwrap()
            .get_mut(&id)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| Ok(channel(id)))
    }

    async fn send_text(&self, to: &ChannelRef, text: &str, mode: ParseMode) -> Result<(), ClientError> {
        self.record(Call::SendText {
            to: to.id,
            text: text.to_string(),
            mode,
        });
        self.next_send()
    }

    async fn send_media(
        &self,
        to: &ChannelRef,
        message: &IncomingMessage,
        _from: &ChannelRef,
        caption: &str,
    ) -> Result<(), ClientError> {
        self.record(Call::SendMedia {
            to: to.id,
            message_id: message.id,
            caption: caption.to_string(),
        });
        self.next_send()
    }

    async fn forward(
        &self,
        to: &ChannelRef,
        message: &IncomingMessage,
        _from: &ChannelRef,
    ) -> Result<(), ClientError> {
        self.record(Call::Forward {
            to: to.id,
            message_id: message.id,
        });
        self.next_send()
    }

    async fn subscribe(
        &self,
        channel: &ChannelRef,
        events: EventSender,
    ) -> Result<SubscriptionHandle, ClientError> {
        self.record(Call::Subscribe(channel.id));
        let script = self
            .subscriptions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SubscriptionScript {
                events: Vec::new(),
                close: false,
            });
        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(async move {
            for event in script.events {
                if events.send(event).await.is_err() {
                    return;
                }
            }
            if !script.close {
                // Hold the sender so the channel stays open.
                let _events = events;
                std::future::pending::<()>().await;
            }
        });
        Ok(SubscriptionHandle::new(running, task))
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        self.record(Call::Disconnect);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub fn bridge_config() -> BridgeConfig {
    let mut config = Config::default();
    config.source_chat_id = SOURCE;
    config.dest_chat_id = DEST;
    BridgeConfig::from_config(&config, Some("123456:test-token".to_string())).unwrap()
}

pub fn text_message(id: i64, chat_id: ChatId, text: &str) -> NewMessageEvent {
    NewMessageEvent::new(IncomingMessage {
        id,
        chat_id,
        text: Some(text.to_string()),
        html: None,
        media: None,
    })
}

pub fn html_message(id: i64, text: &str, html: &str) -> NewMessageEvent {
    NewMessageEvent::new(IncomingMessage {
        id,
        chat_id: SOURCE,
        text: Some(text.to_string()),
        html: Some(html.to_string()),
        media: None,
    })
}

pub fn media_message(id: i64, caption: Option<&str>) -> NewMessageEvent {
    NewMessageEvent::new(IncomingMessage {
        id,
        chat_id: SOURCE,
        text: caption.map(str::to_string),
        html: None,
        media: Some(Media {
            kind: MediaKind::Photo,
            file_id: Some("AgACAgIAAx0".to_string()),
        }),
    })
}

pub fn bare_message(id: i64) -> NewMessageEvent {
    NewMessageEvent::new(IncomingMessage {
        id,
        chat_id: SOURCE,
        text: None,
        html: None,
        media: None,
    })
}

pub fn stale() -> ClientError {
    ClientError::StaleSync("PERSISTENT_TIMESTAMP_OUTDATED".to_string())
}
