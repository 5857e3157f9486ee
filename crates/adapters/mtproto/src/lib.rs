//! MTProto user-account client for tg-bridge, built on grammers.
//!
//! Chats are addressed by their marked id (channels are `-100` followed by the bare id), the
//! same form the Bot API and the bridge configuration use. Sessions travel as a base64 string.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use grammers_client::types::{Media, Message};
use grammers_client::{Client, Config, InitParams, InputMessage, SignInError, Update};
use grammers_mtsender::InvocationError;
use grammers_session::{PackedChat, PackedType, Session};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

const MARKED_CHANNEL_OFFSET: i64 = 1_000_000_000_000;

#[derive(Debug, thiserror::Error)]
pub enum MtprotoError {
    #[error("invalid session string: {0}")]
    InvalidSession(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("session is not authorized; run the session command to log in")]
    NotAuthorized,
    #[error("client is not connected")]
    NotConnected,
    #[error("chat {0} is not among this account's dialogs")]
    ChatNotFound(i64),
    #[error("message {0} no longer exists")]
    MessageNotFound(i32),
    #[error("rpc error {code} {name}")]
    Rpc {
        code: i32,
        name: String,
        value: Option<u32>,
    },
    #[error("sign-in failed: {0}")]
    SignIn(String),
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Other(String),
}

impl From<InvocationError> for MtprotoError {
    fn from(e: InvocationError) -> Self {
        match e {
            InvocationError::Rpc(rpc) => MtprotoError::Rpc {
                code: rpc.code,
                name: rpc.name,
                value: rpc.value,
            },
            other => MtprotoError::Other(other.to_string()),
        }
    }
}

pub fn to_marked_channel_id(bare: i64) -> i64 {
    -(MARKED_CHANNEL_OFFSET + bare)
}

fn marked_id(packed: &PackedChat) -> i64 {
    match packed.ty {
        PackedType::User | PackedType::Bot => packed.id,
        PackedType::Chat => -packed.id,
        _ => to_marked_channel_id(packed.id),
    }
}

/// A chat this account can see.
#[derive(Debug, Clone)]
pub struct ChatInfo {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Sticker,
    Document,
    Other,
}

/// A new message seen on the update stream.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub id: i32,
    pub chat_id: i64,
    pub text: String,
    /// Set only when the message carries formatting entities.
    pub html: Option<String>,
    pub media: Option<MediaKind>,
}

impl ReceivedMessage {
    fn from_message(message: &Message) -> Self {
        let chat = message.chat().pack();
        let html = message
            .fmt_entities()
            .filter(|entities| !entities.is_empty())
            .map(|_| message.html_text());
        let media = message.media().map(|m| match m {
            Media::Photo(_) => MediaKind::Photo,
            Media::Sticker(_) => MediaKind::Sticker,
            Media::Document(_) => MediaKind::Document,
            _ => MediaKind::Other,
        });
        Self {
            id: message.id(),
            chat_id: marked_id(&chat),
            text: message.text().to_string(),
            html,
            media,
        }
    }
}

fn decode_session(encoded: &str) -> Result<Session, MtprotoError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| MtprotoError::InvalidSession(e.to_string()))?;
    Session::load(&bytes).map_err(|e| MtprotoError::InvalidSession(e.to_string()))
}

fn encode_session(client: &Client) -> String {
    BASE64.encode(client.session().save())
}

fn config(api_id: i32, api_hash: &str, session: Session) -> Config {
    Config {
        session,
        api_id,
        api_hash: api_hash.to_string(),
        params: InitParams {
            device_model: "Bridge Bot".to_string(),
            system_version: "1.0".to_string(),
            app_version: "1.0".to_string(),
            catch_up: false,
            // FLOOD_WAIT is surfaced to the caller instead of slept on.
            flood_sleep_threshold: 0,
            ..Default::default()
        },
    }
}

/// Connection to Telegram as a user account.
pub struct MtprotoClient {
    api_id: i32,
    api_hash: String,
    session: String,
    client: Mutex<Option<Client>>,
    chats: Mutex<HashMap<i64, (PackedChat, String)>>,
    connected: AtomicBool,
}

impl MtprotoClient {
    pub fn new(api_id: i32, api_hash: String, session: String) -> Self {
        Self {
            api_id,
            api_hash,
            session,
            client: Mutex::new(None),
            chats: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
        }
    }

    fn handle(&self) -> Result<Client, MtprotoError> {
        let guard = self
            .client
            .lock()
            .map_err(|_| MtprotoError::Other("client lock poisoned".to_string()))?;
        guard.clone().ok_or(MtprotoError::NotConnected)
    }

    fn cached(&self, id: i64) -> Option<(PackedChat, String)> {
        self.chats.lock().ok().and_then(|c| c.get(&id).cloned())
    }

    fn packed(&self, id: i64) -> Result<PackedChat, MtprotoError> {
        self.cached(id)
            .map(|(p, _)| p)
            .ok_or(MtprotoError::ChatNotFound(id))
    }

    pub async fn connect(&self) -> Result<(), MtprotoError> {
        let session = decode_session(&self.session)?;
        let client = Client::connect(config(self.api_id, &self.api_hash, session))
            .await
            .map_err(|e| MtprotoError::Connect(e.to_string()))?;
        if !client.is_authorized().await? {
            return Err(MtprotoError::NotAuthorized);
        }
        if let Ok(mut guard) = self.client.lock() {
            *guard = Some(client);
        }
        self.connected.store(true, Ordering::SeqCst);
        log::info!("mtproto: session authorized");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Find a chat by marked id, scanning dialogs on a cache miss.
    pub async fn resolve(&self, id: i64) -> Result<ChatInfo, MtprotoError> {
        if let Some((_, title)) = self.cached(id) {
            return Ok(ChatInfo { id, title });
        }
        let client = self.handle()?;
        log::debug!("mtproto: chat {} not cached, scanning dialogs", id);
        let mut dialogs = client.iter_dialogs();
        let mut found = None;
        while let Some(dialog) = dialogs.next().await? {
            let chat = dialog.chat();
            let packed = chat.pack();
            let marked = marked_id(&packed);
            let title = chat.name().to_string();
            if let Ok(mut cache) = self.chats.lock() {
                cache.insert(marked, (packed, title.clone()));
            }
            if marked == id {
                found = Some(title);
                break;
            }
        }
        found
            .map(|title| ChatInfo { id, title })
            .ok_or(MtprotoError::ChatNotFound(id))
    }

    pub async fn send_text(&self, to: i64, text: &str, html: bool) -> Result<(), MtprotoError> {
        let client = self.handle()?;
        let message = if html {
            InputMessage::html(text)
        } else {
            InputMessage::text(text)
        };
        client.send_message(self.packed(to)?, message).await?;
        Ok(())
    }

    /// Post a new message in `to` carrying the media of message `message_id` from `from`.
    pub async fn copy_media(
        &self,
        to: i64,
        from: i64,
        message_id: i32,
        caption: &str,
        html: bool,
    ) -> Result<(), MtprotoError> {
        let client = self.handle()?;
        let source = self.packed(from)?;
        let original = client
            .get_messages_by_id(source, &[message_id])
            .await?
            .into_iter()
            .next()
            .flatten()
            .ok_or(MtprotoError::MessageNotFound(message_id))?;
        let media = original
            .media()
            .ok_or(MtprotoError::MessageNotFound(message_id))?;
        let message = if html {
            InputMessage::html(caption)
        } else {
            InputMessage::text(caption)
        };
        client
            .send_message(self.packed(to)?, message.copy_media(&media))
            .await?;
        Ok(())
    }

    pub async fn forward(&self, to: i64, from: i64, message_id: i32) -> Result<(), MtprotoError> {
        let client = self.handle()?;
        client
            .forward_messages(self.packed(to)?, &[message_id], self.packed(from)?)
            .await?;
        Ok(())
    }

    /// Wait for the next update; `Ok(None)` for updates that are not new incoming messages.
    pub async fn next_message(&self) -> Result<Option<ReceivedMessage>, MtprotoError> {
        let client = self.handle()?;
        match client.next_update().await? {
            Update::NewMessage(message) if !message.outgoing() => {
                Ok(Some(ReceivedMessage::from_message(&message)))
            }
            _ => Ok(None),
        }
    }

    pub fn disconnect(&self) {
        if let Ok(mut guard) = self.client.lock() {
            guard.take();
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Terminal questions asked during an interactive login.
pub trait LoginPrompt {
    fn phone(&mut self) -> io::Result<String>;
    fn code(&mut self) -> io::Result<String>;
    fn password(&mut self, hint: Option<&str>) -> io::Result<String>;
}

/// Outcome of a successful login.
#[derive(Debug, Clone)]
pub struct LoginSummary {
    pub session: String,
    pub user_id: i64,
    pub first_name: String,
    pub username: Option<String>,
    pub phone: Option<String>,
}

/// Log in with phone, code and (when enabled) the 2FA password, returning the session string.
pub async fn login_interactive(
    api_id: i32,
    api_hash: &str,
    prompt: &mut dyn LoginPrompt,
) -> Result<LoginSummary, MtprotoError> {
    let client = Client::connect(config(api_id, api_hash, Session::new()))
        .await
        .map_err(|e| MtprotoError::Connect(e.to_string()))?;

    if !client.is_authorized().await? {
        let phone = prompt.phone()?;
        let token = client
            .request_login_code(phone.trim())
            .await
            .map_err(|e| MtprotoError::SignIn(e.to_string()))?;
        let code = prompt.code()?;
        match client.sign_in(&token, code.trim()).await {
            Ok(_) => {}
            Err(SignInError::PasswordRequired(password_token)) => {
                let password = prompt.password(password_token.hint())?;
                client
                    .check_password(password_token, password.trim())
                    .await
                    .map_err(|e| MtprotoError::SignIn(e.to_string()))?;
            }
            Err(e) => return Err(MtprotoError::SignIn(e.to_string())),
        }
    }

    let me = client.get_me().await?;
    Ok(LoginSummary {
        session: encode_session(&client),
        user_id: me.id(),
        first_name: me.first_name().to_string(),
        username: me.username().map(str::to_string),
        phone: me.phone().map(str::to_string),
    })
}
