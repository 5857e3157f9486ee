use std::time::Duration;

/// Typed failures surfaced by a [`MessagingClient`](super::MessagingClient).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The service's update-ordering timestamp is stale. Benign; see [`ClientError::is_tolerated_sync`].
    #[error("persistent timestamp outdated: {0}")]
    StaleSync(String),
    #[error("rate limited, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),
    #[error("write forbidden: {0}")]
    WriteForbidden(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("client is not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("api error {code}: {description}")]
    Api { code: i64, description: String },
}

impl ClientError {
    /// Errors the startup phases may tolerate after their retries run out.
    /// Only the stale-timestamp class qualifies; everything else is a real failure.
    pub fn is_tolerated_sync(&self) -> bool {
        matches!(self, ClientError::StaleSync(_))
    }

    pub fn is_write_forbidden(&self) -> bool {
        matches!(self, ClientError::WriteForbidden(_))
    }
}
