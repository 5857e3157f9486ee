//! Process supervisor: runs one bridge per attempt with exponential backoff between failures.
//!
//! The supervisor is the only layer that decides the process exit status. A configuration
//! error ends it immediately; any bridge error is retried until the budget is spent.

use crate::bridge::{self, Bridge};
use crate::client::MessagingClient;
use crate::config::{BridgeConfig, Config, ConfigError};
use crate::retry::{self, RetryPolicy};
use std::future::Future;
use std::sync::Arc;

/// Builds a fresh client for one bridge attempt.
pub type ClientFactory =
    dyn Fn(&BridgeConfig) -> Result<Arc<dyn MessagingClient>, ConfigError> + Send + Sync;

/// How the supervisor ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The bridge stopped cleanly (shutdown signal or subscription closed).
    Completed,
    ConfigError,
    RetriesExhausted,
}

impl SupervisorExit {
    /// Process exit status: 0 for a clean stop, 1 otherwise.
    pub fn code(self) -> i32 {
        match self {
            SupervisorExit::Completed => 0,
            SupervisorExit::ConfigError | SupervisorExit::RetriesExhausted => 1,
        }
    }
}

pub struct Supervisor {
    config: Config,
    session: Option<String>,
    factory: Box<ClientFactory>,
    policy: RetryPolicy,
}

impl Supervisor {
    pub fn new<F>(config: Config, session: Option<String>, factory: F) -> Self
    where
        F: Fn(&BridgeConfig) -> Result<Arc<dyn MessagingClient>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            config,
            session,
            factory: Box::new(factory),
            policy: retry::SUPERVISOR,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Supervise until SIGINT/SIGTERM or retry exhaustion.
    pub async fn run(&self) -> SupervisorExit {
        self.run_until(bridge::shutdown_signal()).await
    }

    /// Supervise until `shutdown` resolves. It is shared by every attempt and the waits between.
    pub async fn run_until<F>(&self, shutdown: F) -> SupervisorExit
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let max = self.policy.max_attempts;
        let mut attempt = 0;
        loop {
            attempt += 1;
            log::info!("🔄 Starting bridge (attempt {}/{})", attempt, max);

            let bridge_config = match BridgeConfig::from_config(&self.config, self.session.clone()) {
                Ok(c) => c,
                Err(e) => {
                    log::error!("❌ Configuration error: {}", e);
                    return SupervisorExit::ConfigError;
                }
            };
            let client = match (self.factory)(&bridge_config) {
                Ok(c) => c,
                Err(e) => {
                    log::error!("❌ Configuration error: {}", e);
                    return SupervisorExit::ConfigError;
                }
            };

            let mut bridge = Bridge::new(bridge_config, client);
            let err = match bridge.run_until(shutdown.as_mut()).await {
                Ok(()) => return SupervisorExit::Completed,
                Err(e) => e,
            };

            if err.is_stale_sync() {
                log::warn!(
                    "⚠️ Timestamp outdated error (attempt {}/{}): {}",
                    attempt,
                    max,
                    err
                );
            } else {
                log::error!("❌ Unexpected error (attempt {}/{}): {}", attempt, max, err);
            }
            match self.policy.delay_after(attempt) {
                Some(delay) => {
                    log::info!("🔄 Retrying in {} seconds...", delay.as_secs());
                    tokio::select! {
                        _ = &mut shutdown => {
                            log::info!("👋 Bridge stopped by user");
                            return SupervisorExit::Completed;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    if err.is_stale_sync() {
                        log::error!("❌ Max retries reached for timestamp error");
                    } else {
                        log::error!("❌ Max retries reached");
                    }
                    return SupervisorExit::RetriesExhausted;
                }
            }
        }
    }
}
