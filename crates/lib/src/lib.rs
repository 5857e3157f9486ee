//! tg-bridge core library: configuration, the messaging client seam, the relay bridge, and
//! the restart supervisor used by the CLI.

pub mod bridge;
pub mod client;
pub mod config;
pub mod format;
pub mod logging;
pub mod retry;
pub mod supervisor;
