//! Lampstand - Bible study chat library
//!
//! This library provides the core of Lampstand: a per-user monthly message
//! quota, durable chat sessions, a streaming completion client and the
//! controller that ties them together for one conversation.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `store`: Record store abstraction with SQLite and in-memory backends
//! - `quota`: Monthly message quota ledger
//! - `sessions`: Chat session persistence, history listing and reconciliation
//! - `completion`: Streaming completion service and its OpenAI-compatible client
//! - `chat`: Send orchestration for one conversation
//! - `prompts`: Book catalogue, system prompts and quick prompts
//! - `identity` / `entitlements`: Boundaries for the signed-in user and subscriptions
//! - `config`, `credentials`, `cache`: Configuration, API key and local preferences
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line interface
//!
//! # Example
//!
//! ```no_run
//! use lampstand::commands::Services;
//! use lampstand::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let services = Services::from_config(&config)?;
//!     let status = services.ledger.status("local").await?;
//!     println!("{} messages used", status.count);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod chat;
pub mod cli;
pub mod clock;
pub mod commands;
pub mod completion;
pub mod config;
pub mod credentials;
pub mod entitlements;
pub mod error;
pub mod identity;
pub mod poll;
pub mod prompts;
pub mod quota;
pub mod sessions;
pub mod store;

// Re-export commonly used types
pub use chat::{ChatController, ChatServices, Notice, SendOutcome};
pub use config::Config;
pub use error::{LampstandError, Result};
pub use quota::{QuotaLedger, QuotaStatus};
pub use sessions::{ChatMessage, ChatSession, SessionStore};

#[cfg(test)]
pub mod test_utils;
