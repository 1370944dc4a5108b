/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `chat`    - Interactive chat
- `history` - Saved conversation management
- `quota`   - Message quota display
- `auth`    - Completion API key storage

Every handler builds its collaborators through [`Services::from_config`],
so the chosen store backend, clock and entitlements are shared the same
way across commands.
*/

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, StorageBackend};
use crate::entitlements::{EntitlementProvider, StaticEntitlements};
use crate::error::Result;
use crate::quota::QuotaLedger;
use crate::sessions::SessionStore;
use crate::store::{MemoryStore, RecordStore, SqliteStore};
use std::sync::Arc;

pub mod auth;
pub mod chat;
pub mod history;
pub mod quota;

/// Store-backed components shared by the commands
#[derive(Clone)]
pub struct Services {
    /// Record store backend
    pub store: Arc<dyn RecordStore>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Subscription state
    pub entitlements: Arc<dyn EntitlementProvider>,
    /// Message quota
    pub ledger: QuotaLedger,
    /// Durable sessions
    pub sessions: SessionStore,
}

impl Services {
    /// Builds the store and everything layered on it
    ///
    /// # Errors
    ///
    /// Returns an error if the SQLite database cannot be opened
    pub fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn RecordStore> = match config.storage.backend {
            StorageBackend::Sqlite => {
                let path = config.storage.resolve_db_path()?;
                tracing::debug!("Opening record store at {}", path.display());
                Arc::new(SqliteStore::new_with_path(path)?)
            }
            StorageBackend::Memory => {
                tracing::debug!("Using in-memory record store");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::with_store(config, store, Arc::new(SystemClock)))
    }

    /// Builds the components on an existing store and clock
    pub fn with_store(config: &Config, store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        let entitlements: Arc<dyn EntitlementProvider> =
            Arc::new(StaticEntitlements::from_config(&config.chat));
        let ledger = QuotaLedger::new(
            store.clone(),
            entitlements.clone(),
            clock.clone(),
            config.quota.clone(),
        );
        let sessions = SessionStore::new(store.clone(), clock.clone(), config.chat.clone());

        Self {
            store,
            clock,
            entitlements,
            ledger,
            sessions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_services() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;

        let services = Services::from_config(&config).unwrap();
        let status = services.ledger.status("u1").await.unwrap();
        assert_eq!(status.count, 0);
        assert_eq!(status.limit, Some(config.quota.message_limit));
    }

    #[tokio::test]
    async fn test_sqlite_backend_services() {
        let dir = crate::test_utils::temp_dir();
        let mut config = Config::default();
        config.storage.db_path = Some(dir.path().join("lampstand.db"));

        let services = Services::from_config(&config).unwrap();
        let slug = services
            .sessions
            .create_session("u1", "Olá", None)
            .await
            .unwrap();
        assert!(services.sessions.get(&slug).await.unwrap().is_some());
        assert!(dir.path().join("lampstand.db").exists());
    }
}
