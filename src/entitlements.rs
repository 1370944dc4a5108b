//! Subscription and entitlement boundary
//!
//! Consumed by the quota ledger to bypass or raise the message limit.

use crate::config::ChatConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Source of subscription state
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntitlementProvider: Send + Sync {
    /// Whether the user has an active subscription
    async fn is_subscribed(&self, user_id: &str) -> Result<bool>;

    /// A per-user message limit replacing the configured default
    async fn message_limit_override(&self, user_id: &str) -> Result<Option<u32>>;
}

/// Entitlements read from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticEntitlements {
    subscribers: HashSet<String>,
    overrides: HashMap<String, u32>,
}

impl StaticEntitlements {
    /// Nobody subscribed, no overrides
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the chat section of the configuration
    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            subscribers: config.subscribers.iter().cloned().collect(),
            overrides: config.limit_overrides.clone(),
        }
    }

    /// Mark a user as subscribed
    pub fn with_subscriber(mut self, user_id: impl Into<String>) -> Self {
        self.subscribers.insert(user_id.into());
        self
    }

    /// Give a user a custom message limit
    pub fn with_limit_override(mut self, user_id: impl Into<String>, limit: u32) -> Self {
        self.overrides.insert(user_id.into(), limit);
        self
    }
}

#[async_trait]
impl EntitlementProvider for StaticEntitlements {
    async fn is_subscribed(&self, user_id: &str) -> Result<bool> {
        Ok(self.subscribers.contains(user_id))
    }

    async fn message_limit_override(&self, user_id: &str) -> Result<Option<u32>> {
        Ok(self.overrides.get(user_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_entitlements_builder() {
        let ent = StaticEntitlements::new()
            .with_subscriber("paid")
            .with_limit_override("beta", 40);

        assert!(ent.is_subscribed("paid").await.unwrap());
        assert!(!ent.is_subscribed("free").await.unwrap());
        assert_eq!(ent.message_limit_override("beta").await.unwrap(), Some(40));
        assert_eq!(ent.message_limit_override("free").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_static_entitlements_from_config() {
        let mut config = ChatConfig::default();
        config.subscribers.push("u1".to_string());
        config.limit_overrides.insert("u2".to_string(), 3);

        let ent = StaticEntitlements::from_config(&config);
        assert!(ent.is_subscribed("u1").await.unwrap());
        assert_eq!(ent.message_limit_override("u2").await.unwrap(), Some(3));
    }
}
