//! Monthly message quota ledger
//!
//! Tracks how many chat messages each user has sent in the current
//! rolling window, decides whether another message may be sent, and
//! resets the counter when the window elapses.
//!
//! The ledger holds no lock of its own. Two browser tabs (or two tasks)
//! racing on the same account are resolved by conditional writes: a reset
//! only applies if `window_start` is still the one that was observed, and
//! an increment only applies if `count` and `window_start` are unchanged.
//! A writer that loses re-reads and re-decides.

use crate::clock::Clock;
use crate::config::QuotaConfig;
use crate::entitlements::EntitlementProvider;
use crate::error::{LampstandError, Result};
use crate::store::{encode_time, Filter, RecordStore, Row, Table};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

pub mod types;
pub use types::{QuotaRecord, QuotaStatus};

/// Gatekeeper for message sends
///
/// Cloning is cheap; clones share the same store and collaborators.
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn RecordStore>,
    entitlements: Arc<dyn EntitlementProvider>,
    clock: Arc<dyn Clock>,
    config: QuotaConfig,
}

impl QuotaLedger {
    /// Creates a ledger over the given store and collaborators
    pub fn new(
        store: Arc<dyn RecordStore>,
        entitlements: Arc<dyn EntitlementProvider>,
        clock: Arc<dyn Clock>,
        config: QuotaConfig,
    ) -> Self {
        Self {
            store,
            entitlements,
            clock,
            config,
        }
    }

    /// Fetches the user's record, creating an empty one on first sight
    ///
    /// # Errors
    ///
    /// Returns `LampstandError::StoreUnavailable` if the store cannot be
    /// reached, or `LampstandError::InvalidRecord` for a malformed row.
    pub async fn get_or_create(&self, user_id: &str) -> Result<QuotaRecord> {
        if let Some(row) = self.store.get(Table::Quotas, user_id).await? {
            return QuotaRecord::from_row(&row);
        }

        let record = QuotaRecord::fresh(user_id, self.clock.now());
        if self
            .store
            .insert(Table::Quotas, user_id, record.to_row())
            .await?
        {
            tracing::info!(user_id, "Created quota record");
            return Ok(record);
        }

        // Another writer created it between our read and insert.
        let row = self.store.get(Table::Quotas, user_id).await?.ok_or_else(|| {
            LampstandError::StoreUnavailable(format!("quota record for {} vanished", user_id))
        })?;
        QuotaRecord::from_row(&row)
    }

    /// Resets the record if its window has elapsed at `now`
    ///
    /// Returns the record unchanged when the window is still open. When it
    /// has elapsed, persists `count = 0, window_start = now`. If another
    /// writer already reset (or otherwise moved) the window, their record is
    /// returned instead, so repeated or concurrent calls never reset twice
    /// and a stale caller never overwrites newer counts.
    pub async fn check_and_reset(
        &self,
        record: QuotaRecord,
        now: DateTime<Utc>,
    ) -> Result<QuotaRecord> {
        if !record.window_elapsed(now, self.config.window()) {
            return Ok(record);
        }

        let fresh = QuotaRecord::fresh(record.user_id.clone(), now);
        let expected = Filter::new().eq("window_start", encode_time(record.window_start));
        if self
            .store
            .update_if(Table::Quotas, &record.user_id, &expected, fresh.to_row())
            .await?
        {
            tracing::info!(
                user_id = %record.user_id,
                previous_count = record.count,
                "Quota window elapsed, counter reset"
            );
            return Ok(fresh);
        }

        tracing::debug!(user_id = %record.user_id, "Quota window already moved by another writer");
        self.get_or_create(&record.user_id).await
    }

    /// Limit that applies to the user: an entitlement override or the default
    pub async fn effective_limit(&self, user_id: &str) -> Result<u32> {
        Ok(self
            .entitlements
            .message_limit_override(user_id)
            .await?
            .unwrap_or(self.config.message_limit))
    }

    /// Whether the user may send another message now
    ///
    /// Subscribers are always admitted.
    pub async fn can_send(&self, user_id: &str, is_subscribed: bool) -> Result<bool> {
        if is_subscribed {
            return Ok(true);
        }

        let record = self.current(user_id).await?;
        let limit = self.effective_limit(user_id).await?;
        Ok(record.count < limit)
    }

    /// Admission check that fails with the typed refusal
    ///
    /// # Errors
    ///
    /// Returns `LampstandError::QuotaExceeded` with the current count and
    /// limit when the user has no messages left, or the store error that
    /// prevented the check.
    pub async fn require_can_send(&self, user_id: &str, is_subscribed: bool) -> Result<()> {
        if is_subscribed {
            return Ok(());
        }

        let record = self.current(user_id).await?;
        let limit = self.effective_limit(user_id).await?;
        if record.count >= limit {
            tracing::debug!(user_id, count = record.count, limit, "Send refused, limit reached");
            return Err(LampstandError::QuotaExceeded {
                count: record.count,
                limit,
            }
            .into());
        }
        Ok(())
    }

    /// Records one sent message
    ///
    /// Re-checks the limit at write time rather than trusting an earlier
    /// `can_send`. Returns `false` without writing when the limit has been
    /// reached, including when a concurrent sender took the last slot.
    /// Subscribers are always recorded and never blocked.
    ///
    /// # Errors
    ///
    /// Returns `LampstandError::StoreUnavailable` when the store cannot be
    /// reached or the write keeps losing races. A failed increment must
    /// never be read as "allowed".
    pub async fn increment(&self, user_id: &str) -> Result<bool> {
        let subscribed = self.entitlements.is_subscribed(user_id).await?;
        let limit = self.effective_limit(user_id).await?;

        for attempt in 1..=self.config.max_increment_attempts {
            let record = self.current(user_id).await?;

            if !subscribed && record.count >= limit {
                tracing::debug!(user_id, count = record.count, limit, "Increment refused, limit reached");
                return Ok(false);
            }

            let expected = Filter::new()
                .eq("count", record.count)
                .eq("window_start", encode_time(record.window_start));
            let mut fields = Row::new();
            fields.insert("count".into(), Value::from(record.count + 1));

            if self
                .store
                .update_if(Table::Quotas, user_id, &expected, fields)
                .await?
            {
                tracing::debug!(user_id, count = record.count + 1, "Quota incremented");
                return Ok(true);
            }

            tracing::debug!(user_id, attempt, "Lost increment race, re-reading");
        }

        Err(LampstandError::StoreUnavailable(format!(
            "increment for {} did not settle after {} attempts",
            user_id, self.config.max_increment_attempts
        ))
        .into())
    }

    /// Quota state for display
    pub async fn status(&self, user_id: &str) -> Result<QuotaStatus> {
        let subscribed = self.entitlements.is_subscribed(user_id).await?;
        let record = self.current(user_id).await?;
        let resets_at = record.window_start + self.config.window();

        if subscribed {
            return Ok(QuotaStatus {
                count: record.count,
                limit: None,
                remaining: None,
                subscribed,
                resets_at,
            });
        }

        let limit = self.effective_limit(user_id).await?;
        Ok(QuotaStatus {
            count: record.count,
            limit: Some(limit),
            remaining: Some(limit.saturating_sub(record.count)),
            subscribed,
            resets_at,
        })
    }

    async fn current(&self, user_id: &str) -> Result<QuotaRecord> {
        let record = self.get_or_create(user_id).await?;
        self.check_and_reset(record, self.clock.now()).await
    }
}
