use crate::error::{LampstandError, Result};
use crate::store::{decode_time, encode_time, Row, StoredRow, Table};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-user message counter for the current window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    /// Owner of the record
    pub user_id: String,
    /// Messages recorded in the current window
    pub count: u32,
    /// Start of the current window
    pub window_start: DateTime<Utc>,
}

impl QuotaRecord {
    /// A record with an empty window starting at `now`
    pub fn fresh(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            count: 0,
            window_start: now,
        }
    }

    /// Whether the window has run its full length at `now`
    pub fn window_elapsed(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.window_start >= window
    }

    /// Map a stored row onto a record, rejecting malformed rows
    pub fn from_row(row: &StoredRow) -> Result<Self> {
        let count = row
            .data
            .get("count")
            .and_then(Value::as_u64)
            .and_then(|c| u32::try_from(c).ok())
            .ok_or_else(|| LampstandError::InvalidRecord {
                table: Table::Quotas.to_string(),
                message: format!("count for {} is not a non-negative integer", row.key),
            })?;

        Ok(Self {
            user_id: row.key.clone(),
            count,
            window_start: decode_time(&row.data, "window_start", Table::Quotas)?,
        })
    }

    /// The row shape written to the store
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert("user_id".into(), Value::from(self.user_id.as_str()));
        row.insert("count".into(), Value::from(self.count));
        row.insert("window_start".into(), encode_time(self.window_start));
        row
    }
}

/// Quota state for display next to the message input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    /// Messages recorded in the current window
    pub count: u32,
    /// Effective limit, `None` for subscribers
    pub limit: Option<u32>,
    /// Messages left before blocking, `None` for subscribers
    pub remaining: Option<u32>,
    /// Whether the user is subscribed
    pub subscribed: bool,
    /// When the current window ends
    pub resets_at: DateTime<Utc>,
}

impl QuotaStatus {
    /// Whether another message would be admitted right now
    pub fn can_send(&self) -> bool {
        self.remaining.map_or(true, |r| r > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_row_mapping_roundtrip() {
        let at = Utc.with_ymd_and_hms(2024, 2, 10, 9, 0, 0).unwrap();
        let record = QuotaRecord {
            user_id: "u1".to_string(),
            count: 7,
            window_start: at,
        };
        let stored = StoredRow {
            key: "u1".to_string(),
            seq: 1,
            data: record.to_row(),
        };
        assert_eq!(QuotaRecord::from_row(&stored).unwrap(), record);
    }

    #[test]
    fn test_negative_count_is_rejected() {
        let mut data = Row::new();
        data.insert("count".into(), json!(-1));
        data.insert("window_start".into(), json!("2024-01-01T00:00:00Z"));
        let stored = StoredRow {
            key: "u1".to_string(),
            seq: 1,
            data,
        };
        let err = QuotaRecord::from_row(&stored).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LampstandError>(),
            Some(LampstandError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_window_elapsed_boundary() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = QuotaRecord::fresh("u1", start);
        let window = Duration::days(30);

        assert!(!record.window_elapsed(start + Duration::days(30) - Duration::seconds(1), window));
        assert!(record.window_elapsed(start + Duration::days(30), window));
    }

    #[test]
    fn test_status_can_send() {
        let at = Utc::now();
        let blocked = QuotaStatus {
            count: 10,
            limit: Some(10),
            remaining: Some(0),
            subscribed: false,
            resets_at: at,
        };
        assert!(!blocked.can_send());

        let unlimited = QuotaStatus {
            limit: None,
            remaining: None,
            subscribed: true,
            ..blocked
        };
        assert!(unlimited.can_send());
    }
}
