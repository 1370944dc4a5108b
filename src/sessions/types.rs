use crate::error::{LampstandError, Result};
use crate::store::{decode_time, encode_time, optional_bool, require_str, Row, StoredRow, Table};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person studying
    User,
    /// The AI assistant
    Assistant,
}

/// One entry in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote it
    pub role: Role,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Creates a user message
    ///
    /// # Examples
    ///
    /// ```
    /// use lampstand::sessions::{ChatMessage, Role};
    ///
    /// let msg = ChatMessage::user("Who wrote Hebrews?");
    /// assert_eq!(msg.role, Role::User);
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// An assistant entry with no content yet (a stream placeholder)
    pub fn is_placeholder(&self) -> bool {
        self.role == Role::Assistant && self.content.is_empty()
    }
}

/// A conversation as stored in the session table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    /// Human-shareable identifier
    pub slug: String,
    /// Owner
    pub user_id: String,
    /// Display title
    pub title: String,
    /// Bible book context, if any
    pub book_slug: Option<String>,
    /// Only subscribers may open this session
    pub requires_subscription: bool,
    /// Conversation in chronological order
    pub messages: Vec<ChatMessage>,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session was last opened or appended to
    pub last_accessed: DateTime<Utc>,
    /// Shown in the always-visible pinned group
    pub pinned: bool,
    /// Soft-deleted sessions are hidden but kept
    pub is_deleted: bool,
    /// Store creation order, used to break `last_accessed` ties
    #[serde(skip)]
    pub seq: u64,
}

impl ChatSession {
    /// Map a stored row onto a session, rejecting malformed rows
    pub fn from_row(row: &StoredRow) -> Result<Self> {
        let table = Table::ChatSessions;
        let data = &row.data;

        let messages = data
            .get("messages")
            .cloned()
            .map(serde_json::from_value::<Vec<ChatMessage>>)
            .transpose()
            .map_err(|e| LampstandError::InvalidRecord {
                table: table.to_string(),
                message: format!("messages for {} are malformed: {}", row.key, e),
            })?
            .unwrap_or_default();

        let book_slug = match data.get("book_slug") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return Err(LampstandError::InvalidRecord {
                    table: table.to_string(),
                    message: format!("book_slug for {} is not a string", row.key),
                }
                .into())
            }
        };

        Ok(Self {
            slug: row.key.clone(),
            user_id: require_str(data, "user_id", table)?.to_string(),
            title: require_str(data, "title", table)?.to_string(),
            book_slug,
            requires_subscription: optional_bool(data, "requires_subscription", table)?,
            messages,
            created_at: decode_time(data, "created_at", table)?,
            last_accessed: decode_time(data, "last_accessed", table)?,
            pinned: optional_bool(data, "pinned", table)?,
            is_deleted: optional_bool(data, "is_deleted", table)?,
            seq: row.seq,
        })
    }

    /// The row shape written to the store
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert("user_id".into(), Value::from(self.user_id.as_str()));
        row.insert("title".into(), Value::from(self.title.as_str()));
        row.insert(
            "book_slug".into(),
            self.book_slug
                .as_deref()
                .map(Value::from)
                .unwrap_or(Value::Null),
        );
        row.insert(
            "requires_subscription".into(),
            Value::from(self.requires_subscription),
        );
        row.extend(messages_fields(&self.messages));
        row.insert("created_at".into(), encode_time(self.created_at));
        row.insert("last_accessed".into(), encode_time(self.last_accessed));
        row.insert("pinned".into(), Value::from(self.pinned));
        row.insert("is_deleted".into(), Value::from(self.is_deleted));
        row
    }
}

/// Fields that change together whenever the transcript grows
pub(crate) fn messages_fields(messages: &[ChatMessage]) -> Row {
    let mut row = Row::new();
    row.insert(
        "messages".into(),
        Value::Array(
            messages
                .iter()
                .map(|m| {
                    let mut entry = serde_json::Map::new();
                    entry.insert(
                        "role".into(),
                        Value::from(match m.role {
                            Role::User => "user",
                            Role::Assistant => "assistant",
                        }),
                    );
                    entry.insert("content".into(), Value::from(m.content.as_str()));
                    Value::Object(entry)
                })
                .collect(),
        ),
    );
    row.insert("message_count".into(), Value::from(messages.len() as u64));
    row
}

/// Lightweight view of a session for history lists
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    /// Session slug
    pub slug: String,
    /// Display title
    pub title: String,
    /// Bible book context
    pub book_slug: Option<String>,
    /// Last open or append
    pub last_accessed: DateTime<Utc>,
    /// Pinned flag
    pub pinned: bool,
    /// Number of stored messages
    pub message_count: usize,
}

impl From<&ChatSession> for SessionSummary {
    fn from(session: &ChatSession) -> Self {
        Self {
            slug: session.slug.clone(),
            title: session.title.clone(),
            book_slug: session.book_slug.clone(),
            last_accessed: session.last_accessed,
            pinned: session.pinned,
            message_count: session.messages.len(),
        }
    }
}

/// History list grouped for display
///
/// Every group is ordered by `last_accessed`, most recent first, with
/// creation order breaking ties.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionListing {
    /// Pinned sessions, regardless of age
    pub pinned: Vec<SessionSummary>,
    /// Accessed on the current day
    pub today: Vec<SessionSummary>,
    /// Accessed within the last seven days, before today
    pub this_week: Vec<SessionSummary>,
    /// Everything else
    pub older: Vec<SessionSummary>,
}

impl SessionListing {
    /// Total number of sessions across groups
    pub fn len(&self) -> usize {
        self.pinned.len() + self.today.len() + self.this_week.len() + self.older.len()
    }

    /// True when the user has no visible sessions
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over every session in display order
    pub fn iter(&self) -> impl Iterator<Item = &SessionSummary> {
        self.pinned
            .iter()
            .chain(self.today.iter())
            .chain(self.this_week.iter())
            .chain(self.older.iter())
    }
}

/// Outcome of reconciling local state with the durable copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Local state already matches the durable copy
    Unchanged,
    /// The durable copy is a prefix of local state; local holds
    /// `unconfirmed` messages that have not been persisted yet
    KeptLocal {
        /// Messages beyond the durable copy
        unconfirmed: usize,
    },
    /// The durable copy diverged or moved ahead; local must be replaced
    Replaced(Vec<ChatMessage>),
    /// No visible session under that slug; start fresh
    NotFound,
}
