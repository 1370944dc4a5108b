//! Chat session persistence
//!
//! Sessions are stored one row per conversation, keyed by a short
//! shareable slug. Appends are conditional on the stored message count so
//! two writers never overwrite each other's turns; a writer that loses
//! re-reads the transcript and appends to the list as it now stands.

use crate::clock::Clock;
use crate::config::ChatConfig;
use crate::error::{LampstandError, Result};
use crate::store::{encode_time, Filter, OrderBy, RecordStore, Row, Table};
use chrono::{DateTime, Duration, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;

pub mod types;
pub use types::{
    ChatMessage, ChatSession, Reconciliation, Role, SessionListing, SessionSummary,
};

use types::messages_fields;

/// Length of generated session slugs
pub const SLUG_LEN: usize = 10;

const MAX_SLUG_ATTEMPTS: u32 = 5;
const MAX_WRITE_ATTEMPTS: u32 = 5;

/// Durable store for chat sessions
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    config: ChatConfig,
}

impl SessionStore {
    /// Creates a session store over the given record store
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, config: ChatConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Whether conversations about `book_slug` are subscriber-only
    pub fn requires_subscription(&self, book_slug: Option<&str>) -> bool {
        book_slug.is_some_and(|book| self.config.premium_books.iter().any(|b| b == book))
    }

    /// Starts a session from the first user message and returns its slug
    ///
    /// The title is derived from the message.
    ///
    /// # Errors
    ///
    /// Returns `LampstandError::StoreUnavailable` if the store cannot be
    /// reached.
    pub async fn create_session(
        &self,
        user_id: &str,
        first_user_message: &str,
        book_slug: Option<&str>,
    ) -> Result<String> {
        self.create_session_with_messages(
            user_id,
            vec![ChatMessage::user(first_user_message)],
            book_slug,
        )
        .await
    }

    /// Starts a session holding a complete first turn in one write
    pub async fn create_session_with_turn(
        &self,
        user_id: &str,
        user_message: &str,
        assistant_message: &str,
        book_slug: Option<&str>,
    ) -> Result<String> {
        self.create_session_with_messages(
            user_id,
            vec![
                ChatMessage::user(user_message),
                ChatMessage::assistant(assistant_message),
            ],
            book_slug,
        )
        .await
    }

    /// Starts a session from an initial transcript
    ///
    /// The transcript must open with a user message, which also supplies
    /// the title.
    pub async fn create_session_with_messages(
        &self,
        user_id: &str,
        messages: Vec<ChatMessage>,
        book_slug: Option<&str>,
    ) -> Result<String> {
        validate_messages(&messages)?;
        let first = match messages.first() {
            Some(m) if m.role == Role::User => m.content.clone(),
            _ => {
                return Err(LampstandError::InvalidInput(
                    "a session must start with a user message".to_string(),
                )
                .into())
            }
        };

        let now = self.clock.now();
        let mut session = ChatSession {
            slug: String::new(),
            user_id: user_id.to_string(),
            title: make_title(&first, self.config.title_max_chars),
            book_slug: book_slug.map(str::to_string),
            requires_subscription: self.requires_subscription(book_slug),
            messages,
            created_at: now,
            last_accessed: now,
            pinned: false,
            is_deleted: false,
            seq: 0,
        };

        for _ in 0..MAX_SLUG_ATTEMPTS {
            session.slug = generate_slug();
            if self
                .store
                .insert(Table::ChatSessions, &session.slug, session.to_row())
                .await?
            {
                tracing::info!(
                    slug = %session.slug,
                    user_id,
                    book = ?session.book_slug,
                    "Created chat session"
                );
                return Ok(session.slug);
            }
            tracing::debug!(slug = %session.slug, "Slug collision, regenerating");
        }

        Err(LampstandError::Storage(format!(
            "could not allocate a session slug after {} attempts",
            MAX_SLUG_ATTEMPTS
        ))
        .into())
    }

    /// Appends a completed turn and bumps `last_accessed`
    ///
    /// # Errors
    ///
    /// Returns `LampstandError::InvalidInput` for an empty assistant
    /// message, `LampstandError::SessionNotFound` when the session is
    /// missing or deleted, and `LampstandError::StoreUnavailable` when the
    /// store cannot be reached.
    pub async fn append_turn(
        &self,
        slug: &str,
        user_message: &str,
        assistant_message: &str,
    ) -> Result<()> {
        self.append_messages(
            slug,
            &[
                ChatMessage::user(user_message),
                ChatMessage::assistant(assistant_message),
            ],
        )
        .await
    }

    /// Appends an assistant reply to a session whose last turn has none
    pub async fn append_reply(&self, slug: &str, assistant_message: &str) -> Result<()> {
        self.append_messages(slug, &[ChatMessage::assistant(assistant_message)])
            .await
    }

    /// Appends messages in order to the transcript as it currently stands
    pub async fn append_messages(&self, slug: &str, messages: &[ChatMessage]) -> Result<()> {
        validate_messages(messages)?;
        self.append(slug, messages).await
    }

    async fn append(&self, slug: &str, new_messages: &[ChatMessage]) -> Result<()> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let session = self.visible(slug).await?;
            let expected = Filter::new().eq("message_count", session.messages.len() as u64);

            let mut messages = session.messages;
            messages.extend_from_slice(new_messages);
            let mut fields = messages_fields(&messages);
            fields.insert("last_accessed".into(), encode_time(self.clock.now()));

            if self
                .store
                .update_if(Table::ChatSessions, slug, &expected, fields)
                .await?
            {
                tracing::debug!(slug, total = messages.len(), "Appended to session");
                return Ok(());
            }

            tracing::debug!(slug, attempt, "Session changed underneath append, re-reading");
        }

        Err(LampstandError::StoreUnavailable(format!(
            "append to {} did not settle after {} attempts",
            slug, MAX_WRITE_ATTEMPTS
        ))
        .into())
    }

    /// Fetches a visible session without touching it
    pub async fn get(&self, slug: &str) -> Result<Option<ChatSession>> {
        match self.store.get(Table::ChatSessions, slug).await? {
            Some(row) => {
                let session = ChatSession::from_row(&row)?;
                Ok((!session.is_deleted).then_some(session))
            }
            None => Ok(None),
        }
    }

    /// The durable transcript, if the caller may see it
    ///
    /// Returns `None` when the session is missing, soft-deleted, or
    /// requires a subscription the caller does not have.
    pub async fn load_messages(
        &self,
        slug: &str,
        is_subscribed: bool,
    ) -> Result<Option<Vec<ChatMessage>>> {
        Ok(self
            .get(slug)
            .await?
            .filter(|s| is_subscribed || !s.requires_subscription)
            .map(|s| s.messages))
    }

    /// Opens a session from history, bumping `last_accessed`
    pub async fn open(&self, slug: &str, is_subscribed: bool) -> Result<Option<ChatSession>> {
        let Some(mut session) = self.get(slug).await? else {
            return Ok(None);
        };
        if session.requires_subscription && !is_subscribed {
            tracing::debug!(slug, "Session requires a subscription");
            return Ok(None);
        }

        let now = self.clock.now();
        let mut fields = Row::new();
        fields.insert("last_accessed".into(), encode_time(now));
        self.store.update(Table::ChatSessions, slug, fields).await?;
        session.last_accessed = now;
        Ok(Some(session))
    }

    /// Re-syncs local state with the durable copy after the view was hidden
    ///
    /// A trailing empty assistant placeholder in `local_messages` is ignored.
    /// When the durable copy is a prefix of the local state, local holds an
    /// unconfirmed in-flight turn and is kept. Any other difference means the
    /// durable copy moved on (for example the turn completed while hidden)
    /// and replaces local state.
    pub async fn reconcile_on_visibility_regain(
        &self,
        slug: &str,
        local_messages: &[ChatMessage],
        is_subscribed: bool,
    ) -> Result<Reconciliation> {
        let Some(durable) = self.load_messages(slug, is_subscribed).await? else {
            tracing::info!(slug, "Session gone on visibility regain, starting fresh");
            return Ok(Reconciliation::NotFound);
        };

        let local = match local_messages.split_last() {
            Some((last, rest)) if last.is_placeholder() => rest,
            _ => local_messages,
        };

        if local == durable.as_slice() {
            Ok(Reconciliation::Unchanged)
        } else if local.starts_with(&durable) {
            Ok(Reconciliation::KeptLocal {
                unconfirmed: local.len() - durable.len(),
            })
        } else {
            tracing::info!(
                slug,
                local = local.len(),
                durable = durable.len(),
                "Durable copy differs, replacing local transcript"
            );
            Ok(Reconciliation::Replaced(durable))
        }
    }

    /// Sets a new title
    pub async fn rename(&self, slug: &str, title: &str) -> Result<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(LampstandError::InvalidInput("title cannot be empty".to_string()).into());
        }

        self.visible(slug).await?;
        let mut fields = Row::new();
        fields.insert("title".into(), Value::from(title));
        if !self.store.update(Table::ChatSessions, slug, fields).await? {
            return Err(LampstandError::SessionNotFound(slug.to_string()).into());
        }
        Ok(())
    }

    /// Flips the pinned flag and returns the new value
    pub async fn toggle_pin(&self, slug: &str) -> Result<bool> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let session = self.visible(slug).await?;
            let pinned = !session.pinned;
            let mut fields = Row::new();
            fields.insert("pinned".into(), Value::from(pinned));

            if self
                .store
                .update_if(
                    Table::ChatSessions,
                    slug,
                    &Filter::new().eq("pinned", session.pinned),
                    fields,
                )
                .await?
            {
                return Ok(pinned);
            }
        }

        Err(LampstandError::StoreUnavailable(format!(
            "pin toggle on {} did not settle after {} attempts",
            slug, MAX_WRITE_ATTEMPTS
        ))
        .into())
    }

    /// Hides a session from listings and loads
    ///
    /// Deleting an already-deleted session succeeds without writing.
    pub async fn soft_delete(&self, slug: &str) -> Result<()> {
        let row = self
            .store
            .get(Table::ChatSessions, slug)
            .await?
            .ok_or_else(|| LampstandError::SessionNotFound(slug.to_string()))?;
        if ChatSession::from_row(&row)?.is_deleted {
            return Ok(());
        }

        let mut fields = Row::new();
        fields.insert("is_deleted".into(), Value::from(true));
        self.store.update(Table::ChatSessions, slug, fields).await?;
        tracing::info!(slug, "Session deleted");
        Ok(())
    }

    /// The user's visible sessions grouped for the history view
    pub async fn list(&self, user_id: &str, now: DateTime<Utc>) -> Result<SessionListing> {
        let filter = Filter::new()
            .eq("user_id", user_id)
            .eq("is_deleted", false);
        let rows = self
            .store
            .query(
                Table::ChatSessions,
                &filter,
                Some(&OrderBy::desc("last_accessed")),
            )
            .await?;

        let mut listing = SessionListing::default();
        for row in &rows {
            let session = match ChatSession::from_row(row) {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(slug = %row.key, error = %e, "Skipping malformed session");
                    continue;
                }
            };
            let summary = SessionSummary::from(&session);
            let group = if session.pinned {
                &mut listing.pinned
            } else if session.last_accessed.date_naive() == now.date_naive() {
                &mut listing.today
            } else if now - session.last_accessed < Duration::days(7) {
                &mut listing.this_week
            } else {
                &mut listing.older
            };
            group.push(summary);
        }

        Ok(listing)
    }

    async fn visible(&self, slug: &str) -> Result<ChatSession> {
        self.get(slug)
            .await?
            .ok_or_else(|| LampstandError::SessionNotFound(slug.to_string()).into())
    }
}

/// Derives a session title from the first message
///
/// Keeps the first `max_chars` characters and appends `...` when the
/// message is longer.
///
/// # Examples
///
/// ```
/// use lampstand::sessions::make_title;
///
/// assert_eq!(make_title("Who was Ruth?", 30), "Who was Ruth?");
/// assert_eq!(
///     make_title("O que Gênesis ensina sobre a criação?", 30),
///     "O que Gênesis ensina sobre a c..."
/// );
/// ```
pub fn make_title(message: &str, max_chars: usize) -> String {
    let message = message.trim();
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let mut title: String = message.chars().take(max_chars).collect();
    title.push_str("...");
    title
}

fn generate_slug() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SLUG_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

fn validate_messages(messages: &[ChatMessage]) -> Result<()> {
    if messages.is_empty() {
        return Err(LampstandError::InvalidInput("no messages to store".to_string()).into());
    }
    if messages
        .iter()
        .any(|m| m.role == Role::Assistant && m.content.trim().is_empty())
    {
        return Err(
            LampstandError::InvalidInput("assistant message cannot be empty".to_string()).into(),
        );
    }
    Ok(())
}
