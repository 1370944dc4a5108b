//! Chat send orchestration
//!
//! [`ChatController`] owns the local transcript of one conversation and
//! drives a send from quota check to persistence:
//!
//! 1. refuse early when nobody is signed in or the quota is used up,
//!    handing the draft back;
//! 2. show the user message and an empty reply placeholder, then stream the
//!    completion into the placeholder;
//! 3. on success, save the turn and count it against the quota;
//! 4. on failure, replace the placeholder with an error entry and neither
//!    save nor count the turn.
//!
//! The transcript sits behind a `std::sync::Mutex` that is never held
//! across an await. Every send is tagged with a turn number; chunks and
//! results for a turn that is no longer in flight are dropped, so an
//! abandoned stream cannot write into a newer conversation state.

use crate::completion::{CompletionRequest, CompletionService};
use crate::config::ChatConfig;
use crate::entitlements::EntitlementProvider;
use crate::error::{kind_of, LampstandError, Result};
use crate::identity::IdentityProvider;
use crate::poll::{poll_until, PollConfig, PollOutcome};
use crate::prompts::{self, Book};
use crate::quota::QuotaLedger;
use crate::sessions::{ChatMessage, Reconciliation, Role, SessionStore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod metrics;
pub mod types;

pub use self::metrics::SendMetrics;
pub use self::types::{EntryStatus, Notice, SendOutcome, SendState, TranscriptEntry};

use self::types::{failed_reply, INTERRUPTED_REPLY};

/// Collaborators a controller needs
#[derive(Clone)]
pub struct ChatServices {
    /// Who is signed in
    pub identity: Arc<dyn IdentityProvider>,
    /// Message quota
    pub ledger: QuotaLedger,
    /// Durable sessions
    pub sessions: SessionStore,
    /// Subscription state
    pub entitlements: Arc<dyn EntitlementProvider>,
    /// Language model
    pub completion: Arc<dyn CompletionService>,
}

#[derive(Debug)]
struct Conversation {
    owner: Option<String>,
    slug: Option<String>,
    book: Option<&'static Book>,
    entries: Vec<TranscriptEntry>,
    state: SendState,
    /// Last turn number handed out
    generation: u64,
    /// Turn currently streaming
    in_flight: Option<u64>,
    /// Bumped whenever the transcript is replaced wholesale
    epoch: u64,
    hidden: bool,
    hidden_during_send: bool,
}

impl Conversation {
    fn transition(&mut self, to: SendState) {
        if self.state != to {
            tracing::debug!(from = %self.state, to = %to, "Send state");
            self.state = to;
        }
    }

    fn reply_mut(&mut self, turn: u64) -> Option<&mut TranscriptEntry> {
        self.entries
            .iter_mut()
            .rev()
            .find(|e| e.turn == turn && e.message.role == Role::Assistant)
    }

    fn fail_turn(&mut self, turn: u64, reply: String) {
        for entry in self.entries.iter_mut().filter(|e| e.turn == turn) {
            entry.status = EntryStatus::Failed;
            if entry.message.role == Role::Assistant {
                entry.message.content = reply.clone();
            }
        }
    }

    fn interrupt_in_flight(&mut self) {
        if let Some(turn) = self.in_flight.take() {
            tracing::info!(turn, "Interrupting in-flight reply");
            self.fail_turn(turn, INTERRUPTED_REPLY.to_string());
        }
    }

    /// Messages worth showing the model or comparing with the durable copy
    fn live_messages(&self) -> Vec<ChatMessage> {
        self.entries
            .iter()
            .filter(|e| e.status != EntryStatus::Failed)
            .map(|e| e.message.clone())
            .collect()
    }

    /// Pending entries of finished turns, i.e. those a failed save left behind
    fn unsaved_entries(&self) -> Vec<TranscriptEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == EntryStatus::Pending && self.in_flight != Some(e.turn))
            .cloned()
            .collect()
    }

    fn replace_with(&mut self, slug: Option<String>, messages: Vec<ChatMessage>) {
        self.in_flight = None;
        self.epoch += 1;
        self.slug = slug;
        self.entries = messages.into_iter().map(TranscriptEntry::confirmed).collect();
        self.hidden_during_send = false;
        self.transition(SendState::Idle);
    }
}

fn lock(shared: &Mutex<Conversation>) -> MutexGuard<'_, Conversation> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn failure_reason(err: &anyhow::Error) -> String {
    match kind_of(err) {
        Some(LampstandError::CompletionFailed(m)) => m.clone(),
        _ => err.to_string(),
    }
}

/// Drives one conversation
pub struct ChatController {
    services: ChatServices,
    config: ChatConfig,
    translation: Option<String>,
    shared: Arc<Mutex<Conversation>>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl ChatController {
    /// Creates a controller with an empty, unscoped conversation
    pub fn new(services: ChatServices, config: ChatConfig) -> Self {
        Self {
            services,
            config,
            translation: None,
            shared: Arc::new(Mutex::new(Conversation {
                owner: None,
                slug: None,
                book: None,
                entries: Vec::new(),
                state: SendState::Idle,
                generation: 0,
                in_flight: None,
                epoch: 0,
                hidden: false,
                hidden_during_send: false,
            })),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Scopes new conversations to a book
    pub fn with_book(self, book: Option<&'static Book>) -> Self {
        lock(&self.shared).book = book;
        self
    }

    /// Asks the model to quote from a specific translation
    pub fn with_translation(mut self, translation: Option<String>) -> Self {
        self.translation = translation;
        self
    }

    fn conversation(&self) -> MutexGuard<'_, Conversation> {
        lock(&self.shared)
    }

    /// Snapshot of the local transcript
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.conversation().entries.clone()
    }

    /// Current send state
    pub fn state(&self) -> SendState {
        self.conversation().state
    }

    /// Slug of the saved session, if the conversation has been saved
    pub fn slug(&self) -> Option<String> {
        self.conversation().slug.clone()
    }

    /// Book the conversation is scoped to
    pub fn book(&self) -> Option<&'static Book> {
        self.conversation().book
    }

    fn system_prompt(&self, book: Option<&Book>) -> String {
        prompts::with_translation(
            prompts::build_system_prompt(book),
            self.translation.as_deref(),
        )
    }

    /// Starts over; any in-flight reply is abandoned
    pub fn new_conversation(&self) {
        let mut conv = self.conversation();
        conv.interrupt_in_flight();
        conv.replace_with(None, Vec::new());
    }

    /// Abandons the in-flight reply, keeping the rest of the transcript
    pub fn cancel(&self) {
        let mut conv = self.conversation();
        conv.interrupt_in_flight();
        conv.transition(SendState::Idle);
    }

    /// Drop the transcript when a different user is now signed in
    fn adopt_owner(&self, user_id: &str) {
        let mut conv = self.conversation();
        let owner = conv.owner.clone();
        match owner.as_deref() {
            Some(owner) if owner == user_id => {}
            Some(owner) => {
                tracing::info!(previous = %owner, user_id, "Signed-in user changed, starting fresh");
                conv.interrupt_in_flight();
                conv.replace_with(None, Vec::new());
                conv.owner = Some(user_id.to_string());
            }
            None => conv.owner = Some(user_id.to_string()),
        }
    }

    /// Resets the conversation whenever the signed-in user changes
    ///
    /// The task ends when the identity provider goes away.
    pub fn spawn_identity_watch(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut rx = self.services.identity.subscribe();
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let user = rx.borrow_and_update().clone();
                match user {
                    Some(user_id) => controller.adopt_owner(&user_id),
                    None => {
                        let mut conv = controller.conversation();
                        conv.interrupt_in_flight();
                        conv.replace_with(None, Vec::new());
                        conv.owner = None;
                    }
                }
            }
        })
    }

    async fn quota_notice(&self, user_id: &str) -> Notice {
        match self.services.ledger.status(user_id).await {
            Ok(status) => Notice::QuotaExceeded {
                count: status.count,
                limit: status.limit.unwrap_or(status.count),
            },
            Err(e) => Notice::StoreUnavailable(e.to_string()),
        }
    }

    /// Sends a message and streams the reply into the transcript
    ///
    /// Never returns an error: every failure becomes a [`Notice`].
    pub async fn send(&self, text: &str) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            metrics::record_blocked("empty");
            return SendOutcome::Blocked {
                notice: Notice::EmptyMessage,
                draft: String::new(),
            };
        }
        let blocked = |notice: Notice, reason: &'static str| {
            metrics::record_blocked(reason);
            SendOutcome::Blocked {
                notice,
                draft: text.to_string(),
            }
        };

        let Some(user_id) = self.services.identity.current_user_id() else {
            return blocked(Notice::SignedOut, "signed_out");
        };
        self.adopt_owner(&user_id);

        let subscribed = match self.services.entitlements.is_subscribed(&user_id).await {
            Ok(subscribed) => subscribed,
            Err(e) => return blocked(Notice::StoreUnavailable(e.to_string()), "store"),
        };
        if let Err(e) = self
            .services
            .ledger
            .require_can_send(&user_id, subscribed)
            .await
        {
            if let Some(LampstandError::QuotaExceeded { count, limit }) = kind_of(&e) {
                let notice = Notice::QuotaExceeded {
                    count: *count,
                    limit: *limit,
                };
                return blocked(notice, "quota");
            }
            tracing::warn!(user_id, "Quota check failed: {}", e);
            return blocked(Notice::StoreUnavailable(e.to_string()), "store");
        }

        let (turn, book, request) = {
            let mut conv = self.conversation();
            conv.interrupt_in_flight();
            conv.generation += 1;
            let turn = conv.generation;
            let history = conv.live_messages();
            conv.entries
                .push(TranscriptEntry::pending(ChatMessage::user(text), turn));
            conv.entries
                .push(TranscriptEntry::pending(ChatMessage::assistant(""), turn));
            conv.in_flight = Some(turn);
            conv.hidden_during_send = conv.hidden;
            conv.transition(SendState::Sending);
            let book = conv.book;
            (
                turn,
                book,
                CompletionRequest {
                    system_prompt: self.system_prompt(book),
                    history,
                    prompt: text.to_string(),
                },
            )
        };
        let metrics = SendMetrics::start(book.map(|b| b.slug));

        let shared = Arc::clone(&self.shared);
        let mut on_chunk = move |chunk: &str| {
            let mut conv = lock(&shared);
            if conv.in_flight == Some(turn) {
                if let Some(entry) = conv.reply_mut(turn) {
                    entry.message.content.push_str(chunk);
                }
            }
        };
        let result = self
            .services
            .completion
            .complete(&request, &mut on_chunk)
            .await;

        let reply = {
            let mut conv = self.conversation();
            if conv.in_flight != Some(turn) {
                tracing::debug!(turn, "Dropping result for superseded turn");
                metrics.finish("superseded");
                return SendOutcome::Superseded;
            }
            conv.in_flight = None;

            match result {
                Ok(reply) => {
                    if let Some(entry) = conv.reply_mut(turn) {
                        entry.message.content = reply.clone();
                    }
                    conv.transition(SendState::Completed);
                    reply
                }
                Err(e) => {
                    let reason = failure_reason(&e);
                    tracing::error!(turn, "Completion failed: {}", reason);
                    conv.fail_turn(turn, failed_reply(&reason));
                    conv.transition(SendState::Failed);
                    conv.transition(SendState::Idle);
                    metrics.finish("failed");
                    return SendOutcome::Failed(Notice::CompletionFailed(reason));
                }
            }
        };

        let mut notices = Vec::new();
        if let Err(e) = self.persist_pending(&user_id).await {
            tracing::warn!(turn, "Could not save turn: {}", e);
            metrics.record_persist_failure("session");
            notices.push(Notice::PersistFailed(e.to_string()));
        }

        match self.services.ledger.increment(&user_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(user_id, "Limit reached by a concurrent send");
                notices.push(self.quota_notice(&user_id).await);
            }
            Err(e) => {
                tracing::warn!(user_id, "Could not count turn: {}", e);
                metrics.record_persist_failure("ledger");
                notices.push(Notice::LedgerFailed(e.to_string()));
            }
        }

        let slug = {
            let mut conv = self.conversation();
            if conv.state == SendState::Completed {
                conv.transition(SendState::Idle);
            }
            conv.slug.clone()
        };
        metrics.finish("completed");

        SendOutcome::Completed {
            reply,
            slug,
            notices,
        }
    }

    /// Saves every pending entry of finished turns
    ///
    /// A conversation without a slug gets a new session. Entries stay
    /// pending when the write fails so a later save picks them up.
    async fn persist_pending(&self, user_id: &str) -> Result<()> {
        let _guard = self.persist_lock.lock().await;

        let (slug, book, epoch, turns, messages) = {
            let conv = self.conversation();
            let pending = conv.unsaved_entries();
            if pending.is_empty() {
                return Ok(());
            }
            let turns: HashSet<u64> = pending.iter().map(|e| e.turn).collect();
            let messages: Vec<ChatMessage> = pending.into_iter().map(|e| e.message).collect();
            (conv.slug.clone(), conv.book, conv.epoch, turns, messages)
        };

        let slug = match slug {
            Some(slug) => {
                self.services
                    .sessions
                    .append_messages(&slug, &messages)
                    .await?;
                slug
            }
            None => {
                self.services
                    .sessions
                    .create_session_with_messages(user_id, messages, book.map(|b| b.slug))
                    .await?
            }
        };

        let mut conv = self.conversation();
        if conv.epoch != epoch {
            tracing::debug!(slug = %slug, "Transcript replaced while saving");
            return Ok(());
        }
        for entry in conv
            .entries
            .iter_mut()
            .filter(|e| e.status == EntryStatus::Pending && turns.contains(&e.turn))
        {
            entry.status = EntryStatus::Confirmed;
        }
        conv.slug.get_or_insert(slug);
        Ok(())
    }

    /// Loads a saved conversation from history
    ///
    /// Returns a notice when the session cannot be opened; the controller
    /// then holds a fresh conversation.
    pub async fn open_session(&self, slug: &str) -> Option<Notice> {
        let Some(user_id) = self.services.identity.current_user_id() else {
            return Some(Notice::SignedOut);
        };
        self.adopt_owner(&user_id);

        let subscribed = match self.services.entitlements.is_subscribed(&user_id).await {
            Ok(subscribed) => subscribed,
            Err(e) => return Some(Notice::StoreUnavailable(e.to_string())),
        };

        match self.services.sessions.open(slug, subscribed).await {
            Ok(Some(session)) if session.user_id == user_id => {
                let mut conv = self.conversation();
                conv.interrupt_in_flight();
                conv.book = session.book_slug.as_deref().and_then(prompts::find_book);
                conv.replace_with(Some(session.slug), session.messages);
                None
            }
            Ok(_) => {
                self.new_conversation();
                Some(Notice::SessionNotFound(slug.to_string()))
            }
            Err(e) => Some(Notice::StoreUnavailable(e.to_string())),
        }
    }

    /// The view was hidden (window minimised, tab backgrounded)
    pub fn set_hidden(&self) {
        let mut conv = self.conversation();
        conv.hidden = true;
        if conv.state == SendState::Sending {
            conv.hidden_during_send = true;
        }
    }

    /// The view is visible again; reconcile if a send was hidden
    ///
    /// When the durable copy moved on while hidden, the local transcript is
    /// replaced and any reply still streaming is dropped. Finished turns
    /// that were never saved are kept after the durable messages and saved
    /// again.
    pub async fn regain_visibility(&self) -> Option<Notice> {
        let (slug, local, epoch) = {
            let mut conv = self.conversation();
            conv.hidden = false;
            if !std::mem::take(&mut conv.hidden_during_send) {
                return None;
            }
            (conv.slug.clone()?, conv.live_messages(), conv.epoch)
        };
        let user_id = self.services.identity.current_user_id()?;
        let subscribed = match self.services.entitlements.is_subscribed(&user_id).await {
            Ok(subscribed) => subscribed,
            Err(e) => return Some(Notice::StoreUnavailable(e.to_string())),
        };

        let outcome = match self
            .services
            .sessions
            .reconcile_on_visibility_regain(&slug, &local, subscribed)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(slug = %slug, "Reconciliation failed: {}", e);
                return Some(Notice::StoreUnavailable(e.to_string()));
            }
        };

        let carried = {
            let mut conv = self.conversation();
            if conv.epoch != epoch {
                return None;
            }
            match outcome {
                Reconciliation::Unchanged | Reconciliation::KeptLocal { .. } => return None,
                Reconciliation::Replaced(durable) => {
                    // Turns already counted but not yet saved go back on top
                    // of the durable copy so the next save writes them.
                    let unsaved = conv.unsaved_entries();
                    conv.replace_with(Some(slug.clone()), durable);
                    let carried = unsaved.len();
                    conv.entries.extend(unsaved);
                    carried
                }
                Reconciliation::NotFound => {
                    conv.interrupt_in_flight();
                    conv.replace_with(None, Vec::new());
                    return Some(Notice::SessionNotFound(slug));
                }
            }
        };

        if carried == 0 {
            return None;
        }
        tracing::info!(slug = %slug, carried, "Re-saving unsaved turns on top of durable copy");
        match self.persist_pending(&user_id).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(slug = %slug, "Could not save carried turns: {}", e);
                Some(Notice::PersistFailed(e.to_string()))
            }
        }
    }

    /// Waits for the durable copy to reach `expected_len` messages
    ///
    /// Used when another device is finishing a turn in this session. Polls
    /// at the configured interval and adopts the durable transcript once it
    /// is long enough.
    ///
    /// # Errors
    ///
    /// Returns `LampstandError::SessionNotFound` when the conversation has
    /// not been saved, or the store error that ended the poll.
    pub async fn await_remote_turn(
        &self,
        expected_len: usize,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome<usize>> {
        let (slug, epoch) = {
            let conv = self.conversation();
            let slug = conv
                .slug
                .clone()
                .ok_or_else(|| LampstandError::SessionNotFound("unsaved conversation".into()))?;
            (slug, conv.epoch)
        };
        let subscribed = match self.services.identity.current_user_id() {
            Some(user_id) => self.services.entitlements.is_subscribed(&user_id).await?,
            None => false,
        };

        let config = PollConfig::new(
            Duration::from_millis(self.config.reconcile_poll_interval_ms),
            self.config.reconcile_poll_attempts,
        );
        let sessions = &self.services.sessions;
        let outcome = poll_until(config, cancel, |_| {
            let slug = slug.clone();
            async move {
                Ok(sessions
                    .load_messages(&slug, subscribed)
                    .await?
                    .filter(|m| m.len() >= expected_len))
            }
        })
        .await?;

        Ok(match outcome {
            PollOutcome::Ready(messages) => {
                let len = messages.len();
                let mut conv = self.conversation();
                if conv.epoch == epoch {
                    conv.replace_with(Some(slug), messages);
                }
                PollOutcome::Ready(len)
            }
            PollOutcome::TimedOut => PollOutcome::TimedOut,
            PollOutcome::Cancelled => PollOutcome::Cancelled,
        })
    }
}
