use crate::sessions::{ChatMessage, Role};
use std::fmt;

/// Where the conversation is in a send
///
/// `Idle -> Sending -> Completed -> Idle` on success and
/// `Idle -> Sending -> Failed -> Idle` when the completion fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// Ready for input
    Idle,
    /// A reply is streaming
    Sending,
    /// The reply finished and is being recorded
    Completed,
    /// The reply failed
    Failed,
}

impl fmt::Display for SendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendState::Idle => write!(f, "idle"),
            SendState::Sending => write!(f, "sending"),
            SendState::Completed => write!(f, "completed"),
            SendState::Failed => write!(f, "failed"),
        }
    }
}

/// Persistence status of a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Present in the durable copy
    Confirmed,
    /// Shown locally, not yet in the durable copy
    Pending,
    /// Part of a turn that failed or was interrupted; never persisted
    Failed,
}

/// One line of the local transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// The message as displayed
    pub message: ChatMessage,
    /// Whether it is persisted
    pub status: EntryStatus,
    /// Send generation that produced it (0 for loaded history)
    pub turn: u64,
}

impl TranscriptEntry {
    pub(crate) fn confirmed(message: ChatMessage) -> Self {
        Self {
            message,
            status: EntryStatus::Confirmed,
            turn: 0,
        }
    }

    pub(crate) fn pending(message: ChatMessage, turn: u64) -> Self {
        Self {
            message,
            status: EntryStatus::Pending,
            turn,
        }
    }

    /// True for the synthesized entry standing in for a failed reply
    pub fn is_error(&self) -> bool {
        self.status == EntryStatus::Failed && self.message.role == Role::Assistant
    }
}

/// Something the user should be told
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Nothing to send
    EmptyMessage,
    /// Nobody is signed in
    SignedOut,
    /// The message limit for this window is reached
    QuotaExceeded {
        /// Messages counted this window
        count: u32,
        /// Effective limit
        limit: u32,
    },
    /// The record store could not be reached
    StoreUnavailable(String),
    /// The reply could not be produced
    CompletionFailed(String),
    /// The reply is shown but could not be saved
    PersistFailed(String),
    /// The reply is shown but could not be counted
    LedgerFailed(String),
    /// The conversation no longer exists; a fresh one was started
    SessionNotFound(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::EmptyMessage => write!(f, "Type a message first."),
            Notice::SignedOut => write!(f, "Sign in to chat."),
            Notice::QuotaExceeded { count, limit } => write!(
                f,
                "You have used {}/{} messages this month. Subscribe for unlimited messages.",
                count, limit
            ),
            Notice::StoreUnavailable(e) => write!(f, "Could not reach storage: {}", e),
            Notice::CompletionFailed(e) => write!(f, "The assistant could not answer: {}", e),
            Notice::PersistFailed(e) => {
                write!(f, "Reply shown but not saved yet: {}", e)
            }
            Notice::LedgerFailed(e) => write!(f, "Reply shown but not counted: {}", e),
            Notice::SessionNotFound(slug) => {
                write!(f, "Conversation {} was not found; starting fresh.", slug)
            }
        }
    }
}

/// Result of a send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The reply streamed to completion
    Completed {
        /// Full reply text
        reply: String,
        /// Session the turn belongs to, once saved
        slug: Option<String>,
        /// Follow-up problems (saving, counting, limit reached meanwhile)
        notices: Vec<Notice>,
    },
    /// Refused before anything was sent; the draft is handed back
    Blocked {
        /// Why
        notice: Notice,
        /// The text the user typed
        draft: String,
    },
    /// The completion failed; the transcript holds an error entry
    Failed(Notice),
    /// A newer send, cancellation or reconciliation replaced this turn
    Superseded,
}

/// Error text shown in place of an interrupted reply
pub(crate) const INTERRUPTED_REPLY: &str = "[reply interrupted]";

/// Error text shown in place of a failed reply
pub(crate) fn failed_reply(reason: &str) -> String {
    format!("[no reply: {}]", reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_notice_text() {
        let notice = Notice::QuotaExceeded { count: 10, limit: 10 };
        assert!(notice.to_string().contains("10/10"));
    }

    #[test]
    fn test_error_entry_detection() {
        let mut entry = TranscriptEntry::pending(ChatMessage::assistant(failed_reply("x")), 3);
        assert!(!entry.is_error());
        entry.status = EntryStatus::Failed;
        assert!(entry.is_error());
    }

    #[test]
    fn test_send_state_display() {
        assert_eq!(SendState::Sending.to_string(), "sending");
    }
}
