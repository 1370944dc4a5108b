//! Identity provider boundary
//!
//! The core only needs to know who is signed in and to hear about
//! sign-in/sign-out. An absent user means quota and session operations
//! are unavailable; it is not an error.

use tokio::sync::watch;

/// Opaque user identifier
pub type UserId = String;

/// Source of the signed-in user
#[cfg_attr(test, mockall::automock)]
pub trait IdentityProvider: Send + Sync {
    /// Currently signed-in user, if any
    fn current_user_id(&self) -> Option<UserId>;

    /// Receiver that observes every auth-state change
    fn subscribe(&self) -> watch::Receiver<Option<UserId>>;
}

/// Identity held in process and changed explicitly
///
/// Used by the CLI (a single local user) and by tests.
#[derive(Debug)]
pub struct LocalIdentity {
    tx: watch::Sender<Option<UserId>>,
}

impl LocalIdentity {
    /// Start with the given user signed in (or nobody)
    pub fn new(user: Option<UserId>) -> Self {
        let (tx, _rx) = watch::channel(user);
        Self { tx }
    }

    /// Sign a user in, notifying subscribers
    pub fn sign_in(&self, user: impl Into<UserId>) {
        let user = user.into();
        tracing::info!(user_id = %user, "Signed in");
        self.tx.send_replace(Some(user));
    }

    /// Sign out, notifying subscribers
    pub fn sign_out(&self) {
        tracing::info!("Signed out");
        self.tx.send_replace(None);
    }
}

impl IdentityProvider for LocalIdentity {
    fn current_user_id(&self) -> Option<UserId> {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.tx.subscribe()
    }
}
