//! Process-wide session notifications.
//!
//! Views do not handle expired credentials themselves; they forward them here
//! and whoever owns the session (login screen, app shell) reacts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Session-level events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Credentials expired and could not be refreshed.
    Expired,
}

/// Cloneable handle to the session event channel.
///
/// An expiry is reported once, no matter how many layers or views see it,
/// until the session is renewed.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
    expired: Arc<AtomicBool>,
}

impl SessionEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            tx,
            expired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Report an expired session. Returns `false` if it was already reported.
    pub fn notify_expired(&self) -> bool {
        if self.expired.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::warn!("Session expired");
        let _ = self.tx.send(SessionEvent::Expired);
        true
    }

    /// Credentials are valid again; the next expiry is reported.
    pub fn renewed(&self) {
        self.expired.store(false, Ordering::Release);
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}
