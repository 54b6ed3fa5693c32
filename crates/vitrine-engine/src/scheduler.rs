//! Scheduling primitives for request coordination.
//!
//! `Debouncer` is a re-armable trailing timer; `RequestGuard` hands out
//! generation-stamped cancellation tickets so only the newest request of a
//! view can commit.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Debouncer
// =============================================================================

/// Trailing debounce timer.
///
/// Arming pushes the deadline out by `delay`. `tick()` resolves at the
/// deadline, or never while disarmed, so it can sit in a `select!` loop.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Start or restart the window.
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// A future for the current deadline. Does not borrow the debouncer.
    pub fn tick(&self) -> impl Future<Output = ()> + Send + 'static {
        let deadline = self.deadline;
        async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        }
    }
}

// =============================================================================
// Request Guard
// =============================================================================

/// Permission to run one request.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub generation: u64,
    pub token: CancellationToken,
}

/// Single-active-request guard.
///
/// `begin()` cancels whatever was running and issues a newer generation.
/// Outcomes are accepted only through `finish()` with the current generation.
#[derive(Debug, Default)]
pub struct RequestGuard {
    generation: u64,
    active: Option<CancellationToken>,
}

impl RequestGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supersede the in-flight request (if any) and start a new one.
    pub fn begin(&mut self) -> Ticket {
        if let Some(previous) = self.active.take() {
            previous.cancel();
        }
        self.generation += 1;
        let token = CancellationToken::new();
        self.active = Some(token.clone());
        Ticket {
            generation: self.generation,
            token,
        }
    }

    /// Accept an outcome. Returns `false` for superseded generations.
    pub fn finish(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.active = None;
        true
    }

    /// Cancel the in-flight request without superseding it.
    ///
    /// Its cancellation outcome still arrives with the current generation.
    pub fn cancel(&mut self) -> bool {
        match &self.active {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn is_in_flight(&self) -> bool {
        self.active.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}
