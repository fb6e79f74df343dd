//! Session state shared between a connection reader and its owners.
//!
//! The reader task and any number of external handles observe the same
//! [`SessionControl`]. Every transition is a single atomic operation, so the
//! end-of-stream path and an external `dispose()` can race freely: exactly
//! one of them wins, and closing the socket twice is a no-op.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio::sync::watch;

/// Lifecycle state of a connection reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Read loop is active.
    Running,
    /// Stream ended or failed and the disconnect hook fired.
    Disconnected,
    /// Torn down on request. The disconnect hook never fires.
    Disposed,
}

impl ReaderState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            RUNNING => ReaderState::Running,
            DISCONNECTED => ReaderState::Disconnected,
            _ => ReaderState::Disposed,
        }
    }
}

const RUNNING: u8 = 0;
const DISCONNECTED: u8 = 1;
const DISPOSED: u8 = 2;

/// Shared lifecycle flags and close signal for one connection session.
#[derive(Debug)]
pub struct SessionControl {
    state: AtomicU8,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
}

impl SessionControl {
    /// Create control state for a freshly connected session.
    pub fn new() -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            state: AtomicU8::new(RUNNING),
            closed: AtomicBool::new(false),
            close_tx,
        }
    }

    /// Current lifecycle state. May be stale by the time it is used.
    pub fn state(&self) -> ReaderState {
        ReaderState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Best-effort liveness snapshot.
    pub fn is_connected(&self) -> bool {
        self.state() == ReaderState::Running
    }

    /// Tear the session down without a disconnect notification.
    ///
    /// Returns `true` if this call moved the session out of `Running`.
    /// The socket is closed either way.
    pub fn dispose(&self) -> bool {
        let won = self.transition(DISPOSED);
        self.close();
        won
    }

    /// Record an unexpected end of the session.
    ///
    /// Returns `true` if the caller should fire the disconnect hook, which
    /// happens at most once and never after `dispose()`.
    pub(crate) fn finish(&self) -> bool {
        self.transition(DISCONNECTED)
    }

    /// Signal the socket closed.
    ///
    /// Returns `true` only for the call that performed the close.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.close_tx.send_replace(true);
        true
    }

    /// Check if the socket was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolve once the socket has been closed.
    pub async fn closed(&self) {
        let mut rx = self.close_tx.subscribe();
        // The sender lives in `self`, so this can only end by seeing `true`
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(RUNNING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_state_transitions() {
        let control = SessionControl::new();
        assert_eq!(control.state(), ReaderState::Running);
        assert!(control.is_connected());

        assert!(control.finish());
        assert_eq!(control.state(), ReaderState::Disconnected);
        assert!(!control.is_connected());

        // Terminal: neither path can fire again
        assert!(!control.finish());
        assert!(!control.dispose());
        assert_eq!(control.state(), ReaderState::Disconnected);
    }

    #[test]
    fn test_dispose_suppresses_disconnect() {
        let control = SessionControl::new();
        assert!(control.dispose());
        assert!(!control.is_connected());
        assert!(control.is_closed());
        assert!(!control.finish());
        assert_eq!(control.state(), ReaderState::Disposed);
    }

    #[test]
    fn test_close_is_idempotent() {
        let control = SessionControl::new();
        assert!(control.close());
        assert!(!control.close());
        assert!(control.is_closed());
        // Closing is not a state transition by itself
        assert_eq!(control.state(), ReaderState::Running);
    }

    #[tokio::test]
    async fn test_closed_resolves_after_close() {
        let control = Arc::new(SessionControl::new());
        let waiter = {
            let control = Arc::clone(&control);
            tokio::spawn(async move { control.closed().await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        control.close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("close signal not observed")
            .unwrap();

        // Already closed: resolves immediately
        control.closed().await;
    }
}
