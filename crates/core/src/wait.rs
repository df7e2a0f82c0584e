use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use parking_lot::Mutex;

/// How long a consumer is willing to block for a queue entry or a
/// completion.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use charon_core::prelude::*;
///
/// let bounded = Wait::Timeout(Duration::from_millis(250));
/// assert!(matches!(bounded, Wait::Timeout(_)));
/// ```
#[derive(Debug, Clone)]
pub enum Wait {
    /// Never park; report empty immediately.
    Immediate,
    /// Park for at most the given duration.
    Timeout(Duration),
    /// Park until data arrives or the token is cancelled.
    Cancellable(CancelToken),
}

impl Wait {
    /// Map the device surface's timeout convention: a positive millisecond
    /// count bounds the wait, zero waits until data arrives or `token`
    /// cancels.
    pub fn from_timeout_ms(ms: u64, token: CancelToken) -> Self {
        if ms == 0 {
            Wait::Cancellable(token)
        } else {
            Wait::Timeout(Duration::from_millis(ms))
        }
    }
}

/// Result of a blocking pop or completion wait.
#[derive(Debug)]
pub enum WaitOutcome<T> {
    /// An entry was dequeued.
    Ready(T),
    /// Nothing was pending and the caller asked not to block.
    Empty,
    /// The bounded wait lapsed with nothing pending.
    TimedOut,
    /// The wait was cancelled through its token.
    Cancelled,
}

impl<T> WaitOutcome<T> {
    /// Extract the value for `Ready`, discarding the outcome otherwise.
    pub fn ready(self) -> Option<T> {
        match self {
            WaitOutcome::Ready(value) => Some(value),
            _ => None,
        }
    }
}

/// Something a `CancelToken` can wake out of a parked wait.
pub(crate) trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// Cancellation handle for unbounded waits.
///
/// Cancelling is sticky: once cancelled, every wait that carries the token
/// returns `Cancelled` without parking.
///
/// # Example
/// ```rust
/// use charon_core::prelude::CancelToken;
///
/// let token = CancelToken::new();
/// assert!(!token.is_cancelled());
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    watchers: Mutex<Vec<Weak<dyn Interrupt>>>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cancel the token and wake every waiter currently parked with it.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        let watchers = std::mem::take(&mut *self.inner.watchers.lock());
        for watcher in watchers {
            if let Some(target) = watcher.upgrade() {
                target.interrupt();
            }
        }
    }

    /// Register a waiter so `cancel` can reach it. Callers must re-check
    /// `is_cancelled` under their own lock after registering.
    ///
    /// Watching the same target again is a no-op, so a token reused across
    /// many waits on one queue holds a single entry for it.
    pub(crate) fn watch(&self, target: Weak<dyn Interrupt>) {
        let mut watchers = self.inner.watchers.lock();
        watchers.retain(|w| w.strong_count() > 0);
        if !watchers.iter().any(|w| w.ptr_eq(&target)) {
            watchers.push(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_sticky() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn zero_timeout_means_wait_for_cancel() {
        let token = CancelToken::new();
        assert!(matches!(
            Wait::from_timeout_ms(0, token.clone()),
            Wait::Cancellable(_)
        ));
        assert!(matches!(
            Wait::from_timeout_ms(250, token),
            Wait::Timeout(d) if d == Duration::from_millis(250)
        ));
    }

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
    }
}
