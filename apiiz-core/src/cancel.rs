use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::resolver::Resolver;

/// Resettable cancellation handle shared by every call of one logical operation.
///
/// The token itself only records intent. Transports observe cancellation
/// through the [`CancellationToken`] returned by [`CancelToken::signal`],
/// which they capture when a request starts. `reset` detaches that signal so
/// the next call gets a fresh one; a signal already handed out keeps whatever
/// state it had.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<Mutex<TokenState>>,
}

#[derive(Default)]
struct TokenState {
    cancelled: bool,
    signal: Option<CancellationToken>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear the cancelled flag and drop the current signal.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.cancelled = false;
        state.signal = None;
    }

    /// Mark the token cancelled and abort the signal issued since the last reset.
    pub fn cancel(&self) {
        let mut state = self.lock();
        state.cancelled = true;
        if let Some(signal) = &state.signal {
            signal.cancel();
        }
        trace!("cancel token triggered");
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Signal for the current call, created on first access after a reset.
    ///
    /// When the token was cancelled before anyone asked for the signal, the
    /// new signal starts out aborted.
    pub fn signal(&self) -> CancellationToken {
        let mut state = self.lock();
        if let Some(signal) = &state.signal {
            return signal.clone();
        }
        let signal = CancellationToken::new();
        if state.cancelled {
            signal.cancel();
        }
        state.signal = Some(signal.clone());
        signal
    }

    /// True when both handles refer to the same token.
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("CancelToken")
            .field("cancelled", &state.cancelled)
            .field("signal_issued", &state.signal.is_some())
            .finish()
    }
}

/// Attach `token` to `resolver`. `define` resets the token at the start of
/// every call made through the produced dispatcher.
pub fn cancellable<P, R>(resolver: Resolver<P, R>, token: CancelToken) -> Resolver<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    resolver.with_token(token)
}

/// Create a fresh token, hand it to `build`, and attach it to the resolver
/// `build` returns.
pub fn cancellable_with<P, R, F>(build: F) -> Resolver<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
    F: FnOnce(CancelToken) -> Resolver<P, R>,
{
    let token = CancelToken::new();
    build(token.clone()).with_token(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_and_reset() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());
        // stays cancelled until reset
        assert!(token.is_cancelled());

        token.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_signal_is_lazy_and_stable() {
        let token = CancelToken::new();
        let first = token.signal();
        let second = token.signal();
        assert!(!first.is_cancelled());

        token.cancel();
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_signal_requested_after_cancel_starts_aborted() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.signal().is_cancelled());
    }

    #[test]
    fn test_reset_detaches_issued_signal() {
        let token = CancelToken::new();
        let in_flight = token.signal();

        token.reset();
        let fresh = token.signal();
        assert!(!fresh.is_cancelled());

        token.cancel();
        assert!(fresh.is_cancelled());
        // the signal captured before the reset belongs to a finished call
        assert!(!in_flight.is_cancelled());
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
        assert!(token.same_as(&other));
        assert!(!token.same_as(&CancelToken::new()));
    }
}
