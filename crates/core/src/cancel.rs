//! Cooperative cancellation token.
//!
//! One token is created by the owner of a component tree and cloned into every
//! component at construction. Background loops and waiting callers select on
//! [`CancelToken::cancelled`]; teardown is a single call to
//! [`CancelToken::cancel`].

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable cancellation signal. All clones observe the same state.
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    /// Create a token that has not fired.
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Fire the token. Idempotent.
    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    /// Non-blocking check.
    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once the token has fired, immediately if it already has.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
