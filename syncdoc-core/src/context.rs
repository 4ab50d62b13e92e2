//! Cooperative cancellation scopes.
//!
//! Every async store operation takes a `&Context`. Cancellation is checked
//! at suspension points (reads, writes, stream steps); cancelling a scope
//! cancels every child scope derived from it.
//!
//! ```text
//! background ──► child ──► child
//!      │           │
//!   cancel() ──────┴──────► all descendants observe is_cancelled()
//! ```

use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Returned when an operation observes a cancelled scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
}

impl Context {
    /// Root scope that is only cancelled explicitly.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Derive a scope that is cancelled together with `self`, but can also
    /// be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Child scope plus the handle that cancels it.
    pub fn with_cancel(&self) -> (Self, CancellationToken) {
        let child = self.child();
        let handle = child.token.clone();
        (child, handle)
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn ensure_active(&self) -> Result<(), Cancelled> {
        if self.token.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once this scope is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Drive `fut` to completion unless the scope is cancelled first.
    ///
    /// On cancellation `fut` is dropped before the error is returned, so any
    /// resources it holds are released.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        self.ensure_active()?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Cancelled),
            out = fut => Ok(out),
        }
    }
}
