//! Request-scoped deadline and cancellation.
//!
//! A [`Context`] travels with every operation that touches a backend. The
//! operation future is raced against the deadline and the cancellation token;
//! whichever fires first drops the in-flight driver future, which aborts the
//! round-trip and hands the connection back to the pool.

use crate::error::{DbError, ErrorKind};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a guarded operation stopped before completing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    #[error("context canceled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl Interrupted {
    /// Interruptions always classify as [`ErrorKind::Timeout`].
    pub fn into_error(self, message: impl Into<String>) -> DbError {
        DbError::wrap(ErrorKind::Timeout, message, self)
    }
}

/// Deadline and cancellation carried by a single request.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl Context {
    /// A context that never expires on its own.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a child that expires after `timeout`, or earlier if the parent does.
    ///
    /// Cancelling the parent cancels the child; cancelling the child leaves the
    /// parent untouched. A timeout too large to represent as an instant adds
    /// no deadline of its own.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.child(),
        }
    }

    /// Derive a child that expires at `deadline`, or earlier if the parent does.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            token: self.token.child_token(),
        }
    }

    /// Derive a child sharing the parent's deadline that can be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            deadline: self.deadline,
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// The reason this context is already done, if it is.
    pub fn interruption(&self) -> Option<Interrupted> {
        if self.token.is_cancelled() {
            return Some(Interrupted::Cancelled);
        }
        match self.deadline {
            Some(at) if at <= Instant::now() => Some(Interrupted::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.interruption().is_some()
    }

    /// Run `fut` until it completes or this context is done.
    ///
    /// A context that is already done never polls `fut`.
    pub async fn guard<F>(&self, fut: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        if let Some(reason) = self.interruption() {
            return Err(reason);
        }

        let expiry = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Interrupted::Cancelled),
            _ = expiry => Err(Interrupted::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_runs_to_completion() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        assert_eq!(ctx.guard(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_expired_context_short_circuits() {
        let ctx = Context::background().with_timeout(Duration::ZERO);
        assert_eq!(ctx.interruption(), Some(Interrupted::DeadlineExceeded));

        let polled = std::sync::atomic::AtomicBool::new(false);
        let result = ctx
            .guard(async { polled.store(true, std::sync::atomic::Ordering::SeqCst) })
            .await;
        assert_eq!(result, Err(Interrupted::DeadlineExceeded));
        assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_deadline_interrupts_pending_future() {
        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        let result = ctx.guard(std::future::pending::<()>()).await;
        assert_eq!(result, Err(Interrupted::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_future() {
        let ctx = Context::background();
        let child = ctx.child();
        let handle = tokio::spawn({
            let child = child.clone();
            async move { child.guard(std::future::pending::<()>()).await }
        });
        ctx.cancel();
        let result = handle.await.unwrap();
        assert_eq!(result, Err(Interrupted::Cancelled));
    }

    #[test]
    fn test_child_cancel_does_not_cancel_parent() {
        let parent = Context::background();
        let child = parent.with_timeout(Duration::from_secs(60));
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[tokio::test]
    async fn test_with_timeout_keeps_earlier_deadline() {
        let parent = Context::background().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
        assert!(child.remaining().unwrap() <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_adds_no_deadline() {
        let ctx = Context::background().with_timeout(Duration::MAX);
        assert_eq!(ctx.deadline(), None);
        assert!(!ctx.is_done());

        let parent = Context::background().with_timeout(Duration::from_secs(5));
        let child = parent.with_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(child.deadline(), parent.deadline());
        parent.cancel();
        assert!(child.is_done());
    }

    #[test]
    fn test_interruption_maps_to_timeout() {
        let err = Interrupted::Cancelled.into_error("query failed");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.to_string(), "[timeout] query failed: context canceled");
    }
}
