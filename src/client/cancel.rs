//! Per-call cancellation.

use crate::Error;
use std::future::Future;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What may end a single call early: a token, a deadline, or both.
#[derive(Debug, Clone, Default)]
pub(crate) struct Cancel {
    pub(crate) token: Option<CancellationToken>,
    pub(crate) deadline: Option<Instant>,
}

impl Cancel {
    /// Completes once the token is cancelled or the deadline passes. Never
    /// completes if neither is set.
    pub(crate) async fn fired(&self) {
        match (&self.token, self.deadline) {
            (None, None) => std::future::pending().await,
            (Some(token), None) => token.cancelled().await,
            (None, Some(deadline)) => tokio::time::sleep_until(deadline).await,
            (Some(token), Some(deadline)) => tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {}
            },
        }
    }

    /// Runs `work` unless cancellation fires first.
    pub(crate) async fn race<T>(
        &self,
        work: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        tokio::select! {
            biased;
            _ = self.fired() => Err(Error::Cancelled),
            result = work => result,
        }
    }
}
