//! Caller deadlines and cooperative cancellation
//!
//! Every store access, filesystem operation and outbound call runs through
//! [`OperationContext::run`], which bounds it by the earlier of the caller's
//! deadline and the operation's own timeout. Cancellation is cooperative:
//! multi-step operations call [`OperationContext::checkpoint`] between steps.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Result, SafeguardError};

/// Deadline and cancellation handle passed into long-running operations
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl OperationContext {
    /// Context with no deadline
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that expires `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            token: CancellationToken::new(),
        }
    }

    /// Replace the deadline
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Share an existing cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Absolute deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Token that fires when this context is cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel this context and every clone of it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether `cancel` has been called
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail if cancelled or past the deadline
    pub fn checkpoint(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(SafeguardError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(SafeguardError::Timeout(Duration::ZERO));
            }
        }
        Ok(())
    }

    /// Run `operation` bounded by this context and an optional per-call timeout
    pub async fn run<F, T>(&self, timeout: Option<Duration>, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.checkpoint()?;

        let now = Instant::now();
        let local = timeout.map(|t| now + t);
        let effective = match (self.deadline, local) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        match effective {
            Some(deadline) => {
                let budget = deadline.saturating_duration_since(now);
                tokio::select! {
                    _ = self.token.cancelled() => Err(SafeguardError::Cancelled),
                    result = tokio::time::timeout_at(deadline, operation) => {
                        result.map_err(|_| SafeguardError::Timeout(budget))?
                    }
                }
            }
            None => {
                tokio::select! {
                    _ = self.token.cancelled() => Err(SafeguardError::Cancelled),
                    result = operation => result,
                }
            }
        }
    }
}
