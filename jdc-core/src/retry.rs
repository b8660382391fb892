//! Bounded retry envelope shared by both transfer drivers.
//!
//! The drivers run explicit attempt loops (each attempt re-borrows the
//! connection halves, which rules out a closure-based combinator); this
//! module owns the policy: how many attempts, how long to back off, and
//! which errors qualify.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::TransferError;

/// Linear backoff step between attempts.
const BACKOFF_STEP: Duration = Duration::from_millis(500);

/// Attempt budget and backoff schedule for per-chunk operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts: max_attempts.max(1) }
    }

    /// Backoff before re-running attempt number `attempt` (1-based; the
    /// first attempt has no delay).
    pub fn backoff(&self, attempt: u32) -> Duration {
        BACKOFF_STEP.saturating_mul(attempt.saturating_sub(1))
    }

    /// Whether another attempt is allowed after `attempt` failed with `error`.
    pub fn should_retry(&self, attempt: u32, error: &TransferError) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }

    /// Wrap the terminal error of an exhausted loop.
    pub fn exhausted(&self, last: TransferError) -> TransferError {
        TransferError::RetriesExhausted { attempts: self.max_attempts, last: Box::new(last) }
    }
}

/// Sleep that stays responsive to shutdown.
pub async fn cancellable_sleep(
    token: &CancellationToken,
    duration: Duration,
) -> Result<(), TransferError> {
    if duration.is_zero() {
        return if token.is_cancelled() { Err(TransferError::Cancelled) } else { Ok(()) };
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(TransferError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_linear() {
        let policy = RetryPolicy::new(5);
        assert_eq!(policy.backoff(1), Duration::ZERO);
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_millis(1000));
        assert_eq!(policy.backoff(5), Duration::from_millis(2000));
    }

    #[test]
    fn retry_gate() {
        let policy = RetryPolicy::new(3);
        let transient = TransferError::Timeout(Duration::from_secs(1));
        let terminal = TransferError::Cancelled;

        assert!(policy.should_retry(1, &transient));
        assert!(policy.should_retry(2, &transient));
        assert!(!policy.should_retry(3, &transient));
        assert!(!policy.should_retry(1, &terminal));
    }

    #[test]
    fn zero_attempts_clamped_to_one() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.max_attempts, 1);
    }

    #[tokio::test]
    async fn sleep_observes_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let res = cancellable_sleep(&token, Duration::from_secs(60)).await;
        assert!(matches!(res, Err(TransferError::Cancelled)));
        // Zero-length sleeps still notice a cancelled token.
        let res = cancellable_sleep(&token, Duration::ZERO).await;
        assert!(matches!(res, Err(TransferError::Cancelled)));
    }
}
