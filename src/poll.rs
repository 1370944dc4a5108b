//! Bounded, cancellable polling
//!
//! Waits for a remote operation to reach a terminal state by probing at a
//! fixed interval, giving up after a maximum number of attempts.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often and how long to poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between probes
    pub interval: Duration,
    /// Probes before giving up (at least one probe is always made)
    pub max_attempts: u32,
}

impl PollConfig {
    /// Creates a poll configuration
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }
}

/// How a poll ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The probe reported a terminal value
    Ready(T),
    /// Every attempt was used without a terminal value
    TimedOut,
    /// The token was cancelled before a terminal value arrived
    Cancelled,
}

/// Probes until it returns `Some`, attempts run out, or `cancel` fires
///
/// The probe receives the 1-based attempt number. A probe error ends the
/// poll and is returned as is.
///
/// # Examples
///
/// ```
/// use lampstand::poll::{poll_until, PollConfig, PollOutcome};
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// # tokio_test::block_on(async {
/// let config = PollConfig::new(Duration::from_millis(1), 5);
/// let outcome = poll_until(config, &CancellationToken::new(), |attempt| async move {
///     Ok::<_, anyhow::Error>((attempt == 3).then_some(attempt))
/// })
/// .await
/// .unwrap();
/// assert_eq!(outcome, PollOutcome::Ready(3));
/// # });
/// ```
pub async fn poll_until<T, F, Fut>(
    config: PollConfig,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<PollOutcome<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let attempts = config.max_attempts.max(1);

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Ok(PollOutcome::Cancelled);
        }

        if let Some(value) = probe(attempt).await? {
            return Ok(PollOutcome::Ready(value));
        }
        tracing::debug!(attempt, attempts, "Poll not terminal yet");

        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(PollOutcome::Cancelled),
                _ = tokio::time::sleep(config.interval) => {}
            }
        }
    }

    Ok(PollOutcome::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LampstandError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> PollConfig {
        PollConfig::new(Duration::from_millis(1), max_attempts)
    }

    #[tokio::test]
    async fn test_times_out_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome: PollOutcome<()> = poll_until(fast(4), &CancellationToken::new(), |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(None)
            }
        })
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome: PollOutcome<u32> =
            poll_until(fast(3), &cancel, |_| async { Ok::<_, anyhow::Error>(Some(1)) })
                .await
                .unwrap();
        assert_eq!(outcome, PollOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let cancel = CancellationToken::new();
        let config = PollConfig::new(Duration::from_secs(60), 3);
        let trigger = cancel.clone();

        let outcome: PollOutcome<()> = poll_until(config, &cancel, |_| {
            trigger.cancel();
            async { Ok::<_, anyhow::Error>(None) }
        })
        .await
        .unwrap();
        assert_eq!(outcome, PollOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_probe_error_ends_poll() {
        let result: Result<PollOutcome<()>> =
            poll_until(fast(5), &CancellationToken::new(), |_| async {
                Err::<Option<()>, anyhow::Error>(
                    LampstandError::StoreUnavailable("offline".into()).into(),
                )
            })
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_attempts_still_probes_once() {
        assert_eq!(PollConfig::new(Duration::ZERO, 0).max_attempts, 1);
    }
}
