//! Retry-with-backoff for transient provider failures.

use std::future::Future;
use std::time::Duration;

use maestro_config::RetrySettings;
use maestro_domain::{Error, Result};
use rand::Rng;
use tracing::warn;

/// Run `f` up to `settings.max_attempts` times.
///
/// Only retryable errors (transient network / 5xx / 429) are retried.  The
/// delay before attempt N is full-jittered exponential backoff,
/// `rand(0..=base * 2^N)`, except that an explicit Retry-After from a rate
/// limit overrides the computed delay.
pub async fn retry_with_backoff<T, F, Fut>(
    settings: &RetrySettings,
    op: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = settings.max_attempts.max(1);
    let mut last_err: Option<Error> = None;

    for attempt in 0..attempts {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                let delay = delay_for(settings, attempt, &err);
                warn!(
                    op,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err.unwrap_or_else(|| Error::Internal(anyhow::anyhow!("retry loop exhausted"))))
}

fn delay_for(settings: &RetrySettings, attempt: u32, err: &Error) -> Duration {
    if let Error::RateLimit {
        retry_after: Some(secs),
        ..
    } = err
    {
        return Duration::from_secs(*secs);
    }
    let ceiling = settings.base_delay_ms.saturating_mul(1u64 << attempt.min(16));
    let jittered = rand::thread_rng().gen_range(0..=ceiling);
    Duration::from_millis(jittered)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_domain::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetrySettings {
        RetrySettings {
            max_attempts: 3,
            base_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn succeeds_first_try_without_retrying() {
        let calls = AtomicU32::new(0);
        let out = retry_with_backoff(&fast_retry(), "op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(1)
        })
        .await
        .unwrap();
        assert_eq!(out, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let out = retry_with_backoff(&fast_retry(), "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Transient("flaky".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let err = retry_with_backoff(&fast_retry(), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Error::Transient("down".into())) }
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let err = retry_with_backoff(&fast_retry(), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Error::Validation("bad".into())) }
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn circuit_open_is_not_retried() {
        let calls = AtomicU32::new(0);
        retry_with_backoff(&fast_retry(), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(Error::CircuitOpen {
                    provider: "p".into(),
                    retry_in: 9,
                })
            }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limit_retry_after_is_honoured() {
        // retry_after: 0 keeps the test fast while still exercising the path.
        let calls = AtomicU32::new(0);
        let out = retry_with_backoff(&fast_retry(), "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Error::RateLimit {
                        message: "slow down".into(),
                        retry_after: Some(0),
                    })
                } else {
                    Ok(1)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 1);
    }
}
