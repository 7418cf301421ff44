//! Shared retry/backoff helper (§4.1, §7): `TransientStore` gets 3 attempts
//! at 50ms/200ms/1s; `LLMTransient` gets 2 attempts with the same doubling
//! shape. One generic loop, parameterized by the backoff schedule, so the
//! driver doesn't hand-roll the same `for attempt in 0..N` twice.

use std::time::Duration;

use tracing::warn;

/// 50ms, 200ms, 1s — the store retry schedule (§4.1).
pub const STORE_BACKOFF: &[Duration] = &[
    Duration::from_millis(50),
    Duration::from_millis(200),
    Duration::from_secs(1),
];

/// 100ms, 400ms — two retries for a single LLM call (§7 `LLMTransient`).
pub const LLM_BACKOFF: &[Duration] = &[Duration::from_millis(100), Duration::from_millis(400)];

/// Runs `op` up to `backoff.len() + 1` times, sleeping `backoff[attempt]`
/// between attempts, as long as `is_retryable` holds for the returned error.
/// Returns the last error once the schedule is exhausted.
pub async fn retry_with_backoff<T, E, F, Fut>(
    backoff: &[Duration],
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= backoff.len() || !is_retryable(&err) {
                    return Err(err);
                }
                warn!(attempt, "retrying after transient error");
                tokio::time::sleep(backoff[attempt]).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retries_until_success_within_schedule() {
        let calls = AtomicUsize::new(0);
        let result: Result<&str, &str> = retry_with_backoff(
            &[Duration::from_millis(1), Duration::from_millis(1)],
            |_: &&str| true,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("transient") } else { Ok("ok") } }
            },
        )
        .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_immediately_on_non_retryable_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<&str, &str> = retry_with_backoff(
            &[Duration::from_millis(1)],
            |_: &&str| false,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
        )
        .await;
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_schedule_and_returns_last_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<&str, &str> = retry_with_backoff(
            &[Duration::from_millis(1), Duration::from_millis(1)],
            |_: &&str| true,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("still transient") }
            },
        )
        .await;
        assert_eq!(result, Err("still transient"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
