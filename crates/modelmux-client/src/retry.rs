use modelmux_core::{LlmError, LlmResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Bounded retry with exponential backoff.
///
/// Up to `retries + 1` attempts run. After failed attempt `i`, if another
/// attempt remains and the error is retryable, the policy waits
/// `base_delay * 2^i`. The error of the last attempt is returned unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retries: u32,
    /// Delay before the second attempt; doubles for every later one.
    #[serde(with = "millis")]
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Whether an error is worth another attempt.
///
/// Credentials, malformed requests and missing capabilities fail the same way
/// every time; everything else (rate limits, provider and transport failures,
/// timeouts) is retried.
pub fn is_retryable(err: &LlmError) -> bool {
    !matches!(
        err,
        LlmError::Auth { .. }
            | LlmError::InvalidRequest(_)
            | LlmError::Unsupported { .. }
            | LlmError::UnknownBackend { .. }
            | LlmError::Config(_)
    )
}

impl RetryPolicy {
    /// Creates a policy.
    pub fn new(retries: u32, base_delay: Duration) -> Self {
        Self {
            retries,
            base_delay,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Total number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Backoff after failed attempt `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Decides what happens after attempt `attempt` failed with `err`:
    /// `Some(delay)` to wait and retry, `None` to give up.
    ///
    /// This is the only retry decision; the async and blocking runners both
    /// go through it.
    pub fn next_delay(&self, attempt: u32, err: &LlmError) -> Option<Duration> {
        if attempt >= self.retries || !is_retryable(err) {
            return None;
        }
        Some(self.delay_for(attempt))
    }

    /// Runs `op` under this policy, sleeping on the tokio timer.
    pub async fn run<T, F, Fut>(&self, op: F) -> LlmResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LlmResult<T>>,
    {
        self.run_with_sleep(op, tokio::time::sleep).await
    }

    /// Runs `op` under this policy with an injectable async sleeper.
    pub async fn run_with_sleep<T, F, Fut, S, SFut>(&self, mut op: F, mut sleep: S) -> LlmResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LlmResult<T>>,
        S: FnMut(Duration) -> SFut,
        SFut: Future<Output = ()>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => match self.next_delay(attempt, &e) {
                    Some(delay) => {
                        info!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Retryable error, backing off"
                        );
                        sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        warn!(attempts = attempt + 1, error = %e, "Giving up");
                        return Err(e);
                    }
                },
            }
        }
    }

    /// Runs `op` under this policy, blocking the calling thread while it
    /// backs off.
    pub fn run_blocking<T, F>(&self, op: F) -> LlmResult<T>
    where
        F: FnMut() -> LlmResult<T>,
    {
        self.run_blocking_with_sleep(op, std::thread::sleep)
    }

    /// Blocking runner with an injectable sleeper.
    pub fn run_blocking_with_sleep<T, F, S>(&self, mut op: F, mut sleep: S) -> LlmResult<T>
    where
        F: FnMut() -> LlmResult<T>,
        S: FnMut(Duration),
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) => match self.next_delay(attempt, &e) {
                    Some(delay) => {
                        info!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Retryable error, backing off"
                        );
                        sleep(delay);
                        attempt += 1;
                    }
                    None => {
                        warn!(attempts = attempt + 1, error = %e, "Giving up");
                        return Err(e);
                    }
                },
            }
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::sync::{Arc, Mutex};

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy::new(retries, Duration::from_millis(100))
    }

    fn server_error(n: u32) -> LlmError {
        LlmError::Provider {
            status: 500,
            body: format!("failure {n}"),
        }
    }

    // ── Backoff schedule ─────────────────────────────────────────────────

    #[test]
    fn backoff_computation() {
        let p = policy(5);
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(400));
        assert_eq!(p.delay_for(3), Duration::from_millis(800));
        assert_eq!(p.max_attempts(), 6);
    }

    #[test]
    fn next_delay_respects_bound_and_kind() {
        let p = policy(2);
        assert!(p.next_delay(0, &server_error(0)).is_some());
        assert!(p.next_delay(1, &server_error(1)).is_some());
        assert!(p.next_delay(2, &server_error(2)).is_none());
        let auth = LlmError::Auth {
            status: Some(401),
            body: String::new(),
        };
        assert!(p.next_delay(0, &auth).is_none());
        assert!(p
            .next_delay(0, &LlmError::RateLimit { body: String::new() })
            .is_some());
    }

    // ── Blocking runner ──────────────────────────────────────────────────

    #[test]
    fn blocking_succeeds_after_k_failures_with_expected_delays() {
        let calls = Cell::new(0u32);
        let slept = RefCell::new(Vec::new());

        let out = policy(3).run_blocking_with_sleep(
            || {
                let n = calls.get();
                calls.set(n + 1);
                if n < 2 {
                    Err(server_error(n))
                } else {
                    Ok("ok")
                }
            },
            |d| slept.borrow_mut().push(d),
        );

        assert_eq!(out.unwrap(), "ok");
        assert_eq!(calls.get(), 3);
        assert_eq!(
            *slept.borrow(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[test]
    fn blocking_returns_last_error() {
        let calls = Cell::new(0u32);
        let out: LlmResult<()> = policy(2).run_blocking_with_sleep(
            || {
                let n = calls.get();
                calls.set(n + 1);
                Err(server_error(n))
            },
            |_| {},
        );
        assert_eq!(out.unwrap_err(), server_error(2));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn auth_error_is_not_retried() {
        let calls = Cell::new(0u32);
        let out: LlmResult<()> = policy(5).run_blocking_with_sleep(
            || {
                calls.set(calls.get() + 1);
                Err(LlmError::Auth {
                    status: Some(401),
                    body: "bad key".into(),
                })
            },
            |_| panic!("must not back off"),
        );
        assert!(matches!(out, Err(LlmError::Auth { .. })));
        assert_eq!(calls.get(), 1);
    }

    // ── Async runner ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn async_matches_blocking_schedule() {
        let calls = Arc::new(Mutex::new(0u32));
        let slept = Arc::new(Mutex::new(Vec::new()));

        let out = policy(3)
            .run_with_sleep(
                || {
                    let calls = calls.clone();
                    async move {
                        let mut n = calls.lock().unwrap();
                        *n += 1;
                        if *n <= 2 {
                            Err(server_error(*n))
                        } else {
                            Ok(*n)
                        }
                    }
                },
                |d| {
                    slept.lock().unwrap().push(d);
                    async {}
                },
            )
            .await;

        assert_eq!(out.unwrap(), 3);
        assert_eq!(
            *slept.lock().unwrap(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn async_sleeps_on_tokio_timer() {
        let start = tokio::time::Instant::now();
        let calls = Arc::new(Mutex::new(0u32));

        let out: LlmResult<()> = policy(2)
            .run(|| {
                let calls = calls.clone();
                async move {
                    let mut n = calls.lock().unwrap();
                    *n += 1;
                    Err(server_error(*n))
                }
            })
            .await;

        assert_eq!(out.unwrap_err(), server_error(3));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "elapsed {elapsed:?}");
    }

    #[test]
    fn policy_serde_uses_millis() {
        let p: RetryPolicy = serde_json::from_str(r#"{"retries":4,"base_delay":250}"#).unwrap();
        assert_eq!(p, RetryPolicy::new(4, Duration::from_millis(250)));
    }
}
