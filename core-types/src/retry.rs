// Copyright (c) James Kassemi, SC, US. All rights reserved.
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Jittered exponential backoff shared by the blob store client and the
/// ledger's compare-and-retry loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    /// Out-of-range inputs are clamped: at least one attempt, a 1ms floor,
    /// `max_delay_ms >= base_delay_ms`, jitter within `0.0..=1.0`.
    pub fn new(
        max_attempts: usize,
        base_delay_ms: u64,
        max_delay_ms: u64,
        jitter_pct: f64,
    ) -> Self {
        let base_delay_ms = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    /// Blob store calls: few attempts, slow backoff.
    pub fn default_network() -> Self {
        Self::new(5, 250, 5_000, 0.25)
    }

    /// Snapshot contention: short waits, wide jitter so racing writers spread out.
    pub fn default_contention() -> Self {
        Self::new(5, 50, 1_000, 0.5)
    }

    /// Delay to wait after the `retry`-th failure (zero-based).
    pub fn next_delay(&self, retry: usize) -> Duration {
        let factor = 1_u64.checked_shl(retry as u32).unwrap_or(u64::MAX);
        let capped = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        let spread = (capped as f64 * self.jitter_pct) as i64;
        if spread == 0 {
            return Duration::from_millis(capped);
        }
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis(capped.saturating_add_signed(offset))
    }

    /// Calls `op` with the zero-based attempt number until it succeeds, the
    /// error is one `should_retry` rejects, or the attempts run out. The last
    /// error is returned as-is.
    pub async fn retry_async_if<F, Fut, T, E, P>(&self, mut op: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if attempt + 1 >= self.max_attempts || !should_retry(&err) {
                return Err(err);
            }
            sleep(self.next_delay(attempt)).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_network()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn new_clamps_input_parameters() {
        let policy = RetryPolicy::new(0, 0, 0, 2.0);
        assert_eq!(policy, RetryPolicy::new(1, 1, 1, 1.0));
        assert_eq!(RetryPolicy::new(3, 200, 50, -1.0).max_delay_ms, 200);
    }

    #[test]
    fn delay_doubles_up_to_the_cap() {
        let policy = RetryPolicy::new(8, 100, 500, 0.0);
        let delays: Vec<u128> = (0..5).map(|n| policy.next_delay(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
        assert_eq!(policy.next_delay(200), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_spread() {
        let policy = RetryPolicy::new(5, 100, 100, 0.5);
        for _ in 0..64 {
            let delay = policy.next_delay(0).as_millis();
            assert!((50..=150).contains(&delay), "{delay}ms out of range");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_accepted_errors_until_success() {
        let policy = RetryPolicy::new(3, 10, 10, 0.0);
        let calls = Cell::new(0);
        let result: Result<&str, &str> = policy
            .retry_async_if(
                |attempt| {
                    calls.set(calls.get() + 1);
                    async move { if attempt < 2 { Err("busy") } else { Ok("done") } }
                },
                |_| true,
            )
            .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_back_the_last_error_when_attempts_run_out() {
        let policy = RetryPolicy::new(2, 5, 5, 0.0);
        let calls = Cell::new(0);
        let result: Result<(), String> = policy
            .retry_async_if(
                |attempt| {
                    calls.set(calls.get() + 1);
                    async move { Err(format!("failure {attempt}")) }
                },
                |_| true,
            )
            .await;
        assert_eq!(result, Err("failure 1".to_string()));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_errors_are_not_retried() {
        let policy = RetryPolicy::new(5, 5, 5, 0.0);
        let calls = Cell::new(0);
        let result: Result<(), &str> = policy
            .retry_async_if(
                |attempt| {
                    calls.set(calls.get() + 1);
                    async move { Err(if attempt == 0 { "timeout" } else { "denied" }) }
                },
                |err| *err == "timeout",
            )
            .await;
        assert_eq!(result, Err("denied"));
        assert_eq!(calls.get(), 2);
    }
}
