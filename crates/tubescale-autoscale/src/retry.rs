//! Bounded retry with error classification.
//!
//! [`retry_when`] re-runs an attempt only while the failure is classified
//! as retryable, sleeping between attempts per a [`Backoff`]. Any other
//! failure, or running out of steps, returns the last error as-is.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Retry schedule.
///
/// The default matches the Kubernetes client convention for conflict
/// retries: five attempts, 10ms apart, with up to 10% jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Maximum number of attempts, including the first.
    pub steps: u32,
    /// Delay before the second attempt.
    pub initial: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub factor: f64,
    /// Extra random delay, as a fraction of the base delay.
    pub jitter: f64,
    /// Upper bound for the base delay.
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            steps: 5,
            initial: Duration::from_millis(10),
            factor: 1.0,
            jitter: 0.1,
            cap: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Base delay after the given (zero-based) failed attempt, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.factor.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.initial.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.cap.as_secs_f64() {
            return self.cap;
        }
        Duration::from_secs_f64(secs)
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        base + base.mul_f64(rand::random::<f64>() * self.jitter)
    }
}

/// Run `attempt` until it succeeds, fails with an error `retryable`
/// rejects, or `backoff.steps` attempts have been made.
///
/// `attempt` receives the zero-based attempt number.
pub async fn retry_when<T, E, F, Fut, P>(
    backoff: &Backoff,
    retryable: P,
    mut attempt: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let steps = backoff.steps.max(1);
    let mut n = 0;
    loop {
        match attempt(n).await {
            Ok(value) => return Ok(value),
            Err(e) if retryable(&e) && n + 1 < steps => {
                let delay = backoff.delay(n);
                debug!(
                    attempt = n + 1,
                    steps,
                    delay_ms = delay.as_millis() as u64,
                    "retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                n += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
