use log::warn;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Backoff between `listen` attempts of a live session
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            max_attempts: None,
        }
    }

    pub fn exponential(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Whether a failure numbered `attempt` (1-based) may be retried
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

/// Run `operation` until it succeeds, the policy gives up, or `stop` fires.
///
/// Returns the number of failed attempts on success or stop, or the last error
/// once the attempt cap is reached.
pub async fn run_with_reconnect<F, Fut, E>(
    policy: &ReconnectPolicy,
    stop: &mut watch::Receiver<bool>,
    label: &str,
    mut operation: F,
) -> Result<u32, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let mut failures = 0u32;
    loop {
        if *stop.borrow() {
            return Ok(failures);
        }

        let error = match operation().await {
            Ok(()) => return Ok(failures),
            Err(e) => e,
        };
        failures += 1;
        if !policy.allows(failures) {
            return Err(error);
        }

        let delay = policy.delay_for(failures);
        warn!(
            "{} failed (attempt {}): {}, reconnecting in {:?}",
            label, failures, error, delay
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    return Ok(failures);
                }
            }
        }
    }
}
