use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2,
            jitter: true,
        }
    }
}

/// Exponential wait-between-retries policy. The first delay is the initial
/// delay; each successive one grows by the multiplier up to the cap.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// The next wait duration, advancing the internal attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(31);
        self.attempt = self.attempt.saturating_add(1);

        let raw = self
            .config
            .initial_delay
            .saturating_mul(self.config.multiplier.saturating_pow(exponent));
        let capped = raw.min(self.config.max_delay);

        if self.config.jitter {
            apply_jitter(capped)
        } else {
            capped
        }
    }

    /// Suspends the caller for the next wait duration.
    pub async fn delay_with_backoff(&mut self) {
        sleep(self.next_delay()).await;
    }

    /// The next `delay_with_backoff` starts again from the initial delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let mut rng = rand::rng();
    let jitter_factor = rng.random_range(0.5..1.5);
    Duration::from_millis((delay.as_millis() as f64 * jitter_factor) as u64)
}

/// Attempts budget for hosts that supervise the retry loop externally. The
/// engine itself never drops a batch for exhausting attempts; only poison
/// responses do that.
#[derive(Debug, Clone, Copy)]
pub struct MaxAttemptsPolicy {
    pub max_attempts: u32,
}

impl MaxAttemptsPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}
