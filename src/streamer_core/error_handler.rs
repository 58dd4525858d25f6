use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

/// Capped exponential backoff with jitter.
///
/// The backoff never gives up; callers stop it through the shutdown signal.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max.max(initial),
            current_attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.current_attempt
    }

    /// Upper bound of the delay for the current attempt (before jitter)
    pub fn base_delay(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.current_attempt.min(16));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Delay for the current attempt: the base delay scaled into [50%, 100%]
    pub fn next_delay(&self) -> Duration {
        let base = self.base_delay();
        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        base.mul_f64(jitter)
    }

    /// Sleep for the next delay. Returns `false` when shutdown was requested
    /// while waiting.
    pub async fn sleep(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let delay = self.next_delay();

        log::warn!(
            "⏳ Retry attempt {} in {}ms",
            self.current_attempt + 1,
            delay.as_millis()
        );

        self.current_attempt = self.current_attempt.saturating_add(1);

        if *shutdown.borrow() {
            return false;
        }

        tokio::select! {
            _ = sleep(delay) => true,
            _ = shutdown.changed() => false,
        }
    }
}
