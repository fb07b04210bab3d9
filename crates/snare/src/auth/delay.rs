//! Randomized wait before each password rejection.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use rand_pcg::Pcg64;

/// Default lower bound of the rejection delay.
pub const DEFAULT_MIN_DELAY_MS: u64 = 200;

/// Default width of the random range added on top of the minimum.
pub const DEFAULT_JITTER_MS: u64 = 300;

const PCG_STREAM: u128 = 0x0a02_bdbf_7bb3_c0a7;

/// Draws delays uniformly from `[min, min + jitter]` in whole milliseconds.
///
/// Each instance owns its generator, so two delays built with the same seed
/// yield the same sequence.
pub struct RejectionDelay {
    min: Duration,
    jitter: Duration,
    rng: Mutex<Pcg64>,
}

impl RejectionDelay {
    /// Creates a delay seeded from the thread-local entropy source.
    pub fn new(min: Duration, jitter: Duration) -> Self {
        Self::with_seed(min, jitter, rand::random())
    }

    /// Creates a delay with a fixed seed.
    pub fn with_seed(min: Duration, jitter: Duration, seed: u64) -> Self {
        Self {
            min,
            jitter,
            rng: Mutex::new(Pcg64::new(seed.into(), PCG_STREAM)),
        }
    }

    /// Creates a delay from millisecond bounds.
    pub fn from_millis(min_ms: u64, jitter_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(min_ms),
            Duration::from_millis(jitter_ms),
        )
    }

    /// Lower bound.
    pub fn min(&self) -> Duration {
        self.min
    }

    /// Width of the random range.
    pub fn jitter(&self) -> Duration {
        self.jitter
    }

    /// Upper bound (inclusive).
    pub fn max(&self) -> Duration {
        self.min.saturating_add(self.jitter)
    }

    /// Draws the next delay.
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return self.min;
        }
        let extra = self.rng.lock().random_range(0..=jitter_ms);
        self.min.saturating_add(Duration::from_millis(extra))
    }

    /// Draws a delay and sleeps for it. Returns the slept duration.
    pub async fn wait(&self) -> Duration {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay
    }
}

impl Default for RejectionDelay {
    fn default() -> Self {
        Self::from_millis(DEFAULT_MIN_DELAY_MS, DEFAULT_JITTER_MS)
    }
}

impl fmt::Debug for RejectionDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RejectionDelay")
            .field("min", &self.min)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}
