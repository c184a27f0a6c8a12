//! Jitter applied to the burst drain period.
//!
//! Several schedulers sharing one quota all wake up to drain their queues. Offsetting each
//! drain period by a random amount keeps one scheduler from always winning the race for the
//! freshly reset allowance.
//!
//! - `None`: deterministic drain periods, for tests.
//! - `Full`: uniform in `[0, window)`, the default.
//!
//! RNG: uses `rand`'s thread-local RNG by default; deterministic RNGs can be injected via
//! `apply_with_rng`.

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy for randomizing drain periods
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Jitter {
    /// No jitter: the offset is always zero
    None,
    /// Full jitter: random offset in `[0, window)`
    #[default]
    Full,
}

impl Jitter {
    /// Create a full jitter strategy
    pub fn full() -> Self {
        Jitter::Full
    }

    /// Draw an offset within `window`.
    pub fn apply(&self, window: Duration) -> Duration {
        let mut rng = rng();
        self.apply_internal(window, &mut rng)
    }

    /// Draw an offset with a custom RNG (for testing)
    pub fn apply_with_rng<R: Rng>(&self, window: Duration, rng: &mut R) -> Duration {
        self.apply_internal(window, rng)
    }

    fn as_millis_saturated(duration: Duration) -> u64 {
        duration.as_millis().try_into().unwrap_or(u64::MAX)
    }

    fn apply_internal<R: Rng>(&self, window: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => Duration::ZERO,
            Jitter::Full => {
                let millis = Self::as_millis_saturated(window);
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(0..millis))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_jitter_adds_nothing() {
        assert_eq!(Jitter::None.apply(Duration::from_millis(100)), Duration::ZERO);
    }

    #[test]
    fn full_jitter_stays_below_window() {
        let jitter = Jitter::full();
        let window = Duration::from_millis(100);
        for _ in 0..200 {
            assert!(jitter.apply(window) < window);
        }
    }

    #[test]
    fn full_jitter_is_reproducible_with_seeded_rng() {
        let window = Duration::from_millis(100);
        let first = Jitter::Full.apply_with_rng(window, &mut StdRng::seed_from_u64(7));
        let second = Jitter::Full.apply_with_rng(window, &mut StdRng::seed_from_u64(7));
        assert_eq!(first, second);
    }

    #[test]
    fn zero_window_yields_zero() {
        assert_eq!(Jitter::Full.apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn default_is_full() {
        assert_eq!(Jitter::default(), Jitter::Full);
    }
}
