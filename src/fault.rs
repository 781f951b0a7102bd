//! Probabilistic send-side fault injector (§2 "test hook"). Not used by
//! the production binaries; wired in by tests that want to exercise the
//! ARQ strategies' loss-recovery behavior (§8 scenario 2).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Drops outbound datagrams with a fixed, independent probability.
pub struct FaultInjector {
    drop_probability: f64,
    rng: Mutex<StdRng>,
}

impl FaultInjector {
    /// `drop_probability` must be in `[0.0, 1.0)`; `1.0` would never make
    /// progress and is rejected.
    pub fn new(drop_probability: f64) -> Self {
        assert!(
            (0.0..1.0).contains(&drop_probability),
            "drop_probability must be in [0.0, 1.0)"
        );
        Self {
            drop_probability,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// A no-op injector that never drops, for production use.
    pub fn never() -> Self {
        Self::new(0.0)
    }

    /// Returns `true` if this send should be dropped.
    pub fn should_drop(&self) -> bool {
        if self.drop_probability == 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().expect("fault injector rng lock poisoned");
        rng.gen_bool(self.drop_probability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_probability_never_drops() {
        let injector = FaultInjector::never();
        for _ in 0..1000 {
            assert!(!injector.should_drop());
        }
    }

    #[test]
    fn near_certain_probability_mostly_drops() {
        let injector = FaultInjector::new(0.999);
        let drops = (0..1000).filter(|_| injector.should_drop()).count();
        assert!(drops > 900);
    }
}
