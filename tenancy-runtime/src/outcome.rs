//! Success/failure decision for a provisioning run

use rand::Rng;

/// Decides whether a provisioning run succeeds
pub trait OutcomeSource: Send + Sync {
    fn succeeded(&self) -> bool;
}

/// Random outcome with a fixed success probability
#[derive(Debug, Clone)]
pub struct RandomOutcome {
    success_probability: f64,
}

impl RandomOutcome {
    /// Probabilities outside `0.0..=1.0` are clamped; NaN falls back to 0.5.
    pub fn new(success_probability: f64) -> Self {
        let success_probability = if success_probability.is_nan() {
            0.5
        } else {
            success_probability.clamp(0.0, 1.0)
        };
        Self {
            success_probability,
        }
    }

    pub fn success_probability(&self) -> f64 {
        self.success_probability
    }
}

impl Default for RandomOutcome {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl OutcomeSource for RandomOutcome {
    fn succeeded(&self) -> bool {
        rand::thread_rng().gen_bool(self.success_probability)
    }
}

/// Always the same outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedOutcome {
    Success,
    Failure,
}

impl OutcomeSource for FixedOutcome {
    fn succeeded(&self) -> bool {
        matches!(self, FixedOutcome::Success)
    }
}
