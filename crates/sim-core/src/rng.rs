//! Injectable randomness source.
//!
//! A host-supplied uniform `[0,1)` producer so that selection draws can
//! be seeded deterministically in tests; nothing in the engine calls
//! `rand::random()` directly.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A uniform `[0,1)` producer.
pub trait RngSource: Send + Sync {
    fn next_f64(&mut self) -> f64;
}

/// Default host RNG, seeded from the OS entropy source.
pub struct DefaultRng(StdRng);

impl DefaultRng {
    pub fn new() -> Self {
        Self(StdRng::from_entropy())
    }
}

impl Default for DefaultRng {
    fn default() -> Self {
        Self::new()
    }
}

impl RngSource for DefaultRng {
    fn next_f64(&mut self) -> f64 {
        self.0.gen_range(0.0..1.0)
    }
}

/// A deterministic RNG for tests: cycles through a fixed sequence of
/// draws so scenarios are reproducible.
pub struct SeededRng(StdRng);

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl RngSource for SeededRng {
    fn next_f64(&mut self) -> f64 {
        self.0.gen_range(0.0..1.0)
    }
}

/// A scripted RNG that returns a fixed sequence of draws, repeating the
/// last value once exhausted. Useful for pinning a specific weighted
/// selection outcome in a test.
pub struct ScriptedRng {
    values: Vec<f64>,
    cursor: usize,
}

impl ScriptedRng {
    pub fn new(values: Vec<f64>) -> Self {
        assert!(!values.is_empty(), "ScriptedRng needs at least one value");
        Self { values, cursor: 0 }
    }
}

impl RngSource for ScriptedRng {
    fn next_f64(&mut self) -> f64 {
        let v = self.values[self.cursor.min(self.values.len() - 1)];
        self.cursor += 1;
        v
    }
}
