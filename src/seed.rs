// src/seed.rs
//
// Seed generators for simulation iterations.
//
// The seed only controls testbench randomisation (bus delays, interrupts).
// Whatever the generator, the seed for a given iteration index must be the
// same every time it is asked for, so a regression can be re-run exactly.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Produces the seed for iteration `index`.
pub trait SeedGen {
    fn gen(&self, index: u32) -> u32;
}

/// Same seed for every iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedSeed(pub u32);

impl SeedGen for FixedSeed {
    fn gen(&self, _index: u32) -> u32 {
        self.0
    }
}

/// `start + index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartSeed(pub u32);

impl SeedGen for StartSeed {
    fn gen(&self, index: u32) -> u32 {
        self.0.wrapping_add(index)
    }
}

/// Pseudo-random 31-bit seeds, one ChaCha stream per iteration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomSeed {
    pub base: u64,
}

impl RandomSeed {
    pub fn new(base: u64) -> Self {
        Self { base }
    }
}

impl SeedGen for RandomSeed {
    fn gen(&self, index: u32) -> u32 {
        let mut rng = ChaCha8Rng::seed_from_u64(self.base);
        rng.set_stream(u64::from(index));
        rng.next_u32() >> 1
    }
}
