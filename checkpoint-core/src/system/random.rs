//! Per-rank deterministic random streams.
//!
//! Nothing in the simulation may draw from a platform RNG. Every stochastic
//! part draws from the stream of the rank that owns the particle, and each
//! stream's full generator state is part of the checkpoint, so a resumed run
//! continues the exact sequence an uninterrupted run would have produced.

use crate::{CheckpointError, Result};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

/// Random state of all cooperating ranks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomState {
    seeds: Vec<u64>,
    streams: Vec<Pcg32>,
}

impl RandomState {
    /// Derive one stream per rank from a master seed
    ///
    /// Rank seeds are `master ^ (rank * golden ratio)`, so adding ranks never
    /// changes the streams of existing ones.
    pub fn new(master_seed: u64, n_ranks: usize) -> Self {
        let seeds = (0..n_ranks.max(1) as u64)
            .map(|rank| master_seed ^ rank.wrapping_mul(0x9e37_79b9_7f4a_7c15))
            .collect::<Vec<_>>();
        Self::seeded(seeds)
    }

    /// One explicit seed per rank
    pub fn from_seeds(seeds: Vec<u64>) -> Result<Self> {
        if seeds.is_empty() {
            return Err(CheckpointError::validation("at least one rank seed is required"));
        }
        Ok(Self::seeded(seeds))
    }

    fn seeded(seeds: Vec<u64>) -> Self {
        let streams = seeds.iter().map(|&s| Pcg32::seed_from_u64(s)).collect();
        Self { seeds, streams }
    }

    /// Restart every stream from new seeds, one per rank
    pub fn reseed(&mut self, seeds: &[u64]) -> Result<()> {
        if seeds.len() != self.streams.len() {
            return Err(CheckpointError::validation(format!(
                "expected {} rank seeds, got {}",
                self.streams.len(),
                seeds.len()
            )));
        }
        *self = Self::seeded(seeds.to_vec());
        Ok(())
    }

    pub fn n_ranks(&self) -> usize {
        self.streams.len()
    }

    /// Seeds the streams were last (re)started from
    pub fn seeds(&self) -> &[u64] {
        &self.seeds
    }

    /// Uniform draw in `[0, 1)` from the stream of `rank`
    pub fn uniform(&mut self, rank: usize) -> f64 {
        let n = self.streams.len();
        self.streams[rank % n].gen::<f64>()
    }

    /// Zero-mean, unit-variance draw (uniform, not Gaussian) from `rank`
    pub fn noise(&mut self, rank: usize) -> f64 {
        (self.uniform(rank) - 0.5) * 12f64.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streams_are_reproducible() {
        let mut a = RandomState::new(1234, 2);
        let mut b = RandomState::new(1234, 2);
        for _ in 0..100 {
            assert_eq!(a.uniform(0).to_bits(), b.uniform(0).to_bits());
            assert_eq!(a.uniform(1).to_bits(), b.uniform(1).to_bits());
        }
    }

    #[test]
    fn test_ranks_have_distinct_streams() {
        let mut state = RandomState::new(1234, 2);
        let first: Vec<f64> = (0..8).map(|_| state.uniform(0)).collect();
        let second: Vec<f64> = (0..8).map(|_| state.uniform(1)).collect();
        assert_ne!(first, second);
    }

    #[test]
    fn test_serialized_state_resumes_exactly() {
        let mut original = RandomState::new(42, 1);
        for _ in 0..17 {
            original.uniform(0);
        }

        let json = serde_json::to_value(&original).unwrap();
        let mut restored: RandomState = serde_json::from_value(json).unwrap();
        assert_eq!(restored, original);

        for _ in 0..50 {
            assert_eq!(original.uniform(0).to_bits(), restored.uniform(0).to_bits());
        }
    }

    #[test]
    fn test_reseed_requires_one_seed_per_rank() {
        let mut state = RandomState::new(1, 2);
        assert!(state.reseed(&[7]).is_err());

        state.reseed(&[1234, 1234]).unwrap();
        assert_eq!(state.seeds(), &[1234, 1234]);
        let mut fresh = RandomState::from_seeds(vec![1234, 1234]).unwrap();
        assert_eq!(state.uniform(0).to_bits(), fresh.uniform(0).to_bits());
    }

    #[test]
    fn test_noise_is_centered() {
        let mut state = RandomState::new(9, 1);
        let mean = (0..10_000).map(|_| state.noise(0)).sum::<f64>() / 10_000.0;
        assert!(mean.abs() < 0.05);
    }

    #[test]
    fn test_from_seeds_rejects_empty() {
        assert!(RandomState::from_seeds(Vec::new()).is_err());
    }
}
