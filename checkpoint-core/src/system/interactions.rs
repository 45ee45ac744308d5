//! Non-bonded interaction table.
//!
//! Parameters are stored per unordered pair of particle types; `(a, b)` and
//! `(b, a)` address the same entry.

use crate::{CheckpointError, Result};
use serde::{Deserialize, Serialize};

/// Lennard-Jones parameters of one type pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LennardJones {
    pub epsilon: f64,
    pub sigma: f64,
    pub cutoff: f64,
    #[serde(default)]
    pub shift: f64,
    #[serde(default)]
    pub offset: f64,
}

impl LennardJones {
    pub fn new(epsilon: f64, sigma: f64, cutoff: f64) -> Self {
        Self {
            epsilon,
            sigma,
            cutoff,
            shift: 0.0,
            offset: 0.0,
        }
    }

    /// Shift the potential so it is zero at the cutoff
    pub fn with_auto_shift(mut self) -> Self {
        let sr6 = (self.sigma / self.cutoff).powi(6);
        self.shift = -4.0 * self.epsilon * (sr6 * sr6 - sr6);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let values = [self.epsilon, self.sigma, self.cutoff, self.shift, self.offset];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CheckpointError::validation(format!(
                "Lennard-Jones parameters must be finite, got {values:?}"
            )));
        }
        if self.epsilon < 0.0 || self.sigma < 0.0 || self.cutoff < 0.0 {
            return Err(CheckpointError::validation(
                "Lennard-Jones epsilon, sigma and cutoff must be non-negative",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairInteraction {
    pub type_a: u32,
    pub type_b: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lennard_jones: Option<LennardJones>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NonBondedInteractions {
    pairs: Vec<PairInteraction>,
}

fn ordered(a: u32, b: u32) -> (u32, u32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl NonBondedInteractions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_lennard_jones(&mut self, a: u32, b: u32, params: LennardJones) -> Result<()> {
        params.validate()?;
        self.pair_mut(a, b).lennard_jones = Some(params);
        Ok(())
    }

    pub fn lennard_jones(&self, a: u32, b: u32) -> Option<&LennardJones> {
        self.pair(a, b)?.lennard_jones.as_ref()
    }

    pub fn pair(&self, a: u32, b: u32) -> Option<&PairInteraction> {
        let (a, b) = ordered(a, b);
        self.pairs.iter().find(|p| p.type_a == a && p.type_b == b)
    }

    fn pair_mut(&mut self, a: u32, b: u32) -> &mut PairInteraction {
        let (a, b) = ordered(a, b);
        let at = match self
            .pairs
            .binary_search_by_key(&(a, b), |p| (p.type_a, p.type_b))
        {
            Ok(at) => at,
            Err(at) => {
                self.pairs.insert(
                    at,
                    PairInteraction {
                        type_a: a,
                        type_b: b,
                        lennard_jones: None,
                    },
                );
                at
            }
        };
        &mut self.pairs[at]
    }

    pub fn validate(&self) -> Result<()> {
        for pair in &self.pairs {
            if let Some(lj) = &pair.lennard_jones {
                lj.validate().map_err(|e| match e {
                    CheckpointError::Validation(msg) => CheckpointError::validation(format!(
                        "pair ({}, {}): {msg}",
                        pair.type_a, pair.type_b
                    )),
                    other => other,
                })?;
            }
        }
        Ok(())
    }

    /// Largest interaction range over all pairs
    pub fn max_cutoff(&self) -> f64 {
        self.pairs
            .iter()
            .filter_map(|p| p.lennard_jones.as_ref())
            .map(|lj| lj.cutoff)
            .fold(0.0, f64::max)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PairInteraction> {
        self.pairs.iter()
    }
}
