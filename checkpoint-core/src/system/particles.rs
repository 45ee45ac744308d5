//! Particle storage.

use crate::{CheckpointError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub id: u64,
    pub pos: [f64; 3],
    #[serde(default)]
    pub v: [f64; 3],
    #[serde(default)]
    pub f: [f64; 3],
    #[serde(default)]
    pub type_id: u32,
    #[serde(default)]
    pub q: f64,
    #[serde(default = "unit_mass")]
    pub mass: f64,
}

fn unit_mass() -> f64 {
    1.0
}

impl Particle {
    /// Neutral particle of type 0 at rest
    pub fn new(id: u64, pos: [f64; 3]) -> Self {
        Self {
            id,
            pos,
            v: [0.0; 3],
            f: [0.0; 3],
            type_id: 0,
            q: 0.0,
            mass: 1.0,
        }
    }

    pub fn with_type(mut self, type_id: u32) -> Self {
        self.type_id = type_id;
        self
    }

    pub fn with_charge(mut self, q: f64) -> Self {
        self.q = q;
        self
    }

    pub fn with_velocity(mut self, v: [f64; 3]) -> Self {
        self.v = v;
        self
    }
}

/// Particles ordered by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticleSet {
    particles: Vec<Particle>,
}

impl ParticleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, particle: Particle) -> Result<()> {
        match self.particles.binary_search_by_key(&particle.id, |p| p.id) {
            Ok(_) => Err(CheckpointError::validation(format!(
                "particle {} already exists",
                particle.id
            ))),
            Err(at) => {
                if particle.mass <= 0.0 {
                    return Err(CheckpointError::validation(format!(
                        "particle {} must have a positive mass",
                        particle.id
                    )));
                }
                self.particles.insert(at, particle);
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, id: u64) -> Option<Particle> {
        let at = self.particles.binary_search_by_key(&id, |p| p.id).ok()?;
        Some(self.particles.remove(at))
    }

    pub fn get(&self, id: u64) -> Option<&Particle> {
        let at = self.particles.binary_search_by_key(&id, |p| p.id).ok()?;
        self.particles.get(at)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Particle> {
        let at = self.particles.binary_search_by_key(&id, |p| p.id).ok()?;
        self.particles.get_mut(at)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Particle> {
        self.particles.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Particle> {
        self.particles.iter_mut()
    }

    /// Positions of all particles, in id order
    pub fn positions(&self) -> Vec<[f64; 3]> {
        self.particles.iter().map(|p| p.pos).collect()
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Reject particles with NaN or infinite state
    pub fn check_finite(&self) -> Result<()> {
        for particle in &self.particles {
            let finite = particle
                .pos
                .iter()
                .chain(&particle.v)
                .chain(&particle.f)
                .chain([&particle.q, &particle.mass])
                .all(|x| x.is_finite());
            if !finite {
                return Err(CheckpointError::validation(format!(
                    "particle {} has non-finite state",
                    particle.id
                )));
            }
        }
        Ok(())
    }

    /// Re-check ordering and uniqueness after deserialization
    pub(crate) fn validate(&self) -> Result<()> {
        for pair in self.particles.windows(2) {
            if pair[0].id >= pair[1].id {
                return Err(CheckpointError::corrupt(format!(
                    "particle ids out of order or duplicated at id {}",
                    pair[1].id
                )));
            }
        }
        Ok(())
    }
}
