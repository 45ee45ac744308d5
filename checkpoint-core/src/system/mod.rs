/*!
The simulation context: the single global state object a checkpoint captures.

The context owns the global parameters, per-rank random streams, particles,
non-bonded interaction table, thermostat and the active actors. It never owns
registry entries; entries refer back into it through [`ActorHandle`]s.

[`SimulationContext::integrate`] is a small stochastic stepper, just enough to
make resumption observable. It is not a physics integrator.
*/

pub mod actors;
pub mod interactions;
pub mod particles;
pub mod random;
pub mod thermostat;

pub use actors::{Actor, ActorHandle, ActorKind, ActorSet, DebyeHueckel, P3m};
pub use interactions::{LennardJones, NonBondedInteractions, PairInteraction};
pub use particles::{Particle, ParticleSet};
pub use random::RandomState;
pub use thermostat::Thermostat;

use crate::representation::Representation;
use crate::{CheckpointError, Result};
use serde::{Deserialize, Serialize};

/// Type tag of the context representation in a snapshot
pub const CONTEXT_TAG: &str = "simulation_context";

/// Global scalar parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemParams {
    pub box_l: [f64; 3],
    pub periodicity: [bool; 3],
    pub time: f64,
    pub time_step: f64,
    pub skin: f64,
    pub n_ranks: usize,
}

impl Default for SystemParams {
    fn default() -> Self {
        Self {
            box_l: [10.0; 3],
            periodicity: [true; 3],
            time: 0.0,
            time_step: 0.01,
            skin: 0.4,
            n_ranks: 1,
        }
    }
}

impl SystemParams {
    pub fn validate(&self) -> Result<()> {
        if self.box_l.iter().any(|&l| !(l.is_finite() && l > 0.0)) {
            return Err(CheckpointError::validation(format!(
                "box lengths must be positive, got {:?}",
                self.box_l
            )));
        }
        if !(self.time_step.is_finite() && self.time_step > 0.0) {
            return Err(CheckpointError::validation("time step must be positive"));
        }
        if !self.time.is_finite() || !(self.skin.is_finite() && self.skin >= 0.0) {
            return Err(CheckpointError::validation("time must be finite and skin non-negative"));
        }
        if self.n_ranks == 0 {
            return Err(CheckpointError::validation("at least one rank is required"));
        }
        Ok(())
    }
}

/// Live simulation state
#[derive(Debug)]
pub struct SimulationContext {
    params: SystemParams,
    pub random: RandomState,
    pub particles: ParticleSet,
    pub non_bonded: NonBondedInteractions,
    pub thermostat: Thermostat,
    actors: ActorSet,
}

impl SimulationContext {
    /// Empty context with one random stream per rank derived from `master_seed`
    pub fn new(params: SystemParams, master_seed: u64) -> Result<Self> {
        params.validate()?;
        let random = RandomState::new(master_seed, params.n_ranks);
        Ok(Self {
            params,
            random,
            particles: ParticleSet::new(),
            non_bonded: NonBondedInteractions::new(),
            thermostat: Thermostat::Off,
            actors: ActorSet::new(),
        })
    }

    pub fn params(&self) -> &SystemParams {
        &self.params
    }

    /// Replace the global parameters and rebind every active actor
    ///
    /// Nothing changes if the parameters are invalid or an actor refuses them.
    pub fn set_params(&mut self, params: SystemParams) -> Result<()> {
        params.validate()?;
        if params.n_ranks != self.params.n_ranks {
            return Err(CheckpointError::validation(
                "the number of ranks is fixed for the lifetime of a context",
            ));
        }
        if let Err(e) = self.actors.rebind(&params) {
            self.actors.rebind(&self.params)?;
            return Err(e);
        }
        self.params = params;
        Ok(())
    }

    pub fn time(&self) -> f64 {
        self.params.time
    }

    pub fn n_ranks(&self) -> usize {
        self.params.n_ranks
    }

    /// Bind `actor` to the current parameters and activate it
    pub fn add_actor<A: Actor>(&mut self, mut actor: A) -> Result<ActorHandle> {
        actor.bind(&self.params)?;
        let handle = self.actors.push(Box::new(actor));
        tracing::debug!(slot = handle.slot, tag = %handle.type_tag, "actor activated");
        Ok(handle)
    }

    pub fn remove_actor(&mut self, handle: &ActorHandle) -> Result<Box<dyn Actor>> {
        self.actors.remove(handle)
    }

    pub fn actors(&self) -> &ActorSet {
        &self.actors
    }

    pub fn actors_mut(&mut self) -> &mut ActorSet {
        &mut self.actors
    }

    /// Advance `steps` time steps
    ///
    /// Every particle draws noise from the stream of the rank that owns it
    /// (`id % n_ranks`), in id order.
    pub fn integrate(&mut self, steps: u64) {
        let dt = self.params.time_step;
        let n_ranks = self.params.n_ranks as u64;
        for _ in 0..steps {
            for particle in self.particles.iter_mut() {
                let rank = (particle.id % n_ranks) as usize;
                for dim in 0..3 {
                    match self.thermostat {
                        Thermostat::Off => {}
                        Thermostat::Langevin { kt, gamma } => {
                            let noise = self.random.noise(rank);
                            let force = -gamma * particle.v[dim]
                                + (2.0 * gamma * kt / dt).sqrt() * noise;
                            particle.f[dim] = force;
                            particle.v[dim] += force / particle.mass * dt;
                        }
                        Thermostat::Brownian { kt, gamma } => {
                            let noise = self.random.noise(rank);
                            if gamma > 0.0 {
                                particle.pos[dim] += (2.0 * kt * dt / gamma).sqrt() * noise;
                            }
                        }
                    }
                    particle.pos[dim] += particle.v[dim] * dt;
                    if self.params.periodicity[dim] {
                        particle.pos[dim] = particle.pos[dim].rem_euclid(self.params.box_l[dim]);
                    }
                }
            }
            self.params.time += dt;
        }
    }

    /// Serializable state of everything but the actors' live form
    pub(crate) fn capture_state(&self) -> Result<ContextState> {
        let mut actors = Vec::with_capacity(self.actors.slots().len());
        for slot in self.actors.slots() {
            actors.push(match slot {
                Some(actor) => Some(Representation::new(actor.type_tag(), actor.params()?)),
                None => None,
            });
        }
        Ok(ContextState {
            params: self.params.clone(),
            random: self.random.clone(),
            particles: self.particles.clone(),
            non_bonded: self.non_bonded.clone(),
            thermostat: self.thermostat.clone(),
            actors,
        })
    }

    /// Assemble a context from restored parts; actors must already be bound
    pub(crate) fn from_restored(state: ContextState, actors: ActorSet) -> Self {
        Self {
            params: state.params,
            random: state.random,
            particles: state.particles,
            non_bonded: state.non_bonded,
            thermostat: state.thermostat,
            actors,
        }
    }
}

/// Wire form of the context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ContextState {
    pub params: SystemParams,
    pub random: RandomState,
    pub particles: ParticleSet,
    pub non_bonded: NonBondedInteractions,
    pub thermostat: Thermostat,
    /// Actor parameters by slot; `None` marks a removed actor
    pub actors: Vec<Option<Representation>>,
}

impl ContextState {
    pub fn validate(&self) -> Result<()> {
        self.params
            .validate()
            .map_err(|e| CheckpointError::corrupt(format!("context parameters: {e}")))?;
        if self.random.n_ranks() != self.params.n_ranks {
            return Err(CheckpointError::corrupt(format!(
                "{} random streams for {} ranks",
                self.random.n_ranks(),
                self.params.n_ranks
            )));
        }
        self.particles.validate()
    }

    /// Reject state that would not survive the trip through a snapshot
    pub fn check_representable(&self) -> Result<()> {
        self.params.validate()?;
        self.thermostat.validate()?;
        self.non_bonded.validate()?;
        self.particles.check_finite()
    }
}
