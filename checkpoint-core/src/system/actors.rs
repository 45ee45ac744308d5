//! Interaction components ("actors") and the active-actor set.
//!
//! Actors never hold a reference to the context that owns them. Anything an
//! actor derives from the global parameters is recomputed in [`Actor::bind`],
//! which the context calls when the actor is added and the restoration driver
//! calls again once the restored parameters are in place.

use super::SystemParams;
use crate::{CheckpointError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;

/// Object-safe part of an interaction component
pub trait Actor: Any + Send + fmt::Debug {
    /// Stable tag used to pick the actor adapter on restore
    fn type_tag(&self) -> &'static str;

    /// Current parameter set
    fn params(&self) -> Result<Value>;

    /// Recompute everything derived from the global parameters
    fn bind(&mut self, params: &SystemParams) -> Result<()>;

    fn is_bound(&self) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Constructible actor type, registered in an [`AdapterSet`](crate::AdapterSet)
pub trait ActorKind: Actor + Sized {
    const TYPE_TAG: &'static str;

    /// Rebuild an unbound actor from [`Actor::params`] output
    fn from_params(params: Value) -> Result<Self>;
}

/// Non-owning reference to an actor slot, safe to keep in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorHandle {
    pub slot: usize,
    pub type_tag: String,
}

/// Active actors by stable slot
///
/// Removing an actor leaves its slot empty so the slots of all other actors,
/// and every handle pointing at them, stay valid.
#[derive(Debug, Default)]
pub struct ActorSet {
    slots: Vec<Option<Box<dyn Actor>>>,
}

impl ActorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_slots(slots: Vec<Option<Box<dyn Actor>>>) -> Self {
        Self { slots }
    }

    pub(crate) fn push(&mut self, actor: Box<dyn Actor>) -> ActorHandle {
        let handle = ActorHandle {
            slot: self.slots.len(),
            type_tag: actor.type_tag().to_string(),
        };
        self.slots.push(Some(actor));
        handle
    }

    /// Deactivate the actor behind `handle`
    pub fn remove(&mut self, handle: &ActorHandle) -> Result<Box<dyn Actor>> {
        self.slots
            .get_mut(handle.slot)
            .and_then(Option::take)
            .ok_or_else(|| CheckpointError::not_found(format!("actor slot {}", handle.slot)))
    }

    pub fn get(&self, handle: &ActorHandle) -> Option<&dyn Actor> {
        let actor = self.slots.get(handle.slot)?.as_deref()?;
        (actor.type_tag() == handle.type_tag).then_some(actor)
    }

    pub fn get_as<A: Actor>(&self, handle: &ActorHandle) -> Option<&A> {
        self.get(handle)?.as_any().downcast_ref::<A>()
    }

    pub fn get_as_mut<A: Actor>(&mut self, handle: &ActorHandle) -> Option<&mut A> {
        let actor = self.slots.get_mut(handle.slot)?.as_deref_mut()?;
        if actor.type_tag() != handle.type_tag {
            return None;
        }
        actor.as_any_mut().downcast_mut::<A>()
    }

    /// First active actor of type `A`
    pub fn find<A: Actor>(&self) -> Option<(ActorHandle, &A)> {
        self.iter().find_map(|(handle, actor)| {
            actor.as_any().downcast_ref::<A>().map(|a| (handle, a))
        })
    }

    /// Active actors in slot order
    pub fn iter(&self) -> impl Iterator<Item = (ActorHandle, &dyn Actor)> {
        self.slots.iter().enumerate().filter_map(|(slot, actor)| {
            actor.as_deref().map(|a| {
                (
                    ActorHandle {
                        slot,
                        type_tag: a.type_tag().to_string(),
                    },
                    a,
                )
            })
        })
    }

    pub(crate) fn slots(&self) -> &[Option<Box<dyn Actor>>] {
        &self.slots
    }

    pub(crate) fn rebind(&mut self, params: &SystemParams) -> Result<()> {
        for actor in self.slots.iter_mut().flatten() {
            actor.bind(params)?;
        }
        Ok(())
    }

    /// Number of active actors
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mesh-based long-range electrostatics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct P3m {
    pub prefactor: f64,
    pub accuracy: f64,
    pub mesh: [u32; 3],
    pub cao: u32,
    pub r_cut: f64,
    pub alpha: f64,
    #[serde(skip)]
    mesh_spacing: Option<[f64; 3]>,
}

impl P3m {
    pub fn new(prefactor: f64, accuracy: f64, mesh: [u32; 3], cao: u32, r_cut: f64, alpha: f64) -> Self {
        Self {
            prefactor,
            accuracy,
            mesh,
            cao,
            r_cut,
            alpha,
            mesh_spacing: None,
        }
    }

    /// Mesh spacing derived from the box it is bound to
    pub fn mesh_spacing(&self) -> Option<[f64; 3]> {
        self.mesh_spacing
    }
}

impl Actor for P3m {
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn params(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn bind(&mut self, params: &SystemParams) -> Result<()> {
        let values = [self.prefactor, self.accuracy, self.r_cut, self.alpha];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CheckpointError::validation(format!(
                "P3M parameters must be finite, got {values:?}"
            )));
        }
        if self.mesh.iter().any(|&m| m == 0) || !(1..=7).contains(&self.cao) {
            return Err(CheckpointError::validation(
                "P3M mesh must be non-zero and cao between 1 and 7",
            ));
        }
        let min_box = params.box_l.iter().copied().fold(f64::INFINITY, f64::min);
        if self.r_cut <= 0.0 || self.r_cut > 0.5 * min_box {
            return Err(CheckpointError::validation(format!(
                "P3M r_cut {} must be in (0, {}]",
                self.r_cut,
                0.5 * min_box
            )));
        }
        let mut spacing = [0.0; 3];
        for (dim, h) in spacing.iter_mut().enumerate() {
            *h = params.box_l[dim] / f64::from(self.mesh[dim]);
        }
        self.mesh_spacing = Some(spacing);
        Ok(())
    }

    fn is_bound(&self) -> bool {
        self.mesh_spacing.is_some()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl ActorKind for P3m {
    const TYPE_TAG: &'static str = "p3m";

    fn from_params(params: Value) -> Result<Self> {
        serde_json::from_value(params)
            .map_err(|e| CheckpointError::corrupt(format!("invalid p3m parameters: {e}")))
    }
}

/// Screened Coulomb interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebyeHueckel {
    pub prefactor: f64,
    pub kappa: f64,
    pub r_cut: f64,
    #[serde(skip)]
    bound: bool,
}

impl DebyeHueckel {
    pub fn new(prefactor: f64, kappa: f64, r_cut: f64) -> Self {
        Self {
            prefactor,
            kappa,
            r_cut,
            bound: false,
        }
    }
}

impl Actor for DebyeHueckel {
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn params(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn bind(&mut self, params: &SystemParams) -> Result<()> {
        if ![self.prefactor, self.kappa, self.r_cut].iter().all(|v| v.is_finite()) {
            return Err(CheckpointError::validation(
                "Debye-Hueckel parameters must be finite",
            ));
        }
        let min_box = params.box_l.iter().copied().fold(f64::INFINITY, f64::min);
        if self.kappa < 0.0 || self.r_cut > 0.5 * min_box {
            return Err(CheckpointError::validation(
                "Debye-Hueckel needs kappa >= 0 and r_cut within half the box",
            ));
        }
        self.bound = true;
        Ok(())
    }

    fn is_bound(&self) -> bool {
        self.bound
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl ActorKind for DebyeHueckel {
    const TYPE_TAG: &'static str = "debye_hueckel";

    fn from_params(params: Value) -> Result<Self> {
        serde_json::from_value(params)
            .map_err(|e| CheckpointError::corrupt(format!("invalid debye_hueckel parameters: {e}")))
    }
}
