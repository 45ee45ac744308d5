/*!
# Checkpoint Core Engine

Checkpoint persistence and restoration for long-running, stateful simulations.

A checkpoint captures the [`SimulationContext`] (global parameters, per-rank
random streams, particles, interactions, thermostat and active actors) together
with every value in a [`Registry`], and later rebuilds an equivalent live state
so the computation loop resumes exactly where it stopped:

- Pluggable storage and compression adapters
- Type-tagged representations with a [`Persist`] adapter per type
- Atomic, integrity-checked snapshots with rich metadata
- Dependency-ordered restoration with non-owning actor handles

## Usage

```rust,no_run
use checkpoint_core::{create_default_checkpoint, Registry, SimulationContext, SystemParams};

let checkpoint = create_default_checkpoint("mycheckpoint", "./checkpoints")?;

let mut context = SimulationContext::new(SystemParams::default(), 1234)?;
let mut registry = Registry::new();
registry.register("myvar", String::from("some script variable"))?;

context.integrate(100);
checkpoint.save(&context, &registry)?;

// Later, possibly in another process
checkpoint.load_into(&mut context, &mut registry)?;
assert_eq!(registry.get::<String>("myvar")?, "some script variable");
# Ok::<(), checkpoint_core::CheckpointError>(())
```
*/

pub mod adapter;
pub mod checkpoint;
pub mod compression;
pub mod config;
pub mod error;
pub mod metadata;
pub mod observability;
pub mod registry;
pub mod representation;
pub mod restore;
pub mod storage;
pub mod store;
pub mod system;


pub use serde_json;

pub use adapter::{AdapterSet, Persist, RestoreScope};
pub use checkpoint::{
    capture, checkpoint_from_config, create_default_checkpoint, store_from_config, Checkpoint,
};
pub use compression::{CompressionAdapter, GzipCompressor, NoCompression};
pub use config::{CheckpointConfig, CompressionKind};
pub use error::{CheckpointError, Result};
pub use metadata::CheckpointMetadata;
pub use registry::{Registry, StoredValue};
pub use representation::{EntryRecord, Representation, Requirements, SnapshotPayload};
pub use storage::{LocalFileStorage, MemoryStorage, StorageAdapter};
pub use store::CheckpointStore;
pub use system::{
    Actor, ActorHandle, ActorKind, ActorSet, DebyeHueckel, LennardJones, NonBondedInteractions,
    P3m, Particle, ParticleSet, RandomState, SimulationContext, SystemParams, Thermostat,
};

pub use observability::{init_default_observability, init_observability};
#[cfg(feature = "metrics")]
pub use observability::{CheckpointMetrics, MetricsTimer, Operation};
