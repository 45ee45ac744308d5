/*!
The checkpoint facade: capture live state, commit it, restore it.

A [`Checkpoint`] ties a checkpoint id to a [`CheckpointStore`] and an
[`AdapterSet`]. Saving borrows the context and registry immutably, loading into
existing state borrows them mutably, so no computation can interleave with
either.
*/

use crate::adapter::AdapterSet;
use crate::compression::{compressor_for, CompressionAdapter, GzipCompressor};
use crate::config::CheckpointConfig;
use crate::metadata::CheckpointMetadata;
use crate::registry::Registry;
use crate::representation::{EntryRecord, Representation, SnapshotPayload};
use crate::restore::{restoration_order, restore};
use crate::storage::{LocalFileStorage, StorageAdapter};
use crate::store::{key_for, CheckpointStore};
use crate::system::{ActorHandle, ContextState, SimulationContext, CONTEXT_TAG};
use crate::{CheckpointError, Result};
use std::path::Path;
use tracing::{info, instrument};

#[cfg(feature = "metrics")]
use crate::observability::{MetricsTimer, Operation};

/// Capture `context` and every entry of `registry` into a payload
///
/// Fails without producing anything if an entry has no adapter, an actor type
/// cannot be restored, a value cannot be represented, or the entries cannot
/// be put in a restoration order.
pub fn capture(
    context: &SimulationContext,
    registry: &Registry,
    adapters: &AdapterSet,
) -> Result<SnapshotPayload> {
    let state = context.capture_state()?;
    state.check_representable()?;
    check_actors(&state, adapters)?;
    let context_repr = Representation::new(CONTEXT_TAG, serde_json::to_value(&state)?);

    let mut entries = Vec::with_capacity(registry.len());
    for (name, value) in registry.enumerate() {
        let adapter = adapters
            .for_value(value)
            .ok_or_else(|| CheckpointError::unsupported(value.type_name(), name))?;
        if let Some(handle) = value.downcast_ref::<ActorHandle>() {
            if context.actors().get(handle).is_none() {
                return Err(CheckpointError::validation(format!(
                    "entry '{name}' refers to actor slot {} which is not active",
                    handle.slot
                )));
            }
        }
        let (requires, state) = adapter.capture(value).map_err(|e| match e {
            CheckpointError::Validation(msg) => {
                CheckpointError::validation(format!("entry '{name}': {msg}"))
            }
            other => other,
        })?;
        entries.push(EntryRecord {
            name: name.to_string(),
            requires,
            representation: Representation::new(adapter.type_tag(), state),
        });
    }

    restoration_order(&entries, |entry, dependency| {
        CheckpointError::not_found(format!(
            "entry '{entry}' depends on '{dependency}', which is not registered"
        ))
    })?;

    Ok(SnapshotPayload {
        context: context_repr,
        entries,
    })
}

/// Rebuild and bind every captured actor the way a restore will
fn check_actors(state: &ContextState, adapters: &AdapterSet) -> Result<()> {
    for (slot, repr) in state.actors.iter().enumerate() {
        let Some(repr) = repr else {
            continue;
        };
        let mut actor = adapters
            .build_actor(&repr.type_tag, repr.state.clone())
            .map_err(|e| match e {
                CheckpointError::UnsupportedType { type_name, .. } => {
                    CheckpointError::unsupported(type_name, format!("actor slot {slot}"))
                }
                other => CheckpointError::validation(format!(
                    "actor in slot {slot} cannot be represented: {other}"
                )),
            })?;
        actor.bind(&state.params).map_err(|e| {
            CheckpointError::validation(format!("actor in slot {slot} cannot be represented: {e}"))
        })?;
    }
    Ok(())
}

/// A named checkpoint
pub struct Checkpoint<S, C>
where
    S: StorageAdapter,
    C: CompressionAdapter,
{
    id: String,
    store: CheckpointStore<S, C>,
    adapters: AdapterSet,
}

impl<S, C> Checkpoint<S, C>
where
    S: StorageAdapter,
    C: CompressionAdapter,
{
    pub fn new<I: Into<String>>(id: I, store: CheckpointStore<S, C>, adapters: AdapterSet) -> Result<Self> {
        let id = id.into();
        key_for(&id)?;
        Ok(Self { id, store, adapters })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    /// Register additional adapters before saving or loading
    pub fn adapters_mut(&mut self) -> &mut AdapterSet {
        &mut self.adapters
    }

    pub fn store(&self) -> &CheckpointStore<S, C> {
        &self.store
    }

    /// Capture and commit the current state
    pub fn save(&self, context: &SimulationContext, registry: &Registry) -> Result<CheckpointMetadata> {
        self.commit(context, registry, None)
    }

    pub fn save_with_description(
        &self,
        context: &SimulationContext,
        registry: &Registry,
        description: &str,
    ) -> Result<CheckpointMetadata> {
        self.commit(context, registry, Some(description))
    }

    #[instrument(skip_all, fields(checkpoint_id = %self.id))]
    fn commit(
        &self,
        context: &SimulationContext,
        registry: &Registry,
        description: Option<&str>,
    ) -> Result<CheckpointMetadata> {
        let payload = capture(context, registry, &self.adapters)?;
        let mut metadata = CheckpointMetadata::new(&self.id, 0).with_capture_summary(
            payload.entries.len(),
            context.n_ranks(),
            context.time(),
        );
        if let Some(description) = description {
            metadata = metadata.with_description(description);
        }
        self.store.save(metadata, &payload)
    }

    /// Rebuild a fresh context and registry from the current snapshot
    #[instrument(skip_all, fields(checkpoint_id = %self.id))]
    pub fn load(&self) -> Result<(SimulationContext, Registry)> {
        self.timed_load(|| {
            let (_, payload) = self.store.load(&self.id)?;
            restore(payload, &self.adapters)
        })
    }

    /// Replace `context` and `registry` with the current snapshot
    ///
    /// The snapshot must have been taken with the same number of ranks as
    /// `context`. On any error both are left exactly as they were.
    #[instrument(skip_all, fields(checkpoint_id = %self.id))]
    pub fn load_into(
        &self,
        context: &mut SimulationContext,
        registry: &mut Registry,
    ) -> Result<CheckpointMetadata> {
        let n_ranks = context.n_ranks();
        let (metadata, restored_context, restored_registry) = self.timed_load(|| {
            let (metadata, payload) = self.store.load(&self.id)?;
            if metadata.n_ranks != n_ranks {
                return Err(CheckpointError::validation(format!(
                    "checkpoint '{}' was taken on {} ranks, the running context has {}",
                    self.id, metadata.n_ranks, n_ranks
                )));
            }
            let (restored_context, restored_registry) = restore(payload, &self.adapters)?;
            if restored_context.n_ranks() != n_ranks {
                return Err(CheckpointError::corrupt(format!(
                    "metadata of '{}' disagrees with its context on the number of ranks",
                    self.id
                )));
            }
            Ok((metadata, restored_context, restored_registry))
        })?;
        *context = restored_context;
        *registry = restored_registry;
        info!(
            sequence = metadata.sequence,
            entries = registry.len(),
            sim_time = context.time(),
            "Checkpoint restored"
        );
        Ok(metadata)
    }

    /// Run a full load, counting restore failures as failed loads
    fn timed_load<T>(&self, load: impl FnOnce() -> Result<T>) -> Result<T> {
        #[cfg(feature = "metrics")]
        let timer = MetricsTimer::start(Operation::Load);

        let result = load();

        #[cfg(feature = "metrics")]
        match &result {
            Ok(_) => timer.finish(),
            Err(_) => timer.finish_with_error(),
        }

        result
    }

    /// Names registered when the current snapshot was taken, in order
    pub fn registered_names(&self) -> Result<Vec<String>> {
        let (_, payload) = self.store.load(&self.id)?;
        Ok(payload.entry_names().map(str::to_string).collect())
    }

    pub fn exists(&self) -> bool {
        self.store.exists(&self.id)
    }

    pub fn metadata(&self) -> Result<CheckpointMetadata> {
        self.store.metadata(&self.id)
    }

    pub fn verify(&self) -> Result<CheckpointMetadata> {
        self.store.verify(&self.id)
    }

    pub fn delete(&self) -> Result<()> {
        self.store.delete(&self.id)
    }
}

/// Gzip-compressed checkpoint below `base_dir` with the built-in adapters
///
/// # Example
/// ```rust,no_run
/// use checkpoint_core::{create_default_checkpoint, Registry, SimulationContext, SystemParams};
///
/// let checkpoint = create_default_checkpoint("mycheckpoint", "./checkpoints")?;
/// let context = SimulationContext::new(SystemParams::default(), 42)?;
/// let mut registry = Registry::new();
/// registry.register("myvar", 3.14f64)?;
///
/// checkpoint.save(&context, &registry)?;
/// let (context, registry) = checkpoint.load()?;
/// # Ok::<(), checkpoint_core::CheckpointError>(())
/// ```
pub fn create_default_checkpoint<P: AsRef<Path>>(
    id: &str,
    base_dir: P,
) -> Result<Checkpoint<LocalFileStorage, GzipCompressor>> {
    let store = CheckpointStore::new(LocalFileStorage::with_base_dir(base_dir), GzipCompressor::new());
    Checkpoint::new(id, store, AdapterSet::with_builtins())
}

/// Checkpoint configured by `config`
pub fn checkpoint_from_config(
    id: &str,
    config: &CheckpointConfig,
    adapters: AdapterSet,
) -> Result<Checkpoint<LocalFileStorage, Box<dyn CompressionAdapter + Send + Sync>>> {
    config.validate()?;
    let store = store_from_config(config)?;
    Checkpoint::new(id, store, adapters)
}

/// Store configured by `config`, for inspecting checkpoints without restoring them
pub fn store_from_config(
    config: &CheckpointConfig,
) -> Result<CheckpointStore<LocalFileStorage, Box<dyn CompressionAdapter + Send + Sync>>> {
    config.validate()?;
    let storage = LocalFileStorage::with_base_dir(&config.base_dir);
    let compressor = compressor_for(config.compression, config.compression_level);
    Ok(CheckpointStore::new(storage, compressor).with_verification(config.verify_on_load))
}
