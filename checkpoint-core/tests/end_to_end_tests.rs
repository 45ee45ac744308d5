/*!
End-to-end tests: build a simulation, checkpoint it to disk, restore it and
check that the resumed run is indistinguishable from an uninterrupted one.
*/

use checkpoint_core::{
    create_default_checkpoint, store_from_config, Actor, ActorHandle, AdapterSet, Checkpoint,
    CheckpointConfig, CheckpointError, CheckpointStore, DebyeHueckel, GzipCompressor,
    LennardJones, LocalFileStorage, P3m, Particle, Persist, Registry, Requirements, RestoreScope,
    SimulationContext, SystemParams, Thermostat,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn build_system(n_ranks: usize) -> (SimulationContext, Registry) {
    let params = SystemParams {
        box_l: [12.0; 3],
        time_step: 0.005,
        n_ranks,
        ..SystemParams::default()
    };
    let mut context = SimulationContext::new(params, 1234).unwrap();
    for id in 0..8u64 {
        let x = id as f64;
        context
            .particles
            .add(
                Particle::new(id, [x, 0.5 * x, 1.0])
                    .with_type((id % 2) as u32)
                    .with_charge(if id % 2 == 0 { 1.0 } else { -1.0 }),
            )
            .unwrap();
    }
    context
        .non_bonded
        .set_lennard_jones(0, 1, LennardJones::new(1.0, 1.0, 1.122_462_048).with_auto_shift())
        .unwrap();
    context.thermostat = Thermostat::langevin(1.0, 1.0).unwrap();
    let solver = context
        .add_actor(P3m::new(1.0, 1e-3, [12, 12, 24], 5, 3.0, 0.8))
        .unwrap();

    let mut registry = Registry::new();
    registry
        .register("myvar", String::from("some script variable"))
        .unwrap();
    registry.register("solver", solver).unwrap();
    registry.register("steps_done", 0u64).unwrap();
    (context, registry)
}

fn checkpoint_in(dir: &TempDir) -> Checkpoint<LocalFileStorage, GzipCompressor> {
    create_default_checkpoint("mycheckpoint", dir.path()).unwrap()
}

#[test]
fn test_resumed_run_matches_uninterrupted_run() {
    let dir = TempDir::new().unwrap();
    let checkpoint = checkpoint_in(&dir);
    let (mut context, mut registry) = build_system(2);

    context.integrate(40);
    *registry.get_mut::<u64>("steps_done").unwrap() = 40;
    checkpoint.save(&context, &registry).unwrap();

    context.integrate(60);

    let (mut resumed, resumed_registry) = checkpoint.load().unwrap();
    assert_eq!(*resumed_registry.get::<u64>("steps_done").unwrap(), 40);
    resumed.integrate(60);

    assert_eq!(resumed.particles, context.particles);
    assert_eq!(resumed.random, context.random);
    assert_eq!(resumed.time().to_bits(), context.time().to_bits());
}

#[test]
fn test_context_and_registry_round_trip() {
    let dir = TempDir::new().unwrap();
    let checkpoint = checkpoint_in(&dir);
    let (mut context, registry) = build_system(1);
    context.integrate(15);
    checkpoint.save(&context, &registry).unwrap();

    let (restored, restored_registry) = checkpoint.load().unwrap();

    assert_eq!(restored.params(), context.params());
    assert_eq!(restored.particles, context.particles);
    assert_eq!(restored.non_bonded, context.non_bonded);
    assert_eq!(restored.thermostat, context.thermostat);
    assert_eq!(restored.random, context.random);
    assert_eq!(restored_registry, registry);
    assert_eq!(
        restored_registry.registered_names(),
        vec!["myvar", "solver", "steps_done"]
    );
    assert_eq!(
        restored.non_bonded.lennard_jones(1, 0).unwrap().sigma,
        1.0
    );
    assert_eq!(
        restored.thermostat.state(),
        vec![("kT", 1.0), ("gamma", 1.0)]
    );
}

#[test]
fn test_single_entry_registry_identity() {
    let dir = TempDir::new().unwrap();
    let checkpoint = checkpoint_in(&dir);
    let context = SimulationContext::new(SystemParams::default(), 7).unwrap();
    let mut registry = Registry::new();
    registry.register("a", 0.1f64 + 0.2).unwrap();

    checkpoint.save(&context, &registry).unwrap();
    let (_, restored) = checkpoint.load().unwrap();

    let entries: Vec<(&str, f64)> = restored
        .enumerate()
        .map(|(name, value)| (name, *value.downcast_ref::<f64>().unwrap()))
        .collect();
    assert_eq!(entries, vec![("a", 0.1f64 + 0.2)]);
}

#[test]
fn test_nested_and_empty_collections_round_trip() {
    let dir = TempDir::new().unwrap();
    let checkpoint = checkpoint_in(&dir);
    let context = SimulationContext::new(SystemParams::default(), 7).unwrap();
    let mut registry = Registry::new();
    registry.register("empty_list", Vec::<f64>::new()).unwrap();
    registry.register("empty_map", BTreeMap::<String, f64>::new()).unwrap();
    registry.register("empty_string", String::new()).unwrap();
    registry
        .register("nested", json!({"a": [], "b": {"c": [[1, 2], {}]}, "d": null}))
        .unwrap();
    registry
        .register("trajectory", vec![[0.0, 1e-300, -2.5], [f64::MAX, f64::MIN_POSITIVE, 0.0]])
        .unwrap();

    checkpoint.save(&context, &registry).unwrap();
    let (_, restored) = checkpoint.load().unwrap();
    assert_eq!(restored, registry);
}

#[test]
fn test_fresh_process_continues_random_sequence() {
    let dir = TempDir::new().unwrap();
    let (mut context, registry) = build_system(3);
    context.integrate(10);
    create_default_checkpoint("rng", dir.path())
        .unwrap()
        .save(&context, &registry)
        .unwrap();

    let expected: Vec<f64> = (0..3).map(|rank| context.random.uniform(rank)).collect();

    // A second handle on the same directory stands in for a new process
    let (mut restored, _) = create_default_checkpoint("rng", dir.path())
        .unwrap()
        .load()
        .unwrap();
    let actual: Vec<f64> = (0..3).map(|rank| restored.random.uniform(rank)).collect();
    assert_eq!(expected, actual);
}

#[test]
fn test_reseed_after_restore() {
    let dir = TempDir::new().unwrap();
    let checkpoint = checkpoint_in(&dir);
    let (context, registry) = build_system(2);
    checkpoint.save(&context, &registry).unwrap();

    let (mut restored, _) = checkpoint.load().unwrap();
    restored.random.reseed(&[1234; 2]).unwrap();
    assert_eq!(restored.random.seeds(), &[1234, 1234]);
    assert_ne!(restored.random, context.random);
}

#[derive(Debug, PartialEq)]
struct Unregistered(u8);

#[test]
fn test_unsupported_type_commits_nothing() {
    let dir = TempDir::new().unwrap();
    let checkpoint = checkpoint_in(&dir);
    let (context, mut registry) = build_system(1);
    checkpoint.save(&context, &registry).unwrap();

    registry.register("thing", Unregistered(1)).unwrap();
    match checkpoint.save(&context, &registry) {
        Err(CheckpointError::UnsupportedType { type_name, entry }) => {
            assert!(type_name.contains("Unregistered"));
            assert_eq!(entry, "thing");
        }
        other => panic!("expected UnsupportedType, got {other:?}"),
    }

    let metadata = checkpoint.metadata().unwrap();
    assert_eq!(metadata.sequence, 0);
    assert!(!checkpoint.registered_names().unwrap().contains(&"thing".to_string()));

    let fresh = create_default_checkpoint("never_saved", dir.path()).unwrap();
    assert!(fresh.save(&context, &registry).is_err());
    assert!(!fresh.exists());
}

/// Position along x given as a fraction of the box; the absolute value is
/// recomputed from the restored context
#[derive(Debug, PartialEq)]
struct WallPosition {
    fraction: f64,
    absolute: f64,
}

impl WallPosition {
    fn new(fraction: f64, context: &SimulationContext) -> Self {
        Self {
            fraction,
            absolute: fraction * context.params().box_l[0],
        }
    }
}

impl Persist for WallPosition {
    const TYPE_TAG: &'static str = "wall_position";

    fn requires(&self) -> Requirements {
        Requirements::context()
    }

    fn to_representation(&self) -> checkpoint_core::Result<Value> {
        Ok(json!(self.fraction))
    }

    fn from_representation(state: Value, scope: &RestoreScope<'_>) -> checkpoint_core::Result<Self> {
        let fraction = state
            .as_f64()
            .ok_or_else(|| CheckpointError::corrupt("wall position must be a number"))?;
        Ok(Self::new(fraction, scope.context()?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Energy(f64);

checkpoint_core::impl_persist_via_serde!(Energy => "energy", |e: &Energy| e.0.is_finite());

/// Running sum that must be rebuilt after the value it extends
#[derive(Debug, PartialEq)]
struct EnergyReport {
    source: String,
    total: f64,
}

impl Persist for EnergyReport {
    const TYPE_TAG: &'static str = "energy_report";

    fn requires(&self) -> Requirements {
        Requirements::none().entry(self.source.clone())
    }

    fn to_representation(&self) -> checkpoint_core::Result<Value> {
        Ok(json!({"source": self.source, "total": self.total}))
    }

    fn from_representation(state: Value, scope: &RestoreScope<'_>) -> checkpoint_core::Result<Self> {
        let source = state["source"]
            .as_str()
            .ok_or_else(|| CheckpointError::corrupt("report without source"))?
            .to_string();
        let energy = scope.entry::<Energy>(&source)?;
        Ok(Self {
            total: energy.0 * 2.0,
            source,
        })
    }
}

fn adapters() -> AdapterSet {
    let mut adapters = AdapterSet::with_builtins();
    adapters.register::<WallPosition>().unwrap();
    adapters.register::<Energy>().unwrap();
    adapters.register::<EnergyReport>().unwrap();
    adapters
}

fn custom_checkpoint(dir: &TempDir, id: &str) -> Checkpoint<LocalFileStorage, GzipCompressor> {
    let store = CheckpointStore::new(LocalFileStorage::with_base_dir(dir.path()), GzipCompressor::new());
    Checkpoint::new(id, store, adapters()).unwrap()
}

#[test]
fn test_dependent_entries_observe_restored_state() {
    let dir = TempDir::new().unwrap();
    let checkpoint = custom_checkpoint(&dir, "ordered");
    let (mut context, _) = build_system(1);
    let mut params = context.params().clone();
    params.box_l = [20.0, 20.0, 20.0];
    context.set_params(params).unwrap();

    let mut registry = Registry::new();
    // The report is registered before the value it depends on
    registry
        .register("report", EnergyReport { source: "energy".into(), total: 3.0 })
        .unwrap();
    registry.register("energy", Energy(1.5)).unwrap();
    registry.register("wall", WallPosition::new(0.25, &context)).unwrap();
    checkpoint.save(&context, &registry).unwrap();

    // Mutate the live state so restoring has to replace it
    let mut live_params = context.params().clone();
    live_params.box_l = [14.0; 3];
    context.set_params(live_params).unwrap();
    context.integrate(3);
    let mut live_registry = Registry::new();
    live_registry.register("other", 1i32).unwrap();

    checkpoint.load_into(&mut context, &mut live_registry).unwrap();

    assert_eq!(context.params().box_l, [20.0; 3]);
    assert_eq!(live_registry.registered_names(), vec!["report", "energy", "wall"]);
    assert_eq!(live_registry.get::<WallPosition>("wall").unwrap().absolute, 5.0);
    assert_eq!(live_registry.get::<EnergyReport>("report").unwrap().total, 3.0);

    let (_, p3m) = context.actors().find::<P3m>().unwrap();
    assert_eq!(p3m.mesh_spacing(), Some([20.0 / 12.0, 20.0 / 12.0, 20.0 / 24.0]));
}

#[test]
fn test_actor_handles_resolve_to_restored_slots() {
    let dir = TempDir::new().unwrap();
    let checkpoint = checkpoint_in(&dir);
    let (mut context, mut registry) = build_system(1);
    let screened = context.add_actor(DebyeHueckel::new(1.0, 0.7, 4.0)).unwrap();
    let solver = registry.get::<ActorHandle>("solver").unwrap().clone();
    context.remove_actor(&solver).unwrap();
    registry.unregister("solver").unwrap();
    registry.register("screened", screened.clone()).unwrap();

    checkpoint.save(&context, &registry).unwrap();
    let (restored, restored_registry) = checkpoint.load().unwrap();

    let handle = restored_registry.get::<ActorHandle>("screened").unwrap();
    assert_eq!(handle, &screened);
    assert_eq!(handle.slot, 1);
    let actor = restored.actors().get_as::<DebyeHueckel>(handle).unwrap();
    assert!(actor.is_bound());
    assert_eq!(actor.kappa, 0.7);
    assert_eq!(restored.actors().len(), 1);
    assert!(restored.actors().get(&solver).is_none());
}

#[derive(Debug, PartialEq)]
struct Link {
    next: String,
}

impl Persist for Link {
    const TYPE_TAG: &'static str = "link";

    fn requires(&self) -> Requirements {
        Requirements::none().entry(self.next.clone())
    }

    fn to_representation(&self) -> checkpoint_core::Result<Value> {
        Ok(json!(self.next))
    }

    fn from_representation(state: Value, _scope: &RestoreScope<'_>) -> checkpoint_core::Result<Self> {
        Ok(Self {
            next: state.as_str().unwrap_or_default().to_string(),
        })
    }
}

#[test]
fn test_cyclic_entries_are_rejected_at_save() {
    let dir = TempDir::new().unwrap();
    let mut checkpoint = custom_checkpoint(&dir, "cyclic");
    checkpoint.adapters_mut().register::<Link>().unwrap();
    let context = SimulationContext::new(SystemParams::default(), 1).unwrap();

    let mut registry = Registry::new();
    registry.register("a", Link { next: "b".into() }).unwrap();
    registry.register("b", Link { next: "a".into() }).unwrap();

    match checkpoint.save(&context, &registry) {
        Err(CheckpointError::CyclicDependency(path)) => {
            assert_eq!(path, vec!["a", "b", "a"]);
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
    assert!(!checkpoint.exists());

    let mut dangling = Registry::new();
    dangling.register("a", Link { next: "ghost".into() }).unwrap();
    assert!(matches!(
        checkpoint.save(&context, &dangling),
        Err(CheckpointError::NotFound(_))
    ));
}

#[test]
fn test_corrupt_file_leaves_live_state_untouched() {
    let dir = TempDir::new().unwrap();
    let checkpoint = checkpoint_in(&dir);
    let (context, registry) = build_system(1);
    checkpoint.save(&context, &registry).unwrap();

    let file = dir.path().join("mycheckpoint").join("checkpoint.json.gz");
    let mut bytes = std::fs::read(&file).unwrap();
    bytes.truncate(bytes.len() / 2);
    std::fs::write(&file, bytes).unwrap();

    let (mut live, mut live_registry) = build_system(1);
    live.integrate(5);
    let time = live.time();
    let particles = live.particles.clone();

    assert!(matches!(
        checkpoint.load_into(&mut live, &mut live_registry),
        Err(CheckpointError::CorruptSnapshot(_))
    ));
    assert_eq!(live.time(), time);
    assert_eq!(live.particles, particles);
    assert_eq!(live_registry, registry);
    assert!(checkpoint.verify().is_err());
}

#[test]
fn test_missing_checkpoint_is_not_found() {
    let dir = TempDir::new().unwrap();
    let checkpoint = checkpoint_in(&dir);
    assert!(matches!(checkpoint.load(), Err(CheckpointError::NotFound(_))));
    assert!(matches!(checkpoint.metadata(), Err(CheckpointError::NotFound(_))));
}

#[test]
fn test_store_lists_and_deletes_checkpoints() {
    let dir = TempDir::new().unwrap();
    let (context, registry) = build_system(1);
    for id in ["beta", "alpha"] {
        create_default_checkpoint(id, dir.path())
            .unwrap()
            .save(&context, &registry)
            .unwrap();
    }
    std::fs::create_dir_all(dir.path().join("empty_dir")).unwrap();

    let store = store_from_config(&CheckpointConfig::with_base_dir(dir.path())).unwrap();
    assert_eq!(store.list().unwrap(), vec!["alpha", "beta"]);
    assert_eq!(store.metadata("alpha").unwrap().entry_count, 3);

    store.delete("alpha").unwrap();
    assert_eq!(store.list().unwrap(), vec!["beta"]);
    assert!(matches!(store.delete("alpha"), Err(CheckpointError::NotFound(_))));
}

#[test]
fn test_successive_saves_overwrite_atomically() {
    let dir = TempDir::new().unwrap();
    let checkpoint = checkpoint_in(&dir);
    let (mut context, registry) = build_system(1);

    for expected in 0..3u64 {
        let metadata = checkpoint.save(&context, &registry).unwrap();
        assert_eq!(metadata.sequence, expected);
        context.integrate(2);
    }

    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("mycheckpoint"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(leftovers, vec!["checkpoint.json.gz"]);
    let (restored, _) = checkpoint.load().unwrap();
    assert!((restored.time() - 4.0 * 0.005).abs() < 1e-12);
}
