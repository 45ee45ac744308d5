/*!
Restoration driver.

Rebuilds live state from a decoded [`SnapshotPayload`]:

1. the simulation context, including every random stream
2. the actors, slot by slot, bound to the restored parameters
3. the registry entries, in dependency order
4. a registry listing the entries in their saved order

Nothing is handed to the caller until every step has succeeded.
*/

use crate::adapter::{AdapterSet, RestoreScope};
use crate::registry::Registry;
use crate::representation::{EntryRecord, SnapshotPayload};
use crate::system::{ActorSet, ContextState, SimulationContext, CONTEXT_TAG};
use crate::{CheckpointError, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument};

/// Order in which `entries` can be rebuilt
///
/// Entries without pending dependencies are taken lowest index first, so the
/// order is deterministic and equals the saved order whenever that order
/// already satisfies every dependency. `on_missing(entry, dependency)` builds
/// the error for a dependency on a name that is not in `entries`.
pub(crate) fn restoration_order<F>(entries: &[EntryRecord], on_missing: F) -> Result<Vec<usize>>
where
    F: Fn(&str, &str) -> CheckpointError,
{
    let mut index = BTreeMap::new();
    for (i, entry) in entries.iter().enumerate() {
        if index.insert(entry.name.as_str(), i).is_some() {
            return Err(CheckpointError::corrupt(format!(
                "entry '{}' appears more than once",
                entry.name
            )));
        }
    }

    let mut deps: Vec<BTreeSet<usize>> = Vec::with_capacity(entries.len());
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
    for (i, entry) in entries.iter().enumerate() {
        let mut own = BTreeSet::new();
        for dep in &entry.requires.entries {
            let &j = index
                .get(dep.as_str())
                .ok_or_else(|| on_missing(&entry.name, dep))?;
            if own.insert(j) {
                dependents[j].push(i);
            }
        }
        deps.push(own);
    }

    let mut pending: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<usize> = (0..entries.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(entries.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &d in &dependents[i] {
            pending[d] -= 1;
            if pending[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if order.len() < entries.len() {
        return Err(CheckpointError::CyclicDependency(find_cycle(entries, &deps, &pending)));
    }
    Ok(order)
}

/// Names along one cycle among the entries Kahn's algorithm could not order
fn find_cycle(entries: &[EntryRecord], deps: &[BTreeSet<usize>], pending: &[usize]) -> Vec<String> {
    let Some(start) = (0..entries.len()).find(|&i| pending[i] > 0) else {
        return Vec::new();
    };
    // Every unordered entry waits on at least one other unordered entry, so
    // following those edges must revisit a node.
    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(&next) = deps[current].iter().find(|&&j| pending[j] > 0) else {
            return path.iter().map(|&i| entries[i].name.clone()).collect();
        };
        if let Some(at) = path.iter().position(|&i| i == next) {
            let mut cycle: Vec<String> = path[at..].iter().map(|&i| entries[i].name.clone()).collect();
            cycle.push(entries[next].name.clone());
            return cycle;
        }
        path.push(next);
        current = next;
    }
}

/// Rebuild the context and registry described by `payload`
#[instrument(skip_all, fields(entries = payload.entries.len()))]
pub fn restore(
    mut payload: SnapshotPayload,
    adapters: &AdapterSet,
) -> Result<(SimulationContext, Registry)> {
    if payload.context.type_tag != CONTEXT_TAG {
        return Err(CheckpointError::corrupt(format!(
            "expected a '{CONTEXT_TAG}' representation, found '{}'",
            payload.context.type_tag
        )));
    }
    let mut state: ContextState = serde_json::from_value(std::mem::take(&mut payload.context.state))
        .map_err(|e| CheckpointError::corrupt(format!("invalid simulation context: {e}")))?;
    state.validate()?;

    let mut slots = Vec::with_capacity(state.actors.len());
    for (slot, repr) in std::mem::take(&mut state.actors).into_iter().enumerate() {
        let Some(repr) = repr else {
            slots.push(None);
            continue;
        };
        let mut actor = adapters
            .build_actor(&repr.type_tag, repr.state)
            .map_err(|e| match e {
                CheckpointError::UnsupportedType { type_name, .. } => {
                    CheckpointError::unsupported(type_name, format!("actor slot {slot}"))
                }
                other => other,
            })?;
        actor.bind(&state.params).map_err(|e| {
            CheckpointError::corrupt(format!("actor in slot {slot} rejects restored parameters: {e}"))
        })?;
        debug!(slot, tag = actor.type_tag(), "actor restored");
        slots.push(Some(actor));
    }
    let context = SimulationContext::from_restored(state, ActorSet::from_slots(slots));

    let order = restoration_order(&payload.entries, |entry, dependency| {
        CheckpointError::corrupt(format!(
            "entry '{entry}' depends on '{dependency}', which is not in the snapshot"
        ))
    })?;

    let mut states: Vec<_> = payload
        .entries
        .iter_mut()
        .map(|e| std::mem::take(&mut e.representation.state))
        .collect();

    let mut restored = Registry::new();
    for i in order {
        let record = &payload.entries[i];
        let adapter = adapters
            .for_tag(&record.representation.type_tag)
            .ok_or_else(|| CheckpointError::unsupported(&record.representation.type_tag, &record.name))?;
        let scope = RestoreScope::new(&record.name, &record.requires, &context, &restored);
        let value = adapter.restore(std::mem::take(&mut states[i]), &scope)?;
        restored.insert_restored(record.name.clone(), value)?;
    }

    let mut registry = Registry::new();
    for name in payload.entry_names() {
        let value = restored
            .take(name)
            .ok_or_else(|| CheckpointError::corrupt(format!("entry '{name}' was not restored")))?;
        registry.insert_restored(name.to_string(), value)?;
    }

    Ok((context, registry))
}
