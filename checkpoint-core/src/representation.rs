/*!
Transportable, type-tagged representations and the snapshot payload layout.

Everything written into a checkpoint is a [`Representation`]: a type tag that
selects the adapter on load, plus a self-describing JSON state. Representations
of unrelated types share one container without any out-of-band schema.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type-tagged state of one persisted object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Representation {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub state: Value,
}

impl Representation {
    pub fn new<S: Into<String>>(type_tag: S, state: Value) -> Self {
        Self {
            type_tag: type_tag.into(),
            state,
        }
    }
}

/// What must exist before an entry can be rebuilt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    /// The entry reads the simulation context while restoring
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub context: bool,
    /// Names of other registered entries restored first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<String>,
}

impl Requirements {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn context() -> Self {
        Self {
            context: true,
            entries: Vec::new(),
        }
    }

    pub fn entry<S: Into<String>>(mut self, name: S) -> Self {
        self.entries.push(name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        !self.context && self.entries.is_empty()
    }
}

/// One captured registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub name: String,
    #[serde(default)]
    pub requires: Requirements,
    pub representation: Representation,
}

/// Aggregate snapshot: the context plus all registry entries in enumeration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub context: Representation,
    pub entries: Vec<EntryRecord>,
}

impl SnapshotPayload {
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }
}
