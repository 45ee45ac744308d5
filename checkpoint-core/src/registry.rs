/*!
The object registry: named values a checkpoint captures and restores.

A [`Registry`] is an ordinary value passed to save and load, never a global.
Enumeration follows registration order, and a restored registry lists its
names in the same order as the one that was saved.
*/

use crate::{CheckpointError, Result};
use std::any::{Any, TypeId};
use std::fmt;

/// A type-erased registered value
pub struct StoredValue {
    value: Box<dyn Any + Send>,
    type_id: TypeId,
    type_name: &'static str,
    eq: fn(&dyn Any, &dyn Any) -> bool,
}

fn typed_eq<T: Any + PartialEq>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(x), Some(y)) => x == y || same_float_bits(a, b),
        _ => false,
    }
}

/// Scalar floats are the same value when their bits match, NaN included
fn same_float_bits(a: &dyn Any, b: &dyn Any) -> bool {
    if let (Some(a), Some(b)) = (a.downcast_ref::<f64>(), b.downcast_ref::<f64>()) {
        return a.to_bits() == b.to_bits();
    }
    if let (Some(a), Some(b)) = (a.downcast_ref::<f32>(), b.downcast_ref::<f32>()) {
        return a.to_bits() == b.to_bits();
    }
    false
}

impl StoredValue {
    pub fn new<T: Any + Send + PartialEq>(value: T) -> Self {
        Self {
            value: Box::new(value),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            eq: typed_eq::<T>,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.value.downcast_mut::<T>()
    }

    pub fn value_type_id(&self) -> TypeId {
        self.type_id
    }

    /// Rust type name, for diagnostics only
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl PartialEq for StoredValue {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && (self.eq)(self.value.as_ref(), other.value.as_ref())
    }
}

impl fmt::Debug for StoredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredValue")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Named values in registration order
#[derive(Debug, Default, PartialEq)]
pub struct Registry {
    entries: Vec<(String, StoredValue)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `value`
    ///
    /// Registering an equal value of the same type under the same name is a
    /// no-op; any other value is a [`CheckpointError::DuplicateName`]. A scalar
    /// `f64` or `f32` counts as equal when its bits match, so an identical NaN
    /// re-registers cleanly. NaN inside a collection still compares unequal.
    pub fn register<T, S>(&mut self, name: S, value: T) -> Result<()>
    where
        T: Any + Send + PartialEq,
        S: Into<String>,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(CheckpointError::validation("registry names must not be empty"));
        }
        let value = StoredValue::new(value);
        if let Some(existing) = self.lookup(&name) {
            if *existing == value {
                return Ok(());
            }
            return Err(CheckpointError::DuplicateName(name));
        }
        tracing::trace!(name = %name, type_name = value.type_name(), "registered");
        self.entries.push((name, value));
        Ok(())
    }

    /// Remove `name`, returning its value
    pub fn unregister(&mut self, name: &str) -> Result<StoredValue> {
        let at = self
            .position(name)
            .ok_or_else(|| CheckpointError::not_found(format!("registry entry '{name}'")))?;
        Ok(self.entries.remove(at).1)
    }

    /// Entries in registration order
    pub fn enumerate(&self) -> impl Iterator<Item = (&str, &StoredValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn get<T: Any>(&self, name: &str) -> Result<&T> {
        let stored = self
            .lookup(name)
            .ok_or_else(|| CheckpointError::not_found(format!("registry entry '{name}'")))?;
        stored.downcast_ref::<T>().ok_or_else(|| CheckpointError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
            found: stored.type_name(),
        })
    }

    pub fn get_mut<T: Any>(&mut self, name: &str) -> Result<&mut T> {
        let at = self
            .position(name)
            .ok_or_else(|| CheckpointError::not_found(format!("registry entry '{name}'")))?;
        let stored = &mut self.entries[at].1;
        let found = stored.type_name();
        stored.downcast_mut::<T>().ok_or_else(|| CheckpointError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
            found,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    fn lookup(&self, name: &str) -> Option<&StoredValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Append a value produced by the restoration driver
    pub(crate) fn insert_restored(&mut self, name: String, value: StoredValue) -> Result<()> {
        if self.contains(&name) {
            return Err(CheckpointError::corrupt(format!(
                "entry '{name}' appears more than once"
            )));
        }
        self.entries.push((name, value));
        Ok(())
    }

    /// Take a value out without the `NotFound` bookkeeping of [`Registry::unregister`]
    pub(crate) fn take(&mut self, name: &str) -> Option<StoredValue> {
        let at = self.position(name)?;
        Some(self.entries.remove(at).1)
    }
}
