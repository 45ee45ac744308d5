/*!
Serializable state adapters.

A type becomes checkpointable by implementing [`Persist`], either by hand or
through [`impl_persist_via_serde!`](crate::impl_persist_via_serde). Adapters are
collected in an [`AdapterSet`] that is keyed both by the stable type tag (used on
load) and by the [`TypeId`] captured at registration (used on save), so no
runtime introspection of values is needed.

Actor types are registered separately through [`AdapterSet::register_actor`].
*/

use crate::registry::{Registry, StoredValue};
use crate::representation::Requirements;
use crate::system::{Actor, ActorHandle, ActorKind, DebyeHueckel, P3m, SimulationContext};
use crate::{CheckpointError, Result};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;

/// Save/restore contract of a persistable type
pub trait Persist: Any + Send + PartialEq + Sized {
    /// Stable tag written next to the state; must be unique per adapter set
    const TYPE_TAG: &'static str;

    /// What must be restored before this value can be rebuilt
    fn requires(&self) -> Requirements {
        Requirements::none()
    }

    fn to_representation(&self) -> Result<Value>;

    fn from_representation(state: Value, scope: &RestoreScope<'_>) -> Result<Self>;
}

/// Implement [`Persist`] for a serde type
///
/// An optional predicate rejects values that JSON cannot carry faithfully,
/// such as non-finite floats.
///
/// ```ignore
/// impl_persist_via_serde!(Trajectory => "trajectory");
/// impl_persist_via_serde!(Energy => "energy", |e: &Energy| e.0.is_finite());
/// ```
#[macro_export]
macro_rules! impl_persist_via_serde {
    ($ty:ty => $tag:expr) => {
        $crate::impl_persist_via_serde!($ty => $tag, |_value: &$ty| true);
    };
    ($ty:ty => $tag:expr, $check:expr) => {
        impl $crate::Persist for $ty {
            const TYPE_TAG: &'static str = $tag;

            fn to_representation(&self) -> $crate::Result<$crate::serde_json::Value> {
                let check: fn(&$ty) -> bool = $check;
                if !check(self) {
                    return Err($crate::CheckpointError::validation(format!(
                        "value of type '{}' cannot be represented",
                        $tag
                    )));
                }
                Ok($crate::serde_json::to_value(self)?)
            }

            fn from_representation(
                state: $crate::serde_json::Value,
                _scope: &$crate::RestoreScope<'_>,
            ) -> $crate::Result<Self> {
                $crate::serde_json::from_value(state).map_err(|e| {
                    $crate::CheckpointError::corrupt(format!("invalid '{}' state: {}", $tag, e))
                })
            }
        }
    };
}

impl_persist_via_serde!(bool => "bool");
impl_persist_via_serde!(i32 => "i32");
impl_persist_via_serde!(i64 => "i64");
impl_persist_via_serde!(u32 => "u32");
impl_persist_via_serde!(u64 => "u64");
impl_persist_via_serde!(usize => "usize");
impl_persist_via_serde!(f32 => "f32", |v: &f32| v.is_finite());
impl_persist_via_serde!(f64 => "f64", |v: &f64| v.is_finite());
impl_persist_via_serde!(String => "string");
impl_persist_via_serde!([f64; 3] => "vec3", |v: &[f64; 3]| v.iter().all(|x| x.is_finite()));
impl_persist_via_serde!(Vec<f64> => "vec_f64", |v: &Vec<f64>| v.iter().all(|x| x.is_finite()));
impl_persist_via_serde!(Vec<i64> => "vec_i64");
impl_persist_via_serde!(Vec<String> => "vec_string");
impl_persist_via_serde!(Vec<[f64; 3]> => "vec_vec3", |v: &Vec<[f64; 3]>| {
    v.iter().flatten().all(|x| x.is_finite())
});
impl_persist_via_serde!(BTreeMap<String, f64> => "map_string_f64", |m: &BTreeMap<String, f64>| {
    m.values().all(|x| x.is_finite())
});
impl_persist_via_serde!(Value => "json");

impl Persist for ActorHandle {
    const TYPE_TAG: &'static str = "actor_handle";

    fn requires(&self) -> Requirements {
        Requirements::context()
    }

    fn to_representation(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn from_representation(state: Value, scope: &RestoreScope<'_>) -> Result<Self> {
        let handle: ActorHandle = serde_json::from_value(state)
            .map_err(|e| CheckpointError::corrupt(format!("invalid actor handle: {e}")))?;
        if scope.context()?.actors().get(&handle).is_none() {
            return Err(CheckpointError::corrupt(format!(
                "entry '{}' refers to actor slot {} ({}) which is not active",
                scope.name(),
                handle.slot,
                handle.type_tag
            )));
        }
        Ok(handle)
    }
}

/// What an adapter may look at while rebuilding one entry
pub struct RestoreScope<'a> {
    name: &'a str,
    requires: &'a Requirements,
    context: &'a SimulationContext,
    restored: &'a Registry,
}

impl<'a> RestoreScope<'a> {
    pub(crate) fn new(
        name: &'a str,
        requires: &'a Requirements,
        context: &'a SimulationContext,
        restored: &'a Registry,
    ) -> Self {
        Self {
            name,
            requires,
            context,
            restored,
        }
    }

    /// Name of the entry being restored
    pub fn name(&self) -> &str {
        self.name
    }

    /// The freshly restored context; only available if declared in `requires`
    pub fn context(&self) -> Result<&'a SimulationContext> {
        if !self.requires.context {
            return Err(CheckpointError::validation(format!(
                "entry '{}' reads the simulation context without declaring it",
                self.name
            )));
        }
        Ok(self.context)
    }

    /// A previously restored entry; only available if declared in `requires`
    pub fn entry<T: Any>(&self, name: &str) -> Result<&'a T> {
        if !self.requires.entries.iter().any(|n| n == name) {
            return Err(CheckpointError::validation(format!(
                "entry '{}' reads '{}' without declaring it",
                self.name, name
            )));
        }
        self.restored.get::<T>(name)
    }
}

/// Type-erased adapter stored in an [`AdapterSet`]
pub(crate) trait ErasedAdapter: Send + Sync {
    fn type_tag(&self) -> &'static str;

    fn capture(&self, value: &StoredValue) -> Result<(Requirements, Value)>;

    fn restore(&self, state: Value, scope: &RestoreScope<'_>) -> Result<StoredValue>;
}

struct TypedAdapter<T>(PhantomData<fn() -> T>);

impl<T: Persist> ErasedAdapter for TypedAdapter<T> {
    fn type_tag(&self) -> &'static str {
        T::TYPE_TAG
    }

    fn capture(&self, value: &StoredValue) -> Result<(Requirements, Value)> {
        let value = value
            .downcast_ref::<T>()
            .ok_or_else(|| CheckpointError::TypeMismatch {
                name: T::TYPE_TAG.to_string(),
                expected: std::any::type_name::<T>(),
                found: value.type_name(),
            })?;
        Ok((value.requires(), value.to_representation()?))
    }

    fn restore(&self, state: Value, scope: &RestoreScope<'_>) -> Result<StoredValue> {
        Ok(StoredValue::new(T::from_representation(state, scope)?))
    }
}

type ActorFactory = fn(Value) -> Result<Box<dyn Actor>>;

fn build_actor<A: ActorKind>(params: Value) -> Result<Box<dyn Actor>> {
    Ok(Box::new(A::from_params(params)?))
}

/// Registered adapters, looked up by type tag or by Rust type
#[derive(Default)]
pub struct AdapterSet {
    by_tag: BTreeMap<&'static str, Box<dyn ErasedAdapter>>,
    by_type: HashMap<TypeId, &'static str>,
    actors: BTreeMap<&'static str, (TypeId, ActorFactory)>,
}

impl std::fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterSet")
            .field("types", &self.by_tag.keys().collect::<Vec<_>>())
            .field("actors", &self.actors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AdapterSet {
    /// An empty set; even the context's actors need registering
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapters for the primitive and collection types, [`ActorHandle`] and
    /// the built-in actors
    pub fn with_builtins() -> Self {
        let mut set = Self::new();
        set.register_builtins();
        set
    }

    fn register_builtins(&mut self) {
        self.insert::<bool>();
        self.insert::<i32>();
        self.insert::<i64>();
        self.insert::<u32>();
        self.insert::<u64>();
        self.insert::<usize>();
        self.insert::<f32>();
        self.insert::<f64>();
        self.insert::<String>();
        self.insert::<[f64; 3]>();
        self.insert::<Vec<f64>>();
        self.insert::<Vec<i64>>();
        self.insert::<Vec<String>>();
        self.insert::<Vec<[f64; 3]>>();
        self.insert::<BTreeMap<String, f64>>();
        self.insert::<Value>();
        self.insert::<ActorHandle>();
        self.actors.insert(P3m::TYPE_TAG, (TypeId::of::<P3m>(), build_actor::<P3m>));
        self.actors.insert(
            DebyeHueckel::TYPE_TAG,
            (TypeId::of::<DebyeHueckel>(), build_actor::<DebyeHueckel>),
        );
    }

    fn insert<T: Persist>(&mut self) {
        self.by_tag
            .insert(T::TYPE_TAG, Box::new(TypedAdapter::<T>(PhantomData)));
        self.by_type.insert(TypeId::of::<T>(), T::TYPE_TAG);
    }

    /// Make `T` checkpointable
    ///
    /// Registering the same type twice is a no-op. A tag already used by a
    /// different type is a [`CheckpointError::DuplicateName`].
    pub fn register<T: Persist>(&mut self) -> Result<()> {
        if let Some(&tag) = self.by_type.get(&TypeId::of::<T>()) {
            if tag == T::TYPE_TAG {
                return Ok(());
            }
            return Err(CheckpointError::DuplicateName(format!(
                "{} is already registered under tag '{}'",
                std::any::type_name::<T>(),
                tag
            )));
        }
        if self.by_tag.contains_key(T::TYPE_TAG) {
            return Err(CheckpointError::DuplicateName(T::TYPE_TAG.to_string()));
        }
        self.insert::<T>();
        Ok(())
    }

    pub fn register_actor<A: ActorKind>(&mut self) -> Result<()> {
        match self.actors.get(A::TYPE_TAG) {
            Some((type_id, _)) if *type_id == TypeId::of::<A>() => Ok(()),
            Some(_) => Err(CheckpointError::DuplicateName(A::TYPE_TAG.to_string())),
            None => {
                self.actors
                    .insert(A::TYPE_TAG, (TypeId::of::<A>(), build_actor::<A>));
                Ok(())
            }
        }
    }

    pub fn supports<T: Any>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    pub fn supports_actor(&self, tag: &str) -> bool {
        self.actors.contains_key(tag)
    }

    /// Registered value type tags, sorted
    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.by_tag.keys().copied()
    }

    pub(crate) fn for_value(&self, value: &StoredValue) -> Option<&dyn ErasedAdapter> {
        let tag = self.by_type.get(&value.value_type_id())?;
        self.by_tag.get(tag).map(|a| a.as_ref())
    }

    pub(crate) fn for_tag(&self, tag: &str) -> Option<&dyn ErasedAdapter> {
        self.by_tag.get(tag).map(|a| a.as_ref())
    }

    pub(crate) fn build_actor(&self, tag: &str, params: Value) -> Result<Box<dyn Actor>> {
        let (_, factory) = self
            .actors
            .get(tag)
            .ok_or_else(|| CheckpointError::unsupported(tag, "actor"))?;
        factory(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::SystemParams;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Observable {
        name: String,
        samples: Vec<f64>,
    }

    crate::impl_persist_via_serde!(Observable => "observable");

    struct Clash;

    impl PartialEq for Clash {
        fn eq(&self, _: &Self) -> bool {
            true
        }
    }

    impl Persist for Clash {
        const TYPE_TAG: &'static str = "f64";

        fn to_representation(&self) -> Result<Value> {
            Ok(Value::Null)
        }

        fn from_representation(_: Value, _: &RestoreScope<'_>) -> Result<Self> {
            Ok(Clash)
        }
    }

    fn roundtrip<T: Persist + std::fmt::Debug>(value: T) -> T {
        let ctx = SimulationContext::new(SystemParams::default(), 1).unwrap();
        let registry = Registry::new();
        let requires = value.requires();
        let scope = RestoreScope::new("x", &requires, &ctx, &registry);
        T::from_representation(value.to_representation().unwrap(), &scope).unwrap()
    }

    #[test]
    fn test_builtin_adapters_are_idempotent() {
        assert_eq!(roundtrip(42i64), 42);
        assert_eq!(roundtrip(u64::MAX), u64::MAX);
        assert_eq!(roundtrip(0.1f64 + 0.2).to_bits(), (0.1f64 + 0.2).to_bits());
        assert_eq!(roundtrip(String::new()), "");
        assert_eq!(roundtrip(Vec::<f64>::new()), Vec::<f64>::new());
        assert_eq!(roundtrip(vec![[1.0, 2.0, 3.0]; 2]), vec![[1.0, 2.0, 3.0]; 2]);
        assert_eq!(roundtrip(BTreeMap::<String, f64>::new()), BTreeMap::new());
        assert_eq!(
            roundtrip(json!({"nested": [[], {}, [1, [2]]]})),
            json!({"nested": [[], {}, [1, [2]]]})
        );
    }

    #[test]
    fn test_non_finite_float_is_rejected() {
        assert!(matches!(
            f64::NAN.to_representation(),
            Err(CheckpointError::Validation(_))
        ));
        assert!(vec![1.0, f64::INFINITY].to_representation().is_err());
    }

    #[test]
    fn test_custom_type_via_macro() {
        let value = Observable {
            name: "msd".into(),
            samples: vec![0.0, 0.5],
        };
        assert_eq!(roundtrip(value.clone()), value);
    }

    #[test]
    fn test_register_is_idempotent_per_type() {
        let mut set = AdapterSet::with_builtins();
        assert!(!set.supports::<Observable>());
        set.register::<Observable>().unwrap();
        set.register::<Observable>().unwrap();
        assert!(set.supports::<Observable>());
        assert!(set.tags().any(|t| t == "observable"));
    }

    #[test]
    fn test_tag_clash_is_duplicate_name() {
        let mut set = AdapterSet::with_builtins();
        assert!(matches!(
            set.register::<Clash>(),
            Err(CheckpointError::DuplicateName(tag)) if tag == "f64"
        ));
    }

    #[test]
    fn test_actor_factories() {
        let set = AdapterSet::with_builtins();
        assert!(set.supports_actor("p3m"));
        assert!(!set.supports_actor("mmm2d"));
        let p3m = P3m::new(1.0, 1e-3, [8; 3], 5, 2.0, 1.0);
        let actor = set.build_actor("p3m", p3m.params().unwrap()).unwrap();
        assert_eq!(actor.type_tag(), "p3m");
        assert!(!actor.is_bound());

        assert!(matches!(
            set.build_actor("mmm2d", Value::Null),
            Err(CheckpointError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_scope_requires_declared_context() {
        let ctx = SimulationContext::new(SystemParams::default(), 1).unwrap();
        let registry = Registry::new();
        let requires = Requirements::none();
        let scope = RestoreScope::new("handle", &requires, &ctx, &registry);
        assert!(scope.context().is_err());
        assert!(scope.entry::<f64>("other").is_err());
    }

    #[test]
    fn test_dangling_actor_handle_is_corrupt() {
        let ctx = SimulationContext::new(SystemParams::default(), 1).unwrap();
        let registry = Registry::new();
        let handle = ActorHandle {
            slot: 3,
            type_tag: "p3m".into(),
        };
        let requires = handle.requires();
        let scope = RestoreScope::new("solver", &requires, &ctx, &registry);
        assert!(matches!(
            ActorHandle::from_representation(handle.to_representation().unwrap(), &scope),
            Err(CheckpointError::CorruptSnapshot(_))
        ));
    }
}
