//! The in-memory "instance" side of the (de)serialization engine.
//!
//! Because class-system integration is out of scope, the engine cannot
//! lean on host reflection to get and set arbitrary named properties on
//! an arbitrary domain type the way a dynamically-typed host would.
//! [`Instance`] is the seam hosts cross to plug their own types in; it is
//! the same shape as type-erased component storage, just addressed by
//! property name instead of by type.

use std::any::Any;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;

/// An in-memory property value.
///
/// The wire format only ever knows plain JSON, but the original
/// JS object model distinguishes a live `Date` instance from a plain
/// number at runtime — that distinction is exactly what
/// [`crate::prop_schema::date`] inspects. It also lets a property hold a
/// live nested instance (`object()`/`reference()`) or a homogeneous
/// collection of such values (`list()`/`map()`) rather than flattening
/// everything to JSON before it ever reaches `Instance::set_prop`.
#[derive(Debug, Clone)]
pub enum PropValue {
    /// A plain JSON-compatible value (the common case).
    Json(Value),
    /// A date/time instance, as `date()` expects.
    DateTime(DateTime<Utc>),
    /// A nested instance, as produced by `object()` or resolved by `reference()`.
    Instance(Arc<TargetHandle>),
    /// A homogeneous ordered collection, as produced by `list()`.
    List(Vec<PropValue>),
    /// A string-keyed collection, as produced by `map()`.
    Map(IndexMap<String, PropValue>),
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropValue::Json(a), PropValue::Json(b)) => a == b,
            (PropValue::DateTime(a), PropValue::DateTime(b)) => a == b,
            (PropValue::Instance(a), PropValue::Instance(b)) => Arc::ptr_eq(a, b),
            (PropValue::List(a), PropValue::List(b)) => a == b,
            (PropValue::Map(a), PropValue::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PropValue {
    /// Borrow the JSON payload, if this is the [`PropValue::Json`] variant.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            PropValue::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Borrow the date/time payload, if this is the [`PropValue::DateTime`] variant.
    pub fn as_date_time(&self) -> Option<&DateTime<Utc>> {
        match self {
            PropValue::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    /// Borrow the nested instance handle, if this is the [`PropValue::Instance`] variant.
    pub fn as_instance(&self) -> Option<&Arc<TargetHandle>> {
        match self {
            PropValue::Instance(handle) => Some(handle),
            _ => None,
        }
    }

    /// Borrow the element list, if this is the [`PropValue::List`] variant.
    pub fn as_list(&self) -> Option<&[PropValue]> {
        match self {
            PropValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the keyed map, if this is the [`PropValue::Map`] variant.
    pub fn as_map(&self) -> Option<&IndexMap<String, PropValue>> {
        match self {
            PropValue::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// True for plain JSON primitives (everything except arrays and objects).
    /// Every other variant (`DateTime`, `Instance`, `List`, `Map`) is never
    /// primitive — each is only ever handled through its own matching
    /// PropSchema, never through `primitive()`.
    pub fn is_primitive(&self) -> bool {
        matches!(self, PropValue::Json(v) if is_primitive(v))
    }
}

impl From<Value> for PropValue {
    fn from(value: Value) -> Self {
        PropValue::Json(value)
    }
}

impl From<DateTime<Utc>> for PropValue {
    fn from(dt: DateTime<Utc>) -> Self {
        PropValue::DateTime(dt)
    }
}

/// A mutably shared target instance: the engine needs to hand out
/// references to an in-progress object (e.g. to publish it as the
/// resolved value of an `identifier`, or to let a `reference()` awaiter
/// receive it) before its own property walk has finished, so the target
/// can't simply be owned by one call frame.
pub struct TargetHandle {
    inner: Mutex<Box<dyn Instance>>,
}

impl TargetHandle {
    /// Wrap a freshly constructed instance for shared, mutate-in-place access.
    pub fn new(instance: Box<dyn Instance>) -> Self {
        Self {
            inner: Mutex::new(instance),
        }
    }

    /// Read a property from the wrapped instance.
    pub fn get_prop(&self, name: &str) -> Option<PropValue> {
        self.inner
            .lock()
            .expect("target handle lock poisoned")
            .get_prop(name)
    }

    /// Set a property on the wrapped instance.
    pub fn set_prop(&self, name: &str, value: PropValue) {
        self.inner
            .lock()
            .expect("target handle lock poisoned")
            .set_prop(name, value);
    }

    /// Own keys of the wrapped instance (for the `*` catch-all entry).
    pub fn own_keys(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("target handle lock poisoned")
            .own_keys()
    }

    /// Run a closure against the wrapped instance (e.g. for downcasting).
    pub fn with_instance<R>(&self, f: impl FnOnce(&dyn Instance) -> R) -> R {
        f(&**self.inner.lock().expect("target handle lock poisoned"))
    }

    /// Unwrap back to the owned boxed instance, once no other references remain.
    pub fn try_into_inner(self: Arc<Self>) -> Result<Box<dyn Instance>, Arc<Self>> {
        Arc::try_unwrap(self).map(|handle| handle.inner.into_inner().expect("target handle lock poisoned"))
    }
}

/// A target type the engine can read and write properties on by name.
///
/// A host's own `struct Foo { .. }` implements this by hand (there is no
/// derive macro; see the crate's Non-goals) and supplies a matching
/// `factory` to its [`crate::model_schema::ModelSchema`]. [`DynamicObject`]
/// is the built-in implementation used by `createSimpleSchema`.
pub trait Instance: Any + Send + Sync {
    /// Read a property's current value. `None` means the property is
    /// absent (distinct from being present and JSON `null`).
    fn get_prop(&self, name: &str) -> Option<PropValue>;

    /// Set a property to a value.
    fn set_prop(&mut self, name: &str, value: PropValue);

    /// Own, enumerable keys not backed by a declared property schema are
    /// still visible to the `*` catch-all entry; implementors that have a
    /// genuinely open-ended key set (like [`DynamicObject`]) override this.
    /// The default is an empty list, appropriate for a fixed-shape struct.
    fn own_keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// Downcast to `&dyn Any` for schema-registry lookups keyed by
    /// [`std::any::TypeId`].
    fn as_any(&self) -> &dyn Any;
}

impl dyn Instance {
    /// Attempt to downcast a shared reference to a concrete instance type.
    pub fn downcast_ref<T: Instance>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// A plain, untyped property bag: the Rust stand-in for a JS plain object.
///
/// Backed by an [`IndexMap`] so that own-key iteration order matches
/// insertion order, mirroring how a JS object's own enumerable keys are
/// iterated — load-bearing for the `*` catch-all entry and for
/// `map()`'s key-order guarantee.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicObject {
    props: IndexMap<String, PropValue>,
}

impl DynamicObject {
    /// Construct an empty object. This is the `factory` that
    /// `createSimpleSchema` hands out.
    pub fn new() -> Self {
        Self {
            props: IndexMap::new(),
        }
    }

    /// Iterate over all own properties in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.props.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of own properties.
    pub fn len(&self) -> usize {
        self.props.len()
    }

    /// Whether this object has no own properties.
    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}

impl Instance for DynamicObject {
    fn get_prop(&self, name: &str) -> Option<PropValue> {
        self.props.get(name).cloned()
    }

    fn set_prop(&mut self, name: &str, value: PropValue) {
        self.props.insert(name.to_string(), value);
    }

    fn own_keys(&self) -> Vec<String> {
        self.props.keys().cloned().collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Returns true for JSON values the engine treats as "primitive": every
/// `serde_json::Value` variant except `Array` and `Object`.
pub fn is_primitive(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// A short, human-readable name for a JSON value's shape, for error messages.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A short, human-readable name for a property value's shape, for error
/// messages raised outside the plain-JSON path (`date`/`object`/`list`/`map`).
pub fn describe_prop_value(value: &PropValue) -> &'static str {
    match value {
        PropValue::Json(v) => json_kind(v),
        PropValue::DateTime(_) => "date",
        PropValue::Instance(_) => "instance",
        PropValue::List(_) => "list",
        PropValue::Map(_) => "map",
    }
}

/// Canonicalizes a primitive JSON value into the string key the reference
/// resolver's `pending_refs`/`resolved_refs` tables are keyed by.
/// `null`, arrays, and objects are never valid identifiers.
pub fn identifier_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dynamic_object_round_trips_properties() {
        let mut obj = DynamicObject::new();
        obj.set_prop("title", json!("hello").into());
        obj.set_prop("done", json!(false).into());

        assert_eq!(obj.get_prop("title"), Some(PropValue::Json(json!("hello"))));
        assert_eq!(obj.get_prop("done"), Some(PropValue::Json(json!(false))));
        assert_eq!(obj.get_prop("missing"), None);
    }

    #[test]
    fn dynamic_object_preserves_insertion_order() {
        let mut obj = DynamicObject::new();
        obj.set_prop("z", json!(1).into());
        obj.set_prop("a", json!(2).into());
        obj.set_prop("m", json!(3).into());

        let keys: Vec<&str> = obj.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
        assert_eq!(obj.own_keys(), vec!["z", "a", "m"]);
    }

    #[test]
    fn downcast_ref_recovers_concrete_type() {
        let obj: Box<dyn Instance> = Box::new(DynamicObject::new());
        let recovered = (*obj).downcast_ref::<DynamicObject>();
        assert!(recovered.is_some());
    }

    #[test]
    fn is_primitive_classifies_json_shapes() {
        assert!(is_primitive(&json!(1)));
        assert!(is_primitive(&json!("s")));
        assert!(is_primitive(&json!(true)));
        assert!(is_primitive(&Value::Null));
        assert!(!is_primitive(&json!([1, 2])));
        assert!(!is_primitive(&json!({"a": 1})));
    }

    #[test]
    fn date_time_value_is_not_primitive() {
        let dt = PropValue::DateTime(Utc::now());
        assert!(!dt.is_primitive());
        let num: PropValue = json!(1_700_000_000_000i64).into();
        assert!(num.is_primitive());
    }

    #[test]
    fn target_handle_shares_mutations_across_clones() {
        let handle = Arc::new(TargetHandle::new(Box::new(DynamicObject::new())));
        handle.set_prop("title", json!("hello").into());

        let other = Arc::clone(&handle);
        assert_eq!(other.get_prop("title"), Some(PropValue::Json(json!("hello"))));
    }

    #[test]
    fn instance_prop_value_is_not_primitive_and_compares_by_identity() {
        let a = Arc::new(TargetHandle::new(Box::new(DynamicObject::new())));
        let b = Arc::new(TargetHandle::new(Box::new(DynamicObject::new())));

        let pa = PropValue::Instance(Arc::clone(&a));
        let pb_same = PropValue::Instance(Arc::clone(&a));
        let pb_other = PropValue::Instance(b);

        assert!(!pa.is_primitive());
        assert_eq!(pa, pb_same);
        assert_ne!(pa, pb_other);
    }
}
