//! `ModelSchema` and its registry: associates a user type with the
//! schema describing how to move it to and from JSON.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use indexmap::IndexMap;

use crate::context::Context;
use crate::error::ShapeError;
use crate::prop_schema::PropSchema;
use crate::value::Instance;

/// One entry in a [`ModelSchema`]'s `props` map: the JS `true | false |
/// PropSchema` trichotomy realized as a proper sum type.
#[derive(Clone)]
pub enum PropEntry {
    /// Shorthand for `primitive()`.
    Primitive,
    /// Skip this property entirely (serialize and deserialize ignore it).
    Skip,
    /// A fully composed property schema.
    Schema(PropSchema),
}

impl From<bool> for PropEntry {
    fn from(flag: bool) -> Self {
        if flag {
            PropEntry::Primitive
        } else {
            PropEntry::Skip
        }
    }
}

impl From<PropSchema> for PropEntry {
    fn from(schema: PropSchema) -> Self {
        PropEntry::Schema(schema)
    }
}

/// `serializable(props, name, true | false | propSchema)` — the non-magic
/// stand-in for a decorator/attribute hook (spec.md §6). `ModelSchema`s are
/// immutable once built here, so the granularity this engine offers moves
/// from "mutate an already-registered schema in place" to "append one entry
/// to the `props` map you are about to hand to [`ModelSchema::create_simple`]
/// or [`ModelSchema::create`]".
pub fn serializable(props: &mut IndexMap<String, PropEntry>, name: impl Into<String>, entry: impl Into<PropEntry>) {
    props.insert(name.into(), entry.into());
}

/// Produces a fresh target [`Instance`] for a [`ModelSchema`], given the
/// [`Context`] driving the deserialization it is being created for.
pub type Factory = Arc<dyn Fn(&Context) -> Option<Box<dyn Instance>> + Send + Sync>;

struct ModelSchemaInner {
    factory: Factory,
    props: IndexMap<String, PropEntry>,
    extends: Option<ModelSchema>,
    target_class: Option<TypeId>,
    name: String,
}

/// Describes how an instance type maps to and from a JSON object:
/// a factory that produces fresh instances, a `props` map of per-property
/// strategies, and an optional parent schema via `extends`.
///
/// Cheap to clone: internally `Arc`-based, so PropSchemas (e.g. `object()`,
/// `reference()`) can close over a `ModelSchema` and schemas can form
/// cyclic graphs without unbounded duplication.
#[derive(Clone)]
pub struct ModelSchema(Arc<ModelSchemaInner>);

impl fmt::Debug for ModelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSchema")
            .field("name", &self.0.name)
            .field("props", &self.0.props.keys().collect::<Vec<_>>())
            .field("extends", &self.0.extends.as_ref().map(|s| s.0.name.clone()))
            .finish()
    }
}

impl PartialEq for ModelSchema {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for ModelSchema {}

/// Marker type standing in for JS's root `Object` type. Nothing may
/// register a default schema against it: `createModelSchema` always
/// rejects `RootObjectMarker` as a target class.
pub struct RootObjectMarker;

impl Instance for RootObjectMarker {
    fn get_prop(&self, _name: &str) -> Option<crate::value::PropValue> {
        None
    }
    fn set_prop(&mut self, _name: &str, _value: crate::value::PropValue) {}
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn root_target_class() -> TypeId {
    TypeId::of::<RootObjectMarker>()
}

impl ModelSchema {
    fn validate_props(props: &IndexMap<String, PropEntry>) -> Result<(), ShapeError> {
        let mut identifier_seen: Option<String> = None;
        for (name, entry) in props {
            if name == "*" {
                if !matches!(entry, PropEntry::Primitive) {
                    return Err(ShapeError::InvalidCatchAll);
                }
                continue;
            }
            if let PropEntry::Schema(schema) = entry {
                if schema.is_identifier() {
                    if let Some(existing) = &identifier_seen {
                        return Err(ShapeError::DuplicateIdentifier {
                            existing: existing.clone(),
                            new: name.clone(),
                        });
                    }
                    identifier_seen = Some(name.clone());
                }
            }
        }
        Ok(())
    }

    /// `createSimpleSchema(props)` — a schema whose factory produces a
    /// fresh [`crate::value::DynamicObject`].
    pub fn create_simple(props: IndexMap<String, PropEntry>) -> Result<Self, ShapeError> {
        Self::validate_props(&props)?;
        Ok(Self(Arc::new(ModelSchemaInner {
            factory: Arc::new(|_ctx| Some(Box::new(crate::value::DynamicObject::new()))),
            props,
            extends: None,
            target_class: None,
            name: "<simple>".to_string(),
        })))
    }

    /// `createModelSchema(targetClass, props, factory?)`.
    ///
    /// Rust has no runtime class hierarchy to inspect, so unlike the
    /// original this does not *discover* a parent schema automatically;
    /// the caller passes it explicitly as `extends` (typically the result
    /// of a prior `get_default_model_schema_for::<Parent>()` lookup). This
    /// is registered as the default schema for `T`.
    pub fn create<T: Instance + 'static>(
        name: impl Into<String>,
        props: IndexMap<String, PropEntry>,
        extends: Option<ModelSchema>,
        factory: Factory,
    ) -> Result<Self, ShapeError> {
        Self::validate_props(&props)?;
        let target_class = TypeId::of::<T>();
        if target_class == root_target_class() {
            return Err(ShapeError::RootTargetClass);
        }
        let schema = Self(Arc::new(ModelSchemaInner {
            factory,
            props,
            extends,
            target_class: Some(target_class),
            name: name.into(),
        }));
        set_default_model_schema_by_type_id(target_class, schema.clone());
        Ok(schema)
    }

    /// Name this schema was registered/created under (for diagnostics only).
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The parent schema, if any.
    pub fn extends(&self) -> Option<&ModelSchema> {
        self.0.extends.as_ref()
    }

    /// This schema's own `props`, not merged with any parent's.
    pub fn own_props(&self) -> &IndexMap<String, PropEntry> {
        &self.0.props
    }

    /// Produce a fresh target instance via this schema's factory.
    pub fn new_instance(&self, context: &Context) -> Option<Box<dyn Instance>> {
        (self.0.factory)(context)
    }

    /// `props` merged with every ancestor in the `extends` chain, outer
    /// (base) first so that a child's entry for the same name overwrites
    /// the parent's — resolving the spec's open question on duplicate
    /// names as "allowed, child wins".
    pub fn effective_props(&self) -> IndexMap<String, PropEntry> {
        let mut merged = IndexMap::new();
        if let Some(parent) = &self.0.extends {
            merged.extend(parent.effective_props());
        }
        for (name, entry) in &self.0.props {
            merged.insert(name.clone(), entry.clone());
        }
        merged
    }

    /// The property name flagged `identifier` anywhere in the `extends`
    /// chain, if any. At most one may exist (enforced at construction).
    pub fn identifier_prop_name(&self) -> Option<String> {
        self.effective_props().into_iter().find_map(|(name, entry)| {
            match entry {
                PropEntry::Schema(schema) if schema.is_identifier() => Some(name),
                _ => None,
            }
        })
    }

    /// `A.is_assignable_to(B)` iff walking the `extends` chain starting at
    /// `A` (inclusive) reaches `B`. References do not narrow on subclass:
    /// a resolver accepts any descendant of the requested schema.
    pub fn is_assignable_to(&self, other: &ModelSchema) -> bool {
        if self == other {
            return true;
        }
        match &self.0.extends {
            Some(parent) => parent.is_assignable_to(other),
            None => false,
        }
    }
}

/// A deferred handle to a [`ModelSchema`], resolved lazily at first use.
///
/// `object(schemaRef)` and `reference(schemaRef, ..)` must tolerate the
/// referenced schema being undefined at construction time, to permit
/// mutually- or self-referential schema graphs (e.g. a `Todo` schema
/// whose `subs` property is `list(object(todo_schema_cell))`, where
/// `todo_schema_cell` is only filled in after the enclosing `ModelSchema`
/// itself is constructed).
#[derive(Clone)]
pub struct SchemaCell(Arc<RwLock<Option<ModelSchema>>>);

impl SchemaCell {
    /// An empty cell, to be filled in with [`SchemaCell::set`] once the
    /// schema it refers to has been constructed.
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(None)))
    }

    /// A cell already resolved to `schema`.
    pub fn resolved(schema: ModelSchema) -> Self {
        let cell = Self::new();
        cell.set(schema);
        cell
    }

    /// Fill in (or replace) the schema this cell resolves to.
    pub fn set(&self, schema: ModelSchema) {
        *self.0.write().expect("schema cell lock poisoned") = Some(schema);
    }

    /// Resolve to the schema. Panics if called before [`SchemaCell::set`]
    /// — a genuinely unresolved cyclic reference is a construction bug,
    /// not a recoverable runtime condition.
    pub fn get(&self) -> ModelSchema {
        self.0
            .read()
            .expect("schema cell lock poisoned")
            .clone()
            .expect("schema cell read before being resolved")
    }
}

impl Default for SchemaCell {
    fn default() -> Self {
        Self::new()
    }
}

type Registry = RwLock<HashMap<TypeId, ModelSchema>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

fn set_default_model_schema_by_type_id(type_id: TypeId, schema: ModelSchema) {
    registry()
        .write()
        .expect("model schema registry lock poisoned")
        .insert(type_id, schema);
}

/// `setDefaultModelSchema(clazz, schema)` — associate `schema` with type `T`.
pub fn set_default_model_schema<T: 'static>(schema: ModelSchema) {
    set_default_model_schema_by_type_id(TypeId::of::<T>(), schema);
}

/// `getDefaultModelSchema(x)` resolved from a type parameter.
pub fn get_default_model_schema_for<T: 'static>() -> Option<ModelSchema> {
    registry()
        .read()
        .expect("model schema registry lock poisoned")
        .get(&TypeId::of::<T>())
        .cloned()
}

/// `getDefaultModelSchema(x)` resolved from a live instance, via its
/// runtime `TypeId`. Returns `None` if no schema was ever registered for
/// that concrete type.
pub fn get_default_model_schema(instance: &dyn Instance) -> Option<ModelSchema> {
    registry()
        .read()
        .expect("model schema registry lock poisoned")
        .get(&instance.as_any().type_id())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prop_schema::primitive;
    use crate::value::DynamicObject;

    #[test]
    fn create_simple_schema_builds_dynamic_object_factory() {
        let mut props = IndexMap::new();
        props.insert("title".to_string(), PropEntry::Primitive);
        let schema = ModelSchema::create_simple(props).unwrap();

        let ctx = Context::for_test();
        let instance = schema.new_instance(&ctx).unwrap();
        assert!(instance.downcast_ref::<DynamicObject>().is_some());
    }

    #[test]
    fn catch_all_entry_must_be_primitive() {
        let mut props = IndexMap::new();
        props.insert("*".to_string(), PropEntry::Skip);
        let err = ModelSchema::create_simple(props).unwrap_err();
        assert!(matches!(err, ShapeError::InvalidCatchAll));
    }

    #[test]
    fn serializable_appends_bool_and_schema_entries() {
        let mut props = IndexMap::new();
        serializable(&mut props, "title", true);
        serializable(&mut props, "secret", false);
        serializable(&mut props, "at", crate::prop_schema::date());

        assert!(matches!(props.get("title"), Some(PropEntry::Primitive)));
        assert!(matches!(props.get("secret"), Some(PropEntry::Skip)));
        assert!(matches!(props.get("at"), Some(PropEntry::Schema(_))));
    }

    #[test]
    fn duplicate_identifiers_are_rejected() {
        let mut props = IndexMap::new();
        props.insert("uuid".to_string(), PropEntry::Schema(crate::prop_schema::identifier(None)));
        props.insert("id".to_string(), PropEntry::Schema(crate::prop_schema::identifier(None)));
        let err = ModelSchema::create_simple(props).unwrap_err();
        assert!(matches!(err, ShapeError::DuplicateIdentifier { .. }));
    }

    #[test]
    fn extends_chain_merges_with_child_precedence() {
        let mut base_props = IndexMap::new();
        base_props.insert("name".to_string(), PropEntry::Primitive);
        base_props.insert("shared".to_string(), PropEntry::Primitive);
        let base = ModelSchema::create_simple(base_props).unwrap();

        let mut child_props = IndexMap::new();
        child_props.insert("shared".to_string(), PropEntry::Schema(primitive()));
        child_props.insert("age".to_string(), PropEntry::Primitive);
        let child = ModelSchema::create::<DynamicObject>(
            "Child",
            child_props,
            Some(base.clone()),
            Arc::new(|_ctx| Some(Box::new(DynamicObject::new()))),
        )
        .unwrap();

        let merged = child.effective_props();
        assert_eq!(
            merged.keys().cloned().collect::<Vec<_>>(),
            vec!["name".to_string(), "shared".to_string(), "age".to_string()]
        );
        assert!(matches!(merged.get("shared"), Some(PropEntry::Schema(_))));
    }

    #[test]
    fn assignability_walks_extends_chain() {
        let base = ModelSchema::create_simple(IndexMap::new()).unwrap();
        let mid = ModelSchema::create::<DynamicObject>(
            "Mid",
            IndexMap::new(),
            Some(base.clone()),
            Arc::new(|_ctx| Some(Box::new(DynamicObject::new()))),
        )
        .unwrap();
        let unrelated = ModelSchema::create_simple(IndexMap::new()).unwrap();

        assert!(mid.is_assignable_to(&base));
        assert!(mid.is_assignable_to(&mid));
        assert!(!base.is_assignable_to(&mid));
        assert!(!mid.is_assignable_to(&unrelated));
    }

    #[test]
    fn registry_round_trips_by_instance() {
        // A type private to this test, not shared with any other test's
        // registry registration: `DynamicObject` is reused across many
        // tests as a convenience factory target, and two tests racing to
        // register different default schemas for the same `TypeId` via
        // the process-global registry would be flaky.
        struct RegistryProbe(DynamicObject);
        impl Instance for RegistryProbe {
            fn get_prop(&self, name: &str) -> Option<crate::value::PropValue> {
                self.0.get_prop(name)
            }
            fn set_prop(&mut self, name: &str, value: crate::value::PropValue) {
                self.0.set_prop(name, value)
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }

        let schema = ModelSchema::create::<RegistryProbe>(
            "Registered",
            IndexMap::new(),
            None,
            Arc::new(|_ctx| Some(Box::new(RegistryProbe(DynamicObject::new())))),
        )
        .unwrap();

        let instance = RegistryProbe(DynamicObject::new());
        let found = get_default_model_schema(&instance).unwrap();
        assert_eq!(found, schema);
    }

    #[test]
    fn root_target_class_is_rejected() {
        let err = ModelSchema::create::<RootObjectMarker>(
            "Bad",
            IndexMap::new(),
            None,
            Arc::new(|_ctx| None),
        )
        .unwrap_err();
        assert!(matches!(err, ShapeError::RootTargetClass));
    }
}
