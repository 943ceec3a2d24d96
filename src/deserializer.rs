//! Walks a [`ModelSchema`] against a JSON tree and produces a live
//! instance, asynchronously (spec.md §4.4). `update` reuses an existing
//! target instead of constructing a fresh one.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::context::{Context, CustomArgs};
use crate::model_schema::{get_default_model_schema, ModelSchema, PropEntry};
use crate::value::{json_kind, DynamicObject, Instance, TargetHandle};
use crate::error::DeserializeError;

/// The outcome of a `deserialize` call: mirrors the JS `(null, null)` /
/// single-instance / array-of-instances trichotomy, since a JSON value at
/// any position (top level or array element) may itself be `null`.
#[derive(Clone)]
pub enum Deserialized {
    /// The JSON value was `null`.
    Null,
    /// A single live instance.
    Instance(Arc<TargetHandle>),
    /// A JSON array, deserialized element-wise.
    List(Vec<Deserialized>),
}

impl Deserialized {
    /// Borrow the instance handle, if this is the [`Deserialized::Instance`] variant.
    pub fn as_instance(&self) -> Option<&Arc<TargetHandle>> {
        match self {
            Deserialized::Instance(handle) => Some(handle),
            _ => None,
        }
    }

    /// Borrow the element list, if this is the [`Deserialized::List`] variant.
    pub fn as_list(&self) -> Option<&[Deserialized]> {
        match self {
            Deserialized::List(items) => Some(items),
            _ => None,
        }
    }
}

/// `deserialize(schema, json, customArgs?)` — every element of a JSON
/// array is deserialized against the same `schema`.
#[tracing::instrument(skip(schema, json, args))]
pub async fn deserialize(
    schema: ModelSchema,
    json: Value,
    args: Option<CustomArgs>,
) -> Result<Deserialized, DeserializeError> {
    if let Value::Array(items) = json {
        let entries = items.into_iter().map(|item| (schema.clone(), item)).collect();
        return deserialize_array(entries, args).await;
    }
    deserialize_root(schema, json, args).await
}

/// `deserialize` over a JSON array whose elements may each need a
/// *different* schema — the Rust realization of spec.md's testable
/// scenario "a top-level list of a union schema": every element still
/// resolves identifiers/references against one shared document-level
/// Context, which is what makes order-independent reference resolution
/// across elements possible in the first place.
#[tracing::instrument(skip(entries, args))]
pub async fn deserialize_many(
    entries: Vec<(ModelSchema, Value)>,
    args: Option<CustomArgs>,
) -> Result<Vec<Deserialized>, DeserializeError> {
    match deserialize_array(entries, args).await? {
        Deserialized::List(items) => Ok(items),
        other => Ok(vec![other]),
    }
}

async fn deserialize_array(
    entries: Vec<(ModelSchema, Value)>,
    args: Option<CustomArgs>,
) -> Result<Deserialized, DeserializeError> {
    if entries.is_empty() {
        return Ok(Deserialized::List(Vec::new()));
    }

    let (tx, rx) = oneshot::channel();
    let root_schema = entries[0].0.clone();
    let placeholder = Arc::new(TargetHandle::new(Box::new(DynamicObject::new())));
    let root_ctx = Context::new_root(root_schema, placeholder, Value::Null, args, tx);
    // Held until every element has had its own instance (and lock) created,
    // so the root cannot settle mid-walk across elements.
    let outer_lock = root_ctx.create_callback();

    let mut results = Vec::with_capacity(entries.len());
    for (schema, json) in entries {
        results.push(spawn_instance(schema, json, &root_ctx));
    }
    outer_lock.succeed();

    rx.await.expect("deserialization completion sender dropped")?;
    Ok(Deserialized::List(results))
}

async fn deserialize_root(
    schema: ModelSchema,
    json: Value,
    args: Option<CustomArgs>,
) -> Result<Deserialized, DeserializeError> {
    if json.is_null() {
        return Ok(Deserialized::Null);
    }

    let (tx, rx) = oneshot::channel();
    let placeholder = Arc::new(TargetHandle::new(Box::new(DynamicObject::new())));
    let ctx = Context::new_root(schema.clone(), placeholder, json.clone(), args, tx);

    let Some(raw_target) = schema.new_instance(&ctx) else {
        return Err(DeserializeError::FactoryFailed);
    };
    let target = Arc::new(TargetHandle::new(raw_target));
    let ctx = ctx.with_target(Arc::clone(&target));

    populate_instance(schema, json, ctx);

    rx.await.expect("deserialization completion sender dropped")?;
    Ok(Deserialized::Instance(target))
}

/// Builds one nested instance (for `object()`) synchronously, returning
/// the handle immediately while its own property walk continues via
/// tasks tied to `parent`'s shared root bookkeeping.
pub(crate) fn deserialize_nested(
    schema: ModelSchema,
    json: Value,
    parent: &Context,
) -> Result<Arc<TargetHandle>, DeserializeError> {
    let placeholder = Arc::new(TargetHandle::new(Box::new(DynamicObject::new())));
    let ctx = parent.child(schema.clone(), placeholder, json.clone());

    let Some(raw_target) = schema.new_instance(&ctx) else {
        return Err(DeserializeError::FactoryFailed);
    };
    let target = Arc::new(TargetHandle::new(raw_target));
    let ctx = ctx.with_target(Arc::clone(&target));

    populate_instance(schema, json, ctx);
    Ok(target)
}

fn spawn_instance(schema: ModelSchema, json: Value, parent: &Context) -> Deserialized {
    if json.is_null() {
        return Deserialized::Null;
    }
    match deserialize_nested(schema, json, parent) {
        Ok(target) => Deserialized::Instance(target),
        Err(err) => {
            let guard = parent.create_callback();
            guard.fail(err);
            Deserialized::Null
        }
    }
}

/// `update(schema?, target, json, customArgs?)` — reuses `target` instead
/// of constructing a fresh one via the schema's factory; properties absent
/// from `json` are left untouched.
#[tracing::instrument(skip(schema, target, json, args))]
pub async fn update(
    schema: Option<ModelSchema>,
    target: Arc<TargetHandle>,
    json: Value,
    args: Option<CustomArgs>,
) -> Result<(), DeserializeError> {
    let schema = match schema {
        Some(schema) => schema,
        None => target
            .with_instance(get_default_model_schema)
            .ok_or(DeserializeError::FactoryFailed)?,
    };

    let (tx, rx) = oneshot::channel();
    let ctx = Context::new_root(schema.clone(), target, json.clone(), args, tx);
    populate_instance(schema, json, ctx);
    rx.await.expect("deserialization completion sender dropped")
}

/// The shared per-instance property walk (spec.md §4.4 steps 2-6), used by
/// the root entry points above and by `deserialize_nested`/`update`.
///
/// Uses [`ModelSchema::effective_props`] (child overwrites parent for a
/// shared name) rather than literally re-walking each ancestor's own
/// `props`, matching the serializer's resolution of the same Open
/// Question (`DESIGN.md`).
fn populate_instance(schema: ModelSchema, json: Value, ctx: Context) {
    // The "lock callback" trick: acquired before any property callback is
    // created, released only after every property has had its own callback
    // issued. This is what prevents the root Context from settling mid-walk,
    // between the first property's callback firing and the last one being
    // registered.
    let lock = ctx.create_callback();

    let json_obj = match json {
        Value::Object(map) => map,
        other => {
            lock.fail(DeserializeError::ShapeMismatch {
                property: String::new(),
                expected: "object",
                found: json_kind(&other),
            });
            return;
        }
    };

    let props = schema.effective_props();
    let claimed: HashSet<String> = props
        .iter()
        .filter(|(name, _)| name.as_str() != "*")
        .map(|(name, entry)| match entry {
            PropEntry::Schema(prop_schema) => prop_schema.jsonname().unwrap_or(name).to_string(),
            _ => name.clone(),
        })
        .collect();

    for (name, entry) in props {
        if name == "*" {
            if let PropEntry::Primitive = entry {
                for (key, value) in &json_obj {
                    if claimed.contains(key) {
                        continue;
                    }
                    if !crate::value::is_primitive(value) {
                        let guard = ctx.create_callback();
                        guard.fail(DeserializeError::ShapeMismatch {
                            property: key.clone(),
                            expected: "primitive",
                            found: json_kind(value),
                        });
                        continue;
                    }
                    ctx.target().set_prop(key, value.clone().into());
                }
            }
            continue;
        }

        let prop_schema = match entry {
            PropEntry::Skip => continue,
            PropEntry::Primitive => crate::prop_schema::primitive(),
            PropEntry::Schema(prop_schema) => prop_schema,
        };
        let json_key = prop_schema.jsonname().unwrap_or(name.as_str()).to_string();
        let Some(value) = json_obj.get(&json_key).cloned() else {
            continue;
        };

        let guard = ctx.create_callback();
        let task_ctx = ctx.clone();
        let target = Arc::clone(ctx.target());
        let current = target.get_prop(&name);
        let prop_name = name.clone();

        tokio::spawn(async move {
            match prop_schema.deserialize(value, task_ctx, current).await {
                Ok(decoded) => {
                    target.set_prop(&prop_name, decoded);
                    guard.succeed();
                }
                Err(err) => guard.fail(err.with_property(&prop_name)),
            }
        });
    }

    lock.succeed();
}
