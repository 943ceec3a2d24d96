//! The composable property-schema algebra: `primitive`, `date`, `alias`,
//! `custom`, `object`, `list`, `map`, `identifier`, `reference`.
//!
//! Every constructor here returns an immutable [`PropSchema`] — a pair of
//! closures (serializer, deserializer) plus the `jsonname`/`identifier`
//! metadata the walking algorithms in [`crate::serializer`] and
//! [`crate::deserializer`] read. The deserializer side is `async` rather
//! than callback-based (see `SPEC_FULL.md` §4.2): ordinary properties
//! resolve as soon as their future is polled; only `reference()` actually
//! suspends, awaiting [`Context::resolve`] from a sibling's `identifier()`.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use futures::future::{join_all, BoxFuture};
use indexmap::IndexMap;
use serde_json::Value;

use crate::context::Context;
use crate::error::{DeserializeError, SerializeError, ShapeError};
use crate::model_schema::SchemaCell;
use crate::value::{identifier_key, is_primitive, json_kind, PropValue, TargetHandle};

/// `value -> json` for one property.
pub type SerializeFn = Arc<dyn Fn(&PropValue) -> Result<Value, SerializeError> + Send + Sync>;

/// `json -> value`, asynchronously, for one property. `current` is the
/// property's present value on the target (used by `map()`'s keyed-
/// container detection note; see module docs).
pub type DeserializeFn = Arc<
    dyn Fn(Value, Context, Option<PropValue>) -> BoxFuture<'static, Result<PropValue, DeserializeError>>
        + Send
        + Sync,
>;

/// A custom lookup used by `reference()`: resolves an identifier value to
/// the instance it names, however the host chooses (intra-document await,
/// a database round-trip, a cache, ...).
pub type LookupFn =
    Arc<dyn Fn(Value, Context) -> BoxFuture<'static, Result<PropValue, DeserializeError>> + Send + Sync>;

struct PropSchemaInner {
    serializer: SerializeFn,
    deserializer: DeserializeFn,
    jsonname: Option<String>,
    identifier: bool,
}

/// Describes how a single value, at one property position, moves to and
/// from its JSON counterpart. Immutable once constructed; cheap to clone
/// (`Arc`-backed), so the same `PropSchema` value can be shared across
/// every `ModelSchema` that uses it.
#[derive(Clone)]
pub struct PropSchema(Arc<PropSchemaInner>);

impl PropSchema {
    fn new(serializer: SerializeFn, deserializer: DeserializeFn, jsonname: Option<String>, identifier: bool) -> Self {
        Self(Arc::new(PropSchemaInner {
            serializer,
            deserializer,
            jsonname,
            identifier,
        }))
    }

    /// The JSON key this property serializes under, if it differs from its
    /// in-memory property name (set by `alias()`).
    pub fn jsonname(&self) -> Option<&str> {
        self.0.jsonname.as_deref()
    }

    /// Whether this property was constructed with `identifier()` (possibly
    /// through an `alias()` wrapper, which propagates the flag).
    pub fn is_identifier(&self) -> bool {
        self.0.identifier
    }

    /// Serialize one property value to JSON.
    pub fn serialize(&self, value: &PropValue) -> Result<Value, SerializeError> {
        (self.0.serializer)(value)
    }

    /// Deserialize one property's JSON value, given the Context driving
    /// the enclosing object's walk and the property's current value (if
    /// any) on the target.
    pub async fn deserialize(
        &self,
        json: Value,
        ctx: Context,
        current: Option<PropValue>,
    ) -> Result<PropValue, DeserializeError> {
        (self.0.deserializer)(json, ctx, current).await
    }

    pub(crate) fn serializer_fn(&self) -> &SerializeFn {
        &self.0.serializer
    }

    pub(crate) fn deserializer_fn(&self) -> &DeserializeFn {
        &self.0.deserializer
    }
}

/// `primitive()` — rejects anything that isn't a plain JSON primitive
/// (`null`, bool, number, or string) on both the serialize and
/// deserialize paths.
pub fn primitive() -> PropSchema {
    PropSchema::new(
        Arc::new(|value: &PropValue| match value {
            PropValue::Json(v) if is_primitive(v) => Ok(v.clone()),
            PropValue::Json(v) => Err(SerializeError::ExpectedPrimitive {
                property: String::new(),
                found: json_kind(v),
            }),
            _ => Err(SerializeError::ExpectedPrimitive {
                property: String::new(),
                found: "non-primitive value",
            }),
        }),
        Arc::new(|json: Value, _ctx: Context, _current: Option<PropValue>| {
            Box::pin(async move {
                if is_primitive(&json) {
                    Ok(PropValue::Json(json))
                } else {
                    Err(DeserializeError::ShapeMismatch {
                        property: String::new(),
                        expected: "primitive",
                        found: json_kind(&json),
                    })
                }
            })
        }),
        None,
        false,
    )
}

/// `date()` — `null` passes through unchanged; otherwise the value must
/// be a [`PropValue::DateTime`], encoded as integer milliseconds since
/// the epoch.
pub fn date() -> PropSchema {
    PropSchema::new(
        Arc::new(|value: &PropValue| match value {
            PropValue::Json(Value::Null) => Ok(Value::Null),
            PropValue::DateTime(dt) => Ok(Value::from(dt.timestamp_millis())),
            _ => Err(SerializeError::ExpectedDate { property: String::new() }),
        }),
        Arc::new(|json: Value, _ctx: Context, _current: Option<PropValue>| {
            Box::pin(async move {
                match json {
                    Value::Null => Ok(PropValue::Json(Value::Null)),
                    Value::Number(n) => {
                        let millis = n.as_i64().ok_or(DeserializeError::ShapeMismatch {
                            property: String::new(),
                            expected: "integer milliseconds since epoch",
                            found: "non-integer number",
                        })?;
                        let dt = Utc.timestamp_millis_opt(millis).single().ok_or(DeserializeError::ShapeMismatch {
                            property: String::new(),
                            expected: "valid millisecond timestamp",
                            found: "out-of-range number",
                        })?;
                        Ok(PropValue::DateTime(dt))
                    }
                    other => Err(DeserializeError::ShapeMismatch {
                        property: String::new(),
                        expected: "integer milliseconds since epoch",
                        found: json_kind(&other),
                    }),
                }
            })
        }),
        None,
        false,
    )
}

/// `alias(name, inner)` — renames a property's JSON key, delegating the
/// actual (de)serialization to `inner`. Propagates `inner`'s identifier
/// flag. Fails if `inner` is already aliased: aliasing must be the
/// outermost wrapper.
pub fn alias(name: impl Into<String>, inner: PropSchema) -> Result<PropSchema, ShapeError> {
    if let Some(existing) = inner.jsonname() {
        return Err(ShapeError::AlreadyAliased {
            existing: existing.to_string(),
        });
    }
    Ok(PropSchema::new(
        Arc::clone(inner.serializer_fn()),
        Arc::clone(inner.deserializer_fn()),
        Some(name.into()),
        inner.is_identifier(),
    ))
}

/// `custom(ser, deser)` — wraps two pure, infallible functions. Neither
/// side can fail: a custom serializer that needs to reject a value should
/// do so before handing it to `serialize`, and a custom deserializer that
/// needs validation should be composed with `primitive()`/`date()` first.
pub fn custom<S, D>(ser: S, deser: D) -> PropSchema
where
    S: Fn(&PropValue) -> Value + Send + Sync + 'static,
    D: Fn(Value) -> PropValue + Send + Sync + 'static,
{
    PropSchema::new(
        Arc::new(move |value: &PropValue| Ok(ser(value))),
        Arc::new(move |json: Value, _ctx: Context, _current: Option<PropValue>| {
            let value = deser(json);
            Box::pin(async move { Ok(value) })
        }),
        None,
        false,
    )
}

/// `object(schemaRef)` — nests a full [`crate::model_schema::ModelSchema`]
/// at this property position. `schema_cell` is resolved lazily (at each
/// call, not at `object()`-construction time) so that mutually- or
/// self-referential schema graphs can be built: fill the cell in after
/// constructing the schema it points at.
pub fn object(schema_cell: SchemaCell) -> PropSchema {
    let ser_cell = schema_cell.clone();
    let de_cell = schema_cell;
    PropSchema::new(
        Arc::new(move |value: &PropValue| match value {
            PropValue::Json(Value::Null) => Ok(Value::Null),
            PropValue::Instance(handle) => {
                let schema = ser_cell.get();
                handle.with_instance(|instance| crate::serializer::serialize_with_schema(&schema, instance))
            }
            _ => Err(SerializeError::Custom {
                property: String::new(),
                message: "object() expects a nested instance value".to_string(),
            }),
        }),
        Arc::new(move |json: Value, ctx: Context, _current: Option<PropValue>| {
            let schema = de_cell.get();
            Box::pin(async move {
                if json.is_null() {
                    return Ok(PropValue::Json(Value::Null));
                }
                let handle = crate::deserializer::deserialize_nested(schema, json, &ctx)?;
                Ok(PropValue::Instance(handle))
            })
        }),
        None,
        false,
    )
}

/// `list(inner)` — maps `inner` over a JSON array. Elements are
/// deserialized concurrently (`futures::future::join_all`); the aggregate
/// result array preserves input order regardless of which element's
/// future resolves first. An empty array completes immediately.
pub fn list(inner: PropSchema) -> PropSchema {
    let ser_inner = inner.clone();
    let de_inner = inner;
    PropSchema::new(
        Arc::new(move |value: &PropValue| match value {
            PropValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(ser_inner.serialize(item)?);
                }
                Ok(Value::Array(out))
            }
            _ => Err(SerializeError::ExpectedList { property: String::new() }),
        }),
        Arc::new(move |json: Value, ctx: Context, _current: Option<PropValue>| {
            let inner = de_inner.clone();
            Box::pin(async move {
                let items = match json {
                    Value::Array(items) => items,
                    other => {
                        return Err(DeserializeError::ShapeMismatch {
                            property: String::new(),
                            expected: "array",
                            found: json_kind(&other),
                        })
                    }
                };
                if items.is_empty() {
                    return Ok(PropValue::List(Vec::new()));
                }
                let futures = items.into_iter().map(|item| {
                    let inner = inner.clone();
                    let ctx = ctx.clone();
                    async move { inner.deserialize(item, ctx, None).await }
                });
                let mut out = Vec::with_capacity(futures.len());
                for result in join_all(futures).await {
                    out.push(result?);
                }
                Ok(PropValue::List(out))
            })
        }),
        None,
        false,
    )
}

/// `map(inner)` — a string-keyed collection of `inner` values. The engine
/// always produces/consumes a [`PropValue::Map`]; a host whose own field
/// is a keyed container (e.g. its own `HashMap`) converts to/from that
/// representation itself when implementing `Instance::set_prop`, since
/// there is no reflection-based way for the engine to detect a "keyed
/// container" capability the way the original's structural duck-typing
/// does. Key order in the deserialized result follows the input object's
/// key iteration order.
pub fn map(inner: PropSchema) -> PropSchema {
    let ser_inner = inner.clone();
    let de_inner = inner;
    PropSchema::new(
        Arc::new(move |value: &PropValue| match value {
            PropValue::Map(entries) => {
                let mut obj = serde_json::Map::new();
                for (key, value) in entries {
                    obj.insert(key.clone(), ser_inner.serialize(value)?);
                }
                Ok(Value::Object(obj))
            }
            _ => Err(SerializeError::Custom {
                property: String::new(),
                message: "map() expects a keyed value".to_string(),
            }),
        }),
        Arc::new(move |json: Value, ctx: Context, _current: Option<PropValue>| {
            let inner = de_inner.clone();
            Box::pin(async move {
                let obj = match json {
                    Value::Object(obj) => obj,
                    other => {
                        return Err(DeserializeError::ShapeMismatch {
                            property: String::new(),
                            expected: "object",
                            found: json_kind(&other),
                        })
                    }
                };
                let keys: Vec<String> = obj.keys().cloned().collect();
                let futures = obj.into_values().map(|value| {
                    let inner = inner.clone();
                    let ctx = ctx.clone();
                    async move { inner.deserialize(value, ctx, None).await }
                });
                let mut out = IndexMap::new();
                for (key, result) in keys.into_iter().zip(join_all(futures).await) {
                    out.insert(key, result?);
                }
                Ok(PropValue::Map(out))
            })
        }),
        None,
        false,
    )
}

/// `identifier(registerFn?)` — marks this property as the instance's
/// identity. On deserialize, publishes the current target to the root
/// Context's resolved-refs table under the decoded value *before*
/// returning, so that a sibling property processed later in the same
/// synchronous walk can immediately resolve a reference to it.
pub fn identifier(
    register_fn: Option<Arc<dyn Fn(&Value, &Arc<TargetHandle>, &Context) + Send + Sync>>,
) -> PropSchema {
    PropSchema::new(
        Arc::new(|value: &PropValue| match value {
            PropValue::Json(v) if is_primitive(v) => Ok(v.clone()),
            _ => Err(SerializeError::ExpectedPrimitive {
                property: String::new(),
                found: "non-primitive identifier value",
            }),
        }),
        Arc::new(move |json: Value, ctx: Context, _current: Option<PropValue>| {
            let register_fn = register_fn.clone();
            Box::pin(async move {
                if !is_primitive(&json) {
                    return Err(DeserializeError::ShapeMismatch {
                        property: String::new(),
                        expected: "primitive",
                        found: json_kind(&json),
                    });
                }
                let id = identifier_key(&json).ok_or(DeserializeError::ShapeMismatch {
                    property: String::new(),
                    expected: "non-null identifier",
                    found: "null",
                })?;
                let target = Arc::clone(ctx.target());
                ctx.resolve(ctx.model_schema().clone(), id, Arc::clone(&target));
                if let Some(register_fn) = register_fn {
                    register_fn(&json, &target, &ctx);
                }
                Ok(PropValue::Json(json))
            })
        }),
        None,
        true,
    )
}

/// `reference(target)` — shape 1: `target` is resolved to a
/// [`crate::model_schema::ModelSchema`] via `schema_cell`; the default
/// lookup awaits the identifier inside the current root Context.
pub fn reference(schema_cell: SchemaCell) -> PropSchema {
    reference_with(schema_cell.clone(), default_lookup(schema_cell))
}

fn default_lookup(schema_cell: SchemaCell) -> LookupFn {
    Arc::new(move |id_json: Value, ctx: Context| {
        let schema_cell = schema_cell.clone();
        Box::pin(async move {
            let schema = schema_cell.get();
            if schema.identifier_prop_name().is_none() {
                return Err(DeserializeError::NoIdentifierOnTarget { property: String::new() });
            }
            let id = identifier_key(&id_json).ok_or(DeserializeError::ShapeMismatch {
                property: String::new(),
                expected: "primitive identifier",
                found: json_kind(&id_json),
            })?;
            let handle = ctx.await_ref(schema, id).await;
            Ok(PropValue::Instance(handle))
        })
    })
}

/// `reference(target, lookupFn)` — shape 2, and the general form shape 1
/// reduces to: `schema_cell` supplies the published schema used to read
/// back the identifier attribute when *serializing*, while `lookup`
/// supplies the deserialize-side resolution strategy (the default
/// intra-document await, or a host-supplied database/cache lookup).
pub fn reference_with(schema_cell: SchemaCell, lookup: LookupFn) -> PropSchema {
    PropSchema::new(
        Arc::new(move |value: &PropValue| match value {
            PropValue::Json(Value::Null) => Ok(Value::Null),
            PropValue::Instance(handle) => {
                let schema = schema_cell.get();
                let id_name = schema
                    .identifier_prop_name()
                    .ok_or_else(|| SerializeError::NoIdentifierOnTarget { property: String::new() })?;
                match handle.get_prop(&id_name) {
                    Some(PropValue::Json(v)) => Ok(v),
                    _ => Ok(Value::Null),
                }
            }
            _ => Err(SerializeError::Custom {
                property: String::new(),
                message: "reference() expects a nested instance value".to_string(),
            }),
        }),
        Arc::new(move |json: Value, ctx: Context, _current: Option<PropValue>| {
            let lookup = lookup.clone();
            Box::pin(async move {
                if json.is_null() {
                    return Ok(PropValue::Json(Value::Null));
                }
                lookup(json, ctx).await
            })
        }),
        None,
        false,
    )
}

/// `reference(attrName, lookupFn)` — shape 2 from spec.md §4.2: the
/// child's identifier attribute is named directly by string rather than
/// resolved through a `ModelSchema`, so a `lookupFn` is mandatory.
pub fn reference_by_attr(attr_name: impl Into<String>, lookup: LookupFn) -> PropSchema {
    let attr_name = attr_name.into();
    PropSchema::new(
        Arc::new(move |value: &PropValue| match value {
            PropValue::Json(Value::Null) => Ok(Value::Null),
            PropValue::Instance(handle) => match handle.get_prop(&attr_name) {
                Some(PropValue::Json(v)) => Ok(v),
                _ => Ok(Value::Null),
            },
            _ => Err(SerializeError::Custom {
                property: String::new(),
                message: "reference() expects a nested instance value".to_string(),
            }),
        }),
        Arc::new(move |json: Value, ctx: Context, _current: Option<PropValue>| {
            let lookup = lookup.clone();
            Box::pin(async move {
                if json.is_null() {
                    return Ok(PropValue::Json(Value::Null));
                }
                lookup(json, ctx).await
            })
        }),
        None,
        false,
    )
}
