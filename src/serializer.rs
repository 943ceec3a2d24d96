//! Walks a [`ModelSchema`] and a live [`Instance`], emitting a plain JSON
//! tree (spec.md §4.3).

use serde_json::Value;

use crate::error::SerializeError;
use crate::model_schema::{get_default_model_schema, ModelSchema, PropEntry};
use crate::value::{describe_prop_value, Instance, PropValue};

/// `serialize(schema, thing)` — explicit-schema form.
#[tracing::instrument(skip(schema, instance))]
pub fn serialize(schema: &ModelSchema, instance: &dyn Instance) -> Result<Value, SerializeError> {
    serialize_with_schema(schema, instance)
}

/// `serialize(thing)` — schema inferred from `instance`'s registered default.
#[tracing::instrument(skip(instance))]
pub fn serialize_inferred(instance: &dyn Instance) -> Result<Value, SerializeError> {
    let schema = get_default_model_schema(instance).ok_or(SerializeError::NoDefaultSchema)?;
    serialize_with_schema(&schema, instance)
}

/// `serialize(schema, [thing, ...])` — element-wise; an empty slice needs
/// no schema and returns an empty array.
pub fn serialize_many(schema: &ModelSchema, instances: &[&dyn Instance]) -> Result<Value, SerializeError> {
    let mut out = Vec::with_capacity(instances.len());
    for instance in instances {
        out.push(serialize_with_schema(schema, *instance)?);
    }
    Ok(Value::Array(out))
}

/// `serialize([thing, ...])` — schema inferred from the first element; an
/// empty slice returns an empty array without needing a schema at all.
pub fn serialize_many_inferred(instances: &[&dyn Instance]) -> Result<Value, SerializeError> {
    let Some(first) = instances.first() else {
        return Ok(Value::Array(Vec::new()));
    };
    let schema = get_default_model_schema(*first).ok_or(SerializeError::NoDefaultSchema)?;
    serialize_many(&schema, instances)
}

/// Core algorithm, shared by the top-level entry points above and by
/// `object()`/`reference()`'s own serializers when they hit a nested
/// instance value.
///
/// Uses [`ModelSchema::effective_props`] (the `extends` chain already
/// merged, child entries overwriting parent entries of the same name) per
/// `DESIGN.md`'s resolution of the duplicate-name Open Question, rather
/// than literally re-walking each ancestor schema's own `props` in turn.
pub(crate) fn serialize_with_schema(schema: &ModelSchema, instance: &dyn Instance) -> Result<Value, SerializeError> {
    let props = schema.effective_props();
    let mut obj = serde_json::Map::new();

    for (name, entry) in &props {
        if name == "*" {
            continue;
        }
        match entry {
            PropEntry::Skip => continue,
            PropEntry::Primitive => {
                let value = instance.get_prop(name).unwrap_or(PropValue::Json(Value::Null));
                let encoded = crate::prop_schema::primitive()
                    .serialize(&value)
                    .map_err(|e| e.with_property(name))?;
                obj.insert(name.clone(), encoded);
            }
            PropEntry::Schema(prop_schema) => {
                let value = instance.get_prop(name).unwrap_or(PropValue::Json(Value::Null));
                let encoded = prop_schema.serialize(&value).map_err(|e| e.with_property(name))?;
                let key = prop_schema.jsonname().unwrap_or(name.as_str());
                obj.insert(key.to_string(), encoded);
            }
        }
    }

    if let Some(PropEntry::Primitive) = props.get("*") {
        for key in instance.own_keys() {
            if props.contains_key(&key) {
                continue;
            }
            let value = instance.get_prop(&key).unwrap_or(PropValue::Json(Value::Null));
            if !value.is_primitive() {
                return Err(SerializeError::ExpectedPrimitive {
                    property: key,
                    found: describe_prop_value(&value),
                });
            }
            obj.insert(key, value.as_json().cloned().unwrap_or(Value::Null));
        }
    }

    Ok(Value::Object(obj))
}
