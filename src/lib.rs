//! # cim-schema
//!
//! A schema-driven (de)serialization engine converting between an
//! in-memory object graph and a plain tree of JSON-compatible values.
//!
//! - **[`PropSchema`]**: a composable algebra of per-property strategies
//!   (`primitive`, `date`, `alias`, `custom`, `object`, `list`, `map`,
//!   `identifier`, `reference`) built from small constructor functions
//!   rather than a closed enum.
//! - **[`ModelSchema`]**: associates a user type with the `props` map and
//!   optional parent (`extends`) describing how to move it to and from a
//!   JSON object.
//! - **[`Context`]**: the asynchronous deserialization context, tracking
//!   pending per-property callbacks and cross-reference resolution so a
//!   document can settle once every instance it names has finished
//!   constructing (or report which reference never resolved).
//! - **[`serializer`]/[`deserializer`]**: the two directions of the engine,
//!   both walking a [`ModelSchema::effective_props`] (the `extends` chain
//!   already merged, child entries winning ties).
//!
//! ## Design Principles
//!
//! 1. **Composability**: property strategies are functions that return
//!    [`PropSchema`] values, not a fixed catalog of cases.
//! 2. **Host neutrality**: the engine never assumes a concrete Rust type;
//!    it only asks a type to implement [`Instance`].
//! 3. **Structural sharing**: [`ModelSchema`] and [`PropSchema`] are
//!    `Arc`-backed, so cyclic/self-referential schema graphs ([`object`],
//!    [`reference`]) don't require unbounded duplication.
//! 4. **Honest concurrency**: deserialization is driven by real futures
//!    (`tokio`/`futures`), not callback plumbing bolted onto sync code.
//! 5. **Order preservation**: JSON object/array key and element order
//!    survives a round trip; `serde_json`'s `preserve_order` feature backs
//!    this rather than an ad hoc ordering workaround.

#![warn(missing_docs)]

mod context;
mod deserializer;
mod error;
mod model_schema;
mod prop_schema;
mod serializer;
mod value;

pub use context::{CallbackGuard, Context, CustomArgs};
pub use deserializer::{deserialize, deserialize_many, update, Deserialized};
pub use error::{DeserializeError, SerializeError, ShapeError};
pub use model_schema::{
    get_default_model_schema, get_default_model_schema_for, serializable, set_default_model_schema, Factory,
    ModelSchema, PropEntry, RootObjectMarker, SchemaCell,
};
pub use prop_schema::{
    alias, custom, date, identifier, list, map, object, primitive, reference, reference_by_attr, reference_with,
    DeserializeFn, LookupFn, PropSchema, SerializeFn,
};
pub use serializer::{serialize, serialize_inferred, serialize_many, serialize_many_inferred};
pub use value::{describe_prop_value, identifier_key, is_primitive, json_kind, DynamicObject, Instance, PropValue, TargetHandle};
