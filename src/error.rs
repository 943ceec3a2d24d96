//! Error types for schema construction, serialization, and deserialization.

use thiserror::Error;

/// Errors raised while constructing or registering a [`crate::model_schema::ModelSchema`]
/// or [`crate::prop_schema::PropSchema`].
///
/// These are caught at construction time and are always fatal to the
/// operation that produced them; they never arise mid-(de)serialization.
#[derive(Debug, Clone, Error)]
pub enum ShapeError {
    /// `alias` was applied to a PropSchema that is already aliased.
    #[error("cannot alias an already-aliased prop schema (json name {existing:?})")]
    AlreadyAliased {
        /// The json name the inner schema was already aliased to.
        existing: String,
    },

    /// `createModelSchema` was asked to register a schema for the root object type.
    #[error("cannot register a default schema for the root object type")]
    RootTargetClass,

    /// More than one property in a ModelSchema chain is marked `identifier`.
    #[error("schema already has an identifier property {existing:?}, cannot add {new:?}")]
    DuplicateIdentifier {
        /// The property already flagged as the identifier.
        existing: String,
        /// The property that would have introduced a second identifier.
        new: String,
    },

    /// The `*` catch-all entry was given a value other than `true`.
    #[error("the `*` prop entry must be paired with `true` (serialize-all), not `false` or a schema")]
    InvalidCatchAll,
}

/// Errors raised synchronously while serializing a value.
#[derive(Debug, Clone, Error)]
pub enum SerializeError {
    /// `primitive()` or an `identifier`/`alias`-wrapped primitive received a non-primitive value.
    #[error("expected a primitive value for property {property:?}, found {found}")]
    ExpectedPrimitive {
        /// Property name (or catch-all) that produced the error.
        property: String,
        /// Human-readable description of what was found instead.
        found: &'static str,
    },

    /// `date()` received a value that was not a date.
    #[error("expected a date value for property {property:?}")]
    ExpectedDate {
        /// Property name that produced the error.
        property: String,
    },

    /// `list()` received a value that was not array-like.
    #[error("expected an array-like value for property {property:?}")]
    ExpectedList {
        /// Property name that produced the error.
        property: String,
    },

    /// No ModelSchema could be inferred for a value passed to `serialize`.
    #[error("no default model schema registered for this instance")]
    NoDefaultSchema,

    /// `reference()`'s target schema declares no `identifier` property, so
    /// there is nothing to read back the identifier value from (spec.md
    /// §4.2: "fail if none"). Detected lazily, at the point a `reference()`
    /// actually resolves its target schema cell — the cell may still be
    /// unresolved at `reference()`-construction time to permit cyclic
    /// schema graphs.
    #[error("reference target schema for property {property:?} has no identifier property")]
    NoIdentifierOnTarget {
        /// Property name that produced the error.
        property: String,
    },

    /// A user-supplied custom serializer failed.
    #[error("custom serializer failed for property {property:?}: {message}")]
    Custom {
        /// Property name that produced the error.
        property: String,
        /// Message from the custom serializer.
        message: String,
    },
}

/// Errors delivered through the deserialization continuation or top-level completion.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeserializeError {
    /// The JSON value's shape did not match what the PropSchema expected
    /// (e.g. `list` received a non-array, `map` received a non-object,
    /// `primitive` received an object or array).
    #[error("shape mismatch for property {property:?}: expected {expected}, found {found}")]
    ShapeMismatch {
        /// Property name that produced the error.
        property: String,
        /// What the schema expected.
        expected: &'static str,
        /// Human-readable description of what was found instead.
        found: &'static str,
    },

    /// `schema.factory` returned a falsy/absent target.
    #[error("schema factory did not produce a target instance")]
    FactoryFailed,

    /// One or more identifier references could not be resolved by the time
    /// the root Context settled (every other callback completed).
    #[error("unresolvable reference(s) to identifier(s): {}", .identifiers.join(", "))]
    UnresolvableReferences {
        /// The pending identifier keys that were never published.
        identifiers: Vec<String>,
    },

    /// A user-supplied custom deserializer or lookup function failed.
    #[error("deserialization failed for property {property:?}: {message}")]
    Custom {
        /// Property name that produced the error.
        property: String,
        /// Message from the custom deserializer or lookup function.
        message: String,
    },

    /// `reference()`'s target schema declares no `identifier` property, so
    /// the default lookup has no identifier attribute to await. See
    /// [`SerializeError::NoIdentifierOnTarget`] for the serialize-side
    /// counterpart.
    #[error("reference target schema for property {property:?} has no identifier property")]
    NoIdentifierOnTarget {
        /// Property name that produced the error.
        property: String,
    },
}

impl SerializeError {
    /// Re-tag a property-less error (as produced inside a [`crate::prop_schema::PropSchema`]
    /// closure, which doesn't know its own property name) with the name the
    /// driving `serialize` walk was processing when it occurred.
    pub fn with_property(self, name: &str) -> Self {
        match self {
            SerializeError::ExpectedPrimitive { found, .. } => SerializeError::ExpectedPrimitive {
                property: name.to_string(),
                found,
            },
            SerializeError::ExpectedDate { .. } => SerializeError::ExpectedDate {
                property: name.to_string(),
            },
            SerializeError::ExpectedList { .. } => SerializeError::ExpectedList {
                property: name.to_string(),
            },
            SerializeError::Custom { message, .. } => SerializeError::Custom {
                property: name.to_string(),
                message,
            },
            SerializeError::NoIdentifierOnTarget { .. } => SerializeError::NoIdentifierOnTarget {
                property: name.to_string(),
            },
            other @ SerializeError::NoDefaultSchema => other,
        }
    }
}

impl DeserializeError {
    /// Re-tag a property-less error with the name the driving walk was
    /// processing when it occurred. See [`SerializeError::with_property`].
    pub fn with_property(self, name: &str) -> Self {
        match self {
            DeserializeError::ShapeMismatch { expected, found, .. } => {
                DeserializeError::ShapeMismatch {
                    property: name.to_string(),
                    expected,
                    found,
                }
            }
            DeserializeError::Custom { message, .. } => DeserializeError::Custom {
                property: name.to_string(),
                message,
            },
            DeserializeError::NoIdentifierOnTarget { .. } => DeserializeError::NoIdentifierOnTarget {
                property: name.to_string(),
            },
            other @ (DeserializeError::FactoryFailed
            | DeserializeError::UnresolvableReferences { .. }) => other,
        }
    }
}

impl From<ShapeError> for anyhow::Error {
    fn from(err: ShapeError) -> Self {
        anyhow::Error::new(err)
    }
}

impl From<SerializeError> for anyhow::Error {
    fn from(err: SerializeError) -> Self {
        anyhow::Error::new(err)
    }
}

impl From<DeserializeError> for anyhow::Error {
    fn from(err: DeserializeError) -> Self {
        anyhow::Error::new(err)
    }
}
