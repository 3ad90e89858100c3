//! Entity schema model: fields, relations, and last-writer-wins merge
//! semantics for mutation payloads (§3 of the design doc).

mod entity;
mod error;
mod field;
mod relation;
mod registry;

pub use entity::{Entity, MutationPayload};
pub use error::SchemaError;
pub use field::{FieldMeta, FieldValue, MergeOutcome};
pub use relation::RelationSpec;
pub use registry::{EntitySchema, FieldSpec, ScalarType, SchemaRegistry};
