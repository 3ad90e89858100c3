use serde::{Deserialize, Serialize};

/// A relation declared on an entity (§3 Entity schema). The mutually
/// exclusive `localColumn`/`foreignColumn` fields from the spec collapse
/// into the two variants below, since exactly one applies per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RelationSpec {
    /// This entity holds a foreign key (`local_column`) pointing at a
    /// single `target` entity.
    One { target: String, local_column: String },
    /// Other entities of type `target` point back at this one via
    /// `foreign_column`; many may reference the same row.
    Many {
        target: String,
        foreign_column: String,
    },
}

impl RelationSpec {
    pub fn target(&self) -> &str {
        match self {
            RelationSpec::One { target, .. } => target,
            RelationSpec::Many { target, .. } => target,
        }
    }

    pub fn is_many(&self) -> bool {
        matches!(self, RelationSpec::Many { .. })
    }
}
