//! Person / place entities keyed by their canonical id.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which side of the person↔place relation an entity lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Place,
}

impl EntityKind {
    /// The opposite side of the bipartite relation.
    pub fn counterpart(self) -> Self {
        match self {
            Self::Person => Self::Place,
            Self::Place => Self::Person,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Person => write!(f, "person"),
            Self::Place => write!(f, "place"),
        }
    }
}

/// A normalized person or place.
///
/// Two entities are equal iff kind and canonical id match; the raw
/// spelling they were normalized from is not retained.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    pub canonical_id: String,
    pub kind: EntityKind,
}

impl Entity {
    pub fn new(canonical_id: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            canonical_id: canonical_id.into(),
            kind,
        }
    }

    pub fn person(canonical_id: impl Into<String>) -> Self {
        Self::new(canonical_id, EntityKind::Person)
    }

    pub fn place(canonical_id: impl Into<String>) -> Self {
        Self::new(canonical_id, EntityKind::Place)
    }

    pub fn id(&self) -> &str {
        &self.canonical_id
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.canonical_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_id_different_kind_differs() {
        assert_ne!(Entity::person("ELBLAG"), Entity::place("ELBLAG"));
        assert_eq!(Entity::place("ELBLAG"), Entity::place("ELBLAG"));
    }

    #[test]
    fn display_includes_kind() {
        assert_eq!(Entity::person("ADAM").to_string(), "person:ADAM");
        assert_eq!(EntityKind::Place.counterpart(), EntityKind::Person);
    }
}
