//! Tag types for the access manager's auxiliary mappings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An application-defined component (e.g. "Settings", "Billing").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationComponent(pub String);

impl fmt::Display for ApplicationComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: Into<String>> From<S> for ApplicationComponent {
    fn from(s: S) -> Self {
        Self(s.into())
    }
}

/// An application-defined access level (e.g. "Read", "Write").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccessLevel(pub String);

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: Into<String>> From<S> for AccessLevel {
    fn from(s: S) -> Self {
        Self(s.into())
    }
}

/// An entity type (e.g. "Client", "CostCenter").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityType(pub String);

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: Into<String>> From<S> for EntityType {
    fn from(s: S) -> Self {
        Self(s.into())
    }
}

/// An entity (a data row) belonging to exactly one `EntityType`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Entity(pub String);

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: Into<String>> From<S> for Entity {
    fn from(s: S) -> Self {
        Self(s.into())
    }
}
