//! Class identity.

use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

/// Fully-qualified class name: owning schema plus class name.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ClassKey {
    /// Owning schema name.
    pub schema: String,
    /// Class name within the schema.
    pub name: String,
}

impl ClassKey {
    /// Create a class key.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Case-insensitive comparison against a schema and class name.
    pub fn matches(&self, schema: &str, name: &str) -> bool {
        self.schema.eq_ignore_ascii_case(schema) && self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for ClassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.schema, self.name)
    }
}
