//! Error types for the class-mapping compiler.

use std::fmt::Display;

use thiserror::Error;

/// Errors raised while importing schemas or reading persisted mappings.
///
/// The first four variants form the import taxonomy: any of them aborts the
/// whole import and nothing is committed.
#[derive(Debug, Error)]
pub enum Error {
    /// Illegal option combination, strategy transition, reserved-name
    /// collision, duplicate index name or unsupported index target.
    #[error("schema validation failed for {class}: {message}")]
    SchemaValidation { class: String, message: String },

    /// Missing or incompatible existing table, missing id column, or a table
    /// claimed by more than one hierarchy.
    #[error("table conflict on {table}: {message}")]
    TableConflict { table: String, message: String },

    /// Misplaced navigation property, unsupported cardinality or an illegal
    /// foreign key action.
    #[error("relationship mapping failed for {relationship}: {message}")]
    RelationshipMapping {
        relationship: String,
        message: String,
    },

    /// A later import tried to change something an earlier import committed.
    #[error("evolution conflict for {class}: {message}")]
    EvolutionConflict { class: String, message: String },

    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl Error {
    pub(crate) fn validation(class: impl Display, message: impl Into<String>) -> Self {
        Self::SchemaValidation {
            class: class.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn table_conflict(table: impl Display, message: impl Into<String>) -> Self {
        Self::TableConflict {
            table: table.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn relationship(relationship: impl Display, message: impl Into<String>) -> Self {
        Self::RelationshipMapping {
            relationship: relationship.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn evolution(class: impl Display, message: impl Into<String>) -> Self {
        Self::EvolutionConflict {
            class: class.to_string(),
            message: message.into(),
        }
    }

    /// Returns true for [`Error::SchemaValidation`].
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::SchemaValidation { .. })
    }

    /// Returns true for [`Error::TableConflict`].
    pub fn is_table_conflict(&self) -> bool {
        matches!(self, Self::TableConflict { .. })
    }

    /// Returns true for [`Error::RelationshipMapping`].
    pub fn is_relationship(&self) -> bool {
        matches!(self, Self::RelationshipMapping { .. })
    }

    /// Returns true for [`Error::EvolutionConflict`].
    pub fn is_evolution_conflict(&self) -> bool {
        matches!(self, Self::EvolutionConflict { .. })
    }

    /// Returns true if the error was raised by the compiler rather than by
    /// storage or (de)serialization.
    pub fn is_import_rejection(&self) -> bool {
        self.is_validation()
            || self.is_table_conflict()
            || self.is_relationship()
            || self.is_evolution_conflict()
    }
}

/// Result type for mapping operations.
pub type Result<T> = std::result::Result<T, Error>;
