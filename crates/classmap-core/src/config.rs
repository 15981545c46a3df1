//! Compiler configuration.

/// SQLite's default `SQLITE_MAX_COLUMN`.
pub const DEFAULT_MAX_COLUMNS_PER_TABLE: usize = 2000;

/// Configuration for the class-mapping compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingConfig {
    /// Name of the primary key column created for every table.
    /// A `ClassMap` option may rename it per hierarchy.
    pub instance_id_column: String,

    /// Name of the class id column created for every table.
    pub class_id_column: String,

    /// Hard column limit of the backing store. Bounds shared column pools
    /// whose `max_before_overflow` is unset.
    pub max_columns_per_table: usize,

    /// Suffix appended to a table name to form its overflow table.
    pub overflow_suffix: String,

    /// Emit an `ix_<table>_ecclassid` index for every table whose class id
    /// column is materialized.
    pub emit_class_id_indexes: bool,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            instance_id_column: "Id".to_string(),
            class_id_column: "ECClassId".to_string(),
            max_columns_per_table: DEFAULT_MAX_COLUMNS_PER_TABLE,
            overflow_suffix: "_Overflow".to_string(),
            emit_class_id_indexes: true,
        }
    }
}

impl MappingConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the primary key column name.
    pub fn with_instance_id_column(mut self, name: impl Into<String>) -> Self {
        self.instance_id_column = name.into();
        self
    }

    /// Set the class id column name.
    pub fn with_class_id_column(mut self, name: impl Into<String>) -> Self {
        self.class_id_column = name.into();
        self
    }

    /// Set the per-table column limit.
    pub fn with_max_columns_per_table(mut self, max: usize) -> Self {
        self.max_columns_per_table = max;
        self
    }

    /// Set the overflow table suffix.
    pub fn with_overflow_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.overflow_suffix = suffix.into();
        self
    }

    /// Enable or disable class id indexes.
    pub fn with_class_id_indexes(mut self, enabled: bool) -> Self {
        self.emit_class_id_indexes = enabled;
        self
    }
}
