//! Versioned, persisted state of the mapping.

use rkyv::{Archive, Deserialize, Serialize};

use super::class_map::{ClassMap, ColumnRef, PropertyMap, RelationshipMap, ResolvedStrategy};
use super::index::Index;
use super::table::{ColumnType, Table};
use crate::error::{Error, Result};
use crate::schema::{ClassKey, Schema};

/// A column of a table created outside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ExistingColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub not_null: bool,
    pub unique: bool,
    pub primary_key: bool,
}

impl ExistingColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            not_null: false,
            unique: false,
            primary_key: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.not_null = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A table that exists in the store independently of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ExistingTableDef {
    pub name: String,
    pub columns: Vec<ExistingColumnDef>,
}

impl ExistingTableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ExistingColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ExistingColumnDef> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_key_columns(&self) -> impl Iterator<Item = &ExistingColumnDef> {
        self.columns.iter().filter(|c| c.primary_key)
    }
}

/// High-water mark of one table's shared column pool.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct CounterEntry {
    pub table: String,
    pub high_water: u32,
}

/// Per-table shared column counters. Numbers only ever grow.
#[derive(Debug, Clone, PartialEq, Eq, Default, Archive, Serialize, Deserialize)]
pub struct ColumnCounters {
    entries: Vec<CounterEntry>,
}

impl ColumnCounters {
    /// Highest number handed out for `table`, 0 if none.
    pub fn high_water(&self, table: &str) -> u32 {
        self.entries
            .iter()
            .find(|e| e.table.eq_ignore_ascii_case(table))
            .map_or(0, |e| e.high_water)
    }

    /// Claim the next number for `table`.
    pub(crate) fn advance(&mut self, table: &str) -> u32 {
        match self
            .entries
            .iter_mut()
            .find(|e| e.table.eq_ignore_ascii_case(table))
        {
            Some(entry) => {
                entry.high_water += 1;
                entry.high_water
            }
            None => {
                self.entries.push(CounterEntry {
                    table: table.to_string(),
                    high_water: 1,
                });
                1
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CounterEntry> {
        self.entries.iter()
    }
}

/// Result of a property lookup against a known class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyLookup<'a> {
    Mapped(&'a PropertyMap),
    /// The class resolved to `NotMapped`.
    NotMapped,
}

impl<'a> PropertyLookup<'a> {
    pub fn is_mapped(&self) -> bool {
        matches!(self, PropertyLookup::Mapped(_))
    }

    pub fn columns(&self) -> Option<&'a [ColumnRef]> {
        match self {
            PropertyLookup::Mapped(map) => Some(&map.columns),
            PropertyLookup::NotMapped => None,
        }
    }
}

/// Everything the engine knows after an import.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct MappingSnapshot {
    /// Catalog version; 0 before the first commit.
    pub version: u64,
    /// Unix epoch milliseconds of the commit.
    pub imported_at: u64,
    pub schemas: Vec<Schema>,
    pub class_maps: Vec<ClassMap>,
    pub relationship_maps: Vec<RelationshipMap>,
    pub tables: Vec<Table>,
    pub indexes: Vec<Index>,
    pub existing_tables: Vec<ExistingTableDef>,
    pub next_class_id: u64,
    pub counters: ColumnCounters,
}

impl Default for MappingSnapshot {
    fn default() -> Self {
        Self {
            version: 0,
            imported_at: 0,
            schemas: Vec::new(),
            class_maps: Vec::new(),
            relationship_maps: Vec::new(),
            tables: Vec::new(),
            indexes: Vec::new(),
            existing_tables: Vec::new(),
            next_class_id: 1,
            counters: ColumnCounters::default(),
        }
    }
}

impl MappingSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a schema by name or alias.
    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.is_named(name))
    }

    /// Find a class map by schema name or alias and class name.
    pub fn class_map(&self, schema: &str, class: &str) -> Option<&ClassMap> {
        let schema = self.schema(schema)?;
        self.class_map_by_key(&ClassKey::new(&schema.name, class))
    }

    pub fn class_map_by_key(&self, key: &ClassKey) -> Option<&ClassMap> {
        self.class_maps
            .iter()
            .find(|m| m.class.matches(&key.schema, &key.name))
    }

    /// Resolve a property access string to its columns.
    ///
    /// Returns `None` if the class or property is unknown and
    /// [`PropertyLookup::NotMapped`] if the class resolved to `NotMapped`.
    pub fn lookup_property(
        &self,
        schema: &str,
        class: &str,
        access_string: &str,
    ) -> Option<PropertyLookup<'_>> {
        let class_map = self.class_map(schema, class)?;
        if !class_map.is_mapped() {
            return Some(PropertyLookup::NotMapped);
        }
        class_map
            .property_map(access_string)
            .map(PropertyLookup::Mapped)
    }

    /// Find a table by name (case-insensitive).
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Resolved strategy and mixin flag of a class.
    pub fn strategy(&self, schema: &str, class: &str) -> Option<(&ResolvedStrategy, bool)> {
        self.class_map(schema, class)
            .map(|m| (&m.strategy, m.is_mixin))
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name.eq_ignore_ascii_case(name))
    }

    /// Indexes of one table.
    pub fn indexes_on<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a Index> + 'a {
        self.indexes
            .iter()
            .filter(move |i| i.table.eq_ignore_ascii_case(table))
    }

    pub fn relationship_map(&self, schema: &str, class: &str) -> Option<&RelationshipMap> {
        let schema = self.schema(schema)?;
        self.relationship_maps
            .iter()
            .find(|m| m.class.matches(&schema.name, class))
    }

    pub fn existing_table(&self, name: &str) -> Option<&ExistingTableDef> {
        self.existing_tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Concrete classes whose rows live in `table`.
    pub fn residents_of(&self, table: &str) -> impl Iterator<Item = &ClassMap> + '_ {
        let table = table.to_string();
        self.class_maps
            .iter()
            .filter(move |m| m.is_concrete() && m.resides_in(&table))
    }

    /// Serialize the snapshot to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a snapshot from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}
