//! Declared mapping options (custom attributes) on classes and properties.

use rkyv::{Archive, Deserialize, Serialize};

/// Top-level table layout policy for a class hierarchy.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum MapStrategy {
    /// The class gets a table of its own.
    #[default]
    OwnTable,
    /// The class and all its subclasses share one table.
    TablePerHierarchy,
    /// The class maps onto a table that already exists in the store.
    ExistingTable,
    /// The class and all its subclasses are not persisted.
    NotMapped,
}

impl MapStrategy {
    /// Returns the name used in diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            MapStrategy::OwnTable => "OwnTable",
            MapStrategy::TablePerHierarchy => "TablePerHierarchy",
            MapStrategy::ExistingTable => "ExistingTable",
            MapStrategy::NotMapped => "NotMapped",
        }
    }
}

/// The `ClassMap` option.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Default,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ClassMapOption {
    pub strategy: MapStrategy,
    /// Only legal with [`MapStrategy::ExistingTable`].
    #[serde(default)]
    pub table_name: Option<String>,
    /// Overrides the primary key column name.
    #[serde(default)]
    pub id_column: Option<String>,
}

impl ClassMapOption {
    pub fn new(strategy: MapStrategy) -> Self {
        Self {
            strategy,
            table_name: None,
            id_column: None,
        }
    }

    /// Map onto an existing table.
    pub fn existing_table(table_name: impl Into<String>) -> Self {
        Self {
            strategy: MapStrategy::ExistingTable,
            table_name: Some(table_name.into()),
            id_column: None,
        }
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = Some(column.into());
        self
    }
}

/// The `ShareColumns` option.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Default,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ShareColumns {
    /// Shared columns allowed in the primary or joined table before
    /// allocation moves to the overflow table. `None` is bounded only by the
    /// store's column limit; `Some(0)` overflows immediately.
    #[serde(default)]
    pub max_before_overflow: Option<u32>,
    /// The declaring class keeps named columns; only subclasses share.
    #[serde(default)]
    pub apply_to_subclasses_only: bool,
}

impl ShareColumns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_before_overflow(mut self, max: u32) -> Self {
        self.max_before_overflow = Some(max);
        self
    }

    pub fn apply_to_subclasses_only(mut self) -> Self {
        self.apply_to_subclasses_only = true;
        self
    }
}

/// The `LinkTableRelationshipMap` option.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct LinkTableRelationshipMap {
    #[serde(default)]
    pub source_column: Option<String>,
    #[serde(default)]
    pub target_column: Option<String>,
    #[serde(default)]
    pub allow_duplicate_relationships: bool,
    #[serde(default = "default_true")]
    pub create_foreign_key_constraints: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LinkTableRelationshipMap {
    fn default() -> Self {
        Self {
            source_column: None,
            target_column: None,
            allow_duplicate_relationships: false,
            create_foreign_key_constraints: true,
        }
    }
}

impl LinkTableRelationshipMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_column(mut self, column: impl Into<String>) -> Self {
        self.source_column = Some(column.into());
        self
    }

    pub fn with_target_column(mut self, column: impl Into<String>) -> Self {
        self.target_column = Some(column.into());
        self
    }

    pub fn allow_duplicates(mut self) -> Self {
        self.allow_duplicate_relationships = true;
        self
    }

    pub fn without_foreign_key_constraints(mut self) -> Self {
        self.create_foreign_key_constraints = false;
        self
    }
}

/// The only `Where` value a declared index may carry.
pub const INDEXED_COLUMNS_ARE_NOT_NULL: &str = "IndexedColumnsAreNotNull";

/// One entry of a `DbIndexList` option.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct DbIndexDef {
    pub name: String,
    #[serde(default)]
    pub is_unique: bool,
    /// Property access strings, e.g. `Code` or `Origin.X`.
    pub properties: Vec<String>,
    #[serde(default)]
    pub where_clause: Option<String>,
}

impl DbIndexDef {
    pub fn new<I, S>(name: impl Into<String>, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            is_unique: false,
            properties: properties.into_iter().map(Into::into).collect(),
            where_clause: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn where_not_null(mut self) -> Self {
        self.where_clause = Some(INDEXED_COLUMNS_ARE_NOT_NULL.to_string());
        self
    }

    pub fn with_where(mut self, clause: impl Into<String>) -> Self {
        self.where_clause = Some(clause.into());
        self
    }
}

/// The `IsMixin` option.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct MixinOption {
    /// The entity class (and its subclasses) the mixin may be applied to.
    pub applies_to: String,
}

/// Referential action of a foreign key.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum ForeignKeyAction {
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
}

impl ForeignKeyAction {
    /// SQL spelling.
    pub fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyAction::NoAction => "NO ACTION",
            ForeignKeyAction::Cascade => "CASCADE",
            ForeignKeyAction::SetNull => "SET NULL",
            ForeignKeyAction::SetDefault => "SET DEFAULT",
            ForeignKeyAction::Restrict => "RESTRICT",
        }
    }
}

/// The `ForeignKeyConstraint` option.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Default,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ForeignKeyConstraint {
    #[serde(default)]
    pub on_delete: Option<ForeignKeyAction>,
    #[serde(default)]
    pub on_update: Option<ForeignKeyAction>,
}

impl ForeignKeyConstraint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    pub fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.on_update = Some(action);
        self
    }
}

/// Column collation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum Collation {
    Binary,
    NoCase,
    RTrim,
}

impl Collation {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Collation::Binary => "BINARY",
            Collation::NoCase => "NOCASE",
            Collation::RTrim => "RTRIM",
        }
    }
}

/// Per-property options: the `PropertyMap` attribute plus the navigation
/// property's `ForeignKeyConstraint`.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Default,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(default)]
pub struct PropertyOptions {
    pub column_name: Option<String>,
    pub is_nullable: Option<bool>,
    pub is_unique: Option<bool>,
    pub collation: Option<Collation>,
    pub foreign_key_constraint: Option<ForeignKeyConstraint>,
}

/// Per-class options.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Default,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(default)]
pub struct ClassOptions {
    pub class_map: Option<ClassMapOption>,
    pub share_columns: Option<ShareColumns>,
    pub joined_table_per_direct_subclass: bool,
    pub link_table: Option<LinkTableRelationshipMap>,
    pub db_indexes: Vec<DbIndexDef>,
    pub mixin: Option<MixinOption>,
    pub foreign_key_constraint: Option<ForeignKeyConstraint>,
}

impl ClassOptions {
    /// Returns true if no option is declared.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
