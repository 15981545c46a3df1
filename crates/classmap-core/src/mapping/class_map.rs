//! Per-class mapping results.

use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

use crate::schema::{ClassKey, ForeignKeyAction, MapStrategy};

/// Stable numeric class identifier, assigned on first import.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Archive, Serialize, Deserialize,
)]
pub struct ClassId(pub u64);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether properties of a class claim shared pool columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum ShareColumnsMode {
    No,
    Yes,
    /// Declared here with `apply_to_subclasses_only`: this class keeps
    /// named columns, its subclasses share.
    ApplyToSubclassesOnly,
}

/// Position of a class relative to `JoinedTablePerDirectSubclass`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum JoinedTableInfo {
    None,
    /// Declares the option; its direct subclasses each get a joined table.
    ParentOfJoinedTable,
    /// Lives in a joined table.
    JoinedTable,
}

/// Table-per-hierarchy details of a resolved strategy.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct TphInfo {
    pub root: ClassKey,
    pub share_columns: ShareColumnsMode,
    pub max_before_overflow: Option<u32>,
    pub joined_table: JoinedTableInfo,
}

/// The strategy a class ended up with after inheritance.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ResolvedStrategy {
    pub strategy: MapStrategy,
    pub tph: Option<TphInfo>,
    /// Existing table name.
    pub table_name: Option<String>,
    /// Primary key column override.
    pub id_column: Option<String>,
}

impl ResolvedStrategy {
    pub fn new(strategy: MapStrategy) -> Self {
        Self {
            strategy,
            tph: None,
            table_name: None,
            id_column: None,
        }
    }

    pub fn not_mapped() -> Self {
        Self::new(MapStrategy::NotMapped)
    }

    pub fn is_not_mapped(&self) -> bool {
        self.strategy == MapStrategy::NotMapped
    }

    pub fn is_tph(&self) -> bool {
        self.strategy == MapStrategy::TablePerHierarchy
    }

    /// True if newly allocated properties go to the shared pool.
    pub fn shares_columns(&self) -> bool {
        self.tph
            .as_ref()
            .is_some_and(|tph| tph.share_columns == ShareColumnsMode::Yes)
    }

    pub fn joined_table(&self) -> JoinedTableInfo {
        self.tph
            .as_ref()
            .map_or(JoinedTableInfo::None, |tph| tph.joined_table)
    }
}

/// What a class map describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum ClassMapKind {
    Entity,
    /// Relationship stored in its own table.
    LinkTable,
    /// Relationship stored as columns on one end's table.
    ForeignKey,
    NotMapped,
}

/// Table and column a property maps to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn is(&self, table: &str, column: &str) -> bool {
        self.table.eq_ignore_ascii_case(table) && self.column.eq_ignore_ascii_case(column)
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Kind of a property map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum PropertyMapKind {
    InstanceId,
    ClassId,
    Primitive,
    Point,
    PrimitiveArray,
    Struct,
    StructArray,
    Navigation,
    NavigationId,
    NavigationRelClassId,
    SourceInstanceId,
    SourceClassId,
    TargetInstanceId,
    TargetClassId,
}

impl PropertyMapKind {
    /// True for maps of the system properties every class has.
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            PropertyMapKind::InstanceId
                | PropertyMapKind::ClassId
                | PropertyMapKind::SourceInstanceId
                | PropertyMapKind::SourceClassId
                | PropertyMapKind::TargetInstanceId
                | PropertyMapKind::TargetClassId
        )
    }

    /// True if a declared index may name a property of this kind.
    pub fn is_indexable(&self) -> bool {
        matches!(
            self,
            PropertyMapKind::InstanceId | PropertyMapKind::Primitive | PropertyMapKind::Point
        )
    }
}

/// Columns of one property access string.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct PropertyMap {
    /// `Name`, `Struct.Member`, `Point.X`, `Nav.Id`, ...
    pub access_string: String,
    pub kind: PropertyMapKind,
    /// In declaration order.
    pub columns: Vec<ColumnRef>,
}

impl PropertyMap {
    pub fn new(access_string: impl Into<String>, kind: PropertyMapKind, columns: Vec<ColumnRef>) -> Self {
        Self {
            access_string: access_string.into(),
            kind,
            columns,
        }
    }

    /// True for `name` itself and its members (`name.X`).
    pub fn is_under(&self, name: &str) -> bool {
        let access = self.access_string.as_bytes();
        let name = name.as_bytes();
        access.len() >= name.len()
            && access[..name.len()].eq_ignore_ascii_case(name)
            && (access.len() == name.len() || access[name.len()] == b'.')
    }

    /// The single table all columns live in, if there is one.
    pub fn single_table(&self) -> Option<&str> {
        let first = self.columns.first()?;
        self.columns
            .iter()
            .all(|c| c.table.eq_ignore_ascii_case(&first.table))
            .then_some(first.table.as_str())
    }
}

/// Mapping result for one class.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ClassMap {
    pub class: ClassKey,
    pub id: ClassId,
    pub strategy: ResolvedStrategy,
    pub is_mixin: bool,
    pub is_abstract: bool,
    pub kind: ClassMapKind,
    pub primary_table: Option<String>,
    pub joined_table: Option<String>,
    /// Every table the class spans: primary, joined, then extension tables
    /// in the order they were first used.
    pub tables: Vec<String>,
    pub property_maps: Vec<PropertyMap>,
}

impl ClassMap {
    pub fn new(class: ClassKey, id: ClassId, strategy: ResolvedStrategy, kind: ClassMapKind) -> Self {
        Self {
            class,
            id,
            strategy,
            is_mixin: false,
            is_abstract: false,
            kind,
            primary_table: None,
            joined_table: None,
            tables: Vec::new(),
            property_maps: Vec::new(),
        }
    }

    /// Find a property map by access string (case-insensitive).
    pub fn property_map(&self, access_string: &str) -> Option<&PropertyMap> {
        self.property_maps
            .iter()
            .find(|m| m.access_string.eq_ignore_ascii_case(access_string))
    }

    pub fn has_property_map(&self, access_string: &str) -> bool {
        self.property_map(access_string).is_some()
    }

    pub fn is_mapped(&self) -> bool {
        self.kind != ClassMapKind::NotMapped
    }

    /// Joined table if the class lives in one, else the primary table.
    pub fn resident_table(&self) -> Option<&str> {
        self.joined_table
            .as_deref()
            .or(self.primary_table.as_deref())
    }

    /// True if instances of this class can exist in its tables.
    pub fn is_concrete(&self) -> bool {
        !self.is_abstract
            && !self.is_mixin
            && matches!(self.kind, ClassMapKind::Entity | ClassMapKind::LinkTable)
    }

    /// True if rows of this class live in `table` (primary or joined).
    pub fn resides_in(&self, table: &str) -> bool {
        self.primary_table
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(table))
            || self
                .joined_table
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case(table))
    }

    pub(crate) fn touch_table(&mut self, table: &str) {
        if !self.tables.iter().any(|t| t.eq_ignore_ascii_case(table)) {
            self.tables.push(table.to_string());
        }
    }

    /// Insert or replace a property map.
    pub(crate) fn set_property_map(&mut self, map: PropertyMap) {
        match self
            .property_maps
            .iter_mut()
            .find(|m| m.access_string.eq_ignore_ascii_case(&map.access_string))
        {
            Some(existing) => *existing = map,
            None => self.property_maps.push(map),
        }
    }
}

/// The end of a relationship that holds the foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum RelationshipEnd {
    Source,
    Target,
}

impl RelationshipEnd {
    pub fn opposite(&self) -> Self {
        match self {
            RelationshipEnd::Source => RelationshipEnd::Target,
            RelationshipEnd::Target => RelationshipEnd::Source,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipEnd::Source => "source",
            RelationshipEnd::Target => "target",
        }
    }
}

/// FK columns in one table. A relationship whose FK-end constraint classes
/// live in different tables has one partition per table.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct FkPartition {
    pub table: String,
    pub id_column: String,
    pub class_id_column: String,
    pub fk_column: String,
    pub rel_class_id_column: String,
}

/// How a relationship is stored.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum RelationshipMapping {
    ForeignKey {
        fk_end: RelationshipEnd,
        partitions: Vec<FkPartition>,
        on_delete: Option<ForeignKeyAction>,
        /// A `FOREIGN KEY` clause backs the columns.
        physical: bool,
    },
    LinkTable {
        table: String,
        source_id: String,
        source_class_id: String,
        target_id: String,
        target_class_id: String,
    },
}

/// Storage of a relationship class.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct RelationshipMap {
    pub class: ClassKey,
    pub mapping: RelationshipMapping,
}
