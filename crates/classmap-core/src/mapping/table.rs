//! Physical tables and columns.

use rkyv::{Archive, Deserialize, Serialize};

use crate::schema::{ClassKey, Collation, ForeignKeyAction, PrimitiveType};

/// Role of a table within a hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum TableKind {
    /// The table a hierarchy root names.
    Primary,
    /// 1:1 extension of a primary table for one direct-subclass branch.
    Joined,
    /// 1:1 extension absorbing shared columns past the threshold.
    Overflow,
    /// Never materialized: abstract own-table classes and mixins.
    Virtual,
    /// Created outside the engine and registered with the catalog.
    Existing,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Primary => "Primary",
            TableKind::Joined => "Joined",
            TableKind::Overflow => "Overflow",
            TableKind::Virtual => "Virtual",
            TableKind::Existing => "Existing",
        }
    }

    /// Pool prefix of shared columns created in a table of this kind.
    pub fn shared_column_prefix(&self) -> &'static str {
        match self {
            TableKind::Joined => "js",
            TableKind::Overflow => "os",
            _ => "ps",
        }
    }
}

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum ColumnType {
    /// Polymorphic storage of shared columns.
    Any,
    Boolean,
    Blob,
    Integer,
    Real,
    Text,
    TimeStamp,
}

impl ColumnType {
    /// Storage type of a non-point primitive.
    pub fn for_primitive(ty: PrimitiveType) -> Self {
        match ty {
            PrimitiveType::Binary | PrimitiveType::Geometry => ColumnType::Blob,
            PrimitiveType::Boolean => ColumnType::Boolean,
            PrimitiveType::DateTime => ColumnType::TimeStamp,
            PrimitiveType::Double | PrimitiveType::Point2d | PrimitiveType::Point3d => {
                ColumnType::Real
            }
            PrimitiveType::Integer | PrimitiveType::Long => ColumnType::Integer,
            PrimitiveType::String => ColumnType::Text,
        }
    }

    /// Declared SQL type. Shared columns use `BLOB`, which imposes no
    /// affinity and stores any value unchanged.
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Any | ColumnType::Blob => "BLOB",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::TimeStamp => "TIMESTAMP",
        }
    }
}

/// Origin of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum ColumnKind {
    InstanceId,
    ClassId,
    /// A named column owned by one property.
    Data,
    /// A `ps<N>`/`js<N>`/`os<N>` pool column.
    Shared,
}

/// A column of a [`Table`].
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub kind: ColumnKind,
    /// Part of the model but not stored.
    pub is_virtual: bool,
    pub not_null: bool,
    pub unique: bool,
    pub collation: Option<Collation>,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            ty,
            kind,
            is_virtual: false,
            not_null: false,
            unique: false,
            collation: None,
        }
    }

    /// The primary key column.
    pub fn instance_id(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer, ColumnKind::InstanceId).with_not_null(true)
    }

    /// The class id column. Starts out virtual.
    pub fn class_id(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer, ColumnKind::ClassId)
            .with_not_null(true)
            .with_virtual(true)
    }

    pub fn data(name: impl Into<String>, ty: ColumnType) -> Self {
        Self::new(name, ty, ColumnKind::Data)
    }

    pub fn shared(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Any, ColumnKind::Shared)
    }

    pub fn with_virtual(mut self, is_virtual: bool) -> Self {
        self.is_virtual = is_virtual;
        self
    }

    pub fn with_not_null(mut self, not_null: bool) -> Self {
        self.not_null = not_null;
        self
    }

    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn with_collation(mut self, collation: Option<Collation>) -> Self {
        self.collation = collation;
        self
    }

    pub fn is_shared(&self) -> bool {
        self.kind == ColumnKind::Shared
    }
}

/// A `FOREIGN KEY` clause on a table.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub on_delete: ForeignKeyAction,
    pub on_update: Option<ForeignKeyAction>,
}

/// A physical (or virtual) table.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub kind: TableKind,
    /// The table a joined or overflow table extends.
    pub parent: Option<String>,
    /// Class whose hierarchy owns the table. Unset for extension tables.
    pub exclusive_root: Option<ClassKey>,
    pub columns: Vec<Column>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    pub fn new(name: impl Into<String>, kind: TableKind) -> Self {
        Self {
            name: name.into(),
            kind,
            parent: None,
            exclusive_root: None,
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_exclusive_root(mut self, root: ClassKey) -> Self {
        self.exclusive_root = Some(root);
        self
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Find a column by name (case-insensitive).
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// The primary key column.
    pub fn instance_id_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.kind == ColumnKind::InstanceId)
    }

    pub fn class_id_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.kind == ColumnKind::ClassId)
    }

    pub fn class_id_column_mut(&mut self) -> Option<&mut Column> {
        self.columns
            .iter_mut()
            .find(|c| c.kind == ColumnKind::ClassId)
    }

    pub fn shared_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_shared())
    }

    pub fn shared_column_count(&self) -> usize {
        self.shared_columns().count()
    }

    /// Columns that are actually stored.
    pub fn physical_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.is_virtual)
    }

    /// True if the engine creates and alters this table.
    pub fn is_owned(&self) -> bool {
        !matches!(self.kind, TableKind::Virtual | TableKind::Existing)
    }

    pub fn is_virtual(&self) -> bool {
        self.kind == TableKind::Virtual
    }

    /// `base`, or `base` followed by the smallest numeric suffix that does
    /// not collide with an existing column.
    pub fn unique_column_name(&self, base: &str) -> String {
        if !self.has_column(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{}{}", base, n))
            .find(|candidate| !self.has_column(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn foreign_key_on(&self, column: &str) -> Option<&ForeignKey> {
        self.foreign_keys
            .iter()
            .find(|fk| fk.column.eq_ignore_ascii_case(column))
    }
}
