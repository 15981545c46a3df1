//! Property definitions.

use rkyv::{Archive, Deserialize, Serialize};

use super::options::{Collation, ForeignKeyConstraint, PropertyOptions};

/// Primitive property types.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum PrimitiveType {
    Binary,
    Boolean,
    DateTime,
    Double,
    Integer,
    Long,
    Point2d,
    Point3d,
    String,
    Geometry,
}

impl PrimitiveType {
    /// Returns true for the point types, which flatten to one column per
    /// coordinate.
    pub fn is_point(&self) -> bool {
        matches!(self, PrimitiveType::Point2d | PrimitiveType::Point3d)
    }

    /// Coordinate member names of a point type; empty otherwise.
    pub fn coordinates(&self) -> &'static [&'static str] {
        match self {
            PrimitiveType::Point2d => &["X", "Y"],
            PrimitiveType::Point3d => &["X", "Y", "Z"],
            _ => &[],
        }
    }
}

/// Direction of a navigation property or of a relationship's strength.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

/// What a property holds.
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
pub enum PropertyKind {
    Primitive(PrimitiveType),
    PrimitiveArray(PrimitiveType),
    /// Struct class reference.
    Struct(String),
    /// Struct class reference.
    StructArray(String),
    Navigation {
        relationship: String,
        direction: Direction,
    },
}

impl PropertyKind {
    /// Short type label used in diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            PropertyKind::Primitive(_) => "primitive",
            PropertyKind::PrimitiveArray(_) => "primitive array",
            PropertyKind::Struct(_) => "struct",
            PropertyKind::StructArray(_) => "struct array",
            PropertyKind::Navigation { .. } => "navigation",
        }
    }
}

/// A declared property.
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
pub struct PropertyDef {
    pub name: String,
    pub kind: PropertyKind,
    #[serde(default)]
    pub options: PropertyOptions,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            options: PropertyOptions::default(),
        }
    }

    pub fn primitive(name: impl Into<String>, ty: PrimitiveType) -> Self {
        Self::new(name, PropertyKind::Primitive(ty))
    }

    pub fn array(name: impl Into<String>, ty: PrimitiveType) -> Self {
        Self::new(name, PropertyKind::PrimitiveArray(ty))
    }

    pub fn structure(name: impl Into<String>, struct_class: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Struct(struct_class.into()))
    }

    pub fn struct_array(name: impl Into<String>, struct_class: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::StructArray(struct_class.into()))
    }

    pub fn navigation(
        name: impl Into<String>,
        relationship: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self::new(
            name,
            PropertyKind::Navigation {
                relationship: relationship.into(),
                direction,
            },
        )
    }

    pub fn with_options(mut self, options: PropertyOptions) -> Self {
        self.options = options;
        self
    }

    /// Declare `IsNullable=false`.
    pub fn not_null(mut self) -> Self {
        self.options.is_nullable = Some(false);
        self
    }

    pub fn unique(mut self) -> Self {
        self.options.is_unique = Some(true);
        self
    }

    pub fn with_column_name(mut self, column: impl Into<String>) -> Self {
        self.options.column_name = Some(column.into());
        self
    }

    pub fn with_collation(mut self, collation: Collation) -> Self {
        self.options.collation = Some(collation);
        self
    }

    pub fn with_foreign_key_constraint(mut self, constraint: ForeignKeyConstraint) -> Self {
        self.options.foreign_key_constraint = Some(constraint);
        self
    }

    pub fn is_navigation(&self) -> bool {
        matches!(self.kind, PropertyKind::Navigation { .. })
    }

    pub fn is_not_null(&self) -> bool {
        self.options.is_nullable == Some(false)
    }

    pub fn is_unique(&self) -> bool {
        self.options.is_unique == Some(true)
    }
}
