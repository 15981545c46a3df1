//! Classmap Core - compiles object-model schemas into relational mappings.
//!
//! Schemas describe entity classes, mixins, structs and relationships. The
//! compiler resolves a mapping strategy per class, allocates columns
//! (including shared and overflow columns), maps relationships as foreign
//! keys or link tables, and derives indexes. Each successful import is
//! committed as a new version in the [`MappingCatalog`].

pub mod catalog;
pub mod compiler;
pub mod config;
pub mod ddl;
pub mod error;
pub mod mapping;
pub mod schema;

pub use catalog::MappingCatalog;
pub use compiler::{
    compile, diff, merge_schemas, ColumnAddition, ImportOutcome, MappingDiff, SchemaImporter,
    SchemaMerge,
};
pub use config::MappingConfig;
pub use error::{Error, Result};
pub use mapping::{
    ClassFilter, ClassId, ClassMap, ClassMapKind, Column, ColumnKind, ColumnRef, ColumnType,
    ExistingColumnDef, ExistingTableDef, ForeignKey, Index, MappingSnapshot, PropertyLookup,
    PropertyMap, PropertyMapKind, RelationshipMap, RelationshipMapping, Table, TableKind,
};
pub use schema::{
    ClassDef, ClassKey, ClassKind, ClassMapOption, Constraint, DbIndexDef, Direction,
    ForeignKeyAction, ForeignKeyConstraint, MapStrategy, Modifier, Multiplicity, PrimitiveType,
    PropertyDef, PropertyKind, RelationshipInfo, Schema, ShareColumns, Strength,
};
