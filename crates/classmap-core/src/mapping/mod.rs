//! Output model: tables, columns, indexes and per-class maps, plus the
//! snapshot that holds them.

mod class_map;
mod index;
mod snapshot;
mod table;

pub use class_map::{
    ClassId, ClassMap, ClassMapKind, ColumnRef, FkPartition, JoinedTableInfo, PropertyMap,
    PropertyMapKind, RelationshipEnd, RelationshipMap, RelationshipMapping, ResolvedStrategy,
    ShareColumnsMode, TphInfo,
};
pub use index::{ClassFilter, Index};
pub use snapshot::{
    ColumnCounters, CounterEntry, ExistingColumnDef, ExistingTableDef, MappingSnapshot,
    PropertyLookup,
};
pub use table::{Column, ColumnKind, ColumnType, ForeignKey, Table, TableKind};
pub use crate::schema::MapStrategy;
