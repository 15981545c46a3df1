//! Index derivation.
//!
//! Indexes are recomputed from scratch on every import: class id indexes
//! for tables hosting several classes, indexes backing foreign keys and
//! link tables, and the indexes declared through `DbIndexList`. Declared
//! indexes on classes sharing a table with classes outside their subtree
//! are restricted by a class id predicate, which widens as subclasses are
//! added.

use std::collections::HashSet;

use super::context::ImportContext;
use crate::error::{Error, Result};
use crate::mapping::{
    ClassFilter, ClassId, ClassMapKind, Index, PropertyMapKind, RelationshipMapping, TableKind,
};
use crate::schema::{DbIndexDef, MapStrategy, NodeId, INDEXED_COLUMNS_ARE_NOT_NULL};

/// Derive every index of the mapping.
pub(crate) fn build_indexes(ctx: &ImportContext<'_>) -> Result<Vec<Index>> {
    let mut indexes = Vec::new();
    class_id_indexes(ctx, &mut indexes);
    relationship_indexes(ctx, &mut indexes)?;

    let mut names: HashSet<String> = indexes.iter().map(|i| i.name.to_lowercase()).collect();
    for &node in ctx.graph.topological_order() {
        if ctx.def(node).options.db_indexes.is_empty() {
            continue;
        }
        for index in declared_indexes(ctx, node)? {
            if !names.insert(index.name.to_lowercase()) {
                return Err(Error::validation(
                    ctx.key(node),
                    format!("index name '{}' is already used", index.name),
                ));
            }
            indexes.push(index);
        }
    }
    Ok(indexes)
}

fn push_unique_name(indexes: &mut Vec<Index>, index: Index) {
    if !indexes.iter().any(|i| i.name.eq_ignore_ascii_case(&index.name)) {
        indexes.push(index);
    }
}

fn class_id_indexes(ctx: &ImportContext<'_>, indexes: &mut Vec<Index>) {
    if !ctx.config.emit_class_id_indexes {
        return;
    }
    for table in &ctx.snapshot.tables {
        if !matches!(table.kind, TableKind::Primary | TableKind::Joined | TableKind::Overflow) {
            continue;
        }
        let Some(column) = table.class_id_column().filter(|c| !c.is_virtual) else {
            continue;
        };
        indexes.push(Index::new(
            format!("ix_{}_ecclassid", table.name),
            &table.name,
            [column.name.clone()],
        ));
    }
}

fn relationship_indexes(ctx: &ImportContext<'_>, indexes: &mut Vec<Index>) -> Result<()> {
    for map in &ctx.snapshot.relationship_maps {
        let Some(node) = ctx.graph.find(&map.class) else {
            continue;
        };
        let Some(info) = ctx.def(node).relationship_info() else {
            continue;
        };
        let one_to_one = !info.source.multiplicity.is_many() && !info.target.multiplicity.is_many();

        match &map.mapping {
            RelationshipMapping::ForeignKey {
                fk_end,
                partitions,
                physical,
                ..
            } => {
                if ctx.root_relationship(node) != node {
                    continue;
                }
                let alias = &ctx.graph.node(node).schema_alias;
                for partition in partitions {
                    let Some(table) = ctx.table(&partition.table).filter(|t| t.is_owned()) else {
                        continue;
                    };
                    let Some(fk) = table
                        .column(&partition.fk_column)
                        .filter(|c| !c.is_virtual && !c.is_shared())
                    else {
                        continue;
                    };
                    let prefix = if one_to_one { "uix" } else { "ix" };
                    let not_null = if fk.not_null {
                        Vec::new()
                    } else {
                        vec![fk.name.clone()]
                    };
                    push_unique_name(
                        indexes,
                        Index::new(
                            format!(
                                "{}_{}_fk_{}_{}_{}",
                                prefix,
                                table.name,
                                alias,
                                map.class.name,
                                fk_end.as_str()
                            ),
                            &table.name,
                            [fk.name.clone()],
                        )
                        .unique(one_to_one)
                        .with_not_null_columns(not_null),
                    );

                    let rel_class = table
                        .column(&partition.rel_class_id_column)
                        .filter(|c| !c.is_virtual && !c.is_shared());
                    if let (true, Some(rel_class)) = (*physical, rel_class) {
                        push_unique_name(
                            indexes,
                            Index::new(
                                format!("ix_{}_{}", table.name, rel_class.name),
                                &table.name,
                                [rel_class.name.clone()],
                            ),
                        );
                    }
                }
            }
            RelationshipMapping::LinkTable {
                table,
                source_id,
                target_id,
                ..
            } => {
                let Some(table) = ctx.table(table).filter(|t| t.kind == TableKind::Primary) else {
                    continue;
                };
                push_unique_name(
                    indexes,
                    Index::new(format!("ix_{}_source", table.name), &table.name, [source_id.clone()])
                        .unique(!info.target.multiplicity.is_many()),
                );
                push_unique_name(
                    indexes,
                    Index::new(format!("ix_{}_target", table.name), &table.name, [target_id.clone()])
                        .unique(!info.source.multiplicity.is_many()),
                );

                let root = ctx.root_relationship(node);
                let allow_duplicates = ctx
                    .def(root)
                    .options
                    .link_table
                    .as_ref()
                    .is_some_and(|o| o.allow_duplicate_relationships);
                if !allow_duplicates {
                    let mut columns = vec![source_id.clone(), target_id.clone()];
                    if let Some(class_id) = table.class_id_column().filter(|c| !c.is_virtual) {
                        columns.push(class_id.name.clone());
                    }
                    push_unique_name(
                        indexes,
                        Index::new(
                            format!("uix_{}_sourcetargetclassid", table.name),
                            &table.name,
                            columns,
                        )
                        .unique(true),
                    );
                }
            }
        }
    }
    Ok(())
}

fn declared_indexes(ctx: &ImportContext<'_>, node: NodeId) -> Result<Vec<Index>> {
    let key = ctx.key(node);
    let class_map = ctx.require_class_map(node)?;

    if class_map.is_mixin {
        return Err(Error::validation(key, "indexes may not be declared on mixins"));
    }
    match class_map.kind {
        ClassMapKind::NotMapped => return Ok(Vec::new()),
        ClassMapKind::ForeignKey => {
            return Err(Error::validation(
                key,
                "indexes may not be declared on relationships mapped to foreign keys",
            ))
        }
        ClassMapKind::Entity | ClassMapKind::LinkTable => {}
    }
    if class_map.strategy.strategy == MapStrategy::ExistingTable {
        return Err(Error::validation(
            key,
            "indexes may not be declared on classes mapped to an existing table",
        ));
    }
    if !class_map.strategy.is_tph() && !ctx.def(node).is_sealed() {
        return Err(Error::validation(
            key,
            "indexes may only be declared on TablePerHierarchy or sealed classes",
        ));
    }

    ctx.def(node)
        .options
        .db_indexes
        .iter()
        .map(|def| declared_index(ctx, node, def))
        .collect()
}

fn declared_index(ctx: &ImportContext<'_>, node: NodeId, def: &DbIndexDef) -> Result<Index> {
    let key = ctx.key(node);
    let class_map = ctx.require_class_map(node)?;

    let not_null_only = match def.where_clause.as_deref() {
        None => false,
        Some(clause) if clause.eq_ignore_ascii_case(INDEXED_COLUMNS_ARE_NOT_NULL) => true,
        Some(clause) => {
            return Err(Error::validation(
                key,
                format!(
                    "index '{}' has unsupported Where '{}'; only {} is supported",
                    def.name, clause, INDEXED_COLUMNS_ARE_NOT_NULL
                ),
            ))
        }
    };
    if def.properties.is_empty() {
        return Err(Error::validation(
            key,
            format!("index '{}' names no properties", def.name),
        ));
    }

    let mut columns = Vec::new();
    for access in &def.properties {
        let map = class_map.property_map(access).ok_or_else(|| {
            Error::validation(
                key,
                format!("index '{}' names unknown property '{}'", def.name, access),
            )
        })?;
        if !map.kind.is_indexable() {
            let label = match map.kind {
                PropertyMapKind::Struct => "a struct",
                PropertyMapKind::PrimitiveArray | PropertyMapKind::StructArray => "an array",
                PropertyMapKind::Navigation
                | PropertyMapKind::NavigationId
                | PropertyMapKind::NavigationRelClassId => "a navigation",
                _ => "a system",
            };
            return Err(Error::validation(
                key,
                format!(
                    "index '{}' cannot include '{}', which is {} property",
                    def.name, access, label
                ),
            ));
        }
        columns.extend(map.columns.iter().cloned());
    }

    let table_name = columns[0].table.clone();
    if columns
        .iter()
        .any(|c| !c.table.eq_ignore_ascii_case(&table_name))
    {
        return Err(Error::validation(
            key,
            format!(
                "index '{}' spans more than one table; its properties map to different tables",
                def.name
            ),
        ));
    }
    let table = ctx.require_table(&table_name)?;
    let mut names = Vec::new();
    let mut not_null = Vec::new();
    for column_ref in &columns {
        let column = table
            .column(&column_ref.column)
            .filter(|c| !c.is_virtual && !table.is_virtual())
            .ok_or_else(|| {
                Error::validation(
                    key,
                    format!(
                        "index '{}' includes column '{}', which is virtual",
                        def.name, column_ref.column
                    ),
                )
            })?;
        names.push(column.name.clone());
        if not_null_only && !column.not_null {
            not_null.push(column.name.clone());
        }
    }

    Ok(Index::new(&def.name, &table.name, names)
        .unique(def.is_unique)
        .with_class_filter(class_filter(ctx, node, &table.name))
        .with_not_null_columns(not_null)
        .declared_by(key.clone()))
}

/// Predicate restricting an index on `table` to the concrete subtree of
/// `node`, or `None` when every class in the table is in that subtree.
fn class_filter(ctx: &ImportContext<'_>, node: NodeId, table_name: &str) -> Option<ClassFilter> {
    let table = ctx.table(table_name)?;
    let host_table = match (table.kind, table.parent.as_deref()) {
        (TableKind::Overflow, Some(parent)) => parent,
        _ => table_name,
    };
    let hosted: Vec<ClassId> = ctx
        .snapshot
        .residents_of(host_table)
        .map(|m| m.id)
        .collect();

    let mut subtree = Vec::new();
    for class in std::iter::once(node).chain(ctx.graph.descendants(node)) {
        if let Some(class_map) = ctx.class_map(class).filter(|m| m.is_concrete()) {
            subtree.push(class_map.id);
        }
    }
    if hosted.iter().all(|id| subtree.contains(id)) {
        return None;
    }
    if subtree.is_empty() {
        subtree.push(ctx.class_map(node)?.id);
    }
    let column = table
        .class_id_column()
        .map_or_else(|| ctx.config.class_id_column.clone(), |c| c.name.clone());
    Some(ClassFilter::new(column, subtree))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{allocator, mixin, relationship, strategy};
    use crate::config::MappingConfig;
    use crate::schema::{
        ClassDef, ClassGraph, ClassMapOption, PrimitiveType, PropertyDef, Schema,
    };

    fn run(schema: Schema) -> Result<Vec<Index>> {
        let config = MappingConfig::default();
        let graph = ClassGraph::build(&[schema.clone()])?;
        let mut snapshot = crate::mapping::MappingSnapshot::new();
        snapshot.schemas.push(schema);
        let mut ctx = ImportContext::new(&config, graph, snapshot);
        strategy::resolve_all(&mut ctx)?;
        mixin::validate(&ctx)?;
        relationship::plan_relationships(&mut ctx)?;
        allocator::map_classes(&mut ctx)?;
        relationship::finish_relationships(&mut ctx)?;
        allocator::materialize_class_ids(&mut ctx)?;
        build_indexes(&ctx)
    }

    fn hierarchy(index: DbIndexDef, on: &str) -> Schema {
        let code = PropertyDef::primitive("Code", PrimitiveType::String);
        let mut base = ClassDef::entity("Element")
            .with_class_map(ClassMapOption::new(MapStrategy::TablePerHierarchy))
            .with_property(code.clone().not_null())
            .with_property(PropertyDef::primitive("Label", PrimitiveType::String));
        let mut sub = ClassDef::entity("Part").with_base("Element");
        if on == "Element" {
            base = base.with_index(index);
        } else {
            sub = sub.with_index(index);
        }
        Schema::new("TestSchema", "ts").with_classes([
            base,
            sub,
            ClassDef::entity("Other").with_base("Element"),
        ])
    }

    #[test]
    fn test_not_null_column_gives_plain_index() {
        let indexes = run(hierarchy(
            DbIndexDef::new("ix_element_code", ["Code"]).where_not_null(),
            "Element",
        ))
        .unwrap();
        let index = indexes.iter().find(|i| i.name == "ix_element_code").unwrap();
        assert_eq!(index.where_clause(), None);
        assert!(!index.auto_generated);
    }

    #[test]
    fn test_nullable_column_gets_is_not_null() {
        let indexes = run(hierarchy(
            DbIndexDef::new("ix_element_label", ["Label"]).where_not_null(),
            "Element",
        ))
        .unwrap();
        let index = indexes.iter().find(|i| i.name == "ix_element_label").unwrap();
        assert_eq!(index.where_clause().unwrap(), "[Label] IS NOT NULL");
    }

    #[test]
    fn test_subclass_index_is_filtered() {
        let indexes = run(hierarchy(DbIndexDef::new("ix_part_code", ["Code"]).unique(), "Part"))
            .unwrap();
        let index = indexes.iter().find(|i| i.name == "ix_part_code").unwrap();
        assert!(index.is_unique);
        let filter = index.class_filter.as_ref().unwrap();
        assert_eq!(filter.class_ids, [ClassId(2)]);
        assert_eq!(index.where_clause().unwrap(), "[ECClassId] IN (2)");

        assert!(indexes.iter().any(|i| i.name == "ix_ts_Element_ecclassid"));
    }

    #[test]
    fn test_unsupported_where_rejected() {
        let err = run(hierarchy(
            DbIndexDef::new("ix_bad", ["Code"]).with_where("Code > 3"),
            "Element",
        ))
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_duplicate_index_name_rejected() {
        let schema = hierarchy(DbIndexDef::new("ix_dup", ["Code"]), "Element").with_class(
            ClassDef::entity("Sealed")
                .sealed()
                .with_property(PropertyDef::primitive("X", PrimitiveType::Integer))
                .with_index(DbIndexDef::new("IX_DUP", ["X"])),
        );
        assert!(run(schema).unwrap_err().is_validation());
    }

    #[test]
    fn test_own_table_unsealed_rejected() {
        let schema = Schema::new("TestSchema", "ts").with_class(
            ClassDef::entity("Foo")
                .with_property(PropertyDef::primitive("X", PrimitiveType::Integer))
                .with_index(DbIndexDef::new("ix_foo_x", ["X"])),
        );
        assert!(run(schema).unwrap_err().is_validation());
    }

    #[test]
    fn test_array_property_rejected() {
        let schema = Schema::new("TestSchema", "ts").with_class(
            ClassDef::entity("Foo")
                .sealed()
                .with_property(PropertyDef::array("Tags", PrimitiveType::String))
                .with_index(DbIndexDef::new("ix_foo_tags", ["Tags"])),
        );
        assert!(run(schema).unwrap_err().is_validation());
    }
}
