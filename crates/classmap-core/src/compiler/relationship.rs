//! Relationship placement.
//!
//! A relationship is stored either as foreign-key columns on the table of
//! one end (when a navigation property asks for it) or in a link table with
//! its own Source/Target columns. Planning happens before allocation so
//! navigation properties can be allocated in declaration order alongside
//! every other property; the relationship maps themselves are rebuilt after
//! all classes have been placed.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::allocator::{allocate_column, push_map, ColumnRequest, Placement};
use super::context::{ImportContext, NavigationRef, RelationshipPlan};
use super::strategy;
use crate::error::{Error, Result};
use crate::mapping::{
    ClassMapKind, ColumnRef, ColumnType, FkPartition, ForeignKey, PropertyMap, PropertyMapKind,
    RelationshipEnd, RelationshipMap, RelationshipMapping, TableKind,
};
use crate::schema::{
    ClassKind, Constraint, Direction, ForeignKeyAction, ForeignKeyConstraint, MapStrategy, NodeId,
    PropertyDef, PropertyKind, RelationshipInfo, Strength,
};

const DEFAULT_SOURCE_COLUMN: &str = "SourceId";
const DEFAULT_TARGET_COLUMN: &str = "TargetId";
const SOURCE_CLASS_ID_COLUMN: &str = "SourceECClassId";
const TARGET_CLASS_ID_COLUMN: &str = "TargetECClassId";

/// Column names of a link table.
#[derive(Debug, Clone)]
pub(crate) struct LinkColumns {
    pub source_id: String,
    pub source_class_id: String,
    pub target_id: String,
    pub target_class_id: String,
    pub source_class_id_virtual: bool,
    pub target_class_id_virtual: bool,
}

pub(crate) fn link_columns(ctx: &ImportContext<'_>, node: NodeId) -> Result<LinkColumns> {
    let info = relationship_info(ctx, node)?;
    let root = ctx.root_relationship(node);
    let option = ctx.def(root).options.link_table.clone().unwrap_or_default();

    Ok(LinkColumns {
        source_id: option
            .source_column
            .unwrap_or_else(|| DEFAULT_SOURCE_COLUMN.to_string()),
        source_class_id: SOURCE_CLASS_ID_COLUMN.to_string(),
        target_id: option
            .target_column
            .unwrap_or_else(|| DEFAULT_TARGET_COLUMN.to_string()),
        target_class_id: TARGET_CLASS_ID_COLUMN.to_string(),
        source_class_id_virtual: single_class_end(ctx, node, &info.source),
        target_class_id_virtual: single_class_end(ctx, node, &info.target),
    })
}

/// True if an end can only ever hold instances of one class.
fn single_class_end(ctx: &ImportContext<'_>, rel: NodeId, constraint: &Constraint) -> bool {
    match constraint_nodes(ctx, rel, constraint) {
        Ok(nodes) => {
            nodes.len() == 1 && (!constraint.polymorphic || ctx.def(nodes[0]).is_sealed())
        }
        Err(_) => false,
    }
}

fn relationship_info(ctx: &ImportContext<'_>, node: NodeId) -> Result<RelationshipInfo> {
    ctx.def(node)
        .relationship_info()
        .cloned()
        .ok_or_else(|| Error::validation(ctx.key(node), "class is not a relationship"))
}

fn end_constraint(info: &RelationshipInfo, end: RelationshipEnd) -> &Constraint {
    match end {
        RelationshipEnd::Source => &info.source,
        RelationshipEnd::Target => &info.target,
    }
}

/// Resolve the classes named by a constraint.
fn constraint_nodes(
    ctx: &ImportContext<'_>,
    rel: NodeId,
    constraint: &Constraint,
) -> Result<Vec<NodeId>> {
    if constraint.classes.is_empty() {
        return Err(Error::relationship(
            ctx.key(rel),
            "constraint names no classes",
        ));
    }
    constraint
        .classes
        .iter()
        .map(|name| {
            ctx.graph
                .resolve_from(rel, name)
                .filter(|&n| ctx.def(n).kind == ClassKind::Entity)
                .ok_or_else(|| {
                    Error::relationship(
                        ctx.key(rel),
                        format!("constraint class '{}' is not an entity class of the schema", name),
                    )
                })
        })
        .collect()
}

/// Decide how every relationship is stored.
pub(crate) fn plan_relationships(ctx: &mut ImportContext<'_>) -> Result<()> {
    let mut navigations: HashMap<NodeId, Vec<NavigationRef>> = HashMap::new();
    for (node, class) in ctx.graph.nodes() {
        for property in &class.def.properties {
            let PropertyKind::Navigation {
                relationship,
                direction,
            } = &property.kind
            else {
                continue;
            };
            if class.def.kind != ClassKind::Entity || class.def.is_mixin() {
                return Err(Error::validation(
                    &class.key,
                    format!(
                        "navigation property '{}' is only supported on entity classes",
                        property.name
                    ),
                ));
            }
            let rel = ctx
                .graph
                .resolve_from(node, relationship)
                .filter(|&r| ctx.def(r).relationship_info().is_some())
                .ok_or_else(|| {
                    Error::relationship(
                        relationship,
                        format!(
                            "navigation property '{}' of '{}' references an unknown relationship",
                            property.name, class.key
                        ),
                    )
                })?;
            navigations.entry(rel).or_default().push(NavigationRef {
                class: node,
                property: property.name.clone(),
                direction: *direction,
                constraint: property.options.foreign_key_constraint.clone(),
            });
        }
    }

    let order = ctx.graph.topological_order().to_vec();
    for node in order {
        if ctx.def(node).relationship_info().is_none() {
            continue;
        }
        let navs = navigations.remove(&node).unwrap_or_default();
        let plan = plan_one(ctx, node, navs)?;
        debug!(relationship = %ctx.key(node), plan = plan_label(&plan), "planned relationship");
        ctx.plans.insert(node, plan);
    }

    check_not_mapped_navigations(ctx)
}

fn plan_label(plan: &RelationshipPlan) -> &'static str {
    match plan {
        RelationshipPlan::NotMapped => "not mapped",
        RelationshipPlan::LinkTable => "link table",
        RelationshipPlan::ForeignKey { .. } => "foreign key",
    }
}

fn plan_one(
    ctx: &ImportContext<'_>,
    node: NodeId,
    navigations: Vec<NavigationRef>,
) -> Result<RelationshipPlan> {
    let key = ctx.key(node);
    let def = ctx.def(node);
    let info = relationship_info(ctx, node)?;

    if def.options.foreign_key_constraint.is_some() {
        return Err(Error::relationship(
            key,
            "ForeignKeyConstraint must be declared on the navigation property, not on the relationship",
        ));
    }

    let bases = &ctx.graph.node(node).bases;
    if let Some(&base) = bases.first() {
        if def.options.link_table.is_some() {
            return Err(Error::relationship(
                key,
                "LinkTableRelationshipMap may only be declared on a root relationship",
            ));
        }
        if !navigations.is_empty() {
            return Err(Error::relationship(
                key,
                "navigation properties must reference the root relationship of a hierarchy",
            ));
        }
        if ctx.resolution(node)?.strategy.is_not_mapped() {
            return Ok(RelationshipPlan::NotMapped);
        }
        let inherited = match ctx.plans.get(&base) {
            Some(RelationshipPlan::ForeignKey {
                fk_end, constraint, ..
            }) => {
                if !ctx.graph.merged_properties(node)?.is_empty() {
                    return Err(Error::relationship(
                        key,
                        "relationships mapped to foreign keys may not declare properties",
                    ));
                }
                RelationshipPlan::ForeignKey {
                    fk_end: *fk_end,
                    navigations: Vec::new(),
                    constraint: constraint.clone(),
                }
            }
            Some(plan) => plan.clone(),
            None => RelationshipPlan::NotMapped,
        };
        return Ok(inherited);
    }

    constraint_nodes(ctx, node, &info.source)?;
    constraint_nodes(ctx, node, &info.target)?;

    if ctx.resolution(node)?.strategy.is_not_mapped() {
        return Ok(RelationshipPlan::NotMapped);
    }

    let has_properties = !ctx.graph.merged_properties(node)?.is_empty();
    let link_table_reason = if def.options.link_table.is_some() {
        Some("it declares LinkTableRelationshipMap")
    } else if info.is_many_to_many() {
        Some("its cardinality is N:N")
    } else if has_properties {
        Some("it has properties")
    } else {
        None
    };
    if let Some(reason) = link_table_reason {
        if let Some(nav) = navigations.first() {
            return Err(Error::relationship(
                key,
                format!(
                    "navigation property '{}' of '{}' requires a foreign key mapping, but the relationship maps to a link table because {}",
                    nav.property,
                    ctx.key(nav.class),
                    reason
                ),
            ));
        }
        return Ok(RelationshipPlan::LinkTable);
    }

    let fk_end = determine_fk_end(ctx, node, &info)?;
    let Some(first) = navigations.first().cloned() else {
        return Ok(RelationshipPlan::LinkTable);
    };

    if def.options.class_map.as_ref().is_some_and(|o| o.strategy != MapStrategy::NotMapped) {
        return Err(Error::relationship(
            key,
            "relationships mapped to foreign keys may only declare NotMapped",
        ));
    }

    let expected = match fk_end {
        RelationshipEnd::Target => Direction::Backward,
        RelationshipEnd::Source => Direction::Forward,
    };
    let fk_classes = constraint_nodes(ctx, node, end_constraint(&info, fk_end))?;
    for nav in &navigations {
        let owner = ctx.key(nav.class);
        if nav.direction != expected {
            return Err(Error::relationship(
                key,
                format!(
                    "navigation property '{}' of '{}' must have direction {:?}: the foreign key is on the {} end",
                    nav.property,
                    owner,
                    expected,
                    fk_end.as_str()
                ),
            ));
        }
        if !fk_classes
            .iter()
            .any(|&c| ctx.graph.is_subclass_of(nav.class, c))
        {
            return Err(Error::relationship(
                key,
                format!(
                    "navigation property '{}' is declared on '{}', which is not on the {} end",
                    nav.property,
                    owner,
                    fk_end.as_str()
                ),
            ));
        }
        if !nav.property.eq_ignore_ascii_case(&first.property) || nav.constraint != first.constraint
        {
            return Err(Error::relationship(
                key,
                format!(
                    "navigation properties '{}' and '{}' must have the same name and ForeignKeyConstraint",
                    first.property, nav.property
                ),
            ));
        }
    }

    if first
        .constraint
        .as_ref()
        .is_some_and(|c| c.on_delete == Some(ForeignKeyAction::Cascade))
        && info.strength != Strength::Embedding
    {
        return Err(Error::relationship(
            key,
            "OnDeleteAction Cascade is only valid for embedding relationships",
        ));
    }

    Ok(RelationshipPlan::ForeignKey {
        fk_end,
        constraint: first.constraint.clone(),
        navigations,
    })
}

/// The end whose table carries the foreign key.
fn determine_fk_end(
    ctx: &ImportContext<'_>,
    node: NodeId,
    info: &RelationshipInfo,
) -> Result<RelationshipEnd> {
    let fk_end = match (info.source.multiplicity.is_many(), info.target.multiplicity.is_many()) {
        (false, true) => RelationshipEnd::Target,
        (true, false) => RelationshipEnd::Source,
        (false, false) => match info.strength_direction {
            Direction::Forward => RelationshipEnd::Target,
            Direction::Backward => RelationshipEnd::Source,
        },
        (true, true) => {
            return Err(Error::relationship(
                ctx.key(node),
                "N:N relationships cannot be mapped to foreign keys",
            ))
        }
    };

    if info.strength == Strength::Embedding {
        let parent = match info.strength_direction {
            Direction::Forward => RelationshipEnd::Source,
            Direction::Backward => RelationshipEnd::Target,
        };
        if parent == fk_end {
            return Err(Error::relationship(
                ctx.key(node),
                format!(
                    "embedding relationships must point from the '1' end, but the {} end holds the foreign key",
                    fk_end.as_str()
                ),
            ));
        }
    }
    Ok(fk_end)
}

fn check_not_mapped_navigations(ctx: &ImportContext<'_>) -> Result<()> {
    for (node, class) in ctx.graph.nodes() {
        if class.def.kind != ClassKind::Entity || class.def.is_mixin() {
            continue;
        }
        let class_not_mapped = ctx.resolution(node)?.strategy.is_not_mapped();
        for property in ctx.graph.merged_properties(node)? {
            let PropertyKind::Navigation { relationship, .. } = &property.def.kind else {
                continue;
            };
            let Some(rel) = ctx.graph.resolve_from(property.origin, relationship) else {
                continue;
            };
            let rel_not_mapped = matches!(ctx.plans.get(&rel), Some(RelationshipPlan::NotMapped));
            if class_not_mapped && !rel_not_mapped {
                return Err(Error::relationship(
                    ctx.key(rel),
                    format!(
                        "'{}' is NotMapped, so the relationship of its navigation property '{}' must be NotMapped too",
                        class.key, property.def.name
                    ),
                ));
            }
            if !class_not_mapped && rel_not_mapped {
                return Err(Error::relationship(
                    ctx.key(rel),
                    format!(
                        "navigation property '{}' of '{}' references a relationship that is not mapped",
                        property.def.name, class.key
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Allocate the foreign key and relationship class id columns of a
/// navigation property in the placement's table.
pub(crate) fn map_navigation(
    ctx: &mut ImportContext<'_>,
    placement: &mut Placement,
    origin: NodeId,
    def: &PropertyDef,
) -> Result<()> {
    let PropertyKind::Navigation { relationship, .. } = &def.kind else {
        return Ok(());
    };
    let node = placement.node;
    let rel = ctx
        .graph
        .resolve_from(origin, relationship)
        .ok_or_else(|| Error::relationship(relationship, "relationship not found"))?;
    let Some(RelationshipPlan::ForeignKey { fk_end, .. }) = ctx.plans.get(&rel) else {
        return Err(Error::relationship(
            ctx.key(rel),
            format!(
                "navigation property '{}' of '{}' requires a foreign key mapping",
                def.name,
                ctx.key(node)
            ),
        ));
    };
    let fk_end = *fk_end;
    let info = relationship_info(ctx, rel)?;
    let not_null = def.options.foreign_key_constraint.is_some()
        && end_constraint(&info, fk_end.opposite())
            .multiplicity
            .is_required()
        && constraint_nodes(ctx, rel, end_constraint(&info, fk_end))?
            .contains(&table_root(ctx, placement)?);

    if def.options.column_name.is_some() && placement.table_kind != TableKind::Existing {
        return Err(Error::validation(
            ctx.key(node),
            format!(
                "navigation property '{}' specifies a column name, which requires ExistingTable",
                def.name
            ),
        ));
    }
    let stem = def
        .name
        .strip_suffix("Id")
        .filter(|s| !s.is_empty())
        .unwrap_or(&def.name);
    let fk_name = def
        .options
        .column_name
        .clone()
        .unwrap_or_else(|| format!("{}Id", stem));
    let rel_name = format!("{}RelECClassId", stem);

    let mut fk_request =
        ColumnRequest::new(format!("{}.Id", def.name), &fk_name, ColumnType::Integer);
    fk_request.not_null = not_null;
    let mut rel_request = ColumnRequest::new(
        format!("{}.RelECClassId", def.name),
        &rel_name,
        ColumnType::Integer,
    );
    rel_request.force_virtual = ctx.def(rel).is_sealed();

    match placement.table_kind {
        TableKind::Existing => {
            if def.options.foreign_key_constraint.is_some() {
                return Err(Error::relationship(
                    ctx.key(rel),
                    format!(
                        "navigation property '{}' maps to an existing table and cannot declare ForeignKeyConstraint",
                        def.name
                    ),
                ));
            }
            let table = ctx.require_table(&placement.table)?;
            if !table.has_column(&rel_name) {
                rel_request.force_virtual = true;
            }
        }
        TableKind::Virtual => {}
        _ if !placement.shares => {
            let table = ctx.require_table(&placement.table)?;
            for column in [&fk_name, &rel_name] {
                if table.has_column(column) {
                    return Err(Error::relationship(
                        ctx.key(rel),
                        format!(
                            "column '{}' of navigation property '{}' collides with an existing column in '{}'",
                            column, def.name, table.name
                        ),
                    ));
                }
            }
        }
        _ => {}
    }

    let fk = allocate_column(ctx, placement, &fk_request)?;
    let rel_class = allocate_column(ctx, placement, &rel_request)?;
    push_map(
        ctx,
        node,
        None,
        PropertyMap::new(
            &def.name,
            PropertyMapKind::Navigation,
            vec![fk.clone(), rel_class.clone()],
        ),
    )?;
    push_map(
        ctx,
        node,
        None,
        PropertyMap::new(fk_request.access_string, PropertyMapKind::NavigationId, vec![fk]),
    )?;
    push_map(
        ctx,
        node,
        None,
        PropertyMap::new(
            rel_request.access_string,
            PropertyMapKind::NavigationRelClassId,
            vec![rel_class],
        ),
    )
}

/// The class whose rows alone fill the placement's table: the owner of a
/// primary or existing table, or the direct subclass a joined table was
/// created for.
fn table_root(ctx: &ImportContext<'_>, placement: &Placement) -> Result<NodeId> {
    let table = ctx.require_table(&placement.table)?;
    if table.kind == TableKind::Joined {
        if let Some(branch) = strategy::joined_branch(ctx, placement.node)? {
            return Ok(branch);
        }
    }
    Ok(table
        .exclusive_root
        .as_ref()
        .and_then(|key| ctx.graph.find(key))
        .unwrap_or(placement.node))
}

/// Rebuild relationship maps, the class maps of foreign-key relationships
/// and the physical foreign keys derived from them.
pub(crate) fn finish_relationships(ctx: &mut ImportContext<'_>) -> Result<()> {
    ctx.snapshot.relationship_maps.clear();
    let order = ctx.graph.topological_order().to_vec();
    for node in order {
        if ctx.def(node).relationship_info().is_none() {
            continue;
        }
        match ctx.plans.get(&node).cloned() {
            Some(RelationshipPlan::LinkTable) => finish_link_table(ctx, node)?,
            Some(RelationshipPlan::ForeignKey {
                fk_end, constraint, ..
            }) => finish_foreign_key(ctx, node, fk_end, constraint)?,
            Some(RelationshipPlan::NotMapped) | None => {}
        }
    }
    Ok(())
}

fn finish_link_table(ctx: &mut ImportContext<'_>, node: NodeId) -> Result<()> {
    let class_map = ctx.require_class_map(node)?;
    if class_map.kind != ClassMapKind::LinkTable {
        return Ok(());
    }
    let table = class_map
        .primary_table
        .clone()
        .ok_or_else(|| Error::relationship(ctx.key(node), "link table relationship has no table"))?;
    let link = link_columns(ctx, node)?;
    let info = relationship_info(ctx, node)?;
    let root = ctx.root_relationship(node);
    let create_fks = ctx
        .def(root)
        .options
        .link_table
        .as_ref()
        .map_or(true, |o| o.create_foreign_key_constraints);

    let link_table = ctx.require_table(&table)?;
    if create_fks && link_table.kind == TableKind::Primary {
        let id_column = link_table
            .instance_id_column()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| ctx.config.instance_id_column.clone());
        let mut foreign_keys = Vec::new();
        for (column, constraint) in [(&link.source_id, &info.source), (&link.target_id, &info.target)] {
            let ends = end_tables(ctx, node, constraint)?;
            if let [end] = ends.as_slice() {
                let referenced_column = ctx
                    .require_table(end)?
                    .instance_id_column()
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| id_column.clone());
                foreign_keys.push(ForeignKey {
                    column: column.clone(),
                    referenced_table: end.clone(),
                    referenced_column,
                    on_delete: ForeignKeyAction::Cascade,
                    on_update: None,
                });
            }
        }
        let link_table = ctx.require_table_mut(&table)?;
        for fk in foreign_keys {
            if link_table.foreign_key_on(&fk.column).is_none() {
                link_table.foreign_keys.push(fk);
            }
        }
    }

    let key = ctx.key(node).clone();
    ctx.snapshot.relationship_maps.push(RelationshipMap {
        class: key,
        mapping: RelationshipMapping::LinkTable {
            table,
            source_id: link.source_id,
            source_class_id: link.source_class_id,
            target_id: link.target_id,
            target_class_id: link.target_class_id,
        },
    });
    Ok(())
}

/// Non-virtual tables holding instances of a constraint's classes.
fn end_tables(ctx: &ImportContext<'_>, rel: NodeId, constraint: &Constraint) -> Result<Vec<String>> {
    let mut classes = Vec::new();
    for class in constraint_nodes(ctx, rel, constraint)? {
        classes.push(class);
        if constraint.polymorphic {
            classes.extend(ctx.graph.descendants(class));
        }
    }

    let mut tables: Vec<String> = Vec::new();
    for class in classes {
        let Some(class_map) = ctx.class_map(class) else {
            continue;
        };
        if class_map.kind != ClassMapKind::Entity || class_map.is_mixin {
            continue;
        }
        let Some(primary) = class_map.primary_table.as_deref() else {
            continue;
        };
        if ctx.table(primary).is_some_and(|t| t.is_virtual()) {
            continue;
        }
        if !tables.iter().any(|t| t.eq_ignore_ascii_case(primary)) {
            tables.push(primary.to_string());
        }
    }
    Ok(tables)
}

/// FK columns of every class carrying the navigation property.
fn fk_partitions(ctx: &ImportContext<'_>, navigations: &[NavigationRef]) -> Vec<FkPartition> {
    let mut seen = HashSet::new();
    let mut partitions = Vec::new();
    for nav in navigations {
        let mut classes = vec![nav.class];
        classes.extend(ctx.graph.descendants(nav.class));
        for class in classes {
            let Some(class_map) = ctx.class_map(class) else {
                continue;
            };
            let fk = class_map
                .property_map(&format!("{}.Id", nav.property))
                .and_then(|m| m.columns.first());
            let rel = class_map
                .property_map(&format!("{}.RelECClassId", nav.property))
                .and_then(|m| m.columns.first());
            let (Some(fk), Some(rel)) = (fk, rel) else {
                continue;
            };
            let Some(table) = ctx.table(&fk.table) else {
                continue;
            };
            if !seen.insert((fk.table.to_lowercase(), fk.column.to_lowercase())) {
                continue;
            }
            partitions.push(FkPartition {
                table: table.name.clone(),
                id_column: table
                    .instance_id_column()
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| ctx.config.instance_id_column.clone()),
                class_id_column: table
                    .class_id_column()
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| ctx.config.class_id_column.clone()),
                fk_column: fk.column.clone(),
                rel_class_id_column: rel.column.clone(),
            });
        }
    }
    partitions
}

fn finish_foreign_key(
    ctx: &mut ImportContext<'_>,
    node: NodeId,
    fk_end: RelationshipEnd,
    constraint: Option<ForeignKeyConstraint>,
) -> Result<()> {
    let root = ctx.root_relationship(node);
    let navigations = match ctx.plans.get(&root) {
        Some(RelationshipPlan::ForeignKey { navigations, .. }) => navigations.clone(),
        _ => Vec::new(),
    };
    let info = relationship_info(ctx, node)?;
    let partitions = fk_partitions(ctx, &navigations);
    let referenced = end_tables(ctx, node, end_constraint(&info, fk_end.opposite()))?;

    let on_delete = constraint.as_ref().map(|c| {
        c.on_delete.unwrap_or(if info.strength == Strength::Embedding {
            ForeignKeyAction::Cascade
        } else {
            ForeignKeyAction::SetNull
        })
    });

    rebuild_foreign_key_class_map(ctx, node, fk_end, &partitions, &referenced)?;

    if node == root {
        if let (Some(constraint), Some(on_delete)) = (&constraint, on_delete) {
            add_physical_foreign_keys(ctx, node, &partitions, &referenced, on_delete, constraint.on_update)?;
        }
    }

    let key = ctx.key(node).clone();
    ctx.snapshot.relationship_maps.push(RelationshipMap {
        class: key,
        mapping: RelationshipMapping::ForeignKey {
            fk_end,
            partitions,
            on_delete,
            physical: constraint.is_some(),
        },
    });
    Ok(())
}

fn rebuild_foreign_key_class_map(
    ctx: &mut ImportContext<'_>,
    node: NodeId,
    fk_end: RelationshipEnd,
    partitions: &[FkPartition],
    referenced: &[String],
) -> Result<()> {
    if ctx.require_class_map(node)?.kind != ClassMapKind::ForeignKey {
        return Ok(());
    }
    let mut ids = Vec::new();
    let mut class_ids = Vec::new();
    let mut fks = Vec::new();
    let mut rel_class_ids = Vec::new();
    for p in partitions {
        ids.push(ColumnRef::new(&p.table, &p.id_column));
        class_ids.push(ColumnRef::new(&p.table, &p.class_id_column));
        fks.push(ColumnRef::new(&p.table, &p.fk_column));
        rel_class_ids.push(ColumnRef::new(&p.table, &p.rel_class_id_column));
    }

    let mut referenced_class_ids = Vec::new();
    for table in referenced {
        if let Some(column) = ctx.table(table).and_then(|t| t.class_id_column()) {
            referenced_class_ids.push(ColumnRef::new(table, &column.name));
        }
    }

    let (source_id, source_class, target_id, target_class) = match fk_end {
        RelationshipEnd::Target => (fks, referenced_class_ids, ids.clone(), class_ids),
        RelationshipEnd::Source => (ids.clone(), class_ids, fks, referenced_class_ids),
    };
    let maps = vec![
        PropertyMap::new("ECInstanceId", PropertyMapKind::InstanceId, ids),
        PropertyMap::new("ECClassId", PropertyMapKind::ClassId, rel_class_ids),
        PropertyMap::new("SourceECInstanceId", PropertyMapKind::SourceInstanceId, source_id),
        PropertyMap::new("SourceECClassId", PropertyMapKind::SourceClassId, source_class),
        PropertyMap::new("TargetECInstanceId", PropertyMapKind::TargetInstanceId, target_id),
        PropertyMap::new("TargetECClassId", PropertyMapKind::TargetClassId, target_class),
    ];

    let class_map = ctx.class_map_mut(node)?;
    class_map.property_maps = maps;
    for partition in partitions {
        class_map.touch_table(&partition.table);
    }
    Ok(())
}

fn add_physical_foreign_keys(
    ctx: &mut ImportContext<'_>,
    node: NodeId,
    partitions: &[FkPartition],
    referenced: &[String],
    on_delete: ForeignKeyAction,
    on_update: Option<ForeignKeyAction>,
) -> Result<()> {
    let key = ctx.key(node).clone();
    let referenced_table = match referenced {
        [table] => table.clone(),
        [] => {
            return Err(Error::relationship(
                &key,
                "ForeignKeyConstraint requires the referenced end to map to a physical table",
            ))
        }
        _ => {
            return Err(Error::relationship(
                &key,
                format!(
                    "ForeignKeyConstraint requires the referenced end to map to one table, found {}",
                    referenced.join(", ")
                ),
            ))
        }
    };
    let referenced_column = ctx
        .require_table(&referenced_table)?
        .instance_id_column()
        .map(|c| c.name.clone())
        .unwrap_or_else(|| ctx.config.instance_id_column.clone());

    for partition in partitions {
        let table = ctx.require_table(&partition.table)?;
        if on_delete == ForeignKeyAction::Cascade && table.kind == TableKind::Joined {
            return Err(Error::relationship(
                &key,
                format!(
                    "OnDeleteAction Cascade is not supported for foreign keys in joined table '{}'",
                    table.name
                ),
            ));
        }
        if !table.is_owned() {
            continue;
        }
        let physical = table
            .column(&partition.fk_column)
            .is_some_and(|c| !c.is_shared() && !c.is_virtual);
        if !physical || table.foreign_key_on(&partition.fk_column).is_some() {
            continue;
        }
        let fk = ForeignKey {
            column: partition.fk_column.clone(),
            referenced_table: referenced_table.clone(),
            referenced_column: referenced_column.clone(),
            on_delete,
            on_update,
        };
        debug!(table = %partition.table, column = %fk.column, references = %referenced_table, "added foreign key");
        ctx.require_table_mut(&partition.table)?.foreign_keys.push(fk);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{allocator, mixin, strategy};
    use crate::config::MappingConfig;
    use crate::mapping::MappingSnapshot;
    use crate::schema::{
        ClassDef, ClassGraph, ClassMapOption, LinkTableRelationshipMap, Multiplicity, PrimitiveType,
        Schema, ShareColumns,
    };

    fn run(schema: Schema) -> Result<MappingSnapshot> {
        let config = MappingConfig::default();
        let graph = ClassGraph::build(&[schema.clone()])?;
        let mut snapshot = MappingSnapshot::new();
        snapshot.schemas.push(schema);
        let mut ctx = ImportContext::new(&config, graph, snapshot);
        strategy::resolve_all(&mut ctx)?;
        mixin::validate(&ctx)?;
        plan_relationships(&mut ctx)?;
        allocator::map_classes(&mut ctx)?;
        finish_relationships(&mut ctx)?;
        allocator::materialize_class_ids(&mut ctx)?;
        Ok(ctx.into_snapshot())
    }

    fn one_to_many(name: &str) -> ClassDef {
        ClassDef::relationship(
            name,
            RelationshipInfo::new(
                Constraint::new(Multiplicity::ZERO_ONE, ["A"]),
                Constraint::new(Multiplicity::ZERO_MANY, ["B"]),
            ),
        )
        .sealed()
    }

    fn schema_with(rel: ClassDef, nav: PropertyDef) -> Schema {
        Schema::new("TestSchema", "ts").with_classes([
            ClassDef::entity("A").with_property(PropertyDef::primitive("Name", PrimitiveType::String)),
            ClassDef::entity("B").with_property(nav),
            rel,
        ])
    }

    #[test]
    fn test_foreign_key_columns_on_many_end() {
        let schema = schema_with(
            one_to_many("AHasB"),
            PropertyDef::navigation("A", "AHasB", Direction::Backward),
        );
        let snapshot = run(schema).unwrap();

        let table = snapshot.table("ts_B").unwrap();
        assert!(table.has_column("AId"));
        assert!(table.column("ARelECClassId").unwrap().is_virtual);
        assert!(table.foreign_keys.is_empty());

        let source = snapshot
            .lookup_property("ts", "AHasB", "SourceECInstanceId")
            .unwrap();
        assert_eq!(source.columns().unwrap(), [ColumnRef::new("ts_B", "AId")]);
        let target = snapshot
            .lookup_property("ts", "AHasB", "TargetECInstanceId")
            .unwrap();
        assert_eq!(target.columns().unwrap(), [ColumnRef::new("ts_B", "Id")]);

        let nav = snapshot.lookup_property("ts", "B", "A.Id").unwrap();
        assert_eq!(nav.columns().unwrap()[0].column, "AId");
    }

    #[test]
    fn test_foreign_key_constraint_is_physical() {
        let nav = PropertyDef::navigation("A", "AHasB", Direction::Backward)
            .with_foreign_key_constraint(ForeignKeyConstraint::new());
        let snapshot = run(schema_with(one_to_many("AHasB"), nav)).unwrap();

        let fk = snapshot.table("ts_B").unwrap().foreign_key_on("AId").unwrap();
        assert_eq!(fk.referenced_table, "ts_A");
        assert_eq!(fk.on_delete, ForeignKeyAction::SetNull);
        match &snapshot.relationship_map("ts", "AHasB").unwrap().mapping {
            RelationshipMapping::ForeignKey { physical, partitions, .. } => {
                assert!(*physical);
                assert_eq!(partitions.len(), 1);
            }
            other => panic!("unexpected mapping {:?}", other),
        }
    }

    #[test]
    fn test_wrong_direction_rejected() {
        let schema = schema_with(
            one_to_many("AHasB"),
            PropertyDef::navigation("A", "AHasB", Direction::Forward),
        );
        assert!(run(schema).unwrap_err().is_relationship());
    }

    #[test]
    fn test_cascade_requires_embedding() {
        let nav = PropertyDef::navigation("A", "AHasB", Direction::Backward).with_foreign_key_constraint(
            ForeignKeyConstraint::new().on_delete(ForeignKeyAction::Cascade),
        );
        assert!(run(schema_with(one_to_many("AHasB"), nav)).unwrap_err().is_relationship());
    }

    #[test]
    fn test_constraint_on_relationship_rejected() {
        let rel = one_to_many("AHasB").with_foreign_key_constraint(ForeignKeyConstraint::new());
        let nav = PropertyDef::navigation("A", "AHasB", Direction::Backward);
        assert!(run(schema_with(rel, nav)).unwrap_err().is_relationship());
    }

    #[test]
    fn test_many_to_many_link_table() {
        let rel = ClassDef::relationship(
            "AHasB",
            RelationshipInfo::new(
                Constraint::new(Multiplicity::ZERO_MANY, ["A"]),
                Constraint::new(Multiplicity::ZERO_MANY, ["B"]),
            ),
        );
        let schema = Schema::new("TestSchema", "ts").with_classes([
            ClassDef::entity("A"),
            ClassDef::entity("B"),
            rel,
        ]);
        let snapshot = run(schema).unwrap();

        let table = snapshot.table("ts_AHasB").unwrap();
        let names: Vec<_> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            ["Id", "ECClassId", "SourceId", "SourceECClassId", "TargetId", "TargetECClassId"]
        );
        assert_eq!(table.foreign_keys.len(), 2);
        let source = snapshot
            .lookup_property("ts", "AHasB", "SourceECInstanceId")
            .unwrap();
        assert_eq!(source.columns().unwrap()[0], ColumnRef::new("ts_AHasB", "SourceId"));
    }

    #[test]
    fn test_navigation_on_link_table_rejected() {
        let rel = one_to_many("AHasB").with_link_table(LinkTableRelationshipMap::new());
        let nav = PropertyDef::navigation("A", "AHasB", Direction::Backward);
        assert!(run(schema_with(rel, nav)).unwrap_err().is_relationship());
    }

    #[test]
    fn test_without_navigation_falls_back_to_link_table() {
        let schema = Schema::new("TestSchema", "ts").with_classes([
            ClassDef::entity("A"),
            ClassDef::entity("B"),
            one_to_many("AHasB"),
        ]);
        let snapshot = run(schema).unwrap();
        assert!(snapshot.table("ts_AHasB").is_some());
        assert!(matches!(
            snapshot.relationship_map("ts", "AHasB").unwrap().mapping,
            RelationshipMapping::LinkTable { .. }
        ));
    }

    #[test]
    fn test_required_source_makes_column_not_null() {
        let rel = ClassDef::relationship(
            "AOwnsB",
            RelationshipInfo::new(
                Constraint::new(Multiplicity::ONE_ONE, ["A"]),
                Constraint::new(Multiplicity::ZERO_MANY, ["B"]),
            )
            .with_strength(Strength::Embedding),
        );
        let nav = PropertyDef::navigation("Owner", "AOwnsB", Direction::Backward)
            .with_foreign_key_constraint(ForeignKeyConstraint::new());
        let snapshot = run(schema_with(rel, nav)).unwrap();

        let table = snapshot.table("ts_B").unwrap();
        assert!(table.column("OwnerId").unwrap().not_null);
        assert!(!table.column("OwnerRelECClassId").unwrap().is_virtual);
        assert_eq!(
            table.foreign_key_on("OwnerId").unwrap().on_delete,
            ForeignKeyAction::Cascade
        );
    }

    #[test]
    fn test_shared_foreign_key_column_stays_nullable() {
        let rel = ClassDef::relationship(
            "AOwnsB",
            RelationshipInfo::new(
                Constraint::new(Multiplicity::ONE_ONE, ["A"]),
                Constraint::new(Multiplicity::ZERO_MANY, ["B"]),
            )
            .with_strength(Strength::Embedding),
        );
        let schema = Schema::new("TestSchema", "ts").with_classes([
            ClassDef::entity("A"),
            ClassDef::entity("B")
                .with_class_map(ClassMapOption::new(MapStrategy::TablePerHierarchy))
                .with_share_columns(ShareColumns::new())
                .with_property(
                    PropertyDef::navigation("Owner", "AOwnsB", Direction::Backward)
                        .with_foreign_key_constraint(ForeignKeyConstraint::new()),
                ),
            rel,
        ]);
        let snapshot = run(schema).unwrap();

        let nav = snapshot.lookup_property("ts", "B", "Owner.Id").unwrap();
        assert_eq!(nav.columns().unwrap(), [ColumnRef::new("ts_B", "ps1")]);
        let column = snapshot.table("ts_B").unwrap().column("ps1").unwrap();
        assert!(column.is_shared());
        assert!(!column.not_null);
    }

    #[test]
    fn test_embedding_from_many_end_rejected() {
        let rel = ClassDef::relationship(
            "AOwnsB",
            RelationshipInfo::new(
                Constraint::new(Multiplicity::ZERO_ONE, ["A"]),
                Constraint::new(Multiplicity::ZERO_MANY, ["B"]),
            )
            .with_strength(Strength::Embedding)
            .with_strength_direction(Direction::Backward),
        );
        let nav = PropertyDef::navigation("A", "AOwnsB", Direction::Backward);
        assert!(run(schema_with(rel, nav)).unwrap_err().is_relationship());
    }
}
