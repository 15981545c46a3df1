//! Table and column allocation.
//!
//! Every mapped class gets a resident table, and every reachable property
//! gets one or more columns in it. Properties either own a named column or
//! claim a column of the table's shared pool (`ps<N>`/`js<N>`); once the
//! pool reaches its threshold, allocation continues in an overflow table
//! (`os<N>`). Allocation is re-runnable: property maps committed by an
//! earlier import are kept and only missing ones are allocated.

use std::collections::HashSet;

use tracing::debug;

use super::context::{ImportContext, RelationshipPlan};
use super::mixin;
use super::relationship;
use crate::error::{Error, Result};
use crate::mapping::{
    ClassId, ClassMap, ClassMapKind, Column, ColumnKind, ColumnRef, ColumnType, ForeignKey,
    JoinedTableInfo, PropertyMap, PropertyMapKind, ResolvedStrategy, Table, TableKind,
};
use crate::schema::{
    Collation, ForeignKeyAction, MapStrategy, NodeId, PropertyDef, PropertyKind, PropertyOptions,
};

/// Property names that collide with system properties.
pub(crate) const RESERVED_PROPERTY_NAMES: &[&str] = &[
    "ECInstanceId",
    "Id",
    "ECClassId",
    "SourceECInstanceId",
    "SourceId",
    "SourceECClassId",
    "TargetECInstanceId",
    "TargetId",
    "TargetECClassId",
];

const MAX_STRUCT_DEPTH: usize = 32;

/// Create class maps and allocate columns for every class, bases first.
pub(crate) fn map_classes(ctx: &mut ImportContext<'_>) -> Result<()> {
    let order = ctx.graph.topological_order().to_vec();
    for node in order {
        if ctx.def(node).is_struct() {
            continue;
        }
        ensure_class_map(ctx, node)?;
        map_properties(ctx, node)?;
    }
    Ok(())
}

/// Where new columns of one class go, and which columns it may not reuse.
pub(crate) struct Placement {
    pub node: NodeId,
    pub table: String,
    pub table_kind: TableKind,
    pub shares: bool,
    pub max_before_overflow: Option<u32>,
    used: HashSet<(String, String)>,
}

impl Placement {
    pub fn new(ctx: &ImportContext<'_>, node: NodeId) -> Result<Self> {
        let class_map = ctx.require_class_map(node)?;
        let table = class_map
            .resident_table()
            .ok_or_else(|| Error::validation(ctx.key(node), "class has no resident table"))?
            .to_string();
        let table_kind = ctx.require_table(&table)?.kind;

        let mut used = HashSet::new();
        for member in mixin::row_family(&ctx.graph, node) {
            if let Some(member_map) = ctx.class_map(member) {
                for map in &member_map.property_maps {
                    for column in &map.columns {
                        used.insert(column_key(&column.table, &column.column));
                    }
                }
            }
        }

        let strategy = &class_map.strategy;
        Ok(Self {
            node,
            table,
            table_kind,
            shares: strategy.shares_columns(),
            max_before_overflow: strategy.tph.as_ref().and_then(|t| t.max_before_overflow),
            used,
        })
    }

    fn is_used(&self, table: &str, column: &str) -> bool {
        self.used.contains(&column_key(table, column))
    }

    fn claim(&mut self, table: &str, column: &str) -> ColumnRef {
        self.used.insert(column_key(table, column));
        ColumnRef::new(table, column)
    }
}

fn column_key(table: &str, column: &str) -> (String, String) {
    (table.to_lowercase(), column.to_lowercase())
}

/// A column a property needs.
#[derive(Debug, Clone)]
pub(crate) struct ColumnRequest {
    pub access_string: String,
    pub name: String,
    pub ty: ColumnType,
    pub not_null: bool,
    pub unique: bool,
    pub collation: Option<Collation>,
    /// Model the column without storing it.
    pub force_virtual: bool,
}

impl ColumnRequest {
    pub fn new(access_string: impl Into<String>, name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            access_string: access_string.into(),
            name: name.into(),
            ty,
            not_null: false,
            unique: false,
            collation: None,
            force_virtual: false,
        }
    }

    fn with_options(mut self, options: &PropertyOptions) -> Self {
        self.not_null = options.is_nullable == Some(false);
        self.unique = options.is_unique == Some(true);
        self.collation = options.collation;
        self
    }
}

fn ensure_class_map(ctx: &mut ImportContext<'_>, node: NodeId) -> Result<()> {
    if ctx.class_map(node).is_some() {
        return Ok(());
    }

    let resolution = ctx.resolution(node)?.clone();
    let kind = class_map_kind(ctx, node, &resolution.strategy);
    let id = ClassId(ctx.snapshot.next_class_id);
    ctx.snapshot.next_class_id += 1;

    let mut class_map = ClassMap::new(
        ctx.key(node).clone(),
        id,
        resolution.strategy.clone(),
        kind,
    );
    class_map.is_mixin = resolution.is_mixin;
    class_map.is_abstract = ctx.def(node).is_abstract();

    if matches!(kind, ClassMapKind::Entity | ClassMapKind::LinkTable) {
        let (primary, joined) = place_class(ctx, node, &resolution.strategy, kind)?;
        class_map.touch_table(&primary);
        class_map.primary_table = Some(primary);
        if let Some(joined) = joined {
            class_map.touch_table(&joined);
            class_map.joined_table = Some(joined);
        }
    }

    debug!(class = %class_map.class, id = id.0, kind = ?kind, "created class map");
    ctx.add_class_map(class_map);

    if matches!(kind, ClassMapKind::Entity | ClassMapKind::LinkTable) {
        refresh_system_maps(ctx, node)?;
    }
    Ok(())
}

fn class_map_kind(ctx: &ImportContext<'_>, node: NodeId, strategy: &ResolvedStrategy) -> ClassMapKind {
    if strategy.is_not_mapped() {
        return ClassMapKind::NotMapped;
    }
    if ctx.def(node).relationship_info().is_none() {
        return ClassMapKind::Entity;
    }
    match ctx.plans.get(&node) {
        Some(RelationshipPlan::LinkTable) => ClassMapKind::LinkTable,
        Some(RelationshipPlan::ForeignKey { .. }) => ClassMapKind::ForeignKey,
        Some(RelationshipPlan::NotMapped) | None => ClassMapKind::NotMapped,
    }
}

/// Primary and joined table of a new class map, creating tables as needed.
fn place_class(
    ctx: &mut ImportContext<'_>,
    node: NodeId,
    strategy: &ResolvedStrategy,
    kind: ClassMapKind,
) -> Result<(String, Option<String>)> {
    let key = ctx.key(node).clone();
    let tph = match &strategy.tph {
        Some(tph) if tph.root != key => tph.clone(),
        _ => return Ok((create_primary_table(ctx, node, strategy, kind)?, None)),
    };

    let root = ctx
        .graph
        .find(&tph.root)
        .ok_or_else(|| Error::validation(&key, format!("hierarchy root '{}' not found", tph.root)))?;
    let primary = ctx
        .require_class_map(root)?
        .primary_table
        .clone()
        .ok_or_else(|| Error::validation(&key, "hierarchy root has no table"))?;

    if tph.joined_table != JoinedTableInfo::JoinedTable {
        return Ok((primary, None));
    }

    let parent = tph_base(ctx, node)?;
    let joined = if ctx.resolution(parent)?.strategy.joined_table()
        == JoinedTableInfo::ParentOfJoinedTable
    {
        create_joined_table(ctx, node, &primary)?
    } else {
        ctx.require_class_map(parent)?
            .joined_table
            .clone()
            .ok_or_else(|| Error::validation(&key, "base class has no joined table"))?
    };
    Ok((primary, Some(joined)))
}

/// First non-mixin base.
fn tph_base(ctx: &ImportContext<'_>, node: NodeId) -> Result<NodeId> {
    for &base in &ctx.graph.node(node).bases {
        if !ctx.resolution(base)?.is_mixin {
            return Ok(base);
        }
    }
    Err(Error::validation(ctx.key(node), "class has no non-mixin base"))
}

fn check_new_table_name(ctx: &ImportContext<'_>, node: NodeId, name: &str) -> Result<()> {
    if let Some(existing) = ctx.table(name) {
        let owner = existing
            .exclusive_root
            .as_ref()
            .map_or_else(|| "another class".to_string(), |k| format!("'{}'", k));
        return Err(Error::table_conflict(
            name,
            format!("table of '{}' is already used by {}", ctx.key(node), owner),
        ));
    }
    if ctx.snapshot.existing_table(name).is_some() {
        return Err(Error::table_conflict(
            name,
            "a table with this name already exists and can only be mapped with ExistingTable",
        ));
    }
    Ok(())
}

fn create_primary_table(
    ctx: &mut ImportContext<'_>,
    node: NodeId,
    strategy: &ResolvedStrategy,
    kind: ClassMapKind,
) -> Result<String> {
    if strategy.strategy == MapStrategy::ExistingTable {
        return map_existing_table(ctx, node, strategy, kind);
    }

    let class = ctx.graph.node(node);
    let name = format!("{}_{}", class.table_prefix, class.def.name);
    check_new_table_name(ctx, node, &name)?;

    let is_mixin = ctx.resolution(node)?.is_mixin;
    let table_kind = if is_mixin || (class.def.is_abstract() && !strategy.is_tph()) {
        TableKind::Virtual
    } else {
        TableKind::Primary
    };
    let is_virtual = table_kind == TableKind::Virtual;
    let id_column = strategy
        .id_column
        .clone()
        .unwrap_or_else(|| ctx.config.instance_id_column.clone());

    let mut table = Table::new(&name, table_kind)
        .with_exclusive_root(class.key.clone())
        .with_column(Column::instance_id(id_column).with_virtual(is_virtual))
        .with_column(Column::class_id(&ctx.config.class_id_column));

    if kind == ClassMapKind::LinkTable {
        let link = relationship::link_columns(ctx, node)?;
        for (column, class_id_virtual) in [
            (&link.source_id, false),
            (&link.source_class_id, link.source_class_id_virtual),
            (&link.target_id, false),
            (&link.target_class_id, link.target_class_id_virtual),
        ] {
            table.columns.push(
                Column::data(column, ColumnType::Integer)
                    .with_not_null(true)
                    .with_virtual(is_virtual || class_id_virtual),
            );
        }
    }

    debug!(table = %name, kind = table_kind.as_str(), class = %class.key, "created table");
    ctx.add_table(table);
    Ok(name)
}

fn create_joined_table(ctx: &mut ImportContext<'_>, node: NodeId, primary: &str) -> Result<String> {
    let class = ctx.graph.node(node);
    let name = format!("{}_{}", class.table_prefix, class.def.name);
    check_new_table_name(ctx, node, &name)?;

    let parent = ctx.require_table(primary)?;
    let id_column = parent
        .instance_id_column()
        .map(|c| c.name.clone())
        .unwrap_or_else(|| ctx.config.instance_id_column.clone());

    let mut table = Table::new(&name, TableKind::Joined)
        .with_parent(primary)
        .with_column(Column::instance_id(&id_column))
        .with_column(Column::class_id(&ctx.config.class_id_column));
    table.foreign_keys.push(ForeignKey {
        column: id_column.clone(),
        referenced_table: primary.to_string(),
        referenced_column: id_column,
        on_delete: ForeignKeyAction::Cascade,
        on_update: None,
    });

    debug!(table = %name, parent = %primary, class = %class.key, "created joined table");
    ctx.add_table(table);
    Ok(name)
}

fn map_existing_table(
    ctx: &mut ImportContext<'_>,
    node: NodeId,
    strategy: &ResolvedStrategy,
    kind: ClassMapKind,
) -> Result<String> {
    let key = ctx.key(node).clone();
    let name = strategy
        .table_name
        .clone()
        .ok_or_else(|| Error::validation(&key, "ExistingTable requires a table name"))?;
    let existing = ctx.snapshot.existing_table(&name).cloned().ok_or_else(|| {
        Error::table_conflict(&name, format!("'{}' requires the table to exist", key))
    })?;

    if ctx.table(&name).is_some() {
        return Err(Error::table_conflict(
            &name,
            format!("table of '{}' is already mapped by another class", key),
        ));
    }

    let primary_keys: Vec<_> = existing.primary_key_columns().collect();
    if primary_keys.len() > 1 {
        return Err(Error::table_conflict(
            &name,
            "tables with a multi-column primary key cannot be mapped",
        ));
    }
    let id_name = strategy
        .id_column
        .clone()
        .unwrap_or_else(|| ctx.config.instance_id_column.clone());
    let id_column = existing.column(&id_name).ok_or_else(|| {
        Error::table_conflict(&name, format!("id column '{}' does not exist", id_name))
    })?;
    if let Some(pk) = primary_keys.first() {
        if !pk.name.eq_ignore_ascii_case(&id_column.name) {
            return Err(Error::table_conflict(
                &name,
                format!("id column '{}' is not the primary key", id_column.name),
            ));
        }
    }

    let mut table = Table::new(&existing.name, TableKind::Existing).with_exclusive_root(key.clone());
    for column in &existing.columns {
        let column_kind = if column.name.eq_ignore_ascii_case(&id_column.name) {
            ColumnKind::InstanceId
        } else if column.name.eq_ignore_ascii_case(&ctx.config.class_id_column) {
            ColumnKind::ClassId
        } else {
            ColumnKind::Data
        };
        table.columns.push(
            Column::new(&column.name, column.ty, column_kind)
                .with_not_null(column.not_null)
                .with_unique(column.unique),
        );
    }
    if table.class_id_column().is_none() {
        let class_id_name = table.unique_column_name(&ctx.config.class_id_column);
        table.columns.push(Column::class_id(class_id_name));
    }

    if kind == ClassMapKind::LinkTable {
        let link = relationship::link_columns(ctx, node)?;
        for column in [&link.source_id, &link.target_id] {
            if !table.has_column(column) {
                return Err(Error::table_conflict(
                    &name,
                    format!("link table column '{}' does not exist", column),
                ));
            }
        }
        for column in [&link.source_class_id, &link.target_class_id] {
            if !table.has_column(column) {
                table.columns.push(
                    Column::data(column, ColumnType::Integer)
                        .with_not_null(true)
                        .with_virtual(true),
                );
            }
        }
    }

    debug!(table = %name, class = %key, "mapped existing table");
    ctx.add_table(table);
    Ok(existing.name)
}

fn map_properties(ctx: &mut ImportContext<'_>, node: NodeId) -> Result<()> {
    let kind = ctx.require_class_map(node)?.kind;
    if !matches!(kind, ClassMapKind::Entity | ClassMapKind::LinkTable) {
        return Ok(());
    }

    let properties = ctx.graph.merged_properties(node)?;
    let mut placement = Placement::new(ctx, node)?;

    for property in properties {
        if property.origin == node {
            check_reserved_name(ctx, node, &property.def)?;
        }
        if ctx.require_class_map(node)?.has_property_map(&property.def.name) {
            continue;
        }
        if let Some(maps) = mixin::inherited_maps(ctx, node, &property.def.name)? {
            install_maps(ctx, node, maps)?;
            continue;
        }
        if property.def.is_navigation() {
            relationship::map_navigation(ctx, &mut placement, property.origin, &property.def)?;
        } else {
            allocate_property(ctx, &mut placement, property.origin, &property.def, None, 0)?;
        }
    }

    mixin::check_distinct_columns(ctx, node)?;
    refresh_system_maps(ctx, node)
}

fn check_reserved_name(ctx: &ImportContext<'_>, node: NodeId, property: &PropertyDef) -> Result<()> {
    if RESERVED_PROPERTY_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(&property.name))
    {
        return Err(Error::validation(
            ctx.key(node),
            format!("property name '{}' is reserved for a system property", property.name),
        ));
    }
    Ok(())
}

/// Add cloned maps, recording any table they live in.
pub(crate) fn install_maps(
    ctx: &mut ImportContext<'_>,
    node: NodeId,
    maps: Vec<PropertyMap>,
) -> Result<()> {
    let class_map = ctx.class_map_mut(node)?;
    for map in maps {
        for column in &map.columns {
            class_map.touch_table(&column.table);
        }
        class_map.set_property_map(map);
    }
    Ok(())
}

pub(crate) fn push_map(
    ctx: &mut ImportContext<'_>,
    node: NodeId,
    position: Option<usize>,
    map: PropertyMap,
) -> Result<()> {
    let class_map = ctx.class_map_mut(node)?;
    for column in &map.columns {
        class_map.touch_table(&column.table);
    }
    match position {
        Some(position) => class_map.property_maps.insert(position, map),
        None => class_map.property_maps.push(map),
    }
    Ok(())
}

/// Allocate the columns of one property and record its maps. Returns the
/// leaf columns in declaration order.
fn allocate_property(
    ctx: &mut ImportContext<'_>,
    placement: &mut Placement,
    origin: NodeId,
    def: &PropertyDef,
    parent: Option<&str>,
    depth: usize,
) -> Result<Vec<ColumnRef>> {
    let node = placement.node;
    let access = match parent {
        Some(parent) => format!("{}.{}", parent, def.name),
        None => def.name.clone(),
    };
    if def.options.column_name.is_some() && placement.table_kind != TableKind::Existing {
        return Err(Error::validation(
            ctx.key(node),
            format!(
                "property '{}' specifies a column name, which requires ExistingTable",
                access
            ),
        ));
    }
    let column_name = def
        .options
        .column_name
        .clone()
        .unwrap_or_else(|| access.replace('.', "_"));

    match &def.kind {
        PropertyKind::Primitive(ty) if ty.is_point() => {
            let mut columns = Vec::new();
            let mut members = Vec::new();
            for coordinate in ty.coordinates() {
                let request = ColumnRequest::new(
                    format!("{}.{}", access, coordinate),
                    format!("{}_{}", column_name, coordinate),
                    ColumnType::Real,
                )
                .with_options(&def.options);
                let column = allocate_column(ctx, placement, &request)?;
                members.push(PropertyMap::new(
                    request.access_string,
                    PropertyMapKind::Primitive,
                    vec![column.clone()],
                ));
                columns.push(column);
            }
            push_map(ctx, node, None, PropertyMap::new(&access, PropertyMapKind::Point, columns.clone()))?;
            for member in members {
                push_map(ctx, node, None, member)?;
            }
            Ok(columns)
        }
        PropertyKind::Primitive(ty) => {
            let request = ColumnRequest::new(&access, column_name, ColumnType::for_primitive(*ty))
                .with_options(&def.options);
            let column = allocate_column(ctx, placement, &request)?;
            push_map(ctx, node, None, PropertyMap::new(&access, PropertyMapKind::Primitive, vec![column.clone()]))?;
            Ok(vec![column])
        }
        PropertyKind::PrimitiveArray(_) | PropertyKind::StructArray(_) => {
            let kind = if matches!(def.kind, PropertyKind::PrimitiveArray(_)) {
                PropertyMapKind::PrimitiveArray
            } else {
                PropertyMapKind::StructArray
            };
            let request = ColumnRequest::new(&access, column_name, ColumnType::Text);
            let column = allocate_column(ctx, placement, &request)?;
            push_map(ctx, node, None, PropertyMap::new(&access, kind, vec![column.clone()]))?;
            Ok(vec![column])
        }
        PropertyKind::Struct(struct_ref) => {
            if depth >= MAX_STRUCT_DEPTH {
                return Err(Error::validation(
                    ctx.key(node),
                    format!("struct property '{}' nests too deeply; is the struct recursive?", access),
                ));
            }
            let struct_node = ctx
                .graph
                .resolve_from(origin, struct_ref)
                .filter(|&s| ctx.def(s).is_struct())
                .ok_or_else(|| {
                    Error::validation(
                        ctx.key(node),
                        format!("struct class '{}' of property '{}' not found", struct_ref, access),
                    )
                })?;

            let position = ctx.require_class_map(node)?.property_maps.len();
            let mut columns = Vec::new();
            for member in ctx.graph.merged_properties(struct_node)? {
                if member.def.is_navigation() {
                    return Err(Error::validation(
                        ctx.key(struct_node),
                        format!("struct may not declare navigation property '{}'", member.def.name),
                    ));
                }
                columns.extend(allocate_property(
                    ctx,
                    placement,
                    member.origin,
                    &member.def,
                    Some(&access),
                    depth + 1,
                )?);
            }
            push_map(
                ctx,
                node,
                Some(position),
                PropertyMap::new(&access, PropertyMapKind::Struct, columns.clone()),
            )?;
            Ok(columns)
        }
        PropertyKind::Navigation { .. } => Ok(Vec::new()),
    }
}

/// Find or create the column for one request.
pub(crate) fn allocate_column(
    ctx: &mut ImportContext<'_>,
    placement: &mut Placement,
    request: &ColumnRequest,
) -> Result<ColumnRef> {
    if request.force_virtual || placement.table_kind == TableKind::Virtual {
        let table = ctx.require_table_mut(&placement.table)?;
        let name = table.unique_column_name(&request.name);
        table.columns.push(
            Column::data(&name, request.ty)
                .with_virtual(true)
                .with_not_null(request.not_null)
                .with_unique(request.unique)
                .with_collation(request.collation),
        );
        let table_name = placement.table.clone();
        return Ok(placement.claim(&table_name, &name));
    }

    match placement.table_kind {
        TableKind::Existing => claim_existing_column(ctx, placement, request),
        _ if placement.shares => allocate_shared_column(ctx, placement),
        _ => allocate_named_column(ctx, placement, request),
    }
}

fn claim_existing_column(
    ctx: &mut ImportContext<'_>,
    placement: &mut Placement,
    request: &ColumnRequest,
) -> Result<ColumnRef> {
    let table = ctx.require_table(&placement.table)?;
    let column = table.column(&request.name).ok_or_else(|| {
        Error::table_conflict(
            &table.name,
            format!(
                "no column '{}' for property '{}' of '{}'",
                request.name,
                request.access_string,
                ctx.key(placement.node)
            ),
        )
    })?;
    if column.kind != ColumnKind::Data || placement.is_used(&table.name, &column.name) {
        return Err(Error::table_conflict(
            &table.name,
            format!(
                "column '{}' of property '{}' is already mapped",
                column.name, request.access_string
            ),
        ));
    }
    let (table_name, column_name) = (table.name.clone(), column.name.clone());
    Ok(placement.claim(&table_name, &column_name))
}

fn allocate_named_column(
    ctx: &mut ImportContext<'_>,
    placement: &mut Placement,
    request: &ColumnRequest,
) -> Result<ColumnRef> {
    let limit = ctx.config.max_columns_per_table;
    let table = ctx.require_table_mut(&placement.table)?;
    if table.columns.len() >= limit {
        return Err(Error::table_conflict(
            &table.name,
            format!(
                "column limit of {} reached while mapping property '{}'",
                limit, request.access_string
            ),
        ));
    }
    let name = table.unique_column_name(&request.name);
    table.columns.push(
        Column::data(&name, request.ty)
            .with_not_null(request.not_null)
            .with_unique(request.unique)
            .with_collation(request.collation),
    );
    let table_name = placement.table.clone();
    Ok(placement.claim(&table_name, &name))
}

/// Reuse a pool column no class of the row family uses, else claim the
/// next number, spilling into the overflow table past the threshold.
fn allocate_shared_column(ctx: &mut ImportContext<'_>, placement: &mut Placement) -> Result<ColumnRef> {
    let active = placement.table.clone();
    if let Some(column) = reusable_column(ctx.require_table(&active)?, placement) {
        return Ok(placement.claim(&active, &column));
    }

    let table = ctx.require_table(&active)?;
    let below_threshold = match placement.max_before_overflow {
        Some(max) => (table.shared_column_count() as u64) < u64::from(max),
        None => table.columns.len() < ctx.config.max_columns_per_table,
    };
    if below_threshold {
        let column = create_shared_column(ctx, &active)?;
        return Ok(placement.claim(&active, &column));
    }

    let overflow = ensure_overflow_table(ctx, &active)?;
    let overflow_table = ctx.require_table(&overflow)?;
    if let Some(column) = reusable_column(overflow_table, placement) {
        return Ok(placement.claim(&overflow, &column));
    }
    if overflow_table.columns.len() >= ctx.config.max_columns_per_table {
        return Err(Error::table_conflict(
            &overflow,
            format!(
                "column limit of {} reached in overflow table",
                ctx.config.max_columns_per_table
            ),
        ));
    }
    let column = create_shared_column(ctx, &overflow)?;
    Ok(placement.claim(&overflow, &column))
}

fn reusable_column(table: &Table, placement: &Placement) -> Option<String> {
    table
        .shared_columns()
        .find(|c| !placement.is_used(&table.name, &c.name))
        .map(|c| c.name.clone())
}

fn create_shared_column(ctx: &mut ImportContext<'_>, table_name: &str) -> Result<String> {
    let prefix = ctx.require_table(table_name)?.kind.shared_column_prefix();
    let name = loop {
        let number = ctx.snapshot.counters.advance(table_name);
        let candidate = format!("{}{}", prefix, number);
        if !ctx.require_table(table_name)?.has_column(&candidate) {
            break candidate;
        }
    };
    ctx.require_table_mut(table_name)?
        .columns
        .push(Column::shared(&name));
    Ok(name)
}

fn ensure_overflow_table(ctx: &mut ImportContext<'_>, parent: &str) -> Result<String> {
    let name = format!("{}{}", parent, ctx.config.overflow_suffix);
    if ctx.table(&name).is_some() {
        return Ok(name);
    }
    if ctx.snapshot.existing_table(&name).is_some() {
        return Err(Error::table_conflict(
            &name,
            "overflow table name collides with an existing table",
        ));
    }

    let parent_table = ctx.require_table(parent)?;
    let id_column = parent_table
        .instance_id_column()
        .map(|c| c.name.clone())
        .unwrap_or_else(|| ctx.config.instance_id_column.clone());
    let class_id_virtual = parent_table.class_id_column().map_or(true, |c| c.is_virtual);

    let mut table = Table::new(&name, TableKind::Overflow)
        .with_parent(parent)
        .with_column(Column::instance_id(&id_column))
        .with_column(Column::class_id(&ctx.config.class_id_column).with_virtual(class_id_virtual));
    table.foreign_keys.push(ForeignKey {
        column: id_column.clone(),
        referenced_table: parent.to_string(),
        referenced_column: id_column,
        on_delete: ForeignKeyAction::Cascade,
        on_update: None,
    });

    debug!(table = %name, parent = %parent, "created overflow table");
    ctx.add_table(table);
    Ok(name)
}

/// Recompute the system property maps from the tables the class spans.
pub(crate) fn refresh_system_maps(ctx: &mut ImportContext<'_>, node: NodeId) -> Result<()> {
    let class_map = ctx.require_class_map(node)?;
    let Some(primary) = class_map.primary_table.clone() else {
        return Ok(());
    };
    let is_link_table = class_map.kind == ClassMapKind::LinkTable;

    let mut id_columns = Vec::new();
    for table_name in &class_map.tables {
        if let Some(column) = ctx.table(table_name).and_then(|t| t.instance_id_column()) {
            id_columns.push(ColumnRef::new(table_name, &column.name));
        }
    }
    let primary_table = ctx.require_table(&primary)?;
    let class_id = primary_table
        .class_id_column()
        .map(|c| vec![ColumnRef::new(&primary, &c.name)])
        .unwrap_or_default();

    let mut maps = vec![
        PropertyMap::new("ECInstanceId", PropertyMapKind::InstanceId, id_columns),
        PropertyMap::new("ECClassId", PropertyMapKind::ClassId, class_id),
    ];
    if is_link_table {
        let link = relationship::link_columns(ctx, node)?;
        for (access, kind, column) in [
            ("SourceECInstanceId", PropertyMapKind::SourceInstanceId, &link.source_id),
            ("SourceECClassId", PropertyMapKind::SourceClassId, &link.source_class_id),
            ("TargetECInstanceId", PropertyMapKind::TargetInstanceId, &link.target_id),
            ("TargetECClassId", PropertyMapKind::TargetClassId, &link.target_class_id),
        ] {
            let column = primary_table
                .column(column)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| column.clone());
            maps.push(PropertyMap::new(access, kind, vec![ColumnRef::new(&primary, column)]));
        }
    }

    let class_map = ctx.class_map_mut(node)?;
    for (position, map) in maps.into_iter().enumerate() {
        match class_map
            .property_maps
            .iter()
            .position(|m| m.access_string == map.access_string)
        {
            Some(existing) => class_map.property_maps[existing] = map,
            None => class_map.property_maps.insert(position, map),
        }
    }
    Ok(())
}

/// Materialize the class id column of every owned table that hosts two or
/// more concrete classes. Materialization is never undone.
pub(crate) fn materialize_class_ids(ctx: &mut ImportContext<'_>) -> Result<()> {
    let hosting: Vec<(String, usize)> = ctx
        .snapshot
        .tables
        .iter()
        .filter(|t| matches!(t.kind, TableKind::Primary | TableKind::Joined))
        .map(|t| (t.name.clone(), ctx.snapshot.residents_of(&t.name).count()))
        .collect();

    for (table_name, residents) in hosting {
        if residents < 2 {
            continue;
        }
        if let Some(column) = ctx.require_table_mut(&table_name)?.class_id_column_mut() {
            if column.is_virtual {
                column.is_virtual = false;
                debug!(table = %table_name, residents, "materialized class id column");
            }
        }
    }

    let overflow: Vec<(String, String)> = ctx
        .snapshot
        .tables
        .iter()
        .filter(|t| t.kind == TableKind::Overflow)
        .filter_map(|t| t.parent.clone().map(|p| (t.name.clone(), p)))
        .collect();
    for (table_name, parent) in overflow {
        let parent_physical = ctx
            .require_table(&parent)?
            .class_id_column()
            .is_some_and(|c| !c.is_virtual);
        if parent_physical {
            if let Some(column) = ctx.require_table_mut(&table_name)?.class_id_column_mut() {
                column.is_virtual = false;
            }
        }
    }
    Ok(())
}
