//! Strategy resolution.
//!
//! Walks the class graph bases-first and assigns every entity and
//! relationship class one [`ResolvedStrategy`], rejecting illegal option
//! combinations and strategy transitions along the way.

use tracing::debug;

use super::context::{ImportContext, Resolution};
use crate::error::{Error, Result};
use crate::mapping::{JoinedTableInfo, ResolvedStrategy, ShareColumnsMode, TphInfo};
use crate::schema::{ClassDef, ClassKey, ClassKind, MapStrategy, NodeId};

/// Resolve every class, bases first.
pub(crate) fn resolve_all(ctx: &mut ImportContext<'_>) -> Result<()> {
    let order = ctx.graph.topological_order().to_vec();
    for node in order {
        let def = ctx.def(node);
        if def.is_struct() {
            if !def.options.is_empty() {
                return Err(Error::validation(
                    ctx.key(node),
                    "struct classes may not carry mapping options",
                ));
            }
            continue;
        }

        let resolution = resolve(ctx, node)?;

        if let Some(existing) = ctx.class_map(node) {
            if existing.strategy != resolution.strategy || existing.is_mixin != resolution.is_mixin
            {
                return Err(Error::evolution(
                    ctx.key(node),
                    format!(
                        "mapping strategy changed from {} to {}",
                        existing.strategy.strategy.as_str(),
                        resolution.strategy.strategy.as_str()
                    ),
                ));
            }
        }

        debug!(
            class = %ctx.key(node),
            strategy = resolution.strategy.strategy.as_str(),
            mixin = resolution.is_mixin,
            "resolved mapping strategy"
        );
        ctx.resolutions[node] = Some(resolution);
    }
    Ok(())
}

fn resolve(ctx: &ImportContext<'_>, node: NodeId) -> Result<Resolution> {
    let key = ctx.key(node);
    let def = ctx.def(node);
    validate_class_map_option(key, def)?;

    if def.is_mixin() {
        return resolve_mixin(ctx, node);
    }

    let mut bases = Vec::new();
    for &base in &ctx.graph.node(node).bases {
        let resolution = ctx.resolution(base)?;
        if !resolution.is_mixin {
            bases.push((base, resolution));
        }
    }

    let strategy = if bases.is_empty() {
        resolve_root(key, def)?
    } else if bases.iter().any(|(_, r)| r.strategy.is_not_mapped()) {
        resolve_below_not_mapped(key, def, &bases)?
    } else if bases.iter().any(|(_, r)| r.strategy.is_tph()) {
        resolve_below_tph(ctx, node, &bases)?
    } else {
        if bases.len() > 1 {
            return Err(Error::validation(
                key,
                "non-mixin base classes map to different tables",
            ));
        }
        resolve_root(key, def)?
    };

    if strategy.strategy == MapStrategy::ExistingTable && !def.options.db_indexes.is_empty() {
        return Err(Error::validation(
            key,
            "DbIndexList may not be declared on an ExistingTable class",
        ));
    }

    Ok(Resolution {
        strategy,
        is_mixin: false,
    })
}

fn validate_class_map_option(key: &ClassKey, def: &ClassDef) -> Result<()> {
    let Some(option) = def.declared_strategy() else {
        return Ok(());
    };
    match option.strategy {
        MapStrategy::ExistingTable if option.table_name.is_none() => Err(Error::validation(
            key,
            "ExistingTable requires a table name",
        )),
        MapStrategy::ExistingTable => Ok(()),
        other if option.table_name.is_some() => Err(Error::validation(
            key,
            format!("a table name may not be specified with {}", other.as_str()),
        )),
        _ => Ok(()),
    }
}

fn resolve_mixin(ctx: &ImportContext<'_>, node: NodeId) -> Result<Resolution> {
    let key = ctx.key(node);
    let def = ctx.def(node);

    if def.kind != ClassKind::Entity {
        return Err(Error::validation(key, "only entity classes may be mixins"));
    }
    if !def.is_abstract() {
        return Err(Error::validation(key, "mixins must be abstract"));
    }
    if def.options.class_map.is_some()
        || def.options.share_columns.is_some()
        || def.options.joined_table_per_direct_subclass
        || !def.options.db_indexes.is_empty()
    {
        return Err(Error::validation(
            key,
            "mixins may not declare mapping options or indexes",
        ));
    }
    for &base in &ctx.graph.node(node).bases {
        if !ctx.resolution(base)?.is_mixin {
            return Err(Error::validation(
                key,
                format!("mixins may only derive from mixins, not '{}'", ctx.key(base)),
            ));
        }
    }

    Ok(Resolution {
        strategy: ResolvedStrategy::new(MapStrategy::OwnTable),
        is_mixin: true,
    })
}

/// A class starting a new hierarchy: no base, or only own-table or
/// existing-table bases, which are not inherited.
fn resolve_root(key: &ClassKey, def: &ClassDef) -> Result<ResolvedStrategy> {
    let option = def.options.class_map.clone().unwrap_or_default();
    let share_columns = def.options.share_columns.as_ref();
    let joined = def.options.joined_table_per_direct_subclass;

    let tph = match option.strategy {
        MapStrategy::TablePerHierarchy => {
            if def.is_sealed() {
                return Err(Error::validation(
                    key,
                    "sealed classes may not declare TablePerHierarchy",
                ));
            }
            Some(TphInfo {
                root: key.clone(),
                share_columns: share_columns.map_or(ShareColumnsMode::No, |s| {
                    if s.apply_to_subclasses_only {
                        ShareColumnsMode::ApplyToSubclassesOnly
                    } else {
                        ShareColumnsMode::Yes
                    }
                }),
                max_before_overflow: share_columns.and_then(|s| s.max_before_overflow),
                joined_table: if joined {
                    JoinedTableInfo::ParentOfJoinedTable
                } else {
                    JoinedTableInfo::None
                },
            })
        }
        other => {
            if share_columns.is_some() {
                return Err(Error::validation(
                    key,
                    format!("ShareColumns requires TablePerHierarchy, not {}", other.as_str()),
                ));
            }
            if joined {
                return Err(Error::validation(
                    key,
                    format!(
                        "JoinedTablePerDirectSubclass requires TablePerHierarchy, not {}",
                        other.as_str()
                    ),
                ));
            }
            None
        }
    };

    Ok(ResolvedStrategy {
        strategy: option.strategy,
        tph,
        table_name: option.table_name,
        id_column: option.id_column,
    })
}

fn resolve_below_not_mapped(
    key: &ClassKey,
    def: &ClassDef,
    bases: &[(NodeId, &Resolution)],
) -> Result<ResolvedStrategy> {
    if !bases.iter().all(|(_, r)| r.strategy.is_not_mapped()) {
        return Err(Error::validation(
            key,
            "a NotMapped base class cannot be combined with a mapped base class",
        ));
    }
    if let Some(option) = def.declared_strategy() {
        if option.strategy != MapStrategy::NotMapped {
            return Err(Error::validation(
                key,
                format!(
                    "cannot declare {} because a base class is NotMapped",
                    option.strategy.as_str()
                ),
            ));
        }
    }
    if def.options.share_columns.is_some() || def.options.joined_table_per_direct_subclass {
        return Err(Error::validation(
            key,
            "ShareColumns and JoinedTablePerDirectSubclass are not allowed below a NotMapped class",
        ));
    }
    Ok(ResolvedStrategy::not_mapped())
}

fn resolve_below_tph(
    ctx: &ImportContext<'_>,
    node: NodeId,
    bases: &[(NodeId, &Resolution)],
) -> Result<ResolvedStrategy> {
    let key = ctx.key(node);
    let def = ctx.def(node);

    let mut infos = Vec::with_capacity(bases.len());
    for (base, resolution) in bases {
        match &resolution.strategy.tph {
            Some(tph) if resolution.strategy.is_tph() => infos.push((*base, tph)),
            _ => {
                return Err(Error::validation(
                    key,
                    format!(
                        "TablePerHierarchy base class cannot be combined with {} base class '{}'",
                        resolution.strategy.strategy.as_str(),
                        ctx.key(*base)
                    ),
                ))
            }
        }
    }

    let (_, first) = infos[0];
    if let Some((other, _)) = infos.iter().find(|(_, tph)| tph.root != first.root) {
        return Err(Error::validation(
            key,
            format!(
                "inherits from two TablePerHierarchy hierarchies rooted at '{}' and '{}'",
                first.root,
                ctx.key(*other)
            ),
        ));
    }

    if def.options.class_map.is_some() {
        return Err(Error::validation(
            key,
            "subclasses of a TablePerHierarchy class may not declare a ClassMap",
        ));
    }

    let (share_columns, max_before_overflow) = match &def.options.share_columns {
        Some(declared) => {
            if let Some(owner) = hierarchy_declaring(ctx, node, |d| d.options.share_columns.is_some())
            {
                return Err(Error::validation(
                    key,
                    format!("ShareColumns is already declared by '{}'", ctx.key(owner)),
                ));
            }
            let mode = if declared.apply_to_subclasses_only {
                ShareColumnsMode::ApplyToSubclassesOnly
            } else {
                ShareColumnsMode::Yes
            };
            (mode, declared.max_before_overflow)
        }
        None => {
            let mode = match first.share_columns {
                ShareColumnsMode::No => ShareColumnsMode::No,
                _ => ShareColumnsMode::Yes,
            };
            (mode, first.max_before_overflow)
        }
    };

    let inherits_joined = infos
        .iter()
        .any(|(_, tph)| tph.joined_table != JoinedTableInfo::None);
    let joined_table = if def.options.joined_table_per_direct_subclass {
        if let Some(owner) =
            hierarchy_declaring(ctx, node, |d| d.options.joined_table_per_direct_subclass)
        {
            return Err(Error::validation(
                key,
                format!(
                    "JoinedTablePerDirectSubclass is already declared by '{}'",
                    ctx.key(owner)
                ),
            ));
        }
        JoinedTableInfo::ParentOfJoinedTable
    } else if inherits_joined {
        JoinedTableInfo::JoinedTable
    } else {
        JoinedTableInfo::None
    };

    if joined_table == JoinedTableInfo::JoinedTable {
        let mut branches: Vec<NodeId> = Vec::new();
        for (base, tph) in &infos {
            let branch = match tph.joined_table {
                JoinedTableInfo::ParentOfJoinedTable => Some(node),
                JoinedTableInfo::JoinedTable => joined_branch(ctx, *base)?,
                JoinedTableInfo::None => None,
            };
            if let Some(branch) = branch {
                if !branches.contains(&branch) {
                    branches.push(branch);
                }
            }
        }
        if branches.len() > 1 {
            return Err(Error::validation(
                key,
                "base classes map to different joined tables",
            ));
        }
    }

    // Subclasses cannot declare a ClassMap, so every base carries the root's id column.
    Ok(ResolvedStrategy {
        strategy: MapStrategy::TablePerHierarchy,
        tph: Some(TphInfo {
            root: first.root.clone(),
            share_columns,
            max_before_overflow,
            joined_table,
        }),
        table_name: None,
        id_column: bases[0].1.strategy.id_column.clone(),
    })
}

/// Closest non-mixin ancestor in the same hierarchy whose definition
/// satisfies `predicate`.
fn hierarchy_declaring(
    ctx: &ImportContext<'_>,
    node: NodeId,
    predicate: impl Fn(&ClassDef) -> bool,
) -> Option<NodeId> {
    ctx.graph.ancestors(node).into_iter().find(|&ancestor| {
        let is_tph = ctx
            .resolutions[ancestor]
            .as_ref()
            .is_some_and(|r| !r.is_mixin && r.strategy.is_tph());
        is_tph && predicate(ctx.def(ancestor))
    })
}

/// The direct subclass of the joined-table parent that `node` descends
/// from, i.e. the class whose joined table `node` lives in.
pub(crate) fn joined_branch(ctx: &ImportContext<'_>, node: NodeId) -> Result<Option<NodeId>> {
    let resolution = ctx.resolution(node)?;
    if resolution.strategy.joined_table() != JoinedTableInfo::JoinedTable {
        return Ok(None);
    }
    for &base in &ctx.graph.node(node).bases {
        let base_resolution = ctx.resolution(base)?;
        if base_resolution.is_mixin {
            continue;
        }
        return match base_resolution.strategy.joined_table() {
            JoinedTableInfo::ParentOfJoinedTable => Ok(Some(node)),
            JoinedTableInfo::JoinedTable => joined_branch(ctx, base),
            JoinedTableInfo::None => Ok(None),
        };
    }
    Ok(None)
}
