//! Mixins and diamond inheritance.
//!
//! Mixins never own rows. Their properties are allocated by each concrete
//! host in the host's table, and a property reached through several
//! inheritance paths is allocated once.

use std::collections::HashSet;

use super::context::ImportContext;
use crate::error::{Error, Result};
use crate::mapping::PropertyMap;
use crate::schema::{ClassGraph, ClassKind, NodeId};

/// Check applies-to constraints of every mixin and of every class that
/// inherits one.
pub(crate) fn validate(ctx: &ImportContext<'_>) -> Result<()> {
    for (node, class) in ctx.graph.nodes() {
        if class.def.is_mixin() {
            let host = applies_to(ctx, node)?;
            for &base in &class.bases {
                if !ctx.graph.is_subclass_of(host, applies_to(ctx, base)?) {
                    return Err(Error::validation(
                        &class.key,
                        format!(
                            "applies to '{}', which is outside the hierarchy of base mixin '{}'",
                            ctx.key(host),
                            ctx.key(base)
                        ),
                    ));
                }
            }
            continue;
        }

        if class.def.kind != ClassKind::Entity {
            continue;
        }
        for ancestor in ctx.graph.ancestors(node) {
            if !ctx.def(ancestor).is_mixin() {
                continue;
            }
            let host = applies_to(ctx, ancestor)?;
            if !ctx.graph.is_subclass_of(node, host) {
                return Err(Error::validation(
                    &class.key,
                    format!(
                        "mixin '{}' applies to '{}', which is not a base class",
                        ctx.key(ancestor),
                        ctx.key(host)
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// The entity class a mixin applies to.
fn applies_to(ctx: &ImportContext<'_>, mixin: NodeId) -> Result<NodeId> {
    let key = ctx.key(mixin);
    let option = ctx
        .def(mixin)
        .options
        .mixin
        .as_ref()
        .ok_or_else(|| Error::validation(key, "class is not a mixin"))?;

    let host = ctx
        .graph
        .resolve_from(mixin, &option.applies_to)
        .ok_or_else(|| {
            Error::validation(
                key,
                format!("applies-to class '{}' not found", option.applies_to),
            )
        })?;
    let host_def = ctx.def(host);
    if host_def.kind != ClassKind::Entity || host_def.is_mixin() {
        return Err(Error::validation(
            key,
            format!(
                "applies-to class '{}' must be a non-mixin entity class",
                ctx.key(host)
            ),
        ));
    }
    Ok(host)
}

/// Classes that can share a row with `node`: itself, its ancestors, its
/// descendants and every ancestor of a descendant. A shared column used by
/// any of them is off-limits to `node`; anything else may be reused.
pub(crate) fn row_family(graph: &ClassGraph, node: NodeId) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    let mut family = Vec::new();
    let mut push = |n: NodeId, family: &mut Vec<NodeId>| {
        if seen.insert(n) {
            family.push(n);
        }
    };

    push(node, &mut family);
    for ancestor in graph.ancestors(node) {
        push(ancestor, &mut family);
    }
    for descendant in graph.descendants(node) {
        push(descendant, &mut family);
        for ancestor in graph.ancestors(descendant) {
            push(ancestor, &mut family);
        }
    }
    family
}

/// Property maps `node` inherits for `name` from a base in the same
/// table-per-hierarchy hierarchy. Every base that already mapped the
/// property must agree on its columns.
pub(crate) fn inherited_maps(
    ctx: &ImportContext<'_>,
    node: NodeId,
    name: &str,
) -> Result<Option<Vec<PropertyMap>>> {
    let resolution = ctx.resolution(node)?;
    let Some(tph) = resolution.strategy.tph.as_ref() else {
        return Ok(None);
    };

    let mut found: Option<(NodeId, Vec<PropertyMap>)> = None;
    for &base in &ctx.graph.node(node).bases {
        let base_resolution = ctx.resolution(base)?;
        let same_hierarchy = !base_resolution.is_mixin
            && base_resolution
                .strategy
                .tph
                .as_ref()
                .is_some_and(|t| t.root == tph.root);
        if !same_hierarchy {
            continue;
        }
        let Some(class_map) = ctx.class_map(base) else {
            continue;
        };
        let maps: Vec<PropertyMap> = class_map
            .property_maps
            .iter()
            .filter(|m| m.is_under(name))
            .cloned()
            .collect();
        if maps.is_empty() {
            continue;
        }

        match &found {
            None => found = Some((base, maps)),
            Some((first, existing)) => {
                if !same_columns(existing, &maps) {
                    return Err(Error::validation(
                        ctx.key(node),
                        format!(
                            "property '{}' maps to different columns through '{}' and '{}'",
                            name,
                            ctx.key(*first),
                            ctx.key(base)
                        ),
                    ));
                }
            }
        }
    }
    Ok(found.map(|(_, maps)| maps))
}

/// Reject a class whose distinct properties ended up on one column. This
/// happens when a class joins two branches of a hierarchy after each branch
/// already reused the same shared column.
pub(crate) fn check_distinct_columns(ctx: &ImportContext<'_>, node: NodeId) -> Result<()> {
    let Some(class_map) = ctx.class_map(node) else {
        return Ok(());
    };
    let maps: Vec<&PropertyMap> = class_map
        .property_maps
        .iter()
        .filter(|m| !m.kind.is_system())
        .collect();

    for (i, a) in maps.iter().enumerate() {
        for b in &maps[i + 1..] {
            if a.is_under(&b.access_string) || b.is_under(&a.access_string) {
                continue;
            }
            if let Some(column) = a.columns.iter().find(|c| b.columns.contains(c)) {
                return Err(Error::validation(
                    ctx.key(node),
                    format!(
                        "properties '{}' and '{}' both map to column '{}.{}'",
                        a.access_string, b.access_string, column.table, column.column
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn same_columns(a: &[PropertyMap], b: &[PropertyMap]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.access_string.eq_ignore_ascii_case(&y.access_string) && x.columns == y.columns
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MappingConfig;
    use crate::mapping::MappingSnapshot;
    use crate::schema::{ClassDef, Schema};

    fn context(schema: Schema, config: &MappingConfig) -> ImportContext<'_> {
        let graph = ClassGraph::build(&[schema]).unwrap();
        ImportContext::new(config, graph, MappingSnapshot::new())
    }

    #[test]
    fn test_row_family_excludes_siblings() {
        let schema = Schema::new("TestSchema", "ts").with_classes([
            ClassDef::entity("Root"),
            ClassDef::entity("Left").with_base("Root"),
            ClassDef::entity("Right").with_base("Root"),
            ClassDef::entity("LeftLeaf").with_base("Left"),
        ]);
        let graph = ClassGraph::build(&[schema]).unwrap();
        let left = graph.find_by_name("ts", "Left").unwrap();
        let right = graph.find_by_name("ts", "Right").unwrap();

        let family = row_family(&graph, left);
        assert_eq!(family.len(), 3);
        assert!(!family.contains(&right));
    }

    #[test]
    fn test_row_family_includes_co_ancestors() {
        let schema = Schema::new("TestSchema", "ts").with_classes([
            ClassDef::entity("Root"),
            ClassDef::mixin("IMix", "Root"),
            ClassDef::entity("Left").with_base("Root"),
            ClassDef::entity("Leaf").with_base("Left").with_base("IMix"),
        ]);
        let graph = ClassGraph::build(&[schema]).unwrap();
        let left = graph.find_by_name("ts", "Left").unwrap();
        let mixin = graph.find_by_name("ts", "IMix").unwrap();

        assert!(row_family(&graph, left).contains(&mixin));
    }

    #[test]
    fn test_mixin_applied_outside_host_rejected() {
        let config = MappingConfig::default();
        let schema = Schema::new("TestSchema", "ts").with_classes([
            ClassDef::entity("Host"),
            ClassDef::entity("Other"),
            ClassDef::mixin("IMix", "Host"),
            ClassDef::entity("Wrong").with_base("Other").with_base("IMix"),
        ]);
        let ctx = context(schema, &config);
        assert!(validate(&ctx).unwrap_err().is_validation());
    }

    #[test]
    fn test_mixin_with_unknown_host_rejected() {
        let config = MappingConfig::default();
        let schema = Schema::new("TestSchema", "ts").with_class(ClassDef::mixin("IMix", "Nope"));
        let ctx = context(schema, &config);
        assert!(validate(&ctx).unwrap_err().is_validation());
    }

    #[test]
    fn test_mixin_applied_to_subclass_of_host() {
        let config = MappingConfig::default();
        let schema = Schema::new("TestSchema", "ts").with_classes([
            ClassDef::entity("Host"),
            ClassDef::entity("Sub").with_base("Host"),
            ClassDef::mixin("IMix", "Host"),
            ClassDef::entity("Leaf").with_base("Sub").with_base("IMix"),
        ]);
        let ctx = context(schema, &config);
        validate(&ctx).unwrap();
    }
}
