//! Mutable working state of one import.

use std::collections::HashMap;

use crate::config::MappingConfig;
use crate::error::{Error, Result};
use crate::mapping::{ClassMap, MappingSnapshot, RelationshipEnd, ResolvedStrategy, Table};
use crate::schema::{ClassDef, ClassGraph, ClassKey, Direction, ForeignKeyConstraint, NodeId};

/// Strategy outcome for one class.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Resolution {
    pub strategy: ResolvedStrategy,
    pub is_mixin: bool,
}

/// A navigation property declared on an entity class.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NavigationRef {
    pub class: NodeId,
    pub property: String,
    pub direction: Direction,
    pub constraint: Option<ForeignKeyConstraint>,
}

/// How a relationship class will be stored.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RelationshipPlan {
    NotMapped,
    LinkTable,
    ForeignKey {
        fk_end: RelationshipEnd,
        /// Declared navigation properties; empty for sub-relationships.
        navigations: Vec<NavigationRef>,
        constraint: Option<ForeignKeyConstraint>,
    },
}

/// Working copy of the snapshot plus per-import derived state. Nothing here
/// reaches the catalog unless the whole import succeeds.
pub(crate) struct ImportContext<'a> {
    pub config: &'a MappingConfig,
    pub graph: ClassGraph,
    pub snapshot: MappingSnapshot,
    pub resolutions: Vec<Option<Resolution>>,
    pub plans: HashMap<NodeId, RelationshipPlan>,
    table_positions: HashMap<String, usize>,
    class_positions: HashMap<ClassKey, usize>,
}

impl<'a> ImportContext<'a> {
    pub fn new(config: &'a MappingConfig, graph: ClassGraph, snapshot: MappingSnapshot) -> Self {
        let table_positions = snapshot
            .tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.to_lowercase(), i))
            .collect();
        let class_positions = snapshot
            .class_maps
            .iter()
            .enumerate()
            .map(|(i, m)| (m.class.clone(), i))
            .collect();
        let resolutions = vec![None; graph.len()];

        Self {
            config,
            graph,
            snapshot,
            resolutions,
            plans: HashMap::new(),
            table_positions,
            class_positions,
        }
    }

    pub fn into_snapshot(self) -> MappingSnapshot {
        self.snapshot
    }

    pub fn key(&self, node: NodeId) -> &ClassKey {
        &self.graph.node(node).key
    }

    pub fn def(&self, node: NodeId) -> &ClassDef {
        &self.graph.node(node).def
    }

    /// Strategy of a class resolved earlier in topological order.
    pub fn resolution(&self, node: NodeId) -> Result<&Resolution> {
        self.resolutions[node].as_ref().ok_or_else(|| {
            Error::validation(self.key(node), "class has no resolved mapping strategy")
        })
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.table_positions
            .get(&name.to_lowercase())
            .map(|&i| &self.snapshot.tables[i])
    }

    pub fn require_table(&self, name: &str) -> Result<&Table> {
        self.table(name)
            .ok_or_else(|| Error::table_conflict(name, "table is not part of the mapping"))
    }

    pub fn require_table_mut(&mut self, name: &str) -> Result<&mut Table> {
        match self.table_positions.get(&name.to_lowercase()) {
            Some(&i) => Ok(&mut self.snapshot.tables[i]),
            None => Err(Error::table_conflict(name, "table is not part of the mapping")),
        }
    }

    pub fn add_table(&mut self, table: Table) {
        self.table_positions
            .insert(table.name.to_lowercase(), self.snapshot.tables.len());
        self.snapshot.tables.push(table);
    }

    pub fn class_map(&self, node: NodeId) -> Option<&ClassMap> {
        self.class_positions
            .get(self.key(node))
            .map(|&i| &self.snapshot.class_maps[i])
    }

    pub fn require_class_map(&self, node: NodeId) -> Result<&ClassMap> {
        self.class_map(node)
            .ok_or_else(|| Error::validation(self.key(node), "class has not been mapped"))
    }

    pub fn class_map_mut(&mut self, node: NodeId) -> Result<&mut ClassMap> {
        let key = &self.graph.node(node).key;
        match self.class_positions.get(key) {
            Some(&i) => Ok(&mut self.snapshot.class_maps[i]),
            None => Err(Error::validation(key, "class has not been mapped")),
        }
    }

    pub fn add_class_map(&mut self, class_map: ClassMap) {
        self.class_positions
            .insert(class_map.class.clone(), self.snapshot.class_maps.len());
        self.snapshot.class_maps.push(class_map);
    }

    /// Topmost relationship class of `node`'s hierarchy.
    pub fn root_relationship(&self, node: NodeId) -> NodeId {
        let mut current = node;
        while let Some(&base) = self.graph.node(current).bases.first() {
            current = base;
        }
        current
    }
}
