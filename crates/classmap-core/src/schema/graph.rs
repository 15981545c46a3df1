//! The merged class graph of every imported schema.
//!
//! Classes form a DAG over their declared bases. The graph answers the
//! ancestry questions the compiler needs and produces the canonical
//! declaration-order merge of inherited properties.

use std::collections::{HashMap, HashSet, VecDeque};
use std::mem;

use super::class::ClassDef;
use super::key::ClassKey;
use super::property::PropertyDef;
use super::Schema;
use crate::error::{Error, Result};

/// Index of a class in a [`ClassGraph`].
pub type NodeId = usize;

/// A class together with its resolved bases.
#[derive(Debug, Clone)]
pub struct ClassNode {
    pub key: ClassKey,
    pub def: ClassDef,
    /// Resolved bases in declared order.
    pub bases: Vec<NodeId>,
    /// Prefix for tables created for this class.
    pub table_prefix: String,
    pub schema_alias: String,
}

/// A property reachable from a class, with the class that declared it.
#[derive(Debug, Clone, PartialEq)]
pub struct InheritedProperty {
    pub origin: NodeId,
    pub def: PropertyDef,
}

/// DAG over all classes of all schemas.
#[derive(Debug, Clone, Default)]
pub struct ClassGraph {
    nodes: Vec<ClassNode>,
    by_name: HashMap<(String, String), NodeId>,
    schema_refs: HashMap<String, String>,
    children: Vec<Vec<NodeId>>,
    order: Vec<NodeId>,
}

impl ClassGraph {
    /// Build the graph, resolving every base reference.
    pub fn build(schemas: &[Schema]) -> Result<Self> {
        let mut graph = ClassGraph::default();

        for schema in schemas {
            let canonical = schema.name.to_lowercase();
            for reference in [&schema.name, &schema.alias] {
                if reference.is_empty() {
                    continue;
                }
                let lower = reference.to_lowercase();
                match graph.schema_refs.get(&lower) {
                    Some(existing) if *existing != canonical => {
                        return Err(Error::validation(
                            &schema.name,
                            format!("schema name or alias '{}' is already in use", reference),
                        ));
                    }
                    _ => {
                        graph.schema_refs.insert(lower, canonical.clone());
                    }
                }
            }

            for class in &schema.classes {
                let key = ClassKey::new(&schema.name, &class.name);
                let lookup = (canonical.clone(), class.name.to_lowercase());
                if graph.by_name.contains_key(&lookup) {
                    return Err(Error::validation(&key, "class is declared more than once"));
                }
                graph.by_name.insert(lookup, graph.nodes.len());
                graph.nodes.push(ClassNode {
                    key,
                    def: class.clone(),
                    bases: Vec::new(),
                    table_prefix: schema.table_prefix().to_string(),
                    schema_alias: schema.alias.clone(),
                });
            }
        }

        graph.children = vec![Vec::new(); graph.nodes.len()];
        for idx in 0..graph.nodes.len() {
            let bases = graph.resolve_bases(idx)?;
            for &base in &bases {
                graph.children[base].push(idx);
            }
            graph.nodes[idx].bases = bases;
        }

        graph.order = graph.compute_order()?;
        Ok(graph)
    }

    fn resolve_bases(&self, idx: NodeId) -> Result<Vec<NodeId>> {
        let node = &self.nodes[idx];
        let mut bases = Vec::with_capacity(node.def.bases.len());

        for reference in &node.def.bases {
            let base = self.resolve_from(idx, reference).ok_or_else(|| {
                Error::validation(&node.key, format!("base class '{}' not found", reference))
            })?;
            let base_def = &self.nodes[base].def;

            if mem::discriminant(&base_def.kind) != mem::discriminant(&node.def.kind) {
                return Err(Error::validation(
                    &node.key,
                    format!(
                        "{} class cannot derive from {} class '{}'",
                        node.def.kind_label(),
                        base_def.kind_label(),
                        self.nodes[base].key
                    ),
                ));
            }
            if base_def.is_sealed() {
                return Err(Error::validation(
                    &node.key,
                    format!("cannot derive from sealed class '{}'", self.nodes[base].key),
                ));
            }
            if bases.contains(&base) {
                return Err(Error::validation(
                    &node.key,
                    format!("base class '{}' is listed twice", reference),
                ));
            }
            bases.push(base);
        }

        Ok(bases)
    }

    fn compute_order(&self) -> Result<Vec<NodeId>> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        for idx in 0..self.nodes.len() {
            self.visit(idx, &mut marks, &mut order)?;
        }
        Ok(order)
    }

    fn visit(&self, idx: NodeId, marks: &mut [Mark], order: &mut Vec<NodeId>) -> Result<()> {
        match marks[idx] {
            Mark::Done => return Ok(()),
            Mark::Visiting => {
                return Err(Error::validation(
                    &self.nodes[idx].key,
                    "class hierarchy contains a cycle",
                ))
            }
            Mark::Unvisited => {}
        }
        marks[idx] = Mark::Visiting;
        for &base in &self.nodes[idx].bases {
            self.visit(base, marks, order)?;
        }
        marks[idx] = Mark::Done;
        order.push(idx);
        Ok(())
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: NodeId) -> &ClassNode {
        &self.nodes[idx]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &ClassNode)> {
        self.nodes.iter().enumerate()
    }

    /// Find a class by key.
    pub fn find(&self, key: &ClassKey) -> Option<NodeId> {
        self.find_by_name(&key.schema, &key.name)
    }

    /// Find a class by schema name or alias and class name.
    pub fn find_by_name(&self, schema: &str, class: &str) -> Option<NodeId> {
        let canonical = self.schema_refs.get(&schema.to_lowercase())?;
        self.by_name
            .get(&(canonical.clone(), class.to_lowercase()))
            .copied()
    }

    /// Resolve a class reference as written inside `from`'s schema: either a
    /// bare name or `alias:Name`.
    pub fn resolve_from(&self, from: NodeId, reference: &str) -> Option<NodeId> {
        match reference.split_once(':') {
            Some((schema, name)) => self.find_by_name(schema, name),
            None => self.find_by_name(&self.nodes[from].key.schema, reference),
        }
    }

    /// Bases before subclasses; unrelated classes keep declaration order.
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    /// All ancestors, depth-first in declared base order, each once.
    pub fn ancestors(&self, idx: NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.collect_ancestors(idx, &mut seen, &mut out);
        out
    }

    fn collect_ancestors(&self, idx: NodeId, seen: &mut HashSet<NodeId>, out: &mut Vec<NodeId>) {
        for &base in &self.nodes[idx].bases {
            if seen.insert(base) {
                out.push(base);
                self.collect_ancestors(base, seen, out);
            }
        }
    }

    /// Classes deriving directly from `idx`, in declaration order.
    pub fn direct_subclasses(&self, idx: NodeId) -> &[NodeId] {
        &self.children[idx]
    }

    /// All descendants, breadth-first, each once.
    pub fn descendants(&self, idx: NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut queue: VecDeque<NodeId> = self.children[idx].iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                out.push(next);
                queue.extend(self.children[next].iter().copied());
            }
        }
        out
    }

    /// True if `idx` is `ancestor` or derives from it.
    pub fn is_subclass_of(&self, idx: NodeId, ancestor: NodeId) -> bool {
        idx == ancestor || self.ancestors(idx).contains(&ancestor)
    }

    /// Every property reachable from `idx` in canonical order: a depth-first
    /// walk over bases in declared order, own properties last. A name seen
    /// again keeps its first position and declaring class; reaching it with a
    /// different type rejects the class.
    pub fn merged_properties(&self, idx: NodeId) -> Result<Vec<InheritedProperty>> {
        let mut merged = Vec::new();
        for &base in &self.nodes[idx].bases {
            for inherited in self.merged_properties(base)? {
                self.merge_into(idx, &mut merged, inherited)?;
            }
        }
        for def in &self.nodes[idx].def.properties {
            let own = InheritedProperty {
                origin: idx,
                def: def.clone(),
            };
            self.merge_into(idx, &mut merged, own)?;
        }
        Ok(merged)
    }

    fn merge_into(
        &self,
        idx: NodeId,
        merged: &mut Vec<InheritedProperty>,
        candidate: InheritedProperty,
    ) -> Result<()> {
        let existing = merged
            .iter()
            .find(|p| p.def.name.eq_ignore_ascii_case(&candidate.def.name));

        match existing {
            None => merged.push(candidate),
            Some(existing) if existing.origin == idx && candidate.origin == idx => {
                return Err(Error::validation(
                    &self.nodes[idx].key,
                    format!("property '{}' is declared more than once", candidate.def.name),
                ));
            }
            Some(existing) if existing.def.kind != candidate.def.kind => {
                return Err(Error::validation(
                    &self.nodes[idx].key,
                    format!(
                        "property '{}' is reached from '{}' and '{}' with different types",
                        candidate.def.name,
                        self.nodes[existing.origin].key,
                        self.nodes[candidate.origin].key
                    ),
                ));
            }
            Some(_) => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}
