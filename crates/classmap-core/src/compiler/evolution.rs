//! Incremental schema evolution.
//!
//! A later import may add schemas and classes and append properties to
//! classes it re-imports. Everything an earlier import committed must
//! survive unchanged: the merged schema set is checked before compiling,
//! and the compiled mapping is diffed against the previous one afterwards
//! to prove the change is purely additive.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::mapping::{ClassMapKind, Column, Index, MappingSnapshot, Table};
use crate::schema::{ClassDef, ClassKey, Schema};

/// Result of merging an import into the previously imported schemas.
#[derive(Debug, Clone, Default)]
pub struct SchemaMerge {
    /// Accumulated schema set, previous classes first.
    pub schemas: Vec<Schema>,
    /// Classes seen for the first time.
    pub added: Vec<ClassKey>,
    /// Classes that gained properties.
    pub extended: Vec<ClassKey>,
    /// Number of re-imported classes with identical definitions.
    pub unchanged: usize,
}

/// Merge `incoming` into `previous`, rejecting anything but additions.
pub fn merge_schemas(previous: &[Schema], incoming: &[Schema]) -> Result<SchemaMerge> {
    let mut merge = SchemaMerge {
        schemas: previous.to_vec(),
        ..SchemaMerge::default()
    };

    for schema in incoming {
        let Some(position) = merge
            .schemas
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(&schema.name))
        else {
            merge.added.extend(
                schema
                    .classes
                    .iter()
                    .map(|c| ClassKey::new(&schema.name, &c.name)),
            );
            merge.schemas.push(schema.clone());
            continue;
        };

        let prior = &merge.schemas[position];
        if !prior.alias.eq_ignore_ascii_case(&schema.alias) {
            return Err(Error::evolution(
                &schema.name,
                format!("schema alias changed from '{}' to '{}'", prior.alias, schema.alias),
            ));
        }
        if prior.table_prefix() != schema.table_prefix() {
            return Err(Error::evolution(
                &schema.name,
                format!(
                    "table prefix changed from '{}' to '{}'",
                    prior.table_prefix(),
                    schema.table_prefix()
                ),
            ));
        }

        let mut merged = schema.clone();
        merged.classes.clear();
        for old in &prior.classes {
            let key = ClassKey::new(&schema.name, &old.name);
            let new = schema.class(&old.name).ok_or_else(|| {
                Error::evolution(&key, "class was removed; committed classes cannot be deleted")
            })?;
            if new.fingerprint()? == old.fingerprint()? {
                merge.unchanged += 1;
            } else if new.extends(old) {
                merge.extended.push(key);
            } else {
                return Err(Error::evolution(&key, describe_change(old, new)));
            }
            merged.classes.push(new.clone());
        }
        for class in &schema.classes {
            if prior.class(&class.name).is_none() {
                merge.added.push(ClassKey::new(&schema.name, &class.name));
                merged.classes.push(class.clone());
            }
        }
        merge.schemas[position] = merged;
    }
    Ok(merge)
}

fn describe_change(old: &ClassDef, new: &ClassDef) -> String {
    if old.kind != new.kind {
        return format!(
            "class kind changed from {} to {}",
            old.kind_label(),
            new.kind_label()
        );
    }
    if old.modifier != new.modifier {
        return format!(
            "modifier changed from {:?} to {:?}",
            old.modifier, new.modifier
        );
    }
    if old.bases != new.bases {
        return format!(
            "base classes changed from [{}] to [{}]",
            old.bases.join(", "),
            new.bases.join(", ")
        );
    }
    if old.options != new.options {
        return "mapping options of a committed class cannot change".to_string();
    }
    for (i, property) in old.properties.iter().enumerate() {
        match new.properties.get(i) {
            Some(p) if p == property => continue,
            Some(p) if p.name == property.name => {
                return format!("property '{}' changed definition", property.name)
            }
            _ => {
                return if new.property(&property.name).is_some() {
                    format!("property '{}' was reordered", property.name)
                } else {
                    format!("property '{}' was removed", property.name)
                }
            }
        }
    }
    "class definition changed".to_string()
}

/// Columns appended to one pre-existing table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnAddition {
    pub table: String,
    pub columns: Vec<Column>,
}

/// Additive changes from one mapping version to the next.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingDiff {
    /// Classes mapped for the first time.
    pub added_class_maps: Vec<ClassKey>,
    /// Tables created by this import.
    pub added_tables: Vec<String>,
    /// Columns appended to tables that already existed.
    pub added_columns: Vec<ColumnAddition>,
    /// Class id columns that turned physical, as (table, column).
    pub materialized_columns: Vec<(String, String)>,
    /// Indexes created by this import.
    pub added_indexes: Vec<String>,
    /// Indexes whose predicate changed.
    pub widened_indexes: Vec<String>,
}

impl MappingDiff {
    pub fn is_empty(&self) -> bool {
        self.added_class_maps.is_empty()
            && self.added_tables.is_empty()
            && self.added_columns.is_empty()
            && self.materialized_columns.is_empty()
            && self.added_indexes.is_empty()
            && self.widened_indexes.is_empty()
    }

    /// Number of physical columns added to existing tables.
    pub fn physical_column_count(&self) -> usize {
        self.added_columns
            .iter()
            .flat_map(|a| a.columns.iter())
            .filter(|c| !c.is_virtual)
            .count()
    }
}

/// Diff `next` against `previous`, failing if anything committed changed.
pub fn diff(previous: &MappingSnapshot, next: &MappingSnapshot) -> Result<MappingDiff> {
    let mut diff = MappingDiff::default();

    let next_tables: HashMap<String, &Table> = next
        .tables
        .iter()
        .map(|t| (t.name.to_lowercase(), t))
        .collect();
    for old in &previous.tables {
        let new = next_tables.get(&old.name.to_lowercase()).ok_or_else(|| {
            Error::evolution(&old.name, "table was dropped by a later import")
        })?;
        diff_table(old, new, &mut diff)?;
    }
    for table in &next.tables {
        if previous.table(&table.name).is_none() {
            diff.added_tables.push(table.name.clone());
        }
    }

    for old in &previous.class_maps {
        let new = next.class_map_by_key(&old.class).ok_or_else(|| {
            Error::evolution(&old.class, "class map was dropped by a later import")
        })?;
        if old.id != new.id || old.kind != new.kind {
            return Err(Error::evolution(
                &old.class,
                format!(
                    "class map changed from {:?} #{} to {:?} #{}",
                    old.kind, old.id, new.kind, new.id
                ),
            ));
        }
        if old.kind == ClassMapKind::ForeignKey {
            continue;
        }
        for old_map in &old.property_maps {
            let moved = match new.property_map(&old_map.access_string) {
                Some(new_map) => !new_map.columns.starts_with(&old_map.columns),
                None => true,
            };
            if moved {
                return Err(Error::evolution(
                    &old.class,
                    format!(
                        "property '{}' would move to different columns",
                        old_map.access_string
                    ),
                ));
            }
        }
    }
    for class_map in &next.class_maps {
        if previous.class_map_by_key(&class_map.class).is_none() {
            diff.added_class_maps.push(class_map.class.clone());
        }
    }

    for old in &previous.indexes {
        match next.index(&old.name) {
            Some(new) => diff_index(old, new, &mut diff)?,
            None => {
                return Err(Error::evolution(
                    &old.table,
                    format!("index '{}' was dropped by a later import", old.name),
                ))
            }
        }
    }
    for index in &next.indexes {
        if previous.index(&index.name).is_none() {
            diff.added_indexes.push(index.name.clone());
        }
    }

    Ok(diff)
}

fn diff_table(old: &Table, new: &Table, diff: &mut MappingDiff) -> Result<()> {
    if old.kind != new.kind || new.columns.len() < old.columns.len() {
        return Err(Error::evolution(
            &old.name,
            "table layout of a committed table cannot change",
        ));
    }
    for (old_column, new_column) in old.columns.iter().zip(&new.columns) {
        let mut relaxed = new_column.clone();
        relaxed.is_virtual = old_column.is_virtual;
        if relaxed != *old_column || (new_column.is_virtual && !old_column.is_virtual) {
            return Err(Error::evolution(
                &old.name,
                format!("column '{}' of a committed table changed", old_column.name),
            ));
        }
        if old_column.is_virtual && !new_column.is_virtual {
            diff.materialized_columns
                .push((new.name.clone(), new_column.name.clone()));
        }
    }
    if new.columns.len() > old.columns.len() {
        diff.added_columns.push(ColumnAddition {
            table: new.name.clone(),
            columns: new.columns[old.columns.len()..].to_vec(),
        });
    }
    Ok(())
}

fn diff_index(old: &Index, new: &Index, diff: &mut MappingDiff) -> Result<()> {
    if !old.same_shape(new) {
        return Err(Error::evolution(
            &old.table,
            format!("index '{}' of a committed table changed", old.name),
        ));
    }
    if old.where_clause() != new.where_clause() {
        diff.widened_indexes.push(new.name.clone());
    }
    Ok(())
}
