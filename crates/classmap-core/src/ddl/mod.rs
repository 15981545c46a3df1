//! SQL emission for committed mappings.
//!
//! Statements use SQLite syntax with bracket-quoted identifiers. Only owned
//! tables (primary, joined, overflow) produce DDL; virtual tables exist in
//! the mapping alone and existing tables belong to someone else. Virtual
//! columns are never emitted.

use tracing::warn;

use crate::compiler::MappingDiff;
use crate::mapping::{Column, ColumnKind, ForeignKey, Index, MappingSnapshot, Table, TableKind};

fn quote(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

fn column_list<'a>(columns: impl IntoIterator<Item = &'a String>) -> String {
    columns
        .into_iter()
        .map(|c| quote(c))
        .collect::<Vec<_>>()
        .join(",")
}

fn references(fk: &ForeignKey) -> String {
    let mut sql = format!(
        "REFERENCES {}({}) ON DELETE {}",
        quote(&fk.referenced_table),
        quote(&fk.referenced_column),
        fk.on_delete.as_sql()
    );
    if let Some(on_update) = fk.on_update {
        sql.push_str(" ON UPDATE ");
        sql.push_str(on_update.as_sql());
    }
    sql
}

fn column_def(column: &Column) -> String {
    let mut sql = format!("{} {}", quote(&column.name), column.ty.as_sql());
    if column.kind == ColumnKind::InstanceId {
        sql.push_str(" PRIMARY KEY");
        return sql;
    }
    if column.kind == ColumnKind::Shared {
        return sql;
    }
    if column.not_null {
        sql.push_str(" NOT NULL");
    }
    if column.unique {
        sql.push_str(" UNIQUE");
    }
    if let Some(collation) = column.collation {
        sql.push_str(" COLLATE ");
        sql.push_str(collation.as_sql());
    }
    sql
}

/// `CREATE TABLE` for an owned table, `None` for virtual and existing tables.
pub fn create_table(table: &Table) -> Option<String> {
    if !table.is_owned() {
        return None;
    }
    let mut parts: Vec<String> = table.physical_columns().map(column_def).collect();
    for fk in &table.foreign_keys {
        if table.column(&fk.column).is_some_and(|c| !c.is_virtual) {
            parts.push(format!("FOREIGN KEY({}) {}", quote(&fk.column), references(fk)));
        }
    }
    Some(format!(
        "CREATE TABLE {}({})",
        quote(&table.name),
        parts.join(", ")
    ))
}

pub fn create_index(index: &Index) -> String {
    let mut sql = format!(
        "CREATE {}INDEX {} ON {}({})",
        if index.is_unique { "UNIQUE " } else { "" },
        quote(&index.name),
        quote(&index.table),
        column_list(&index.columns)
    );
    if let Some(predicate) = index.where_clause() {
        sql.push_str(" WHERE ");
        sql.push_str(&predicate);
    }
    sql
}

pub fn drop_index(name: &str) -> String {
    format!("DROP INDEX IF EXISTS {}", quote(name))
}

/// `ALTER TABLE ... ADD COLUMN` for a column appended to an existing table.
///
/// SQLite cannot add a NOT NULL column without a default, nor a UNIQUE
/// column; the first is relaxed and the second becomes a unique index.
pub fn add_column(table: &Table, column: &Column, default: Option<u64>) -> Vec<String> {
    let mut sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote(&table.name),
        quote(&column.name),
        column.ty.as_sql()
    );
    if column.kind != ColumnKind::Shared {
        match (column.not_null, default) {
            (true, Some(value)) => sql.push_str(&format!(" NOT NULL DEFAULT {}", value)),
            (true, None) => warn!(
                table = %table.name,
                column = %column.name,
                "cannot add NOT NULL column without a default; adding it as nullable"
            ),
            (false, Some(value)) => sql.push_str(&format!(" DEFAULT {}", value)),
            (false, None) => {}
        }
        if let Some(collation) = column.collation {
            sql.push_str(" COLLATE ");
            sql.push_str(collation.as_sql());
        }
    }
    if let Some(fk) = table.foreign_key_on(&column.name) {
        sql.push(' ');
        sql.push_str(&references(fk));
    }

    let mut statements = vec![sql];
    if column.unique && column.kind != ColumnKind::Shared {
        statements.push(format!(
            "CREATE UNIQUE INDEX {} ON {}({})",
            quote(&format!("uix_{}_{}", table.name, column.name)),
            quote(&table.name),
            quote(&column.name)
        ));
    }
    statements
}

/// Full DDL of a snapshot: every owned table, then every index.
pub fn schema_ddl(snapshot: &MappingSnapshot) -> Vec<String> {
    let mut statements: Vec<String> = snapshot.tables.iter().filter_map(create_table).collect();
    statements.extend(snapshot.indexes.iter().map(create_index));
    statements
}

/// Class id of the only class whose rows lived in `table` before it
/// gained a second one.
fn sole_resident(previous: &MappingSnapshot, table: &Table) -> Option<u64> {
    let host = match (table.kind, table.parent.as_deref()) {
        (TableKind::Overflow, Some(parent)) => parent,
        _ => table.name.as_str(),
    };
    previous.residents_of(host).next().map(|m| m.id.0)
}

/// Statements that upgrade a database holding `previous` to `next`.
pub fn diff_ddl(previous: &MappingSnapshot, next: &MappingSnapshot, diff: &MappingDiff) -> Vec<String> {
    let mut statements = Vec::new();

    for name in &diff.added_tables {
        if let Some(sql) = next.table(name).and_then(create_table) {
            statements.push(sql);
        }
    }

    for (table_name, column_name) in &diff.materialized_columns {
        let Some(table) = next.table(table_name).filter(|t| t.is_owned()) else {
            continue;
        };
        if let Some(column) = table.column(column_name) {
            statements.extend(add_column(table, column, sole_resident(previous, table)));
        }
    }

    for addition in &diff.added_columns {
        let Some(table) = next.table(&addition.table).filter(|t| t.is_owned()) else {
            continue;
        };
        for column in addition.columns.iter().filter(|c| !c.is_virtual) {
            let default = (column.kind == ColumnKind::ClassId)
                .then(|| sole_resident(previous, table))
                .flatten();
            statements.extend(add_column(table, column, default));
        }
    }

    for name in &diff.widened_indexes {
        if let Some(index) = next.index(name) {
            statements.push(drop_index(name));
            statements.push(create_index(index));
        }
    }
    for name in &diff.added_indexes {
        if let Some(index) = next.index(name) {
            statements.push(create_index(index));
        }
    }
    statements
}
