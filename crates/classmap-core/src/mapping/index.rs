//! Index definitions.

use rkyv::{Archive, Deserialize, Serialize};

use super::class_map::ClassId;
use crate::schema::ClassKey;

/// Restricts a partial index to rows of some classes.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ClassFilter {
    /// Class id column of the indexed table.
    pub column: String,
    /// Sorted, de-duplicated.
    pub class_ids: Vec<ClassId>,
}

impl ClassFilter {
    pub fn new(column: impl Into<String>, mut class_ids: Vec<ClassId>) -> Self {
        class_ids.sort();
        class_ids.dedup();
        Self {
            column: column.into(),
            class_ids,
        }
    }

    /// True if every class of `other` is also in `self`.
    pub fn covers(&self, other: &ClassFilter) -> bool {
        other.class_ids.iter().all(|id| self.class_ids.contains(id))
    }
}

/// An index on one table.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub class_filter: Option<ClassFilter>,
    /// Columns that get an `IS NOT NULL` term.
    pub not_null_columns: Vec<String>,
    /// Derived by the engine rather than declared in a schema.
    pub auto_generated: bool,
    /// Class that declared the index.
    pub owner: Option<ClassKey>,
}

impl Index {
    pub fn new<I, S>(name: impl Into<String>, table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            is_unique: false,
            class_filter: None,
            not_null_columns: Vec::new(),
            auto_generated: true,
            owner: None,
        }
    }

    pub fn unique(mut self, is_unique: bool) -> Self {
        self.is_unique = is_unique;
        self
    }

    pub fn with_class_filter(mut self, filter: Option<ClassFilter>) -> Self {
        self.class_filter = filter;
        self
    }

    pub fn with_not_null_columns(mut self, columns: Vec<String>) -> Self {
        self.not_null_columns = columns;
        self
    }

    pub fn declared_by(mut self, owner: ClassKey) -> Self {
        self.auto_generated = false;
        self.owner = Some(owner);
        self
    }

    pub fn is_partial(&self) -> bool {
        self.class_filter.is_some() || !self.not_null_columns.is_empty()
    }

    /// Rendered `WHERE` predicate, without the keyword.
    pub fn where_clause(&self) -> Option<String> {
        let mut terms = Vec::new();
        if let Some(filter) = &self.class_filter {
            let ids: Vec<String> = filter.class_ids.iter().map(|id| id.to_string()).collect();
            terms.push(format!("[{}] IN ({})", filter.column, ids.join(",")));
        }
        for column in &self.not_null_columns {
            terms.push(format!("[{}] IS NOT NULL", column));
        }
        if terms.is_empty() {
            None
        } else {
            Some(terms.join(" AND "))
        }
    }

    /// Same table, columns and uniqueness, ignoring the predicate.
    pub fn same_shape(&self, other: &Index) -> bool {
        self.table.eq_ignore_ascii_case(&other.table)
            && self.columns == other.columns
            && self.is_unique == other.is_unique
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_where_clause() {
        let plain = Index::new("ix_ts_Foo_Code", "ts_Foo", ["Code"]);
        assert_eq!(plain.where_clause(), None);
        assert!(!plain.is_partial());

        let partial = plain
            .clone()
            .with_class_filter(Some(ClassFilter::new(
                "ECClassId",
                vec![ClassId(7), ClassId(3), ClassId(7)],
            )))
            .with_not_null_columns(vec!["Code".to_string()]);
        assert_eq!(
            partial.where_clause().unwrap(),
            "[ECClassId] IN (3,7) AND [Code] IS NOT NULL"
        );
        assert!(partial.same_shape(&plain));
    }

    #[test]
    fn test_filter_covers() {
        let narrow = ClassFilter::new("ECClassId", vec![ClassId(3)]);
        let wide = ClassFilter::new("ECClassId", vec![ClassId(3), ClassId(4)]);
        assert!(wide.covers(&narrow));
        assert!(!narrow.covers(&wide));
    }
}
