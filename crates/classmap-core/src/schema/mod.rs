//! Input model: schemas, classes, properties and their declared options.
//!
//! The model is produced by an external schema parser. It derives `serde`
//! so the parser may hand it over as JSON, and `rkyv` because accumulated
//! schemas are persisted next to the mapping they produced.

mod class;
mod graph;
mod key;
mod options;
mod property;
mod relationship;

pub use class::{ClassDef, ClassKind, Modifier};
pub use graph::{ClassGraph, ClassNode, InheritedProperty, NodeId};
pub use key::ClassKey;
pub use options::{
    ClassMapOption, ClassOptions, Collation, DbIndexDef, ForeignKeyAction, ForeignKeyConstraint,
    LinkTableRelationshipMap, MapStrategy, MixinOption, PropertyOptions, ShareColumns,
    INDEXED_COLUMNS_ARE_NOT_NULL,
};
pub use property::{Direction, PrimitiveType, PropertyDef, PropertyKind};
pub use relationship::{Constraint, Multiplicity, RelationshipInfo, Strength};

use rkyv::{Archive, Deserialize, Serialize};

/// A schema: a named, versioned set of classes.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Schema {
    pub name: String,
    pub alias: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Prefix of generated table names. Defaults to the alias.
    #[serde(default)]
    pub table_prefix: Option<String>,
    #[serde(default)]
    pub classes: Vec<ClassDef>,
}

fn default_version() -> String {
    "01.00.00".to_string()
}

impl Schema {
    pub fn new(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
            version: default_version(),
            table_prefix: None,
            classes: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = Some(prefix.into());
        self
    }

    pub fn with_class(mut self, class: ClassDef) -> Self {
        self.classes.push(class);
        self
    }

    pub fn with_classes(mut self, classes: impl IntoIterator<Item = ClassDef>) -> Self {
        self.classes.extend(classes);
        self
    }

    /// Find a class by name (case-insensitive).
    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.classes
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Prefix used for generated table names.
    pub fn table_prefix(&self) -> &str {
        match &self.table_prefix {
            Some(prefix) => prefix,
            None if !self.alias.is_empty() => &self.alias,
            None => &self.name,
        }
    }

    /// Returns true if `reference` names this schema by name or alias.
    pub fn is_named(&self, reference: &str) -> bool {
        self.name.eq_ignore_ascii_case(reference)
            || (!self.alias.is_empty() && self.alias.eq_ignore_ascii_case(reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_prefix_defaults_to_alias() {
        let schema = Schema::new("TestSchema", "ts");
        assert_eq!(schema.table_prefix(), "ts");

        let schema = schema.with_table_prefix("tbl");
        assert_eq!(schema.table_prefix(), "tbl");

        let schema = Schema::new("NoAlias", "");
        assert_eq!(schema.table_prefix(), "NoAlias");
    }

    #[test]
    fn test_schema_json_round_trip() {
        let schema = Schema::new("TestSchema", "ts").with_class(
            ClassDef::entity("Foo")
                .with_property(PropertyDef::primitive("Code", PrimitiveType::String).not_null())
                .with_class_map(ClassMapOption::new(MapStrategy::TablePerHierarchy))
                .with_share_columns(ShareColumns::new().with_max_before_overflow(5)),
        );

        let json = serde_json::to_string(&schema).unwrap();
        let parsed: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, schema);
    }

    #[test]
    fn test_schema_json_defaults() {
        let json = r#"{
            "name": "TestSchema",
            "alias": "ts",
            "classes": [
                { "name": "Foo", "kind": "Entity", "properties": [
                    { "name": "Code", "kind": { "Primitive": "String" } }
                ] }
            ]
        }"#;
        let schema: Schema = serde_json::from_str(json).unwrap();
        assert_eq!(schema.version, "01.00.00");
        let foo = schema.class("foo").unwrap();
        assert_eq!(foo.modifier, Modifier::None);
        assert!(foo.options.is_empty());
        assert_eq!(foo.properties[0].options, PropertyOptions::default());
    }
}
