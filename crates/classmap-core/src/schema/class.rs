//! Class definitions.

use rkyv::{Archive, Deserialize, Serialize};

use super::options::{
    ClassMapOption, ClassOptions, DbIndexDef, ForeignKeyConstraint, LinkTableRelationshipMap,
    MixinOption, ShareColumns,
};
use super::property::PropertyDef;
use super::relationship::RelationshipInfo;
use crate::error::{Error, Result};

/// Class type.
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
pub enum ClassKind {
    Entity,
    Struct,
    Relationship(RelationshipInfo),
}

/// Class modifier.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum Modifier {
    #[default]
    None,
    Abstract,
    Sealed,
}

/// A declared class.
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
pub struct ClassDef {
    pub name: String,
    pub kind: ClassKind,
    #[serde(default)]
    pub modifier: Modifier,
    /// Base class references in declared order.
    #[serde(default)]
    pub bases: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub options: ClassOptions,
}

impl ClassDef {
    pub fn new(name: impl Into<String>, kind: ClassKind) -> Self {
        Self {
            name: name.into(),
            kind,
            modifier: Modifier::None,
            bases: Vec::new(),
            properties: Vec::new(),
            options: ClassOptions::default(),
        }
    }

    pub fn entity(name: impl Into<String>) -> Self {
        Self::new(name, ClassKind::Entity)
    }

    pub fn structure(name: impl Into<String>) -> Self {
        Self::new(name, ClassKind::Struct)
    }

    pub fn relationship(name: impl Into<String>, info: RelationshipInfo) -> Self {
        Self::new(name, ClassKind::Relationship(info))
    }

    /// An abstract entity class flagged as a mixin for `applies_to`.
    pub fn mixin(name: impl Into<String>, applies_to: impl Into<String>) -> Self {
        let mut class = Self::entity(name).abstract_class();
        class.options.mixin = Some(MixinOption {
            applies_to: applies_to.into(),
        });
        class
    }

    pub fn abstract_class(mut self) -> Self {
        self.modifier = Modifier::Abstract;
        self
    }

    pub fn sealed(mut self) -> Self {
        self.modifier = Modifier::Sealed;
        self
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.bases.push(base.into());
        self
    }

    pub fn with_property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_properties(mut self, properties: impl IntoIterator<Item = PropertyDef>) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn with_class_map(mut self, class_map: ClassMapOption) -> Self {
        self.options.class_map = Some(class_map);
        self
    }

    pub fn with_share_columns(mut self, share_columns: ShareColumns) -> Self {
        self.options.share_columns = Some(share_columns);
        self
    }

    pub fn with_joined_table_per_direct_subclass(mut self) -> Self {
        self.options.joined_table_per_direct_subclass = true;
        self
    }

    pub fn with_link_table(mut self, link_table: LinkTableRelationshipMap) -> Self {
        self.options.link_table = Some(link_table);
        self
    }

    pub fn with_index(mut self, index: DbIndexDef) -> Self {
        self.options.db_indexes.push(index);
        self
    }

    pub fn with_foreign_key_constraint(mut self, constraint: ForeignKeyConstraint) -> Self {
        self.options.foreign_key_constraint = Some(constraint);
        self
    }

    pub fn is_abstract(&self) -> bool {
        self.modifier == Modifier::Abstract
    }

    pub fn is_sealed(&self) -> bool {
        self.modifier == Modifier::Sealed
    }

    pub fn is_mixin(&self) -> bool {
        self.options.mixin.is_some()
    }

    pub fn is_struct(&self) -> bool {
        self.kind == ClassKind::Struct
    }

    /// Relationship metadata, if this is a relationship class.
    pub fn relationship_info(&self) -> Option<&RelationshipInfo> {
        match &self.kind {
            ClassKind::Relationship(info) => Some(info),
            _ => None,
        }
    }

    /// Declared strategy, if a `ClassMap` option is present.
    pub fn declared_strategy(&self) -> Option<&ClassMapOption> {
        self.options.class_map.as_ref()
    }

    /// Find a directly declared property (case-insensitive).
    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Short label of the class type used in diagnostics.
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            ClassKind::Entity => "entity",
            ClassKind::Struct => "struct",
            ClassKind::Relationship(_) => "relationship",
        }
    }

    /// Content hash of the definition: blake3 over its JSON form, hex encoded.
    pub fn fingerprint(&self) -> Result<String> {
        let json = serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(hex::encode(blake3::hash(&json).as_bytes()))
    }

    /// Returns true if `self` is `previous` with zero or more properties
    /// appended and nothing else changed.
    pub fn extends(&self, previous: &ClassDef) -> bool {
        self.name == previous.name
            && self.kind == previous.kind
            && self.modifier == previous.modifier
            && self.bases == previous.bases
            && self.options == previous.options
            && self.properties.len() >= previous.properties.len()
            && self.properties[..previous.properties.len()] == previous.properties[..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PrimitiveType, PropertyDef};

    #[test]
    fn test_fingerprint_is_stable() {
        let a = ClassDef::entity("Foo")
            .with_property(PropertyDef::primitive("Code", PrimitiveType::String));
        let b = a.clone();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        let c = a
            .clone()
            .with_property(PropertyDef::primitive("Size", PrimitiveType::Integer));
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }

    #[test]
    fn test_extends() {
        let v1 = ClassDef::entity("Foo")
            .with_property(PropertyDef::primitive("Code", PrimitiveType::String));
        let v2 = v1
            .clone()
            .with_property(PropertyDef::primitive("Size", PrimitiveType::Integer));
        assert!(v2.extends(&v1));
        assert!(v1.extends(&v1));
        assert!(!v1.extends(&v2));

        let retyped = ClassDef::entity("Foo")
            .with_property(PropertyDef::primitive("Code", PrimitiveType::Integer));
        assert!(!retyped.extends(&v1));

        let sealed = v1.clone().sealed();
        assert!(!sealed.extends(&v1));
    }

    #[test]
    fn test_mixin_builder() {
        let mixin = ClassDef::mixin("IFoo", "Element");
        assert!(mixin.is_mixin());
        assert!(mixin.is_abstract());
        assert_eq!(mixin.options.mixin.unwrap().applies_to, "Element");
    }
}
