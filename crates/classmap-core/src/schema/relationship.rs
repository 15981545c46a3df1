//! Relationship class metadata.

use rkyv::{Archive, Deserialize, Serialize};

use super::property::Direction;

/// Relationship strength.
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
pub enum Strength {
    #[default]
    Referencing,
    Holding,
    Embedding,
}

/// Cardinality of one relationship end.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Multiplicity {
    pub lower: u32,
    /// `None` means unbounded.
    pub upper: Option<u32>,
}

impl Multiplicity {
    /// (0..1)
    pub const ZERO_ONE: Multiplicity = Multiplicity::new(0, Some(1));
    /// (1..1)
    pub const ONE_ONE: Multiplicity = Multiplicity::new(1, Some(1));
    /// (0..*)
    pub const ZERO_MANY: Multiplicity = Multiplicity::new(0, None);
    /// (1..*)
    pub const ONE_MANY: Multiplicity = Multiplicity::new(1, None);

    pub const fn new(lower: u32, upper: Option<u32>) -> Self {
        Self { lower, upper }
    }

    /// Upper bound greater than one.
    pub fn is_many(&self) -> bool {
        self.upper.map_or(true, |upper| upper > 1)
    }

    /// Lower bound of at least one.
    pub fn is_required(&self) -> bool {
        self.lower >= 1
    }
}

/// One end of a relationship.
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
pub struct Constraint {
    pub multiplicity: Multiplicity,
    #[serde(default = "default_polymorphic")]
    pub polymorphic: bool,
    /// Constraint class references.
    pub classes: Vec<String>,
}

fn default_polymorphic() -> bool {
    true
}

impl Constraint {
    /// A polymorphic constraint over the given classes.
    pub fn new<I, S>(multiplicity: Multiplicity, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            multiplicity,
            polymorphic: true,
            classes: classes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn non_polymorphic(mut self) -> Self {
        self.polymorphic = false;
        self
    }
}

/// Relationship specific part of a relationship class.
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
pub struct RelationshipInfo {
    #[serde(default)]
    pub strength: Strength,
    #[serde(default)]
    pub strength_direction: Direction,
    pub source: Constraint,
    pub target: Constraint,
}

impl RelationshipInfo {
    /// A referencing relationship with forward strength direction.
    pub fn new(source: Constraint, target: Constraint) -> Self {
        Self {
            strength: Strength::Referencing,
            strength_direction: Direction::Forward,
            source,
            target,
        }
    }

    pub fn with_strength(mut self, strength: Strength) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_strength_direction(mut self, direction: Direction) -> Self {
        self.strength_direction = direction;
        self
    }

    /// Both ends allow many instances.
    pub fn is_many_to_many(&self) -> bool {
        self.source.multiplicity.is_many() && self.target.multiplicity.is_many()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiplicity() {
        assert!(!Multiplicity::ZERO_ONE.is_many());
        assert!(Multiplicity::ZERO_MANY.is_many());
        assert!(Multiplicity::ONE_ONE.is_required());
        assert!(!Multiplicity::ZERO_MANY.is_required());
        assert!(Multiplicity::new(0, Some(5)).is_many());
    }

    #[test]
    fn test_many_to_many() {
        let rel = RelationshipInfo::new(
            Constraint::new(Multiplicity::ZERO_MANY, ["A"]),
            Constraint::new(Multiplicity::ONE_MANY, ["B"]),
        );
        assert!(rel.is_many_to_many());
    }
}
