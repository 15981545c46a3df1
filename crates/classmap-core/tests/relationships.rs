//! Relationships mapped to foreign keys and link tables.

mod common;

use classmap_core::{
    ClassDef, ClassMapOption, Constraint, Direction, ForeignKeyAction, ForeignKeyConstraint,
    MapStrategy, Multiplicity, PropertyDef, RelationshipInfo, RelationshipMapping, Schema,
    Strength,
};
use common::{string, test_schema, TestContext};

fn a_has_b(source: Multiplicity, target: Multiplicity) -> ClassDef {
    ClassDef::relationship(
        "AHasB",
        RelationshipInfo::new(
            Constraint::new(source, ["A"]),
            Constraint::new(target, ["B"]),
        ),
    )
    .sealed()
}

fn foreign_key_schema(nav: PropertyDef) -> Schema {
    test_schema().with_classes([
        ClassDef::entity("A").with_property(string("Name")),
        ClassDef::entity("B").with_property(nav),
        a_has_b(Multiplicity::ZERO_ONE, Multiplicity::ZERO_MANY),
    ])
}

#[test]
fn test_foreign_key_relationship_resolves_to_many_end() {
    let ctx = TestContext::new();
    ctx.import_one(foreign_key_schema(PropertyDef::navigation(
        "A",
        "AHasB",
        Direction::Backward,
    )))
    .unwrap();

    assert_eq!(ctx.column_names("ts_B"), ["Id", "ECClassId", "AId", "ARelECClassId"]);
    assert_eq!(ctx.columns_of("AHasB", "SourceECInstanceId"), ["ts_B.AId"]);
    assert_eq!(ctx.columns_of("AHasB", "TargetECInstanceId"), ["ts_B.Id"]);
    assert_eq!(ctx.columns_of("B", "A.Id"), ["ts_B.AId"]);

    let snapshot = ctx.snapshot();
    assert!(snapshot.table("ts_AHasB").is_none());
    let b = snapshot.table("ts_B").unwrap();
    assert!(b.column("ARelECClassId").unwrap().is_virtual);
    assert!(b.foreign_keys.is_empty());
    assert!(snapshot.index("ix_ts_B_fk_ts_AHasB_target").is_some());
}

#[test]
fn test_foreign_key_constraint_emits_references_clause() {
    let ctx = TestContext::new();
    let nav = PropertyDef::navigation("A", "AHasB", Direction::Backward)
        .with_foreign_key_constraint(ForeignKeyConstraint::new());
    let outcome = ctx.import_one(foreign_key_schema(nav)).unwrap();

    assert!(outcome.ddl.contains(
        &"CREATE TABLE [ts_B]([Id] INTEGER PRIMARY KEY, [AId] INTEGER, \
          FOREIGN KEY([AId]) REFERENCES [ts_A]([Id]) ON DELETE SET NULL)"
            .to_string()
    ));
    assert!(outcome.ddl.contains(
        &"CREATE INDEX [ix_ts_B_fk_ts_AHasB_target] ON [ts_B]([AId]) WHERE [AId] IS NOT NULL"
            .to_string()
    ));

    match &ctx.snapshot().relationship_map("ts", "AHasB").unwrap().mapping {
        RelationshipMapping::ForeignKey { on_delete, physical, .. } => {
            assert_eq!(*on_delete, Some(ForeignKeyAction::SetNull));
            assert!(*physical);
        }
        other => panic!("expected a foreign key mapping, got {:?}", other),
    }
}

#[test]
fn test_required_end_without_constraint_stays_nullable() {
    let ctx = TestContext::new();
    ctx.import_one(test_schema().with_classes([
        ClassDef::entity("A"),
        ClassDef::entity("B").with_property(PropertyDef::navigation(
            "A",
            "AHasB",
            Direction::Backward,
        )),
        a_has_b(Multiplicity::ONE_ONE, Multiplicity::ZERO_MANY),
    ]))
    .unwrap();

    let snapshot = ctx.snapshot();
    assert!(!snapshot.table("ts_B").unwrap().column("AId").unwrap().not_null);
}

#[test]
fn test_navigation_on_subclass_keeps_root_column_nullable() {
    let ctx = TestContext::new();
    ctx.import_one(test_schema().with_classes([
        ClassDef::entity("A"),
        ClassDef::entity("Element")
            .with_class_map(ClassMapOption::new(MapStrategy::TablePerHierarchy)),
        ClassDef::entity("B").with_base("Element").with_property(
            PropertyDef::navigation("A", "AHasB", Direction::Backward)
                .with_foreign_key_constraint(ForeignKeyConstraint::new()),
        ),
        a_has_b(Multiplicity::ONE_ONE, Multiplicity::ZERO_MANY),
    ]))
    .unwrap();

    // Element rows live in the same table and have no A.
    assert_eq!(ctx.columns_of("B", "A.Id"), ["ts_Element.AId"]);
    let snapshot = ctx.snapshot();
    assert!(!snapshot.table("ts_Element").unwrap().column("AId").unwrap().not_null);
}

#[test]
fn test_embedding_defaults_to_cascade() {
    let ctx = TestContext::new();
    let rel = ClassDef::relationship(
        "AOwnsB",
        RelationshipInfo::new(
            Constraint::new(Multiplicity::ONE_ONE, ["A"]),
            Constraint::new(Multiplicity::ZERO_MANY, ["B"]),
        )
        .with_strength(Strength::Embedding),
    )
    .sealed();
    let schema = test_schema().with_classes([
        ClassDef::entity("A"),
        ClassDef::entity("B").with_property(
            PropertyDef::navigation("Owner", "AOwnsB", Direction::Backward)
                .with_foreign_key_constraint(ForeignKeyConstraint::new()),
        ),
        rel,
    ]);
    ctx.import_one(schema).unwrap();

    let snapshot = ctx.snapshot();
    let b = snapshot.table("ts_B").unwrap();
    let owner = b.column("OwnerId").unwrap();
    assert!(owner.not_null);
    assert_eq!(b.foreign_key_on("OwnerId").unwrap().on_delete, ForeignKeyAction::Cascade);
    // The column is NOT NULL, so the index needs no predicate.
    let index = snapshot.index("ix_ts_B_fk_ts_AOwnsB_target").unwrap();
    assert!(!index.is_partial());
}

#[test]
fn test_many_to_many_maps_to_link_table() {
    let ctx = TestContext::new();
    let schema = test_schema().with_classes([
        ClassDef::entity("A"),
        ClassDef::entity("B"),
        a_has_b(Multiplicity::ZERO_MANY, Multiplicity::ZERO_MANY),
    ]);
    let outcome = ctx.import_one(schema).unwrap();

    assert_eq!(
        ctx.column_names("ts_AHasB"),
        ["Id", "ECClassId", "SourceId", "SourceECClassId", "TargetId", "TargetECClassId"]
    );
    assert_eq!(ctx.columns_of("AHasB", "SourceECInstanceId"), ["ts_AHasB.SourceId"]);
    assert_eq!(ctx.columns_of("AHasB", "TargetECInstanceId"), ["ts_AHasB.TargetId"]);

    let snapshot = ctx.snapshot();
    assert!(!snapshot.index("ix_ts_AHasB_source").unwrap().is_unique);
    assert!(!snapshot.index("ix_ts_AHasB_target").unwrap().is_unique);
    let unique = snapshot.index("uix_ts_AHasB_sourcetargetclassid").unwrap();
    assert!(unique.is_unique);
    assert_eq!(unique.columns, ["SourceId", "TargetId"]);

    let create = outcome
        .ddl
        .iter()
        .find(|s| s.starts_with("CREATE TABLE [ts_AHasB]"))
        .unwrap();
    assert!(create.contains("FOREIGN KEY([SourceId]) REFERENCES [ts_A]([Id]) ON DELETE CASCADE"));
    assert!(create.contains("FOREIGN KEY([TargetId]) REFERENCES [ts_B]([Id]) ON DELETE CASCADE"));
}

#[test]
fn test_invalid_navigation_rolls_back_import() {
    let ctx = TestContext::new();
    ctx.import_one(test_schema().with_class(ClassDef::entity("Seed")))
        .unwrap();
    let version = ctx.catalog.current_version();

    let nav = PropertyDef::navigation("A", "AHasB", Direction::Forward);
    let err = ctx.import_one(foreign_key_schema(nav).with_class(ClassDef::entity("Seed")));
    assert!(err.unwrap_err().is_relationship());
    assert_eq!(ctx.catalog.current_version(), version);
    assert!(ctx.snapshot().table("ts_A").is_none());
}

#[test]
fn test_unknown_relationship_rejected() {
    let ctx = TestContext::new();
    let schema = test_schema().with_class(
        ClassDef::entity("B").with_property(PropertyDef::navigation(
            "A",
            "Missing",
            Direction::Forward,
        )),
    );
    assert!(ctx.import_one(schema).unwrap_err().is_import_rejection());
    assert_eq!(ctx.catalog.current_version(), 0);
}
