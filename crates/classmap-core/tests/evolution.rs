//! Incremental imports: idempotence, additive growth and conflicts.

mod common;

use classmap_core::{ClassDef, ClassMapOption, MapStrategy, PrimitiveType, PropertyDef, ShareColumns};
use common::{int, string, test_schema, TestContext};

fn element() -> ClassDef {
    ClassDef::entity("Element")
        .with_class_map(ClassMapOption::new(MapStrategy::TablePerHierarchy))
        .with_property(string("Code"))
}

#[test]
fn test_reimport_is_a_no_op() {
    let ctx = TestContext::new();
    let schema = test_schema().with_classes([element(), ClassDef::entity("Part").with_base("Element")]);
    let first = ctx.import_one(schema.clone()).unwrap();
    assert!(first.committed);

    let second = ctx.import_one(schema).unwrap();
    assert!(!second.committed);
    assert_eq!(second.version, first.version);
    assert!(second.diff.is_empty());
    assert!(second.ddl.is_empty());
    assert_eq!(ctx.catalog.list_versions().unwrap(), [1]);
}

#[test]
fn test_second_resident_materializes_class_id() {
    let ctx = TestContext::new();
    ctx.import_one(test_schema().with_class(element())).unwrap();
    let element_id = ctx.snapshot().class_map("ts", "Element").unwrap().id;
    assert!(ctx
        .snapshot()
        .table("ts_Element")
        .unwrap()
        .class_id_column()
        .unwrap()
        .is_virtual);

    let outcome = ctx
        .import_one(test_schema().with_classes([
            element(),
            ClassDef::entity("Part").with_base("Element").with_property(int("Weight")),
        ]))
        .unwrap();

    assert_eq!(
        outcome.diff.materialized_columns,
        [("ts_Element".to_string(), "ECClassId".to_string())]
    );
    assert_eq!(
        outcome.ddl,
        [
            format!(
                "ALTER TABLE [ts_Element] ADD COLUMN [ECClassId] INTEGER NOT NULL DEFAULT {}",
                element_id
            ),
            "ALTER TABLE [ts_Element] ADD COLUMN [Weight] INTEGER".to_string(),
            "CREATE INDEX [ix_ts_Element_ecclassid] ON [ts_Element]([ECClassId])".to_string(),
        ]
    );
}

#[test]
fn test_appending_properties_keeps_existing_columns() {
    let ctx = TestContext::new();
    ctx.import_one(test_schema().with_class(element())).unwrap();
    let before = ctx.columns_of("Element", "Code");

    let extended = element().with_property(PropertyDef::primitive("Origin", PrimitiveType::Point2d));
    let outcome = ctx.import_one(test_schema().with_class(extended)).unwrap();

    assert_eq!(ctx.columns_of("Element", "Code"), before);
    assert_eq!(
        ctx.columns_of("Element", "Origin"),
        ["ts_Element.Origin_X", "ts_Element.Origin_Y"]
    );
    assert_eq!(outcome.diff.physical_column_count(), 2);
    assert_eq!(ctx.catalog.list_versions().unwrap(), [1, 2]);

    let v1 = ctx.catalog.snapshot_at_version(1).unwrap().unwrap();
    assert!(v1.lookup_property("ts", "Element", "Origin").is_none());
}

#[test]
fn test_changed_property_is_a_conflict() {
    let ctx = TestContext::new();
    ctx.import_one(test_schema().with_class(element())).unwrap();

    let changed = ClassDef::entity("Element")
        .with_class_map(ClassMapOption::new(MapStrategy::TablePerHierarchy))
        .with_property(int("Code"));
    let err = ctx.import_one(test_schema().with_class(changed)).unwrap_err();
    assert!(err.is_evolution_conflict());
    assert_eq!(ctx.catalog.current_version(), 1);
}

#[test]
fn test_removed_class_is_a_conflict() {
    let ctx = TestContext::new();
    ctx.import_one(test_schema().with_classes([element(), ClassDef::entity("Part").with_base("Element")]))
        .unwrap();
    let err = ctx.import_one(test_schema().with_class(element())).unwrap_err();
    assert!(err.is_evolution_conflict());
}

#[test]
fn test_changed_strategy_is_a_conflict() {
    let ctx = TestContext::new();
    ctx.import_one(test_schema().with_class(ClassDef::entity("Foo")))
        .unwrap();
    let err = ctx
        .import_one(test_schema().with_class(
            ClassDef::entity("Foo").with_class_map(ClassMapOption::new(MapStrategy::TablePerHierarchy)),
        ))
        .unwrap_err();
    assert!(err.is_evolution_conflict());
}

#[test]
fn test_new_schema_can_derive_from_committed_one() {
    let ctx = TestContext::new();
    ctx.import_one(test_schema().with_class(element())).unwrap();

    let domain = classmap_core::Schema::new("Domain", "dom")
        .with_class(ClassDef::entity("Pipe").with_base("ts:Element").with_property(int("Diameter")));
    ctx.import(&[domain]).unwrap();

    let snapshot = ctx.snapshot();
    let pipe = snapshot.lookup_property("dom", "Pipe", "Diameter").unwrap();
    assert_eq!(pipe.columns().unwrap()[0].table, "ts_Element");
    assert!(snapshot.table("dom_Pipe").is_none());
}

fn shared_branches() -> Vec<ClassDef> {
    vec![
        ClassDef::entity("Base")
            .with_class_map(ClassMapOption::new(MapStrategy::TablePerHierarchy))
            .with_share_columns(ShareColumns::new())
            .with_property(int("B")),
        ClassDef::entity("Left").with_base("Base").with_property(int("L")),
        ClassDef::entity("Right").with_base("Base").with_property(int("R")),
    ]
}

#[test]
fn test_joining_branches_that_reuse_a_column_is_rejected() {
    let ctx = TestContext::new();
    ctx.import_one(test_schema().with_classes(shared_branches())).unwrap();
    // Siblings never share a row, so both claim the same pool column.
    assert_eq!(ctx.columns_of("Left", "L"), ["ts_Base.ps2"]);
    assert_eq!(ctx.columns_of("Right", "R"), ["ts_Base.ps2"]);

    let mut classes = shared_branches();
    classes.push(ClassDef::entity("Leaf").with_base("Left").with_base("Right"));
    let err = ctx.import_one(test_schema().with_classes(classes)).unwrap_err();
    assert!(err.is_validation());
    assert_eq!(ctx.catalog.list_versions().unwrap(), [1]);
    assert!(ctx.snapshot().class_map("ts", "Leaf").is_none());
}

#[test]
fn test_joining_branches_in_one_import_keeps_columns_apart() {
    let ctx = TestContext::new();
    let mut classes = shared_branches();
    classes.push(ClassDef::entity("Leaf").with_base("Left").with_base("Right"));
    ctx.import_one(test_schema().with_classes(classes)).unwrap();

    assert_eq!(ctx.columns_of("Leaf", "B"), ["ts_Base.ps1"]);
    assert_eq!(ctx.columns_of("Leaf", "L"), ["ts_Base.ps2"]);
    assert_eq!(ctx.columns_of("Leaf", "R"), ["ts_Base.ps3"]);
    assert_eq!(ctx.columns_of("Right", "R"), ["ts_Base.ps3"]);
}
