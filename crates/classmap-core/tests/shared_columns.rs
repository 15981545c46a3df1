//! Shared columns and overflow tables in table-per-hierarchy mappings.

mod common;

use classmap_core::{
    ClassDef, ClassMapOption, MapStrategy, PrimitiveType, PropertyDef, ShareColumns, TableKind,
};
use common::{int, test_schema, TestContext};

fn numbered(prefix: &str, count: usize, make: impl Fn(String) -> PropertyDef) -> Vec<PropertyDef> {
    (1..=count).map(|i| make(format!("{}{}", prefix, i))).collect()
}

/// A hierarchy whose leaf needs more shared columns than the root table
/// may hold: 11 mixin properties, 11 mixin arrays and 12 own properties.
fn overflowing_hierarchy() -> classmap_core::Schema {
    test_schema().with_classes([
        ClassDef::structure("Measure").with_property(int("S")),
        ClassDef::entity("BaseClass")
            .with_class_map(ClassMapOption::new(MapStrategy::TablePerHierarchy))
            .with_share_columns(
                ShareColumns::new()
                    .with_max_before_overflow(15)
                    .apply_to_subclasses_only(),
            )
            .with_property(PropertyDef::structure("M", "Measure")),
        ClassDef::mixin("IP", "BaseClass").with_properties(numbered("P", 11, |n| int(&n))),
        ClassDef::mixin("IA", "BaseClass").with_properties(numbered("A", 11, |n| {
            PropertyDef::array(n, PrimitiveType::Double)
        })),
        ClassDef::entity("ChildClass")
            .with_base("BaseClass")
            .with_base("IP")
            .with_base("IA")
            .with_properties(numbered("C", 12, |n| int(&n))),
    ])
}

#[test]
fn test_overflow_table_receives_remaining_columns() {
    let ctx = TestContext::new();
    ctx.import_one(overflowing_hierarchy()).unwrap();
    let snapshot = ctx.snapshot();

    assert_eq!(snapshot.table("ts_IP").unwrap().kind, TableKind::Virtual);
    assert_eq!(snapshot.table("ts_IA").unwrap().kind, TableKind::Virtual);

    let base = snapshot.table("ts_BaseClass").unwrap();
    assert_eq!(base.columns.len(), 18);
    assert_eq!(base.shared_column_count(), 15);
    assert!(base.has_column("M_S"));
    assert!(!base.column("M_S").unwrap().is_shared());
    assert!(!base.class_id_column().unwrap().is_virtual);

    let overflow = snapshot.table("ts_BaseClass_Overflow").unwrap();
    assert_eq!(overflow.kind, TableKind::Overflow);
    assert_eq!(overflow.columns.len(), 21);
    assert_eq!(overflow.shared_column_count(), 19);
    assert!(!overflow.class_id_column().unwrap().is_virtual);
    assert_eq!(
        overflow.foreign_key_on("Id").unwrap().referenced_table,
        "ts_BaseClass"
    );
}

#[test]
fn test_allocation_follows_declaration_order() {
    let ctx = TestContext::new();
    ctx.import_one(overflowing_hierarchy()).unwrap();

    // Base first, then IP, then IA, then own properties.
    assert_eq!(ctx.columns_of("ChildClass", "M.S"), ["ts_BaseClass.M_S"]);
    assert_eq!(ctx.columns_of("ChildClass", "P1"), ["ts_BaseClass.ps1"]);
    assert_eq!(ctx.columns_of("ChildClass", "P11"), ["ts_BaseClass.ps11"]);
    assert_eq!(ctx.columns_of("ChildClass", "A4"), ["ts_BaseClass.ps15"]);
    assert_eq!(ctx.columns_of("ChildClass", "A5"), ["ts_BaseClass_Overflow.os1"]);
    assert_eq!(ctx.columns_of("ChildClass", "C12"), ["ts_BaseClass_Overflow.os19"]);

    let ids = ctx.columns_of("ChildClass", "ECInstanceId");
    assert_eq!(ids, ["ts_BaseClass.Id", "ts_BaseClass_Overflow.Id"]);
}

#[test]
fn test_root_keeps_named_columns_under_apply_to_subclasses_only() {
    let ctx = TestContext::new();
    ctx.import_one(overflowing_hierarchy()).unwrap();
    assert_eq!(ctx.columns_of("BaseClass", "M"), ["ts_BaseClass.M_S"]);
    assert_eq!(ctx.columns_of("ChildClass", "M"), ["ts_BaseClass.M_S"]);
}

#[test]
fn test_later_import_continues_numbering() {
    let ctx = TestContext::new();
    let base = ClassDef::entity("Base")
        .with_class_map(ClassMapOption::new(MapStrategy::TablePerHierarchy))
        .with_share_columns(ShareColumns::new())
        .with_property(int("B"));
    let left = ClassDef::entity("Left").with_base("Base").with_property(int("L"));
    ctx.import_one(test_schema().with_classes([base.clone(), left.clone()]))
        .unwrap();
    assert_eq!(ctx.columns_of("Left", "L"), ["ts_Base.ps2"]);

    // A sibling may reuse ps2; its second property needs a fresh number.
    let right = ClassDef::entity("Right")
        .with_base("Base")
        .with_properties([int("R1"), int("R2")]);
    let outcome = ctx
        .import_one(test_schema().with_classes([base, left, right]))
        .unwrap();
    assert_eq!(ctx.columns_of("Right", "R1"), ["ts_Base.ps2"]);
    assert_eq!(ctx.columns_of("Right", "R2"), ["ts_Base.ps3"]);
    assert_eq!(ctx.columns_of("Left", "L"), ["ts_Base.ps2"]);

    assert_eq!(outcome.diff.added_columns.len(), 1);
    assert_eq!(outcome.diff.added_columns[0].columns[0].name, "ps3");
    assert!(outcome
        .ddl
        .contains(&"ALTER TABLE [ts_Base] ADD COLUMN [ps3] BLOB".to_string()));
}

#[test]
fn test_zero_threshold_sends_everything_to_overflow() {
    let ctx = TestContext::new();
    let schema = test_schema().with_classes([
        ClassDef::entity("Base")
            .with_class_map(ClassMapOption::new(MapStrategy::TablePerHierarchy))
            .with_share_columns(ShareColumns::new().with_max_before_overflow(0))
            .with_property(int("B")),
        ClassDef::entity("Sub").with_base("Base").with_property(int("S")),
    ]);
    ctx.import_one(schema).unwrap();

    assert_eq!(ctx.snapshot().table("ts_Base").unwrap().shared_column_count(), 0);
    assert_eq!(ctx.columns_of("Base", "B"), ["ts_Base_Overflow.os1"]);
    assert_eq!(ctx.columns_of("Sub", "S"), ["ts_Base_Overflow.os2"]);
}
