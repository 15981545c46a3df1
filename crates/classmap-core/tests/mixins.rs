//! Mixins and properties reached through several inheritance paths.

mod common;

use classmap_core::{ClassDef, ClassMapOption, MapStrategy, ShareColumns, TableKind};
use common::{int, test_schema, TestContext};

fn root() -> ClassDef {
    ClassDef::entity("Root")
        .with_class_map(ClassMapOption::new(MapStrategy::TablePerHierarchy))
        .with_share_columns(ShareColumns::new())
        .with_property(int("R"))
}

#[test]
fn test_mixin_table_is_virtual() {
    let ctx = TestContext::new();
    ctx.import_one(test_schema().with_classes([
        root(),
        ClassDef::mixin("IMix", "Root").with_property(int("M")),
        ClassDef::entity("Leaf").with_base("Root").with_base("IMix"),
    ]))
    .unwrap();

    let snapshot = ctx.snapshot();
    let table = snapshot.table("ts_IMix").unwrap();
    assert_eq!(table.kind, TableKind::Virtual);
    assert!(table.columns.iter().all(|c| c.is_virtual));
    let (_, is_mixin) = snapshot.strategy("ts", "IMix").unwrap();
    assert!(is_mixin);

    assert_eq!(ctx.columns_of("Leaf", "M"), ["ts_Root.ps2"]);
    assert!(snapshot.residents_of("ts_IMix").next().is_none());
}

#[test]
fn test_diamond_property_allocated_once() {
    let ctx = TestContext::new();
    ctx.import_one(test_schema().with_classes([
        root(),
        ClassDef::mixin("IMix", "Root").with_property(int("M")),
        ClassDef::entity("Mid").with_base("Root").with_base("IMix"),
        ClassDef::entity("Leaf")
            .with_base("Mid")
            .with_base("IMix")
            .with_property(int("L")),
    ]))
    .unwrap();

    assert_eq!(ctx.columns_of("Mid", "M"), ["ts_Root.ps2"]);
    assert_eq!(ctx.columns_of("Leaf", "M"), ["ts_Root.ps2"]);
    assert_eq!(ctx.columns_of("Leaf", "L"), ["ts_Root.ps3"]);
    assert_eq!(ctx.snapshot().table("ts_Root").unwrap().shared_column_count(), 3);
}

#[test]
fn test_unrelated_hosts_reuse_mixin_columns() {
    let ctx = TestContext::new();
    ctx.import_one(test_schema().with_classes([
        root(),
        ClassDef::mixin("IMix", "Root").with_property(int("M")),
        ClassDef::entity("Left").with_base("Root").with_base("IMix"),
        ClassDef::entity("Right").with_base("Root").with_base("IMix"),
    ]))
    .unwrap();

    assert_eq!(ctx.columns_of("Left", "M"), ["ts_Root.ps2"]);
    assert_eq!(ctx.columns_of("Right", "M"), ["ts_Root.ps2"]);
}

#[test]
fn test_mixin_outside_host_hierarchy_rejected() {
    let ctx = TestContext::new();
    let err = ctx
        .import_one(test_schema().with_classes([
            root(),
            ClassDef::entity("Other"),
            ClassDef::mixin("IMix", "Root"),
            ClassDef::entity("Wrong").with_base("Other").with_base("IMix"),
        ]))
        .unwrap_err();
    assert!(err.is_validation());
    assert!(ctx.catalog.current_snapshot().is_none());
}

#[test]
fn test_mixin_with_mapping_options_rejected() {
    let ctx = TestContext::new();
    let err = ctx
        .import_one(test_schema().with_classes([
            root(),
            ClassDef::mixin("IMix", "Root")
                .with_class_map(ClassMapOption::new(MapStrategy::OwnTable)),
        ]))
        .unwrap_err();
    assert!(err.is_validation());
}
