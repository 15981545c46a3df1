//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::path::Path;

use classmap_core::{
    ImportOutcome, MappingCatalog, MappingConfig, MappingSnapshot, PropertyDef, PrimitiveType,
    Result, Schema, SchemaImporter,
};

pub struct TestContext {
    pub catalog: MappingCatalog,
    config: MappingConfig,
    _db: sled::Db,
}

impl TestContext {
    pub fn new() -> Self {
        let db = sled::Config::new().temporary(true).open().unwrap();
        Self::with_db(db)
    }

    /// A catalog over a database stored at `path`, for reopen tests.
    pub fn at_path(path: &Path) -> Self {
        let db = sled::open(path).unwrap();
        Self::with_db(db)
    }

    fn with_db(db: sled::Db) -> Self {
        init_tracing();
        let catalog = MappingCatalog::open(&db).unwrap();
        Self {
            catalog,
            config: MappingConfig::default(),
            _db: db,
        }
    }

    pub fn with_config(mut self, config: MappingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn import(&self, schemas: &[Schema]) -> Result<ImportOutcome> {
        SchemaImporter::new(&self.catalog)
            .with_config(self.config.clone())
            .import(schemas)
    }

    pub fn import_one(&self, schema: Schema) -> Result<ImportOutcome> {
        self.import(&[schema])
    }

    pub fn snapshot(&self) -> MappingSnapshot {
        self.catalog.current_snapshot().unwrap()
    }

    /// Column names of `table`, physical and virtual, in table order.
    pub fn column_names(&self, table: &str) -> Vec<String> {
        self.snapshot()
            .table(table)
            .unwrap()
            .columns
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Columns `access` of `class` maps to, as `table.column`.
    pub fn columns_of(&self, class: &str, access: &str) -> Vec<String> {
        self.snapshot()
            .lookup_property("ts", class, access)
            .unwrap()
            .columns()
            .unwrap()
            .iter()
            .map(|c| format!("{}.{}", c.table, c.column))
            .collect()
    }
}

/// Route import logs to the test harness; filter with `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn int(name: &str) -> PropertyDef {
    PropertyDef::primitive(name, PrimitiveType::Integer)
}

pub fn string(name: &str) -> PropertyDef {
    PropertyDef::primitive(name, PrimitiveType::String)
}

pub fn test_schema() -> Schema {
    Schema::new("TestSchema", "ts")
}
