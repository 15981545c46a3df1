//! The class-mapping compiler.
//!
//! One import runs these passes over the merged class graph, in order:
//!
//! 1. [`evolution::merge_schemas`] folds the import into the committed schemas.
//! 2. `strategy` resolves one mapping strategy per class.
//! 3. `mixin` checks applies-to constraints.
//! 4. `relationship` decides foreign key versus link table storage.
//! 5. `allocator` places classes in tables and properties in columns.
//! 6. `relationship` rebuilds relationship maps and foreign keys.
//! 7. `index` derives all indexes.
//! 8. [`evolution::diff`] proves the result only adds to the previous mapping.
//!
//! Everything runs against a clone of the committed snapshot, so a failing
//! pass leaves nothing behind.

mod allocator;
mod context;
mod evolution;
mod index;
mod mixin;
mod relationship;
mod strategy;

pub use evolution::{diff, merge_schemas, ColumnAddition, MappingDiff, SchemaMerge};

use tracing::{debug, info, instrument, warn};

use self::context::ImportContext;
use crate::catalog::MappingCatalog;
use crate::config::MappingConfig;
use crate::ddl;
use crate::error::Result;
use crate::mapping::MappingSnapshot;
use crate::schema::{ClassGraph, Schema};

/// Compile `schemas` on top of `previous` without touching any catalog.
///
/// Returns the new snapshot (with `previous`'s version) and the diff
/// against `previous`.
pub fn compile(
    previous: &MappingSnapshot,
    schemas: &[Schema],
    config: &MappingConfig,
) -> Result<(MappingSnapshot, MappingDiff)> {
    let merge = merge_schemas(&previous.schemas, schemas)?;
    debug!(
        added = merge.added.len(),
        extended = merge.extended.len(),
        unchanged = merge.unchanged,
        "merged schemas"
    );

    let graph = ClassGraph::build(&merge.schemas)?;
    let mut snapshot = previous.clone();
    snapshot.schemas = merge.schemas;

    let mut ctx = ImportContext::new(config, graph, snapshot);
    strategy::resolve_all(&mut ctx)?;
    mixin::validate(&ctx)?;
    relationship::plan_relationships(&mut ctx)?;
    allocator::map_classes(&mut ctx)?;
    relationship::finish_relationships(&mut ctx)?;
    allocator::materialize_class_ids(&mut ctx)?;
    let indexes = index::build_indexes(&ctx)?;
    ctx.snapshot.indexes = indexes;

    let next = ctx.into_snapshot();
    let diff = diff(previous, &next)?;
    Ok((next, diff))
}

/// Result of one [`SchemaImporter::import`].
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    /// Catalog version after the import.
    pub version: u64,
    /// False when the import changed nothing and no version was written.
    pub committed: bool,
    pub diff: MappingDiff,
    /// Statements that bring a database at the previous version up to date.
    pub ddl: Vec<String>,
}

/// Imports schemas into a [`MappingCatalog`], one import at a time.
pub struct SchemaImporter<'a> {
    catalog: &'a MappingCatalog,
    config: MappingConfig,
}

impl<'a> SchemaImporter<'a> {
    pub fn new(catalog: &'a MappingCatalog) -> Self {
        Self {
            catalog,
            config: MappingConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MappingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    /// Compile and commit `schemas`.
    ///
    /// Any rejection aborts the import; the catalog keeps its previous
    /// version. Re-importing what is already committed is a no-op.
    #[instrument(skip(self, schemas), fields(schemas = schemas.len()))]
    pub fn import(&self, schemas: &[Schema]) -> Result<ImportOutcome> {
        let _guard = self.catalog.lock();
        let previous = self.catalog.current_snapshot().unwrap_or_default();

        let (next, diff) = match compile(&previous, schemas, &self.config) {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!(error = %e, "schema import rejected");
                return Err(e);
            }
        };

        if next == previous {
            debug!(version = previous.version, "schema import changed nothing");
            return Ok(ImportOutcome {
                version: previous.version,
                committed: false,
                diff,
                ddl: Vec::new(),
            });
        }

        let ddl = ddl::diff_ddl(&previous, &next, &diff);
        let version = self.catalog.commit(next)?;
        info!(
            version,
            classes = diff.added_class_maps.len(),
            tables = diff.added_tables.len(),
            columns = diff.physical_column_count(),
            materialized = diff.materialized_columns.len(),
            indexes = diff.added_indexes.len(),
            widened = diff.widened_indexes.len(),
            "committed schema import"
        );

        Ok(ImportOutcome {
            version,
            committed: true,
            diff,
            ddl,
        })
    }
}
