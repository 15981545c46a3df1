//! Catalog manager for storing and retrieving mapping snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, MutexGuard, RwLock};
use sled::transaction::TransactionError;
use sled::{Db, Transactional, Tree};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::mapping::{ExistingTableDef, MappingSnapshot};

/// Tree name for mapping snapshots.
const SNAPSHOT_TREE: &str = "classmap:snapshots";

/// Tree name for catalog metadata.
const META_TREE: &str = "classmap:meta";

/// Key for current mapping version in meta tree.
const CURRENT_VERSION_KEY: &[u8] = b"current_version";

/// The catalog of committed mappings.
pub struct MappingCatalog {
    /// Snapshots by big-endian version.
    snapshot_tree: Tree,
    /// Metadata tree.
    meta_tree: Tree,
    /// Current version (cached).
    current_version: AtomicU64,
    /// Current snapshot (cached).
    current_snapshot: RwLock<Option<MappingSnapshot>>,
    /// Serializes imports and registrations.
    import_lock: Mutex<()>,
}

impl MappingCatalog {
    /// Open or create a catalog using the given sled database.
    pub fn open(db: &Db) -> Result<Self> {
        let snapshot_tree = db.open_tree(SNAPSHOT_TREE)?;
        let meta_tree = db.open_tree(META_TREE)?;

        let current_version = match meta_tree.get(CURRENT_VERSION_KEY)? {
            Some(bytes) => decode_version(&bytes)?,
            None => 0,
        };

        let catalog = Self {
            snapshot_tree,
            meta_tree,
            current_version: AtomicU64::new(current_version),
            current_snapshot: RwLock::new(None),
            import_lock: Mutex::new(()),
        };

        if current_version > 0 {
            let snapshot = catalog.snapshot_at_version(current_version)?.ok_or_else(|| {
                Error::Deserialization(format!(
                    "snapshot for current version {} is missing",
                    current_version
                ))
            })?;
            *catalog.current_snapshot.write() = Some(snapshot);
        }
        debug!(version = current_version, "opened mapping catalog");

        Ok(catalog)
    }

    /// Get the current mapping version; 0 before the first import.
    pub fn current_version(&self) -> u64 {
        self.current_version.load(Ordering::SeqCst)
    }

    /// Get the current snapshot.
    pub fn current_snapshot(&self) -> Option<MappingSnapshot> {
        self.current_snapshot.read().clone()
    }

    /// Get the snapshot committed as `version`.
    pub fn snapshot_at_version(&self, version: u64) -> Result<Option<MappingSnapshot>> {
        match self.snapshot_tree.get(version.to_be_bytes())? {
            Some(bytes) => Ok(Some(MappingSnapshot::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List all committed versions.
    pub fn list_versions(&self) -> Result<Vec<u64>> {
        let mut versions = Vec::new();
        for result in self.snapshot_tree.iter() {
            let (key, _) = result?;
            if key.len() == 8 {
                versions.push(decode_version(&key)?);
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// Make a pre-existing table available to `ExistingTable` mappings.
    ///
    /// Re-registering replaces the previous definition unless a class
    /// already maps the table. Returns the new version.
    pub fn register_existing_table(&self, table: ExistingTableDef) -> Result<u64> {
        let _guard = self.lock();
        let mut snapshot = self.current_snapshot().unwrap_or_default();

        if snapshot.table(&table.name).is_some() {
            return Err(Error::table_conflict(
                &table.name,
                "table is already part of the mapping and cannot be re-registered",
            ));
        }
        match snapshot
            .existing_tables
            .iter_mut()
            .find(|t| t.name.eq_ignore_ascii_case(&table.name))
        {
            Some(existing) => *existing = table,
            None => snapshot.existing_tables.push(table),
        }
        self.commit(snapshot)
    }

    /// Hold this while reading, compiling and committing one import.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.import_lock.lock()
    }

    /// Store `snapshot` as the next version. Callers hold [`Self::lock`].
    pub(crate) fn commit(&self, mut snapshot: MappingSnapshot) -> Result<u64> {
        let version = self.current_version() + 1;
        snapshot.version = version;
        snapshot.imported_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let key = version.to_be_bytes();
        let value = snapshot.to_bytes()?;

        let result: std::result::Result<(), TransactionError<Error>> =
            (&self.snapshot_tree, &self.meta_tree).transaction(|(snapshots, meta)| {
                snapshots.insert(&key[..], value.as_slice())?;
                meta.insert(CURRENT_VERSION_KEY, &key[..])?;
                Ok(())
            });
        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(e)) => return Err(e),
            Err(TransactionError::Storage(e)) => return Err(Error::Storage(e)),
        }

        self.current_version.store(version, Ordering::SeqCst);
        *self.current_snapshot.write() = Some(snapshot);
        info!(version, bytes = value.len(), "stored mapping snapshot");
        Ok(version)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.snapshot_tree.flush()?;
        self.meta_tree.flush()?;
        Ok(())
    }
}

fn decode_version(bytes: &[u8]) -> Result<u64> {
    let buf: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Deserialization(format!("invalid version key of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{ColumnType, ExistingColumnDef};

    fn test_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn legacy_table() -> ExistingTableDef {
        ExistingTableDef::new("legacy_parts")
            .with_column(ExistingColumnDef::new("Id", ColumnType::Integer).primary_key())
            .with_column(ExistingColumnDef::new("Name", ColumnType::Text))
    }

    #[test]
    fn test_catalog_open_empty() {
        let db = test_db();
        let catalog = MappingCatalog::open(&db).unwrap();

        assert_eq!(catalog.current_version(), 0);
        assert!(catalog.current_snapshot().is_none());
        assert!(catalog.list_versions().unwrap().is_empty());
    }

    #[test]
    fn test_commit_assigns_versions() {
        let db = test_db();
        let catalog = MappingCatalog::open(&db).unwrap();

        let v1 = catalog.commit(MappingSnapshot::new()).unwrap();
        let v2 = catalog.commit(MappingSnapshot::new()).unwrap();
        assert_eq!((v1, v2), (1, 2));

        let current = catalog.current_snapshot().unwrap();
        assert_eq!(current.version, 2);
        assert!(current.imported_at > 0);
        assert_eq!(catalog.snapshot_at_version(1).unwrap().unwrap().version, 1);
        assert_eq!(catalog.list_versions().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_register_existing_table() {
        let db = test_db();
        let catalog = MappingCatalog::open(&db).unwrap();

        let version = catalog.register_existing_table(legacy_table()).unwrap();
        assert_eq!(version, 1);
        let snapshot = catalog.current_snapshot().unwrap();
        let table = snapshot.existing_table("LEGACY_PARTS").unwrap();
        assert_eq!(table.columns.len(), 2);
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let config = sled::Config::new().path(dir.path());

        {
            let db = config.clone().open().unwrap();
            let catalog = MappingCatalog::open(&db).unwrap();
            catalog.register_existing_table(legacy_table()).unwrap();
            catalog.flush().unwrap();
        }

        {
            let db = config.open().unwrap();
            let catalog = MappingCatalog::open(&db).unwrap();
            assert_eq!(catalog.current_version(), 1);
            let snapshot = catalog.current_snapshot().unwrap();
            assert!(snapshot.existing_table("legacy_parts").is_some());
        }
    }
}
