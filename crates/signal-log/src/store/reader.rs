//! Read-only access to a finished log file
//!
//! redb locks a database file for the lifetime of its handle, so readers of
//! the same file share one handle through a process-wide cache. Each range
//! read takes its own snapshot; snapshots outlive the reader that created
//! them.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Weak};

use dashmap::DashMap;
use redb::{
    Database, DatabaseError, ReadOnlyTable, ReadTransaction, ReadableTable, ReadableTableMetadata,
};
use tracing::{debug, instrument};

use super::{
    Row, TableAttrs, LOG_ROOT, ROOT_TABLE, decode_blob, decode_row, read_time, rows_definition,
    table_name,
};
use crate::config::Compression;
use crate::error::{LogError, Result};

// Key: canonical file path
static OPEN_FILES: LazyLock<DashMap<PathBuf, CachedHandle>> = LazyLock::new(DashMap::new);

/// Identity of the file a path pointed to when it was opened
///
/// A log renamed over a path is a new file; a cached handle on the old one
/// must not be served for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileId(u64, u64);

impl FileId {
    #[cfg(unix)]
    fn of(path: &Path) -> Result<Self> {
        use std::os::unix::fs::MetadataExt;
        let meta = std::fs::metadata(path)?;
        Ok(Self(meta.dev(), meta.ino()))
    }

    #[cfg(not(unix))]
    fn of(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)?;
        let created = meta
            .created()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos() as u64);
        Ok(Self(meta.len(), created))
    }
}

struct CachedHandle {
    db: Weak<Database>,
    file: FileId,
}

/// Lease on a cached database handle
///
/// The last lease closes the database while holding its cache entry, so a
/// concurrent open either reuses the live handle or finds the file unlocked.
struct SharedDatabase {
    db: Option<Arc<Database>>,
    key: PathBuf,
}

impl SharedDatabase {
    fn acquire(key: PathBuf) -> Result<Self> {
        let file = FileId::of(&key)?;
        let mut slot = OPEN_FILES.entry(key.clone()).or_insert_with(|| CachedHandle {
            db: Weak::new(),
            file,
        });
        if slot.file == file {
            if let Some(db) = slot.db.upgrade() {
                return Ok(Self { db: Some(db), key });
            }
        } else {
            debug!(path = %key.display(), "File replaced since it was cached");
        }

        let db = match Database::open(&key) {
            Ok(db) => Arc::new(db),
            Err(e) => {
                drop(slot);
                OPEN_FILES.remove_if(&key, |_, cached| cached.db.strong_count() == 0);
                return Err(match e {
                    DatabaseError::DatabaseAlreadyOpen => {
                        LogError::store(format!("{} is held open by a writer", key.display()))
                    }
                    other => LogError::NotALog {
                        path: key.clone(),
                        reason: other.to_string(),
                    },
                });
            }
        };
        // Leases on a replaced file keep their own Arc
        *slot = CachedHandle {
            db: Arc::downgrade(&db),
            file,
        };
        debug!(path = %key.display(), "Opened shared store handle");
        drop(slot);
        Ok(Self { db: Some(db), key })
    }

    fn database(&self) -> Result<&Database> {
        self.db
            .as_deref()
            .ok_or_else(|| LogError::store("store handle already released"))
    }
}

impl Clone for SharedDatabase {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            key: self.key.clone(),
        }
    }
}

impl Drop for SharedDatabase {
    fn drop(&mut self) {
        let Some(db) = self.db.take() else {
            return;
        };
        let slot = OPEN_FILES.get_mut(&self.key);
        let last = Arc::strong_count(&db) == 1;
        drop(db);
        drop(slot);
        if last {
            OPEN_FILES.remove_if(&self.key, |_, cached| cached.db.strong_count() == 0);
        }
    }
}

/// Shared read handle on a log file
#[derive(Clone)]
pub struct StoreReader {
    shared: SharedDatabase,
    path: PathBuf,
}

impl StoreReader {
    /// Open a log file, reusing a live handle on the same file
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = std::fs::canonicalize(path.as_ref())?;
        let reader = Self {
            shared: SharedDatabase::acquire(path.clone())?,
            path,
        };
        reader.check_root()?;
        Ok(reader)
    }

    fn check_root(&self) -> Result<()> {
        let txn = self.shared.database()?.begin_read()?;
        match txn.open_table(ROOT_TABLE) {
            Ok(_) => Ok(()),
            Err(e) => Err(LogError::NotALog {
                path: self.path.clone(),
                reason: format!("missing log root {LOG_ROOT:?}: {e}"),
            }),
        }
    }

    /// Every table under the log root with its attributes
    pub fn tables(&self) -> Result<Vec<(String, TableAttrs)>> {
        let txn = self.shared.database()?.begin_read()?;
        let root = txn.open_table(ROOT_TABLE)?;
        let mut tables = Vec::new();
        for entry in root.iter()? {
            let (name, attrs) = entry?;
            let attrs: TableAttrs = postcard::from_bytes(attrs.value())?;
            tables.push((name.value().to_string(), attrs));
        }
        Ok(tables)
    }

    /// Consistent view of the file for one read
    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            txn: self.shared.database()?.begin_read()?,
            _shared: self.shared.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for StoreReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreReader")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Read transaction that keeps its database handle alive
pub struct Snapshot {
    // Dropped before the lease
    txn: ReadTransaction,
    _shared: SharedDatabase,
}

impl Snapshot {
    /// Open a row table
    pub fn rows(&self, name: &str, attrs: &TableAttrs) -> Result<RowTable> {
        let table = self.txn.open_table(rows_definition(&table_name(name)))?;
        Ok(RowTable {
            name: name.to_string(),
            table,
            compression: attrs.compression,
        })
    }

    /// Open a blob store
    pub fn blobs(&self, name: &str, attrs: &TableAttrs) -> Result<BlobTable> {
        let table = self.txn.open_table(rows_definition(&table_name(name)))?;
        Ok(BlobTable {
            name: name.to_string(),
            table,
            compression: attrs.compression,
        })
    }
}

/// Row table opened from a [`Snapshot`]
pub struct RowTable {
    name: String,
    table: ReadOnlyTable<u64, &'static [u8]>,
    compression: Compression,
}

impl RowTable {
    pub fn len(&self) -> Result<u64> {
        Ok(self.table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get_row(&self, index: u64) -> Result<Option<Row>> {
        let Some(guard) = self.table.get(index)? else {
            return Ok(None);
        };
        let row = decode_row(guard.value(), self.compression)?;
        Ok(Some(row))
    }

    /// Time column of every row, in row order
    pub fn timestamps(&self) -> Result<Vec<f64>> {
        let mut times = Vec::with_capacity(usize::try_from(self.len()?).unwrap_or(0));
        for entry in self.table.iter()? {
            let (index, row) = entry?;
            let time = read_time(row.value()).ok_or_else(|| {
                LogError::corrupt(&self.name, index.value(), "row has no time column")
            })?;
            times.push(time);
        }
        Ok(times)
    }
}

/// Blob store opened from a [`Snapshot`]
pub struct BlobTable {
    name: String,
    table: ReadOnlyTable<u64, &'static [u8]>,
    compression: Compression,
}

impl BlobTable {
    pub fn len(&self) -> Result<u64> {
        Ok(self.table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get_blob(&self, index: u64) -> Result<Option<Vec<u8>>> {
        let Some(guard) = self.table.get(index)? else {
            return Ok(None);
        };
        let blob = decode_blob(guard.value(), self.compression)?;
        Ok(Some(blob))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
