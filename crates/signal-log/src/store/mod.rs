//! Table store over a redb database file
//!
//! All signal tables live under a fixed log root. The root itself is a redb
//! table mapping each table name to its attributes (variant tag, layout,
//! compression, companion table); every named table is a redb table keyed
//! by row position.
//!
//! ## Storage Format
//!
//! Row tables hold `[8 bytes: time f64 LE][payload]`, the payload
//! zlib-compressed when the table's compression is enabled. Blob stores
//! hold the (optionally compressed) blob bytes.

mod reader;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use redb::{
    Database, Durability, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, trace};

use crate::codec::{deflate, inflate};
use crate::config::Compression;
use crate::error::{LogError, Result};
use crate::schema::{RowSchema, TIME_SIZE};
use crate::variant::TableTag;

pub use reader::{BlobTable, RowTable, Snapshot, StoreReader};

/// Name of the log root
pub const LOG_ROOT: &str = "signal_log";

// Key: table name, Value: postcard-encoded TableAttrs
pub(crate) const ROOT_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new(LOG_ROOT);

/// Name of the redb table backing a log table
pub(crate) fn table_name(name: &str) -> String {
    format!("{LOG_ROOT}/{name}")
}

// Key: row position, Value: encoded row or blob
fn rows_definition(full_name: &str) -> TableDefinition<'_, u64, &'static [u8]> {
    TableDefinition::new(full_name)
}

/// How a table stores its entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableLayout {
    /// Time-stamped rows with a schema
    Rows(RowSchema),
    /// Raw blobs addressed by position
    Blobs,
}

/// Attributes stored for every table under the log root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableAttrs {
    pub tag: TableTag,
    pub layout: TableLayout,
    pub compression: Compression,
    /// Data half of a vlstring index table
    pub companion: Option<String>,
}

impl TableAttrs {
    pub fn schema(&self) -> Option<&RowSchema> {
        match &self.layout {
            TableLayout::Rows(schema) => Some(schema),
            TableLayout::Blobs => None,
        }
    }
}

/// A row read back from a table
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub time: f64,
    pub payload: Vec<u8>,
}

pub(crate) fn encode_row(time: f64, payload: &[u8], compression: Compression) -> Result<Vec<u8>> {
    let mut row = Vec::with_capacity(TIME_SIZE + payload.len());
    row.extend_from_slice(&time.to_le_bytes());
    if compression.enabled {
        row.extend_from_slice(&deflate(payload, compression.level)?);
    } else {
        row.extend_from_slice(payload);
    }
    Ok(row)
}

pub(crate) fn read_time(bytes: &[u8]) -> Option<f64> {
    let time: [u8; TIME_SIZE] = bytes.get(..TIME_SIZE)?.try_into().ok()?;
    Some(f64::from_le_bytes(time))
}

pub(crate) fn decode_row(bytes: &[u8], compression: Compression) -> Result<Row> {
    let time = read_time(bytes)
        .ok_or_else(|| LogError::store(format!("row of {} bytes has no time column", bytes.len())))?;
    let payload = &bytes[TIME_SIZE..];
    let payload = if compression.enabled {
        inflate(payload)?
    } else {
        payload.to_vec()
    };
    Ok(Row { time, payload })
}

pub(crate) fn encode_blob(bytes: &[u8], compression: Compression) -> Result<Vec<u8>> {
    if compression.enabled {
        deflate(bytes, compression.level)
    } else {
        Ok(bytes.to_vec())
    }
}

pub(crate) fn decode_blob(bytes: &[u8], compression: Compression) -> Result<Vec<u8>> {
    if compression.enabled {
        inflate(bytes)
    } else {
        Ok(bytes.to_vec())
    }
}

/// Handle to a row table created by a [`TableStore`]
#[derive(Debug, Clone)]
pub struct TableHandle {
    name: String,
    full_name: String,
    compression: Compression,
}

/// Handle to a blob store created by a [`TableStore`]
#[derive(Debug, Clone)]
pub struct BlobHandle {
    name: String,
    full_name: String,
    compression: Compression,
}

impl TableHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl BlobHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Writable table store
///
/// Appends go into one write transaction until [`flush`](Self::flush)
/// commits it; reads through the store see uncommitted rows. After a failed
/// commit the rows of that transaction are gone and every later call fails.
pub struct TableStore {
    txn: Option<WriteTransaction>,
    db: Database,
    path: PathBuf,
    attrs: BTreeMap<String, TableAttrs>,
    failed: Option<String>,
}

impl TableStore {
    /// Create a new store file with an empty log root
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path)?;
        let txn = db.begin_write()?;
        txn.open_table(ROOT_TABLE)?;

        info!("Created table store");
        Ok(Self {
            txn: Some(txn),
            db,
            path,
            attrs: BTreeMap::new(),
            failed: None,
        })
    }

    fn check_usable(&self) -> Result<()> {
        match &self.failed {
            Some(reason) => Err(LogError::store(format!(
                "{} is unusable after a failed commit: {reason}",
                self.path.display()
            ))),
            None => Ok(()),
        }
    }

    fn txn(&self) -> Result<&WriteTransaction> {
        self.check_usable()?;
        self.txn
            .as_ref()
            .ok_or_else(|| LogError::store("no open write transaction"))
    }

    /// Refuse all further use of the store
    pub(crate) fn mark_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(path = %self.path.display(), %reason, "Table store commit failed");
        self.txn = None;
        self.failed = Some(reason);
    }

    pub fn is_failed(&self) -> bool {
        self.failed.is_some()
    }

    /// Create a row table under the log root
    pub fn create_table(
        &mut self,
        name: &str,
        schema: RowSchema,
        tag: TableTag,
        compression: Compression,
    ) -> Result<TableHandle> {
        let attrs = TableAttrs {
            tag,
            layout: TableLayout::Rows(schema),
            compression,
            companion: None,
        };
        let full_name = self.register(name, attrs)?;
        Ok(TableHandle {
            name: name.to_string(),
            full_name,
            compression,
        })
    }

    /// Create a blob store under the log root
    pub fn create_blob_store(
        &mut self,
        name: &str,
        tag: TableTag,
        compression: Compression,
    ) -> Result<BlobHandle> {
        let attrs = TableAttrs {
            tag,
            layout: TableLayout::Blobs,
            compression,
            companion: None,
        };
        let full_name = self.register(name, attrs)?;
        Ok(BlobHandle {
            name: name.to_string(),
            full_name,
            compression,
        })
    }

    fn register(&mut self, name: &str, attrs: TableAttrs) -> Result<String> {
        if self.attrs.contains_key(name) {
            return Err(LogError::TableExists(name.to_string()));
        }
        let full_name = table_name(name);
        self.txn()?.open_table(rows_definition(&full_name))?;
        self.write_attrs(name, &attrs)?;

        debug!(table = name, tag = %attrs.tag, "Created table");
        self.attrs.insert(name.to_string(), attrs);
        Ok(full_name)
    }

    fn write_attrs(&self, name: &str, attrs: &TableAttrs) -> Result<()> {
        let encoded = postcard::to_allocvec(attrs)?;
        let mut root = self.txn()?.open_table(ROOT_TABLE)?;
        root.insert(name, encoded.as_slice())?;
        Ok(())
    }

    /// Record `blobs` as the data half of `table`
    pub fn set_companion(&mut self, table: &TableHandle, blobs: &BlobHandle) -> Result<()> {
        let mut attrs = self
            .attrs
            .get(table.name())
            .cloned()
            .ok_or_else(|| LogError::UnknownSignal(table.name().to_string()))?;
        attrs.companion = Some(blobs.name().to_string());
        self.write_attrs(table.name(), &attrs)?;
        self.attrs.insert(table.name().to_string(), attrs);
        Ok(())
    }

    /// Attributes of a table created through this store
    pub fn attrs(&self, name: &str) -> Option<&TableAttrs> {
        self.attrs.get(name)
    }

    /// Append one row, returning its position
    pub fn append_row(&mut self, table: &TableHandle, time: f64, payload: &[u8]) -> Result<u64> {
        let encoded = encode_row(time, payload, table.compression)?;
        let mut rows = self.txn()?.open_table(rows_definition(&table.full_name))?;
        let index = rows.len()?;
        rows.insert(index, encoded.as_slice())?;
        trace!(table = %table.name, index, time, "Appended row");
        Ok(index)
    }

    /// Append one blob, returning its position
    pub fn append_blob(&mut self, blobs: &BlobHandle, bytes: &[u8]) -> Result<u64> {
        let encoded = encode_blob(bytes, blobs.compression)?;
        let mut table = self.txn()?.open_table(rows_definition(&blobs.full_name))?;
        let index = table.len()?;
        table.insert(index, encoded.as_slice())?;
        trace!(table = %blobs.name, index, size = bytes.len(), "Appended blob");
        Ok(index)
    }

    /// Read a row back, including rows not yet flushed
    pub fn get_row(&self, table: &TableHandle, index: u64) -> Result<Option<Row>> {
        let rows = self.txn()?.open_table(rows_definition(&table.full_name))?;
        let Some(guard) = rows.get(index)? else {
            return Ok(None);
        };
        let row = decode_row(guard.value(), table.compression)?;
        Ok(Some(row))
    }

    /// Read a blob back, including blobs not yet flushed
    pub fn get_blob(&self, blobs: &BlobHandle, index: u64) -> Result<Option<Vec<u8>>> {
        let table = self.txn()?.open_table(rows_definition(&blobs.full_name))?;
        let Some(guard) = table.get(index)? else {
            return Ok(None);
        };
        let blob = decode_blob(guard.value(), blobs.compression)?;
        Ok(Some(blob))
    }

    pub fn row_count(&self, table: &TableHandle) -> Result<u64> {
        let rows = self.txn()?.open_table(rows_definition(&table.full_name))?;
        Ok(rows.len()?)
    }

    pub fn blob_count(&self, blobs: &BlobHandle) -> Result<u64> {
        let table = self.txn()?.open_table(rows_definition(&blobs.full_name))?;
        Ok(table.len()?)
    }

    /// Commit pending appends without forcing them to disk
    pub fn flush(&mut self) -> Result<()> {
        self.check_usable()?;
        if let Some(mut txn) = self.txn.take() {
            txn.set_durability(Durability::None);
            if let Err(e) = txn.commit() {
                let err = LogError::from(e);
                self.mark_failed(err.to_string());
                return Err(err);
            }
        }
        match self.db.begin_write() {
            Ok(txn) => self.txn = Some(txn),
            Err(e) => {
                let err = LogError::from(e);
                self.mark_failed(err.to_string());
                return Err(err);
            }
        }
        debug!(path = %self.path.display(), "Flushed table store");
        Ok(())
    }

    /// Durably commit everything and close the file
    pub fn close(self) -> Result<()> {
        self.check_usable()?;
        let TableStore {
            txn, db, path, attrs, ..
        } = self;
        if let Some(txn) = txn {
            txn.commit()?;
        }
        drop(db);
        info!(path = %path.display(), tables = attrs.len(), "Closed table store");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
