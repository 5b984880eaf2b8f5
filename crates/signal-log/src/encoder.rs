//! Per-signal encoder state
//!
//! Each signal gets one [`SignalEncoder`] when it is first written. The
//! encoder owns the table handles of its variant and turns values into
//! rows; timestamp validation and flushing stay with the writer.

use tracing::{error, trace};

use crate::config::Compression;
use crate::dtype::Array;
use crate::error::{LogError, Result};
use crate::schema::RowSchema;
use crate::store::{BlobHandle, Row, TableHandle, TableStore};
use crate::variant::{TableTag, Variant};

/// Record field that marks a one-dimensional array as a batch of rows
///
/// If the element type declares a field with this name, the array is
/// appended as one row per element, each at its embedded timestamp.
pub const BATCH_TIMESTAMP_FIELD: &str = "timestamp";

/// Suffix of the data half of a vlstring pair
pub const DATA_TABLE_SUFFIX: &str = "_data";

/// Whether `value` is a batch of self-timestamped elements
pub fn is_batch(value: &Array) -> bool {
    value.ndim() == 1 && !value.is_empty() && value.dtype().has_field(BATCH_TIMESTAMP_FIELD)
}

/// Name of the data table paired with vlstring signal `signal`
pub fn data_table_name(signal: &str) -> String {
    format!("{signal}{DATA_TABLE_SUFFIX}")
}

/// NUL-pad `text` to `width` bytes
pub(crate) fn pad_text(signal: &str, text: &str, width: usize) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    if bytes.len() > width {
        return Err(LogError::invalid(
            signal,
            format!("text of {} bytes exceeds the fixed width of {width}", bytes.len()),
        ));
    }
    if bytes.contains(&0) {
        return Err(LogError::invalid(signal, "text contains a NUL byte"));
    }
    let mut padded = Vec::with_capacity(width);
    padded.extend_from_slice(bytes);
    padded.resize(width, 0);
    Ok(padded)
}

/// Strip the NUL padding of a fixed-width text value
pub(crate) fn unpad_text(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

/// Writer-side state of one signal
#[derive(Debug)]
pub(crate) enum SignalEncoder {
    Regular {
        table: TableHandle,
        schema: RowSchema,
    },
    FixedString {
        table: TableHandle,
        width: usize,
    },
    VarBytes {
        index: TableHandle,
        data: BlobHandle,
        compressed: bool,
        /// Set when a two-part append failed halfway
        poisoned: bool,
    },
}

impl SignalEncoder {
    pub fn create_regular(
        store: &mut TableStore,
        signal: &str,
        schema: RowSchema,
        compression: Compression,
    ) -> Result<Self> {
        let table = store.create_table(signal, schema.clone(), TableTag::Regular, compression)?;
        Ok(Self::Regular { table, schema })
    }

    pub fn create_fixed_string(
        store: &mut TableStore,
        signal: &str,
        width: usize,
        compression: Compression,
    ) -> Result<Self> {
        if width == 0 {
            return Err(LogError::invalid(signal, "fixed string width must be positive"));
        }
        let table = store.create_table(
            signal,
            RowSchema::fixed_text(width),
            TableTag::String,
            compression,
        )?;
        Ok(Self::FixedString { table, width })
    }

    pub fn create_var_bytes(
        store: &mut TableStore,
        signal: &str,
        variant: Variant,
        compression: Compression,
        blob_compression: Compression,
    ) -> Result<Self> {
        let data_tag = variant
            .data_tag()
            .ok_or_else(|| LogError::store(format!("{variant} signals have no data table")))?;
        let data_name = data_table_name(signal);
        // Both halves must be creatable before either is created
        for name in [signal, data_name.as_str()] {
            if store.attrs(name).is_some() {
                return Err(LogError::TableExists(name.to_string()));
            }
        }

        let index = store.create_table(
            signal,
            RowSchema::blob_index(),
            TableTag::VlString,
            compression,
        )?;
        let data = store.create_blob_store(&data_name, data_tag, blob_compression)?;
        store.set_companion(&index, &data)?;
        Ok(Self::VarBytes {
            index,
            data,
            compressed: variant == Variant::VlStringCompressed,
            poisoned: false,
        })
    }

    pub fn variant(&self) -> Variant {
        match self {
            Self::Regular { .. } => Variant::Regular,
            Self::FixedString { .. } => Variant::String,
            Self::VarBytes {
                compressed: false, ..
            } => Variant::VlString,
            Self::VarBytes {
                compressed: true, ..
            } => Variant::VlStringCompressed,
        }
    }

    /// Append one array row
    pub fn append_array(
        &self,
        store: &mut TableStore,
        signal: &str,
        time: f64,
        value: &Array,
    ) -> Result<u64> {
        let Self::Regular { table, schema } = self else {
            return Err(self.mismatch(signal, Variant::Regular));
        };
        if !schema.accepts(value.dtype(), value.shape()) {
            return Err(LogError::TypeMismatch {
                signal: signal.to_string(),
                expected: schema.describe_value(),
                actual: format!("{} with shape {:?}", value.dtype(), value.shape()),
            });
        }
        store.append_row(table, time, value.as_bytes())
    }

    /// Append one fixed-width text row, then verify it reads back intact
    pub fn append_text(
        &self,
        store: &mut TableStore,
        signal: &str,
        time: f64,
        text: &str,
    ) -> Result<u64> {
        let Self::FixedString { table, width } = self else {
            return Err(self.mismatch(signal, Variant::String));
        };
        let padded = pad_text(signal, text, *width)?;
        let index = store.append_row(table, time, &padded)?;
        store.flush()?;

        let stored = store.get_row(table, index)?;
        verify_read_back(signal, index, time, &padded, stored)?;
        trace!(signal, index, "Verified fixed string row");
        Ok(index)
    }

    /// Append one index row and its blob
    pub fn append_bytes(
        &mut self,
        store: &mut TableStore,
        signal: &str,
        time: f64,
        bytes: &[u8],
    ) -> Result<u64> {
        let variant = self.variant();
        let Self::VarBytes {
            index,
            data,
            poisoned,
            ..
        } = self
        else {
            return Err(variant_mismatch(signal, variant, Variant::VlString));
        };
        let rows = store.row_count(index)?;
        if *poisoned {
            return Err(LogError::Commit {
                signal: signal.to_string(),
                index: rows,
                reason: "an earlier append left the index and data tables inconsistent".into(),
            });
        }
        let blobs = store.blob_count(data)?;
        if rows != blobs {
            *poisoned = true;
            return Err(LogError::Commit {
                signal: signal.to_string(),
                index: rows,
                reason: format!("index has {rows} rows but data has {blobs} blobs"),
            });
        }

        let size = bytes.len() as u64;
        let appended = store
            .append_row(index, time, &size.to_le_bytes())
            .and_then(|row| store.append_blob(data, bytes).map(|blob| (row, blob)));
        match appended {
            Ok((row, blob)) if row == blob => {
                trace!(signal, %variant, row, size, "Appended blob row");
                Ok(row)
            }
            Ok((row, blob)) => {
                *poisoned = true;
                Err(LogError::Commit {
                    signal: signal.to_string(),
                    index: row,
                    reason: format!("index row {row} paired with blob {blob}"),
                })
            }
            Err(e) => {
                *poisoned = true;
                error!(signal, error = %e, "Two-part append failed; signal is no longer writable");
                Err(e)
            }
        }
    }

    fn mismatch(&self, signal: &str, requested: Variant) -> LogError {
        variant_mismatch(signal, self.variant(), requested)
    }
}

/// Compare a row read back after a commit with what was written
fn verify_read_back(
    signal: &str,
    index: u64,
    time: f64,
    written: &[u8],
    stored: Option<Row>,
) -> Result<()> {
    let commit_error = |reason: String| LogError::Commit {
        signal: signal.to_string(),
        index,
        reason,
    };
    let row = stored.ok_or_else(|| commit_error("row missing after append".into()))?;
    if row.time.to_bits() != time.to_bits() {
        return Err(commit_error(format!(
            "stored timestamp {} differs from written {time}",
            row.time
        )));
    }
    if row.payload != written {
        return Err(commit_error(format!(
            "stored value {:?} differs from written {:?}",
            String::from_utf8_lossy(unpad_text(&row.payload)),
            String::from_utf8_lossy(unpad_text(written))
        )));
    }
    Ok(())
}

/// Error for a write whose variant differs from the signal's
pub(crate) fn variant_mismatch(signal: &str, established: Variant, requested: Variant) -> LogError {
    LogError::TypeMismatch {
        signal: signal.to_string(),
        expected: format!("{established} signal"),
        actual: format!("{requested} write"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::{DType, Field, ScalarKind};
    use tempfile::TempDir;

    fn create_test_store() -> (TableStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = TableStore::create(temp_dir.path().join("enc.redb")).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_pad_and_unpad_text() {
        let padded = pad_text("s", "abc", 6).unwrap();
        assert_eq!(padded, b"abc\0\0\0");
        assert_eq!(unpad_text(&padded), b"abc");
        assert_eq!(unpad_text(&[0, 0]), b"");
    }

    #[test]
    fn test_pad_text_rejects_long_and_nul() {
        assert!(matches!(
            pad_text("s", "abcdefg", 6),
            Err(LogError::InvalidValue { .. })
        ));
        assert!(matches!(
            pad_text("s", "a\0b", 6),
            Err(LogError::InvalidValue { .. })
        ));
        // Exactly the width is fine
        assert!(pad_text("s", "abcdef", 6).is_ok());
    }

    #[test]
    fn test_is_batch() {
        let dtype = DType::record(vec![
            Field::new("timestamp", ScalarKind::F64),
            Field::new("x", ScalarKind::F32),
        ])
        .unwrap();
        let batch = Array::new(dtype.clone(), vec![2], vec![0; 24]).unwrap();
        assert!(is_batch(&batch));

        let single = Array::new(dtype, vec![], vec![0; 12]).unwrap();
        assert!(!is_batch(&single));
        assert!(!is_batch(&Array::from_vec(vec![1.0f64, 2.0])));
    }

    #[test]
    fn test_regular_rejects_other_shape() {
        let (mut store, _temp) = create_test_store();
        let sample = Array::from_vec(vec![1.0f32, 2.0]);
        let encoder = SignalEncoder::create_regular(
            &mut store,
            "xy",
            RowSchema::derive(&sample).unwrap(),
            Compression::none(),
        )
        .unwrap();

        assert_eq!(encoder.append_array(&mut store, "xy", 0.0, &sample).unwrap(), 0);
        let err = encoder
            .append_array(&mut store, "xy", 1.0, &Array::from_vec(vec![1.0f32]))
            .unwrap_err();
        assert!(matches!(err, LogError::TypeMismatch { .. }));
    }

    #[test]
    fn test_fixed_string_verified_append() {
        let (mut store, _temp) = create_test_store();
        let encoder =
            SignalEncoder::create_fixed_string(&mut store, "mode", 16, Compression::zlib(9))
                .unwrap();
        assert_eq!(encoder.variant(), Variant::String);
        assert_eq!(encoder.append_text(&mut store, "mode", 1.0, "cruise").unwrap(), 0);
        assert_eq!(encoder.append_text(&mut store, "mode", 2.0, "").unwrap(), 1);
    }

    #[test]
    fn test_var_bytes_pair_stays_aligned() {
        let (mut store, _temp) = create_test_store();
        let mut encoder = SignalEncoder::create_var_bytes(
            &mut store,
            "frames",
            Variant::VlString,
            Compression::none(),
            Compression::zlib(1),
        )
        .unwrap();

        for (i, payload) in [&b"first"[..], b"", b"third frame"].into_iter().enumerate() {
            let row = encoder
                .append_bytes(&mut store, "frames", i as f64, payload)
                .unwrap();
            assert_eq!(row, i as u64);
        }
        assert_eq!(store.attrs("frames_data").unwrap().tag, TableTag::VlStringData);
    }

    #[test]
    fn test_var_bytes_name_collision_creates_nothing() {
        let (mut store, _temp) = create_test_store();
        let sample = Array::scalar(1u8);
        SignalEncoder::create_regular(
            &mut store,
            "x_data",
            RowSchema::derive(&sample).unwrap(),
            Compression::none(),
        )
        .unwrap();

        let err = SignalEncoder::create_var_bytes(
            &mut store,
            "x",
            Variant::VlStringCompressed,
            Compression::none(),
            Compression::none(),
        )
        .unwrap_err();
        assert!(matches!(err, LogError::TableExists(name) if name == "x_data"));
        assert!(store.attrs("x").is_none());
    }

    #[test]
    fn test_unbalanced_pair_poisons_signal() {
        let (mut store, _temp) = create_test_store();
        let mut encoder = SignalEncoder::create_var_bytes(
            &mut store,
            "frames",
            Variant::VlString,
            Compression::none(),
            Compression::none(),
        )
        .unwrap();
        encoder.append_bytes(&mut store, "frames", 0.0, b"ok").unwrap();

        // An index row without its blob
        let SignalEncoder::VarBytes { index, .. } = &encoder else {
            panic!("expected a vlstring encoder");
        };
        let index = index.clone();
        store.append_row(&index, 1.0, &3u64.to_le_bytes()).unwrap();

        let err = encoder
            .append_bytes(&mut store, "frames", 2.0, b"next")
            .unwrap_err();
        match err {
            LogError::Commit { index, reason, .. } => {
                assert_eq!(index, 2);
                assert!(reason.contains("2 rows but data has 1 blobs"));
            }
            other => panic!("unexpected error: {other}"),
        }

        // Stays refused, and nothing more is appended
        for t in [3.0, 4.0] {
            let err = encoder.append_bytes(&mut store, "frames", t, b"more").unwrap_err();
            assert!(matches!(err, LogError::Commit { .. }));
        }
        assert_eq!(store.row_count(&index).unwrap(), 2);
    }

    #[test]
    fn test_read_back_mismatch_is_commit_error() {
        let (mut store, _temp) = create_test_store();
        let table = store
            .create_table("mode", RowSchema::fixed_text(8), TableTag::String, Compression::none())
            .unwrap();
        let written = pad_text("mode", "cruise", 8).unwrap();
        // What the store holds differs from what the encoder wrote
        let altered = pad_text("mode", "crash", 8).unwrap();
        store.append_row(&table, 1.0, &altered).unwrap();
        let stored = store.get_row(&table, 0).unwrap();

        let err = verify_read_back("mode", 0, 1.0, &written, stored.clone()).unwrap_err();
        match err {
            LogError::Commit { signal, index, reason } => {
                assert_eq!((signal.as_str(), index), ("mode", 0));
                assert!(reason.contains("crash"));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(matches!(
            verify_read_back("mode", 0, 2.0, &altered, stored.clone()),
            Err(LogError::Commit { .. })
        ));
        assert!(matches!(
            verify_read_back("mode", 1, 1.0, &altered, store.get_row(&table, 1).unwrap()),
            Err(LogError::Commit { .. })
        ));
        assert!(verify_read_back("mode", 0, 1.0, &altered, stored).is_ok());
    }

    #[test]
    fn test_variant_mismatch() {
        let (mut store, _temp) = create_test_store();
        let encoder =
            SignalEncoder::create_fixed_string(&mut store, "s", 8, Compression::none()).unwrap();
        let err = encoder
            .append_array(&mut store, "s", 0.0, &Array::scalar(1i32))
            .unwrap_err();
        assert!(matches!(err, LogError::TypeMismatch { .. }));
    }
}
