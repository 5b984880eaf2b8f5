//! Range queries, merged reads and read-side leniency

use std::path::Path;

use signal_log::store::TableStore;
use signal_log::{
    Array, Compression, LogError, LogReader, LogWriter, ReaderConfig, RowSchema, Sample,
    TableTag, merge,
};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn write_ticks(path: &Path, signal: &str, times: &[f64]) {
    let mut writer = LogWriter::create(path).unwrap();
    for (i, t) in times.iter().enumerate() {
        writer.log_regular(signal, *t, &Array::scalar(i as u32)).unwrap();
    }
    writer.finish().unwrap();
}

fn times_of(samples: impl Iterator<Item = signal_log::Result<Sample>>) -> Vec<f64> {
    samples.map(|s| s.unwrap().timestamp).collect()
}

/// Write rows straight through the table store, bypassing validation
fn write_raw_rows(path: &Path, signal: &str, times: &[f64]) {
    let mut store = TableStore::create(path).unwrap();
    let schema = RowSchema::derive(&Array::scalar(0u32)).unwrap();
    let table = store
        .create_table(signal, schema, TableTag::Regular, Compression::zlib(9))
        .unwrap();
    for (i, t) in times.iter().enumerate() {
        store
            .append_row(&table, *t, &(i as u32).to_le_bytes())
            .unwrap();
    }
    store.close().unwrap();
}

// ============================================================================
// Range correctness
// ============================================================================

#[test]
fn test_range_bounds_are_inclusive() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ticks.log");
    write_ticks(&path, "t", &[0.0, 1.0, 2.0, 3.0, 4.0]);

    let reader = LogReader::open(&path).unwrap();
    let read = |start, stop| times_of(reader.read_range("t", start, stop).unwrap());

    assert_eq!(read(Some(1.0), Some(3.0)), vec![1.0, 2.0, 3.0]);
    assert_eq!(read(Some(0.5), Some(3.5)), vec![1.0, 2.0, 3.0]);
    assert_eq!(read(None, Some(1.0)), vec![0.0, 1.0]);
    assert_eq!(read(Some(3.0), None), vec![3.0, 4.0]);
    assert_eq!(read(None, None), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    assert_eq!(read(Some(2.0), Some(2.0)), vec![2.0]);
}

#[test]
fn test_range_outside_bounds_is_empty() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ticks.log");
    write_ticks(&path, "t", &[1.0, 2.0]);

    let reader = LogReader::open(&path).unwrap();
    assert_eq!(reader.read_range("t", Some(5.0), Some(6.0)).unwrap().count(), 0);
    assert_eq!(reader.read_range("t", Some(-2.0), Some(0.5)).unwrap().count(), 0);
    assert_eq!(reader.read_range("t", Some(2.0), Some(1.0)).unwrap().count(), 0);
}

#[test]
fn test_range_with_repeated_timestamps() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ticks.log");
    write_ticks(&path, "t", &[1.0, 2.0, 2.0, 2.0, 3.0]);

    let reader = LogReader::open(&path).unwrap();
    let times = times_of(reader.read_range("t", Some(2.0), Some(2.0)).unwrap());
    assert_eq!(times, vec![2.0, 2.0, 2.0]);

    // Equal timestamps are rejected when the reader disallows them
    let strict = LogReader::with_config(&path, ReaderConfig::default().with_allow_delta0(false))
        .unwrap();
    assert_eq!(times_of(strict.read_range("t", None, None).unwrap()), vec![1.0, 2.0, 3.0]);
}

#[test]
fn test_unknown_signal() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ticks.log");
    write_ticks(&path, "t", &[1.0]);

    let reader = LogReader::open(&path).unwrap();
    assert!(matches!(
        reader.read_range("missing", None, None),
        Err(LogError::UnknownSignal(_))
    ));
}

/// Dropping an iterator midway leaves the file readable
#[test]
fn test_abandoned_iterator() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ticks.log");
    write_ticks(&path, "t", &[0.0, 1.0, 2.0, 3.0]);

    let reader = LogReader::open(&path).unwrap();
    let mut range = reader.read_range("t", None, None).unwrap();
    assert_eq!(range.next().unwrap().unwrap().timestamp, 0.0);
    drop(range);

    assert_eq!(reader.read_range("t", None, None).unwrap().count(), 4);
}

/// Range iterators keep working after their reader is gone
#[test]
fn test_iterator_outlives_reader() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ticks.log");
    write_ticks(&path, "t", &[0.0, 1.0]);

    let range = {
        let reader = LogReader::open(&path).unwrap();
        reader.read_range("t", None, None).unwrap()
    };
    assert_eq!(times_of(range), vec![0.0, 1.0]);
}

// ============================================================================
// Merged reads
// ============================================================================

#[test]
fn test_merge_orders_across_signals() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("merged.log");

    let mut writer = LogWriter::create(&path).unwrap();
    writer.log_regular("a", 0.0, &Array::scalar(1i32)).unwrap();
    writer.log_fixed_string("b", 1.0, "z").unwrap();
    writer.log_regular("a", 2.0, &Array::scalar(2i32)).unwrap();
    writer.finish().unwrap();

    let reader = LogReader::open(&path).unwrap();
    let merged: Vec<(f64, String)> = reader
        .read_merged(&["a", "b"], None, None)
        .unwrap()
        .map(|s| {
            let s = s.unwrap();
            (s.timestamp, s.signal.to_string())
        })
        .collect();
    assert_eq!(
        merged,
        vec![(0.0, "a".into()), (1.0, "b".into()), (2.0, "a".into())]
    );
}

#[test]
fn test_merge_ties_follow_signal_order() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ties.log");

    let mut writer = LogWriter::create(&path).unwrap();
    for signal in ["x", "y", "z"] {
        writer.log_regular(signal, 5.0, &Array::scalar(0u8)).unwrap();
    }
    writer.finish().unwrap();

    let reader = LogReader::open(&path).unwrap();
    let order = |signals: &[&str]| -> Vec<String> {
        reader
            .read_merged(signals, None, None)
            .unwrap()
            .map(|s| s.unwrap().signal.to_string())
            .collect()
    };
    assert_eq!(order(&["z", "x", "y"]), vec!["z", "x", "y"]);
    assert_eq!(order(&["y", "z", "x"]), vec!["y", "z", "x"]);
}

#[test]
fn test_merge_of_ranges_from_two_logs() {
    let temp_dir = TempDir::new().unwrap();
    let first = temp_dir.path().join("first.log");
    let second = temp_dir.path().join("second.log");
    write_ticks(&first, "t", &[0.0, 2.0, 4.0]);
    write_ticks(&second, "t", &[1.0, 3.0]);

    let a = LogReader::open(&first).unwrap();
    let b = LogReader::open(&second).unwrap();
    let merged = merge([
        a.read_range("t", None, None).unwrap(),
        b.read_range("t", None, None).unwrap(),
    ]);
    assert_eq!(times_of(merged), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
}

// ============================================================================
// Read-side leniency
// ============================================================================

/// Out-of-order rows are skipped unless the reader is strict
#[test]
fn test_out_of_order_rows_skipped() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("legacy.log");
    write_raw_rows(&path, "t", &[0.0, 1.0, 0.5, 2.0]);

    let reader = LogReader::open(&path).unwrap();
    let times = times_of(reader.read_range("t", None, None).unwrap());
    assert_eq!(times, vec![0.0, 1.0, 2.0]);

    let strict = LogReader::with_config(&path, ReaderConfig::strict()).unwrap();
    let items: Vec<_> = strict.read_range("t", None, None).unwrap().collect();
    assert_eq!(items.len(), 4);
    assert!(matches!(
        items[2],
        Err(LogError::TimestampOrder { old, new, .. }) if old == 1.0 && new == 0.5
    ));
    assert!(items[3].is_ok());
}

/// Rows inside the located index range but outside the window
#[test]
fn test_out_of_window_rows_never_yielded() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("legacy.log");
    // Unsorted column, so the binary search may land on rows outside the window
    write_raw_rows(&path, "t", &[1.0, 2.0, 9.0, 3.0, 4.0, 0.5, 5.0]);

    let reader = LogReader::open(&path).unwrap();
    let times = times_of(reader.read_range("t", Some(1.0), Some(4.0)).unwrap());
    assert!(times.iter().all(|t| (1.0..=4.0).contains(t)));
    assert!(times.windows(2).all(|w| w[0] <= w[1]));

    let strict = LogReader::with_config(&path, ReaderConfig::strict()).unwrap();
    for item in strict.read_range("t", Some(1.0), Some(4.0)).unwrap() {
        match item {
            Ok(sample) => assert!((1.0..=4.0).contains(&sample.timestamp)),
            Err(e) => {
                assert!(e.is_row_level());
                assert!(matches!(
                    e,
                    LogError::OutOfWindow { .. } | LogError::TimestampOrder { .. }
                ));
            }
        }
    }
}

/// A blob whose length disagrees with its index row is a corrupt record
#[test]
fn test_blob_size_mismatch_is_corrupt() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("corrupt.log");

    let mut store = TableStore::create(&path).unwrap();
    let index = store
        .create_table("v", RowSchema::blob_index(), TableTag::VlString, Compression::none())
        .unwrap();
    let data = store
        .create_blob_store("v_data", TableTag::VlStringData, Compression::zlib(1))
        .unwrap();
    store.set_companion(&index, &data).unwrap();
    store.append_row(&index, 0.0, &5u64.to_le_bytes()).unwrap();
    store.append_blob(&data, b"abc").unwrap();
    store.append_row(&index, 1.0, &2u64.to_le_bytes()).unwrap();
    store.append_blob(&data, b"ok").unwrap();
    store.close().unwrap();

    let reader = LogReader::open(&path).unwrap();
    let items: Vec<_> = reader.read_range("v", None, None).unwrap().collect();
    assert_eq!(items.len(), 2);
    assert!(matches!(
        &items[0],
        Err(LogError::CorruptRecord { index: 0, .. })
    ));
    let second = items[1].as_ref().unwrap();
    assert_eq!(second.value.as_bytes().map(|b| b.as_ref()), Some(&b"ok"[..]));
}

#[test]
fn test_undecodable_structured_value_is_corrupt() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("corrupt.log");

    let mut store = TableStore::create(&path).unwrap();
    let index = store
        .create_table("s", RowSchema::blob_index(), TableTag::VlString, Compression::none())
        .unwrap();
    let data = store
        .create_blob_store("s_data", TableTag::VlStringDataCompressed, Compression::none())
        .unwrap();
    store.set_companion(&index, &data).unwrap();
    let garbage = b"not a zlib stream";
    store
        .append_row(&index, 0.0, &(garbage.len() as u64).to_le_bytes())
        .unwrap();
    store.append_blob(&data, garbage).unwrap();
    store.close().unwrap();

    let reader = LogReader::open(&path).unwrap();
    let mut range = reader.read_range("s", None, None).unwrap();
    assert!(matches!(
        range.next(),
        Some(Err(LogError::CorruptRecord { .. }))
    ));
    assert!(range.next().is_none());
}
