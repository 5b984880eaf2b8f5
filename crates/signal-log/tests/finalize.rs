//! Atomic finalization and file-level checks

use std::fs;
use std::thread;

use signal_log::writer::temp_path_for;
use signal_log::{Array, LogError, LogReader, LogWriter, WriterConfig, is_signal_log};
use tempfile::TempDir;

/// Nothing appears at the final path until finish succeeds
#[test]
fn test_interrupted_writer_leaves_no_final_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("run.log");

    {
        let mut writer = LogWriter::create(&path).unwrap();
        writer.log_regular("x", 0.0, &Array::scalar(1.0f32)).unwrap();
        // Dropped without finish
    }

    assert!(!path.exists());
    assert!(temp_path_for(&path, ".active").exists());
}

/// After finish only the final path exists and it opens on its own
#[test]
fn test_finish_produces_openable_log() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("run.log");

    let mut writer = LogWriter::create(&path).unwrap();
    let temp_path = writer.temp_path().to_path_buf();
    writer.log_regular("x", 0.0, &Array::scalar(1.0f32)).unwrap();
    writer.log_variable_string("y", 0.0, b"payload").unwrap();
    writer.finish().unwrap();
    drop(writer);

    assert!(path.exists());
    assert!(!temp_path.exists());
    assert!(is_signal_log(&path));

    let reader = LogReader::open(&path).unwrap();
    assert_eq!(reader.list_signals(), vec!["x", "y"]);
}

#[test]
fn test_custom_temp_suffix() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("run.log");
    let config = WriterConfig::default().with_temp_suffix(".partial");

    let mut writer = LogWriter::with_config(&path, config).unwrap();
    assert_eq!(writer.temp_path(), temp_path_for(&path, ".partial"));
    writer.finish().unwrap();
    assert!(path.exists());
}

#[test]
fn test_overwrite_replaces_previous_log() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("run.log");

    for value in [1u8, 2u8] {
        let mut writer = LogWriter::create(&path).unwrap();
        writer.log_regular("v", 0.0, &Array::scalar(value)).unwrap();
        writer.finish().unwrap();
    }

    let reader = LogReader::open(&path).unwrap();
    let sample = reader
        .read_range("v", None, None)
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    assert_eq!(sample.value.as_array().unwrap().to_vec::<u8>(), Some(vec![2]));
}

/// A log finished over a path that a live reader still holds is what new
/// readers of that path see
#[test]
fn test_overwrite_while_old_reader_is_open() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("run.log");

    let mut writer = LogWriter::create(&path).unwrap();
    writer.log_regular("v", 0.0, &Array::scalar(1u8)).unwrap();
    writer.finish().unwrap();
    let old = LogReader::open(&path).unwrap();

    let mut writer = LogWriter::create(&path).unwrap();
    writer.log_regular("v", 0.0, &Array::scalar(2u8)).unwrap();
    writer.log_regular("w", 0.0, &Array::scalar(3u8)).unwrap();
    writer.finish().unwrap();

    let first_value = |reader: &LogReader| {
        reader
            .read_range("v", None, None)
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .value
            .as_array()
            .unwrap()
            .to_vec::<u8>()
    };

    let fresh = LogReader::open(&path).unwrap();
    assert_eq!(fresh.list_signals(), vec!["v", "w"]);
    assert_eq!(first_value(&fresh), Some(vec![2]));
    assert!(fresh.has_signal("w"));

    // The earlier reader keeps its own snapshot of the replaced file
    assert_eq!(old.list_signals(), vec!["v"]);
    assert_eq!(first_value(&old), Some(vec![1]));
}

#[test]
fn test_plain_file_is_not_a_log() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("notes.txt");
    fs::write(&path, "some notes").unwrap();

    assert!(!is_signal_log(&path));
    assert!(matches!(
        LogReader::open(&path),
        Err(LogError::NotALog { .. })
    ));
    assert!(!is_signal_log(temp_dir.path().join("missing.log")));
}

/// Independent readers on several threads see the same data
#[test]
fn test_concurrent_readers() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shared.log");

    let mut writer = LogWriter::create(&path).unwrap();
    for i in 0..200 {
        writer
            .log_regular("counter", i as f64, &Array::scalar(i as u64))
            .unwrap();
    }
    writer.finish().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let path = path.clone();
            thread::spawn(move || {
                let reader = LogReader::open(&path).unwrap();
                reader
                    .read_range("counter", Some(50.0), Some(149.0))
                    .unwrap()
                    .map(|s| s.unwrap().value.as_array().unwrap().to_vec::<u64>().unwrap()[0])
                    .sum::<u64>()
            })
        })
        .collect();

    let expected: u64 = (50..150).sum();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}
