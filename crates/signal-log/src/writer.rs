//! Writing signal logs
//!
//! A [`LogWriter`] writes to a temporary path next to the final one and
//! only renames it into place on [`finish`](LogWriter::finish), so an
//! interrupted run never leaves a file at the final path.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument, trace, warn};

use crate::codec::ValueCodec;
use crate::config::{DEFAULT_STRING_WIDTH, WriterConfig};
use crate::dtype::Array;
use crate::encoder::{BATCH_TIMESTAMP_FIELD, SignalEncoder, is_batch, pad_text, variant_mismatch};
use crate::error::{LogError, Result};
use crate::schema::RowSchema;
use crate::store::TableStore;
use crate::timestamp::TimestampValidator;
use crate::variant::Variant;

/// In-progress path for a log whose final path is `path`
pub fn temp_path_for(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Writes one signal log file
pub struct LogWriter {
    path: PathBuf,
    temp_path: PathBuf,
    config: WriterConfig,
    codec: ValueCodec,
    /// `None` once closed
    store: Option<TableStore>,
    finished: bool,
    /// Set when a commit or close failed; such a log is never published
    failed: Option<String>,
    encoders: BTreeMap<String, SignalEncoder>,
    validator: TimestampValidator,
    unflushed: usize,
}

impl LogWriter {
    /// Start a log that will end up at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(path, WriterConfig::default())
    }

    /// Start a log with explicit settings
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn with_config(path: impl AsRef<Path>, config: WriterConfig) -> Result<Self> {
        if config.temp_suffix.is_empty() {
            return Err(LogError::io("temporary path suffix must not be empty"));
        }
        let path = path.as_ref().to_path_buf();
        let temp_path = temp_path_for(&path, &config.temp_suffix);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        if temp_path.exists() {
            warn!(temp = %temp_path.display(), "Replacing stale temporary log");
            fs::remove_file(&temp_path)?;
        }

        let store = TableStore::create(&temp_path)?;
        info!(temp = %temp_path.display(), "Opened log writer");
        Ok(Self {
            path,
            temp_path,
            validator: TimestampValidator::new(config.allow_delta0),
            config,
            codec: ValueCodec::default(),
            store: Some(store),
            finished: false,
            failed: None,
            encoders: BTreeMap::new(),
            unflushed: 0,
        })
    }

    /// Use a custom structured-value codec
    pub fn with_codec(mut self, codec: ValueCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Final path of the log
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path written to until `finish()`
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Signals created so far, with their variants
    pub fn signals(&self) -> impl Iterator<Item = (&str, Variant)> {
        self.encoders
            .iter()
            .map(|(name, encoder)| (name.as_str(), encoder.variant()))
    }

    /// Last timestamp written for `signal`
    pub fn last_timestamp(&self, signal: &str) -> Option<f64> {
        self.validator.last(signal)
    }

    fn check_not_failed(&self) -> Result<()> {
        match &self.failed {
            Some(reason) => Err(LogError::store(format!(
                "log {} cannot be written after a failed commit: {reason}",
                self.path.display()
            ))),
            None => Ok(()),
        }
    }

    fn store_mut(&mut self) -> Result<&mut TableStore> {
        self.check_not_failed()?;
        match self.store.as_mut() {
            Some(store) => Ok(store),
            None => Err(LogError::Finished(self.path.clone())),
        }
    }

    fn check_time(&self, signal: &str, timestamp: f64) -> Result<()> {
        if timestamp.is_nan() {
            return Err(LogError::invalid(signal, "timestamp is NaN"));
        }
        self.validator.check(signal, timestamp)
    }

    fn check_variant(&self, signal: &str, requested: Variant) -> Result<bool> {
        match self.encoders.get(signal) {
            Some(encoder) if encoder.variant() != requested => {
                Err(variant_mismatch(signal, encoder.variant(), requested))
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    /// Count one appended row and commit every `flush_interval` rows
    fn row_written(&mut self, signal: &str, timestamp: f64) -> Result<()> {
        self.validator.record(signal, timestamp);
        self.unflushed += 1;
        if self.unflushed >= self.config.flush_interval {
            if let Err(e) = self.store_mut()?.flush() {
                self.failed = Some(e.to_string());
                return Err(e);
            }
            self.unflushed = 0;
        }
        Ok(())
    }

    /// Append an array value to a `regular` signal
    ///
    /// The first call fixes the signal's dtype and shape. A one-dimensional
    /// array whose element type has a `timestamp` field is a batch: each
    /// element becomes one row at its embedded timestamp, and `timestamp`
    /// is ignored.
    pub fn log_regular(&mut self, signal: &str, timestamp: f64, value: &Array) -> Result<()> {
        self.store_mut()?;
        let exists = self.check_variant(signal, Variant::Regular)?;

        let rows: Vec<(f64, Array)> = if is_batch(value) {
            let times = value.field_f64(BATCH_TIMESTAMP_FIELD).ok_or_else(|| {
                LogError::invalid(
                    signal,
                    format!("batch field {BATCH_TIMESTAMP_FIELD:?} is not a numeric scalar"),
                )
            })?;
            let mut rows = Vec::with_capacity(times.len());
            for (i, time) in times.into_iter().enumerate() {
                let element = value
                    .element(i)
                    .ok_or_else(|| LogError::Shape(format!("batch element {i} is missing")))?;
                rows.push((time, element));
            }
            trace!(signal, rows = rows.len(), "Expanding batch");
            rows
        } else {
            vec![(timestamp, value.clone())]
        };

        let Some((_, sample)) = rows.first() else {
            return Ok(());
        };
        let schema = RowSchema::derive(sample)?;
        let times: Vec<f64> = rows.iter().map(|(time, _)| *time).collect();
        if times.iter().any(|t| t.is_nan()) {
            return Err(LogError::invalid(signal, "timestamp is NaN"));
        }
        self.validator.check_all(signal, &times)?;

        if !exists {
            let compression = self.config.compression;
            let store = self.store_mut()?;
            let encoder = SignalEncoder::create_regular(store, signal, schema, compression)?;
            debug!(signal, dtype = %sample.dtype(), shape = ?sample.shape(), "Created regular signal");
            self.encoders.insert(signal.to_string(), encoder);
        }

        for (time, element) in &rows {
            let (Some(store), Some(encoder)) = (self.store.as_mut(), self.encoders.get(signal))
            else {
                return Err(LogError::Finished(self.path.clone()));
            };
            encoder.append_array(store, signal, *time, element)?;
            self.row_written(signal, *time)?;
        }
        Ok(())
    }

    /// Append text to a `string` signal of the default width
    pub fn log_fixed_string(&mut self, signal: &str, timestamp: f64, text: &str) -> Result<()> {
        self.log_fixed_string_with_width(signal, timestamp, text, DEFAULT_STRING_WIDTH)
    }

    /// Append text to a `string` signal
    ///
    /// `max_len` fixes the width when the signal is created; later calls
    /// are checked against the established width. Text longer than the
    /// width is rejected, never truncated.
    pub fn log_fixed_string_with_width(
        &mut self,
        signal: &str,
        timestamp: f64,
        text: &str,
        max_len: usize,
    ) -> Result<()> {
        self.store_mut()?;
        let exists = self.check_variant(signal, Variant::String)?;
        self.check_time(signal, timestamp)?;

        if !exists {
            // Validate before the table exists
            pad_text(signal, text, max_len)?;
            let compression = self.config.compression;
            let store = self.store_mut()?;
            let encoder = SignalEncoder::create_fixed_string(store, signal, max_len, compression)?;
            debug!(signal, width = max_len, "Created string signal");
            self.encoders.insert(signal.to_string(), encoder);
        }

        let (Some(store), Some(encoder)) = (self.store.as_mut(), self.encoders.get(signal)) else {
            return Err(LogError::Finished(self.path.clone()));
        };
        if let Err(e) = encoder.append_text(store, signal, timestamp, text) {
            if store.is_failed() {
                self.failed = Some(e.to_string());
            }
            return Err(e);
        }
        // append_text committed the row already
        self.validator.record(signal, timestamp);
        Ok(())
    }

    /// Append raw bytes to a `vlstring` signal
    pub fn log_variable_string(&mut self, signal: &str, timestamp: f64, bytes: &[u8]) -> Result<()> {
        self.log_blob(signal, timestamp, bytes, Variant::VlString)
    }

    /// Serialize, compress, and append a structured value
    ///
    /// Values the codec cannot round-trip faithfully are rejected with
    /// [`LogError::Serialization`].
    pub fn log_compressed_structured<T: Serialize + ?Sized>(
        &mut self,
        signal: &str,
        timestamp: f64,
        value: &T,
    ) -> Result<()> {
        self.store_mut()?;
        self.check_variant(signal, Variant::VlStringCompressed)?;
        let bytes = self.codec.encode(value)?;
        self.log_blob(signal, timestamp, &bytes, Variant::VlStringCompressed)
    }

    fn log_blob(&mut self, signal: &str, timestamp: f64, bytes: &[u8], variant: Variant) -> Result<()> {
        self.store_mut()?;
        let exists = self.check_variant(signal, variant)?;
        self.check_time(signal, timestamp)?;

        if !exists {
            let (compression, blob_compression) =
                (self.config.compression, self.config.blob_compression);
            let store = self.store_mut()?;
            let encoder = SignalEncoder::create_var_bytes(
                store,
                signal,
                variant,
                compression,
                blob_compression,
            )?;
            debug!(signal, %variant, "Created variable-length signal");
            self.encoders.insert(signal.to_string(), encoder);
        }

        let (Some(store), Some(encoder)) = (self.store.as_mut(), self.encoders.get_mut(signal))
        else {
            return Err(LogError::Finished(self.path.clone()));
        };
        encoder.append_bytes(store, signal, timestamp, bytes)?;
        self.row_written(signal, timestamp)
    }

    /// Commit everything and move the log to its final path
    ///
    /// Calling it again after success does nothing. If the rename fails the
    /// temporary file is left in place and a later call retries the rename.
    /// A log whose commit or close failed is never moved to the final path.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            debug!("Log already finished");
            return Ok(());
        }
        self.check_not_failed()?;
        if let Some(store) = self.store.take() {
            if let Err(e) = store.close() {
                self.failed = Some(e.to_string());
                return Err(e);
            }
        }

        if self.path.exists() {
            if !self.config.overwrite {
                return Err(LogError::io(format!(
                    "{} already exists; log kept at {}",
                    self.path.display(),
                    self.temp_path.display()
                )));
            }
            warn!("Replacing existing log");
        }
        fs::rename(&self.temp_path, &self.path)?;
        self.finished = true;

        info!(signals = self.encoders.len(), "Finished log");
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                temp = %self.temp_path.display(),
                "Log writer dropped before finish; nothing written to the final path"
            );
        }
    }
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("path", &self.path)
            .field("temp_path", &self.temp_path)
            .field("signals", &self.encoders.len())
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}
