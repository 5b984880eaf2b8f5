//! Reading finished signal logs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use crate::codec::ValueCodec;
use crate::config::ReaderConfig;
use crate::error::{LogError, Result};
use crate::merge::{Merge, merge};
use crate::range::{RangeIter, Sample, Window};
use crate::store::{StoreReader, TableAttrs};
use crate::variant::{SignalType, TableTag, Variant};

/// Cheap check whether `path` holds a finished signal log
pub fn is_signal_log(path: impl AsRef<Path>) -> bool {
    StoreReader::open(path).is_ok()
}

/// What the reader knows about one signal
#[derive(Debug, Clone)]
pub(crate) struct SignalEntry {
    pub variant: Variant,
    pub attrs: TableAttrs,
    /// Data half of a vlstring pair
    pub data: Option<(String, TableAttrs)>,
}

/// Read-only view of a finished log
///
/// Timestamp columns are loaded on first use and cached for the lifetime
/// of the reader. Range iterators own their read snapshot and may outlive
/// the reader.
pub struct LogReader {
    path: PathBuf,
    store: StoreReader,
    config: ReaderConfig,
    codec: ValueCodec,
    signals: BTreeMap<String, SignalEntry>,
    timestamps: DashMap<String, Arc<[f64]>>,
}

impl LogReader {
    /// Open a finished log with the default configuration
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(path, ReaderConfig::default())
    }

    /// Open a finished log
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn with_config(path: impl AsRef<Path>, config: ReaderConfig) -> Result<Self> {
        let store = StoreReader::open(path.as_ref())?;
        let tables: BTreeMap<String, TableAttrs> = store.tables()?.into_iter().collect();

        let mut signals = BTreeMap::new();
        for (name, attrs) in &tables {
            let variant = match attrs.tag {
                TableTag::Regular => Variant::Regular,
                TableTag::String => Variant::String,
                TableTag::VlString => {
                    let data = attrs
                        .companion
                        .as_ref()
                        .and_then(|companion| tables.get_key_value(companion));
                    let Some((data_name, data_attrs)) = data else {
                        warn!(signal = %name, "Skipping vlstring signal without a data table");
                        continue;
                    };
                    let variant = match data_attrs.tag {
                        TableTag::VlStringDataCompressed => Variant::VlStringCompressed,
                        _ => Variant::VlString,
                    };
                    signals.insert(
                        name.clone(),
                        SignalEntry {
                            variant,
                            attrs: attrs.clone(),
                            data: Some((data_name.clone(), data_attrs.clone())),
                        },
                    );
                    continue;
                }
                TableTag::VlStringData | TableTag::VlStringDataCompressed => continue,
            };
            signals.insert(
                name.clone(),
                SignalEntry {
                    variant,
                    attrs: attrs.clone(),
                    data: None,
                },
            );
        }

        info!(signals = signals.len(), "Opened signal log");
        Ok(Self {
            path: store.path().to_path_buf(),
            store,
            config,
            codec: ValueCodec::default(),
            signals,
            timestamps: DashMap::new(),
        })
    }

    /// Use a custom structured-value codec for `vlstring_compressed` signals
    pub fn with_codec(mut self, codec: ValueCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Names of all signals, data tables of vlstring pairs excluded
    pub fn list_signals(&self) -> Vec<String> {
        self.signals.keys().cloned().collect()
    }

    pub fn has_signal(&self, signal: &str) -> bool {
        self.signals.contains_key(signal)
    }

    fn entry(&self, signal: &str) -> Result<&SignalEntry> {
        self.signals
            .get(signal)
            .ok_or_else(|| LogError::UnknownSignal(signal.to_string()))
    }

    pub fn variant(&self, signal: &str) -> Result<Variant> {
        Ok(self.entry(signal)?.variant)
    }

    /// Type of the values the signal yields
    pub fn get_dtype(&self, signal: &str) -> Result<SignalType> {
        let entry = self.entry(signal)?;
        let signal_type = match entry.variant {
            Variant::Regular => {
                let schema = entry
                    .attrs
                    .schema()
                    .ok_or_else(|| LogError::store(format!("{signal:?} has no row schema")))?;
                SignalType::Array {
                    dtype: schema.value_dtype.clone(),
                    shape: schema.value_shape.clone(),
                }
            }
            Variant::String => SignalType::Text {
                width: entry.attrs.schema().map_or(0, |schema| schema.value_size()),
            },
            Variant::VlString => SignalType::Bytes,
            Variant::VlStringCompressed => SignalType::Structured,
        };
        Ok(signal_type)
    }

    /// Time column of a signal, loaded once
    pub fn timestamps(&self, signal: &str) -> Result<Arc<[f64]>> {
        let entry = self.entry(signal)?;
        if let Some(times) = self.timestamps.get(signal) {
            return Ok(Arc::clone(&times));
        }
        let snapshot = self.store.snapshot()?;
        let times: Arc<[f64]> = snapshot.rows(signal, &entry.attrs)?.timestamps()?.into();
        debug!(signal, rows = times.len(), "Loaded timestamp column");
        self.timestamps
            .insert(signal.to_string(), Arc::clone(&times));
        Ok(times)
    }

    pub fn row_count(&self, signal: &str) -> Result<usize> {
        Ok(self.timestamps(signal)?.len())
    }

    /// First and last timestamp of a signal
    pub fn get_bounds(&self, signal: &str) -> Result<(f64, f64)> {
        let times = self.timestamps(signal)?;
        match (times.first(), times.last()) {
            (Some(&first), Some(&last)) => Ok((first, last)),
            _ => Err(LogError::EmptySignal(signal.to_string())),
        }
    }

    /// Lazily read the rows of `signal` with `start <= t <= stop`
    ///
    /// Missing bounds default to the signal's own bounds. A signal without
    /// rows yields nothing.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn read_range(
        &self,
        signal: &str,
        start: Option<f64>,
        stop: Option<f64>,
    ) -> Result<RangeIter> {
        let entry = self.entry(signal)?;
        let times = self.timestamps(signal)?;
        let (first, last) = match (times.first(), times.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => (f64::NEG_INFINITY, f64::INFINITY),
        };
        let start = start.unwrap_or(first);
        let stop = stop.unwrap_or(last);

        let begin = times.partition_point(|&t| t < start);
        let end = times.partition_point(|&t| t <= stop).max(begin);
        debug!(begin, end, "Located range");

        let window = Window {
            begin,
            end,
            start,
            stop,
        };
        RangeIter::open(
            self.store.snapshot()?,
            signal,
            entry,
            times,
            window,
            self.config,
            self.codec.clone(),
        )
    }

    /// Read several signals merged into one time-ordered stream
    ///
    /// Equal timestamps come out in the order the signals are listed.
    pub fn read_merged<S: AsRef<str>>(
        &self,
        signals: &[S],
        start: Option<f64>,
        stop: Option<f64>,
    ) -> Result<Merge<RangeIter, Sample>> {
        let ranges = signals
            .iter()
            .map(|signal| self.read_range(signal.as_ref(), start, stop))
            .collect::<Result<Vec<_>>>()?;
        Ok(merge(ranges))
    }
}

impl std::fmt::Debug for LogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogReader")
            .field("path", &self.path)
            .field("signals", &self.signals.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
