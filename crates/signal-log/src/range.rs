//! Decoded samples and range iteration

use std::fmt;
use std::iter::FusedIterator;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::warn;

use crate::codec::ValueCodec;
use crate::config::ReaderConfig;
use crate::dtype::{Array, DType};
use crate::encoder::unpad_text;
use crate::error::{LogError, Result};
use crate::reader::SignalEntry;
use crate::store::{BlobTable, Row, RowTable, Snapshot};
use crate::timestamp::TimestampTrack;
use crate::variant::Variant;

/// A value read back from a signal
#[derive(Debug, Clone, PartialEq)]
pub enum SignalValue {
    /// `regular` signals
    Array(Array),
    /// `string` signals, padding stripped
    Text(String),
    /// `vlstring` signals
    Bytes(Bytes),
    /// `vlstring_compressed` signals, decoded
    Structured(Value),
}

impl SignalValue {
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Self::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            _ => None,
        }
    }
}

/// One row of one signal: `(timestamp, (signal, value))`
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: f64,
    pub signal: Arc<str>,
    pub value: SignalValue,
}

impl Sample {
    pub fn into_tuple(self) -> (f64, (Arc<str>, SignalValue)) {
        (self.timestamp, (self.signal, self.value))
    }
}

impl From<Sample> for (f64, (Arc<str>, SignalValue)) {
    fn from(sample: Sample) -> Self {
        sample.into_tuple()
    }
}

/// Requested window and the row positions it maps to
#[derive(Debug, Clone, Copy)]
pub(crate) struct Window {
    pub begin: usize,
    pub end: usize,
    pub start: f64,
    pub stop: f64,
}

enum RowDecoder {
    Array {
        rows: RowTable,
        dtype: DType,
        shape: Vec<usize>,
    },
    Text {
        rows: RowTable,
    },
    Blob {
        index: RowTable,
        data: BlobTable,
        structured: bool,
    },
}

impl RowDecoder {
    fn open(snapshot: &Snapshot, signal: &str, entry: &SignalEntry) -> Result<Self> {
        let rows = snapshot.rows(signal, &entry.attrs)?;
        let decoder = match entry.variant {
            Variant::Regular => {
                let schema = entry
                    .attrs
                    .schema()
                    .ok_or_else(|| LogError::store(format!("{signal:?} has no row schema")))?;
                Self::Array {
                    rows,
                    dtype: schema.value_dtype.clone(),
                    shape: schema.value_shape.clone(),
                }
            }
            Variant::String => Self::Text { rows },
            Variant::VlString | Variant::VlStringCompressed => {
                let (data_name, data_attrs) = entry.data.as_ref().ok_or_else(|| {
                    LogError::store(format!("{signal:?} has no data table"))
                })?;
                Self::Blob {
                    index: rows,
                    data: snapshot.blobs(data_name, data_attrs)?,
                    structured: entry.variant == Variant::VlStringCompressed,
                }
            }
        };
        Ok(decoder)
    }
}

/// Lazy iterator over the rows of one signal inside a time window
///
/// Holds its own read snapshot, released when the iterator is dropped.
/// Rows outside the window or out of timestamp order are skipped with a
/// warning, or yielded as errors when the reader is strict.
pub struct RangeIter {
    signal: Arc<str>,
    decoder: RowDecoder,
    times: Arc<[f64]>,
    next: usize,
    window: Window,
    track: TimestampTrack,
    config: ReaderConfig,
    codec: ValueCodec,
    _snapshot: Snapshot,
}

impl RangeIter {
    pub(crate) fn open(
        snapshot: Snapshot,
        signal: &str,
        entry: &SignalEntry,
        times: Arc<[f64]>,
        window: Window,
        config: ReaderConfig,
        codec: ValueCodec,
    ) -> Result<Self> {
        let decoder = RowDecoder::open(&snapshot, signal, entry)?;
        Ok(Self {
            signal: Arc::from(signal),
            decoder,
            times,
            next: window.begin,
            window,
            track: TimestampTrack::default(),
            config,
            codec,
            _snapshot: snapshot,
        })
    }

    pub fn signal(&self) -> &str {
        &self.signal
    }

    /// Rows left to visit, skipped ones included
    pub fn remaining(&self) -> usize {
        self.window.end.saturating_sub(self.next)
    }

    fn fetch(rows: &RowTable, signal: &str, index: u64) -> Result<Row> {
        rows.get_row(index)
            .map_err(|e| LogError::corrupt(signal, index, e.to_string()))?
            .ok_or_else(|| LogError::corrupt(signal, index, "row is missing"))
    }

    fn decode(&self, index: u64) -> Result<SignalValue> {
        let signal = &*self.signal;
        match &self.decoder {
            RowDecoder::Array { rows, dtype, shape } => {
                let row = Self::fetch(rows, signal, index)?;
                Array::new(dtype.clone(), shape.clone(), row.payload)
                    .map(SignalValue::Array)
                    .map_err(|e| LogError::corrupt(signal, index, e.to_string()))
            }
            RowDecoder::Text { rows } => {
                let row = Self::fetch(rows, signal, index)?;
                String::from_utf8(unpad_text(&row.payload).to_vec())
                    .map(SignalValue::Text)
                    .map_err(|e| LogError::corrupt(signal, index, e.to_string()))
            }
            RowDecoder::Blob {
                index: rows,
                data,
                structured,
            } => {
                let row = Self::fetch(rows, signal, index)?;
                let size: [u8; 8] = row.payload.as_slice().try_into().map_err(|_| {
                    LogError::corrupt(signal, index, "index row has no size column")
                })?;
                let size = u64::from_le_bytes(size);
                let blob = data
                    .get_blob(index)
                    .map_err(|e| LogError::corrupt(signal, index, e.to_string()))?
                    .ok_or_else(|| LogError::corrupt(signal, index, "blob is missing"))?;
                if blob.len() as u64 != size {
                    return Err(LogError::corrupt(
                        signal,
                        index,
                        format!("blob has {} bytes, index says {size}", blob.len()),
                    ));
                }
                if *structured {
                    self.codec
                        .decode(&blob)
                        .map(SignalValue::Structured)
                        .map_err(|e| LogError::corrupt(signal, index, e.to_string()))
                } else {
                    Ok(SignalValue::Bytes(Bytes::from(blob)))
                }
            }
        }
    }
}

impl Iterator for RangeIter {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.window.end {
            let position = self.next;
            self.next += 1;
            let index = position as u64;
            let timestamp = self.times[position];
            let Window { start, stop, .. } = self.window;

            if !(start <= timestamp && timestamp <= stop) {
                if self.config.strict {
                    return Some(Err(LogError::OutOfWindow {
                        signal: self.signal.to_string(),
                        index,
                        timestamp,
                        start,
                        stop,
                    }));
                }
                warn!(
                    signal = %self.signal,
                    index,
                    timestamp,
                    start,
                    stop,
                    "Skipping row outside the requested window"
                );
                continue;
            }

            if let Err(e) = self
                .track
                .advance(&self.signal, timestamp, self.config.allow_delta0)
            {
                if self.config.strict {
                    return Some(Err(e));
                }
                warn!(signal = %self.signal, index, error = %e, "Skipping out of order row");
                continue;
            }

            let sample = self.decode(index).map(|value| Sample {
                timestamp,
                signal: Arc::clone(&self.signal),
                value,
            });
            return Some(sample);
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}

impl FusedIterator for RangeIter {}

impl fmt::Debug for RangeIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeIter")
            .field("signal", &self.signal)
            .field("next", &self.next)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
