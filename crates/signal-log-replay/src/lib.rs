//! Replay view over finished signal logs
//!
//! [`SignalLogSource`] presents one log file as a set of raw signals, each
//! with its value type and time bounds, and reads any subset of them as a
//! single time-ordered stream.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use signal_log::{
    LogError, LogReader, Merge, RangeIter, ReaderConfig, Result, Sample, SignalType,
};
use tracing::{debug, info};

/// Time reference reported for every signal of a log
pub const DEFAULT_TIME_REFERENCE: &str = "default";

/// One signal as seen by a replay consumer
#[derive(Debug, Clone, PartialEq)]
pub struct RawSignal {
    name: String,
    signal_type: SignalType,
    path: PathBuf,
    bounds: Option<(f64, f64)>,
}

impl RawSignal {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signal_type(&self) -> &SignalType {
        &self.signal_type
    }

    pub fn time_reference(&self) -> &'static str {
        DEFAULT_TIME_REFERENCE
    }

    /// Files the signal is read from
    pub fn resources(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }

    /// First and last timestamp, `None` for a signal without rows
    pub fn time_bounds(&self) -> Option<(f64, f64)> {
        self.bounds
    }

    /// Time span covered by the signal
    pub fn length(&self) -> Option<f64> {
        self.bounds.map(|(start, stop)| stop - start)
    }
}

/// A finished log opened for replay
#[derive(Debug)]
pub struct SignalLogSource {
    reader: LogReader,
    annotations: BTreeMap<String, Value>,
}

impl SignalLogSource {
    /// Open a finished log
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let reader = LogReader::open(path)?;
        info!(path = %reader.path().display(), "Opened log for replay");
        Ok(Self {
            reader,
            annotations: BTreeMap::new(),
        })
    }

    /// Reopen the log with a different reader configuration
    pub fn with_reader_config(self, config: ReaderConfig) -> Result<Self> {
        let reader = LogReader::with_config(self.reader.path(), config)?;
        Ok(Self {
            reader,
            annotations: self.annotations,
        })
    }

    /// Attach free-form annotations to the log
    pub fn with_annotations(mut self, annotations: BTreeMap<String, Value>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn annotations(&self) -> &BTreeMap<String, Value> {
        &self.annotations
    }

    /// Files backing this source
    pub fn resources(&self) -> Vec<PathBuf> {
        vec![self.reader.path().to_path_buf()]
    }

    pub fn reader(&self) -> &LogReader {
        &self.reader
    }

    /// Every signal of the log with its type and bounds
    pub fn get_signals(&self) -> Result<BTreeMap<String, RawSignal>> {
        let mut signals = BTreeMap::new();
        for name in self.reader.list_signals() {
            let bounds = match self.reader.get_bounds(&name) {
                Ok(bounds) => Some(bounds),
                Err(LogError::EmptySignal(_)) => None,
                Err(e) => return Err(e),
            };
            let raw = RawSignal {
                name: name.clone(),
                signal_type: self.reader.get_dtype(&name)?,
                path: self.reader.path().to_path_buf(),
                bounds,
            };
            signals.insert(name, raw);
        }
        debug!(signals = signals.len(), "Listed raw signals");
        Ok(signals)
    }

    /// Read the named signals as one time-ordered stream
    ///
    /// Rows with equal timestamps come out in the order of `signal_names`.
    pub fn read<S: AsRef<str>>(
        &self,
        signal_names: &[S],
        start: Option<f64>,
        stop: Option<f64>,
    ) -> Result<Merge<RangeIter, Sample>> {
        self.reader.read_merged(signal_names, start, stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_signal_length() {
        let signal = RawSignal {
            name: "x".into(),
            signal_type: SignalType::Bytes,
            path: PathBuf::from("run.log"),
            bounds: Some((2.0, 5.5)),
        };
        assert_eq!(signal.length(), Some(3.5));
        assert_eq!(signal.time_reference(), "default");
        assert_eq!(signal.resources(), vec![PathBuf::from("run.log")]);

        let empty = RawSignal {
            bounds: None,
            ..signal
        };
        assert_eq!(empty.length(), None);
    }
}
