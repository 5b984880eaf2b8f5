//! Signal Log: append-only time-series logs of named signals
//!
//! A log file maps signal names to time-ordered sequences of typed values.
//! Each signal uses one of four storage variants, fixed by the write
//! operation that first touches it:
//!
//! - `regular`: fixed dtype/shape arrays, one row per sample
//! - `string`: fixed-width text
//! - `vlstring`: variable-length bytes in an index table plus a data table
//! - `vlstring_compressed`: compressed structured values in the same layout
//!
//! Timestamps of every signal must not decrease. Logs are written to a
//! temporary path and renamed into place when finished.
//!
//! ## Example
//!
//! ```rust,no_run
//! use signal_log::{Array, LogReader, LogWriter};
//!
//! # fn main() -> signal_log::Result<()> {
//! let mut writer = LogWriter::create("run.log")?;
//! writer.log_regular("speed", 0.0, &Array::scalar(1.5f64))?;
//! writer.log_fixed_string("mode", 0.5, "cruise")?;
//! writer.finish()?;
//!
//! let reader = LogReader::open("run.log")?;
//! for sample in reader.read_merged(&["speed", "mode"], None, None)? {
//!     let sample = sample?;
//!     println!("{} {} {:?}", sample.timestamp, sample.signal, sample.value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod dtype;
pub mod encoder;
pub mod error;
pub mod merge;
pub mod range;
pub mod reader;
pub mod schema;
pub mod store;
pub mod timestamp;
pub mod variant;
pub mod writer;

pub use codec::{Compressor, JsonCodec, StructuredCodec, ValueCodec, ZlibCompressor};
pub use config::{Compression, ReaderConfig, WriterConfig};
pub use dtype::{Array, DType, Element, Field, ScalarKind};
pub use error::{LogError, Result};
pub use merge::{Merge, Timestamped, merge};
pub use range::{RangeIter, Sample, SignalValue};
pub use reader::{LogReader, is_signal_log};
pub use schema::RowSchema;
pub use timestamp::TimestampValidator;
pub use variant::{SignalType, TableTag, Variant};
pub use writer::LogWriter;
