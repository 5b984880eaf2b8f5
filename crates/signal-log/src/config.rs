//! Configuration types for log writers and readers

use serde::{Deserialize, Serialize};

/// Default width of fixed-string signals
pub const DEFAULT_STRING_WIDTH: usize = 256;

/// Suffix appended to the final path while a log is being written
pub const DEFAULT_TEMP_SUFFIX: &str = ".active";

/// zlib compression settings for a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compression {
    /// Whether payloads are compressed
    pub enabled: bool,
    /// zlib level (0-9)
    pub level: u32,
}

impl Compression {
    /// No compression
    pub const fn none() -> Self {
        Self {
            enabled: false,
            level: 0,
        }
    }

    /// zlib at the given level, clamped to 9
    pub const fn zlib(level: u32) -> Self {
        Self {
            enabled: true,
            level: if level > 9 { 9 } else { level },
        }
    }
}

impl Default for Compression {
    fn default() -> Self {
        Self::zlib(9)
    }
}

/// Configuration for [`LogWriter`](crate::LogWriter)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Compression of `regular` table payloads
    pub compression: Compression,
    /// Compression of vlstring data blobs
    pub blob_compression: Compression,
    /// Accept a timestamp equal to the previous one of the same signal
    pub allow_delta0: bool,
    /// Rows appended between intermediate commits
    pub flush_interval: usize,
    /// Replace an existing file at the final path on finish
    pub overwrite: bool,
    /// Suffix of the in-progress path
    pub temp_suffix: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            compression: Compression::zlib(9),
            blob_compression: Compression::zlib(1),
            allow_delta0: true,
            flush_interval: 1024,
            overwrite: true,
            temp_suffix: DEFAULT_TEMP_SUFFIX.to_string(),
        }
    }
}

impl WriterConfig {
    /// Config that stores every payload uncompressed
    pub fn uncompressed() -> Self {
        Self {
            compression: Compression::none(),
            blob_compression: Compression::none(),
            ..Default::default()
        }
    }

    /// Set compression of `regular` tables
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set compression of vlstring data blobs
    pub fn with_blob_compression(mut self, compression: Compression) -> Self {
        self.blob_compression = compression;
        self
    }

    /// Set the equal-timestamp policy
    pub fn with_allow_delta0(mut self, allow: bool) -> Self {
        self.allow_delta0 = allow;
        self
    }

    /// Set the number of rows between intermediate commits (at least 1)
    pub fn with_flush_interval(mut self, rows: usize) -> Self {
        self.flush_interval = rows.max(1);
        self
    }

    /// Set whether finish may replace an existing final file
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Set the suffix of the in-progress path
    pub fn with_temp_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.temp_suffix = suffix.into();
        self
    }
}

/// Configuration for [`LogReader`](crate::LogReader)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Accept a row whose timestamp equals the previous one
    pub allow_delta0: bool,
    /// Yield anomalous rows as errors instead of skipping them
    pub strict: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            allow_delta0: true,
            strict: false,
        }
    }
}

impl ReaderConfig {
    /// Config that reports every anomalous row to the caller
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Default::default()
        }
    }

    /// Set the equal-timestamp policy
    pub fn with_allow_delta0(mut self, allow: bool) -> Self {
        self.allow_delta0 = allow;
        self
    }
}
