//! Storage variants
//!
//! A signal's variant is fixed by the write operation that first touches
//! it. Each table under the log root carries a [`TableTag`]; the data
//! halves of vlstring pairs have their own tags so the reader never
//! surfaces them as signals.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dtype::DType;

/// Variant attribute stored on every table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableTag {
    Regular,
    String,
    VlString,
    VlStringData,
    VlStringDataCompressed,
}

impl TableTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::String => "string",
            Self::VlString => "vlstring",
            Self::VlStringData => "vlstring_data",
            Self::VlStringDataCompressed => "vlstring_data_compressed",
        }
    }

    /// Whether this table is the data half of a vlstring pair
    pub fn is_data(&self) -> bool {
        matches!(self, Self::VlStringData | Self::VlStringDataCompressed)
    }
}

impl fmt::Display for TableTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(Self::Regular),
            "string" => Ok(Self::String),
            "vlstring" => Ok(Self::VlString),
            "vlstring_data" => Ok(Self::VlStringData),
            "vlstring_data_compressed" => Ok(Self::VlStringDataCompressed),
            other => Err(format!("unknown table tag {other:?}")),
        }
    }
}

/// Storage variant of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Fixed dtype/shape arrays
    Regular,
    /// Fixed-width text
    String,
    /// Variable-length bytes in an index+data pair
    VlString,
    /// Variable-length bytes holding a compressed structured value
    VlStringCompressed,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::String => "string",
            Self::VlString => "vlstring",
            Self::VlStringCompressed => "vlstring_compressed",
        }
    }

    /// Tag of the data half for the vlstring variants
    pub fn data_tag(&self) -> Option<TableTag> {
        match self {
            Self::VlString => Some(TableTag::VlStringData),
            Self::VlStringCompressed => Some(TableTag::VlStringDataCompressed),
            Self::Regular | Self::String => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of the values a signal yields when read back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalType {
    /// Arrays of a fixed dtype and shape
    Array { dtype: DType, shape: Vec<usize> },
    /// Text of at most `width` bytes
    Text { width: usize },
    /// Raw variable-length bytes
    Bytes,
    /// Decoded structured values
    Structured,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Array { dtype, shape } => write!(f, "{dtype} {shape:?}"),
            Self::Text { width } => write!(f, "text({width})"),
            Self::Bytes => write!(f, "bytes"),
            Self::Structured => write!(f, "structured"),
        }
    }
}
