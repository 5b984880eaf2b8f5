//! Row schemas for signal tables
//!
//! Every row table holds a float64 `time` column followed by one value
//! column. For `regular` signals the value column is derived from a sample
//! value; record element types are expanded into a nested column tree that
//! mirrors the record's field order and byte layout.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dtype::{Array, DType, ScalarKind, element_count};
use crate::error::{LogError, Result};

/// Name of the time column present in every row table
pub const TIME_COLUMN: &str = "time";

/// Name of the value column of `regular` and `string` tables
pub const VALUE_COLUMN: &str = "value";

/// Name of the blob size column of vlstring index tables
pub const SIZE_COLUMN: &str = "size_of_value";

/// Bytes used by the time column
pub const TIME_SIZE: usize = 8;

/// One column of a row, possibly nested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Byte offset inside the row
    pub offset: usize,
    /// Sub-array shape of the column
    pub shape: Vec<usize>,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Scalar(ScalarKind),
    Nested(Vec<Column>),
}

impl Column {
    /// Bytes occupied by the column
    pub fn size(&self) -> usize {
        let item = match &self.kind {
            ColumnKind::Scalar(kind) => kind.itemsize(),
            ColumnKind::Nested(children) => children.iter().map(Column::size).sum(),
        };
        item * element_count(&self.shape)
    }
}

/// Schema of a row table: `time` plus one value column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSchema {
    pub value_dtype: DType,
    pub value_shape: Vec<usize>,
    pub columns: Vec<Column>,
}

impl RowSchema {
    /// Derive the schema of a `regular` table from a sample value
    pub fn derive(sample: &Array) -> Result<Self> {
        Self::for_value(VALUE_COLUMN, sample.dtype(), sample.shape())
    }

    /// Schema whose value column has the given dtype and shape
    pub fn for_value(name: &str, dtype: &DType, shape: &[usize]) -> Result<Self> {
        let time = Column {
            name: TIME_COLUMN.to_string(),
            offset: 0,
            shape: Vec::new(),
            kind: ColumnKind::Scalar(ScalarKind::F64),
        };
        let value = describe(name, dtype, shape, TIME_SIZE)?;
        debug!(dtype = %dtype, shape = ?shape, "Derived row schema");
        Ok(Self {
            value_dtype: dtype.clone(),
            value_shape: shape.to_vec(),
            columns: vec![time, value],
        })
    }

    /// Schema of a fixed-width text table
    pub fn fixed_text(width: usize) -> Self {
        Self::plain(VALUE_COLUMN, ScalarKind::Bytes(width))
    }

    /// Schema of a vlstring index table
    pub fn blob_index() -> Self {
        Self::plain(SIZE_COLUMN, ScalarKind::U64)
    }

    fn plain(name: &str, kind: ScalarKind) -> Self {
        let time = Column {
            name: TIME_COLUMN.to_string(),
            offset: 0,
            shape: Vec::new(),
            kind: ColumnKind::Scalar(ScalarKind::F64),
        };
        let value = Column {
            name: name.to_string(),
            offset: TIME_SIZE,
            shape: Vec::new(),
            kind: ColumnKind::Scalar(kind),
        };
        Self {
            value_dtype: DType::Scalar(kind),
            value_shape: Vec::new(),
            columns: vec![time, value],
        }
    }

    /// Bytes of the value part of a row
    pub fn value_size(&self) -> usize {
        self.value_dtype.itemsize() * element_count(&self.value_shape)
    }

    /// Bytes of a full row, time included
    pub fn row_size(&self) -> usize {
        TIME_SIZE + self.value_size()
    }

    /// Whether a value with this dtype and shape fits the schema
    pub fn accepts(&self, dtype: &DType, shape: &[usize]) -> bool {
        self.value_dtype == *dtype && self.value_shape == shape
    }

    /// Human readable description of the value column type
    pub fn describe_value(&self) -> String {
        format!("{} with shape {:?}", self.value_dtype, self.value_shape)
    }

    pub fn value_column(&self) -> Option<&Column> {
        self.columns.get(1)
    }
}

/// Expand a dtype into a column description
///
/// Record element types may only appear with shape `()` or `(1,)`; the
/// table engine cannot store arrays of records longer than one element.
fn describe(name: &str, dtype: &DType, shape: &[usize], offset: usize) -> Result<Column> {
    let kind = match dtype {
        DType::Scalar(ScalarKind::Bytes(0)) => {
            return Err(LogError::UnsupportedSchema {
                dtype: dtype.to_string(),
                shape: shape.to_vec(),
                reason: "zero-width text column".into(),
            });
        }
        DType::Scalar(kind) => ColumnKind::Scalar(*kind),
        DType::Record(fields) => {
            if !(shape.is_empty() || shape == [1]) {
                return Err(LogError::UnsupportedSchema {
                    dtype: dtype.to_string(),
                    shape: shape.to_vec(),
                    reason: format!(
                        "column {name:?}: arrays of records are only supported with shape () or (1,)"
                    ),
                });
            }
            let mut children = Vec::with_capacity(fields.len());
            let mut child_offset = offset;
            for field in fields {
                children.push(describe(&field.name, &field.dtype, &field.shape, child_offset)?);
                child_offset += field.size();
            }
            ColumnKind::Nested(children)
        }
    };
    Ok(Column {
        name: name.to_string(),
        offset,
        shape: shape.to_vec(),
        kind,
    })
}
