//! Element types and fixed-shape arrays
//!
//! Values of `regular` signals are fixed-shape arrays of a scalar or record
//! element type, stored as packed little-endian bytes in C order. Record
//! fields are laid out in declaration order without padding.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LogError, Result};

/// Number of elements described by a shape (`()` holds one element)
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Scalar element kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// Fixed-width byte text, NUL padded
    Bytes(usize),
}

impl ScalarKind {
    /// Size of one element in bytes
    pub fn itemsize(&self) -> usize {
        match self {
            Self::Bool | Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
            Self::Bytes(width) => *width,
        }
    }

    /// Whether values of this kind convert to a number
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Bytes(_))
    }

    /// Read one little-endian element as f64
    ///
    /// Returns `None` for text kinds or when `bytes` has the wrong length.
    pub fn read_f64(&self, bytes: &[u8]) -> Option<f64> {
        if bytes.len() != self.itemsize() {
            return None;
        }
        let value = match self {
            Self::Bool => f64::from(u8::from(bytes[0] != 0)),
            Self::I8 => f64::from(i8::from_le_bytes(le(bytes)?)),
            Self::I16 => f64::from(i16::from_le_bytes(le(bytes)?)),
            Self::I32 => f64::from(i32::from_le_bytes(le(bytes)?)),
            Self::I64 => i64::from_le_bytes(le(bytes)?) as f64,
            Self::U8 => f64::from(bytes[0]),
            Self::U16 => f64::from(u16::from_le_bytes(le(bytes)?)),
            Self::U32 => f64::from(u32::from_le_bytes(le(bytes)?)),
            Self::U64 => u64::from_le_bytes(le(bytes)?) as f64,
            Self::F32 => f64::from(f32::from_le_bytes(le(bytes)?)),
            Self::F64 => f64::from_le_bytes(le(bytes)?),
            Self::Bytes(_) => return None,
        };
        Some(value)
    }
}

fn le<const N: usize>(bytes: &[u8]) -> Option<[u8; N]> {
    bytes.try_into().ok()
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "|b1"),
            Self::I8 => write!(f, "|i1"),
            Self::I16 => write!(f, "<i2"),
            Self::I32 => write!(f, "<i4"),
            Self::I64 => write!(f, "<i8"),
            Self::U8 => write!(f, "|u1"),
            Self::U16 => write!(f, "<u2"),
            Self::U32 => write!(f, "<u4"),
            Self::U64 => write!(f, "<u8"),
            Self::F32 => write!(f, "<f4"),
            Self::F64 => write!(f, "<f8"),
            Self::Bytes(width) => write!(f, "|S{width}"),
        }
    }
}

/// A named field of a record element type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub dtype: DType,
    /// Sub-array shape of the field (`[]` for a single element)
    pub shape: Vec<usize>,
}

impl Field {
    /// Create a single-element field
    pub fn new(name: impl Into<String>, dtype: impl Into<DType>) -> Self {
        Self {
            name: name.into(),
            dtype: dtype.into(),
            shape: Vec::new(),
        }
    }

    /// Give the field a sub-array shape
    pub fn with_shape(mut self, shape: Vec<usize>) -> Self {
        self.shape = shape;
        self
    }

    /// Bytes occupied by the field inside one record
    pub fn size(&self) -> usize {
        self.dtype.itemsize() * element_count(&self.shape)
    }
}

/// Element type of an array: a scalar or a record of named fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Scalar(ScalarKind),
    Record(Vec<Field>),
}

impl DType {
    /// Build a record dtype, checking that field names are unique
    pub fn record(fields: Vec<Field>) -> Result<Self> {
        if fields.is_empty() {
            return Err(LogError::Shape("record dtype needs at least one field".into()));
        }
        let mut seen = HashSet::new();
        for field in &fields {
            if field.name.is_empty() {
                return Err(LogError::Shape("record field names must not be empty".into()));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(LogError::Shape(format!(
                    "duplicate record field {:?}",
                    field.name
                )));
            }
        }
        Ok(Self::Record(fields))
    }

    /// Size of one element in bytes
    pub fn itemsize(&self) -> usize {
        match self {
            Self::Scalar(kind) => kind.itemsize(),
            Self::Record(fields) => fields.iter().map(Field::size).sum(),
        }
    }

    pub fn is_record(&self) -> bool {
        matches!(self, Self::Record(_))
    }

    /// Fields of a record dtype (empty for scalars)
    pub fn fields(&self) -> &[Field] {
        match self {
            Self::Scalar(_) => &[],
            Self::Record(fields) => fields,
        }
    }

    /// Look up a record field together with its byte offset
    pub fn field(&self, name: &str) -> Option<(usize, &Field)> {
        let mut offset = 0;
        for field in self.fields() {
            if field.name == name {
                return Some((offset, field));
            }
            offset += field.size();
        }
        None
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

impl From<ScalarKind> for DType {
    fn from(kind: ScalarKind) -> Self {
        Self::Scalar(kind)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(kind) => write!(f, "{kind}"),
            Self::Record(fields) => {
                write!(f, "[")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "('{}', '{}'", field.name, field.dtype)?;
                    if !field.shape.is_empty() {
                        write!(f, ", {:?}", field.shape)?;
                    }
                    write!(f, ")")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Primitive types that can be packed into an [`Array`]
pub trait Element: Copy {
    const KIND: ScalarKind;

    fn write_le(self, out: &mut Vec<u8>);

    /// Decode from exactly `KIND.itemsize()` bytes
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const KIND: ScalarKind = ScalarKind::$kind;

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(buf)
                }
            }
        )*
    };
}

impl_element!(
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

impl Element for bool {
    const KIND: ScalarKind = ScalarKind::Bool;

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(u8::from(self));
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// A fixed-shape array of packed elements
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl Array {
    /// Wrap raw little-endian bytes, checking their length
    pub fn new(dtype: DType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        let expected = dtype.itemsize() * element_count(&shape);
        if data.len() != expected {
            return Err(LogError::Shape(format!(
                "dtype {dtype} with shape {shape:?} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self { dtype, shape, data })
    }

    /// One-dimensional array of typed values
    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        let shape = vec![values.len()];
        Self::pack(shape, values)
    }

    /// Array of typed values with an explicit shape
    pub fn from_shape_vec<T: Element>(shape: Vec<usize>, values: Vec<T>) -> Result<Self> {
        if element_count(&shape) != values.len() {
            return Err(LogError::Shape(format!(
                "shape {shape:?} holds {} elements, got {}",
                element_count(&shape),
                values.len()
            )));
        }
        Ok(Self::pack(shape, values))
    }

    /// Zero-dimensional array holding one value
    pub fn scalar<T: Element>(value: T) -> Self {
        Self::pack(Vec::new(), vec![value])
    }

    fn pack<T: Element>(shape: Vec<usize>, values: Vec<T>) -> Self {
        let mut data = Vec::with_capacity(values.len() * T::KIND.itemsize());
        for value in values {
            value.write_le(&mut data);
        }
        Self {
            dtype: DType::Scalar(T::KIND),
            shape,
            data,
        }
    }

    pub fn dtype(&self) -> &DType {
        &self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        element_count(&self.shape)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Typed copy of the elements, or `None` if `T` is not the element kind
    pub fn to_vec<T: Element>(&self) -> Option<Vec<T>> {
        if self.dtype != DType::Scalar(T::KIND) {
            return None;
        }
        Some(
            self.data
                .chunks_exact(T::KIND.itemsize())
                .map(T::read_le)
                .collect(),
        )
    }

    /// Bytes of the `index`-th element in C order
    pub fn element_bytes(&self, index: usize) -> Option<&[u8]> {
        let size = self.dtype.itemsize();
        if index >= self.len() {
            return None;
        }
        self.data.get(index * size..(index + 1) * size)
    }

    /// The `index`-th element as a zero-dimensional array
    pub fn element(&self, index: usize) -> Option<Array> {
        let bytes = self.element_bytes(index)?;
        Some(Self {
            dtype: self.dtype.clone(),
            shape: Vec::new(),
            data: bytes.to_vec(),
        })
    }

    /// Numeric record field of every element, converted to f64
    pub fn field_f64(&self, name: &str) -> Option<Vec<f64>> {
        let (offset, field) = self.dtype.field(name)?;
        let DType::Scalar(kind) = field.dtype else {
            return None;
        };
        if !field.shape.is_empty() || !kind.is_numeric() {
            return None;
        }
        (0..self.len())
            .map(|i| {
                let element = self.element_bytes(i)?;
                kind.read_f64(element.get(offset..offset + kind.itemsize())?)
            })
            .collect()
    }
}
