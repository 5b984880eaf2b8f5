//! Structured-value codec and byte compression
//!
//! `vlstring_compressed` signals hold structured values serialized to text
//! and compressed. Both steps are pluggable through [`StructuredCodec`] and
//! [`Compressor`]; the defaults are JSON and zlib.

use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::Serialize;
use serde::ser::{
    self, SerializeMap, SerializeSeq, SerializeStruct, SerializeStructVariant, SerializeTuple,
    SerializeTupleStruct, SerializeTupleVariant,
};
use serde_json::Value;

use crate::error::{LogError, Result};

/// Serializes structured values to text and back
pub trait StructuredCodec: Send + Sync {
    /// Short name used in diagnostics
    fn name(&self) -> &'static str;

    fn serialize(&self, value: &Value) -> Result<String>;

    fn deserialize(&self, text: &str) -> Result<Value>;
}

/// Compresses byte strings
pub trait Compressor: Send + Sync {
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>>;
}

/// JSON text codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl StructuredCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, value: &Value) -> Result<String> {
        serde_json::to_string(value).map_err(|e| LogError::Serialization(e.to_string()))
    }

    fn deserialize(&self, text: &str) -> Result<Value> {
        serde_json::from_str(text).map_err(|e| LogError::Serialization(e.to_string()))
    }
}

/// zlib compressor
#[derive(Debug, Clone, Copy)]
pub struct ZlibCompressor {
    level: u32,
}

impl ZlibCompressor {
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        Self::new(6)
    }
}

impl Compressor for ZlibCompressor {
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        deflate(bytes, self.level)
    }

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        inflate(bytes)
    }
}

/// zlib-compress `bytes` at `level`
pub(crate) fn deflate(bytes: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::new(level));
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Decompress a zlib stream
pub(crate) fn inflate(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Serializer plus compressor used for `vlstring_compressed` signals
#[derive(Clone)]
pub struct ValueCodec {
    structured: Arc<dyn StructuredCodec>,
    compressor: Arc<dyn Compressor>,
}

impl ValueCodec {
    pub fn new(structured: Arc<dyn StructuredCodec>, compressor: Arc<dyn Compressor>) -> Self {
        Self {
            structured,
            compressor,
        }
    }

    /// Serialize and compress a value
    ///
    /// Fails with [`LogError::Serialization`] when the value cannot be
    /// represented (non-finite floats included), or when the codec's text
    /// does not decode back to the same value.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        // JSON would store NaN and infinities as null
        value.serialize(FiniteFloats)?;
        let value = serde_json::to_value(value).map_err(|e| {
            LogError::Serialization(format!("value cannot be represented faithfully: {e}"))
        })?;
        let text = self.structured.serialize(&value)?;
        let back = self.structured.deserialize(&text)?;
        if back != value {
            return Err(LogError::Serialization(format!(
                "{} codec does not round-trip this value",
                self.structured.name()
            )));
        }
        self.compressor.compress(text.as_bytes())
    }

    /// Decompress and deserialize a stored blob
    pub fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let raw = self.compressor.decompress(bytes)?;
        let text = std::str::from_utf8(&raw)
            .map_err(|e| LogError::Serialization(format!("serialized text is not UTF-8: {e}")))?;
        self.structured.deserialize(text)
    }
}

impl ser::Error for LogError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        LogError::Serialization(msg.to_string())
    }
}

/// Serializer that only checks every float in a value is finite
struct FiniteFloats;

fn finite(value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(LogError::Serialization(format!(
            "non-finite float {value} cannot be represented faithfully"
        )))
    }
}

impl ser::Serializer for FiniteFloats {
    type Ok = ();
    type Error = LogError;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, _v: bool) -> Result<()> {
        Ok(())
    }

    fn serialize_i8(self, _v: i8) -> Result<()> {
        Ok(())
    }

    fn serialize_i16(self, _v: i16) -> Result<()> {
        Ok(())
    }

    fn serialize_i32(self, _v: i32) -> Result<()> {
        Ok(())
    }

    fn serialize_i64(self, _v: i64) -> Result<()> {
        Ok(())
    }

    fn serialize_i128(self, _v: i128) -> Result<()> {
        Ok(())
    }

    fn serialize_u8(self, _v: u8) -> Result<()> {
        Ok(())
    }

    fn serialize_u16(self, _v: u16) -> Result<()> {
        Ok(())
    }

    fn serialize_u32(self, _v: u32) -> Result<()> {
        Ok(())
    }

    fn serialize_u64(self, _v: u64) -> Result<()> {
        Ok(())
    }

    fn serialize_u128(self, _v: u128) -> Result<()> {
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> Result<()> {
        finite(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Result<()> {
        finite(v)
    }

    fn serialize_char(self, _v: char) -> Result<()> {
        Ok(())
    }

    fn serialize_str(self, _v: &str) -> Result<()> {
        Ok(())
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<()> {
        Ok(())
    }

    fn serialize_none(self) -> Result<()> {
        Ok(())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<()> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<()> {
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<()> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> Result<()> {
        Ok(())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<()> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<()> {
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self> {
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self> {
        Ok(self)
    }

    fn serialize_tuple_struct(self, _name: &'static str, _len: usize) -> Result<Self> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self> {
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self> {
        Ok(self)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self> {
        Ok(self)
    }
}

impl SerializeSeq for FiniteFloats {
    type Ok = ();
    type Error = LogError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl SerializeTuple for FiniteFloats {
    type Ok = ();
    type Error = LogError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl SerializeTupleStruct for FiniteFloats {
    type Ok = ();
    type Error = LogError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl SerializeTupleVariant for FiniteFloats {
    type Ok = ();
    type Error = LogError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl SerializeMap for FiniteFloats {
    type Ok = ();
    type Error = LogError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<()> {
        key.serialize(FiniteFloats)
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl SerializeStruct for FiniteFloats {
    type Ok = ();
    type Error = LogError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<()> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl SerializeStructVariant for FiniteFloats {
    type Ok = ();
    type Error = LogError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<()> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl Default for ValueCodec {
    fn default() -> Self {
        Self::new(Arc::new(JsonCodec), Arc::new(ZlibCompressor::default()))
    }
}

impl std::fmt::Debug for ValueCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueCodec")
            .field("structured", &self.structured.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use serde_json::json;

    #[test]
    fn test_encode_decode_roundtrip() {
        let codec = ValueCodec::default();
        let value = json!({"k": "v", "n": [1, 2, 3]});
        let bytes = codec.encode(&value).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_non_string_map_keys_rejected() {
        let codec = ValueCodec::default();
        let mut map = HashMap::new();
        map.insert((1u8, 2u8), "pair key");
        let err = codec.encode(&map).unwrap_err();
        assert!(matches!(err, LogError::Serialization(_)));
    }

    #[test]
    fn test_lossy_codec_rejected() {
        struct Truncating;
        impl StructuredCodec for Truncating {
            fn name(&self) -> &'static str {
                "truncating"
            }
            fn serialize(&self, _value: &Value) -> Result<String> {
                Ok("null".into())
            }
            fn deserialize(&self, text: &str) -> Result<Value> {
                JsonCodec.deserialize(text)
            }
        }

        let codec = ValueCodec::new(Arc::new(Truncating), Arc::new(ZlibCompressor::default()));
        let err = codec.encode(&json!({"a": 1})).unwrap_err();
        assert!(err.to_string().contains("truncating"));
    }

    #[test]
    fn test_non_finite_floats_rejected() {
        let codec = ValueCodec::default();
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = codec.encode(&vec![1.0, value]).unwrap_err();
            assert!(matches!(err, LogError::Serialization(_)));
        }

        let mut nested = HashMap::new();
        nested.insert("gain", Some(f32::NAN));
        assert!(codec.encode(&nested).is_err());
        assert!(codec.encode(&json!({"gain": 0.5})).is_ok());
    }

    #[test]
    fn test_decode_garbage_fails() {
        let codec = ValueCodec::default();
        assert!(codec.decode(b"definitely not zlib").is_err());
    }

    #[test]
    fn test_zlib_roundtrip() {
        let data = b"hello hello hello hello".repeat(10);
        let compressed = deflate(&data, 9).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(inflate(&compressed).unwrap(), data);
    }
}
