//! Canonical Value Module
//!
//! Converts any `Serialize` payload into an order-independent value tree
//! whose JSON text is stable across runs, platforms and field orderings.

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{self, Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::error::{CacheError, Result};

/// Largest magnitude at which every integral f64 is exact (2^53).
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

// == Canonical Value ==
/// Deterministic representation of a key payload.
///
/// Mapping keys are held in a `BTreeMap`, so two payloads that only differ in
/// field or insertion order produce the same value. Numbers are normalized:
/// every integer width collapses into `Integer`, and integral floats inside
/// the exactly-representable range collapse into `Integer` as well, so `1.0`
/// and `1` are the same payload.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    /// Null, unit, or `None`
    Null,
    /// Boolean value
    Bool(bool),
    /// Any integer, including integral floats
    Integer(i128),
    /// Finite, non-integral float
    Float(f64),
    /// String or char
    String(String),
    /// Ordered sequence (order is significant)
    Sequence(Vec<CanonicalValue>),
    /// Mapping with keys sorted
    Mapping(BTreeMap<String, CanonicalValue>),
}

impl CanonicalValue {
    /// Canonicalizes a payload.
    ///
    /// Fails with `CacheError::Serialization` on non-finite floats, map keys
    /// that are not scalar, or a `Serialize` impl that reports an error.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        value
            .serialize(CanonicalSerializer)
            .map_err(|e| CacheError::Serialization(e.0))
    }

    /// Returns the compact JSON text used as hash input.
    pub fn to_canonical_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn from_float(value: f64) -> std::result::Result<Self, CanonicalError> {
        if !value.is_finite() {
            return Err(CanonicalError(format!(
                "non-finite float {} cannot be part of a cache key",
                value
            )));
        }
        if value.fract() == 0.0 && value.abs() < MAX_EXACT_FLOAT {
            // -0.0 lands on 0 here
            Ok(CanonicalValue::Integer(value as i128))
        } else {
            Ok(CanonicalValue::Float(value))
        }
    }

    fn into_map_key(self) -> std::result::Result<String, CanonicalError> {
        match self {
            CanonicalValue::String(s) => Ok(s),
            CanonicalValue::Integer(i) => Ok(i.to_string()),
            CanonicalValue::Bool(b) => Ok(b.to_string()),
            other => Err(CanonicalError(format!(
                "map key must be a string, integer or bool, got {:?}",
                other
            ))),
        }
    }
}

impl Serialize for CanonicalValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            CanonicalValue::Null => serializer.serialize_unit(),
            CanonicalValue::Bool(b) => serializer.serialize_bool(*b),
            CanonicalValue::Integer(i) => serializer.serialize_i128(*i),
            CanonicalValue::Float(f) => serializer.serialize_f64(*f),
            CanonicalValue::String(s) => serializer.serialize_str(s),
            CanonicalValue::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            CanonicalValue::Mapping(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

// == Canonical Error ==
/// Internal serializer error, surfaced as `CacheError::Serialization`.
#[derive(Debug)]
pub struct CanonicalError(String);

impl fmt::Display for CanonicalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CanonicalError {}

impl ser::Error for CanonicalError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        CanonicalError(msg.to_string())
    }
}

type CanonicalResult = std::result::Result<CanonicalValue, CanonicalError>;

fn single_entry(variant: &'static str, value: CanonicalValue) -> CanonicalValue {
    let mut entries = BTreeMap::new();
    entries.insert(variant.to_string(), value);
    CanonicalValue::Mapping(entries)
}

// == Canonical Serializer ==
/// serde `Serializer` producing a [`CanonicalValue`].
///
/// Enum variants use the externally tagged layout serde_json uses.
struct CanonicalSerializer;

impl Serializer for CanonicalSerializer {
    type Ok = CanonicalValue;
    type Error = CanonicalError;
    type SerializeSeq = SeqBuilder;
    type SerializeTuple = SeqBuilder;
    type SerializeTupleStruct = SeqBuilder;
    type SerializeTupleVariant = VariantSeqBuilder;
    type SerializeMap = MapBuilder;
    type SerializeStruct = MapBuilder;
    type SerializeStructVariant = VariantMapBuilder;

    fn serialize_bool(self, v: bool) -> CanonicalResult {
        Ok(CanonicalValue::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> CanonicalResult {
        Ok(CanonicalValue::Integer(v.into()))
    }

    fn serialize_i16(self, v: i16) -> CanonicalResult {
        Ok(CanonicalValue::Integer(v.into()))
    }

    fn serialize_i32(self, v: i32) -> CanonicalResult {
        Ok(CanonicalValue::Integer(v.into()))
    }

    fn serialize_i64(self, v: i64) -> CanonicalResult {
        Ok(CanonicalValue::Integer(v.into()))
    }

    fn serialize_i128(self, v: i128) -> CanonicalResult {
        Ok(CanonicalValue::Integer(v))
    }

    fn serialize_u8(self, v: u8) -> CanonicalResult {
        Ok(CanonicalValue::Integer(v.into()))
    }

    fn serialize_u16(self, v: u16) -> CanonicalResult {
        Ok(CanonicalValue::Integer(v.into()))
    }

    fn serialize_u32(self, v: u32) -> CanonicalResult {
        Ok(CanonicalValue::Integer(v.into()))
    }

    fn serialize_u64(self, v: u64) -> CanonicalResult {
        Ok(CanonicalValue::Integer(v.into()))
    }

    fn serialize_u128(self, v: u128) -> CanonicalResult {
        i128::try_from(v)
            .map(CanonicalValue::Integer)
            .map_err(|_| CanonicalError(format!("integer {} is out of range", v)))
    }

    fn serialize_f32(self, v: f32) -> CanonicalResult {
        CanonicalValue::from_float(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> CanonicalResult {
        CanonicalValue::from_float(v)
    }

    fn serialize_char(self, v: char) -> CanonicalResult {
        Ok(CanonicalValue::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> CanonicalResult {
        Ok(CanonicalValue::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> CanonicalResult {
        Ok(CanonicalValue::Sequence(
            v.iter().map(|b| CanonicalValue::Integer((*b).into())).collect(),
        ))
    }

    fn serialize_none(self) -> CanonicalResult {
        Ok(CanonicalValue::Null)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> CanonicalResult {
        value.serialize(self)
    }

    fn serialize_unit(self) -> CanonicalResult {
        Ok(CanonicalValue::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> CanonicalResult {
        Ok(CanonicalValue::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> CanonicalResult {
        Ok(CanonicalValue::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> CanonicalResult {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> CanonicalResult {
        Ok(single_entry(variant, value.serialize(CanonicalSerializer)?))
    }

    fn serialize_seq(self, len: Option<usize>) -> std::result::Result<SeqBuilder, CanonicalError> {
        Ok(SeqBuilder {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> std::result::Result<SeqBuilder, CanonicalError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> std::result::Result<SeqBuilder, CanonicalError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> std::result::Result<VariantSeqBuilder, CanonicalError> {
        Ok(VariantSeqBuilder {
            variant,
            items: Vec::with_capacity(len),
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> std::result::Result<MapBuilder, CanonicalError> {
        Ok(MapBuilder {
            entries: BTreeMap::new(),
            pending_key: None,
        })
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> std::result::Result<MapBuilder, CanonicalError> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> std::result::Result<VariantMapBuilder, CanonicalError> {
        Ok(VariantMapBuilder {
            variant,
            entries: BTreeMap::new(),
        })
    }
}

// == Compound Builders ==
struct SeqBuilder {
    items: Vec<CanonicalValue>,
}

impl ser::SerializeSeq for SeqBuilder {
    type Ok = CanonicalValue;
    type Error = CanonicalError;

    fn serialize_element<T: ?Sized + Serialize>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), CanonicalError> {
        self.items.push(value.serialize(CanonicalSerializer)?);
        Ok(())
    }

    fn end(self) -> CanonicalResult {
        Ok(CanonicalValue::Sequence(self.items))
    }
}

impl ser::SerializeTuple for SeqBuilder {
    type Ok = CanonicalValue;
    type Error = CanonicalError;

    fn serialize_element<T: ?Sized + Serialize>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), CanonicalError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> CanonicalResult {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SeqBuilder {
    type Ok = CanonicalValue;
    type Error = CanonicalError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), CanonicalError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> CanonicalResult {
        ser::SerializeSeq::end(self)
    }
}

struct VariantSeqBuilder {
    variant: &'static str,
    items: Vec<CanonicalValue>,
}

impl ser::SerializeTupleVariant for VariantSeqBuilder {
    type Ok = CanonicalValue;
    type Error = CanonicalError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), CanonicalError> {
        self.items.push(value.serialize(CanonicalSerializer)?);
        Ok(())
    }

    fn end(self) -> CanonicalResult {
        Ok(single_entry(self.variant, CanonicalValue::Sequence(self.items)))
    }
}

struct MapBuilder {
    entries: BTreeMap<String, CanonicalValue>,
    pending_key: Option<String>,
}

impl ser::SerializeMap for MapBuilder {
    type Ok = CanonicalValue;
    type Error = CanonicalError;

    fn serialize_key<T: ?Sized + Serialize>(
        &mut self,
        key: &T,
    ) -> std::result::Result<(), CanonicalError> {
        self.pending_key = Some(key.serialize(CanonicalSerializer)?.into_map_key()?);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), CanonicalError> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| CanonicalError("map value serialized before its key".to_string()))?;
        self.entries.insert(key, value.serialize(CanonicalSerializer)?);
        Ok(())
    }

    fn end(self) -> CanonicalResult {
        Ok(CanonicalValue::Mapping(self.entries))
    }
}

impl ser::SerializeStruct for MapBuilder {
    type Ok = CanonicalValue;
    type Error = CanonicalError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> std::result::Result<(), CanonicalError> {
        self.entries
            .insert(key.to_string(), value.serialize(CanonicalSerializer)?);
        Ok(())
    }

    fn end(self) -> CanonicalResult {
        Ok(CanonicalValue::Mapping(self.entries))
    }
}

struct VariantMapBuilder {
    variant: &'static str,
    entries: BTreeMap<String, CanonicalValue>,
}

impl ser::SerializeStructVariant for VariantMapBuilder {
    type Ok = CanonicalValue;
    type Error = CanonicalError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> std::result::Result<(), CanonicalError> {
        self.entries
            .insert(key.to_string(), value.serialize(CanonicalSerializer)?);
        Ok(())
    }

    fn end(self) -> CanonicalResult {
        Ok(single_entry(self.variant, CanonicalValue::Mapping(self.entries)))
    }
}
