//! serde `Serializer` producing [`Value`] trees.
//!
//! Structs and maps become dictionaries, sequences become arrays and scalars
//! map onto the matching property-list kind. `None` and `()` are "absent":
//! a struct field or map entry holding them is left out of the dictionary.

use serde::ser::{self, Impossible, Serialize, Serializer as _};

use super::error::{PlistError, PlistResult};
use super::value::{parse_date, Dictionary, Value, DATE_TOKEN};

pub(crate) struct ValueSerializer;

fn incompatible(from: &'static str, to: &'static str) -> PlistError {
    PlistError::IncompatibleType { from, to }
}

impl ser::Serializer for ValueSerializer {
    type Ok = Option<Value>;
    type Error = PlistError;

    type SerializeSeq = ArraySerializer;
    type SerializeTuple = ArraySerializer;
    type SerializeTupleStruct = ArraySerializer;
    type SerializeTupleVariant = TupleVariantSerializer;
    type SerializeMap = DictSerializer;
    type SerializeStruct = DictSerializer;
    type SerializeStructVariant = StructVariantSerializer;

    fn serialize_bool(self, v: bool) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Boolean(v)))
    }

    fn serialize_i8(self, v: i8) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Integer(v.into())))
    }

    fn serialize_i16(self, v: i16) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Integer(v.into())))
    }

    fn serialize_i32(self, v: i32) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Integer(v.into())))
    }

    fn serialize_i64(self, v: i64) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Integer(v.into())))
    }

    fn serialize_i128(self, v: i128) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Integer(v)))
    }

    fn serialize_u8(self, v: u8) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Integer(v.into())))
    }

    fn serialize_u16(self, v: u16) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Integer(v.into())))
    }

    fn serialize_u32(self, v: u32) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Integer(v.into())))
    }

    fn serialize_u64(self, v: u64) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Integer(v.into())))
    }

    fn serialize_u128(self, v: u128) -> PlistResult<Option<Value>> {
        i128::try_from(v)
            .map(|i| Some(Value::Integer(i)))
            .map_err(|_| incompatible("u128", "integer"))
    }

    fn serialize_f32(self, v: f32) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Real(v.into())))
    }

    fn serialize_f64(self, v: f64) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Real(v)))
    }

    fn serialize_char(self, v: char) -> PlistResult<Option<Value>> {
        Ok(Some(Value::String(v.to_string())))
    }

    fn serialize_str(self, v: &str) -> PlistResult<Option<Value>> {
        Ok(Some(Value::String(v.to_string())))
    }

    fn serialize_bytes(self, v: &[u8]) -> PlistResult<Option<Value>> {
        let items = v.iter().map(|b| Value::Integer((*b).into())).collect();
        Ok(Some(Value::Array(items)))
    }

    fn serialize_none(self) -> PlistResult<Option<Value>> {
        Ok(None)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> PlistResult<Option<Value>> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> PlistResult<Option<Value>> {
        Ok(None)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Dictionary(Dictionary::new())))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> PlistResult<Option<Value>> {
        Ok(Some(Value::String(variant.to_string())))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        value: &T,
    ) -> PlistResult<Option<Value>> {
        if name != DATE_TOKEN {
            return value.serialize(self);
        }
        match value.serialize(ValueSerializer)? {
            Some(Value::String(s)) => match parse_date(&s) {
                Some(dt) => Ok(Some(Value::Date(dt))),
                None => Err(PlistError::InvalidScalar {
                    kind: "date",
                    value: s,
                }),
            },
            Some(other) => Err(incompatible(other.kind(), "date")),
            None => Ok(None),
        }
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> PlistResult<Option<Value>> {
        match value.serialize(ValueSerializer)? {
            Some(inner) => {
                let mut dict = Dictionary::new();
                dict.insert(variant, inner);
                Ok(Some(Value::Dictionary(dict)))
            }
            None => Ok(Some(Value::String(variant.to_string()))),
        }
    }

    fn serialize_seq(self, len: Option<usize>) -> PlistResult<ArraySerializer> {
        Ok(ArraySerializer {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> PlistResult<ArraySerializer> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> PlistResult<ArraySerializer> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> PlistResult<TupleVariantSerializer> {
        Ok(TupleVariantSerializer {
            variant,
            array: ArraySerializer {
                items: Vec::with_capacity(len),
            },
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> PlistResult<DictSerializer> {
        Ok(DictSerializer::default())
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> PlistResult<DictSerializer> {
        Ok(DictSerializer::default())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> PlistResult<StructVariantSerializer> {
        Ok(StructVariantSerializer {
            variant,
            dict: DictSerializer::default(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Compound serializers
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct ArraySerializer {
    items: Vec<Value>,
}

impl ArraySerializer {
    fn push<T: ?Sized + Serialize>(&mut self, value: &T) -> PlistResult<()> {
        match value.serialize(ValueSerializer)? {
            Some(v) => {
                self.items.push(v);
                Ok(())
            }
            None => Err(incompatible("none", "array element")),
        }
    }
}

impl ser::SerializeSeq for ArraySerializer {
    type Ok = Option<Value>;
    type Error = PlistError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> PlistResult<()> {
        self.push(value)
    }

    fn end(self) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Array(self.items)))
    }
}

impl ser::SerializeTuple for ArraySerializer {
    type Ok = Option<Value>;
    type Error = PlistError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> PlistResult<()> {
        self.push(value)
    }

    fn end(self) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Array(self.items)))
    }
}

impl ser::SerializeTupleStruct for ArraySerializer {
    type Ok = Option<Value>;
    type Error = PlistError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> PlistResult<()> {
        self.push(value)
    }

    fn end(self) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Array(self.items)))
    }
}

pub(crate) struct TupleVariantSerializer {
    variant: &'static str,
    array: ArraySerializer,
}

impl ser::SerializeTupleVariant for TupleVariantSerializer {
    type Ok = Option<Value>;
    type Error = PlistError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> PlistResult<()> {
        self.array.push(value)
    }

    fn end(self) -> PlistResult<Option<Value>> {
        let mut dict = Dictionary::new();
        dict.insert(self.variant, Value::Array(self.array.items));
        Ok(Some(Value::Dictionary(dict)))
    }
}

#[derive(Default)]
pub(crate) struct DictSerializer {
    dict: Dictionary,
    next_key: Option<String>,
}

impl DictSerializer {
    fn entry<T: ?Sized + Serialize>(&mut self, key: String, value: &T) -> PlistResult<()> {
        if let Some(v) = value.serialize(ValueSerializer)? {
            self.dict.insert(key, v);
        }
        Ok(())
    }
}

impl ser::SerializeMap for DictSerializer {
    type Ok = Option<Value>;
    type Error = PlistError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> PlistResult<()> {
        self.next_key = Some(key.serialize(KeySerializer)?);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> PlistResult<()> {
        let key = self
            .next_key
            .take()
            .ok_or_else(|| PlistError::Custom("map value serialized before its key".into()))?;
        self.entry(key, value)
    }

    fn end(self) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Dictionary(self.dict)))
    }
}

impl ser::SerializeStruct for DictSerializer {
    type Ok = Option<Value>;
    type Error = PlistError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> PlistResult<()> {
        self.entry(key.to_string(), value)
    }

    fn end(self) -> PlistResult<Option<Value>> {
        Ok(Some(Value::Dictionary(self.dict)))
    }
}

pub(crate) struct StructVariantSerializer {
    variant: &'static str,
    dict: DictSerializer,
}

impl ser::SerializeStructVariant for StructVariantSerializer {
    type Ok = Option<Value>;
    type Error = PlistError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> PlistResult<()> {
        self.dict.entry(key.to_string(), value)
    }

    fn end(self) -> PlistResult<Option<Value>> {
        let mut outer = Dictionary::new();
        outer.insert(self.variant, Value::Dictionary(self.dict.dict));
        Ok(Some(Value::Dictionary(outer)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Map keys
// ─────────────────────────────────────────────────────────────────────────────

/// Renders map keys: strings, numbers, booleans and unit variants are accepted.
struct KeySerializer;

fn not_a_key(kind: &'static str) -> PlistError {
    incompatible(kind, "dict key")
}

impl ser::Serializer for KeySerializer {
    type Ok = String;
    type Error = PlistError;

    type SerializeSeq = Impossible<String, PlistError>;
    type SerializeTuple = Impossible<String, PlistError>;
    type SerializeTupleStruct = Impossible<String, PlistError>;
    type SerializeTupleVariant = Impossible<String, PlistError>;
    type SerializeMap = Impossible<String, PlistError>;
    type SerializeStruct = Impossible<String, PlistError>;
    type SerializeStructVariant = Impossible<String, PlistError>;

    fn serialize_bool(self, v: bool) -> PlistResult<String> {
        Ok(v.to_string())
    }

    fn serialize_i8(self, v: i8) -> PlistResult<String> {
        Ok(v.to_string())
    }

    fn serialize_i16(self, v: i16) -> PlistResult<String> {
        Ok(v.to_string())
    }

    fn serialize_i32(self, v: i32) -> PlistResult<String> {
        Ok(v.to_string())
    }

    fn serialize_i64(self, v: i64) -> PlistResult<String> {
        Ok(v.to_string())
    }

    fn serialize_u8(self, v: u8) -> PlistResult<String> {
        Ok(v.to_string())
    }

    fn serialize_u16(self, v: u16) -> PlistResult<String> {
        Ok(v.to_string())
    }

    fn serialize_u32(self, v: u32) -> PlistResult<String> {
        Ok(v.to_string())
    }

    fn serialize_u64(self, v: u64) -> PlistResult<String> {
        Ok(v.to_string())
    }

    fn serialize_f32(self, v: f32) -> PlistResult<String> {
        Ok(v.to_string())
    }

    fn serialize_f64(self, v: f64) -> PlistResult<String> {
        Ok(v.to_string())
    }

    fn serialize_char(self, v: char) -> PlistResult<String> {
        Ok(v.to_string())
    }

    fn serialize_str(self, v: &str) -> PlistResult<String> {
        Ok(v.to_string())
    }

    fn serialize_bytes(self, _v: &[u8]) -> PlistResult<String> {
        Err(not_a_key("bytes"))
    }

    fn serialize_none(self) -> PlistResult<String> {
        Err(not_a_key("none"))
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> PlistResult<String> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> PlistResult<String> {
        Err(not_a_key("unit"))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> PlistResult<String> {
        Err(not_a_key("unit struct"))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> PlistResult<String> {
        Ok(variant.to_string())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> PlistResult<String> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> PlistResult<String> {
        Err(not_a_key("enum"))
    }

    fn serialize_seq(self, _len: Option<usize>) -> PlistResult<Self::SerializeSeq> {
        Err(not_a_key("array"))
    }

    fn serialize_tuple(self, _len: usize) -> PlistResult<Self::SerializeTuple> {
        Err(not_a_key("array"))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> PlistResult<Self::SerializeTupleStruct> {
        Err(not_a_key("array"))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> PlistResult<Self::SerializeTupleVariant> {
        Err(not_a_key("enum"))
    }

    fn serialize_map(self, _len: Option<usize>) -> PlistResult<Self::SerializeMap> {
        Err(not_a_key("dict"))
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> PlistResult<Self::SerializeStruct> {
        Err(not_a_key("dict"))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> PlistResult<Self::SerializeStructVariant> {
        Err(not_a_key("enum"))
    }
}
