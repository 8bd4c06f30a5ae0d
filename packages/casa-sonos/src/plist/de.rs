//! serde `Deserializer` over [`Value`] trees with scalar coercion.
//!
//! A stored scalar is converted into whatever the target asks for when a
//! rule exists:
//!
//! | stored  | string    | integers                         | floats                   | bool      |
//! |---------|-----------|----------------------------------|--------------------------|-----------|
//! | string  | as is     | parsed                           | parsed                   | parsed    |
//! | integer | decimal   | range-checked                    | widened                  | `> 0`     |
//! | real    | decimal   | truncated                        | as is                    | `> 0`     |
//! | boolean | `true`    | 1 / 0                            | 1 / 0                    | as is     |
//! | date    | RFC3339   | 64-bit: unix ms, 32-bit: unix s  | `f64`: unix s + fraction | rejected  |
//!
//! Struct keys match a field name exactly, then case-insensitively; keys
//! with no matching field are skipped.

use serde::de::{self, DeserializeSeed, Deserializer as _, IntoDeserializer, Visitor};

use super::error::{PlistError, PlistResult};
use super::value::{format_date, Dictionary, Value, DATE_TOKEN};

pub(crate) struct ValueDeserializer {
    value: Value,
}

impl ValueDeserializer {
    pub(crate) fn new(value: Value) -> Self {
        Self { value }
    }
}

fn incompatible(value: &Value, to: &'static str) -> PlistError {
    PlistError::IncompatibleType {
        from: value.kind(),
        to,
    }
}

/// How a `<date>` converts into an integer target.
#[derive(Clone, Copy)]
enum DateAs {
    Millis,
    Seconds,
    Rejected,
}

fn integer(value: Value, to: &'static str, date: DateAs) -> PlistResult<i128> {
    match value {
        Value::Integer(i) => Ok(i),
        Value::String(s) => s.trim().parse().map_err(|_| PlistError::InvalidScalar {
            kind: to,
            value: s,
        }),
        Value::Real(f) => Ok(f.trunc() as i128),
        Value::Boolean(b) => Ok(i128::from(b)),
        Value::Date(dt) => match date {
            DateAs::Millis => Ok(dt.timestamp_millis().into()),
            DateAs::Seconds => Ok(dt.timestamp().into()),
            DateAs::Rejected => Err(PlistError::IncompatibleType { from: "date", to }),
        },
        other => Err(incompatible(&other, to)),
    }
}

fn float(value: Value, to: &'static str, dates: bool) -> PlistResult<f64> {
    match value {
        Value::Real(f) => Ok(f),
        Value::Integer(i) => Ok(i as f64),
        Value::String(s) => s.trim().parse().map_err(|_| PlistError::InvalidScalar {
            kind: to,
            value: s,
        }),
        Value::Boolean(b) => Ok(if b { 1.0 } else { 0.0 }),
        Value::Date(dt) if dates => {
            Ok(dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9)
        }
        other => Err(incompatible(&other, to)),
    }
}

fn string(value: Value) -> PlistResult<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Real(f) => Ok(f.to_string()),
        Value::Boolean(b) => Ok(b.to_string()),
        Value::Date(dt) => Ok(format_date(&dt)),
        other => Err(incompatible(&other, "string")),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Maps a dictionary key onto the struct field it names.
fn canonical_field(key: String, fields: &'static [&'static str]) -> String {
    if fields.contains(&key.as_str()) {
        return key;
    }
    let lower = key.to_lowercase();
    fields
        .iter()
        .find(|f| f.to_lowercase() == lower)
        .map(|f| (*f).to_string())
        .unwrap_or(key)
}

macro_rules! deserialize_integer {
    ($method:ident, $visit:ident, $ty:ty, $date:expr) => {
        fn $method<V: Visitor<'de>>(self, visitor: V) -> PlistResult<V::Value> {
            let n = integer(self.value, stringify!($ty), $date)?;
            let n = <$ty>::try_from(n).map_err(|_| PlistError::InvalidScalar {
                kind: stringify!($ty),
                value: n.to_string(),
            })?;
            visitor.$visit(n)
        }
    };
}

impl<'de> de::Deserializer<'de> for ValueDeserializer {
    type Error = PlistError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> PlistResult<V::Value> {
        match self.value {
            Value::String(s) => visitor.visit_string(s),
            Value::Integer(i) => {
                if let Ok(v) = i64::try_from(i) {
                    visitor.visit_i64(v)
                } else if let Ok(v) = u64::try_from(i) {
                    visitor.visit_u64(v)
                } else {
                    visitor.visit_i128(i)
                }
            }
            Value::Real(f) => visitor.visit_f64(f),
            Value::Boolean(b) => visitor.visit_bool(b),
            Value::Date(dt) => visitor.visit_string(format_date(&dt)),
            Value::Array(items) => visitor.visit_seq(ArrayAccess::new(items)),
            Value::Dictionary(dict) => visitor.visit_map(DictAccess::new(dict, None)),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> PlistResult<V::Value> {
        let b = match self.value {
            Value::Boolean(b) => b,
            Value::Integer(i) => i > 0,
            Value::Real(f) => f > 0.0,
            Value::String(s) => match parse_bool(&s) {
                Some(b) => b,
                None => {
                    return Err(PlistError::InvalidScalar {
                        kind: "bool",
                        value: s,
                    })
                }
            },
            other => return Err(incompatible(&other, "bool")),
        };
        visitor.visit_bool(b)
    }

    deserialize_integer!(deserialize_i8, visit_i8, i8, DateAs::Rejected);
    deserialize_integer!(deserialize_i16, visit_i16, i16, DateAs::Rejected);
    deserialize_integer!(deserialize_i32, visit_i32, i32, DateAs::Seconds);
    deserialize_integer!(deserialize_i64, visit_i64, i64, DateAs::Millis);
    deserialize_integer!(deserialize_i128, visit_i128, i128, DateAs::Millis);
    deserialize_integer!(deserialize_u8, visit_u8, u8, DateAs::Rejected);
    deserialize_integer!(deserialize_u16, visit_u16, u16, DateAs::Rejected);
    deserialize_integer!(deserialize_u32, visit_u32, u32, DateAs::Seconds);
    deserialize_integer!(deserialize_u64, visit_u64, u64, DateAs::Millis);
    deserialize_integer!(deserialize_u128, visit_u128, u128, DateAs::Millis);

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> PlistResult<V::Value> {
        visitor.visit_f32(float(self.value, "f32", false)? as f32)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> PlistResult<V::Value> {
        visitor.visit_f64(float(self.value, "f64", true)?)
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> PlistResult<V::Value> {
        let s = string(self.value)?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => visitor.visit_char(c),
            _ => Err(PlistError::InvalidScalar {
                kind: "char",
                value: s,
            }),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> PlistResult<V::Value> {
        visitor.visit_string(string(self.value)?)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> PlistResult<V::Value> {
        visitor.visit_string(string(self.value)?)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> PlistResult<V::Value> {
        match self.value {
            Value::String(s) => visitor.visit_byte_buf(s.into_bytes()),
            Value::Array(items) => visitor.visit_seq(ArrayAccess::new(items)),
            other => Err(incompatible(&other, "bytes")),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> PlistResult<V::Value> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> PlistResult<V::Value> {
        visitor.visit_some(self)
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> PlistResult<V::Value> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> PlistResult<V::Value> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        visitor: V,
    ) -> PlistResult<V::Value> {
        if name != DATE_TOKEN {
            return visitor.visit_newtype_struct(self);
        }
        match self.value {
            Value::Date(dt) => visitor.visit_string(format_date(&dt)),
            Value::String(s) => visitor.visit_string(s),
            other => Err(incompatible(&other, "date")),
        }
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> PlistResult<V::Value> {
        match self.value {
            Value::Array(items) => visitor.visit_seq(ArrayAccess::new(items)),
            other => Err(incompatible(&other, "array")),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> PlistResult<V::Value> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> PlistResult<V::Value> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> PlistResult<V::Value> {
        match self.value {
            Value::Dictionary(dict) => visitor.visit_map(DictAccess::new(dict, None)),
            other => Err(incompatible(&other, "dict")),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> PlistResult<V::Value> {
        match self.value {
            Value::Dictionary(dict) => visitor.visit_map(DictAccess::new(dict, Some(fields))),
            other => Err(incompatible(&other, "struct")),
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> PlistResult<V::Value> {
        match self.value {
            Value::String(s) => visitor.visit_enum(s.into_deserializer()),
            Value::Dictionary(dict) if dict.len() == 1 => {
                let mut entries = dict.into_iter();
                match entries.next() {
                    Some((variant, value)) => visitor.visit_enum(EnumAccess { variant, value }),
                    None => Err(PlistError::Custom("empty enum dictionary".into())),
                }
            }
            other => Err(incompatible(&other, "enum")),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> PlistResult<V::Value> {
        self.deserialize_string(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> PlistResult<V::Value> {
        visitor.visit_unit()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Access helpers
// ─────────────────────────────────────────────────────────────────────────────

struct ArrayAccess {
    items: std::vec::IntoIter<Value>,
}

impl ArrayAccess {
    fn new(items: Vec<Value>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }
}

impl<'de> de::SeqAccess<'de> for ArrayAccess {
    type Error = PlistError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> PlistResult<Option<T::Value>> {
        match self.items.next() {
            Some(value) => seed.deserialize(ValueDeserializer::new(value)).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.items.len())
    }
}

struct DictAccess {
    entries: std::vec::IntoIter<(String, Value)>,
    pending: Option<Value>,
    fields: Option<&'static [&'static str]>,
}

impl DictAccess {
    fn new(dict: Dictionary, fields: Option<&'static [&'static str]>) -> Self {
        Self {
            entries: dict.into_iter(),
            pending: None,
            fields,
        }
    }
}

impl<'de> de::MapAccess<'de> for DictAccess {
    type Error = PlistError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> PlistResult<Option<K::Value>> {
        let Some((key, value)) = self.entries.next() else {
            return Ok(None);
        };
        self.pending = Some(value);
        let key = match self.fields {
            Some(fields) => canonical_field(key, fields),
            None => key,
        };
        // Keys go through the same coercions, so `HashMap<i64, _>` works.
        seed.deserialize(ValueDeserializer::new(Value::String(key)))
            .map(Some)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> PlistResult<V::Value> {
        let value = self
            .pending
            .take()
            .ok_or_else(|| PlistError::Custom("dictionary value requested before key".into()))?;
        seed.deserialize(ValueDeserializer::new(value))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.entries.len())
    }
}

struct EnumAccess {
    variant: String,
    value: Value,
}

impl<'de> de::EnumAccess<'de> for EnumAccess {
    type Error = PlistError;
    type Variant = VariantAccess;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> PlistResult<(V::Value, VariantAccess)> {
        let variant = seed.deserialize(ValueDeserializer::new(Value::String(self.variant)))?;
        Ok((variant, VariantAccess { value: self.value }))
    }
}

struct VariantAccess {
    value: Value,
}

impl<'de> de::VariantAccess<'de> for VariantAccess {
    type Error = PlistError;

    fn unit_variant(self) -> PlistResult<()> {
        Ok(())
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> PlistResult<T::Value> {
        seed.deserialize(ValueDeserializer::new(self.value))
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> PlistResult<V::Value> {
        de::Deserializer::deserialize_seq(ValueDeserializer::new(self.value), visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> PlistResult<V::Value> {
        de::Deserializer::deserialize_struct(
            ValueDeserializer::new(self.value),
            "",
            fields,
            visitor,
        )
    }
}
