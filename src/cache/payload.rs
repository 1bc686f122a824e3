//! Payload decoding.
//!
//! [`decode`] classifies a raw MQTT payload: a JSON object becomes
//! [`Decoded::Structured`], any other UTF-8 text [`Decoded::Raw`], and
//! everything else [`Decoded::Undecodable`].
//!
//! Objects are deserialized in full with `serde-json-core` before any field
//! is exposed, so a payload that is only partly valid JSON never yields
//! fields. Members whose key or value exceeds the configured capacity are
//! dropped and counted instead of failing the whole object.

use core::fmt::{self, Write as _};

use heapless::{LinearMap, String};
use serde::de::{self, Deserialize, DeserializeSeed, Deserializer, MapAccess, SeqAccess, Visitor};

/// Nesting limit for objects and arrays, bounding stack use while decoding.
pub const MAX_DEPTH: usize = 16;

/// Longest escaped JSON string a payload may carry, in bytes after unescaping.
pub const MAX_ESCAPED_LEN: usize = 256;

/// A cached value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<const N: usize> {
    Null,
    Bool(bool),
    Number(f64),
    Text(String<N>),
    /// Nested object or array, as compact JSON text.
    Json(String<N>),
}

impl<const N: usize> Value<N> {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Json(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }
}

impl<'de, const N: usize> Deserialize<'de> for Value<N> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match ValueSeed::<N>::member().deserialize(deserializer)? {
            Bounded::Fits(value) => Ok(value),
            Bounded::TooLong => Err(de::Error::custom("value exceeds capacity")),
        }
    }
}

/// Classification of a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<'a, const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize> {
    Structured(Fields<ENTRIES, KEY_LEN, VALUE_LEN>),
    Raw(&'a str),
    Undecodable(&'a [u8]),
}

pub fn decode<const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize>(
    payload: &[u8],
) -> Decoded<'_, ENTRIES, KEY_LEN, VALUE_LEN> {
    let Ok(text) = core::str::from_utf8(payload) else {
        return Decoded::Undecodable(payload);
    };
    let mut scratch = [0u8; MAX_ESCAPED_LEN];
    match serde_json_core::from_slice_escaped::<Fields<ENTRIES, KEY_LEN, VALUE_LEN>>(
        payload,
        &mut scratch,
    ) {
        Ok((fields, _)) => Decoded::Structured(fields),
        Err(_) => {
            trace!("Payload is not a JSON object");
            Decoded::Raw(text)
        }
    }
}

/// The members of one JSON object, in source order.
///
/// Duplicate keys keep their last value.
#[derive(Debug, Clone, PartialEq)]
pub struct Fields<const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize> {
    entries: LinearMap<String<KEY_LEN>, Value<VALUE_LEN>, ENTRIES>,
    skipped: usize,
}

impl<const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize>
    Fields<ENTRIES, KEY_LEN, VALUE_LEN>
{
    pub fn get(&self, key: &str) -> Option<&Value<VALUE_LEN>> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value<VALUE_LEN>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Members dropped because their key, their value or the member count
    /// exceeded capacity.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize> IntoIterator
    for Fields<ENTRIES, KEY_LEN, VALUE_LEN>
{
    type Item = (String<KEY_LEN>, Value<VALUE_LEN>);
    type IntoIter = <LinearMap<String<KEY_LEN>, Value<VALUE_LEN>, ENTRIES> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'de, const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize> Deserialize<'de>
    for Fields<ENTRIES, KEY_LEN, VALUE_LEN>
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(FieldsVisitor::<ENTRIES, KEY_LEN, VALUE_LEN>)
    }
}

struct FieldsVisitor<const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize>;

impl<'de, const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize> Visitor<'de>
    for FieldsVisitor<ENTRIES, KEY_LEN, VALUE_LEN>
{
    type Value = Fields<ENTRIES, KEY_LEN, VALUE_LEN>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut fields = Fields {
            entries: LinearMap::new(),
            skipped: 0,
        };
        while let Some(key) = map.next_key::<Bounded<String<KEY_LEN>>>()? {
            let value = map.next_value_seed(ValueSeed::<VALUE_LEN>::member())?;
            let (Bounded::Fits(key), Bounded::Fits(value)) = (key, value) else {
                warn!("Field exceeds {}/{} bytes, skipped", KEY_LEN, VALUE_LEN);
                fields.skipped += 1;
                continue;
            };
            if let Err((_key, _)) = fields.entries.insert(key, value) {
                warn!("Field {} skipped, {} fields max", _key.as_str(), ENTRIES);
                fields.skipped += 1;
            }
        }
        Ok(fields)
    }
}

/// A decoded item, or the marker that it did not fit its buffer.
#[derive(Debug, Clone, PartialEq)]
enum Bounded<T> {
    Fits(T),
    TooLong,
}

impl<'de, const N: usize> Deserialize<'de> for Bounded<String<N>> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(KeyVisitor::<N>)
    }
}

struct KeyVisitor<const N: usize>;

impl<'de, const N: usize> Visitor<'de> for KeyVisitor<N> {
    type Value = Bounded<String<N>>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string key")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(String::try_from(v).map_or(Bounded::TooLong, Bounded::Fits))
    }
}

/// Deserializes any JSON value into a [`Value`] holding at most `N` bytes of text.
#[derive(Clone, Copy)]
struct ValueSeed<const N: usize> {
    depth: usize,
}

impl<const N: usize> ValueSeed<N> {
    /// Seed for a member of the top-level object.
    fn member() -> Self {
        Self { depth: 1 }
    }

    fn nested<E: de::Error>(self) -> Result<Self, E> {
        if self.depth >= MAX_DEPTH {
            return Err(E::custom("nesting too deep"));
        }
        Ok(Self {
            depth: self.depth + 1,
        })
    }
}

impl<'de, const N: usize> DeserializeSeed<'de> for ValueSeed<N> {
    type Value = Bounded<Value<N>>;

    fn deserialize<D>(self, deserializer: D) -> Result<Bounded<Value<N>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }
}

impl<'de, const N: usize> Visitor<'de> for ValueSeed<N> {
    type Value = Bounded<Value<N>>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Bounded<Value<N>>, E> {
        Ok(Bounded::Fits(Value::Null))
    }

    fn visit_none<E: de::Error>(self) -> Result<Bounded<Value<N>>, E> {
        Ok(Bounded::Fits(Value::Null))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Bounded<Value<N>>, E> {
        Ok(Bounded::Fits(Value::Bool(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Bounded<Value<N>>, E> {
        Ok(Bounded::Fits(Value::Number(v as f64)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Bounded<Value<N>>, E> {
        Ok(Bounded::Fits(Value::Number(v as f64)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Bounded<Value<N>>, E> {
        Ok(Bounded::Fits(Value::Number(v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Bounded<Value<N>>, E> {
        Ok(String::try_from(v).map_or(Bounded::TooLong, |s| Bounded::Fits(Value::Text(s))))
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Bounded<Value<N>>, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let inner = self.nested::<A::Error>()?;
        let mut out = CompactJson::<N>::new();
        out.raw("[");
        let mut first = true;
        while let Some(item) = seq.next_element_seed(inner)? {
            if !first {
                out.raw(",");
            }
            first = false;
            out.value(&item);
        }
        out.raw("]");
        Ok(out.finish())
    }

    fn visit_map<A>(self, mut map: A) -> Result<Bounded<Value<N>>, A::Error>
    where
        A: MapAccess<'de>,
    {
        let inner = self.nested::<A::Error>()?;
        let mut out = CompactJson::<N>::new();
        out.raw("{");
        let mut first = true;
        while let Some(key) = map.next_key::<Bounded<String<N>>>()? {
            let value = map.next_value_seed(inner)?;
            if !first {
                out.raw(",");
            }
            first = false;
            match key {
                Bounded::Fits(key) => out.string(&key),
                Bounded::TooLong => out.overflow = true,
            }
            out.raw(":");
            out.value(&value);
        }
        out.raw("}");
        Ok(out.finish())
    }
}

/// Compact JSON text rebuilt from visited values. Overflow is sticky so the
/// remaining input is still consumed.
struct CompactJson<const N: usize> {
    text: String<N>,
    overflow: bool,
}

impl<const N: usize> CompactJson<N> {
    fn new() -> Self {
        Self {
            text: String::new(),
            overflow: false,
        }
    }

    fn raw(&mut self, s: &str) {
        if !self.overflow && self.text.push_str(s).is_err() {
            self.overflow = true;
        }
    }

    fn string(&mut self, s: &str) {
        let mut buf = [0u8; N];
        match serde_json_core::to_slice(s, &mut buf) {
            Ok(n) => match core::str::from_utf8(&buf[..n]) {
                Ok(quoted) => self.raw(quoted),
                Err(_) => self.overflow = true,
            },
            Err(_) => self.overflow = true,
        }
    }

    fn value(&mut self, value: &Bounded<Value<N>>) {
        match value {
            Bounded::TooLong => self.overflow = true,
            Bounded::Fits(Value::Null) => self.raw("null"),
            Bounded::Fits(Value::Bool(b)) => self.raw(if *b { "true" } else { "false" }),
            Bounded::Fits(Value::Number(n)) => {
                if !self.overflow && write!(self.text, "{}", n).is_err() {
                    self.overflow = true;
                }
            }
            Bounded::Fits(Value::Text(s)) => self.string(s),
            Bounded::Fits(Value::Json(s)) => self.raw(s),
        }
    }

    fn finish(self) -> Bounded<Value<N>> {
        if self.overflow {
            Bounded::TooLong
        } else {
            Bounded::Fits(Value::Json(self.text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String as StdString;

    type Small<'a> = Decoded<'a, 8, 16, 32>;

    fn structured(text: &str) -> Fields<8, 16, 32> {
        match decode(text.as_bytes()) {
            Small::Structured(fields) => fields,
            other => panic!("expected structured payload, got {other:?}"),
        }
    }

    fn text(s: &str) -> Value<32> {
        Value::Text(String::try_from(s).unwrap())
    }

    fn json(s: &str) -> Value<32> {
        Value::Json(String::try_from(s).unwrap())
    }

    #[test]
    fn sensor_object_is_structured() {
        let fields = structured(r#"{"temp": 21.5, "humidity": 60}"#);
        let members: std::vec::Vec<_> = fields.iter().map(|(k, v)| (k, v.clone())).collect();
        assert_eq!(
            members,
            [("temp", Value::Number(21.5)), ("humidity", Value::Number(60.0))]
        );
        assert_eq!(fields.skipped(), 0);
    }

    #[test]
    fn plain_text_is_raw() {
        assert_eq!(decode(b"21.5 C"), Small::Raw("21.5 C"));
    }

    #[test]
    fn json_scalars_and_arrays_are_raw() {
        assert_eq!(decode(b"42"), Small::Raw("42"));
        assert_eq!(decode(b"[1, 2]"), Small::Raw("[1, 2]"));
        assert_eq!(decode(b"\"on\""), Small::Raw("\"on\""));
    }

    #[test]
    fn invalid_utf8_is_undecodable() {
        let payload = b"\xff\xfe not utf8";
        assert_eq!(decode(payload), Small::Undecodable(payload));
    }

    #[test]
    fn malformed_objects_are_rejected_whole() {
        for text in [
            "{",
            "{\"a\" 1}",
            "{\"a\": tru}",
            "{\"a\": 1} trailing",
            "{a: 1}",
            "{\"a\": 1, \"b\": }",
        ] {
            assert_eq!(decode(text.as_bytes()), Small::Raw(text), "accepted {text:?}");
        }
    }

    #[test]
    fn value_kinds() {
        let fields = structured(r#" { "n": null, "t": true, "f": false, "s": "x", "e": -1.5e3 } "#);
        assert_eq!(fields.get("n"), Some(&Value::Null));
        assert_eq!(fields.get("t"), Some(&Value::Bool(true)));
        assert_eq!(fields.get("f"), Some(&Value::Bool(false)));
        assert_eq!(fields.get("s"), Some(&text("x")));
        assert_eq!(fields.get("e"), Some(&Value::Number(-1500.0)));
    }

    #[test]
    fn nested_values_become_compact_json() {
        let fields = structured(r#"{"pos": {"x": 1, "y": [2, 3]}, "tag": {"s": "a b"}, "ok": true}"#);
        assert_eq!(fields.get("pos"), Some(&json(r#"{"x":1,"y":[2,3]}"#)));
        assert_eq!(fields.get("tag"), Some(&json(r#"{"s":"a b"}"#)));
        assert_eq!(fields.get("ok"), Some(&Value::Bool(true)));
    }

    #[test]
    fn escapes_are_resolved() {
        let fields = structured(r#"{"k\"ey": "tab\there é"}"#);
        assert_eq!(fields.get("k\"ey"), Some(&text("tab\there é")));
    }

    #[test]
    fn duplicate_keys_keep_last_value() {
        let fields = structured(r#"{"k": 1, "k": "two"}"#);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("k"), Some(&text("two")));
    }

    #[test]
    fn oversized_members_are_counted_not_fatal() {
        let Decoded::<2, 4, 8>::Structured(fields) =
            decode(br#"{"a": 1, "toolong": 2, "b": "0123456789", "c": 3, "d": 4}"#)
        else {
            panic!("expected structured payload");
        };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.skipped(), 3);
        assert_eq!(fields.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(fields.get("c"), Some(&Value::Number(3.0)));
    }

    #[test]
    fn oversized_nested_value_keeps_later_members() {
        let Decoded::<4, 4, 8>::Structured(fields) = decode(br#"{"p": [1, 2, 3, 4, 5], "q": 1}"#)
        else {
            panic!("expected structured payload");
        };
        assert_eq!(fields.skipped(), 1);
        assert_eq!(fields.get("p"), None);
        assert_eq!(fields.get("q"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn nesting_is_bounded() {
        let nested = |levels: usize| {
            let mut text = StdString::from("{\"a\":");
            text.extend(core::iter::repeat_n('[', levels));
            text.extend(core::iter::repeat_n(']', levels));
            text.push('}');
            text
        };

        let deep = nested(MAX_DEPTH);
        assert_eq!(decode::<8, 16, 64>(deep.as_bytes()), Decoded::Raw(deep.as_str()));

        let fields = match decode::<8, 16, 64>(nested(MAX_DEPTH - 1).as_bytes()) {
            Decoded::Structured(fields) => fields,
            other => panic!("expected structured payload, got {other:?}"),
        };
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn empty_object_has_no_fields() {
        let fields = structured("{ }");
        assert!(fields.is_empty());
        assert_eq!(fields.len(), 0);
    }

    #[test]
    fn value_deserializes_standalone() {
        let (value, _) = serde_json_core::from_str::<Value<16>>("[1, \"a\"]").unwrap();
        assert_eq!(value, Value::Json(String::try_from(r#"[1,"a"]"#).unwrap()));
        assert!(serde_json_core::from_str::<Value<2>>("\"abc\"").is_err());
    }
}
