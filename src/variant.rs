//! Discriminated variant values
//!
//! [`Variant`] carries the structured data of complex properties (pictures,
//! embedded objects). The active type is fixed by the constructor; typed
//! extraction of a mismatched type yields `None` (or a default plus `false`)
//! rather than failing hard.

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

pub type VariantList = Vec<Variant>;
pub type VariantMap = BTreeMap<String, Variant>;

/// Type discriminant of a [`Variant`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantType {
    Void,
    Bool,
    Int,
    UInt,
    LongLong,
    ULongLong,
    Double,
    String,
    StringList,
    ByteVector,
    ByteVectorList,
    VariantList,
    VariantMap,
}

/// A tagged union over scalars, strings, byte vectors, lists and maps
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    #[default]
    Void,
    Bool(bool),
    Int(i32),
    UInt(u32),
    LongLong(i64),
    ULongLong(u64),
    Double(f64),
    String(String),
    StringList(Vec<String>),
    ByteVector(Vec<u8>),
    ByteVectorList(Vec<Vec<u8>>),
    List(VariantList),
    Map(VariantMap),
}

impl Variant {
    pub fn variant_type(&self) -> VariantType {
        match self {
            Variant::Void => VariantType::Void,
            Variant::Bool(_) => VariantType::Bool,
            Variant::Int(_) => VariantType::Int,
            Variant::UInt(_) => VariantType::UInt,
            Variant::LongLong(_) => VariantType::LongLong,
            Variant::ULongLong(_) => VariantType::ULongLong,
            Variant::Double(_) => VariantType::Double,
            Variant::String(_) => VariantType::String,
            Variant::StringList(_) => VariantType::StringList,
            Variant::ByteVector(_) => VariantType::ByteVector,
            Variant::ByteVectorList(_) => VariantType::ByteVectorList,
            Variant::List(_) => VariantType::VariantList,
            Variant::Map(_) => VariantType::VariantMap,
        }
    }

    /// `true` only for [`Variant::Void`]; an empty string is not empty here
    pub fn is_empty(&self) -> bool {
        matches!(self, Variant::Void)
    }

    /// The stored value if its type matches `T`
    pub fn value<T: FromVariant>(&self) -> Option<T> {
        T::from_variant(self)
    }

    /// The stored value and `true`, or `T::default()` and `false` on a type
    /// mismatch
    pub fn value_or_default<T: FromVariant>(&self) -> (T, bool) {
        match T::from_variant(self) {
            Some(value) => (value, true),
            None => (T::default(), false),
        }
    }

    pub fn to_bool(&self) -> bool {
        self.value_or_default().0
    }

    pub fn to_int(&self) -> i32 {
        self.value_or_default().0
    }

    pub fn to_uint(&self) -> u32 {
        self.value_or_default().0
    }

    pub fn to_long_long(&self) -> i64 {
        self.value_or_default().0
    }

    pub fn to_ulong_long(&self) -> u64 {
        self.value_or_default().0
    }

    pub fn to_double(&self) -> f64 {
        self.value_or_default().0
    }

    /// The string payload, or an empty string for any other type
    pub fn to_string_value(&self) -> String {
        self.value_or_default().0
    }

    pub fn to_string_list(&self) -> Vec<String> {
        self.value_or_default().0
    }

    pub fn to_byte_vector(&self) -> Vec<u8> {
        self.value_or_default().0
    }

    pub fn to_byte_vector_list(&self) -> Vec<Vec<u8>> {
        self.value_or_default().0
    }

    pub fn to_list(&self) -> VariantList {
        self.value_or_default().0
    }

    pub fn to_map(&self) -> VariantMap {
        self.value_or_default().0
    }
}

// =============================================================================
// Typed extraction
// =============================================================================

/// Types that can be extracted from a [`Variant`] of the matching kind
pub trait FromVariant: Sized + Default {
    fn from_variant(variant: &Variant) -> Option<Self>;
}

macro_rules! impl_from_variant {
    ($($ty:ty => $arm:ident,)+) => {
        $(
            impl FromVariant for $ty {
                fn from_variant(variant: &Variant) -> Option<Self> {
                    match variant {
                        Variant::$arm(v) => Some(v.clone()),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    Variant::$arm(value)
                }
            }
        )+
    };
}

impl_from_variant! {
    bool => Bool,
    i32 => Int,
    u32 => UInt,
    i64 => LongLong,
    u64 => ULongLong,
    f64 => Double,
    String => String,
    Vec<String> => StringList,
    Vec<u8> => ByteVector,
    Vec<Vec<u8>> => ByteVectorList,
    VariantList => List,
    VariantMap => Map,
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_string())
    }
}

impl From<&[u8]> for Variant {
    fn from(value: &[u8]) -> Self {
        Variant::ByteVector(value.to_vec())
    }
}

// =============================================================================
// Rendering
// =============================================================================

fn write_quoted(f: &mut impl fmt::Write, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        if c == '"' {
            f.write_str("\\\"")?;
        } else {
            f.write_char(c)?;
        }
    }
    f.write_char('"')
}

fn hex_escaped(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4);
    for b in bytes {
        let _ = write!(out, "\\x{:02x}", b);
    }
    out
}

fn write_joined<T>(
    f: &mut fmt::Formatter<'_>,
    items: &[T],
    mut write_item: impl FnMut(&mut fmt::Formatter<'_>, &T) -> fmt::Result,
) -> fmt::Result {
    f.write_char('[')?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_item(f, item)?;
    }
    f.write_char(']')
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Void => f.write_str("null"),
            Variant::Bool(v) => write!(f, "{}", v),
            Variant::Int(v) => write!(f, "{}", v),
            Variant::UInt(v) => write!(f, "{}", v),
            Variant::LongLong(v) => write!(f, "{}", v),
            Variant::ULongLong(v) => write!(f, "{}", v),
            Variant::Double(v) => write!(f, "{}", v),
            Variant::String(v) => write_quoted(f, v),
            Variant::ByteVector(v) => write!(f, "\"{}\"", hex_escaped(v)),
            Variant::StringList(list) => write_joined(f, list, |f, s| write_quoted(f, s)),
            Variant::ByteVectorList(list) => {
                write_joined(f, list, |f, b| write!(f, "\"{}\"", hex_escaped(b)))
            }
            Variant::List(list) => write_joined(f, list, |f, v| write!(f, "{}", v)),
            Variant::Map(map) => {
                f.write_char('{')?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_quoted(f, key)?;
                    write!(f, ": {}", value)?;
                }
                f.write_char('}')
            }
        }
    }
}

impl Serialize for Variant {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Variant::Void => serializer.serialize_unit(),
            Variant::Bool(v) => serializer.serialize_bool(*v),
            Variant::Int(v) => serializer.serialize_i32(*v),
            Variant::UInt(v) => serializer.serialize_u32(*v),
            Variant::LongLong(v) => serializer.serialize_i64(*v),
            Variant::ULongLong(v) => serializer.serialize_u64(*v),
            Variant::Double(v) => serializer.serialize_f64(*v),
            Variant::String(v) => serializer.serialize_str(v),
            Variant::ByteVector(v) => serializer.serialize_str(&hex_escaped(v)),
            Variant::StringList(list) => list.serialize(serializer),
            Variant::ByteVectorList(list) => {
                let mut seq = serializer.serialize_seq(Some(list.len()))?;
                for bytes in list {
                    seq.serialize_element(&hex_escaped(bytes))?;
                }
                seq.end()
            }
            Variant::List(list) => list.serialize(serializer),
            Variant::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_safe_extraction() {
        let v = Variant::from(5i32);
        assert_eq!(v.value_or_default::<String>(), (String::new(), false));
        assert_eq!(v.value_or_default::<i32>(), (5, true));
        assert_eq!(v.value::<u32>(), None);
        assert_eq!(v.to_int(), 5);
        assert_eq!(v.to_uint(), 0);
        assert_eq!(v.variant_type(), VariantType::Int);
    }

    #[test]
    fn test_void_is_distinct_from_empty_containers() {
        assert!(Variant::Void.is_empty());
        assert!(!Variant::from("").is_empty());
        assert!(!Variant::from(Vec::<u8>::new()).is_empty());
        assert_ne!(Variant::Void, Variant::from(""));
        assert_ne!(Variant::from(1i32), Variant::from(1u32));
        assert_eq!(Variant::default(), Variant::Void);
    }

    #[test]
    fn test_structural_equality() {
        let mut a = VariantMap::new();
        a.insert("list".into(), Variant::from(vec![Variant::from(1i64), Variant::Void]));
        let b = a.clone();
        assert_eq!(Variant::from(a.clone()), Variant::from(b));

        let mut c = a;
        c.insert("extra".into(), Variant::from(true));
        assert_ne!(Variant::from(c), Variant::Void);
    }

    #[test]
    fn test_rendering() {
        let mut map = VariantMap::new();
        map.insert(
            "strlist".into(),
            Variant::from(vec!["first".to_string(), "second".to_string()]),
        );
        map.insert(
            "varlist".into(),
            Variant::from(vec![
                Variant::Void,
                Variant::from(1u32),
                Variant::from(-10i64),
                Variant::from(4.32f64),
                Variant::from(false),
            ]),
        );
        map.insert("data".into(), Variant::from(vec![0xA9u8, 0x01, 0x7F]));

        assert_eq!(
            Variant::from(map).to_string(),
            r#"{"data": "\xa9\x01\x7f", "strlist": ["first", "second"], "varlist": [null, 1, -10, 4.32, false]}"#
        );
    }

    #[test]
    fn test_rendering_escapes_quotes() {
        assert_eq!(Variant::from("say \"hi\"").to_string(), r#""say \"hi\"""#);
        assert_eq!(
            Variant::from(vec![vec![0u8], vec![0xffu8]]).to_string(),
            r#"["\x00", "\xff"]"#
        );
    }

    #[test]
    fn test_json_serialization() {
        let mut map = VariantMap::new();
        map.insert("mimeType".into(), Variant::from("image/png"));
        map.insert("width".into(), Variant::from(16i32));
        let json = serde_json::to_string(&Variant::from(map)).unwrap();
        assert_eq!(json, r#"{"mimeType":"image/png","width":16}"#);
    }
}
