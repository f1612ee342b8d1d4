//! The dynamic value model.
//!
//! Formatters decode into [`Value`] and encode from it. Object-typed values are
//! [`ObjectSegment`]s, so a decoded object is itself a lazy view rather than a fully decoded tree.

use crate::segment::ObjectSegment;
use std::ops::Deref;

/// A decoded (or to-be-encoded) value of any supported shape.
#[derive(Debug, PartialEq)]
pub enum Value {
    /// Absent reference, or an empty nullable.
    Null,
    /// `bool`
    Bool(bool),
    /// `u8`
    U8(u8),
    /// `i8`
    I8(i8),
    /// `u16`
    U16(u16),
    /// `i16`
    I16(i16),
    /// `u32`
    U32(u32),
    /// `i32`
    I32(i32),
    /// `u64`
    U64(u64),
    /// `i64`
    I64(i64),
    /// `f32`
    F32(f32),
    /// `f64`
    F64(f64),
    /// `char`
    Char(char),
    /// Raw underlying integer of an enum value.
    Enum(i64),
    /// A string.
    Str(String),
    /// A byte array.
    Bytes(Vec<u8>),
    /// A nested object, as a lazy segment.
    Object(Box<ObjectSegment>),
    /// List elements.
    List(Vec<Value>),
    /// Dictionary entries, in encoded order.
    Dict(Vec<(Value, Value)>),
    /// Lookup groups, in encoded order.
    Lookup(Vec<(Value, Vec<Value>)>),
    /// Tuple members.
    Tuple(Vec<Value>),
}

impl Value {
    /// Builds a list from anything convertible into values.
    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Short name of the variant, used in type mismatch messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::U8(_) => "u8",
            Self::I8(_) => "i8",
            Self::U16(_) => "u16",
            Self::I16(_) => "i16",
            Self::U32(_) => "u32",
            Self::I32(_) => "i32",
            Self::U64(_) => "u64",
            Self::I64(_) => "i64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Char(_) => "char",
            Self::Enum(_) => "enum",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Object(_) => "object",
            Self::List(_) => "list",
            Self::Dict(_) => "dictionary",
            Self::Lookup(_) => "lookup",
            Self::Tuple(_) => "tuple",
        }
    }

    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns any signed or unsigned integer (or enum) that fits in an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::U8(v) => Some(i64::from(v)),
            Self::I8(v) => Some(i64::from(v)),
            Self::U16(v) => Some(i64::from(v)),
            Self::I16(v) => Some(i64::from(v)),
            Self::U32(v) => Some(i64::from(v)),
            Self::I32(v) => Some(i64::from(v)),
            Self::U64(v) => i64::try_from(v).ok(),
            Self::I64(v) | Self::Enum(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the `i32`, if this is one.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns a floating point value, widening `f32`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F32(v) => Some(f64::from(*v)),
            Self::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string slice, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bytes, if this is a byte array.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the elements of a list or the members of a tuple.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) | Self::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Mutable access to list elements or tuple members.
    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Self::List(items) | Self::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Returns dictionary entries.
    pub fn as_dict(&self) -> Option<&[(Value, Value)]> {
        match self {
            Self::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// Returns lookup groups.
    pub fn as_lookup(&self) -> Option<&[(Value, Vec<Value>)]> {
        match self {
            Self::Lookup(groups) => Some(groups),
            _ => None,
        }
    }

    /// Returns the nested object segment.
    pub fn as_object(&self) -> Option<&ObjectSegment> {
        match self {
            Self::Object(seg) => Some(seg),
            _ => None,
        }
    }

    /// Mutable access to the nested object segment.
    pub fn as_object_mut(&mut self) -> Option<&mut ObjectSegment> {
        match self {
            Self::Object(seg) => Some(seg),
            _ => None,
        }
    }
}

macro_rules! impl_from_scalar {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    }
}

impl_from_scalar!(
    bool => Bool,
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    char => Char,
    String => Str,
    Vec<u8> => Bytes,
    Vec<Value> => List,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<ObjectSegment> for Value {
    fn from(seg: ObjectSegment) -> Self {
        Self::Object(Box::new(seg))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// The result of reading a property: fixed-width values are decoded on the spot and returned by
/// value, variable values are borrowed from the segment that holds them.
#[derive(Debug)]
pub enum FieldRef<'a> {
    /// Decoded from the fixed region.
    Owned(Value),
    /// Held by the segment (plain field or memoized cache).
    Borrowed(&'a Value),
}

impl Deref for FieldRef<'_> {
    type Target = Value;

    fn deref(&self) -> &Value {
        match self {
            Self::Owned(v) => v,
            Self::Borrowed(v) => v,
        }
    }
}
