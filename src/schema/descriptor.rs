//! The Schema Descriptor: the data-driven description of every type that takes part in the format.
//!
//! A descriptor is produced by any front end (hand-written declarations, a schema file, a build
//! step) and handed to [`RegistryBuilder`](crate::registry::RegistryBuilder), which validates it
//! once and resolves it into layout plans. The core never inspects source syntax.
//!
//! Property indices are explicit and may have gaps: a property that is removed from a type leaves
//! its index retired, and new properties take fresh indices. That is what keeps older payloads
//! readable by newer schemas and vice versa.

use crate::error::{Result, SegcodeError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Primitive, fixed-width scalar kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    /// 1 byte, `0` or `1`.
    Bool,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 64-bit integer.
    U64,
    /// Signed 64-bit integer.
    I64,
    /// IEEE-754 single precision.
    F32,
    /// IEEE-754 double precision.
    F64,
    /// A Unicode scalar value, stored as 4 bytes.
    Char,
}

impl PrimitiveKind {
    /// Encoded width in bytes.
    pub const fn width(self) -> usize {
        match self {
            Self::Bool | Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 | Self::Char => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    /// True for the integer kinds that may back an enum.
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::U8 | Self::I8 | Self::U16 | Self::I16 | Self::U32 | Self::I32 | Self::U64 | Self::I64
        )
    }

    /// True for the signed integer kinds.
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    /// Lower-case name used in messages.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::U16 => "u16",
            Self::I16 => "i16",
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::U64 => "u64",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Char => "char",
        }
    }
}

/// An enum type. Values are stored as their raw underlying integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumDescriptor {
    /// Enum name, for messages.
    pub name: String,
    /// Storage type; its width (1/2/4/8 bytes) is the encoded width of the enum.
    pub storage: PrimitiveKind,
}

impl EnumDescriptor {
    /// Creates an enum descriptor backed by the given integer storage type.
    pub fn new(name: impl Into<String>, storage: PrimitiveKind) -> Self {
        Self {
            name: name.into(),
            storage,
        }
    }

    /// Encoded width in bytes.
    pub fn width(&self) -> usize {
        self.storage.width()
    }
}

/// The generic container shapes the format accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerKind {
    /// Index-addressable list.
    List,
    /// Ordered key/value entries.
    Dictionary,
    /// Key to group-of-values entries.
    Lookup,
    /// Heterogeneous, fixed-arity tuple.
    KeyTuple,
}

/// A reference to the type of a property, container element or tuple member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    /// A fixed-width scalar.
    Primitive(PrimitiveKind),
    /// An enum, fixed-width.
    Enum(EnumDescriptor),
    /// A nullable wrapper around a fixed-width primitive or enum.
    Nullable(Box<TypeRef>),
    /// A UTF-8 string.
    String,
    /// A byte array.
    Bytes,
    /// A registered object type, by name.
    Object(String),
    /// A lazily addressable list.
    List(Box<TypeRef>),
    /// A lazily addressable dictionary.
    Dictionary(Box<TypeRef>, Box<TypeRef>),
    /// A lazily addressable lookup (key to many values).
    Lookup(Box<TypeRef>, Box<TypeRef>),
    /// A tuple of members.
    KeyTuple(Vec<TypeRef>),
    /// An eagerly materialized list. Rejected by the type policy.
    EagerList(Box<TypeRef>),
    /// An eagerly materialized dictionary. Rejected by the type policy.
    EagerDictionary(Box<TypeRef>, Box<TypeRef>),
    /// A plain array. Only arrays of `u8` are accepted (as bytes).
    Array(Box<TypeRef>),
}

impl TypeRef {
    /// `bool`
    pub const BOOL: TypeRef = TypeRef::Primitive(PrimitiveKind::Bool);
    /// `u8`
    pub const U8: TypeRef = TypeRef::Primitive(PrimitiveKind::U8);
    /// `i8`
    pub const I8: TypeRef = TypeRef::Primitive(PrimitiveKind::I8);
    /// `u16`
    pub const U16: TypeRef = TypeRef::Primitive(PrimitiveKind::U16);
    /// `i16`
    pub const I16: TypeRef = TypeRef::Primitive(PrimitiveKind::I16);
    /// `u32`
    pub const U32: TypeRef = TypeRef::Primitive(PrimitiveKind::U32);
    /// `i32`
    pub const I32: TypeRef = TypeRef::Primitive(PrimitiveKind::I32);
    /// `u64`
    pub const U64: TypeRef = TypeRef::Primitive(PrimitiveKind::U64);
    /// `i64`
    pub const I64: TypeRef = TypeRef::Primitive(PrimitiveKind::I64);
    /// `f32`
    pub const F32: TypeRef = TypeRef::Primitive(PrimitiveKind::F32);
    /// `f64`
    pub const F64: TypeRef = TypeRef::Primitive(PrimitiveKind::F64);
    /// `char`
    pub const CHAR: TypeRef = TypeRef::Primitive(PrimitiveKind::Char);

    /// A reference to a registered object type.
    pub fn object(name: impl Into<String>) -> Self {
        Self::Object(name.into())
    }

    /// A nullable wrapper.
    pub fn nullable(inner: TypeRef) -> Self {
        Self::Nullable(Box::new(inner))
    }

    /// An enum backed by `storage`.
    pub fn enumeration(name: impl Into<String>, storage: PrimitiveKind) -> Self {
        Self::Enum(EnumDescriptor::new(name, storage))
    }

    /// A list of `element`.
    pub fn list(element: TypeRef) -> Self {
        Self::List(Box::new(element))
    }

    /// A dictionary from `key` to `value`.
    pub fn dictionary(key: TypeRef, value: TypeRef) -> Self {
        Self::Dictionary(Box::new(key), Box::new(value))
    }

    /// A lookup from `key` to groups of `value`.
    pub fn lookup(key: TypeRef, value: TypeRef) -> Self {
        Self::Lookup(Box::new(key), Box::new(value))
    }

    /// A tuple of `members`.
    pub fn key_tuple(members: Vec<TypeRef>) -> Self {
        Self::KeyTuple(members)
    }

    /// The container shape of this reference, if it is one of the permitted containers.
    pub fn container_kind(&self) -> Option<ContainerKind> {
        match self {
            Self::List(_) => Some(ContainerKind::List),
            Self::Dictionary(..) => Some(ContainerKind::Dictionary),
            Self::Lookup(..) => Some(ContainerKind::Lookup),
            Self::KeyTuple(_) => Some(ContainerKind::KeyTuple),
            _ => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => f.write_str(p.name()),
            Self::Enum(e) => write!(f, "enum {}:{}", e.name, e.storage.name()),
            Self::Nullable(inner) => write!(f, "{inner}?"),
            Self::String => f.write_str("string"),
            Self::Bytes => f.write_str("bytes"),
            Self::Object(name) => f.write_str(name),
            Self::List(e) => write!(f, "list<{e}>"),
            Self::Dictionary(k, v) => write!(f, "dictionary<{k}, {v}>"),
            Self::Lookup(k, v) => write!(f, "lookup<{k}, {v}>"),
            Self::KeyTuple(members) => {
                f.write_str("(")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{m}")?;
                }
                f.write_str(")")
            }
            Self::EagerList(e) => write!(f, "eager list<{e}>"),
            Self::EagerDictionary(k, v) => write!(f, "eager dictionary<{k}, {v}>"),
            Self::Array(e) => write!(f, "[{e}]"),
        }
    }
}

/// One property of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Property name.
    pub name: String,
    /// Explicit, stable index. Never reuse an index for a different meaning.
    pub index: u32,
    /// Declared type.
    pub type_ref: TypeRef,
    /// Wrap the property in a lazily decoded cache segment.
    pub cached: bool,
}

impl PropertyDescriptor {
    /// Creates a plain property.
    pub fn new(index: u32, name: impl Into<String>, type_ref: TypeRef) -> Self {
        Self {
            name: name.into(),
            index,
            type_ref,
            cached: false,
        }
    }

    /// Marks the property as cache-eligible (decoded on first access).
    pub fn cached(mut self) -> Self {
        self.cached = true;
        self
    }
}

/// An object type: a name and its explicitly indexed properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Type name, unique within a schema.
    pub name: String,
    /// Declared properties, in any order.
    pub properties: Vec<PropertyDescriptor>,
}

impl TypeDescriptor {
    /// Creates a type with no properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    /// Adds a plain property.
    pub fn property(mut self, index: u32, name: impl Into<String>, type_ref: TypeRef) -> Self {
        self.properties
            .push(PropertyDescriptor::new(index, name, type_ref));
        self
    }

    /// Adds a cache-eligible property.
    pub fn cached_property(
        mut self,
        index: u32,
        name: impl Into<String>,
        type_ref: TypeRef,
    ) -> Self {
        self.properties
            .push(PropertyDescriptor::new(index, name, type_ref).cached());
        self
    }

    /// The highest declared index, or `None` for a type without properties.
    pub fn last_index(&self) -> Option<u32> {
        self.properties.iter().map(|p| p.index).max()
    }

    /// Finds a property by index.
    pub fn by_index(&self, index: u32) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.index == index)
    }
}

/// A complete schema: every type the registry should know about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    /// Object types.
    pub types: Vec<TypeDescriptor>,
}

impl SchemaDescriptor {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a type.
    pub fn with_type(mut self, ty: TypeDescriptor) -> Self {
        self.types.push(ty);
        self
    }

    /// Finds a type by name.
    pub fn find(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Persists the descriptor with bincode's standard configuration.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| SegcodeError::Serialization(e.to_string()))
    }

    /// Restores a descriptor written by [`SchemaDescriptor::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(schema, _)| schema)
            .map_err(|e| SegcodeError::Serialization(e.to_string()))
    }
}
