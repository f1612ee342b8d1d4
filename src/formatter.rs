//! Formatter dispatch.
//!
//! Every declared type resolves once, at registry build time, into a [`Formatter`]: a closed set
//! of variants that compose recursively. Each formatter answers three questions:
//!
//! * [`Formatter::fixed_len`]: the encoded width, or `None` for variable-width shapes.
//! * [`Formatter::serialize`]: append the encoding of a value.
//! * [`Formatter::deserialize`]: decode a value, returning the bytes consumed.
//!
//! ## Container Layout
//!
//! Lists, dictionaries, lookups and tuples share one layout:
//!
//! ```text
//! [ totalSize:i32 ][ count:i32 ][ entries... ]
//! ```
//!
//! When every entry is fixed-width the entries follow back to back (a fixed stride for lists and
//! dictionaries, packed members for tuples). Otherwise an offset table of `count` entries,
//! relative to the container start, precedes the payloads. A null container is a `totalSize`
//! of `-1`. Either way any entry can be located without decoding its neighbours, which is what
//! [`SequenceView`] relies on.

use crate::error::{Result, SegcodeError};
use crate::format::{
    DecodeCtx, EncodeCtx, NULL_SENTINEL, OFFSET_ENTRY_LEN, ObjectHeader, decode_object, patch_i32,
    push_i32, read_i32, slice, to_i32,
};
use crate::registry::TypeKey;
use crate::schema::{PrimitiveKind, TypeRef};
use crate::segment::detach_value;
use crate::tracker::DirtyTracker;
use crate::value::Value;
use std::collections::HashMap;

const CONTAINER_HEADER_LEN: usize = 8;
const ZEROS: [u8; 16] = [0; 16];

/// The scalar behind a fixed-width slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixedKind {
    /// A primitive.
    Primitive(PrimitiveKind),
    /// An enum stored as its integer storage type.
    Enum(PrimitiveKind),
}

/// A fixed-width shape: a scalar, optionally behind a presence flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedShape {
    kind: FixedKind,
    nullable: bool,
}

impl FixedShape {
    /// A non-nullable shape.
    pub fn new(kind: FixedKind) -> Self {
        Self {
            kind,
            nullable: false,
        }
    }

    /// The nullable variant of a shape.
    pub fn nullable(kind: FixedKind) -> Self {
        Self {
            kind,
            nullable: true,
        }
    }

    fn storage(&self) -> PrimitiveKind {
        match self.kind {
            FixedKind::Primitive(p) | FixedKind::Enum(p) => p,
        }
    }

    /// Width of the wrapped scalar.
    pub fn value_width(&self) -> usize {
        self.storage().width()
    }

    /// Encoded width: the scalar, doubled for nullable shapes.
    pub fn width(&self) -> usize {
        if self.nullable {
            self.value_width() * 2
        } else {
            self.value_width()
        }
    }

    /// Human readable type, for messages.
    pub fn describe(&self) -> String {
        let base = match self.kind {
            FixedKind::Primitive(p) => p.name().to_owned(),
            FixedKind::Enum(p) => format!("enum:{}", p.name()),
        };
        if self.nullable { format!("{base}?") } else { base }
    }

    /// The value all-zero bytes decode to.
    pub fn default_value(&self) -> Value {
        if self.nullable {
            return Value::Null;
        }
        match self.kind {
            FixedKind::Enum(_) => Value::Enum(0),
            FixedKind::Primitive(p) => match p {
                PrimitiveKind::Bool => Value::Bool(false),
                PrimitiveKind::U8 => Value::U8(0),
                PrimitiveKind::I8 => Value::I8(0),
                PrimitiveKind::U16 => Value::U16(0),
                PrimitiveKind::I16 => Value::I16(0),
                PrimitiveKind::U32 => Value::U32(0),
                PrimitiveKind::I32 => Value::I32(0),
                PrimitiveKind::U64 => Value::U64(0),
                PrimitiveKind::I64 => Value::I64(0),
                PrimitiveKind::F32 => Value::F32(0.0),
                PrimitiveKind::F64 => Value::F64(0.0),
                PrimitiveKind::Char => Value::Char('\0'),
            },
        }
    }

    /// Checks that `value` can be stored in this shape.
    pub fn check(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            return if self.nullable {
                Ok(())
            } else {
                Err(SegcodeError::mismatch(self.describe(), value.kind()))
            };
        }
        let ok = match (self.kind, value) {
            (FixedKind::Enum(storage), Value::Enum(raw)) => enum_fits(storage, *raw),
            (FixedKind::Primitive(p), v) => matches!(
                (p, v),
                (PrimitiveKind::Bool, Value::Bool(_))
                    | (PrimitiveKind::U8, Value::U8(_))
                    | (PrimitiveKind::I8, Value::I8(_))
                    | (PrimitiveKind::U16, Value::U16(_))
                    | (PrimitiveKind::I16, Value::I16(_))
                    | (PrimitiveKind::U32, Value::U32(_))
                    | (PrimitiveKind::I32, Value::I32(_))
                    | (PrimitiveKind::U64, Value::U64(_))
                    | (PrimitiveKind::I64, Value::I64(_))
                    | (PrimitiveKind::F32, Value::F32(_))
                    | (PrimitiveKind::F64, Value::F64(_))
                    | (PrimitiveKind::Char, Value::Char(_))
            ),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(SegcodeError::mismatch(self.describe(), value.kind()))
        }
    }

    /// Writes `value` into `dst`, which must be exactly [`FixedShape::width`] bytes long.
    pub fn encode(&self, value: &Value, dst: &mut [u8]) -> Result<()> {
        self.check(value)?;
        if dst.len() != self.width() {
            return Err(SegcodeError::Internal(format!(
                "fixed slot of {} bytes for a {} byte shape",
                dst.len(),
                self.width()
            )));
        }
        dst.fill(0);
        if !self.nullable {
            write_scalar(value, dst);
            return Ok(());
        }
        if !value.is_null() {
            let w = self.value_width();
            dst[0] = 1;
            write_scalar(value, &mut dst[w..]);
        }
        Ok(())
    }

    /// Decodes a value from exactly [`FixedShape::width`] bytes.
    pub fn decode(&self, src: &[u8]) -> Result<Value> {
        if src.len() != self.width() {
            return Err(SegcodeError::Internal(format!(
                "fixed slot of {} bytes for a {} byte shape",
                src.len(),
                self.width()
            )));
        }
        if !self.nullable {
            return self.decode_scalar(src);
        }
        let w = self.value_width();
        match src[0] {
            0 => Ok(Value::Null),
            1 => self.decode_scalar(&src[w..]),
            flag => Err(SegcodeError::format(format!(
                "invalid presence flag {flag} for {}",
                self.describe()
            ))),
        }
    }

    fn decode_scalar(&self, src: &[u8]) -> Result<Value> {
        let storage = self.storage();
        let mut raw = [0u8; 8];
        raw[..storage.width()].copy_from_slice(&src[..storage.width()]);
        let bits = u64::from_le_bytes(raw);

        if let FixedKind::Enum(p) = self.kind {
            let width_bits = p.width() as u32 * 8;
            let value = match (p.is_signed(), width_bits) {
                (true, 64) => bits as i64,
                (true, _) => {
                    let shift = 64 - width_bits;
                    ((bits << shift) as i64) >> shift
                }
                (false, _) => i64::try_from(bits).map_err(|_| {
                    SegcodeError::format(format!(
                        "enum value {bits} of {} is outside the i64 range of enum values",
                        self.describe()
                    ))
                })?,
            };
            return Ok(Value::Enum(value));
        }

        Ok(match storage {
            PrimitiveKind::Bool => match bits {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => {
                    return Err(SegcodeError::format(format!("invalid bool byte {other}")));
                }
            },
            PrimitiveKind::U8 => Value::U8(bits as u8),
            PrimitiveKind::I8 => Value::I8(bits as u8 as i8),
            PrimitiveKind::U16 => Value::U16(bits as u16),
            PrimitiveKind::I16 => Value::I16(bits as u16 as i16),
            PrimitiveKind::U32 => Value::U32(bits as u32),
            PrimitiveKind::I32 => Value::I32(bits as u32 as i32),
            PrimitiveKind::U64 => Value::U64(bits),
            PrimitiveKind::I64 => Value::I64(bits as i64),
            PrimitiveKind::F32 => Value::F32(f32::from_bits(bits as u32)),
            PrimitiveKind::F64 => Value::F64(f64::from_bits(bits)),
            PrimitiveKind::Char => char::from_u32(bits as u32)
                .map(Value::Char)
                .ok_or_else(|| SegcodeError::format(format!("invalid char {bits:#x}")))?,
        })
    }
}

/// `width` zero bytes, which every fixed shape decodes to its default value.
pub(crate) fn zeroed(width: usize) -> Result<&'static [u8]> {
    ZEROS
        .get(..width)
        .ok_or_else(|| SegcodeError::Internal(format!("no fixed shape is {width} bytes wide")))
}

/// True when `raw` is representable in the enum's storage type.
fn enum_fits(storage: PrimitiveKind, raw: i64) -> bool {
    let bits = storage.width() as u32 * 8;
    match (storage.is_signed(), bits) {
        (_, 64) => storage.is_signed() || raw >= 0,
        (true, _) => {
            let limit = 1i64 << (bits - 1);
            (-limit..limit).contains(&raw)
        }
        (false, _) => (0..1i64 << bits).contains(&raw),
    }
}

/// Writes the little-endian bytes of a scalar. The caller has already checked the variant.
fn write_scalar(value: &Value, dst: &mut [u8]) {
    let mut put = |bytes: &[u8]| {
        let n = bytes.len().min(dst.len());
        dst[..n].copy_from_slice(&bytes[..n]);
    };
    match value {
        Value::Bool(v) => put(&[u8::from(*v)]),
        Value::U8(v) => put(&v.to_le_bytes()),
        Value::I8(v) => put(&v.to_le_bytes()),
        Value::U16(v) => put(&v.to_le_bytes()),
        Value::I16(v) => put(&v.to_le_bytes()),
        Value::U32(v) => put(&v.to_le_bytes()),
        Value::I32(v) => put(&v.to_le_bytes()),
        Value::U64(v) => put(&v.to_le_bytes()),
        Value::I64(v) | Value::Enum(v) => put(&v.to_le_bytes()),
        Value::F32(v) => put(&v.to_le_bytes()),
        Value::F64(v) => put(&v.to_le_bytes()),
        Value::Char(v) => put(&u32::from(*v).to_le_bytes()),
        _ => {}
    }
}

/// A resolved formatter for one declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum Formatter {
    /// Primitive, enum or nullable primitive.
    Fixed(FixedShape),
    /// UTF-8 string, length prefixed.
    Str,
    /// Byte array, length prefixed.
    Bytes,
    /// A registered object type; delegates to the layout codec.
    Object(TypeKey),
    /// List of elements.
    List(Box<Formatter>),
    /// Key/value entries.
    Dictionary(Box<Formatter>, Box<Formatter>),
    /// Key to group entries; each group is encoded as a list of the element formatter.
    Lookup(Box<Formatter>, Box<Formatter>),
    /// Tuple members.
    KeyTuple(Vec<Formatter>),
}

impl Formatter {
    /// Resolves a type reference. Object names are looked up in `names`.
    pub(crate) fn resolve(type_ref: &TypeRef, names: &HashMap<String, TypeKey>) -> Result<Self> {
        Ok(match type_ref {
            TypeRef::Primitive(p) => Self::Fixed(FixedShape::new(FixedKind::Primitive(*p))),
            TypeRef::Enum(e) => Self::Fixed(FixedShape::new(FixedKind::Enum(e.storage))),
            TypeRef::Nullable(inner) => match inner.as_ref() {
                TypeRef::Primitive(p) => {
                    Self::Fixed(FixedShape::nullable(FixedKind::Primitive(*p)))
                }
                TypeRef::Enum(e) => Self::Fixed(FixedShape::nullable(FixedKind::Enum(e.storage))),
                other => {
                    return Err(SegcodeError::schema(format!(
                        "nullable wrapper around {other} is not supported"
                    )));
                }
            },
            TypeRef::String => Self::Str,
            TypeRef::Bytes | TypeRef::Array(_) => Self::Bytes,
            TypeRef::Object(name) => Self::Object(names.get(name).copied().ok_or_else(|| {
                SegcodeError::schema(format!("unknown object type '{name}'"))
            })?),
            TypeRef::List(e) => Self::List(Box::new(Self::resolve(e, names)?)),
            TypeRef::Dictionary(k, v) => Self::Dictionary(
                Box::new(Self::resolve(k, names)?),
                Box::new(Self::resolve(v, names)?),
            ),
            TypeRef::Lookup(k, v) => Self::Lookup(
                Box::new(Self::resolve(k, names)?),
                Box::new(Self::resolve(v, names)?),
            ),
            TypeRef::KeyTuple(members) => Self::KeyTuple(
                members
                    .iter()
                    .map(|m| Self::resolve(m, names))
                    .collect::<Result<_>>()?,
            ),
            TypeRef::EagerList(_) | TypeRef::EagerDictionary(..) => {
                return Err(SegcodeError::schema(format!(
                    "{type_ref} is not lazily addressable"
                )));
            }
        })
    }

    /// The encoded width, or `None` when the width depends on the value.
    pub fn fixed_len(&self) -> Option<usize> {
        match self {
            Self::Fixed(shape) => Some(shape.width()),
            _ => None,
        }
    }

    /// The value an absent property of this type reads as.
    pub fn default_value(&self) -> Value {
        match self {
            Self::Fixed(shape) => shape.default_value(),
            _ => Value::Null,
        }
    }

    /// Human readable type, for messages.
    pub fn describe(&self) -> String {
        match self {
            Self::Fixed(shape) => shape.describe(),
            Self::Str => "string".into(),
            Self::Bytes => "bytes".into(),
            Self::Object(key) => format!("object {key}"),
            Self::List(e) => format!("list<{}>", e.describe()),
            Self::Dictionary(k, v) => format!("dictionary<{}, {}>", k.describe(), v.describe()),
            Self::Lookup(k, v) => format!("lookup<{}, {}>", k.describe(), v.describe()),
            Self::KeyTuple(members) => {
                let inner: Vec<_> = members.iter().map(Formatter::describe).collect();
                format!("({})", inner.join(", "))
            }
        }
    }

    /// Shallow check that `value` has the right variant for this formatter.
    ///
    /// Container elements are checked when the container is serialized.
    pub fn check(&self, value: &Value) -> Result<()> {
        let ok = match (self, value) {
            (Self::Fixed(shape), v) => return shape.check(v),
            (_, Value::Null) => true,
            (Self::Str, Value::Str(_))
            | (Self::Bytes, Value::Bytes(_))
            | (Self::List(_), Value::List(_))
            | (Self::Dictionary(..), Value::Dict(_))
            | (Self::Lookup(..), Value::Lookup(_)) => true,
            (Self::Object(key), Value::Object(seg)) => seg.type_key() == *key,
            (Self::KeyTuple(members), Value::Tuple(items)) => members.len() == items.len(),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(SegcodeError::mismatch(self.describe(), value.kind()))
        }
    }

    /// Appends the encoding of `value` to `out`, returning the bytes written.
    pub fn serialize(&self, ctx: &EncodeCtx<'_>, value: &Value, out: &mut Vec<u8>) -> Result<usize> {
        if let Self::Fixed(shape) = self {
            let start = out.len();
            out.resize(start + shape.width(), 0);
            shape.encode(value, &mut out[start..])?;
            return Ok(shape.width());
        }
        self.check(value)?;

        match (self, value) {
            (_, Value::Null) => {
                push_i32(out, NULL_SENTINEL);
                Ok(4)
            }
            (Self::Str, Value::Str(s)) => write_blob(out, s.as_bytes()),
            (Self::Bytes, Value::Bytes(b)) => write_blob(out, b),
            (Self::Object(_), Value::Object(seg)) => seg.serialize_with(ctx, out),
            (Self::List(elem), Value::List(items)) => serialize_items(ctx, elem, items, out),
            (Self::Dictionary(k, v), Value::Dict(entries)) => {
                let fixed = k.fixed_len().is_some() && v.fixed_len().is_some();
                write_container(out, entries.len(), fixed, |i, out| {
                    let (key, value) = &entries[i];
                    k.serialize(ctx, key, out)?;
                    v.serialize(ctx, value, out)?;
                    Ok(())
                })
            }
            (Self::Lookup(k, elem), Value::Lookup(groups)) => {
                write_container(out, groups.len(), false, |i, out| {
                    let (key, group) = &groups[i];
                    k.serialize(ctx, key, out)?;
                    serialize_items(ctx, elem, group, out)?;
                    Ok(())
                })
            }
            (Self::KeyTuple(members), Value::Tuple(items)) => {
                let fixed = members.iter().all(|m| m.fixed_len().is_some());
                write_container(out, items.len(), fixed, |i, out| {
                    members[i].serialize(ctx, &items[i], out)?;
                    Ok(())
                })
            }
            _ => Err(SegcodeError::mismatch(self.describe(), value.kind())),
        }
    }

    /// Decodes the value at `at`. Objects found on the way get trackers wired under `parent`.
    pub fn deserialize(
        &self,
        ctx: &DecodeCtx<'_>,
        at: usize,
        parent: &DirtyTracker,
    ) -> Result<(Value, usize)> {
        match self {
            Self::Fixed(shape) => {
                let bytes = slice(ctx.buf, at, shape.width(), ctx.end)?;
                Ok((shape.decode(bytes)?, shape.width()))
            }
            Self::Str => match read_blob(ctx, at)? {
                None => Ok((Value::Null, 4)),
                Some(bytes) => {
                    let s = std::str::from_utf8(bytes).map_err(|e| {
                        SegcodeError::format(format!("invalid UTF-8 in string at {at}: {e}"))
                    })?;
                    Ok((Value::Str(s.to_owned()), 4 + bytes.len()))
                }
            },
            Self::Bytes => match read_blob(ctx, at)? {
                None => Ok((Value::Null, 4)),
                Some(bytes) => Ok((Value::Bytes(bytes.to_vec()), 4 + bytes.len())),
            },
            Self::Object(key) => {
                let (segment, used) = decode_object(ctx, at, *key, parent)?;
                Ok((segment.map_or(Value::Null, Value::from), used))
            }
            _ => {
                let Some(view) = SequenceView::open(ctx, self, at)? else {
                    return Ok((Value::Null, 4));
                };
                let value = view.decode_all(parent)?;
                Ok((value, view.header.total))
            }
        }
    }

    /// Number of bytes the encoding at `at` occupies, read from its size prefix without decoding.
    pub fn extent(&self, ctx: &DecodeCtx<'_>, at: usize) -> Result<usize> {
        match self {
            Self::Fixed(shape) => {
                slice(ctx.buf, at, shape.width(), ctx.end)?;
                Ok(shape.width())
            }
            Self::Str | Self::Bytes => Ok(read_blob(ctx, at)?.map_or(4, |b| 4 + b.len())),
            Self::Object(_) => Ok(ObjectHeader::read(ctx.buf, at, ctx.end)?
                .map_or(4, |h| h.total_size)),
            _ => Ok(ContainerHeader::read(ctx, at)?.map_or(4, |h| h.total)),
        }
    }
}

fn write_blob(out: &mut Vec<u8>, bytes: &[u8]) -> Result<usize> {
    push_i32(out, to_i32(bytes.len(), "length")?);
    out.extend_from_slice(bytes);
    Ok(4 + bytes.len())
}

fn read_blob<'a>(ctx: &DecodeCtx<'a>, at: usize) -> Result<Option<&'a [u8]>> {
    let len = read_i32(ctx.buf, at, ctx.end)?;
    if len == NULL_SENTINEL {
        return Ok(None);
    }
    let len = usize::try_from(len)
        .map_err(|_| SegcodeError::format(format!("invalid length {len} at offset {at}")))?;
    slice(ctx.buf, at + 4, len, ctx.end).map(Some)
}

fn serialize_items(
    ctx: &EncodeCtx<'_>,
    elem: &Formatter,
    items: &[Value],
    out: &mut Vec<u8>,
) -> Result<usize> {
    write_container(out, items.len(), elem.fixed_len().is_some(), |i, out| {
        elem.serialize(ctx, &items[i], out)?;
        Ok(())
    })
}

/// Writes `[totalSize][count]`, then either the entries back to back (`fixed`) or an offset
/// table followed by the entries, and backpatches the total size.
fn write_container<F>(out: &mut Vec<u8>, count: usize, fixed: bool, mut write_entry: F) -> Result<usize>
where
    F: FnMut(usize, &mut Vec<u8>) -> Result<()>,
{
    let start = out.len();
    push_i32(out, 0);
    push_i32(out, to_i32(count, "element count")?);

    if fixed {
        for i in 0..count {
            write_entry(i, out)?;
        }
    } else {
        let table = out.len();
        out.resize(table + OFFSET_ENTRY_LEN * count, 0);
        for i in 0..count {
            let rel = to_i32(out.len() - start, "offset")?;
            patch_i32(out, table + OFFSET_ENTRY_LEN * i, rel)?;
            write_entry(i, out)?;
        }
    }

    let total = out.len() - start;
    patch_i32(out, start, to_i32(total, "container size")?)?;
    Ok(total)
}

/// The parsed `[totalSize][count]` prefix of a non-null container.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ContainerHeader {
    pub(crate) at: usize,
    pub(crate) total: usize,
    pub(crate) count: usize,
}

impl ContainerHeader {
    pub(crate) fn read(ctx: &DecodeCtx<'_>, at: usize) -> Result<Option<Self>> {
        let total = read_i32(ctx.buf, at, ctx.end)?;
        if total == NULL_SENTINEL {
            return Ok(None);
        }
        let total = usize::try_from(total)
            .ok()
            .filter(|t| *t >= CONTAINER_HEADER_LEN)
            .ok_or_else(|| {
                SegcodeError::format(format!("invalid container size {total} at offset {at}"))
            })?;
        let end = at.checked_add(total).filter(|e| *e <= ctx.end).ok_or_else(|| {
            SegcodeError::format(format!(
                "container at offset {at} with size {total} overruns its enclosing range ending at {}",
                ctx.end
            ))
        })?;
        let count = read_i32(ctx.buf, at + 4, end)?;
        let count = usize::try_from(count).map_err(|_| {
            SegcodeError::format(format!("invalid element count {count} at offset {at}"))
        })?;
        Ok(Some(Self { at, total, count }))
    }

    pub(crate) fn end(&self) -> usize {
        self.at + self.total
    }
}

/// How the entries of a container are located.
#[derive(Debug, Clone)]
enum EntryLayout {
    /// Back to back, every entry `stride` bytes wide.
    Stride(usize),
    /// Back to back tuple members; holds each member's offset past the header.
    Packed(Vec<usize>),
    /// Through the offset table.
    Table,
}

/// An index-addressable view over an encoded list, dictionary, lookup or tuple.
///
/// Only the entries that are asked for are decoded. Objects returned from a view are detached
/// snapshots: they hold copies of their bytes, are not wired to any document, and can be stored
/// in any object.
#[derive(Debug, Clone)]
pub struct SequenceView<'a> {
    ctx: DecodeCtx<'a>,
    formatter: &'a Formatter,
    header: ContainerHeader,
    layout: EntryLayout,
}

impl<'a> SequenceView<'a> {
    /// Opens the container at `at`. Returns `None` for a null container.
    pub fn open(ctx: &DecodeCtx<'a>, formatter: &'a Formatter, at: usize) -> Result<Option<Self>> {
        let Some(header) = ContainerHeader::read(ctx, at)? else {
            return Ok(None);
        };
        let inner = ctx.enter(header.end())?;
        let body = header.total - CONTAINER_HEADER_LEN;

        let fixed_stride = |stride: usize| -> Result<EntryLayout> {
            let needed = header.count.checked_mul(stride);
            if needed == Some(body) {
                Ok(EntryLayout::Stride(stride))
            } else {
                Err(SegcodeError::format(format!(
                    "container at offset {at}: {} entries of {stride} bytes do not fill {body} bytes",
                    header.count
                )))
            }
        };

        let table = || -> Result<EntryLayout> {
            let needed = header.count.checked_mul(OFFSET_ENTRY_LEN);
            match needed {
                Some(n) if n <= body => Ok(EntryLayout::Table),
                _ => Err(SegcodeError::format(format!(
                    "container at offset {at}: offset table for {} entries does not fit",
                    header.count
                ))),
            }
        };

        let layout = match formatter {
            Formatter::List(elem) => match elem.fixed_len() {
                Some(w) => fixed_stride(w)?,
                None => table()?,
            },
            Formatter::Dictionary(k, v) => match (k.fixed_len(), v.fixed_len()) {
                (Some(wk), Some(wv)) => fixed_stride(wk + wv)?,
                _ => table()?,
            },
            Formatter::Lookup(..) => table()?,
            Formatter::KeyTuple(members) => {
                if header.count != members.len() {
                    return Err(SegcodeError::format(format!(
                        "tuple at offset {at} has {} members, expected {}",
                        header.count,
                        members.len()
                    )));
                }
                let widths: Option<Vec<usize>> = members.iter().map(Formatter::fixed_len).collect();
                match widths {
                    Some(widths) => {
                        if widths.iter().sum::<usize>() != body {
                            return Err(SegcodeError::format(format!(
                                "packed tuple at offset {at} does not fill {body} bytes"
                            )));
                        }
                        let mut offsets = Vec::with_capacity(widths.len());
                        let mut acc = 0;
                        for w in widths {
                            offsets.push(acc);
                            acc += w;
                        }
                        EntryLayout::Packed(offsets)
                    }
                    None => table()?,
                }
            }
            other => {
                return Err(SegcodeError::Internal(format!(
                    "{} is not a container",
                    other.describe()
                )));
            }
        };

        Ok(Some(Self {
            ctx: inner,
            formatter,
            header,
            layout,
        }))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.header.count
    }

    /// True when the container has no entries.
    pub fn is_empty(&self) -> bool {
        self.header.count == 0
    }

    /// Encoded size of the whole container.
    pub fn encoded_len(&self) -> usize {
        self.header.total
    }

    /// Absolute offset of entry `i`.
    pub(crate) fn entry_start(&self, i: usize) -> Result<usize> {
        if i >= self.header.count {
            return Err(SegcodeError::format(format!(
                "entry {i} is out of bounds for a container of {} entries",
                self.header.count
            )));
        }
        let body = self.header.at + CONTAINER_HEADER_LEN;
        match &self.layout {
            EntryLayout::Stride(stride) => Ok(body + i * stride),
            EntryLayout::Packed(offsets) => Ok(body + offsets[i]),
            EntryLayout::Table => {
                let raw = read_i32(self.ctx.buf, body + OFFSET_ENTRY_LEN * i, self.ctx.end)?;
                let first_payload = CONTAINER_HEADER_LEN + OFFSET_ENTRY_LEN * self.header.count;
                usize::try_from(raw)
                    .ok()
                    .filter(|rel| *rel >= first_payload && *rel < self.header.total)
                    .map(|rel| self.header.at + rel)
                    .ok_or_else(|| {
                        SegcodeError::format(format!(
                            "entry offset {raw} of container at {} lies outside its payload area",
                            self.header.at
                        ))
                    })
            }
        }
    }

    /// Decodes entry `i`: a list element, a tuple member, or a `(key, value)` tuple for
    /// dictionaries and lookups.
    pub fn get(&self, i: usize) -> Result<Value> {
        let snapshot = DirtyTracker::root();
        let mut value = self.decode_entry(i, &snapshot)?;
        detach_value(self.ctx.registry, self.ctx.buf, &mut value)?;
        Ok(value)
    }

    /// Decodes only the keys of a dictionary or lookup until one equals `key`, then decodes
    /// its value (the group, for lookups).
    pub fn find(&self, key: &Value) -> Result<Option<Value>> {
        let (key_fmt, is_lookup) = match self.formatter {
            Formatter::Dictionary(k, _) => (k.as_ref(), false),
            Formatter::Lookup(k, _) => (k.as_ref(), true),
            other => {
                return Err(SegcodeError::mismatch(
                    "dictionary or lookup",
                    other.describe(),
                ));
            }
        };
        let snapshot = DirtyTracker::root();
        for i in 0..self.header.count {
            let start = self.entry_start(i)?;
            let (candidate, used) = key_fmt.deserialize(&self.ctx, start, &snapshot)?;
            if candidate == *key {
                let mut value = self.decode_value_after_key(start + used, is_lookup, &snapshot)?;
                detach_value(self.ctx.registry, self.ctx.buf, &mut value)?;
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn decode_value_after_key(
        &self,
        at: usize,
        is_lookup: bool,
        parent: &DirtyTracker,
    ) -> Result<Value> {
        match (self.formatter, is_lookup) {
            (Formatter::Dictionary(_, v), false) => Ok(v.deserialize(&self.ctx, at, parent)?.0),
            (Formatter::Lookup(_, elem), true) => {
                Ok(Value::List(decode_group(&self.ctx, elem, at, parent)?))
            }
            _ => Err(SegcodeError::Internal("entry decoded with the wrong shape".into())),
        }
    }

    fn decode_entry(&self, i: usize, parent: &DirtyTracker) -> Result<Value> {
        let start = self.entry_start(i)?;
        match self.formatter {
            Formatter::List(elem) => Ok(elem.deserialize(&self.ctx, start, parent)?.0),
            Formatter::KeyTuple(members) => Ok(members[i].deserialize(&self.ctx, start, parent)?.0),
            Formatter::Dictionary(k, _) => {
                let (key, used) = k.deserialize(&self.ctx, start, parent)?;
                let value = self.decode_value_after_key(start + used, false, parent)?;
                Ok(Value::Tuple(vec![key, value]))
            }
            Formatter::Lookup(k, _) => {
                let (key, used) = k.deserialize(&self.ctx, start, parent)?;
                let group = self.decode_value_after_key(start + used, true, parent)?;
                Ok(Value::Tuple(vec![key, group]))
            }
            other => Err(SegcodeError::Internal(format!(
                "{} is not a container",
                other.describe()
            ))),
        }
    }

    /// Decodes every entry into the container's value form.
    pub(crate) fn decode_all(&self, parent: &DirtyTracker) -> Result<Value> {
        let count = self.header.count;
        match self.formatter {
            Formatter::List(elem) => {
                let mut items = Vec::with_capacity(count);
                for i in 0..count {
                    items.push(elem.deserialize(&self.ctx, self.entry_start(i)?, parent)?.0);
                }
                Ok(Value::List(items))
            }
            Formatter::KeyTuple(members) => {
                let mut items = Vec::with_capacity(count);
                for (i, member) in members.iter().enumerate() {
                    items.push(member.deserialize(&self.ctx, self.entry_start(i)?, parent)?.0);
                }
                Ok(Value::Tuple(items))
            }
            Formatter::Dictionary(k, v) => {
                let mut entries = Vec::with_capacity(count);
                for i in 0..count {
                    let start = self.entry_start(i)?;
                    let (key, used) = k.deserialize(&self.ctx, start, parent)?;
                    let (value, _) = v.deserialize(&self.ctx, start + used, parent)?;
                    entries.push((key, value));
                }
                Ok(Value::Dict(entries))
            }
            Formatter::Lookup(k, elem) => {
                let mut groups = Vec::with_capacity(count);
                for i in 0..count {
                    let start = self.entry_start(i)?;
                    let (key, used) = k.deserialize(&self.ctx, start, parent)?;
                    let group = decode_group(&self.ctx, elem, start + used, parent)?;
                    groups.push((key, group));
                }
                Ok(Value::Lookup(groups))
            }
            other => Err(SegcodeError::Internal(format!(
                "{} is not a container",
                other.describe()
            ))),
        }
    }

    /// Walks every entry, handing each member's formatter and offset to `visit`.
    pub(crate) fn for_each_member<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&DecodeCtx<'a>, Member<'a>, usize) -> Result<usize>,
    {
        for i in 0..self.header.count {
            let start = self.entry_start(i)?;
            match self.formatter {
                Formatter::List(elem) => {
                    visit(&self.ctx, Member::Value(elem), start)?;
                }
                Formatter::KeyTuple(members) => {
                    visit(&self.ctx, Member::Value(&members[i]), start)?;
                }
                Formatter::Dictionary(k, v) => {
                    let used = visit(&self.ctx, Member::Value(k), start)?;
                    visit(&self.ctx, Member::Value(v), start + used)?;
                }
                Formatter::Lookup(k, elem) => {
                    let used = visit(&self.ctx, Member::Value(k), start)?;
                    visit(&self.ctx, Member::Group(elem), start + used)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// One member of a container entry, as handed out by [`SequenceView::for_each_member`].
#[derive(Debug, Clone, Copy)]
pub(crate) enum Member<'a> {
    /// A value with its own formatter.
    Value(&'a Formatter),
    /// A lookup group: a list of the element formatter.
    Group(&'a Formatter),
}

/// Decodes a lookup group, which is encoded exactly like a list of `elem`.
fn decode_group(
    ctx: &DecodeCtx<'_>,
    elem: &Formatter,
    at: usize,
    parent: &DirtyTracker,
) -> Result<Vec<Value>> {
    let list = Formatter::List(Box::new(elem.clone()));
    match list.deserialize(ctx, at, parent)?.0 {
        Value::List(items) => Ok(items),
        Value::Null => Err(SegcodeError::format(format!("null lookup group at offset {at}"))),
        other => Err(SegcodeError::mismatch("lookup group", other.kind())),
    }
}
