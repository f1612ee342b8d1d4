//! Defines the binary layout of an encoded object.
//!
//! # Object Layout
//!
//! ```text
//! [ totalSize:i32 ][ binaryLastIndex:i32 ][ offset_0 .. offset_binaryLastIndex : i32 ][ fixed region ][ payloads... ]
//! ```
//!
//! * `totalSize == -1` is the null sentinel: the reference is absent and the encoding is exactly
//!   4 bytes long. Otherwise it counts every byte of the object, so a reader can skip the whole
//!   subtree without interpreting it.
//! * `binaryLastIndex` is the highest index physically present in this instance. Older payloads
//!   carry a smaller value than the current schema's last index.
//! * `offset_i` is relative to the start of the object. Fixed-width properties point into the
//!   fixed region, variable properties point at their payload, and `-1` marks an index without
//!   bytes (retired, never declared, or omitted).
//! * Payloads follow the fixed region in ascending index order.
//!
//! All integers are little endian.

use crate::cache::CacheSegment;
use crate::error::{Result, SegcodeError};
use crate::registry::{Registry, SlotKind, TypeKey};
use crate::segment::{ObjectSegment, Slot};
use crate::tracker::DirtyTracker;
use log::trace;
use std::sync::atomic::{AtomicU64, Ordering};

/// The value of `totalSize` (or of a length prefix) that encodes an absent reference.
pub const NULL_SENTINEL: i32 = -1;

/// `totalSize` + `binaryLastIndex`.
pub const HEADER_FIXED_LEN: usize = 8;

/// Width of one offset table entry.
pub const OFFSET_ENTRY_LEN: usize = 4;

/// Header length for an object whose offset table covers indices `0..=last_index`.
///
/// `8 + 4 * (last_index + 1)`; a type without properties (`last_index == -1`) has an 8 byte header.
pub const fn header_size(last_index: i32) -> usize {
    if last_index < 0 {
        HEADER_FIXED_LEN
    } else {
        HEADER_FIXED_LEN + OFFSET_ENTRY_LEN * (last_index as usize + 1)
    }
}

/// Borrows `len` bytes at `at`, failing unless they end at or before `end`.
pub(crate) fn slice(buf: &[u8], at: usize, len: usize, end: usize) -> Result<&[u8]> {
    let stop = at
        .checked_add(len)
        .filter(|stop| *stop <= end)
        .ok_or_else(|| {
            SegcodeError::format(format!(
                "{len} bytes at offset {at} overrun the enclosing range ending at {end}"
            ))
        })?;
    buf.get(at..stop).ok_or_else(|| {
        SegcodeError::format(format!(
            "{len} bytes at offset {at} overrun the buffer of {} bytes",
            buf.len()
        ))
    })
}

/// Reads a little-endian `i32` at `at`.
pub fn read_i32(buf: &[u8], at: usize, end: usize) -> Result<i32> {
    let bytes = slice(buf, at, 4, end)?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    Ok(i32::from_le_bytes(raw))
}

pub(crate) fn push_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn patch_i32(out: &mut [u8], at: usize, value: i32) -> Result<()> {
    let dst = out
        .get_mut(at..at + 4)
        .ok_or_else(|| SegcodeError::Internal(format!("backpatch at {at} is out of range")))?;
    dst.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Converts a length or offset to its `i32` wire form.
pub(crate) fn to_i32(n: usize, what: &str) -> Result<i32> {
    i32::try_from(n).map_err(|_| {
        SegcodeError::format(format!("{what} of {n} exceeds the i32 range of the format"))
    })
}

/// The parsed header of a non-null encoded object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Absolute offset of the object.
    pub at: usize,
    /// Total encoded size, header included.
    pub total_size: usize,
    /// Highest index present in this instance, `-1` if none.
    pub binary_last_index: i32,
}

impl ObjectHeader {
    /// Reads and validates the header at `at`. Returns `None` for the null sentinel.
    pub fn read(buf: &[u8], at: usize, end: usize) -> Result<Option<Self>> {
        let total = read_i32(buf, at, end)?;
        if total == NULL_SENTINEL {
            return Ok(None);
        }
        let total_size = usize::try_from(total)
            .ok()
            .filter(|t| *t >= HEADER_FIXED_LEN)
            .ok_or_else(|| {
                SegcodeError::format(format!("invalid object size {total} at offset {at}"))
            })?;
        let obj_end = at.checked_add(total_size).filter(|e| *e <= end).ok_or_else(|| {
            SegcodeError::format(format!(
                "object at offset {at} with size {total_size} overruns its enclosing range ending at {end}"
            ))
        })?;
        let binary_last_index = read_i32(buf, at + 4, obj_end)?;
        if binary_last_index < -1 {
            return Err(SegcodeError::format(format!(
                "invalid binary last index {binary_last_index} at offset {at}"
            )));
        }
        if header_size(binary_last_index) > total_size {
            return Err(SegcodeError::format(format!(
                "offset table for index {binary_last_index} does not fit in object of {total_size} bytes at offset {at}"
            )));
        }
        Ok(Some(Self {
            at,
            total_size,
            binary_last_index,
        }))
    }

    /// Header length of this instance.
    pub fn header_len(&self) -> usize {
        header_size(self.binary_last_index)
    }

    /// Absolute end offset (exclusive).
    pub fn end(&self) -> usize {
        self.at + self.total_size
    }

    /// The relative offset recorded for `index`, or `None` when the instance holds no bytes for it.
    pub fn offset_of(&self, buf: &[u8], index: u32) -> Result<Option<usize>> {
        let present = i64::from(index) <= i64::from(self.binary_last_index);
        if !present {
            return Ok(None);
        }
        let entry_at = self.at + HEADER_FIXED_LEN + OFFSET_ENTRY_LEN * index as usize;
        let raw = read_i32(buf, entry_at, self.end())?;
        if raw == NULL_SENTINEL {
            return Ok(None);
        }
        usize::try_from(raw)
            .ok()
            .filter(|rel| *rel >= self.header_len() && *rel < self.total_size)
            .map(Some)
            .ok_or_else(|| {
                SegcodeError::format(format!(
                    "offset {raw} for index {index} of object at {} lies outside its payload area",
                    self.at
                ))
            })
    }
}

/// Identity of one decoded buffer.
///
/// Every segment decoded from a buffer carries the id of the decode that produced it, so offsets
/// into one buffer are never resolved against another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

impl SourceId {
    pub(crate) fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Read-side context: where the bytes are and how deep the decoder may go.
#[derive(Debug, Clone, Copy)]
pub struct DecodeCtx<'a> {
    pub(crate) registry: &'a Registry,
    pub(crate) buf: &'a [u8],
    pub(crate) source_id: SourceId,
    pub(crate) end: usize,
    pub(crate) depth: usize,
    pub(crate) max_depth: usize,
}

impl<'a> DecodeCtx<'a> {
    /// A context covering the whole buffer, under a fresh [`SourceId`].
    pub fn new(registry: &'a Registry, buf: &'a [u8], max_depth: usize) -> Self {
        Self {
            registry,
            buf,
            source_id: SourceId::fresh(),
            end: buf.len(),
            depth: 0,
            max_depth,
        }
    }

    /// The same context, resuming a decode of the buffer identified by `source_id`.
    pub(crate) fn resuming(mut self, source_id: SourceId) -> Self {
        self.source_id = source_id;
        self
    }

    /// The same context, starting at nesting level `depth`.
    pub(crate) fn at_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Narrows the readable range to end at `end`.
    pub(crate) fn bounded(mut self, end: usize) -> Result<Self> {
        if end > self.end {
            return Err(SegcodeError::format(format!(
                "range ending at {end} exceeds its enclosing range ending at {}",
                self.end
            )));
        }
        self.end = end;
        Ok(self)
    }

    /// Steps one nesting level down into a range ending at `end`.
    pub(crate) fn enter(self, end: usize) -> Result<Self> {
        if self.depth >= self.max_depth {
            return Err(SegcodeError::format(format!(
                "nesting exceeds the maximum depth of {}",
                self.max_depth
            )));
        }
        let mut inner = self.bounded(end)?;
        inner.depth += 1;
        Ok(inner)
    }
}

/// Write-side context: the registry and the buffer that decoded segments point into.
#[derive(Debug, Clone, Copy)]
pub struct EncodeCtx<'a> {
    pub(crate) registry: &'a Registry,
    pub(crate) source: &'a [u8],
    pub(crate) source_id: Option<SourceId>,
}

impl<'a> EncodeCtx<'a> {
    /// Creates an encode context. `source` is the buffer decoded segments were read from (empty
    /// when encoding detached objects only).
    pub fn new(registry: &'a Registry, source: &'a [u8]) -> Self {
        Self {
            registry,
            source,
            source_id: None,
        }
    }

    /// Declares which decode `source` came from. Segments from any other decode are rejected.
    pub(crate) fn identified(mut self, source_id: Option<SourceId>) -> Self {
        self.source_id = source_id;
        self
    }
}

/// Decodes the object at `at`.
///
/// Returns `None` for the null sentinel, plus the number of bytes consumed. Plain variable
/// properties are decoded immediately; cache-eligible properties are only located.
pub fn decode_object(
    ctx: &DecodeCtx<'_>,
    at: usize,
    key: TypeKey,
    parent: &DirtyTracker,
) -> Result<(Option<ObjectSegment>, usize)> {
    let Some(header) = ObjectHeader::read(ctx.buf, at, ctx.end)? else {
        return Ok((None, 4));
    };
    let inner = ctx.enter(header.end())?;
    let plan = ctx.registry.plan(key)?;
    let tracker = parent.create_child();

    let mut slots = Vec::with_capacity(plan.properties().len());
    for prop in plan.properties() {
        let rel = header.offset_of(ctx.buf, prop.index())?;
        let slot = match prop.slot() {
            SlotKind::Fixed { width, .. } => {
                if let Some(rel) = rel {
                    slice(ctx.buf, at + rel, width, header.end())?;
                }
                Slot::Fixed(rel.map(|rel| at + rel))
            }
            SlotKind::Variable => match rel {
                Some(rel) => {
                    let (value, _) = prop.formatter().deserialize(&inner, at + rel, &tracker)?;
                    Slot::Plain(value)
                }
                None => Slot::Plain(prop.formatter().default_value()),
            },
            SlotKind::Cached => match rel {
                Some(rel) => {
                    let start = at + rel;
                    let len = prop.formatter().extent(&inner, start)?;
                    Slot::Cached(CacheSegment::bound(
                        start..start + len,
                        ctx.source_id,
                        inner.depth,
                        inner.max_depth,
                        tracker.create_child(),
                    ))
                }
                None => Slot::Cached(CacheSegment::absent(
                    prop.formatter().default_value(),
                    tracker.create_child(),
                )),
            },
        };
        slots.push(slot);
    }

    trace!(
        "decoded '{}' at {at}: {} bytes, binary last index {}",
        plan.name(),
        header.total_size,
        header.binary_last_index
    );

    let segment = ObjectSegment::from_parts(
        key,
        at..header.end(),
        ctx.source_id,
        header.binary_last_index,
        tracker,
        slots,
    );
    Ok((Some(segment), header.total_size))
}

/// Re-encodes a segment against the current schema, appending to `out`.
///
/// The header is sized from the schema's last index (upgrading older instances), fixed values
/// are copied into a freshly laid out fixed region, and every variable property is asked to
/// serialize itself, so untouched children still take their direct-copy path.
pub fn encode_object(
    ctx: &EncodeCtx<'_>,
    segment: &ObjectSegment,
    out: &mut Vec<u8>,
) -> Result<usize> {
    let plan = ctx.registry.plan(segment.type_key())?;
    let start = out.len();
    let header_len = plan.header_len();

    out.resize(start + header_len + plan.fixed_region_len(), 0);
    patch_i32(out, start + 4, plan.last_index())?;
    for entry in 0..header_len.saturating_sub(HEADER_FIXED_LEN) / OFFSET_ENTRY_LEN {
        patch_i32(
            out,
            start + HEADER_FIXED_LEN + OFFSET_ENTRY_LEN * entry,
            NULL_SENTINEL,
        )?;
    }

    for (prop, slot) in plan.properties().iter().zip(segment.slots()) {
        let entry_at = start + HEADER_FIXED_LEN + OFFSET_ENTRY_LEN * prop.index() as usize;
        match (prop.slot(), slot) {
            (SlotKind::Fixed { offset, width }, Slot::Fixed(at)) => {
                let rel = header_len + offset;
                let bytes = segment.fixed_bytes(ctx.source, offset, width, *at)?;
                out[start + rel..start + rel + width].copy_from_slice(bytes);
                patch_i32(out, entry_at, to_i32(rel, "offset")?)?;
            }
            (SlotKind::Variable, Slot::Plain(value)) => {
                let rel = out.len() - start;
                patch_i32(out, entry_at, to_i32(rel, "offset")?)?;
                prop.formatter().serialize(ctx, value, out)?;
            }
            (SlotKind::Cached, Slot::Cached(cache)) => {
                let rel = out.len() - start;
                patch_i32(out, entry_at, to_i32(rel, "offset")?)?;
                cache.serialize(ctx, prop.formatter(), out)?;
            }
            _ => {
                return Err(SegcodeError::Internal(format!(
                    "slot for {}.{} does not match its plan",
                    plan.name(),
                    prop.name()
                )));
            }
        }
    }

    let total = out.len() - start;
    patch_i32(out, start, to_i32(total, "object size")?)?;
    trace!("re-encoded '{}': {total} bytes", plan.name());
    Ok(total)
}
