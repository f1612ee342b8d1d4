//! Lazily decoded wrappers for cache-eligible properties.

use crate::error::{Result, SegcodeError};
use crate::format::{DecodeCtx, EncodeCtx, SourceId};
use crate::formatter::{Formatter, SequenceView};
use crate::registry::Registry;
use crate::segment::{detach_value, rewire_value, value_reads_buffer};
use crate::tracker::DirtyTracker;
use crate::value::Value;
use log::trace;
use std::cell::OnceCell;
use std::ops::Range;

/// One cache-eligible property: bound to its encoded bytes, decoded on first read.
///
/// The decoded value is memoized, so a second read is free. Values nested inside it (objects in
/// a list, for instance) get trackers wired under this segment, which keeps the whole path to the
/// document root honest about modifications.
#[derive(Debug)]
pub struct CacheSegment {
    origin: Option<Range<usize>>,
    source: Option<SourceId>,
    depth: usize,
    max_depth: usize,
    value: OnceCell<Value>,
    tracker: DirtyTracker,
}

impl CacheSegment {
    /// A segment over the encoded bytes at `origin` of the buffer `source`, decoded at nesting
    /// level `depth`.
    pub(crate) fn bound(
        origin: Range<usize>,
        source: SourceId,
        depth: usize,
        max_depth: usize,
        tracker: DirtyTracker,
    ) -> Self {
        Self {
            origin: Some(origin),
            source: Some(source),
            depth,
            max_depth,
            value: OnceCell::new(),
            tracker,
        }
    }

    /// A segment without backing bytes, holding `value` from the start.
    pub(crate) fn absent(value: Value, tracker: DirtyTracker) -> Self {
        Self {
            origin: None,
            source: None,
            depth: 0,
            max_depth: 0,
            value: OnceCell::from(value),
            tracker,
        }
    }

    /// True once the value has been decoded (or assigned).
    pub fn is_materialized(&self) -> bool {
        self.value.get().is_some()
    }

    /// True once the value was replaced, or anything inside it was modified.
    pub fn is_dirty(&self) -> bool {
        self.tracker.is_dirty()
    }

    /// The tracker node of this segment.
    pub fn tracker(&self) -> &DirtyTracker {
        &self.tracker
    }

    /// The original byte range, while it still describes the current value.
    pub fn buffer_reference(&self) -> Option<Range<usize>> {
        match &self.origin {
            Some(range) if !self.tracker.is_dirty() => Some(range.clone()),
            _ => None,
        }
    }

    fn decode_ctx<'a>(&self, registry: &'a Registry, buf: &'a [u8]) -> Result<DecodeCtx<'a>> {
        let ctx = DecodeCtx::new(registry, buf, self.max_depth).at_depth(self.depth);
        match self.source {
            Some(source) => Ok(ctx.resuming(source)),
            None => Err(SegcodeError::Internal(
                "cache segment with backing bytes has no source".into(),
            )),
        }
    }

    /// Returns the value, decoding it from `buf` on first access.
    pub fn get<'s>(
        &'s self,
        registry: &Registry,
        buf: &[u8],
        formatter: &Formatter,
    ) -> Result<&'s Value> {
        if let Some(value) = self.value.get() {
            return Ok(value);
        }
        let range = self.origin.clone().ok_or_else(|| {
            SegcodeError::Internal("cache segment has neither a value nor backing bytes".into())
        })?;
        let ctx = self.decode_ctx(registry, buf)?.bounded(range.end)?;
        let (value, used) = formatter.deserialize(&ctx, range.start, &self.tracker)?;
        trace!(
            "materialized {} at {}: {used} bytes",
            formatter.describe(),
            range.start
        );
        // The cell was empty above and `OnceCell` is !Sync.
        let _ = self.value.set(value);
        self.value
            .get()
            .ok_or_else(|| SegcodeError::Internal("memoized cache value vanished".into()))
    }

    /// Mutable access to the value without marking it modified.
    ///
    /// Used to walk into nested objects, whose own trackers report their modifications.
    pub(crate) fn materialize_mut(
        &mut self,
        registry: &Registry,
        buf: &[u8],
        formatter: &Formatter,
    ) -> Result<&mut Value> {
        self.get(registry, buf, formatter)?;
        self.value
            .get_mut()
            .ok_or_else(|| SegcodeError::Internal("memoized cache value vanished".into()))
    }

    /// Mutable access to the value. Marks the segment modified.
    pub fn get_mut(
        &mut self,
        registry: &Registry,
        buf: &[u8],
        formatter: &Formatter,
    ) -> Result<&mut Value> {
        self.tracker.mark_dirty();
        self.materialize_mut(registry, buf, formatter)
    }

    /// Replaces the value and marks the segment modified.
    pub fn set(&mut self, value: Value) {
        self.value = OnceCell::from(value);
        self.tracker.mark_dirty();
    }

    /// Materializes the value from `buf` and cuts every tie to it, nested objects included.
    pub(crate) fn detach(
        &mut self,
        registry: &Registry,
        buf: &[u8],
        formatter: &Formatter,
    ) -> Result<()> {
        let value = self.materialize_mut(registry, buf, formatter)?;
        detach_value(registry, buf, value)?;
        self.origin = None;
        self.source = None;
        Ok(())
    }

    /// True while the value, or an object inside it, still reads from a buffer.
    pub(crate) fn reads_buffer(&self) -> bool {
        self.origin.is_some() || self.value.get().is_some_and(value_reads_buffer)
    }

    /// Wires this segment, and the objects inside its value, under `parent`.
    pub(crate) fn rewire(&mut self, parent: &DirtyTracker, source: Option<SourceId>) {
        self.tracker = parent.create_child();
        self.source = source;
        if let Some(value) = self.value.get_mut() {
            rewire_value(value, &self.tracker, source);
        }
    }

    /// Appends the encoding of this property: the original bytes while untouched, otherwise a
    /// fresh encoding of the current value.
    pub(crate) fn serialize(
        &self,
        ctx: &EncodeCtx<'_>,
        formatter: &Formatter,
        out: &mut Vec<u8>,
    ) -> Result<usize> {
        if let Some(range) = self.buffer_reference() {
            let bytes = ctx.source.get(range.clone()).ok_or_else(|| {
                SegcodeError::Internal(format!(
                    "cache range {range:?} lies outside the source buffer"
                ))
            })?;
            out.extend_from_slice(bytes);
            trace!("direct copy of {} cached bytes", bytes.len());
            return Ok(bytes.len());
        }
        let value = self.value.get().ok_or_else(|| {
            SegcodeError::Internal("modified cache segment holds no value".into())
        })?;
        formatter.serialize(ctx, value, out)
    }

    /// An index-addressable view over the encoded container.
    ///
    /// Returns `None` when there are no unmodified bytes to view (the property was absent or has
    /// been modified) or the encoded container is null; [`CacheSegment::get`] covers those cases.
    pub fn view<'a>(
        &self,
        registry: &'a Registry,
        buf: &'a [u8],
        formatter: &'a Formatter,
    ) -> Result<Option<SequenceView<'a>>> {
        if matches!(formatter, Formatter::Object(_)) {
            return Err(SegcodeError::mismatch("container", formatter.describe()));
        }
        let Some(range) = self.buffer_reference() else {
            return Ok(None);
        };
        let ctx = self.decode_ctx(registry, buf)?.bounded(range.end)?;
        SequenceView::open(&ctx, formatter, range.start)
    }
}

impl PartialEq for CacheSegment {
    fn eq(&self, other: &Self) -> bool {
        self.origin == other.origin && self.value.get() == other.value.get()
    }
}
