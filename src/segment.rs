//! The lazy object segment.
//!
//! An [`ObjectSegment`] is a view over one encoded object. It never holds the byte buffer; every
//! accessor takes the buffer the segment was decoded from. Per property it keeps one [`Slot`]:
//!
//! * fixed-width properties keep only the absolute offset of their bytes, and reads and writes go
//!   straight to the buffer (or to the extra-fixed buffer when the instance has no bytes for them);
//! * plain variable properties hold their decoded [`Value`];
//! * cache-eligible properties hold a [`CacheSegment`].
//!
//! Serialization copies the original byte range verbatim while nothing below the segment changed,
//! and re-encodes it against the current schema otherwise.
//!
//! A segment decoded from a buffer remembers which decode produced it ([`SourceId`]). Values
//! stored into a segment are adopted: objects that still read from the same buffer are detached
//! (their bytes copied into them) so no two properties share bytes, and objects that read from a
//! different buffer are rejected with [`SegcodeError::ForeignSegment`].

use crate::cache::CacheSegment;
use crate::error::{Result, SegcodeError};
use crate::format::{EncodeCtx, SourceId, encode_object};
use crate::formatter::{SequenceView, zeroed};
use crate::registry::{ObjectPlan, PropertyKey, PropertyPlan, Registry, SlotKind, TypeKey};
use crate::tracker::DirtyTracker;
use crate::value::{FieldRef, Value};
use log::trace;
use std::ops::Range;

/// Storage of one property inside a segment.
#[derive(Debug, PartialEq)]
pub(crate) enum Slot {
    /// Absolute offset of the property's bytes in the source buffer, if the instance has them.
    Fixed(Option<usize>),
    /// An eagerly decoded variable property.
    Plain(Value),
    /// A lazily decoded variable property.
    Cached(CacheSegment),
}

/// A mutable, lazily decoded view over one encoded object.
///
/// Segments decoded from a buffer hold absolute offsets into it, so they must only be used with
/// that buffer (or with the copy a [`crate::Document`] owns). [`ObjectSegment::detach`] turns
/// one into a self-contained object.
#[derive(Debug)]
pub struct ObjectSegment {
    ty: TypeKey,
    origin: Option<Range<usize>>,
    source: Option<SourceId>,
    binary_last_index: i32,
    tracker: DirtyTracker,
    slots: Vec<Slot>,
    extra_fixed: Option<Vec<u8>>,
}

impl ObjectSegment {
    /// A fresh object without backing bytes. Every property starts at its default.
    pub fn detached(registry: &Registry, key: TypeKey) -> Result<Self> {
        let plan = registry.plan(key)?;
        let tracker = DirtyTracker::root();
        let slots = plan
            .properties()
            .iter()
            .map(|prop| match prop.slot() {
                SlotKind::Fixed { .. } => Slot::Fixed(None),
                SlotKind::Variable => Slot::Plain(prop.formatter().default_value()),
                SlotKind::Cached => Slot::Cached(CacheSegment::absent(
                    prop.formatter().default_value(),
                    tracker.create_child(),
                )),
            })
            .collect();
        Ok(Self {
            ty: key,
            origin: None,
            source: None,
            binary_last_index: plan.last_index(),
            tracker,
            slots,
            extra_fixed: None,
        })
    }

    pub(crate) fn from_parts(
        ty: TypeKey,
        origin: Range<usize>,
        source: SourceId,
        binary_last_index: i32,
        tracker: DirtyTracker,
        slots: Vec<Slot>,
    ) -> Self {
        Self {
            ty,
            origin: Some(origin),
            source: Some(source),
            binary_last_index,
            tracker,
            slots,
            extra_fixed: None,
        }
    }

    /// The object's type.
    pub fn type_key(&self) -> TypeKey {
        self.ty
    }

    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Highest index present in the bytes this segment was decoded from.
    pub fn binary_last_index(&self) -> i32 {
        self.binary_last_index
    }

    /// The byte range this segment was decoded from; `None` for detached objects.
    pub fn origin(&self) -> Option<Range<usize>> {
        self.origin.clone()
    }

    /// The buffer this segment belongs to; `None` for objects never stored in a document.
    pub fn source_id(&self) -> Option<SourceId> {
        self.source
    }

    /// The tracker node of this segment.
    pub fn tracker(&self) -> &DirtyTracker {
        &self.tracker
    }

    /// True once anything at or below this segment was modified.
    pub fn is_dirty(&self) -> bool {
        self.tracker.is_dirty()
    }

    /// True when an extra-fixed buffer was allocated.
    pub fn has_extra_fixed(&self) -> bool {
        self.extra_fixed.is_some()
    }

    /// True when the original byte range still encodes this object exactly.
    pub fn can_direct_copy(&self) -> bool {
        self.origin.is_some() && !self.tracker.is_dirty() && self.extra_fixed.is_none()
    }

    /// The original byte range, valid only while [`ObjectSegment::can_direct_copy`] holds.
    pub fn buffer_reference(&self) -> Option<Range<usize>> {
        if self.can_direct_copy() {
            self.origin.clone()
        } else {
            None
        }
    }

    /// Appends the encoding of this object to `out`, returning the bytes written.
    ///
    /// `source` is the buffer the segment was decoded from (ignored for detached objects).
    pub fn serialize(&self, registry: &Registry, source: &[u8], out: &mut Vec<u8>) -> Result<usize> {
        self.serialize_with(&EncodeCtx::new(registry, source).identified(self.source), out)
    }

    pub(crate) fn serialize_with(&self, ctx: &EncodeCtx<'_>, out: &mut Vec<u8>) -> Result<usize> {
        if self.origin.is_some() && self.source != ctx.source_id {
            return Err(SegcodeError::ForeignSegment(format!(
                "object decoded at {:?} does not belong to the buffer being serialized",
                self.origin
            )));
        }
        if let Some(range) = self.buffer_reference() {
            let bytes = ctx.source.get(range.clone()).ok_or_else(|| {
                SegcodeError::Internal(format!(
                    "segment range {range:?} lies outside the source buffer of {} bytes",
                    ctx.source.len()
                ))
            })?;
            out.extend_from_slice(bytes);
            trace!("direct copy of {} object bytes from {}", bytes.len(), range.start);
            return Ok(bytes.len());
        }
        encode_object(ctx, self, out)
    }

    /// The current bytes of a fixed property: from the source buffer when the instance has them,
    /// else from the extra-fixed buffer, else zeros.
    pub(crate) fn fixed_bytes<'a>(
        &'a self,
        source: &'a [u8],
        offset: usize,
        width: usize,
        at: Option<usize>,
    ) -> Result<&'a [u8]> {
        match (at, &self.extra_fixed) {
            (Some(abs), _) => source.get(abs..abs + width).ok_or_else(|| {
                SegcodeError::format(format!(
                    "fixed slot at {abs} overruns the buffer of {} bytes",
                    source.len()
                ))
            }),
            (None, Some(extra)) => extra.get(offset..offset + width).ok_or_else(|| {
                SegcodeError::Internal(format!("extra-fixed slot at {offset} is out of range"))
            }),
            (None, None) => zeroed(width),
        }
    }

    fn locate<'r>(
        &self,
        registry: &'r Registry,
        key: impl PropertyKey,
    ) -> Result<(&'r ObjectPlan, usize)> {
        let plan = registry.plan(self.ty)?;
        let pos = key.position(plan)?;
        if pos >= self.slots.len() {
            return Err(SegcodeError::Internal(format!(
                "segment of '{}' has {} slots, property position {pos} requested",
                plan.name(),
                self.slots.len()
            )));
        }
        Ok((plan, pos))
    }

    /// Reads a property.
    ///
    /// Fixed values are decoded from their bytes on every call; cache-eligible values are decoded
    /// on the first call and memoized.
    pub fn get<'s>(
        &'s self,
        registry: &Registry,
        buf: &[u8],
        key: impl PropertyKey,
    ) -> Result<FieldRef<'s>> {
        let (plan, pos) = self.locate(registry, key)?;
        let prop = &plan.properties()[pos];
        match &self.slots[pos] {
            Slot::Fixed(at) => {
                let (shape, offset, width) = fixed_parts(prop)?;
                let bytes = self.fixed_bytes(buf, offset, width, *at)?;
                Ok(FieldRef::Owned(shape.decode(bytes)?))
            }
            Slot::Plain(value) => Ok(FieldRef::Borrowed(value)),
            Slot::Cached(cache) => Ok(FieldRef::Borrowed(cache.get(
                registry,
                buf,
                prop.formatter(),
            )?)),
        }
    }

    /// True once a property's value is held in memory. Only cache-eligible properties can be
    /// unmaterialized; fixed values are decoded on every read and plain values at decode time.
    pub fn is_materialized(&self, registry: &Registry, key: impl PropertyKey) -> Result<bool> {
        let (_, pos) = self.locate(registry, key)?;
        Ok(match &self.slots[pos] {
            Slot::Cached(cache) => cache.is_materialized(),
            Slot::Fixed(_) | Slot::Plain(_) => true,
        })
    }

    /// Writes a property.
    ///
    /// Fixed values present in the buffer are overwritten in place and leave the segment clean.
    /// Fixed values the instance has no bytes for go to the extra-fixed buffer, which rules out a
    /// direct copy and marks the segment modified. Variable values replace the held value and mark
    /// the segment modified.
    ///
    /// Objects inside a variable value are adopted: those still reading from `buf` are detached
    /// from it, those reading from any other buffer are rejected.
    pub fn set(
        &mut self,
        registry: &Registry,
        buf: &mut [u8],
        key: impl PropertyKey,
        mut value: Value,
    ) -> Result<()> {
        let (plan, pos) = self.locate(registry, key)?;
        let prop = &plan.properties()[pos];
        prop.formatter().check(&value)?;

        match &mut self.slots[pos] {
            Slot::Fixed(at) => {
                let at = *at;
                let (shape, offset, width) = fixed_parts(prop)?;
                match at {
                    Some(abs) => {
                        let len = buf.len();
                        let dst = buf.get_mut(abs..abs + width).ok_or_else(|| {
                            SegcodeError::format(format!(
                                "fixed slot at {abs} overruns the buffer of {len} bytes"
                            ))
                        })?;
                        shape.encode(&value, dst)?;
                    }
                    None => {
                        let extra = self.extra_fixed.get_or_insert_with(|| {
                            trace!(
                                "allocating {} byte extra-fixed buffer for '{}'",
                                plan.fixed_region_len(),
                                plan.name()
                            );
                            vec![0; plan.fixed_region_len()]
                        });
                        let dst = extra.get_mut(offset..offset + width).ok_or_else(|| {
                            SegcodeError::Internal(format!(
                                "extra-fixed slot at {offset} is out of range"
                            ))
                        })?;
                        shape.encode(&value, dst)?;
                        self.tracker.mark_dirty();
                    }
                }
            }
            Slot::Plain(current) => {
                adopt(registry, buf, self.source, &self.tracker, &mut value)?;
                *current = value;
                self.tracker.mark_dirty();
            }
            Slot::Cached(cache) => {
                adopt(registry, buf, self.source, cache.tracker(), &mut value)?;
                cache.set(value);
            }
        }
        Ok(())
    }

    /// Copies everything this segment still reads from `buf` into the segment itself.
    ///
    /// Fixed values move to the extra-fixed buffer, cache-eligible values are materialized, and
    /// nested objects are detached in turn. Afterwards the segment no longer has an origin, so
    /// it is re-encoded whenever it is serialized, and it can be stored in any object.
    pub fn detach(&mut self, registry: &Registry, buf: &[u8]) -> Result<()> {
        let plan = registry.plan(self.ty)?;
        for (prop, slot) in plan.properties().iter().zip(self.slots.iter_mut()) {
            match slot {
                Slot::Fixed(at) => {
                    let Some(abs) = *at else { continue };
                    let (_, offset, width) = fixed_parts(prop)?;
                    let bytes = buf.get(abs..abs + width).ok_or_else(|| {
                        SegcodeError::format(format!(
                            "fixed slot at {abs} overruns the buffer of {} bytes",
                            buf.len()
                        ))
                    })?;
                    let extra = self
                        .extra_fixed
                        .get_or_insert_with(|| vec![0; plan.fixed_region_len()]);
                    extra
                        .get_mut(offset..offset + width)
                        .ok_or_else(|| {
                            SegcodeError::Internal(format!(
                                "extra-fixed slot at {offset} is out of range"
                            ))
                        })?
                        .copy_from_slice(bytes);
                    *at = None;
                }
                Slot::Plain(value) => detach_value(registry, buf, value)?,
                Slot::Cached(cache) => cache.detach(registry, buf, prop.formatter())?,
            }
        }
        if let Some(origin) = self.origin.take() {
            trace!("detached '{}' from {origin:?}", plan.name());
        }
        self.source = None;
        Ok(())
    }

    /// True when this segment, or anything below it, still reads from a buffer.
    pub(crate) fn reads_buffer(&self) -> bool {
        self.origin.is_some()
            || self.slots.iter().any(|slot| match slot {
                Slot::Fixed(at) => at.is_some(),
                Slot::Plain(value) => value_reads_buffer(value),
                Slot::Cached(cache) => cache.reads_buffer(),
            })
    }

    /// Gives this segment, and every object below it, fresh trackers under `parent`.
    fn rewire(&mut self, parent: &DirtyTracker, source: Option<SourceId>) {
        self.tracker = parent.create_child();
        self.source = source;
        for slot in &mut self.slots {
            match slot {
                Slot::Fixed(_) => {}
                Slot::Plain(value) => rewire_value(value, &self.tracker, source),
                Slot::Cached(cache) => cache.rewire(&self.tracker, source),
            }
        }
    }

    /// Mutable access to a variable property's value. Marks the segment modified.
    ///
    /// Objects placed through this reference are not adopted: they must already be detached (or
    /// decoded from this segment's own buffer), or serialization fails.
    pub fn value_mut(
        &mut self,
        registry: &Registry,
        buf: &[u8],
        key: impl PropertyKey,
    ) -> Result<&mut Value> {
        let (plan, pos) = self.locate(registry, key)?;
        let prop = &plan.properties()[pos];
        match &mut self.slots[pos] {
            Slot::Fixed(_) => Err(SegcodeError::mismatch(
                "variable property",
                prop.formatter().describe(),
            )),
            Slot::Plain(value) => {
                self.tracker.mark_dirty();
                Ok(value)
            }
            Slot::Cached(cache) => cache.get_mut(registry, buf, prop.formatter()),
        }
    }

    /// Mutable access to a variable property's value, leaving the segment clean.
    ///
    /// Only for walking into nested objects: their trackers report modifications upward.
    pub(crate) fn navigate_mut(
        &mut self,
        registry: &Registry,
        buf: &[u8],
        key: impl PropertyKey,
    ) -> Result<&mut Value> {
        let (plan, pos) = self.locate(registry, key)?;
        let prop = &plan.properties()[pos];
        match &mut self.slots[pos] {
            Slot::Fixed(_) => Err(SegcodeError::mismatch(
                "variable property",
                prop.formatter().describe(),
            )),
            Slot::Plain(value) => Ok(value),
            Slot::Cached(cache) => cache.materialize_mut(registry, buf, prop.formatter()),
        }
    }

    /// The nested object held by an object-typed property; `None` when it is null.
    pub fn object<'s>(
        &'s self,
        registry: &Registry,
        buf: &[u8],
        key: impl PropertyKey,
    ) -> Result<Option<&'s ObjectSegment>> {
        match self.get(registry, buf, key)? {
            FieldRef::Borrowed(value) => as_object(value),
            FieldRef::Owned(value) => Err(SegcodeError::mismatch("object", value.kind())),
        }
    }

    /// Mutable access to a nested object. Does not mark this segment modified by itself.
    pub fn object_mut(
        &mut self,
        registry: &Registry,
        buf: &[u8],
        key: impl PropertyKey,
    ) -> Result<Option<&mut ObjectSegment>> {
        match self.navigate_mut(registry, buf, key)? {
            Value::Object(seg) => Ok(Some(seg)),
            Value::Null => Ok(None),
            other => Err(SegcodeError::mismatch("object", other.kind())),
        }
    }

    /// An index-addressable view over an unmodified cache-eligible container.
    pub fn sequence<'a>(
        &self,
        registry: &'a Registry,
        buf: &'a [u8],
        key: impl PropertyKey,
    ) -> Result<Option<SequenceView<'a>>> {
        let (plan, pos) = self.locate(registry, key)?;
        let prop = &plan.properties()[pos];
        match &self.slots[pos] {
            Slot::Cached(cache) => cache.view(registry, buf, prop.formatter()),
            _ => Err(SegcodeError::mismatch(
                "cache-eligible property",
                prop.formatter().describe(),
            )),
        }
    }
}

fn fixed_parts(prop: &PropertyPlan) -> Result<(&crate::formatter::FixedShape, usize, usize)> {
    match (prop.fixed_shape(), prop.slot()) {
        (Some(shape), SlotKind::Fixed { offset, width }) => Ok((shape, offset, width)),
        _ => Err(SegcodeError::Internal(format!(
            "property '{}' has a fixed slot but no fixed plan",
            prop.name()
        ))),
    }
}

/// Calls `visit` on every object directly held by `value`, looking through containers but not
/// into the objects themselves.
fn for_each_object<F>(value: &mut Value, visit: &mut F) -> Result<()>
where
    F: FnMut(&mut ObjectSegment) -> Result<()>,
{
    match value {
        Value::Object(seg) => visit(seg),
        Value::List(items) | Value::Tuple(items) => {
            items.iter_mut().try_for_each(|item| for_each_object(item, visit))
        }
        Value::Dict(entries) => entries.iter_mut().try_for_each(|(k, v)| {
            for_each_object(k, visit)?;
            for_each_object(v, visit)
        }),
        Value::Lookup(groups) => groups.iter_mut().try_for_each(|(k, group)| {
            for_each_object(k, visit)?;
            group.iter_mut().try_for_each(|item| for_each_object(item, visit))
        }),
        _ => Ok(()),
    }
}

/// True when any object inside `value` still reads from a buffer.
pub(crate) fn value_reads_buffer(value: &Value) -> bool {
    match value {
        Value::Object(seg) => seg.reads_buffer(),
        Value::List(items) | Value::Tuple(items) => items.iter().any(value_reads_buffer),
        Value::Dict(entries) => entries
            .iter()
            .any(|(k, v)| value_reads_buffer(k) || value_reads_buffer(v)),
        Value::Lookup(groups) => groups
            .iter()
            .any(|(k, group)| value_reads_buffer(k) || group.iter().any(value_reads_buffer)),
        _ => false,
    }
}

/// Detaches every object inside `value` from `buf`.
pub(crate) fn detach_value(registry: &Registry, buf: &[u8], value: &mut Value) -> Result<()> {
    for_each_object(value, &mut |seg: &mut ObjectSegment| seg.detach(registry, buf))
}

/// Rewires every object inside `value` under `parent`.
pub(crate) fn rewire_value(value: &mut Value, parent: &DirtyTracker, source: Option<SourceId>) {
    let _ = for_each_object(value, &mut |seg: &mut ObjectSegment| {
        seg.rewire(parent, source);
        Ok(())
    });
}

/// Prepares `value` for storage in an object belonging to `source`, whose bytes are `buf`.
fn adopt(
    registry: &Registry,
    buf: &[u8],
    source: Option<SourceId>,
    parent: &DirtyTracker,
    value: &mut Value,
) -> Result<()> {
    for_each_object(value, &mut |seg: &mut ObjectSegment| {
        if seg.source.is_some() && seg.source == source {
            seg.detach(registry, buf)?;
        } else if seg.reads_buffer() {
            let name = registry.plan(seg.ty).map_or("?", ObjectPlan::name);
            return Err(SegcodeError::ForeignSegment(format!(
                "'{name}' object reads from another buffer; detach it before storing it"
            )));
        }
        seg.rewire(parent, source);
        Ok(())
    })
}

fn as_object(value: &Value) -> Result<Option<&ObjectSegment>> {
    match value {
        Value::Object(seg) => Ok(Some(seg)),
        Value::Null => Ok(None),
        other => Err(SegcodeError::mismatch("object", other.kind())),
    }
}

/// Segments are equal when they are of the same type, view the same bytes, and hold equal
/// variable values and extra-fixed bytes.
impl PartialEq for ObjectSegment {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty
            && self.origin == other.origin
            && self.binary_last_index == other.binary_last_index
            && self.slots == other.slots
            && self.extra_fixed == other.extra_fixed
    }
}

/// Builds a detached object property by property.
///
/// ```
/// use segcode::{Registry, TypeDescriptor, TypeRef};
///
/// let registry = Registry::builder()
///     .add_type(
///         TypeDescriptor::new("Point")
///             .property(0, "x", TypeRef::I32)
///             .property(1, "y", TypeRef::I32),
///     )
///     .build()?;
///
/// let bytes = registry.new_object("Point")?.set("x", 3)?.set("y", -4)?.encode()?;
/// assert_eq!(bytes.len(), 8 + 4 * 2 + 8);
/// # Ok::<(), segcode::SegcodeError>(())
/// ```
#[derive(Debug)]
pub struct ObjectBuilder<'r> {
    registry: &'r Registry,
    segment: ObjectSegment,
}

impl<'r> ObjectBuilder<'r> {
    /// Starts a fresh object of the named type.
    pub fn new(registry: &'r Registry, type_name: &str) -> Result<Self> {
        let key = registry.key(type_name)?;
        Ok(Self {
            registry,
            segment: ObjectSegment::detached(registry, key)?,
        })
    }

    /// Sets a property.
    pub fn set(mut self, key: impl PropertyKey, value: impl Into<Value>) -> Result<Self> {
        self.segment.set(self.registry, &mut [], key, value.into())?;
        Ok(self)
    }

    /// Finishes the object.
    pub fn build(self) -> ObjectSegment {
        self.segment
    }

    /// Finishes the object and encodes it.
    pub fn encode(self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.segment.serialize(self.registry, &[], &mut out)?;
        Ok(out)
    }
}
