//! Buffer-owning documents and the cursors that borrow them.
//!
//! A [`Document`] pairs an encoded buffer with the root [`ObjectSegment`] decoded from it.
//! [`ObjectRef`] and [`ObjectMut`] bundle a segment with the registry and the buffer, so
//! callers never pass either explicitly. Because an `ObjectMut` holds the buffer exclusively,
//! the borrow checker rules out reading a region while it is being written.

use crate::api::SegcodeOptions;
use crate::error::{Result, SegcodeError};
use crate::format::{DecodeCtx, NULL_SENTINEL, decode_object};
use crate::formatter::SequenceView;
use crate::inspector::Inspector;
use crate::io;
use crate::registry::{PropertyKey, Registry};
use crate::segment::ObjectSegment;
use crate::tracker::DirtyTracker;
use crate::value::{FieldRef, Value};
use log::debug;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

/// An encoded object together with its buffer.
#[derive(Debug)]
pub struct Document<B> {
    registry: Arc<Registry>,
    buffer: B,
    tracker: DirtyTracker,
    root: Option<ObjectSegment>,
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Document<B> {
    /// Decodes the object of type `type_name` at the start of `buffer`.
    pub fn decode_with(
        registry: Arc<Registry>,
        type_name: &str,
        buffer: B,
        options: &SegcodeOptions,
    ) -> Result<Self> {
        let key = registry.key(type_name)?;
        let bytes = buffer.as_ref();
        if options.validates() {
            Inspector::walk(&registry, key, bytes, options.depth_limit())?;
        }

        let tracker = DirtyTracker::root();
        let ctx = DecodeCtx::new(&registry, bytes, options.depth_limit());
        let (root, used) = decode_object(&ctx, 0, key, &tracker)?;
        debug!(
            "decoded '{type_name}': {used} of {} bytes, binary last index {}",
            bytes.len(),
            root.as_ref().map_or(-1, ObjectSegment::binary_last_index)
        );

        Ok(Self {
            registry,
            buffer,
            tracker,
            root,
        })
    }

    /// The registry the document was decoded with.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The current buffer, including in-place fixed writes.
    pub fn buffer(&self) -> &[u8] {
        self.buffer.as_ref()
    }

    /// Gives the buffer back.
    pub fn into_buffer(self) -> B {
        self.buffer
    }

    /// True when the encoded root was the null sentinel.
    pub fn is_null(&self) -> bool {
        self.root.is_none()
    }

    /// True once anything in the document was modified in a way that needs re-encoding.
    pub fn is_dirty(&self) -> bool {
        self.tracker.is_dirty()
    }

    /// A shared cursor on the root object; `None` when the root is null.
    pub fn root(&self) -> Option<ObjectRef<'_>> {
        self.root.as_ref().map(|segment| ObjectRef {
            registry: &self.registry,
            buf: self.buffer.as_ref(),
            segment,
        })
    }

    /// An exclusive cursor on the root object; `None` when the root is null.
    pub fn root_mut(&mut self) -> Option<ObjectMut<'_>> {
        let registry = &self.registry;
        let buf = self.buffer.as_mut();
        self.root.as_mut().map(|segment| ObjectMut {
            registry,
            buf,
            segment,
        })
    }

    /// Produces the encoding of the current state.
    ///
    /// Untouched subtrees are copied verbatim; only the path to each modification is re-encoded.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.buffer.as_ref().len());
        match &self.root {
            None => out.extend_from_slice(&NULL_SENTINEL.to_le_bytes()),
            Some(root) => {
                root.serialize(&self.registry, self.buffer.as_ref(), &mut out)?;
            }
        }
        debug!(
            "serialized document: {} bytes ({})",
            out.len(),
            if self.is_dirty() { "re-encoded" } else { "direct copy" }
        );
        Ok(out)
    }

    /// Serializes the document and writes it to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        io::write_file(path.as_ref(), &self.serialize()?)
    }
}

/// A shared cursor: a segment, its registry and its buffer.
#[derive(Debug, Clone, Copy)]
pub struct ObjectRef<'d> {
    registry: &'d Registry,
    buf: &'d [u8],
    segment: &'d ObjectSegment,
}

impl<'d> ObjectRef<'d> {
    /// Wraps a segment decoded from `buf`.
    pub fn new(registry: &'d Registry, buf: &'d [u8], segment: &'d ObjectSegment) -> Self {
        Self {
            registry,
            buf,
            segment,
        }
    }

    /// The underlying segment.
    pub fn segment(&self) -> &'d ObjectSegment {
        self.segment
    }

    /// Name of the object's type.
    pub fn type_name(&self) -> Result<&'d str> {
        Ok(self.registry.plan(self.segment.type_key())?.name())
    }

    /// Reads a property.
    pub fn get(&self, key: impl PropertyKey) -> Result<FieldRef<'d>> {
        self.segment.get(self.registry, self.buf, key)
    }

    /// A nested object; `None` when the property is null.
    pub fn object(&self, key: impl PropertyKey) -> Result<Option<ObjectRef<'d>>> {
        Ok(self
            .segment
            .object(self.registry, self.buf, key)?
            .map(|segment| ObjectRef::new(self.registry, self.buf, segment)))
    }

    /// Element `index` of a list of objects; `None` when the element is null.
    pub fn list_object(&self, key: impl PropertyKey, index: usize) -> Result<Option<ObjectRef<'d>>> {
        let FieldRef::Borrowed(value) = self.get(key)? else {
            return Err(SegcodeError::mismatch("list of objects", "fixed value"));
        };
        match list_element(value, index)? {
            Value::Object(segment) => Ok(Some(ObjectRef::new(self.registry, self.buf, segment))),
            Value::Null => Ok(None),
            other => Err(SegcodeError::mismatch("object", other.kind())),
        }
    }

    /// See [`ObjectSegment::is_materialized`].
    pub fn is_materialized(&self, key: impl PropertyKey) -> Result<bool> {
        self.segment.is_materialized(self.registry, key)
    }

    /// An index-addressable view over an unmodified cache-eligible container.
    pub fn sequence(&self, key: impl PropertyKey) -> Result<Option<SequenceView<'d>>> {
        self.segment.sequence(self.registry, self.buf, key)
    }

    /// See [`ObjectSegment::can_direct_copy`].
    pub fn can_direct_copy(&self) -> bool {
        self.segment.can_direct_copy()
    }

    /// See [`ObjectSegment::buffer_reference`].
    pub fn buffer_reference(&self) -> Option<Range<usize>> {
        self.segment.buffer_reference()
    }

    /// True once anything at or below this object was modified.
    pub fn is_dirty(&self) -> bool {
        self.segment.is_dirty()
    }
}

/// An exclusive cursor: a segment, its registry and exclusive access to its buffer.
#[derive(Debug)]
pub struct ObjectMut<'d> {
    registry: &'d Registry,
    buf: &'d mut [u8],
    segment: &'d mut ObjectSegment,
}

impl<'d> ObjectMut<'d> {
    /// Wraps a segment decoded from `buf`.
    pub fn new(registry: &'d Registry, buf: &'d mut [u8], segment: &'d mut ObjectSegment) -> Self {
        Self {
            registry,
            buf,
            segment,
        }
    }

    /// A shared cursor on the same object.
    pub fn to_ref(&self) -> ObjectRef<'_> {
        ObjectRef::new(self.registry, &*self.buf, &*self.segment)
    }

    /// Reads a property.
    pub fn get(&self, key: impl PropertyKey) -> Result<FieldRef<'_>> {
        self.segment.get(self.registry, &*self.buf, key)
    }

    /// Writes a property. See [`ObjectSegment::set`].
    pub fn set(&mut self, key: impl PropertyKey, value: impl Into<Value>) -> Result<()> {
        self.segment.set(self.registry, self.buf, key, value.into())
    }

    /// Mutable access to a variable property. Marks the object modified.
    pub fn value_mut(&mut self, key: impl PropertyKey) -> Result<&mut Value> {
        self.segment.value_mut(self.registry, &*self.buf, key)
    }

    /// An exclusive cursor on a nested object; `None` when the property is null.
    pub fn object_mut(&mut self, key: impl PropertyKey) -> Result<Option<ObjectMut<'_>>> {
        let registry = self.registry;
        let child = self.segment.object_mut(registry, &*self.buf, key)?;
        Ok(child.map(|segment| ObjectMut::new(registry, &mut *self.buf, segment)))
    }

    /// An exclusive cursor on element `index` of a list of objects.
    pub fn list_object_mut(
        &mut self,
        key: impl PropertyKey,
        index: usize,
    ) -> Result<Option<ObjectMut<'_>>> {
        let registry = self.registry;
        let value = self.segment.navigate_mut(registry, &*self.buf, key)?;
        let element = value
            .as_list_mut()
            .ok_or_else(|| SegcodeError::mismatch("list of objects", "non-list value"))?;
        let len = element.len();
        let element = element.get_mut(index).ok_or_else(|| {
            SegcodeError::UnknownProperty(format!("element {index} of a list of {len}"))
        })?;
        match element {
            Value::Object(segment) => Ok(Some(ObjectMut::new(registry, &mut *self.buf, segment))),
            Value::Null => Ok(None),
            other => Err(SegcodeError::mismatch("object", other.kind())),
        }
    }

    /// True once anything at or below this object was modified.
    pub fn is_dirty(&self) -> bool {
        self.segment.is_dirty()
    }
}

fn list_element(value: &Value, index: usize) -> Result<&Value> {
    let items = value
        .as_list()
        .ok_or_else(|| SegcodeError::mismatch("list of objects", value.kind()))?;
    items.get(index).ok_or_else(|| {
        SegcodeError::UnknownProperty(format!("element {index} of a list of {}", items.len()))
    })
}
