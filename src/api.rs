//! The main entry point: [`Segcode`] and its options builder.

use crate::document::Document;
use crate::error::Result;
use crate::inspector::{Inspector, ObjectReport};
use crate::io;
use crate::registry::Registry;
use crate::segment::ObjectSegment;
use memmap2::MmapMut;
use std::path::Path;
use std::sync::Arc;

/// Default limit on object and container nesting while decoding.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// The main entry point for encoding, decoding and inspecting.
#[derive(Debug)]
pub struct Segcode;

impl Segcode {
    /// Returns an options builder.
    ///
    /// ```
    /// # use segcode::Segcode;
    /// let options = Segcode::builder().max_depth(16).validate(true);
    /// # let _ = options;
    /// ```
    pub fn builder() -> SegcodeOptions {
        SegcodeOptions::default()
    }

    /// Encodes an object (usually a detached one built with
    /// [`ObjectBuilder`](crate::ObjectBuilder)).
    pub fn encode(registry: &Registry, object: &ObjectSegment) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        object.serialize(registry, &[], &mut out)?;
        Ok(out)
    }

    /// Decodes an in-memory buffer with the default options.
    pub fn decode<B>(registry: Arc<Registry>, type_name: &str, buffer: B) -> Result<Document<B>>
    where
        B: AsRef<[u8]> + AsMut<[u8]>,
    {
        Self::builder().decode(registry, type_name, buffer)
    }

    /// Maps a file copy-on-write and decodes it with the default options.
    pub fn open<P: AsRef<Path>>(
        registry: Arc<Registry>,
        type_name: &str,
        path: P,
    ) -> Result<Document<MmapMut>> {
        Self::builder().open(registry, type_name, path)
    }

    /// Walks an encoded object and reports its structure. Fails on the first corrupt range.
    pub fn inspect(registry: &Registry, type_name: &str, bytes: &[u8]) -> Result<ObjectReport> {
        Inspector::inspect(registry, type_name, bytes)
    }
}

/// Decode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegcodeOptions {
    max_depth: usize,
    validate: bool,
}

impl Default for SegcodeOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            validate: false,
        }
    }
}

impl SegcodeOptions {
    /// Limits object and container nesting. Deeper encodings fail with a format error.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Validates every offset of the encoding before decoding, instead of on first access.
    pub fn validate(mut self, enable: bool) -> Self {
        self.validate = enable;
        self
    }

    /// The configured nesting limit.
    pub fn depth_limit(&self) -> usize {
        self.max_depth
    }

    /// True when decoding validates up front.
    pub fn validates(&self) -> bool {
        self.validate
    }

    /// Decodes the object of type `type_name` at the start of `buffer`.
    pub fn decode<B>(&self, registry: Arc<Registry>, type_name: &str, buffer: B) -> Result<Document<B>>
    where
        B: AsRef<[u8]> + AsMut<[u8]>,
    {
        Document::decode_with(registry, type_name, buffer, self)
    }

    /// Maps `path` copy-on-write and decodes it. Writes never reach the file; use
    /// [`Document::save`] to persist.
    pub fn open<P: AsRef<Path>>(
        &self,
        registry: Arc<Registry>,
        type_name: &str,
        path: P,
    ) -> Result<Document<MmapMut>> {
        let map = io::map_copy(path.as_ref())?;
        self.decode(registry, type_name, map)
    }
}
