//! # Segcode
//!
//! A zero-copy binary object format with lazy, mutable segments.
//!
//! ## Overview
//!
//! Segcode encodes structured objects so that reading a field decodes only that field's bytes,
//! and writing a field touches only what it has to. A decoded object is not a tree of values but
//! a [`segment::ObjectSegment`]: a view over the original bytes that materializes properties on
//! demand and remembers what was modified. Serializing it again copies every untouched subtree
//! verbatim and re-encodes only the path from each modification up to the root.
//!
//! ### Key Features
//!
//! *   **Lazy Reads:** fixed-width fields are read straight from the buffer; cache-eligible
//!     fields (objects, lists, dictionaries, lookups, tuples) decode on first access.
//! *   **In-Place Writes:** fixed-width writes overwrite their bytes in the buffer, since their
//!     width never changes.
//! *   **Direct Copy:** an untouched object, however deep, is serialized as one memory copy.
//! *   **Additive Evolution:** properties carry explicit indices. Bytes written by an older
//!     schema decode under a newer one; missing properties read as their defaults.
//! *   **Index-Addressable Containers:** every container carries a stride or an offset table,
//!     so [`SequenceView`] reaches entry `i` without decoding its neighbours.
//!
//! ## File Format
//!
//! ```text
//! [ totalSize:i32 ][ binaryLastIndex:i32 ][ offset table ][ fixed region ][ payloads... ]
//! ```
//!
//! A `totalSize` of `-1` is the null sentinel. See [`format`] for the full layout and
//! [`formatter`] for containers.
//!
//! ## Core Concepts
//!
//! ### Registry
//!
//! A [`Registry`] is built once from [`TypeDescriptor`]s (or a whole [`SchemaDescriptor`]). The
//! build validates the schema and resolves every property into a formatter and a slot, so all
//! dispatch is decided up front. Schema errors never surface later.
//!
//! ### Dirty Tracker
//!
//! Every segment owns a [`DirtyTracker`] node wired to its parent's. Marking a node dirty marks
//! every ancestor, so "can this subtree be copied verbatim?" is one flag read.
//!
//! ### Documents and Cursors
//!
//! Segments never hold the buffer. A [`Document`] owns the buffer and the root segment and hands
//! out [`ObjectRef`] / [`ObjectMut`] cursors. The single-writer rule for a buffer is the borrow
//! checker's `&` / `&mut` rule.
//!
//! ## Usage
//!
//! ```rust
//! use segcode::{Registry, Segcode, TypeDescriptor, TypeRef, Value};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(
//!     Registry::builder()
//!         .add_type(
//!             TypeDescriptor::new("Item")
//!                 .property(0, "id", TypeRef::I32)
//!                 .property(1, "name", TypeRef::String)
//!                 .cached_property(5, "tags", TypeRef::list(TypeRef::I32)),
//!         )
//!         .build()?,
//! );
//!
//! let bytes = registry
//!     .new_object("Item")?
//!     .set("id", 7)?
//!     .set("name", "a")?
//!     .set("tags", Value::list([1, 2]))?
//!     .encode()?;
//!
//! let mut doc = Segcode::decode(Arc::clone(&registry), "Item", bytes.clone())?;
//! if let Some(mut item) = doc.root_mut() {
//!     item.set("id", 8)?;
//! }
//!
//! // Only the four bytes of `id` changed.
//! let out = doc.serialize()?;
//! assert_eq!(out.len(), bytes.len());
//! assert_eq!(&out[..32], &bytes[..32]);
//! assert_eq!(&out[36..], &bytes[36..]);
//! # Ok::<(), segcode::SegcodeError>(())
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **Encapsulated Unsafe:** the only `unsafe` block maps files in [`io`].
//! * **No Panics:** no `unwrap()` or `panic!()` in the library (enforced by clippy lints).
//! * **Comprehensive Errors:** all failures are a [`SegcodeError`].
//! * **Concurrency:** nothing is locked. A buffer must not be read while a fixed field in it is
//!   being written; the cursor types make that a compile error within one process.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
pub mod api;
pub mod document;
pub mod error;
pub mod format;
pub mod formatter;
pub mod inspector;
pub mod registry;
pub mod schema;
pub mod segment;
pub mod tracker;
pub mod value;

// --- INTERNAL IMPLEMENTATION MODULES (Hidden from Docs) ---
#[doc(hidden)]
pub mod io;

mod cache;

// --- RE-EXPORTS ---

pub use api::{Segcode, SegcodeOptions};
pub use cache::CacheSegment;
pub use document::{Document, ObjectMut, ObjectRef};
pub use error::{Result, SegcodeError};
pub use formatter::{Formatter, SequenceView};
pub use inspector::{Inspector, ObjectReport, PropertyReport};
pub use registry::{PropertyKey, Registry, RegistryBuilder, TypeKey};
pub use schema::{
    EnumDescriptor, PrimitiveKind, PropertyDescriptor, SchemaDescriptor, TypeDescriptor, TypeRef,
};
pub use segment::{ObjectBuilder, ObjectSegment};
pub use tracker::DirtyTracker;
pub use value::{FieldRef, Value};
