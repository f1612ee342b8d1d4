//! Centralized error handling for Segcode.
//!
//! Every fallible operation in the crate returns [`Result`], and every failure is one of the
//! [`SegcodeError`] variants below. The library never panics on bad input: schema violations are
//! reported when the [`Registry`](crate::registry::Registry) is built, corrupt bytes are reported
//! when the offending range is first touched (or up front, when decoding with validation on).
//!
//! ## Error Categories
//!
//! - **Schema Errors** ([`SegcodeError::Schema`]): the descriptor handed to the registry builder
//!   is not valid (duplicate index, unsupported container, unknown object type, ...).
//! - **Format Errors** ([`SegcodeError::Format`]): the bytes do not describe a valid encoding
//!   (offset out of range, negative size, invalid UTF-8, nesting too deep, ...).
//! - **Type Mismatches** ([`SegcodeError::TypeMismatch`]): a value written to a property does not
//!   fit the property's declared type.
//! - **Lookups** ([`SegcodeError::UnknownType`], [`SegcodeError::UnknownProperty`]).
//! - **Foreign Segments** ([`SegcodeError::ForeignSegment`]): a segment still reading from the
//!   buffer it was decoded from was stored in, or serialized against, a different buffer.
//! - **I/O Errors** ([`SegcodeError::Io`]) and **Serialization Errors**
//!   ([`SegcodeError::Serialization`]) from file mapping and descriptor persistence.
//! - **Internal Errors** ([`SegcodeError::Internal`]): logic errors (please report them).
//!
//! ## Example
//!
//! ```rust
//! use segcode::SegcodeError;
//!
//! fn describe(err: &SegcodeError) -> &'static str {
//!     match err {
//!         SegcodeError::Schema(_) => "bad schema",
//!         SegcodeError::Format(_) => "corrupt bytes",
//!         _ => "other",
//!     }
//! }
//! # assert_eq!(describe(&SegcodeError::Format("x".into())), "corrupt bytes");
//! ```

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// A specialized `Result` type for Segcode operations.
pub type Result<T> = std::result::Result<T, SegcodeError>;

/// The master error enum covering all failure domains in Segcode.
///
/// This type is `Clone`; I/O errors are wrapped in an `Arc` to keep cloning cheap.
#[derive(Debug, Clone, Error)]
pub enum SegcodeError {
    /// Low-level I/O failure while opening, mapping or writing a file.
    #[error("I/O Error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// A schema descriptor could not be persisted or restored (bincode).
    #[error("Serialization Error: {0}")]
    Serialization(String),

    /// The schema descriptor is invalid. Raised only while building a registry.
    #[error("Schema Error: {0}")]
    Schema(String),

    /// The encoded bytes are corrupt or truncated.
    #[error("Format Error: {0}")]
    Format(String),

    /// A value does not match the declared type of the slot it is written to.
    #[error("Type Mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Declared type of the slot.
        expected: String,
        /// Kind of the offending value.
        found: String,
    },

    /// The registry has no type with this name.
    #[error("Unknown type '{0}'")]
    UnknownType(String),

    /// The type declares no property with this name or index.
    #[error("Unknown property {0}")]
    UnknownProperty(String),

    /// Logic error inside the library. Should not occur in production.
    #[error("Internal Logic Error: {0}")]
    Internal(String),

    /// A segment that still reads from its source buffer met a different buffer. Detach it first
    /// with [`ObjectSegment::detach`](crate::segment::ObjectSegment::detach).
    #[error("Foreign Segment: {0}")]
    ForeignSegment(String),
}

impl From<io::Error> for SegcodeError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl SegcodeError {
    #[cold]
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    #[cold]
    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    #[cold]
    pub(crate) fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}
