//! Type Policy: pure classification rules.
//!
//! Every type reference is either fixed-width (its bytes live in the object's fixed region and are
//! mutated in place), variable-width (recursively encoded into its own payload), or unsupported.
//! Unsupported shapes are the eagerly materializing containers: they would need a full upfront
//! decode, so the policy rejects them in favor of the index-addressable container contracts.

use super::descriptor::{PrimitiveKind, TypeRef};

/// The outcome of classifying a type reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Stored inline with this exact width in bytes.
    FixedWidth(usize),
    /// Stored as a separately encoded payload.
    Variable,
    /// Rejected at schema-build time, with the reason.
    Unsupported(String),
}

impl Classification {
    /// Fixed width, if any.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            Self::FixedWidth(w) => Some(*w),
            _ => None,
        }
    }
}

/// Classifies a type reference.
///
/// Nullable wrappers double the width of the wrapped value: one presence byte padded up to the
/// value's width, followed by the value itself.
pub fn classify(type_ref: &TypeRef) -> Classification {
    match type_ref {
        TypeRef::Primitive(p) => Classification::FixedWidth(p.width()),
        TypeRef::Enum(e) => {
            if e.storage.is_integer() {
                Classification::FixedWidth(e.width())
            } else {
                Classification::Unsupported(format!(
                    "enum '{}' must be backed by an integer type, not {}",
                    e.name,
                    e.storage.name()
                ))
            }
        }
        TypeRef::Nullable(inner) => match inner.as_ref() {
            TypeRef::Primitive(_) | TypeRef::Enum(_) => match classify(inner) {
                Classification::FixedWidth(w) => Classification::FixedWidth(w * 2),
                other => other,
            },
            other => Classification::Unsupported(format!(
                "nullable wrapper requires a fixed-width primitive or enum, found {other}"
            )),
        },
        TypeRef::String | TypeRef::Bytes | TypeRef::Object(_) => Classification::Variable,
        TypeRef::List(element) => members_supported([element.as_ref()]),
        TypeRef::Dictionary(key, value) | TypeRef::Lookup(key, value) => {
            members_supported([key.as_ref(), value.as_ref()])
        }
        TypeRef::KeyTuple(members) => {
            if members.is_empty() {
                return Classification::Unsupported("key tuple needs at least one member".into());
            }
            members_supported(members.iter())
        }
        TypeRef::Array(element) if **element == TypeRef::Primitive(PrimitiveKind::U8) => {
            Classification::Variable
        }
        TypeRef::Array(element) => Classification::Unsupported(format!(
            "array of {element} must be fully materialized; use list<{element}> instead"
        )),
        TypeRef::EagerList(element) => Classification::Unsupported(format!(
            "eager list of {element} is not lazily addressable; use list<{element}> instead"
        )),
        TypeRef::EagerDictionary(key, value) => Classification::Unsupported(format!(
            "eager dictionary of {key} to {value} is not lazily addressable; use dictionary<{key}, {value}> instead"
        )),
    }
}

fn members_supported<'a>(members: impl IntoIterator<Item = &'a TypeRef>) -> Classification {
    for member in members {
        if let Classification::Unsupported(reason) = classify(member) {
            return Classification::Unsupported(reason);
        }
    }
    Classification::Variable
}

/// True when a property of this type may be wrapped in a cache segment.
///
/// Objects and the four container shapes qualify; strings, byte arrays and fixed-width values do
/// not (they are cheap enough to decode eagerly or live in the fixed region).
pub fn is_cache_eligible(type_ref: &TypeRef) -> bool {
    matches!(
        type_ref,
        TypeRef::Object(_)
            | TypeRef::List(_)
            | TypeRef::Dictionary(..)
            | TypeRef::Lookup(..)
            | TypeRef::KeyTuple(_)
    )
}
