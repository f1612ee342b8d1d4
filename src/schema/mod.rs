//! Schema input: descriptors, the type policy, and the evolution check.

/// Descriptor types handed over by schema front ends.
pub mod descriptor;
/// Fixed/variable/unsupported classification rules.
pub mod policy;

mod compat;

pub use descriptor::{
    ContainerKind, EnumDescriptor, PrimitiveKind, PropertyDescriptor, SchemaDescriptor,
    TypeDescriptor, TypeRef,
};
pub use policy::{Classification, classify, is_cache_eligible};
