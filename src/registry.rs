//! The validated schema: one layout plan per object type.
//!
//! [`RegistryBuilder::build`] is the single place where schema violations surface. It checks the
//! descriptor once (unique type names, unique property indices and names, supported shapes, cache
//! flags only on cache-eligible types, resolvable object references) and resolves every property
//! into a [`Formatter`] plus a slot kind. Dispatch is therefore decided per type at build time,
//! never per call.

use crate::error::{Result, SegcodeError};
use crate::format::header_size;
use crate::formatter::{FixedShape, Formatter};
use crate::schema::{
    Classification, SchemaDescriptor, TypeDescriptor, TypeRef, classify, is_cache_eligible,
};
use crate::segment::ObjectBuilder;
use log::debug;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

/// A strong type identifying an object type inside one [`Registry`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey(u32);

impl TypeKey {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw numeric value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.0)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a property's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Inside the fixed region, `offset` bytes past its start.
    Fixed {
        /// Offset inside the fixed region of a freshly encoded object.
        offset: usize,
        /// Encoded width.
        width: usize,
    },
    /// A recursively encoded payload, decoded eagerly with the object.
    Variable,
    /// A recursively encoded payload behind a lazily decoded cache segment.
    Cached,
}

/// The resolved plan of one property.
#[derive(Debug, Clone)]
pub struct PropertyPlan {
    index: u32,
    name: String,
    type_ref: TypeRef,
    formatter: Formatter,
    slot: SlotKind,
}

impl PropertyPlan {
    /// Declared index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Declared name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type.
    pub fn type_ref(&self) -> &TypeRef {
        &self.type_ref
    }

    /// The formatter resolved for the declared type.
    pub fn formatter(&self) -> &Formatter {
        &self.formatter
    }

    /// The slot kind.
    pub fn slot(&self) -> SlotKind {
        self.slot
    }

    /// The fixed shape, for fixed-width properties.
    pub fn fixed_shape(&self) -> Option<&FixedShape> {
        match &self.formatter {
            Formatter::Fixed(shape) => Some(shape),
            _ => None,
        }
    }
}

/// The resolved layout of one object type.
#[derive(Debug, Clone)]
pub struct ObjectPlan {
    key: TypeKey,
    name: String,
    last_index: i32,
    fixed_region_len: usize,
    properties: Vec<PropertyPlan>,
    by_index: HashMap<u32, usize>,
    by_name: HashMap<String, usize>,
}

impl ObjectPlan {
    /// Key of this type.
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Highest declared property index, `-1` for a type without properties.
    pub fn last_index(&self) -> i32 {
        self.last_index
    }

    /// Header length of an object encoded with this schema revision.
    pub fn header_len(&self) -> usize {
        header_size(self.last_index)
    }

    /// Total width of all fixed-width properties.
    pub fn fixed_region_len(&self) -> usize {
        self.fixed_region_len
    }

    /// Properties in ascending index order.
    pub fn properties(&self) -> &[PropertyPlan] {
        &self.properties
    }

    /// Position (in [`ObjectPlan::properties`]) of the property with this index.
    pub fn position_of_index(&self, index: u32) -> Option<usize> {
        self.by_index.get(&index).copied()
    }

    /// Position (in [`ObjectPlan::properties`]) of the property with this name.
    pub fn position_of_name(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }
}

/// Anything that can address a property: its index or its name.
pub trait PropertyKey {
    /// Resolves the key to a position in [`ObjectPlan::properties`].
    fn position(&self, plan: &ObjectPlan) -> Result<usize>;
}

impl PropertyKey for u32 {
    fn position(&self, plan: &ObjectPlan) -> Result<usize> {
        plan.position_of_index(*self).ok_or_else(|| {
            SegcodeError::UnknownProperty(format!("#{} on '{}'", self, plan.name))
        })
    }
}

impl PropertyKey for i32 {
    fn position(&self, plan: &ObjectPlan) -> Result<usize> {
        u32::try_from(*self)
            .map_err(|_| SegcodeError::UnknownProperty(format!("#{} on '{}'", self, plan.name)))?
            .position(plan)
    }
}

impl PropertyKey for &str {
    fn position(&self, plan: &ObjectPlan) -> Result<usize> {
        plan.position_of_name(self).ok_or_else(|| {
            SegcodeError::UnknownProperty(format!("'{}' on '{}'", self, plan.name))
        })
    }
}

/// The validated, resolved schema.
#[derive(Debug, Clone)]
pub struct Registry {
    plans: Vec<ObjectPlan>,
    by_name: HashMap<String, TypeKey>,
}

impl Registry {
    /// Starts an empty builder.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Validates and resolves a complete schema descriptor.
    pub fn from_descriptor(schema: &SchemaDescriptor) -> Result<Self> {
        RegistryBuilder {
            schema: schema.clone(),
        }
        .build()
    }

    /// Looks up a type by name.
    pub fn key(&self, name: &str) -> Result<TypeKey> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| SegcodeError::UnknownType(name.to_owned()))
    }

    /// The plan of a type.
    pub fn plan(&self, key: TypeKey) -> Result<&ObjectPlan> {
        self.plans.get(key.as_u32() as usize).ok_or_else(|| {
            SegcodeError::Internal(format!("{key:?} does not belong to this registry"))
        })
    }

    /// The plan of a type, by name.
    pub fn plan_by_name(&self, name: &str) -> Result<&ObjectPlan> {
        self.plan(self.key(name)?)
    }

    /// Iterates over all plans.
    pub fn plans(&self) -> impl Iterator<Item = &ObjectPlan> {
        self.plans.iter()
    }

    /// Starts building a fresh object of the named type.
    pub fn new_object(&self, name: &str) -> Result<ObjectBuilder<'_>> {
        ObjectBuilder::new(self, name)
    }
}

/// Collects type descriptors and validates them into a [`Registry`].
#[derive(Debug, Clone, Default)]
pub struct RegistryBuilder {
    schema: SchemaDescriptor,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a type descriptor.
    pub fn add_type(mut self, ty: TypeDescriptor) -> Self {
        self.schema.types.push(ty);
        self
    }

    /// Validates the collected descriptors and resolves their layout.
    ///
    /// # Errors
    /// Returns [`SegcodeError::Schema`] on the first violation found.
    pub fn build(self) -> Result<Registry> {
        let mut by_name = HashMap::with_capacity(self.schema.types.len());
        for (i, ty) in self.schema.types.iter().enumerate() {
            let id = u32::try_from(i)
                .map_err(|_| SegcodeError::schema("too many types in one schema"))?;
            match by_name.entry(ty.name.clone()) {
                Entry::Occupied(_) => {
                    return Err(SegcodeError::schema(format!(
                        "type '{}' is declared twice",
                        ty.name
                    )));
                }
                Entry::Vacant(slot) => {
                    slot.insert(TypeKey::new(id));
                }
            }
        }

        let mut plans = Vec::with_capacity(self.schema.types.len());
        for (i, ty) in self.schema.types.iter().enumerate() {
            let key = TypeKey::new(u32::try_from(i).unwrap_or(u32::MAX));
            plans.push(plan_type(key, ty, &by_name)?);
        }

        debug!("built registry with {} types", plans.len());
        Ok(Registry { plans, by_name })
    }
}

fn plan_type(
    key: TypeKey,
    ty: &TypeDescriptor,
    names: &HashMap<String, TypeKey>,
) -> Result<ObjectPlan> {
    let mut sorted: Vec<_> = ty.properties.iter().collect();
    sorted.sort_by_key(|p| p.index);

    let mut by_index = HashMap::with_capacity(sorted.len());
    let mut by_name = HashMap::with_capacity(sorted.len());
    let mut properties = Vec::with_capacity(sorted.len());
    let mut fixed_region_len = 0usize;

    for prop in sorted {
        let context = || format!("{}.{} (#{})", ty.name, prop.name, prop.index);

        if i32::try_from(prop.index).is_err() {
            return Err(SegcodeError::schema(format!(
                "{}: index exceeds the offset table range",
                context()
            )));
        }
        if by_index.insert(prop.index, properties.len()).is_some() {
            return Err(SegcodeError::schema(format!(
                "{}: index {} is declared twice",
                context(),
                prop.index
            )));
        }
        if by_name.insert(prop.name.clone(), properties.len()).is_some() {
            return Err(SegcodeError::schema(format!(
                "{}: property name is declared twice",
                context()
            )));
        }

        let classification = classify(&prop.type_ref);
        let slot = match classification {
            Classification::Unsupported(reason) => {
                return Err(SegcodeError::schema(format!("{}: {reason}", context())));
            }
            Classification::FixedWidth(width) => {
                if prop.cached {
                    return Err(SegcodeError::schema(format!(
                        "{}: fixed-width {} cannot be cache-eligible",
                        context(),
                        prop.type_ref
                    )));
                }
                let offset = fixed_region_len;
                fixed_region_len += width;
                SlotKind::Fixed { offset, width }
            }
            Classification::Variable if prop.cached => {
                if !is_cache_eligible(&prop.type_ref) {
                    return Err(SegcodeError::schema(format!(
                        "{}: {} is not cache-eligible",
                        context(),
                        prop.type_ref
                    )));
                }
                SlotKind::Cached
            }
            Classification::Variable => SlotKind::Variable,
        };

        let formatter = Formatter::resolve(&prop.type_ref, names).map_err(|e| match e {
            SegcodeError::Schema(msg) => SegcodeError::schema(format!("{}: {msg}", context())),
            other => other,
        })?;

        properties.push(PropertyPlan {
            index: prop.index,
            name: prop.name.clone(),
            type_ref: prop.type_ref.clone(),
            formatter,
            slot,
        });
    }

    let last_index = properties
        .last()
        .map_or(-1, |p| i32::try_from(p.index).unwrap_or(i32::MAX));

    Ok(ObjectPlan {
        key,
        name: ty.name.clone(),
        last_index,
        fixed_region_len,
        properties,
        by_index,
        by_name,
    })
}
