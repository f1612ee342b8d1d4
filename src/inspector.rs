//! Tools for inspecting the physical structure of encoded objects.
//!
//! The inspector walks an encoding without building segments and checks every size and offset it
//! meets, so it doubles as the up-front validation pass behind
//! [`SegcodeOptions::validate`](crate::SegcodeOptions::validate).

use crate::api::DEFAULT_MAX_DEPTH;
use crate::error::{Result, SegcodeError};
use crate::format::{DecodeCtx, ObjectHeader};
use crate::formatter::{Formatter, Member, SequenceView};
use crate::registry::{Registry, SlotKind, TypeKey};
use crate::tracker::DirtyTracker;
use serde::Serialize;
use std::fmt;

/// A structural report of one encoded object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectReport {
    /// Declared type name.
    pub type_name: String,
    /// Absolute offset of the encoding.
    pub offset: usize,
    /// True for the null sentinel.
    pub is_null: bool,
    /// Total encoded size (4 for null).
    pub total_size: usize,
    /// Highest index present in the encoding.
    pub binary_last_index: i32,
    /// Header length, offset table included.
    pub header_len: usize,
    /// Declared properties in ascending index order.
    pub properties: Vec<PropertyReport>,
}

/// Where and how one property is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyReport {
    /// Declared index.
    pub index: u32,
    /// Declared name.
    pub name: String,
    /// `"fixed"`, `"variable"` or `"cache"`.
    pub slot: String,
    /// Absolute offset of the property's bytes, `None` when absent.
    pub offset: Option<usize>,
    /// Encoded length (0 when absent).
    pub length: usize,
    /// True when the encoding holds no bytes for this property.
    pub absent: bool,
    /// Entry count, for non-null containers.
    pub element_count: Option<usize>,
    /// Nested object report, for object-typed properties.
    pub object: Option<Box<ObjectReport>>,
}

/// What walking one value found.
struct Walked {
    len: usize,
    count: Option<usize>,
    object: Option<ObjectReport>,
}

/// The Segcode inspector.
#[derive(Debug)]
pub struct Inspector;

impl Inspector {
    /// Walks the object of type `type_name` at the start of `bytes`.
    pub fn inspect(registry: &Registry, type_name: &str, bytes: &[u8]) -> Result<ObjectReport> {
        Self::walk(registry, registry.key(type_name)?, bytes, DEFAULT_MAX_DEPTH)
    }

    /// Checks every size and offset of an encoding.
    pub fn validate(registry: &Registry, type_name: &str, bytes: &[u8]) -> Result<()> {
        Self::inspect(registry, type_name, bytes).map(|_| ())
    }

    pub(crate) fn walk(
        registry: &Registry,
        key: TypeKey,
        bytes: &[u8],
        max_depth: usize,
    ) -> Result<ObjectReport> {
        let ctx = DecodeCtx::new(registry, bytes, max_depth);
        walk_object(&ctx, 0, key)
    }
}

fn walk_object(ctx: &DecodeCtx<'_>, at: usize, key: TypeKey) -> Result<ObjectReport> {
    let plan = ctx.registry.plan(key)?;
    let Some(header) = ObjectHeader::read(ctx.buf, at, ctx.end)? else {
        return Ok(ObjectReport {
            type_name: plan.name().to_owned(),
            offset: at,
            is_null: true,
            total_size: 4,
            binary_last_index: -1,
            header_len: 0,
            properties: Vec::new(),
        });
    };
    let inner = ctx.enter(header.end())?;

    let mut properties = Vec::with_capacity(plan.properties().len());
    for prop in plan.properties() {
        let slot = match prop.slot() {
            SlotKind::Fixed { .. } => "fixed",
            SlotKind::Variable => "variable",
            SlotKind::Cached => "cache",
        };
        let mut report = PropertyReport {
            index: prop.index(),
            name: prop.name().to_owned(),
            slot: slot.to_owned(),
            offset: None,
            length: 0,
            absent: true,
            element_count: None,
            object: None,
        };
        if let Some(rel) = header.offset_of(ctx.buf, prop.index())? {
            let walked = walk_value(&inner, prop.formatter(), at + rel)?;
            report.offset = Some(at + rel);
            report.length = walked.len;
            report.absent = false;
            report.element_count = walked.count;
            report.object = walked.object.map(Box::new);
        }
        properties.push(report);
    }

    Ok(ObjectReport {
        type_name: plan.name().to_owned(),
        offset: at,
        is_null: false,
        total_size: header.total_size,
        binary_last_index: header.binary_last_index,
        header_len: header.header_len(),
        properties,
    })
}

fn walk_value(ctx: &DecodeCtx<'_>, formatter: &Formatter, at: usize) -> Result<Walked> {
    match formatter {
        Formatter::Object(key) => {
            let report = walk_object(ctx, at, *key)?;
            Ok(Walked {
                len: report.total_size,
                count: None,
                object: Some(report),
            })
        }
        Formatter::Fixed(_) | Formatter::Str | Formatter::Bytes => {
            let scratch = DirtyTracker::root();
            let (_, len) = formatter.deserialize(ctx, at, &scratch)?;
            Ok(Walked {
                len,
                count: None,
                object: None,
            })
        }
        _ => {
            let Some(view) = SequenceView::open(ctx, formatter, at)? else {
                return Ok(Walked {
                    len: 4,
                    count: None,
                    object: None,
                });
            };
            view.for_each_member(|inner, member, start| {
                let walked = match member {
                    Member::Value(f) => walk_value(inner, f, start)?,
                    Member::Group(elem) => {
                        let group =
                            walk_value(inner, &Formatter::List(Box::new(elem.clone())), start)?;
                        if group.count.is_none() {
                            return Err(SegcodeError::format(format!(
                                "null lookup group at offset {start}"
                            )));
                        }
                        group
                    }
                };
                Ok(walked.len)
            })?;
            Ok(Walked {
                len: view.encoded_len(),
                count: Some(view.len()),
                object: None,
            })
        }
    }
}

impl fmt::Display for ObjectReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== SEGCODE INSPECTOR REPORT ===")?;
        self.fmt_recursive(f, "")
    }
}

impl ObjectReport {
    fn fmt_recursive(&self, f: &mut fmt::Formatter<'_>, prefix: &str) -> fmt::Result {
        if self.is_null {
            return writeln!(f, "{prefix}{} @{}: null", self.type_name, self.offset);
        }
        writeln!(
            f,
            "{prefix}{} @{} | Size: {}b | Header: {}b | Last index: {}",
            self.type_name, self.offset, self.total_size, self.header_len, self.binary_last_index
        )?;
        for (i, prop) in self.properties.iter().enumerate() {
            let is_last = i + 1 == self.properties.len();
            let connector = if is_last { "└── " } else { "├── " };
            let child_prefix = if is_last { "    " } else { "│   " };
            let placement = match prop.offset {
                Some(offset) => format!("@{offset} {}b", prop.length),
                None => "absent".to_owned(),
            };
            let count = prop
                .element_count
                .map(|n| format!(" [{n} entries]"))
                .unwrap_or_default();
            writeln!(
                f,
                "{prefix}{connector}#{} {} ({}) {placement}{count}",
                prop.index, prop.name, prop.slot
            )?;
            if let Some(object) = &prop.object {
                object.fmt_recursive(f, &format!("{prefix}{child_prefix}"))?;
            }
        }
        Ok(())
    }
}
