//! Additive-evolution check between two revisions of a schema.

use super::descriptor::SchemaDescriptor;
use crate::error::{Result, SegcodeError};

impl SchemaDescriptor {
    /// Checks that `self` is a compatible successor of `older`.
    ///
    /// Payloads stay readable across revisions only if an index keeps its meaning forever: a
    /// property present in both revisions must keep its type and cache flag. Types and properties
    /// may be added, and properties may be retired (their index simply disappears).
    pub fn check_evolution(&self, older: &SchemaDescriptor) -> Result<()> {
        for old_type in &older.types {
            let Some(new_type) = self.find(&old_type.name) else {
                continue;
            };
            for old_prop in &old_type.properties {
                let Some(new_prop) = new_type.by_index(old_prop.index) else {
                    continue;
                };
                if new_prop.type_ref != old_prop.type_ref {
                    return Err(SegcodeError::schema(format!(
                        "{}: index {} changed type from {} ('{}') to {} ('{}')",
                        old_type.name,
                        old_prop.index,
                        old_prop.type_ref,
                        old_prop.name,
                        new_prop.type_ref,
                        new_prop.name
                    )));
                }
                if new_prop.cached != old_prop.cached {
                    return Err(SegcodeError::schema(format!(
                        "{}: index {} ('{}') changed its cache flag",
                        old_type.name, old_prop.index, new_prop.name
                    )));
                }
            }
        }
        Ok(())
    }
}
