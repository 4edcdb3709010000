//! Record types, attributes and schemas.

mod attribute;
mod record;

pub use attribute::{Attribute, AttributeKind, DeletePolicy};
pub use record::{AttributeValues, Fields, Record, RecordVersion, Schema, TypeKey};
