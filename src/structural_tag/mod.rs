//! Structural-tag data model, JSON surface, and validator (spec §3.2, §4.1).
pub mod tree;
pub mod validate;

pub use tree::{from_legacy_items, Format, LegacyItem, TagFormat};
pub use validate::{validate, AnnotatedFormat, AnnotatedTag, Attrs};
