//! Raw document to canonical entity decoding.
//!
//! Decoding is total: any plausibly-shaped document produces an entity, with
//! missing or malformed fields degraded to defaults.

pub mod dates;
pub mod fields;
pub mod requirements;

pub use dates::{DateInput, classify, date_field, decode_date};
pub use fields::{as_sequence, canonical_id, foreign_key, string_list};
pub use requirements::{JobRequirements, RequirementsShape, is_structured_shape};

use hireline_api::RawDocument;

use crate::entity::Entity;

/// Decode a batch of raw documents, preserving order.
pub fn decode_all<T: Entity>(documents: &[RawDocument]) -> Vec<T> {
    documents.iter().map(T::decode).collect()
}
