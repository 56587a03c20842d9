//! Domain Value Objects
//!
//! Immutable value types that represent domain concepts.

mod object_ref;
mod reference;
mod resource_type;

pub use object_ref::{Direction, ObjectFailure, ObjectId, ObjectRef, Phase};
pub use reference::{
    dummy_id, extract_id, is_dummy_reference, reference_url, render_dummy_reference,
    render_reference, unknown_reference, DUMMY_ID_SUFFIX, UNKNOWN_REFERENCE,
};
pub use resource_type::ResourceType;
