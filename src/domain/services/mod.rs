//! Domain Services
//!
//! Pure logic over release objects and payloads. No I/O.

mod differ;
mod lookup;
mod merge;
mod overrides;
mod path_query;
mod reference_replacer;

pub use differ::{project_onto, DiffTag, Differ, PayloadDiff};
pub use lookup::{pick_candidate, LookupTable, Pick, ReverseLookupTable, TargetSlot};
pub use merge::{three_way_merge, MergeConflict, MergeFields, MergeResult};
pub use overrides::{apply_overrides, reverse_attribute_override, RegexRewrite, REGEX_SEPARATOR};
pub use path_query::{
    format_path, get_path, get_path_mut, split_override_path, JsonPath, PathQuery, PathSegment,
};
pub use reference_replacer::{
    reverse_target_reference_into_source, reverse_unknown_reference_type, HookGraph,
    MissingPolicy, ReferenceContext, ReferenceField, ReferenceMode, ReferenceReplacer,
    ReferenceShape, ReferenceWarning,
};
