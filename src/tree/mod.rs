//! Value tree utilities: precedence merging (plain and schema-guided),
//! sentinel pruning and dot-path flattening.

mod flatten;
mod merge;
mod sentinel;
mod typed;

pub use flatten::{flag_keys, unflatten};
pub use merge::deep_merge;
pub use sentinel::Partial;
pub use typed::merge_with_schema;
