//! Schema model and shadow schema derivation.
//!
//! - `types`: the explicit description of a target type
//! - `shadow`: path-augmented and partial-sentinel record derivation
//! - `registry`: the shared store that caches derived shadows

mod registry;
pub mod shadow;
mod types;

pub use registry::SchemaRegistry;
pub use shadow::{OVERWRITE_SUFFIX, PATH_SUFFIX, ShadowKind, overwrite_field, path_field};
pub use types::*;
