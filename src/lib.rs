//! Layered configuration library
//!
//! Resolves a typed configuration from declared defaults, a YAML file,
//! flattened command-line values and in-memory overrides. Record-typed fields
//! may be given inline, loaded from a file (`field__path`) or patched
//! (`field__overwrite`), and union-typed fields are matched member by member.
//!
//! The [`Engine`] is the entry point; [`schema`] describes the target shapes.

pub mod cli;
pub mod decode;
pub mod engine;
pub mod error;
pub mod logging;
pub mod resolve;
pub mod schema;
pub mod tree;

pub use decode::{Bound, Decoder};
pub use engine::{Configurable, Engine, EngineOptions, ResolveRequest, Tier};
pub use error::{Attempt, DecodeError, ResolveError, ResolveResult};
pub use logging::{LogLevel, Logger};
pub use resolve::{MemoryReader, Resolver, TreeReader, YamlFileReader};
pub use schema::{RecordSchema, Schema, SchemaDocument, SchemaRegistry, UnionSchema};
