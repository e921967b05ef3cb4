//! Error types for schema derivation, decoding and resolution.
//!
//! Failures collected while trying several candidates (union members, preset
//! targets, overwrite targets) are kept as a list of [`Attempt`]s so that the
//! final message enumerates every reason, not only the last one.

use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// One failed candidate of a trial, in trial order.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt<E> {
    /// Name of the candidate that was tried (union member, record name).
    pub candidate: String,
    /// Why it was rejected.
    pub error: E,
}

impl<E> Attempt<E> {
    pub fn new(candidate: impl Into<String>, error: E) -> Self {
        Self {
            candidate: candidate.into(),
            error,
        }
    }
}

impl<E: fmt::Display> fmt::Display for Attempt<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.candidate, self.error)
    }
}

/// A record field that failed to decode.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFailure {
    pub field: String,
    pub error: DecodeError,
}

impl fmt::Display for FieldFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.error)
    }
}

/// Errors raised while binding a value tree to a schema node.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("expected literal {expected}, found {found}")]
    LiteralMismatch { expected: Value, found: Value },

    #[error("`{value}` is not a variant of `{enumeration}` (expected one of: {})", .allowed.join(", "))]
    UnknownVariant {
        enumeration: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("missing required field")]
    MissingField,

    #[error("unknown field")]
    UnknownField,

    #[error("discriminator `{field}` is {found}, member expects {expected}")]
    DiscriminatorMismatch {
        field: String,
        expected: Value,
        found: Value,
    },

    #[error("duplicate element {0} in set")]
    DuplicateElement(Value),

    #[error("element {index}: {error}")]
    Element { index: String, error: Box<DecodeError> },

    /// One or more fields of a record failed; every failing field is listed.
    #[error("record `{record}` failed to decode:{}", render_list(.failures))]
    Record {
        record: String,
        failures: Vec<FieldFailure>,
    },

    /// No member of a union matched; one reason per member, in trial order.
    #[error("no member of `{union}` matched:{}", render_list(.attempts))]
    UnionExhausted {
        union: String,
        attempts: Vec<Attempt<DecodeError>>,
    },

    #[error("unknown record schema `{0}`")]
    UnknownRecord(String),
}

/// Errors raised by schema derivation, reference loading and resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("`{0}` is not a record schema")]
    NotARecord(String),

    #[error("unknown record schema `{0}`")]
    UnknownRecord(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("field `{field}` of record `{record}` contains the reserved separator `__`")]
    InvalidFieldName { record: String, field: String },

    #[error("'package://' path used ({0}), but no package root was provided")]
    PackageRootRequired(String),

    #[error("could not read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("file {0} must contain a mapping at the top level")]
    NotAMapping(PathBuf),

    #[error("`{field}__path` must be a string, got {found}")]
    PathValueType { field: String, found: String },

    #[error("`{field}__overwrite` must be a mapping, got {found}")]
    OverwriteValueType { field: String, found: String },

    #[error("one of `{field}` or `{field}__path` must be provided, not neither")]
    MissingValueOrPath { field: String },

    #[error("could not match the value of `{field}` to any member of its type:{}", render_list(.attempts))]
    DataclassUnionResolution {
        field: String,
        attempts: Vec<Attempt<ResolveError>>,
    },

    #[error("could not resolve preset `{preset}` of `{field}` to any member of its type:{}", render_list(.attempts))]
    PresetUnionResolution {
        field: String,
        preset: String,
        attempts: Vec<Attempt<ResolveError>>,
    },

    #[error("could not apply the overwrite of `{field}` to any member of its type:{}", render_list(.attempts))]
    OverwriteUnionResolution {
        field: String,
        attempts: Vec<Attempt<ResolveError>>,
    },

    #[error("`{key}` must name a configuration file, got {found}")]
    ConfigFileKey { key: String, found: String },

    #[error("circular file reference: {}", render_chain(.chain))]
    CircularReference { chain: Vec<PathBuf> },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("failed to bind resolved configuration: {0}")]
    Bind(#[from] serde_json::Error),
}

/// Result type for resolution operations.
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

/// Render a list of nested failures, one per line, indenting their own nested lines.
fn render_list<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| format!("\n  - {}", item.to_string().replace('\n', "\n    ")))
        .collect()
}

fn render_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Short human-readable description of a value's shape, for error messages.
pub(crate) fn describe_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("bool {}", b),
        Value::Number(n) => format!("number {}", n),
        Value::String(s) => format!("string {:?}", s),
        Value::Array(items) => format!("sequence of {} items", items.len()),
        Value::Object(_) => "mapping".to_string(),
    }
}
