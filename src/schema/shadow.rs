//! Shadow schema derivation.
//!
//! Two auxiliary record shapes are derived from every target record and used
//! only while resolving:
//!
//! - **Path-augmented** (`<Record>.paths`): every record-bearing field `f` becomes
//!   three optional fields, `f`, `f__path` (file reference) and `f__overwrite`
//!   (partial overlay). Other fields are copied.
//! - **Partial-sentinel** (`<Record>.partial`): every field defaults to the
//!   unfilled sentinel, recursively through nested records and union members.
//!
//! Both functions here are pure and per-record: nested records are referenced by
//! their derived names, and [`SchemaRegistry`](super::SchemaRegistry) derives and
//! caches the referenced records.

use super::types::{FieldDefault, FieldSchema, RecordSchema, Schema};
use serde_json::Value;

/// Suffix of the file-reference sibling field.
pub const PATH_SUFFIX: &str = "__path";
/// Suffix of the partial-overlay sibling field.
pub const OVERWRITE_SUFFIX: &str = "__overwrite";

/// Which shadow shape to derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowKind {
    PathAugmented,
    PartialSentinel,
}

impl ShadowKind {
    fn suffix(self) -> &'static str {
        match self {
            ShadowKind::PathAugmented => ".paths",
            ShadowKind::PartialSentinel => ".partial",
        }
    }

    /// Registry name of the shadow of `record`.
    pub fn derived_name(self, record: &str) -> String {
        format!("{}{}", record, self.suffix())
    }

    /// Whether `record` already has this shape.
    pub fn applied_to(self, record: &RecordSchema) -> bool {
        match self {
            ShadowKind::PathAugmented => record.path_augmented,
            ShadowKind::PartialSentinel => record.partial,
        }
    }

    /// Derive the shadow of a single record.
    pub fn derive(self, record: &RecordSchema) -> RecordSchema {
        match self {
            ShadowKind::PathAugmented => path_augment(record),
            ShadowKind::PartialSentinel => partial_sentinel(record),
        }
    }
}

impl std::fmt::Display for ShadowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShadowKind::PathAugmented => write!(f, "path-augmented"),
            ShadowKind::PartialSentinel => write!(f, "partial-sentinel"),
        }
    }
}

pub fn path_field(field: &str) -> String {
    format!("{}{}", field, PATH_SUFFIX)
}

pub fn overwrite_field(field: &str) -> String {
    format!("{}{}", field, OVERWRITE_SUFFIX)
}

fn rename(kind: ShadowKind) -> impl Fn(&str) -> String {
    move |name: &str| kind.derived_name(name)
}

/// Path-augmented shadow of `record`. Idempotent.
pub fn path_augment(record: &RecordSchema) -> RecordSchema {
    if record.path_augmented {
        return record.clone();
    }

    let rename = rename(ShadowKind::PathAugmented);
    let mut fields = Vec::with_capacity(record.fields.len());

    for field in &record.fields {
        let schema = field.schema.map_records(&rename);

        if field.schema.is_record_bearing() {
            fields.push(optional_field(field.name.clone(), schema.clone()));
            fields.push(optional_field(path_field(&field.name), Schema::STR));
            fields.push(optional_field(overwrite_field(&field.name), schema));
        } else {
            fields.push(FieldSchema {
                name: field.name.clone(),
                schema,
                default: field.default.clone(),
            });
        }
    }

    RecordSchema {
        name: ShadowKind::PathAugmented.derived_name(&record.name),
        fields,
        origin: Some(record.origin_name().to_string()),
        path_augmented: true,
        partial: record.partial,
    }
}

fn optional_field(name: String, schema: Schema) -> FieldSchema {
    FieldSchema {
        name,
        schema: Schema::optional(schema),
        default: FieldDefault::Value(Value::Null),
    }
}

/// Partial-sentinel shadow of `record`. Idempotent.
pub fn partial_sentinel(record: &RecordSchema) -> RecordSchema {
    if record.partial {
        return record.clone();
    }

    let rename = rename(ShadowKind::PartialSentinel);
    let fields = record
        .fields
        .iter()
        .map(|field| FieldSchema {
            name: field.name.clone(),
            schema: field.schema.map_records(&rename),
            default: FieldDefault::Unfilled,
        })
        .collect();

    RecordSchema {
        name: ShadowKind::PartialSentinel.derived_name(&record.name),
        fields,
        origin: Some(record.origin_name().to_string()),
        path_augmented: record.path_augmented,
        partial: true,
    }
}
