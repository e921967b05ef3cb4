//! Schema registry and shadow derivation cache.
//!
//! The registry owns every record schema, user-declared and derived, keyed by
//! name. It is read-mostly: lookups are lock-free snapshot loads. Derivation
//! builds new records into a private scratch map and publishes them in a single
//! swap, so a partially derived shadow is never visible to other threads. Two
//! threads racing to derive the same shadow both produce identical records, and
//! the second publish is a no-op for names already present.

use super::shadow::ShadowKind;
use super::types::{FieldDefault, RecordSchema, Schema};
use crate::error::{ResolveError, ResolveResult};
use arc_swap::ArcSwap;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

type RecordMap = HashMap<Arc<str>, Arc<RecordSchema>>;

/// Shared store of record schemas and their shadows.
pub struct SchemaRegistry {
    records: ArcSwap<RecordMap>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.records.load();
        let mut names: Vec<&str> = snapshot.keys().map(|k| k.as_ref()).collect();
        names.sort_unstable();
        f.debug_struct("SchemaRegistry").field("records", &names).finish()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            records: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Register one record. See [`register_all`](Self::register_all).
    pub fn register(&self, record: RecordSchema) -> ResolveResult<()> {
        self.register_all([record])
    }

    /// Validate and register records. Names already registered are kept as they
    /// are, so registering the same type twice is harmless.
    pub fn register_all(&self, records: impl IntoIterator<Item = RecordSchema>) -> ResolveResult<()> {
        let mut batch: Vec<(Arc<str>, Arc<RecordSchema>)> = Vec::new();
        for record in records {
            validate_record(&record)?;
            batch.push((Arc::from(record.name.as_str()), Arc::new(record)));
        }
        self.publish(batch);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.load().contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<RecordSchema>> {
        self.records.load().get(name).cloned()
    }

    pub fn get(&self, name: &str) -> ResolveResult<Arc<RecordSchema>> {
        self.lookup(name)
            .ok_or_else(|| ResolveError::UnknownRecord(name.to_string()))
    }

    /// Name of the path-augmented shadow of `name`, deriving it on first use.
    pub fn path_augmented(&self, name: &str) -> ResolveResult<Arc<str>> {
        self.derive(name, ShadowKind::PathAugmented)
    }

    /// Name of the partial-sentinel shadow of `name`, deriving it on first use.
    pub fn partial_sentinel(&self, name: &str) -> ResolveResult<Arc<str>> {
        self.derive(name, ShadowKind::PartialSentinel)
    }

    /// Name of the path-augmented, partial-sentinel shadow used to read sources.
    pub fn shadow(&self, name: &str) -> ResolveResult<Arc<str>> {
        let augmented = self.path_augmented(name)?;
        self.partial_sentinel(&augmented)
    }

    /// Path-augment a schema that must be a record.
    pub fn path_augment_schema(&self, schema: &Schema) -> ResolveResult<Schema> {
        match schema {
            Schema::Record(name) => Ok(Schema::Record(self.path_augmented(name)?)),
            other => Err(ResolveError::NotARecord(other.to_string())),
        }
    }

    /// Partial-sentinel version of any schema: every record it refers to is
    /// replaced by its partial shadow.
    pub fn partial_sentinel_schema(&self, schema: &Schema) -> ResolveResult<Schema> {
        let mut referenced = Vec::new();
        schema.referenced_records(&mut referenced);
        for name in &referenced {
            self.partial_sentinel(name)?;
        }
        Ok(schema.map_records(&|n| ShadowKind::PartialSentinel.derived_name(n)))
    }

    /// Derive the `kind` shadow of `name` and of every record reachable from it.
    ///
    /// Recursive record graphs terminate because a record whose shadow is
    /// already in the scratch map (in progress) or the published snapshot is
    /// reused instead of derived again.
    fn derive(&self, name: &str, kind: ShadowKind) -> ResolveResult<Arc<str>> {
        let snapshot = self.records.load();
        let root = snapshot
            .get(name)
            .ok_or_else(|| ResolveError::UnknownRecord(name.to_string()))?;
        if kind.applied_to(root) {
            return Ok(Arc::from(name));
        }

        let target: Arc<str> = Arc::from(kind.derived_name(name));
        if snapshot.contains_key(&target) {
            return Ok(target);
        }

        let mut scratch: RecordMap = HashMap::new();
        let mut queue: Vec<Arc<str>> = vec![Arc::from(name)];

        while let Some(current) = queue.pop() {
            let source = snapshot
                .get(&current)
                .or_else(|| scratch.get(&current))
                .cloned()
                .ok_or_else(|| ResolveError::UnknownRecord(current.to_string()))?;
            if kind.applied_to(&source) {
                continue;
            }

            let derived_name: Arc<str> = Arc::from(kind.derived_name(&current));
            if snapshot.contains_key(&derived_name) || scratch.contains_key(&derived_name) {
                continue;
            }

            scratch.insert(derived_name, Arc::new(kind.derive(&source)));

            for field in &source.fields {
                field.schema.referenced_records(&mut queue);
            }
        }

        self.publish(scratch.into_iter().collect());
        Ok(target)
    }

    fn publish(&self, batch: Vec<(Arc<str>, Arc<RecordSchema>)>) {
        if batch.is_empty() {
            return;
        }
        self.records.rcu(|current| {
            let mut next = RecordMap::clone(current);
            for (name, record) in &batch {
                next.entry(Arc::clone(name))
                    .or_insert_with(|| Arc::clone(record));
            }
            next
        });
    }

    /// Human-readable outline of a record and the records below it.
    pub fn describe(&self, name: &str) -> ResolveResult<String> {
        let mut out = String::new();
        let mut seen = HashSet::new();
        self.describe_into(name, 0, &mut seen, &mut out)?;
        Ok(out)
    }

    fn describe_into(
        &self,
        name: &str,
        indent: usize,
        seen: &mut HashSet<String>,
        out: &mut String,
    ) -> ResolveResult<()> {
        let prefix = "    ".repeat(indent);
        if !seen.insert(name.to_string()) {
            let _ = writeln!(out, "{}{} (already seen)", prefix, name);
            return Ok(());
        }
        let record = self.get(name)?;
        let _ = writeln!(out, "{}{}", prefix, record.name);

        for field in &record.fields {
            let default = match &field.default {
                FieldDefault::Required => String::new(),
                FieldDefault::Value(value) => format!(" = {}", value),
                FieldDefault::Unfilled => " = <unfilled>".to_string(),
            };
            let _ = writeln!(out, "{}  - {}: {}{}", prefix, field.name, field.schema, default);

            let mut nested = Vec::new();
            field.schema.referenced_records(&mut nested);
            for sub in nested {
                self.describe_into(&sub, indent + 1, seen, out)?;
            }
        }
        Ok(())
    }
}

fn validate_record(record: &RecordSchema) -> ResolveResult<()> {
    let mut names = HashSet::new();
    for field in &record.fields {
        if field.name.contains("__") {
            return Err(ResolveError::InvalidFieldName {
                record: record.name.clone(),
                field: field.name.clone(),
            });
        }
        if !names.insert(field.name.as_str()) {
            return Err(ResolveError::InvalidSchema(format!(
                "field `{}` declared twice in record `{}`",
                field.name, record.name
            )));
        }
        validate_schema(&record.name, &field.schema)?;
    }
    Ok(())
}

fn validate_schema(record: &str, schema: &Schema) -> ResolveResult<()> {
    match schema {
        Schema::Union(union) => {
            if union.members.is_empty() {
                return Err(ResolveError::InvalidSchema(format!(
                    "union `{}` in record `{}` has no members",
                    union.name, record
                )));
            }
            for member in &union.members {
                validate_schema(record, &member.schema)?;
            }
            Ok(())
        }
        Schema::Optional(inner) => validate_schema(record, inner),
        Schema::Collection { element, .. } => validate_schema(record, element),
        Schema::Record(_) | Schema::Leaf(_) => Ok(()),
    }
}
