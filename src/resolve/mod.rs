//! Recursive resolution of a value tree against a record schema.
//!
//! A source tree is first decoded against the path-augmented, partial-sentinel
//! shadow of the target record. Each field of the target is then resolved from
//! up to three contributions, merged in increasing precedence:
//!
//! 1. `field__path`: a file reference, loaded and resolved against the field's
//!    record type
//! 2. `field`: the inline value. A record is resolved recursively; a preset
//!    enum value loads the file it names
//! 3. `field__overwrite`: a partial record merged on top
//!
//! The result is a [`Partial`] tree. Pruning it and decoding against the real
//! schema is left to the caller.

pub mod reference;

use crate::decode::{Bound, Decoder, discriminator_mismatch};
use crate::error::{Attempt, DecodeError, FieldFailure, ResolveError, ResolveResult, describe_value};
use crate::logging::Logger;
use crate::schema::{
    EnumSchema, FieldDefault, FieldSchema, OVERWRITE_SUFFIX, PATH_SUFFIX, RecordSchema, Schema,
    SchemaRegistry, overwrite_field, path_field,
};
use crate::tree::{Partial, deep_merge};
use reference::canonical;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use reference::{
    MemoryReader, PACKAGE_SCHEME, TreeReader, YamlFileReader, resolve_package_path,
};

/// Resolution context: shared schema store, file access, logging and the
/// options of one resolution call.
#[derive(Clone)]
pub struct Resolver<'a> {
    registry: &'a SchemaRegistry,
    reader: &'a dyn TreeReader,
    logger: &'a Logger,
    package_root: Option<&'a Path>,
    strict: bool,
    coerce_strings: bool,
    depth: usize,
    /// Files being resolved, outermost first.
    chain: Vec<PathBuf>,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a SchemaRegistry, reader: &'a dyn TreeReader, logger: &'a Logger) -> Self {
        Self {
            registry,
            reader,
            logger,
            package_root: None,
            strict: false,
            coerce_strings: false,
            depth: 0,
            chain: Vec::new(),
        }
    }

    /// Root for `package://` references.
    pub fn package_root(mut self, root: Option<&'a Path>) -> Self {
        self.package_root = root;
        self
    }

    /// Require a value or reference for every record field without a default.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Accept strings for non-string scalars in the source tree.
    pub fn coerce_strings(mut self, coerce: bool) -> Self {
        self.coerce_strings = coerce;
        self
    }

    fn with_strict(&self, strict: bool) -> Self {
        let mut resolver = self.clone();
        resolver.strict = strict;
        resolver
    }

    fn decoder(&self) -> Decoder<'_> {
        Decoder::new(self.registry, self.logger)
            .coerce_strings(self.coerce_strings)
            .at_depth(self.depth)
    }

    /// Resolve a raw source tree against `record`.
    pub fn resolve_tree(&self, raw: &Value, record: &str) -> ResolveResult<Partial> {
        let shadow = self.registry.shadow(record)?;
        let bound = self.decoder().decode(&Schema::Record(shadow), raw)?;
        self.resolve_record(&bound, record)
    }

    /// Resolve `raw` completely: resolve, prune, and bind to `record`.
    pub fn resolve_value(&self, raw: &Value, record: &str) -> ResolveResult<Value> {
        let pruned = self.resolve_tree(raw, record)?.prune_or_empty();
        let bound = self.decoder().decode(&Schema::record(record), &pruned)?;
        Ok(bound.to_plain())
    }

    /// Read the file at `path` and resolve it against `record`, leaving
    /// unspecified fields unfilled.
    pub fn resolve_file(&self, path: &Path, record: &str) -> ResolveResult<Partial> {
        let (child, tree) = self.open(path)?;
        child.resolve_tree(&tree, record)
    }

    /// Load the file named by `reference` and resolve it completely against `record`.
    pub fn load_reference(&self, reference: &str, record: &str) -> ResolveResult<Value> {
        let path = resolve_package_path(reference, self.package_root)?;
        let (child, tree) = self.open(&path)?;
        child.resolve_value(&tree, record)
    }

    /// Read `path`, refusing files already being resolved. Returns the
    /// resolver to use for the file's content.
    fn open(&self, path: &Path) -> ResolveResult<(Resolver<'a>, Value)> {
        let key = canonical(path);
        if self.chain.contains(&key) {
            let mut chain = self.chain.clone();
            chain.push(key);
            return Err(ResolveError::CircularReference { chain });
        }

        self.logger
            .debug(self.depth, &format!("reading {}", path.display()));
        let tree = self.reader.read_tree(path)?;

        let mut child = self.clone();
        child.depth += 1;
        child.chain.push(key);
        Ok((child, tree))
    }

    /// Resolve every field of `record` from a bound shadow record.
    fn resolve_record(&self, bound: &Bound, record: &str) -> ResolveResult<Partial> {
        let target = self.registry.get(record)?;
        let empty = BTreeMap::new();
        let fields = bound.record_fields().unwrap_or(&empty);

        let mut resolved = BTreeMap::new();
        for field in &target.fields {
            resolved.insert(field.name.clone(), self.resolve_field(fields, field)?);
        }
        Ok(Partial::Map(resolved))
    }

    fn resolve_field(&self, fields: &BTreeMap<String, Bound>, field: &FieldSchema) -> ResolveResult<Partial> {
        let direct = fields.get(&field.name).unwrap_or(&Bound::Unfilled);

        if !field.schema.is_record_bearing() {
            if direct.is_unfilled() {
                return self.absent(field);
            }
            return self.resolve_nested(&field.name, &field.schema, direct);
        }

        let path = fields
            .get(&path_field(&field.name))
            .unwrap_or(&Bound::Unfilled);
        let overwrite = fields
            .get(&overwrite_field(&field.name))
            .unwrap_or(&Bound::Unfilled);

        match direct.unwrap_member() {
            Bound::Unfilled | Bound::Record { .. } => {}
            Bound::Variant { enumeration, .. } if enumeration.reference.is_some() => {}
            _ => return self.resolve_nested(&field.name, &field.schema, direct),
        }

        if direct.is_unfilled() && path.is_unfilled() && overwrite.is_unfilled() {
            return self.absent(field);
        }

        self.logger
            .debug(self.depth, &format!("resolving `{}`", field.name));
        let members = field.schema.record_members();
        let mut accumulator: Option<Value> = None;

        if !path.is_unfilled() {
            let reference = match path.unwrap_member() {
                Bound::Value(Value::String(reference)) => reference,
                other => {
                    return Err(ResolveError::PathValueType {
                        field: field.name.clone(),
                        found: describe_value(&other.to_plain()),
                    });
                }
            };
            let value = self.resolve_path(field, reference, &members)?;
            accumulator = merge_contribution(accumulator, Some(value));
        }

        match direct.unwrap_member() {
            Bound::Record { .. } => {
                let value = self.resolve_direct(field, direct, &members)?;
                accumulator = merge_contribution(accumulator, value);
            }
            Bound::Variant {
                enumeration,
                variant,
            } => {
                let value = self.resolve_preset(&field.name, enumeration, variant, &members)?;
                accumulator = merge_contribution(accumulator, Some(value));
            }
            _ => {}
        }

        if !overwrite.is_unfilled() {
            let value = self.resolve_overwrite(field, overwrite, &members)?;
            accumulator = merge_contribution(accumulator, value);
        }

        if direct.is_unfilled() && path.is_unfilled() {
            self.require(field)?;
        }

        Ok(accumulator.map(Partial::Value).unwrap_or(Partial::Unfilled))
    }

    /// Outcome for a field no source mentioned.
    fn absent(&self, field: &FieldSchema) -> ResolveResult<Partial> {
        self.require(field)?;
        Ok(Partial::Unfilled)
    }

    fn require(&self, field: &FieldSchema) -> ResolveResult<()> {
        if self.strict && field.default.is_required() {
            return Err(ResolveError::MissingValueOrPath {
                field: field.name.clone(),
            });
        }
        Ok(())
    }

    /// Step A: load the referenced file as one of the field's record types.
    fn resolve_path(&self, field: &FieldSchema, reference: &str, members: &[Arc<str>]) -> ResolveResult<Value> {
        let path = resolve_package_path(reference, self.package_root)?;
        let (child, tree) = self.open(&path)?;

        self.first_success(
            &field.name,
            members,
            field.schema.as_union().is_some(),
            |member| child.resolve_value(&tree, member),
            |attempts| ResolveError::DataclassUnionResolution {
                field: field.name.clone(),
                attempts,
            },
        )
    }

    /// Step B for an inline record.
    fn resolve_direct(&self, field: &FieldSchema, direct: &Bound, members: &[Arc<str>]) -> ResolveResult<Option<Value>> {
        let raw = direct.to_partial().prune_or_empty();
        self.first_success(
            &field.name,
            members,
            field.schema.as_union().is_some(),
            |member| {
                self.check_discriminator(&field.schema, member, &raw)?;
                self.resolve_member(direct, member, self.strict)
            },
            |attempts| ResolveError::DataclassUnionResolution {
                field: field.name.clone(),
                attempts,
            },
        )
    }

    /// Step B for a preset: load the file the variant names.
    fn resolve_preset(
        &self,
        label: &str,
        enumeration: &EnumSchema,
        variant: &str,
        members: &[Arc<str>],
    ) -> ResolveResult<Value> {
        let Some(reference) = enumeration.reference_for(variant) else {
            return Ok(Value::String(variant.to_string()));
        };
        let path = resolve_package_path(&reference, self.package_root)?;
        let (child, tree) = self.open(&path)?;

        let mut attempts = Vec::new();
        for member in members {
            match child.resolve_value(&tree, member) {
                Ok(value) => return Ok(value),
                Err(error) => {
                    self.logger.debug(
                        self.depth + 1,
                        &format!("`{}`: preset `{}` is not a `{}`: {}", label, variant, member, error),
                    );
                    attempts.push(Attempt::new(member.to_string(), error));
                }
            }
        }
        Err(ResolveError::PresetUnionResolution {
            field: label.to_string(),
            preset: variant.to_string(),
            attempts,
        })
    }

    /// Step C: resolve the overwrite as a partial record of the field's type.
    fn resolve_overwrite(
        &self,
        field: &FieldSchema,
        overwrite: &Bound,
        members: &[Arc<str>],
    ) -> ResolveResult<Option<Value>> {
        if overwrite.record_fields().is_none() {
            return Err(ResolveError::OverwriteValueType {
                field: field.name.clone(),
                found: describe_value(&overwrite.to_plain()),
            });
        }

        let raw = overwrite.to_partial().prune_or_empty();
        self.first_success(
            &field.name,
            members,
            field.schema.as_union().is_some(),
            |member| {
                self.check_discriminator(&field.schema, member, &raw)?;
                self.resolve_member(overwrite, member, false)
            },
            |attempts| ResolveError::OverwriteUnionResolution {
                field: field.name.clone(),
                attempts,
            },
        )
    }

    /// Resolve a bound record as `member` and check it binds.
    ///
    /// Strict resolution must bind to the real record and yields the complete
    /// value. Otherwise it must bind to the partial record and yields only what
    /// was given, or `None` if nothing was.
    fn resolve_member(&self, bound: &Bound, member: &Arc<str>, strict: bool) -> ResolveResult<Option<Value>> {
        let target = self.registry.get(member)?;
        self.check_consumed(bound, &target)?;

        let partial = self.with_strict(strict).resolve_record(bound, member)?;
        let pruned = partial.prune();
        let value = pruned
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new()));

        if strict {
            let decoded = self.decoder().decode(&Schema::Record(Arc::clone(member)), &value)?;
            return Ok(Some(decoded.to_plain()));
        }
        let shadow = self.registry.partial_sentinel(member)?;
        self.decoder().decode(&Schema::Record(shadow), &value)?;
        Ok(pruned)
    }

    /// Every filled key of `bound` must belong to `target`.
    fn check_consumed(&self, bound: &Bound, target: &RecordSchema) -> ResolveResult<()> {
        let Some(fields) = bound.record_fields() else {
            return Ok(());
        };
        let failures: Vec<FieldFailure> = fields
            .iter()
            .filter(|(key, value)| !value.is_unfilled() && !consumes(target, key))
            .map(|(key, _)| FieldFailure {
                field: key.clone(),
                error: DecodeError::UnknownField,
            })
            .collect();
        if failures.is_empty() {
            return Ok(());
        }
        Err(DecodeError::Record {
            record: target.name.clone(),
            failures,
        }
        .into())
    }

    fn check_discriminator(&self, schema: &Schema, member: &Arc<str>, raw: &Value) -> ResolveResult<()> {
        let Some(union) = schema.as_union() else {
            return Ok(());
        };
        match discriminator_mismatch(self.registry, union, &Schema::Record(Arc::clone(member)), raw) {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    /// Try `attempt` on each member in order; the first success wins.
    ///
    /// A lone record (not a union) reports its own error; otherwise every
    /// attempt is wrapped by `wrap`.
    fn first_success<T>(
        &self,
        label: &str,
        members: &[Arc<str>],
        union: bool,
        mut attempt: impl FnMut(&Arc<str>) -> ResolveResult<T>,
        wrap: impl FnOnce(Vec<Attempt<ResolveError>>) -> ResolveError,
    ) -> ResolveResult<T> {
        let mut attempts = Vec::new();
        for member in members {
            self.logger
                .debug(self.depth + 1, &format!("`{}`: trying `{}`", label, member));
            match attempt(member) {
                Ok(value) => {
                    self.logger
                        .debug(self.depth + 1, &format!("`{}`: resolved as `{}`", label, member));
                    return Ok(value);
                }
                Err(error) => {
                    self.logger.debug(
                        self.depth + 1,
                        &format!("`{}`: `{}` failed: {}", label, member, error),
                    );
                    attempts.push(Attempt::new(member.to_string(), error));
                }
            }
        }

        if !union && attempts.len() == 1 {
            if let Some(only) = attempts.pop() {
                return Err(only.error);
            }
        }
        Err(wrap(attempts))
    }

    /// Resolve records and presets held inside collections, element by element.
    fn resolve_nested(&self, label: &str, schema: &Schema, bound: &Bound) -> ResolveResult<Partial> {
        // Shadow unions keep the member order of the real ones.
        if let (Some(union), Bound::Member { index, value, .. }) = (schema.as_union(), bound) {
            if let Some(member) = union.members.get(*index) {
                return self.resolve_nested(label, &member.schema, value);
            }
        }
        let Schema::Collection { element, .. } = schema.strip_optional() else {
            return Ok(bound.to_partial());
        };
        match bound {
            Bound::Seq(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let label = format!("{}[{}]", label, index);
                    resolved.push(self.resolve_element(&label, element, item)?);
                }
                Ok(Partial::Value(Value::Array(resolved)))
            }
            Bound::Map(entries) => {
                let mut resolved = Map::new();
                for (key, entry) in entries {
                    let label = format!("{}.{}", label, key);
                    resolved.insert(key.clone(), self.resolve_element(&label, element, entry)?);
                }
                Ok(Partial::Value(Value::Object(resolved)))
            }
            _ => Ok(bound.to_partial()),
        }
    }

    fn resolve_element(&self, label: &str, element: &Schema, item: &Bound) -> ResolveResult<Value> {
        let members = element.record_members();
        match item.unwrap_member() {
            Bound::Record { .. } if !members.is_empty() => {
                let raw = item.to_partial().prune_or_empty();
                let value = self.first_success(
                    label,
                    &members,
                    element.as_union().is_some(),
                    |member| {
                        self.check_discriminator(element, member, &raw)?;
                        self.resolve_member(item, member, self.strict)
                    },
                    |attempts| ResolveError::DataclassUnionResolution {
                        field: label.to_string(),
                        attempts,
                    },
                )?;
                Ok(value.unwrap_or_else(|| Value::Object(Map::new())))
            }
            Bound::Variant {
                enumeration,
                variant,
            } if enumeration.reference.is_some() && !members.is_empty() => {
                self.resolve_preset(label, enumeration, variant, &members)
            }
            _ => Ok(self.resolve_nested(label, element, item)?.prune_or_empty()),
        }
    }
}

impl std::fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("package_root", &self.package_root)
            .field("strict", &self.strict)
            .field("coerce_strings", &self.coerce_strings)
            .field("depth", &self.depth)
            .field("chain", &self.chain)
            .finish()
    }
}

/// True when `key` is a field of `target` or a `__path`/`__overwrite` sibling of one.
fn consumes(target: &RecordSchema, key: &str) -> bool {
    if target.get(key).is_some() {
        return true;
    }
    [PATH_SUFFIX, OVERWRITE_SUFFIX].iter().any(|suffix| {
        key.strip_suffix(suffix)
            .and_then(|base| target.get(base))
            .is_some_and(|field| field.schema.is_record_bearing())
    })
}

fn merge_contribution(accumulator: Option<Value>, contribution: Option<Value>) -> Option<Value> {
    match (accumulator, contribution) {
        (Some(base), Some(overlay)) => Some(deep_merge(base, overlay)),
        (base, None) => base,
        (None, overlay) => overlay,
    }
}

/// Declared defaults of `record`'s fields, as a value tree.
pub fn declared_defaults(record: &RecordSchema) -> Value {
    Value::Object(
        record
            .fields
            .iter()
            .filter_map(|field| match &field.default {
                FieldDefault::Value(value) => Some((field.name.clone(), value.clone())),
                _ => None,
            })
            .collect(),
    )
}
