//! Union-aware decoding of value trees against a schema.
//!
//! [`Decoder::decode`] checks a raw [`Value`] against a [`Schema`] and returns a
//! [`Bound`]: the same data, annotated with which union member, enum variant or
//! record each part was bound to. Union members are tried strictly in declared
//! order and the first success wins. When every member fails, the error lists
//! one reason per member.

use crate::error::{Attempt, DecodeError, FieldFailure, describe_value};
use crate::logging::Logger;
use crate::schema::{
    CollectionKind, EnumSchema, FieldDefault, Leaf, RecordSchema, Schema, SchemaRegistry,
    UnionSchema,
};
use crate::tree::Partial;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A value bound to a schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    /// Field left at the unfilled sentinel (shadow schemas only).
    Unfilled,
    /// Scalar, null or opaque value.
    Value(Value),
    /// Enum value, kept with its enumeration so presets can be expanded.
    Variant {
        enumeration: Arc<EnumSchema>,
        variant: String,
    },
    Record {
        record: Arc<RecordSchema>,
        fields: BTreeMap<String, Bound>,
    },
    /// Value matched by member `index` of `union`.
    Member {
        union: Arc<UnionSchema>,
        index: usize,
        value: Box<Bound>,
    },
    Seq(Vec<Bound>),
    Map(BTreeMap<String, Bound>),
}

impl Bound {
    pub fn is_unfilled(&self) -> bool {
        matches!(self, Bound::Unfilled)
    }

    /// The value with union membership layers removed.
    pub fn unwrap_member(&self) -> &Bound {
        match self {
            Bound::Member { value, .. } => value.unwrap_member(),
            other => other,
        }
    }

    /// Fields of a bound record, looking through union membership.
    pub fn record_fields(&self) -> Option<&BTreeMap<String, Bound>> {
        match self.unwrap_member() {
            Bound::Record { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// Lower to a tree that may still contain unfilled holes.
    pub fn to_partial(&self) -> Partial {
        match self {
            Bound::Unfilled => Partial::Unfilled,
            Bound::Record { fields, .. } => Partial::Map(
                fields
                    .iter()
                    .map(|(name, field)| (name.clone(), field.to_partial()))
                    .collect(),
            ),
            Bound::Member { value, .. } => value.to_partial(),
            Bound::Seq(items) => Partial::Value(Value::Array(
                items
                    .iter()
                    .map(|item| item.to_partial().prune_or_empty())
                    .collect(),
            )),
            Bound::Map(entries) => Partial::Value(Value::Object(
                entries
                    .iter()
                    .map(|(key, entry)| (key.clone(), entry.to_partial().prune_or_empty()))
                    .collect(),
            )),
            Bound::Value(_) | Bound::Variant { .. } => Partial::Value(self.to_plain()),
        }
    }

    /// Lower to a plain tree. Union membership is dropped and unfilled record
    /// fields are left out.
    pub fn to_plain(&self) -> Value {
        self.lower(false)
    }

    /// Lower to a tree where each union value is wrapped as `{member: value}`,
    /// the shape serde expects for an externally tagged enum.
    pub fn to_tagged(&self) -> Value {
        self.lower(true)
    }

    fn lower(&self, tagged: bool) -> Value {
        match self {
            Bound::Unfilled => Value::Null,
            Bound::Value(value) => value.clone(),
            Bound::Variant { variant, .. } => Value::String(variant.clone()),
            Bound::Record { fields, .. } => Value::Object(
                fields
                    .iter()
                    .filter(|(_, field)| !field.is_unfilled())
                    .map(|(name, field)| (name.clone(), field.lower(tagged)))
                    .collect(),
            ),
            Bound::Member {
                union,
                index,
                value,
            } => {
                let inner = value.lower(tagged);
                match union.members.get(*index) {
                    Some(member) if tagged => {
                        let mut wrapper = Map::new();
                        wrapper.insert(member.name.clone(), inner);
                        Value::Object(wrapper)
                    }
                    _ => inner,
                }
            }
            Bound::Seq(items) => Value::Array(items.iter().map(|i| i.lower(tagged)).collect()),
            Bound::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, entry)| (key.clone(), entry.lower(tagged)))
                    .collect(),
            ),
        }
    }
}

/// Early rejection of a union member by its discriminator.
///
/// Returns an error only when the union names a discriminator, the member is a
/// record whose discriminator field is a literal, and `raw` carries that key
/// with a different value. A missing key never rejects.
pub(crate) fn discriminator_mismatch(
    registry: &SchemaRegistry,
    union: &UnionSchema,
    member: &Schema,
    raw: &Value,
) -> Option<DecodeError> {
    let field = union.discriminator.as_deref()?;
    let Schema::Record(name) = member.strip_optional() else {
        return None;
    };
    let record = registry.lookup(name)?;
    let Schema::Leaf(Leaf::Literal(expected)) = record.get(field)?.schema.strip_optional() else {
        return None;
    };
    let found = raw.as_object()?.get(field)?;
    if found == expected {
        return None;
    }
    Some(DecodeError::DiscriminatorMismatch {
        field: field.to_string(),
        expected: expected.clone(),
        found: found.clone(),
    })
}

/// Binds raw value trees to schemas.
pub struct Decoder<'a> {
    registry: &'a SchemaRegistry,
    logger: &'a Logger,
    coerce_strings: bool,
    depth: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(registry: &'a SchemaRegistry, logger: &'a Logger) -> Self {
        Self {
            registry,
            logger,
            coerce_strings: false,
            depth: 0,
        }
    }

    /// Accept strings for int, float, bool and non-string literal schemas,
    /// as produced by a command line.
    pub fn coerce_strings(mut self, coerce: bool) -> Self {
        self.coerce_strings = coerce;
        self
    }

    /// Indentation depth for log events.
    pub fn at_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn decode(&self, schema: &Schema, raw: &Value) -> Result<Bound, DecodeError> {
        match schema {
            Schema::Leaf(leaf) => self.decode_leaf(schema, leaf, raw),
            Schema::Optional(inner) => match raw {
                Value::Null => Ok(Bound::Value(Value::Null)),
                _ => self.decode(inner, raw),
            },
            Schema::Collection { kind, element } => self.decode_collection(schema, *kind, element, raw),
            Schema::Record(name) => self.decode_record(name, raw),
            Schema::Union(union) => self.decode_union(union, raw),
        }
    }

    fn decode_leaf(&self, schema: &Schema, leaf: &Leaf, raw: &Value) -> Result<Bound, DecodeError> {
        let value = match (leaf, raw) {
            (Leaf::Any, _) => Some(raw.clone()),
            (Leaf::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(raw.clone()),
            (Leaf::Float, Value::Number(_)) => Some(raw.clone()),
            (Leaf::Str, Value::String(_)) => Some(raw.clone()),
            (Leaf::Bool, Value::Bool(_)) => Some(raw.clone()),
            (Leaf::Int, Value::String(s)) if self.coerce_strings => {
                s.trim().parse::<i64>().ok().map(Value::from)
            }
            (Leaf::Float, Value::String(s)) if self.coerce_strings => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            (Leaf::Bool, Value::String(s)) if self.coerce_strings => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Some(Value::Bool(true)),
                    "false" => Some(Value::Bool(false)),
                    _ => None,
                }
            }
            (Leaf::Literal(expected), _) => {
                let coerced = self.coerce_strings
                    && !expected.is_string()
                    && raw.as_str().is_some_and(|s| s == expected.to_string());
                if raw == expected || coerced {
                    Some(expected.clone())
                } else {
                    return Err(DecodeError::LiteralMismatch {
                        expected: expected.clone(),
                        found: raw.clone(),
                    });
                }
            }
            (Leaf::Enum(enumeration), Value::String(s)) => {
                if enumeration.contains(s) {
                    return Ok(Bound::Variant {
                        enumeration: Arc::clone(enumeration),
                        variant: s.clone(),
                    });
                }
                return Err(DecodeError::UnknownVariant {
                    enumeration: enumeration.name.clone(),
                    value: s.clone(),
                    allowed: enumeration.variants.clone(),
                });
            }
            _ => None,
        };

        value
            .map(Bound::Value)
            .ok_or_else(|| mismatch(schema, raw))
    }

    fn decode_collection(
        &self,
        schema: &Schema,
        kind: CollectionKind,
        element: &Schema,
        raw: &Value,
    ) -> Result<Bound, DecodeError> {
        match (kind, raw) {
            (CollectionKind::Sequence | CollectionKind::Set, Value::Array(items)) => {
                let mut seen: Vec<&Value> = Vec::new();
                let mut bound = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    if kind == CollectionKind::Set {
                        if seen.contains(&item) {
                            return Err(DecodeError::DuplicateElement(item.clone()));
                        }
                        seen.push(item);
                    }
                    let decoded = self
                        .decode(element, item)
                        .map_err(|e| element_error(index.to_string(), e))?;
                    bound.push(decoded);
                }
                Ok(Bound::Seq(bound))
            }
            (CollectionKind::Mapping, Value::Object(entries)) => {
                let mut bound = BTreeMap::new();
                for (key, entry) in entries {
                    let decoded = self
                        .decode(element, entry)
                        .map_err(|e| element_error(key.clone(), e))?;
                    bound.insert(key.clone(), decoded);
                }
                Ok(Bound::Map(bound))
            }
            _ => Err(mismatch(schema, raw)),
        }
    }

    fn decode_record(&self, name: &str, raw: &Value) -> Result<Bound, DecodeError> {
        let record = self
            .registry
            .lookup(name)
            .ok_or_else(|| DecodeError::UnknownRecord(name.to_string()))?;
        let Value::Object(entries) = raw else {
            return Err(DecodeError::TypeMismatch {
                expected: format!("mapping for `{}`", record.name),
                found: describe_value(raw),
            });
        };

        let mut fields = BTreeMap::new();
        let mut failures = Vec::new();

        for field in &record.fields {
            let decoded = match (entries.get(&field.name), &field.default) {
                (Some(value), _) => self.decode(&field.schema, value),
                (None, FieldDefault::Value(default)) => self.decode(&field.schema, default),
                (None, FieldDefault::Unfilled) => Ok(Bound::Unfilled),
                (None, FieldDefault::Required) => Err(DecodeError::MissingField),
            };
            match decoded {
                Ok(bound) => {
                    fields.insert(field.name.clone(), bound);
                }
                Err(error) => failures.push(FieldFailure {
                    field: field.name.clone(),
                    error,
                }),
            }
        }

        for key in entries.keys() {
            if record.get(key).is_none() {
                failures.push(FieldFailure {
                    field: key.clone(),
                    error: DecodeError::UnknownField,
                });
            }
        }

        if !failures.is_empty() {
            return Err(DecodeError::Record {
                record: record.name.clone(),
                failures,
            });
        }
        Ok(Bound::Record { record, fields })
    }

    fn decode_union(&self, union: &Arc<UnionSchema>, raw: &Value) -> Result<Bound, DecodeError> {
        let mut attempts = Vec::new();

        for (index, member) in union.members.iter().enumerate() {
            if let Some(error) = discriminator_mismatch(self.registry, union, &member.schema, raw) {
                self.logger.trace(
                    self.depth,
                    &format!("`{}`: skipping member `{}`: {}", union.name, member.name, error),
                );
                attempts.push(Attempt::new(member.name.clone(), error));
                continue;
            }

            self.logger.trace(
                self.depth,
                &format!("`{}`: trying member `{}`", union.name, member.name),
            );
            match self.decode(&member.schema, raw) {
                Ok(value) => {
                    self.logger.trace(
                        self.depth,
                        &format!("`{}`: matched member `{}`", union.name, member.name),
                    );
                    return Ok(Bound::Member {
                        union: Arc::clone(union),
                        index,
                        value: Box::new(value),
                    });
                }
                Err(error) => attempts.push(Attempt::new(member.name.clone(), error)),
            }
        }

        Err(DecodeError::UnionExhausted {
            union: union.name.clone(),
            attempts,
        })
    }
}

fn mismatch(schema: &Schema, raw: &Value) -> DecodeError {
    DecodeError::TypeMismatch {
        expected: schema.to_string(),
        found: describe_value(raw),
    }
}

fn element_error(index: String, error: DecodeError) -> DecodeError {
    DecodeError::Element {
        index,
        error: Box::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let registry = SchemaRegistry::new();
        registry
            .register_all([
                RecordSchema::new("OptionA")
                    .field_with_default("discriminator", Schema::literal("A"), "A")
                    .field("value", Schema::INT),
                RecordSchema::new("OptionB")
                    .field_with_default("discriminator", Schema::literal("B"), "B")
                    .field("name", Schema::STR),
                RecordSchema::new("Server")
                    .field("host", Schema::STR)
                    .field("port", Schema::INT)
                    .field_with_default("debug", Schema::BOOL, false),
            ])
            .unwrap();
        registry
    }

    fn option() -> Schema {
        Schema::union(
            UnionSchema::new("Option")
                .member("OptionA", Schema::record("OptionA"))
                .member("OptionB", Schema::record("OptionB"))
                .discriminated_by("discriminator"),
        )
    }

    #[test]
    fn test_enum_binds_plain_string_by_value() {
        let registry = registry();
        let logger = Logger::disabled();
        let decoder = Decoder::new(&registry, &logger);
        let schema = Schema::enumeration(EnumSchema::new("Color", ["red", "green"]));

        let bound = decoder.decode(&schema, &json!("green")).unwrap();
        assert!(matches!(bound, Bound::Variant { ref variant, .. } if variant == "green"));

        let err = decoder.decode(&schema, &json!("blue")).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownVariant { .. }));
        assert!(err.to_string().contains("red, green"));
    }

    #[test]
    fn test_union_uses_discriminator_hint() {
        let registry = registry();
        let logger = Logger::disabled();
        let decoder = Decoder::new(&registry, &logger);

        let bound = decoder
            .decode(&option(), &json!({"discriminator": "B", "name": "hello"}))
            .unwrap();
        let Bound::Member { index, .. } = &bound else {
            panic!("expected a union member, got {:?}", bound);
        };
        assert_eq!(*index, 1);
        assert_eq!(
            bound.to_tagged(),
            json!({"OptionB": {"discriminator": "B", "name": "hello"}})
        );
        assert_eq!(bound.to_plain(), json!({"discriminator": "B", "name": "hello"}));
    }

    #[test]
    fn test_union_without_discriminator_falls_back_to_structure() {
        let registry = registry();
        let logger = Logger::disabled();
        let decoder = Decoder::new(&registry, &logger);

        let bound = decoder.decode(&option(), &json!({"name": "hello"})).unwrap();
        assert_eq!(bound.to_plain(), json!({"discriminator": "B", "name": "hello"}));
    }

    #[test]
    fn test_union_exhausted_lists_every_member() {
        let registry = registry();
        let logger = Logger::disabled();
        let decoder = Decoder::new(&registry, &logger);

        let err = decoder
            .decode(&option(), &json!({"discriminator": "A", "name": "x"}))
            .unwrap_err();
        let DecodeError::UnionExhausted { attempts, .. } = &err else {
            panic!("expected exhaustion, got {:?}", err);
        };
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].candidate, "OptionA");
        assert!(matches!(attempts[0].error, DecodeError::Record { .. }));
        assert!(matches!(
            attempts[1].error,
            DecodeError::DiscriminatorMismatch { .. }
        ));
    }

    #[test]
    fn test_record_error_lists_all_failing_fields() {
        let registry = registry();
        let logger = Logger::disabled();
        let decoder = Decoder::new(&registry, &logger);

        let err = decoder
            .decode(&Schema::record("Server"), &json!({"port": "x", "extra": 1}))
            .unwrap_err();
        let DecodeError::Record { failures, .. } = &err else {
            panic!("expected record failure, got {:?}", err);
        };
        let fields: Vec<&str> = failures.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, vec!["host", "port", "extra"]);
    }

    #[test]
    fn test_record_fills_declared_defaults() {
        let registry = registry();
        let logger = Logger::disabled();
        let decoder = Decoder::new(&registry, &logger);

        let bound = decoder
            .decode(&Schema::record("Server"), &json!({"host": "h", "port": 1}))
            .unwrap();
        assert_eq!(bound.to_plain(), json!({"host": "h", "port": 1, "debug": false}));
    }

    #[test]
    fn test_string_coercion_only_when_enabled() {
        let registry = registry();
        let logger = Logger::disabled();
        let strict = Decoder::new(&registry, &logger);
        let lenient = Decoder::new(&registry, &logger).coerce_strings(true);

        assert!(strict.decode(&Schema::INT, &json!("42")).is_err());
        assert_eq!(
            lenient.decode(&Schema::INT, &json!("42")).unwrap(),
            Bound::Value(json!(42))
        );
        assert_eq!(
            lenient.decode(&Schema::BOOL, &json!("True")).unwrap(),
            Bound::Value(json!(true))
        );
        assert_eq!(
            lenient.decode(&Schema::FLOAT, &json!("0.5")).unwrap(),
            Bound::Value(json!(0.5))
        );
        assert!(lenient.decode(&Schema::INT, &json!("4.5")).is_err());
    }

    #[test]
    fn test_int_rejects_float() {
        let registry = registry();
        let logger = Logger::disabled();
        let decoder = Decoder::new(&registry, &logger);
        assert!(decoder.decode(&Schema::INT, &json!(1.5)).is_err());
        assert!(decoder.decode(&Schema::FLOAT, &json!(1)).is_ok());
    }

    #[test]
    fn test_collections() {
        let registry = registry();
        let logger = Logger::disabled();
        let decoder = Decoder::new(&registry, &logger);

        let err = decoder
            .decode(&Schema::sequence(Schema::INT), &json!([1, "two"]))
            .unwrap_err();
        assert_eq!(err.to_string(), "element 1: expected int, found string \"two\"");

        let err = decoder
            .decode(&Schema::set(Schema::STR), &json!(["a", "a"]))
            .unwrap_err();
        assert_eq!(err, DecodeError::DuplicateElement(json!("a")));

        let bound = decoder
            .decode(&Schema::mapping(Schema::INT), &json!({"a": 1}))
            .unwrap();
        assert_eq!(bound.to_plain(), json!({"a": 1}));
    }

    #[test]
    fn test_optional_accepts_null() {
        let registry = registry();
        let logger = Logger::disabled();
        let decoder = Decoder::new(&registry, &logger);
        let schema = Schema::optional(Schema::record("Server"));
        assert_eq!(decoder.decode(&schema, &json!(null)).unwrap(), Bound::Value(Value::Null));
    }

    #[test]
    fn test_union_attempts_are_logged() {
        use crate::logging::CollectingSink;

        let registry = registry();
        let sink = Arc::new(CollectingSink::new());
        let logger = Logger::disabled().with_sink(sink.clone());
        let decoder = Decoder::new(&registry, &logger);

        decoder
            .decode(&option(), &json!({"discriminator": "B", "name": "x"}))
            .unwrap();
        let messages: Vec<String> = sink.records().into_iter().map(|r| r.message).collect();
        assert_eq!(
            messages,
            vec![
                "`Option`: skipping member `OptionA`: discriminator `discriminator` is \"B\", member expects \"A\"",
                "`Option`: trying member `OptionB`",
                "`Option`: matched member `OptionB`",
            ]
        );
    }
}
