//! Precedence merging guided by a schema.
//!
//! Same rules as [`deep_merge`], except at union-typed values. The two sides
//! merge along the first member both of them are a valid partial value of.
//! When no member accepts both, the overlay replaces the base, so fields of
//! one member never leak into another.

use super::merge::deep_merge;
use crate::decode::Decoder;
use crate::logging::Logger;
use crate::schema::{CollectionKind, Leaf, Schema, SchemaRegistry, UnionSchema};
use serde_json::{Map, Value};

pub fn merge_with_schema(registry: &SchemaRegistry, schema: &Schema, base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            merge_maps(registry, schema, base_map, overlay_map)
        }
        (_, overlay) => overlay,
    }
}

fn merge_maps(
    registry: &SchemaRegistry,
    schema: &Schema,
    base: Map<String, Value>,
    overlay: Map<String, Value>,
) -> Value {
    match schema.strip_optional() {
        Schema::Record(name) => {
            let record = registry.lookup(name);
            merge_entries(registry, base, overlay, |key| {
                record
                    .as_ref()
                    .and_then(|r| r.get(key))
                    .map(|field| field.schema.clone())
            })
        }
        Schema::Collection {
            kind: CollectionKind::Mapping,
            element,
        } => merge_entries(registry, base, overlay, |_| Some(Schema::clone(element))),
        Schema::Union(union) => merge_union(registry, union, base, overlay),
        Schema::Leaf(Leaf::Any) => deep_merge(Value::Object(base), Value::Object(overlay)),
        _ => Value::Object(overlay),
    }
}

fn merge_entries(
    registry: &SchemaRegistry,
    mut base: Map<String, Value>,
    overlay: Map<String, Value>,
    schema_of: impl Fn(&str) -> Option<Schema>,
) -> Value {
    for (key, overlay_value) in overlay {
        let merged = match base.remove(&key) {
            Some(base_value) => match schema_of(&key) {
                Some(schema) => merge_with_schema(registry, &schema, base_value, overlay_value),
                None => deep_merge(base_value, overlay_value),
            },
            None => overlay_value,
        };
        base.insert(key, merged);
    }
    Value::Object(base)
}

fn merge_union(
    registry: &SchemaRegistry,
    union: &UnionSchema,
    base: Map<String, Value>,
    overlay: Map<String, Value>,
) -> Value {
    let logger = Logger::disabled();
    let decoder = Decoder::new(registry, &logger);
    let base = Value::Object(base);
    let overlay = Value::Object(overlay);

    for member in &union.members {
        let Schema::Record(name) = member.schema.strip_optional() else {
            continue;
        };
        let Ok(partial) = registry.partial_sentinel(name) else {
            continue;
        };
        let target = Schema::Record(partial);
        if decoder.decode(&target, &overlay).is_err() {
            continue;
        }
        if decoder.decode(&target, &base).is_ok() {
            return merge_with_schema(registry, &member.schema, base, overlay);
        }
    }
    overlay
}
