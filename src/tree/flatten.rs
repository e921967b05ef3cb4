//! Dot-separated key paths, as used on the command line.

use crate::error::ResolveResult;
use crate::schema::{OVERWRITE_SUFFIX, Schema, SchemaRegistry};
use serde_json::{Map, Value};

/// Turn `{"a.b": 1, "a.c": 2, "d": 3}` into `{"a": {"b": 1, "c": 2}, "d": 3}`.
///
/// A key that descends through a non-mapping value replaces it with a mapping.
pub fn unflatten(flat: impl IntoIterator<Item = (String, Value)>) -> Value {
    let mut root = Map::new();
    for (key, value) in flat {
        let parts: Vec<&str> = key.split('.').collect();
        insert_path(&mut root, &parts, value);
    }
    Value::Object(root)
}

fn insert_path(node: &mut Map<String, Value>, parts: &[&str], value: Value) {
    match parts {
        [] => {}
        [last] => {
            node.insert(last.to_string(), value);
        }
        [head, rest @ ..] => {
            let child = node
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                insert_path(map, rest, value);
            }
        }
    }
}

/// Every dot-separated key a command line may set for `record`.
///
/// Record-bearing fields expand into the keys of each record they may hold,
/// plus their `__path` and `__overwrite` siblings. A record already being
/// expanded further up is not expanded again.
pub fn flag_keys(registry: &SchemaRegistry, record: &str) -> ResolveResult<Vec<String>> {
    let mut keys = Vec::new();
    let mut stack = Vec::new();
    collect_keys(registry, record, "", &mut stack, &mut keys)?;
    Ok(keys)
}

fn collect_keys(
    registry: &SchemaRegistry,
    record: &str,
    prefix: &str,
    stack: &mut Vec<String>,
    keys: &mut Vec<String>,
) -> ResolveResult<()> {
    let augmented = registry.path_augmented(record)?;
    let shadow = registry.get(&augmented)?;
    stack.push(shadow.origin_name().to_string());

    for field in &shadow.fields {
        let key = format!("{}{}", prefix, field.name);
        let members = field.schema.record_members();

        let overwrite = field.name.ends_with(OVERWRITE_SUFFIX);
        if members.is_empty() || (!overwrite && has_plain_members(&field.schema)) {
            push_unique(keys, key.clone());
        }

        for member in members {
            let origin = registry.get(&member)?.origin_name().to_string();
            if stack.contains(&origin) {
                continue;
            }
            collect_keys(registry, &member, &format!("{}.", key), stack, keys)?;
        }
    }

    stack.pop();
    Ok(())
}

/// True for a union that also admits non-record values, such as a preset name.
fn has_plain_members(schema: &Schema) -> bool {
    schema
        .as_union()
        .map(|union| {
            union
                .members
                .iter()
                .any(|member| member.schema.record_members().is_empty())
        })
        .unwrap_or(false)
}

fn push_unique(keys: &mut Vec<String>, key: String) {
    if !keys.contains(&key) {
        keys.push(key);
    }
}
