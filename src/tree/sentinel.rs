//! The unfilled sentinel and pruning.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A value tree that may contain unfilled holes.
///
/// `Unfilled` is distinct from every [`Value`], including `null`. It only lives
/// inside resolution and never reaches caller-visible output: [`Partial::prune`]
/// is the only way back to a plain tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Partial {
    /// Not specified by this source.
    #[default]
    Unfilled,
    /// A plain value, possibly a mapping given as-is.
    Value(Value),
    /// A mapping whose entries may themselves be unfilled.
    Map(BTreeMap<String, Partial>),
}

impl Partial {
    pub fn is_unfilled(&self) -> bool {
        matches!(self, Partial::Unfilled)
    }

    /// Drop every unfilled entry, and every mapping that becomes empty because
    /// of it. Returns `None` when nothing is left.
    ///
    /// A mapping that was empty to begin with (`Value({})`) was given by a
    /// source and is kept.
    pub fn prune(self) -> Option<Value> {
        match self {
            Partial::Unfilled => None,
            Partial::Value(value) => Some(value),
            Partial::Map(entries) => {
                let pruned: Map<String, Value> = entries
                    .into_iter()
                    .filter_map(|(key, entry)| entry.prune().map(|value| (key, value)))
                    .collect();
                if pruned.is_empty() {
                    None
                } else {
                    Some(Value::Object(pruned))
                }
            }
        }
    }

    /// Prune, treating "nothing left" as an empty mapping.
    pub fn prune_or_empty(self) -> Value {
        self.prune().unwrap_or_else(|| Value::Object(Map::new()))
    }
}

impl From<Value> for Partial {
    fn from(value: Value) -> Self {
        Partial::Value(value)
    }
}
