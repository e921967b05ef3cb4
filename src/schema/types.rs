//! Schema Model: an explicit description of a target configuration type.
//!
//! Records are referenced by name and looked up through the
//! [`SchemaRegistry`](super::SchemaRegistry); the name is the identity of the
//! target type. Everything else is held inline.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// A node of the schema tree.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schema {
    /// Reference to a record registered under this name.
    Record(Arc<str>),
    /// Ordered alternatives; order is the trial order.
    Union(Arc<UnionSchema>),
    /// Sequence, set or string-keyed mapping of `element`.
    Collection {
        kind: CollectionKind,
        element: Box<Schema>,
    },
    /// `null` or `inner`.
    Optional(Box<Schema>),
    #[serde(untagged)]
    Leaf(Leaf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Sequence,
    Set,
    Mapping,
}

/// Primitive or enumerated value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leaf {
    Int,
    Float,
    Str,
    Bool,
    /// Opaque value, passed through unchanged.
    Any,
    /// Exactly this value. Used for union discriminators.
    Literal(Value),
    Enum(Arc<EnumSchema>),
}

/// A closed set of string values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnumSchema {
    pub name: String,
    pub variants: Vec<String>,
    /// Path template of the file backing each variant, with `{}` standing for
    /// the variant name. An enum with a reference is a preset: its values name
    /// a configuration file rather than holding data.
    #[serde(default)]
    pub reference: Option<String>,
}

impl EnumSchema {
    pub fn new<S: Into<String>>(name: impl Into<String>, variants: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            variants: variants.into_iter().map(Into::into).collect(),
            reference: None,
        }
    }

    /// Make this enum a preset whose variants live in files named by `template`.
    pub fn with_reference(mut self, template: impl Into<String>) -> Self {
        self.reference = Some(template.into());
        self
    }

    pub fn contains(&self, value: &str) -> bool {
        self.variants.iter().any(|v| v == value)
    }

    /// The file backing `variant`, if this enum is a preset.
    pub fn reference_for(&self, variant: &str) -> Option<String> {
        self.reference
            .as_ref()
            .map(|template| template.replace("{}", variant))
    }
}

/// Ordered list of alternative schemas.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UnionSchema {
    pub name: String,
    pub members: Vec<UnionMember>,
    /// Literal-valued field shared by the record members, used as a hint.
    #[serde(default)]
    pub discriminator: Option<String>,
}

impl UnionSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            discriminator: None,
        }
    }

    pub fn member(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.members.push(UnionMember {
            name: name.into(),
            schema,
        });
        self
    }

    pub fn discriminated_by(mut self, field: impl Into<String>) -> Self {
        self.discriminator = Some(field.into());
        self
    }
}

/// A named union alternative. The name is the variant tag used when binding
/// to an externally tagged Rust enum.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UnionMember {
    pub name: String,
    #[serde(rename = "type")]
    pub schema: Schema,
}

/// What a field falls back to when a source does not mention it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldDefault {
    /// No default; the field must be supplied.
    #[default]
    Required,
    /// Declared default value, in value-tree form.
    Value(Value),
    /// The unfilled sentinel (shadow schemas only).
    Unfilled,
}

impl FieldDefault {
    pub fn is_required(&self) -> bool {
        matches!(self, FieldDefault::Required)
    }
}

fn deserialize_default<'de, D>(deserializer: D) -> Result<FieldDefault, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(FieldDefault::Value)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub schema: Schema,
    #[serde(default, deserialize_with = "deserialize_default")]
    pub default: FieldDefault,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            default: FieldDefault::Required,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = FieldDefault::Value(default.into());
        self
    }
}

/// Named, ordered, typed fields.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordSchema {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
    /// Record this one was derived from, for shadow records.
    #[serde(skip)]
    pub origin: Option<String>,
    #[serde(skip)]
    pub path_augmented: bool,
    #[serde(skip)]
    pub partial: bool,
}

impl RecordSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            origin: None,
            path_augmented: false,
            partial: false,
        }
    }

    /// Add a required field.
    pub fn field(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.fields.push(FieldSchema::new(name, schema));
        self
    }

    /// Add a field with a declared default.
    pub fn field_with_default(
        mut self,
        name: impl Into<String>,
        schema: Schema,
        default: impl Into<Value>,
    ) -> Self {
        self.fields
            .push(FieldSchema::new(name, schema).with_default(default));
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Name of the user-declared record this one describes.
    pub fn origin_name(&self) -> &str {
        self.origin.as_deref().unwrap_or(&self.name)
    }
}

/// A schema file: a root record name and the records it needs.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaDocument {
    pub root: String,
    pub records: Vec<RecordSchema>,
}

impl SchemaDocument {
    /// Load a schema document from a YAML or JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let document: SchemaDocument = serde_yaml::from_str(&content)?;
        Ok(document)
    }
}

impl Schema {
    pub const INT: Schema = Schema::Leaf(Leaf::Int);
    pub const FLOAT: Schema = Schema::Leaf(Leaf::Float);
    pub const STR: Schema = Schema::Leaf(Leaf::Str);
    pub const BOOL: Schema = Schema::Leaf(Leaf::Bool);
    pub const ANY: Schema = Schema::Leaf(Leaf::Any);

    pub fn record(name: &str) -> Self {
        Schema::Record(Arc::from(name))
    }

    pub fn union(union: UnionSchema) -> Self {
        Schema::Union(Arc::new(union))
    }

    pub fn enumeration(enumeration: EnumSchema) -> Self {
        Schema::Leaf(Leaf::Enum(Arc::new(enumeration)))
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Schema::Leaf(Leaf::Literal(value.into()))
    }

    /// `Optional(inner)`; never nests two optionals.
    pub fn optional(inner: Schema) -> Self {
        match inner {
            Schema::Optional(_) => inner,
            other => Schema::Optional(Box::new(other)),
        }
    }

    pub fn sequence(element: Schema) -> Self {
        Self::collection(CollectionKind::Sequence, element)
    }

    pub fn set(element: Schema) -> Self {
        Self::collection(CollectionKind::Set, element)
    }

    pub fn mapping(element: Schema) -> Self {
        Self::collection(CollectionKind::Mapping, element)
    }

    fn collection(kind: CollectionKind, element: Schema) -> Self {
        Schema::Collection {
            kind,
            element: Box::new(element),
        }
    }

    /// The schema with any `Optional` wrapper removed.
    pub fn strip_optional(&self) -> &Schema {
        match self {
            Schema::Optional(inner) => inner.strip_optional(),
            other => other,
        }
    }

    pub fn as_union(&self) -> Option<&UnionSchema> {
        match self.strip_optional() {
            Schema::Union(union) => Some(union),
            _ => None,
        }
    }

    /// Records this schema may directly be, in trial order.
    ///
    /// Looks through `Optional` and (nested) unions but not into collections.
    pub fn record_members(&self) -> Vec<Arc<str>> {
        let mut out = Vec::new();
        self.collect_record_members(&mut out);
        out
    }

    fn collect_record_members(&self, out: &mut Vec<Arc<str>>) {
        match self {
            Schema::Record(name) => out.push(Arc::clone(name)),
            Schema::Optional(inner) => inner.collect_record_members(out),
            Schema::Union(union) => {
                for member in &union.members {
                    member.schema.collect_record_members(out);
                }
            }
            Schema::Collection { .. } | Schema::Leaf(_) => {}
        }
    }

    /// True when the field holding this schema gets `__path`/`__overwrite` siblings.
    pub fn is_record_bearing(&self) -> bool {
        !self.record_members().is_empty()
    }

    /// Every record name referenced anywhere in this schema.
    pub fn referenced_records(&self, out: &mut Vec<Arc<str>>) {
        match self {
            Schema::Record(name) => out.push(Arc::clone(name)),
            Schema::Optional(inner) => inner.referenced_records(out),
            Schema::Collection { element, .. } => element.referenced_records(out),
            Schema::Union(union) => {
                for member in &union.members {
                    member.schema.referenced_records(out);
                }
            }
            Schema::Leaf(_) => {}
        }
    }

    /// Copy of this schema with every record reference renamed by `rename`.
    pub fn map_records(&self, rename: &dyn Fn(&str) -> String) -> Schema {
        match self {
            Schema::Record(name) => Schema::Record(Arc::from(rename(name))),
            Schema::Optional(inner) => Schema::Optional(Box::new(inner.map_records(rename))),
            Schema::Collection { kind, element } => Schema::Collection {
                kind: *kind,
                element: Box::new(element.map_records(rename)),
            },
            Schema::Union(union) => Schema::Union(Arc::new(UnionSchema {
                name: union.name.clone(),
                discriminator: union.discriminator.clone(),
                members: union
                    .members
                    .iter()
                    .map(|m| UnionMember {
                        name: m.name.clone(),
                        schema: m.schema.map_records(rename),
                    })
                    .collect(),
            })),
            Schema::Leaf(leaf) => Schema::Leaf(leaf.clone()),
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schema::Record(name) => write!(f, "{}", name),
            Schema::Optional(inner) => write!(f, "optional[{}]", inner),
            Schema::Collection { kind, element } => match kind {
                CollectionKind::Sequence => write!(f, "list[{}]", element),
                CollectionKind::Set => write!(f, "set[{}]", element),
                CollectionKind::Mapping => write!(f, "map[{}]", element),
            },
            Schema::Union(union) => {
                let members: Vec<String> =
                    union.members.iter().map(|m| m.schema.to_string()).collect();
                write!(f, "{}({})", union.name, members.join(" | "))
            }
            Schema::Leaf(leaf) => match leaf {
                Leaf::Int => write!(f, "int"),
                Leaf::Float => write!(f, "float"),
                Leaf::Str => write!(f, "str"),
                Leaf::Bool => write!(f, "bool"),
                Leaf::Any => write!(f, "any"),
                Leaf::Literal(value) => write!(f, "literal {}", value),
                Leaf::Enum(e) => write!(f, "enum {}", e.name),
            },
        }
    }
}
