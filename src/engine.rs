//! Resolution engine with tier-based merging.
//!
//! Combines the sources of one configuration, lowest precedence first:
//! 1. **Defaults** - declared defaults of the root record's fields
//! 2. **Config file** - a YAML file, given by the caller or named on the
//!    command line under [`EngineOptions::config_file_key`]
//! 3. **Command line** - flattened `dotted.key = value` pairs
//! 4. **Overrides** - an in-memory tree supplied by the caller
//!
//! Each source is resolved on its own (file references, presets and overwrites
//! expanded), then the trees are merged along the schema and bound to it.
//!
//! ## Environment Variables
//! - `LAYERED_CONFIG_PACKAGE_ROOT` - Root for `package://` references

use crate::decode::{Bound, Decoder};
use crate::error::{ResolveError, ResolveResult, describe_value};
use crate::logging::Logger;
use crate::resolve::{Resolver, TreeReader, YamlFileReader, declared_defaults, resolve_package_path};
use crate::schema::{RecordSchema, Schema, SchemaRegistry};
use crate::tree::{merge_with_schema, unflatten};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment variable naming the package root.
pub const PACKAGE_ROOT_ENV: &str = "LAYERED_CONFIG_PACKAGE_ROOT";

/// A Rust type that can be resolved by the engine.
///
/// `schemas` returns the root record (named [`RECORD`](Self::RECORD)) and every
/// record it refers to. The resolved tree is bound with serde: union values are
/// externally tagged by member name, so a union field maps to a Rust enum whose
/// variant names are the member names.
pub trait Configurable: DeserializeOwned {
    const RECORD: &'static str;

    fn schemas() -> Vec<RecordSchema>;
}

/// Source tier, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Defaults = 0,
    ConfigFile = 1,
    CommandLine = 2,
    Overrides = 3,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Defaults => write!(f, "defaults"),
            Tier::ConfigFile => write!(f, "config file"),
            Tier::CommandLine => write!(f, "command line"),
            Tier::Overrides => write!(f, "overrides"),
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Root for `package://` references.
    pub package_root: Option<PathBuf>,
    /// Reject record fields that have neither a value nor a reference.
    pub strict: bool,
    /// Command-line key naming the config file, unless the root record has a
    /// field of that name.
    pub config_file_key: Option<String>,
    /// Accept strings for int, float and bool values on the command line.
    pub coerce_cli_strings: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            package_root: None,
            strict: false,
            config_file_key: Some("config_file_name".to_string()),
            coerce_cli_strings: true,
        }
    }
}

impl EngineOptions {
    /// Defaults, with the package root taken from the environment.
    pub fn from_env() -> Self {
        Self {
            package_root: std::env::var(PACKAGE_ROOT_ENV).ok().map(PathBuf::from),
            ..Self::default()
        }
    }
}

/// Inputs of one resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    /// Flattened command-line values, keyed by dot-separated path.
    pub command_line: Vec<(String, Value)>,
    /// Configuration file, taking precedence over a file named on the command line.
    pub config_file: Option<PathBuf>,
    /// Highest-precedence values, shaped like the target record.
    pub overrides: Option<Value>,
}

impl ResolveRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.command_line.push((key.into(), value.into()));
        self
    }

    pub fn with_args<K, V>(mut self, args: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.command_line
            .extend(args.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn with_overrides(mut self, overrides: Value) -> Self {
        self.overrides = Some(overrides);
        self
    }
}

/// Resolution engine. Owns the schema registry and thereby the shadow cache.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<SchemaRegistry>,
    options: EngineOptions,
    logger: Logger,
    reader: Arc<dyn TreeReader>,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            registry: Arc::new(SchemaRegistry::new()),
            options,
            logger: Logger::disabled(),
            reader: Arc::new(YamlFileReader),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Read referenced files through `reader` instead of the filesystem.
    pub fn with_reader(mut self, reader: Arc<dyn TreeReader>) -> Self {
        self.reader = reader;
        self
    }

    /// Share a registry (and its derived shadows) with other engines.
    pub fn with_registry(mut self, registry: Arc<SchemaRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Register the schemas of `T`, once.
    pub fn register<T: Configurable>(&self) -> ResolveResult<()> {
        if !self.registry.contains(T::RECORD) {
            self.registry.register_all(T::schemas())?;
        }
        Ok(())
    }

    /// Resolve and bind a `T`.
    pub fn resolve<T: Configurable>(&self, request: &ResolveRequest) -> ResolveResult<T> {
        self.register::<T>()?;
        let tagged = self.resolve_value(T::RECORD, request)?;
        Ok(serde_json::from_value(tagged)?)
    }

    /// Resolve the record registered as `root`. Union values are tagged with
    /// their member name.
    pub fn resolve_value(&self, root: &str, request: &ResolveRequest) -> ResolveResult<Value> {
        Ok(self.run(root, request)?.to_tagged())
    }

    /// Resolve the record registered as `root`, as a plain tree.
    pub fn resolve_plain(&self, root: &str, request: &ResolveRequest) -> ResolveResult<Value> {
        Ok(self.run(root, request)?.to_plain())
    }

    /// Resolve a single file against `root`, as a referenced file would be.
    pub fn resolve_file(&self, path: &Path, root: &str) -> ResolveResult<Value> {
        let partial = self.resolver().strict(self.options.strict).resolve_file(path, root)?;
        let bound = self.decoder().decode(&Schema::record(root), &partial.prune_or_empty())?;
        Ok(bound.to_plain())
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.registry, self.reader.as_ref(), &self.logger)
            .package_root(self.options.package_root.as_deref())
    }

    fn decoder(&self) -> Decoder<'_> {
        Decoder::new(&self.registry, &self.logger)
    }

    fn run(&self, root: &str, request: &ResolveRequest) -> ResolveResult<Bound> {
        let record = self.registry.get(root)?;
        let resolver = self.resolver();

        let mut command_line = unflatten(request.command_line.iter().cloned());
        let mut overrides = request
            .overrides
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new()));

        let mut config_file = request.config_file.clone();
        if let Some(key) = self.config_file_key(&record) {
            // Overrides come last so they win.
            for tree in [&mut command_line, &mut overrides] {
                let Some(value) = tree.as_object_mut().and_then(|map| map.remove(key)) else {
                    continue;
                };
                let Value::String(named) = value else {
                    return Err(ResolveError::ConfigFileKey {
                        key: key.to_string(),
                        found: describe_value(&value),
                    });
                };
                if request.config_file.is_none() {
                    config_file = Some(resolve_package_path(
                        &named,
                        self.options.package_root.as_deref(),
                    )?);
                }
            }
        }

        let command_line = resolver
            .clone()
            .coerce_strings(self.options.coerce_cli_strings)
            .resolve_tree(&command_line, root)?
            .prune_or_empty();
        self.log_tier(Tier::CommandLine, &command_line);

        let overrides = resolver.resolve_tree(&overrides, root)?.prune_or_empty();
        self.log_tier(Tier::Overrides, &overrides);

        let defaults = declared_defaults(&record);
        self.log_tier(Tier::Defaults, &defaults);

        let file = match &config_file {
            Some(path) => {
                self.logger
                    .info(0, &format!("using config file {}", path.display()));
                resolver.resolve_file(path, root)?.prune_or_empty()
            }
            None => Value::Object(Map::new()),
        };
        self.log_tier(Tier::ConfigFile, &file);

        let schema = Schema::record(root);
        let merged = [file, command_line, overrides]
            .into_iter()
            .fold(defaults, |base, overlay| {
                merge_with_schema(&self.registry, &schema, base, overlay)
            });
        self.logger.debug(0, &format!("merged: {}", merged));

        let first = resolver
            .clone()
            .strict(self.options.strict)
            .resolve_tree(&merged, root)?
            .prune_or_empty();
        let bound = self.decoder().decode(&schema, &first)?;

        // Nested defaults filled in by the first bind may still name presets.
        let second = resolver
            .resolve_tree(&bound.to_plain(), root)?
            .prune_or_empty();
        let bound = self.decoder().decode(&schema, &second)?;
        self.logger
            .debug(0, &format!("resolved: {}", bound.to_plain()));
        Ok(bound)
    }

    fn config_file_key<'k>(&'k self, record: &RecordSchema) -> Option<&'k str> {
        let key = self.options.config_file_key.as_deref()?;
        if record.get(key).is_some() {
            return None;
        }
        Some(key)
    }

    fn log_tier(&self, tier: Tier, value: &Value) {
        self.logger.debug(0, &format!("{}: {}", tier, value));
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .field("logger", &self.logger)
            .finish()
    }
}
