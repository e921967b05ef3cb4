//! CLI command definitions for layered-config
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.
//! Each subcommand loads a schema document and works on its root record.

use crate::engine::{Engine, EngineOptions, ResolveRequest};
use crate::logging::Logger;
use crate::resolve::{TreeReader, YamlFileReader};
use crate::schema::SchemaDocument;
use crate::tree::flag_keys;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;

/// Layered configuration resolver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve a configuration against a schema and print it
    Resolve(ResolveArgs),

    /// List the command-line keys the root record accepts
    Keys(SchemaArgs),

    /// Print the schema of the root record
    Describe(SchemaArgs),
}

/// Schema selection shared by all subcommands
#[derive(Args, Debug, Clone)]
pub struct SchemaArgs {
    /// Schema document (YAML or JSON)
    #[arg(short, long, value_name = "FILE")]
    pub schema: PathBuf,

    /// Record to use instead of the document's root
    #[arg(short, long, value_name = "RECORD")]
    pub root: Option<String>,
}

impl SchemaArgs {
    /// Load the document and register its records with `engine`.
    fn load(&self, engine: &Engine) -> Result<String> {
        let document = SchemaDocument::load(&self.schema)
            .with_context(|| format!("failed to load schema {}", self.schema.display()))?;
        engine.registry().register_all(document.records)?;
        Ok(self.root.clone().unwrap_or(document.root))
    }
}

/// Output format for resolved configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

/// Arguments for the resolve subcommand
#[derive(Args, Debug)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub schema: SchemaArgs,

    /// Configuration file (lower precedence than --set)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Command-line value, as a dotted key and a value
    ///
    /// Repeatable: --set nested.z=5 --set nested__path=configs/a.yaml
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,

    /// YAML file of overrides (highest precedence)
    #[arg(long, value_name = "FILE")]
    pub overrides: Option<PathBuf>,

    /// Root directory for package:// references
    #[arg(long, value_name = "DIR", env = crate::engine::PACKAGE_ROOT_ENV)]
    pub package_root: Option<PathBuf>,

    /// Require a value or reference for every field without a default
    #[arg(long)]
    pub strict: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

/// Parse a `key=value` pair. The value may itself contain `=`.
pub fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{}`", s))?;
    if key.is_empty() {
        return Err(format!("empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Run a subcommand and return what it prints.
pub fn run(command: &Command) -> Result<String> {
    match command {
        Command::Resolve(args) => run_resolve(args),
        Command::Keys(args) => {
            let engine = Engine::default();
            let root = args.load(&engine)?;
            let keys = flag_keys(engine.registry(), &root)?;
            Ok(keys.join("\n"))
        }
        Command::Describe(args) => {
            let engine = Engine::default();
            let root = args.load(&engine)?;
            Ok(engine.registry().describe(&root)?)
        }
    }
}

fn run_resolve(args: &ResolveArgs) -> Result<String> {
    let options = EngineOptions {
        package_root: args.package_root.clone(),
        strict: args.strict,
        ..EngineOptions::default()
    };
    let engine = Engine::new(options).with_logger(Logger::tracing().with_name("resolve"));
    let root = args.schema.load(&engine)?;

    let mut request = ResolveRequest::new().with_args(
        args.set
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone()))),
    );
    if let Some(config) = &args.config {
        request = request.with_config_file(config);
    }
    if let Some(path) = &args.overrides {
        request = request.with_overrides(YamlFileReader.read_tree(path)?);
    }

    let resolved = engine.resolve_plain(&root, &request)?;
    let output = match args.format {
        OutputFormat::Yaml => serde_yaml::to_string(&resolved)?,
        OutputFormat::Json => serde_json::to_string_pretty(&resolved)?,
    };
    Ok(output)
}
