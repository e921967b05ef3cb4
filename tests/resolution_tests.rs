//! Integration tests for end-to-end configuration resolution.
//!
//! Each test builds a small package directory of YAML files and resolves an
//! `Experiment` through the engine:
//! - tier precedence (defaults < config file < command line < overrides)
//! - `__path` references, inline patches and `__overwrite` patches
//! - union member selection, with and without a discriminator
//! - preset enums backed by files, and circular reference detection

use layered_config::engine::{Configurable, Engine, EngineOptions, ResolveRequest};
use layered_config::error::ResolveError;
use layered_config::logging::{CollectingSink, Logger};
use layered_config::schema::{EnumSchema, RecordSchema, Schema, SchemaRegistry, UnionSchema};
use layered_config::tree::flag_keys;
use serde::Deserialize;
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, PartialEq, Deserialize)]
struct Experiment {
    seed: i64,
    model: ModelChoice,
    optimizer: Optimizer,
    tags: Vec<String>,
}

#[derive(Debug, PartialEq, Deserialize)]
struct Model {
    name: String,
    layers: i64,
}

#[derive(Debug, PartialEq, Deserialize)]
enum ModelChoice {
    Model(Model),
    ModelPreset(String),
}

#[derive(Debug, PartialEq, Deserialize)]
struct Adam {
    kind: String,
    lr_milli: i64,
}

#[derive(Debug, PartialEq, Deserialize)]
struct Sgd {
    kind: String,
    momentum_pct: i64,
}

#[derive(Debug, PartialEq, Deserialize)]
enum Optimizer {
    Adam(Adam),
    Sgd(Sgd),
}

impl Configurable for Experiment {
    const RECORD: &'static str = "Experiment";

    fn schemas() -> Vec<RecordSchema> {
        vec![
            RecordSchema::new("Experiment")
                .field_with_default("seed", Schema::INT, 0)
                .field_with_default(
                    "model",
                    Schema::union(
                        UnionSchema::new("ModelChoice")
                            .member("Model", Schema::record("Model"))
                            .member(
                                "ModelPreset",
                                Schema::enumeration(
                                    EnumSchema::new("ModelPreset", ["small", "large"])
                                        .with_reference("package://models/{}.yaml"),
                                ),
                            ),
                    ),
                    "small",
                )
                .field_with_default(
                    "optimizer",
                    Schema::union(
                        UnionSchema::new("Optimizer")
                            .member("Adam", Schema::record("Adam"))
                            .member("Sgd", Schema::record("Sgd"))
                            .discriminated_by("kind"),
                    ),
                    json!({"kind": "adam", "lr_milli": 1}),
                )
                .field_with_default("tags", Schema::sequence(Schema::STR), json!([])),
            RecordSchema::new("Model")
                .field("name", Schema::STR)
                .field_with_default("layers", Schema::INT, 2),
            RecordSchema::new("Adam")
                .field_with_default("kind", Schema::literal("adam"), "adam")
                .field_with_default("lr_milli", Schema::INT, 1),
            RecordSchema::new("Sgd")
                .field_with_default("kind", Schema::literal("sgd"), "sgd")
                .field_with_default("momentum_pct", Schema::INT, 90),
        ]
    }
}

/// Package directory with the model presets in place.
fn package() -> TempDir {
    let temp = TempDir::new().expect("Failed to create temp dir");
    write(&temp, "models/small.yaml", "name: small\nlayers: 2\n");
    write(&temp, "models/large.yaml", "name: large\nlayers: 24\n");
    temp
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create directory");
    }
    fs::write(&path, content).expect("Failed to write file");
    path
}

fn engine(package: &TempDir) -> Engine {
    Engine::new(EngineOptions {
        package_root: Some(package.path().to_path_buf()),
        ..EngineOptions::default()
    })
}

fn model(name: &str, layers: i64) -> ModelChoice {
    ModelChoice::Model(Model {
        name: name.to_string(),
        layers,
    })
}

// ============================================================================
// Tier precedence
// ============================================================================

#[test]
fn test_defaults_expand_preset() {
    let package = package();
    let experiment: Experiment = engine(&package).resolve(&ResolveRequest::new()).unwrap();

    assert_eq!(
        experiment,
        Experiment {
            seed: 0,
            model: model("small", 2),
            optimizer: Optimizer::Adam(Adam {
                kind: "adam".to_string(),
                lr_milli: 1,
            }),
            tags: vec![],
        }
    );
}

#[test]
fn test_each_tier_overrides_the_one_below() {
    let package = package();
    let config = write(&package, "config.yaml", "seed: 1\ntags: [a, b]\n");
    let engine = engine(&package);

    let from_file: Experiment = engine
        .resolve(&ResolveRequest::new().with_config_file(&config))
        .unwrap();
    assert_eq!(from_file.seed, 1);
    assert_eq!(from_file.tags, vec!["a", "b"]);

    let from_cli: Experiment = engine
        .resolve(
            &ResolveRequest::new()
                .with_config_file(&config)
                .with_arg("seed", "2"),
        )
        .unwrap();
    assert_eq!(from_cli.seed, 2);
    assert_eq!(from_cli.tags, vec!["a", "b"]);

    let from_overrides: Experiment = engine
        .resolve(
            &ResolveRequest::new()
                .with_config_file(&config)
                .with_arg("seed", "2")
                .with_overrides(json!({"seed": 3, "tags": ["c"]})),
        )
        .unwrap();
    assert_eq!(from_overrides.seed, 3);
    assert_eq!(from_overrides.tags, vec!["c"]);
}

#[test]
fn test_config_file_named_by_package_reference() {
    let package = package();
    write(&package, "configs/run.yaml", "seed: 7\n");

    let experiment: Experiment = engine(&package)
        .resolve(&ResolveRequest::new().with_arg("config_file_name", "package://configs/run.yaml"))
        .unwrap();
    assert_eq!(experiment.seed, 7);
}

// ============================================================================
// References and patches
// ============================================================================

#[test]
fn test_path_reference_on_command_line() {
    let package = package();
    let experiment: Experiment = engine(&package)
        .resolve(&ResolveRequest::new().with_arg("model__path", "package://models/large.yaml"))
        .unwrap();
    assert_eq!(experiment.model, model("large", 24));
}

#[test]
fn test_path_reference_in_config_file_fills_defaults() {
    let package = package();
    write(&package, "models/tiny.yaml", "name: tiny\n");
    let config = write(
        &package,
        "config.yaml",
        "model__path: package://models/tiny.yaml\n",
    );

    let experiment: Experiment = engine(&package)
        .resolve(&ResolveRequest::new().with_config_file(config))
        .unwrap();
    assert_eq!(experiment.model, model("tiny", 2));
}

#[test]
fn test_inline_patches_reference_and_overwrite_wins() {
    let package = package();
    let engine = engine(&package);

    let inline: Experiment = engine
        .resolve(
            &ResolveRequest::new()
                .with_arg("model__path", "package://models/large.yaml")
                .with_arg("model.layers", "12"),
        )
        .unwrap();
    assert_eq!(inline.model, model("large", 12));

    let overwritten: Experiment = engine
        .resolve(
            &ResolveRequest::new()
                .with_arg("model__path", "package://models/large.yaml")
                .with_arg("model.layers", "12")
                .with_arg("model__overwrite.layers", "48"),
        )
        .unwrap();
    assert_eq!(overwritten.model, model("large", 48));
}

#[test]
fn test_path_reference_must_be_a_string() {
    let package = package();
    let err = engine(&package)
        .resolve::<Experiment>(&ResolveRequest::new().with_overrides(json!({"model__path": null})))
        .unwrap_err();
    assert!(matches!(err, ResolveError::PathValueType { .. }));
}

#[test]
fn test_missing_referenced_file() {
    let package = package();
    let err = engine(&package)
        .resolve::<Experiment>(
            &ResolveRequest::new().with_arg("model__path", "package://models/missing.yaml"),
        )
        .unwrap_err();
    assert!(err.to_string().contains("missing.yaml"));
}

// ============================================================================
// Unions and presets
// ============================================================================

#[test]
fn test_discriminator_switches_member() {
    let package = package();
    let experiment: Experiment = engine(&package)
        .resolve(
            &ResolveRequest::new()
                .with_arg("optimizer.kind", "sgd")
                .with_arg("optimizer.momentum_pct", "80"),
        )
        .unwrap();
    assert_eq!(
        experiment.optimizer,
        Optimizer::Sgd(Sgd {
            kind: "sgd".to_string(),
            momentum_pct: 80,
        })
    );
}

#[test]
fn test_member_inferred_from_fields() {
    let package = package();
    let experiment: Experiment = engine(&package)
        .resolve(&ResolveRequest::new().with_arg("optimizer.momentum_pct", "75"))
        .unwrap();
    assert_eq!(
        experiment.optimizer,
        Optimizer::Sgd(Sgd {
            kind: "sgd".to_string(),
            momentum_pct: 75,
        })
    );
}

#[test]
fn test_same_member_keeps_default_fields() {
    let package = package();
    let experiment: Experiment = engine(&package)
        .resolve(&ResolveRequest::new().with_arg("optimizer.lr_milli", "5"))
        .unwrap();
    assert_eq!(
        experiment.optimizer,
        Optimizer::Adam(Adam {
            kind: "adam".to_string(),
            lr_milli: 5,
        })
    );
}

#[test]
fn test_conflicting_discriminator_is_rejected() {
    let package = package();
    let err = engine(&package)
        .resolve::<Experiment>(
            &ResolveRequest::new()
                .with_arg("optimizer.kind", "adam")
                .with_arg("optimizer.momentum_pct", "80"),
        )
        .unwrap_err();
    assert!(matches!(err, ResolveError::Decode(_)));
}

#[test]
fn test_preset_on_command_line() {
    let package = package();
    let experiment: Experiment = engine(&package)
        .resolve(&ResolveRequest::new().with_arg("model", "large"))
        .unwrap();
    assert_eq!(experiment.model, model("large", 24));
}

#[test]
fn test_preset_requires_package_root() {
    let err = Engine::default()
        .resolve::<Experiment>(&ResolveRequest::new())
        .unwrap_err();
    assert!(matches!(err, ResolveError::PackageRootRequired(_)));
}

#[test]
fn test_shared_field_keeps_member_from_lower_tier() {
    let package = package();
    let registry = Arc::new(SchemaRegistry::new());
    registry
        .register_all([
            RecordSchema::new("Root").field(
                "option",
                Schema::union(
                    UnionSchema::new("Option")
                        .member("OptionA", Schema::record("OptionA"))
                        .member("OptionB", Schema::record("OptionB"))
                        .discriminated_by("discriminator"),
                ),
            ),
            RecordSchema::new("OptionA")
                .field_with_default("discriminator", Schema::literal("A"), "A")
                .field("value", Schema::INT)
                .field_with_default("common", Schema::INT, 0),
            RecordSchema::new("OptionB")
                .field_with_default("discriminator", Schema::literal("B"), "B")
                .field("name", Schema::STR)
                .field_with_default("common", Schema::INT, 0),
        ])
        .unwrap();
    let config = write(
        &package,
        "config.yaml",
        "option:\n  discriminator: B\n  name: hello\n",
    );

    let resolved = engine(&package)
        .with_registry(registry)
        .resolve_plain(
            "Root",
            &ResolveRequest::new()
                .with_config_file(config)
                .with_arg("option.common", "5"),
        )
        .unwrap();
    assert_eq!(
        resolved,
        json!({"option": {"discriminator": "B", "name": "hello", "common": 5}})
    );
}

// ============================================================================
// Records inside collections
// ============================================================================

/// `Bag` holds records and presets inside a sequence and a mapping.
fn bag_engine(package: &TempDir) -> Engine {
    write(package, "inner/n.yaml", "z: 3\n");
    let registry = Arc::new(SchemaRegistry::new());
    registry.register_all(Experiment::schemas()).unwrap();
    registry
        .register_all([
            RecordSchema::new("Bag")
                .field_with_default("items", Schema::sequence(Schema::record("Item")), json!([]))
                .field_with_default("named", Schema::mapping(Schema::record("Item")), json!({}))
                .field_with_default(
                    "models",
                    Schema::sequence(Schema::union(
                        UnionSchema::new("ModelChoice")
                            .member("Model", Schema::record("Model"))
                            .member(
                                "ModelPreset",
                                Schema::enumeration(
                                    EnumSchema::new("ModelPreset", ["small", "large"])
                                        .with_reference("package://models/{}.yaml"),
                                ),
                            ),
                    )),
                    json!([]),
                ),
            RecordSchema::new("Item").field("inner", Schema::record("Inner")),
            RecordSchema::new("Inner")
                .field("z", Schema::INT)
                .field_with_default("w", Schema::INT, 7),
        ])
        .unwrap();
    engine(package).with_registry(registry)
}

#[test]
fn test_sequence_elements_resolve_references_and_patches() {
    let package = package();
    let engine = bag_engine(&package);
    let config = write(
        &package,
        "config.yaml",
        "items:\n  - inner__path: package://inner/n.yaml\n  - inner: {z: 1}\n    inner__overwrite: {z: 9}\n",
    );

    let resolved = engine
        .resolve_plain("Bag", &ResolveRequest::new().with_config_file(config))
        .unwrap();
    assert_eq!(
        resolved["items"],
        json!([{"inner": {"z": 3, "w": 7}}, {"inner": {"z": 9, "w": 7}}])
    );
}

#[test]
fn test_mapping_entries_resolve_references() {
    let package = package();
    let engine = bag_engine(&package);
    let config = write(
        &package,
        "config.yaml",
        "named:\n  first:\n    inner__path: package://inner/n.yaml\n    inner: {w: 1}\n  second:\n    inner: {z: 5}\n",
    );

    let resolved = engine
        .resolve_plain("Bag", &ResolveRequest::new().with_config_file(config))
        .unwrap();
    assert_eq!(
        resolved["named"],
        json!({
            "first": {"inner": {"z": 3, "w": 1}},
            "second": {"inner": {"z": 5, "w": 7}},
        })
    );
}

#[test]
fn test_presets_inside_sequence() {
    let package = package();
    let engine = bag_engine(&package);
    let config = write(
        &package,
        "config.yaml",
        "models:\n  - large\n  - {name: custom}\n",
    );

    let resolved = engine
        .resolve_plain("Bag", &ResolveRequest::new().with_config_file(config))
        .unwrap();
    assert_eq!(
        resolved["models"],
        json!([{"name": "large", "layers": 24}, {"name": "custom", "layers": 2}])
    );
}

#[test]
fn test_missing_reference_inside_sequence() {
    let package = package();
    let engine = bag_engine(&package);
    let config = write(
        &package,
        "config.yaml",
        "items:\n  - inner__path: package://inner/absent.yaml\n",
    );

    let err = engine
        .resolve_plain("Bag", &ResolveRequest::new().with_config_file(config))
        .unwrap_err();
    assert!(err.to_string().contains("absent.yaml"));
}

// ============================================================================
// Recursive records and cycles
// ============================================================================

fn node_registry() -> Arc<SchemaRegistry> {
    let registry = Arc::new(SchemaRegistry::new());
    registry
        .register(
            RecordSchema::new("Node")
                .field_with_default("label", Schema::STR, "")
                .field_with_default("next", Schema::optional(Schema::record("Node")), json!(null)),
        )
        .unwrap();
    registry
}

#[test]
fn test_reference_chain() {
    let package = package();
    let a = write(&package, "a.yaml", "label: a\nnext__path: package://b.yaml\n");
    write(&package, "b.yaml", "label: b\n");

    let engine = engine(&package).with_registry(node_registry());
    let value = engine.resolve_file(&a, "Node").unwrap();
    assert_eq!(
        value,
        json!({"label": "a", "next": {"label": "b", "next": null}})
    );
}

#[test]
fn test_circular_reference_is_rejected() {
    let package = package();
    let a = write(&package, "a.yaml", "label: a\nnext__path: package://b.yaml\n");
    write(&package, "b.yaml", "label: b\nnext__path: package://a.yaml\n");

    let engine = engine(&package).with_registry(node_registry());
    let err = engine.resolve_file(&a, "Node").unwrap_err();
    let ResolveError::CircularReference { chain } = &err else {
        panic!("expected a circular reference, got {:?}", err);
    };
    assert_eq!(chain.len(), 3);
    assert_eq!(chain.first(), chain.last());
}

#[test]
fn test_self_reference_is_rejected() {
    let package = package();
    let a = write(&package, "a.yaml", "next__path: package://a.yaml\n");

    let engine = engine(&package).with_registry(node_registry());
    let err = engine.resolve_file(&a, "Node").unwrap_err();
    assert!(matches!(err, ResolveError::CircularReference { .. }));
}

// ============================================================================
// Strictness, unknown keys, registry sharing, logging
// ============================================================================

#[test]
fn test_strict_requires_value_or_reference() {
    let package = package();
    let registry = Arc::new(SchemaRegistry::new());
    registry
        .register_all([
            RecordSchema::new("Job").field("model", Schema::record("Model")),
            RecordSchema::new("Model")
                .field("name", Schema::STR)
                .field_with_default("layers", Schema::INT, 2),
        ])
        .unwrap();

    let strict = Engine::new(EngineOptions {
        package_root: Some(package.path().to_path_buf()),
        strict: true,
        ..EngineOptions::default()
    })
    .with_registry(registry);

    let err = strict.resolve_plain("Job", &ResolveRequest::new()).unwrap_err();
    let ResolveError::MissingValueOrPath { field } = &err else {
        panic!("expected a missing value, got {:?}", err);
    };
    assert_eq!(field, "model");

    let resolved = strict
        .resolve_plain(
            "Job",
            &ResolveRequest::new().with_arg("model__path", "package://models/large.yaml"),
        )
        .unwrap();
    assert_eq!(resolved, json!({"model": {"name": "large", "layers": 24}}));
}

#[test]
fn test_unknown_key_in_config_file() {
    let package = package();
    let config = write(&package, "config.yaml", "seeds: 3\n");
    let err = engine(&package)
        .resolve::<Experiment>(&ResolveRequest::new().with_config_file(config))
        .unwrap_err();
    assert!(err.to_string().contains("seeds"));
}

#[test]
fn test_registry_shared_between_engines() {
    let package = package();
    let first = engine(&package);
    first.register::<Experiment>().unwrap();
    first.register::<Experiment>().unwrap();

    let registry = Arc::new(SchemaRegistry::new());
    registry.register_all(Experiment::schemas()).unwrap();
    let shadow = registry.shadow("Experiment").unwrap();
    assert_eq!(registry.shadow("Experiment").unwrap(), shadow);

    let second = engine(&package).with_registry(Arc::clone(&registry));
    let experiment: Experiment = second.resolve(&ResolveRequest::new()).unwrap();
    assert_eq!(experiment.seed, 0);
    assert_eq!(registry.shadow("Experiment").unwrap(), shadow);
}

#[test]
fn test_command_line_keys() {
    let engine = Engine::default();
    engine.register::<Experiment>().unwrap();
    let keys = flag_keys(engine.registry(), "Experiment").unwrap();

    for expected in [
        "seed",
        "model",
        "model.layers",
        "model__path",
        "optimizer.momentum_pct",
        "optimizer__path",
    ] {
        assert!(keys.iter().any(|k| k == expected), "missing {}", expected);
    }
}

#[test]
fn test_reference_loading_is_logged() {
    let package = package();
    let sink = Arc::new(CollectingSink::new());
    let engine = engine(&package).with_logger(Logger::disabled().with_sink(sink.clone()));

    let _: Experiment = engine
        .resolve(&ResolveRequest::new().with_arg("model__path", "package://models/large.yaml"))
        .unwrap();

    let records = sink.records();
    assert!(
        records
            .iter()
            .any(|r| r.message.contains("reading") && r.message.contains("large.yaml"))
    );
    assert!(records.iter().any(|r| r.depth > 0));
}
