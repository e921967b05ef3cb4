//! External reference loading.
//!
//! A reference is a path string. Paths starting with [`PACKAGE_SCHEME`] are
//! resolved against the package root; any other path is used as given.

use crate::error::{ResolveError, ResolveResult};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Prefix of package-relative references.
pub const PACKAGE_SCHEME: &str = "package://";

/// Rewrite a reference into a filesystem path.
pub fn resolve_package_path(reference: &str, package_root: Option<&Path>) -> ResolveResult<PathBuf> {
    match reference.strip_prefix(PACKAGE_SCHEME) {
        Some(rest) => {
            let root = package_root
                .ok_or_else(|| ResolveError::PackageRootRequired(reference.to_string()))?;
            Ok(root.join(rest))
        }
        None => Ok(PathBuf::from(reference)),
    }
}

/// Source of value trees for referenced files.
pub trait TreeReader: Send + Sync {
    /// Read `path` as a value tree whose top level is a mapping.
    fn read_tree(&self, path: &Path) -> ResolveResult<Value>;
}

/// Reads YAML (and therefore JSON) files from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlFileReader;

impl TreeReader for YamlFileReader {
    fn read_tree(&self, path: &Path) -> ResolveResult<Value> {
        let content = std::fs::read_to_string(path).map_err(|source| ResolveError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_yaml::from_str(&content).map_err(|source| ResolveError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        match value {
            Value::Object(_) => Ok(value),
            // Empty document
            Value::Null => Ok(Value::Object(Map::new())),
            _ => Err(ResolveError::NotAMapping(path.to_path_buf())),
        }
    }
}

/// In-memory files, keyed by path.
#[derive(Debug, Default, Clone)]
pub struct MemoryReader {
    files: HashMap<PathBuf, Value>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, tree: Value) -> Self {
        self.files.insert(path.into(), tree);
        self
    }
}

impl TreeReader for MemoryReader {
    fn read_tree(&self, path: &Path) -> ResolveResult<Value> {
        match self.files.get(path) {
            Some(Value::Object(map)) => Ok(Value::Object(map.clone())),
            Some(_) => Err(ResolveError::NotAMapping(path.to_path_buf())),
            None => Err(ResolveError::FileRead {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            }),
        }
    }
}

/// Identity of a file for cycle detection.
pub(crate) fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
