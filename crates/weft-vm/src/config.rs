//! Runtime configuration.
//!
//! Every field has a default, so a JSON file only needs the keys it changes.
//! Environment variables override file values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// User module roots, searched after `stdlib_paths`
    pub search_paths: Vec<PathBuf>,
    pub stdlib_paths: Vec<PathBuf>,
    /// Worker threads in the pool
    pub workers: usize,
    /// Frame advances per burst when fibers are fewer than workers
    pub burst: usize,
    /// Maximum number of live non-canonical heap objects
    pub heap_capacity: usize,
    /// Allocations between automatic collections; 0 disables them
    pub gc_threshold: usize,
    /// Write a cache image after compiling a module from source
    pub persist_bytecode: bool,
    /// Use a fresh cache image instead of recompiling the source
    pub prefer_cached_bytecode: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            search_paths: vec![PathBuf::from(".")],
            stdlib_paths: Vec::new(),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            burst: 64,
            heap_capacity: weft_types::heap::DEFAULT_CAPACITY,
            gc_threshold: 64 * 1024,
            persist_bytecode: true,
            prefer_cached_bytecode: true,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `WEFT_WORKERS`, `WEFT_BURST`, `WEFT_HEAP_CAPACITY` and
    /// `WEFT_PATH` (platform path list, prepended to `search_paths`).
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        fn number(var: &'static str, value: String) -> Result<usize, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Env { var, value })
        }

        if let Some(v) = lookup("WEFT_WORKERS") {
            self.workers = number("WEFT_WORKERS", v)?.max(1);
        }
        if let Some(v) = lookup("WEFT_BURST") {
            self.burst = number("WEFT_BURST", v)?.max(1);
        }
        if let Some(v) = lookup("WEFT_HEAP_CAPACITY") {
            self.heap_capacity = number("WEFT_HEAP_CAPACITY", v)?;
        }
        if let Some(v) = lookup("WEFT_PATH") {
            let mut paths: Vec<PathBuf> = std::env::split_paths(&v).collect();
            paths.append(&mut self.search_paths);
            self.search_paths = paths;
        }
        Ok(self)
    }

    /// Module roots in lookup order.
    pub fn module_roots(&self) -> Vec<PathBuf> {
        self.stdlib_paths
            .iter()
            .chain(self.search_paths.iter())
            .cloned()
            .collect()
    }
}
