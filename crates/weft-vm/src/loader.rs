//! Module loader
//!
//! Resolves dotted module names against the configured roots, compiling
//! sources through an external [`Compiler`] and reusing cache images where
//! they are still fresh. Every load is memoized by name.

use crate::builtins::registry::NativeFn;
use crate::cache::{self, CachedModule, SourceDigest};
use crate::config::RuntimeConfig;
use crate::error::LoadError;
use crate::module::{Module, ModuleOrigin};
use crate::runtime::RuntimeCore;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use weft_types::sync::Mutex;
use weft_types::ModuleArtifact;

/// Extension of module source files.
pub const SOURCE_EXTENSION: &str = "weft";
/// Extension of cache images.
pub const CACHE_EXTENSION: &str = "weftc";

/// Turns module source into an artifact. Implemented outside the runtime.
pub trait Compiler: Send + Sync {
    fn compile(&self, name: &str, source: &str) -> anyhow::Result<ModuleArtifact>;
}

/// Compiler for hosts that only run cache images and installed artifacts.
#[derive(Debug, Default)]
pub struct NoCompiler;

impl Compiler for NoCompiler {
    fn compile(&self, name: &str, _source: &str) -> anyhow::Result<ModuleArtifact> {
        anyhow::bail!("no compiler available to build module '{}'", name)
    }
}

/// A module implemented by host functions.
#[derive(Clone)]
pub struct NativeModule {
    pub name: String,
    pub functions: Vec<(String, NativeFn)>,
}

impl NativeModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            functions: Vec::new(),
        }
    }

    pub fn function(mut self, name: &str, func: NativeFn) -> Self {
        self.functions.push((name.to_string(), func));
        self
    }
}

pub struct ModuleLoader {
    core: Arc<RuntimeCore>,
    compiler: Arc<dyn Compiler>,
    roots: Vec<PathBuf>,
    persist_bytecode: bool,
    prefer_cached: bool,
    memo: Mutex<HashMap<String, Arc<Module>>>,
    natives: Mutex<HashMap<String, NativeModule>>,
}

impl ModuleLoader {
    pub fn new(
        core: Arc<RuntimeCore>,
        compiler: Arc<dyn Compiler>,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            core,
            compiler,
            roots: config.module_roots(),
            persist_bytecode: config.persist_bytecode,
            prefer_cached: config.prefer_cached_bytecode,
            memo: Mutex::new(HashMap::new()),
            natives: Mutex::new(HashMap::new()),
        }
    }

    /// Roots in lookup order.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Make a native module loadable by name. Its functions join the native
    /// registry now; the module itself is materialized on first load.
    pub fn register_native_module(&self, module: NativeModule) {
        for (name, func) in &module.functions {
            self.core.natives.register(&qualified(&module.name, name), *func);
        }
        self.natives.lock().insert(module.name.clone(), module);
    }

    /// Load `name`, returning the memoized module on repeat calls.
    pub fn load(&self, name: &str) -> Result<Arc<Module>, LoadError> {
        // Held across the whole load so concurrent loads of one name agree
        let mut memo = self.memo.lock();
        if let Some(module) = memo.get(name) {
            return Ok(Arc::clone(module));
        }

        let native = self.natives.lock().get(name).cloned();
        let module = match native {
            Some(native) => self.materialize_native(&native)?,
            None => {
                let (artifact, origin) = self.locate(name)?;
                self.materialize(name, &artifact, origin)?
            }
        };

        debug!(module = name, id = %module.id(), origin = ?module.origin(), "module loaded");
        memo.insert(name.to_string(), Arc::clone(&module));
        Ok(module)
    }

    /// Register an artifact assembled by the host under `name`, replacing any
    /// module previously loaded under it.
    pub fn install(
        &self,
        name: &str,
        artifact: &ModuleArtifact,
    ) -> Result<Arc<Module>, LoadError> {
        let mut memo = self.memo.lock();
        let module = self.materialize(name, artifact, ModuleOrigin::Host)?;
        debug!(module = name, id = %module.id(), "module installed");
        memo.insert(name.to_string(), Arc::clone(&module));
        Ok(module)
    }

    /// The module loaded under `name`, if any.
    pub fn loaded(&self, name: &str) -> Option<Arc<Module>> {
        self.memo.lock().get(name).cloned()
    }

    fn materialize(
        &self,
        name: &str,
        artifact: &ModuleArtifact,
        origin: ModuleOrigin,
    ) -> Result<Arc<Module>, LoadError> {
        let _world = self.core.world.read();
        self.core
            .modules
            .insert(|id| Module::from_artifact(id, name, artifact, origin, &self.core.heap))
            .map_err(|source| LoadError::Materialize {
                name: name.to_string(),
                source,
            })
    }

    fn materialize_native(&self, native: &NativeModule) -> Result<Arc<Module>, LoadError> {
        let functions: Vec<_> = native
            .functions
            .iter()
            .map(|(name, func)| {
                let id = self.core.natives.register(&qualified(&native.name, name), *func);
                (name.clone(), id)
            })
            .collect();

        let _world = self.core.world.read();
        self.core
            .modules
            .insert(|id| Module::native(id, &native.name, &functions, &self.core.heap))
            .map_err(|source| LoadError::Materialize {
                name: native.name.clone(),
                source,
            })
    }

    /// Search the roots in order. The first root holding either a source or
    /// a cache image for `name` decides the result.
    fn locate(&self, name: &str) -> Result<(ModuleArtifact, ModuleOrigin), LoadError> {
        let relative = module_path(name).ok_or_else(|| LoadError::NotFound {
            name: name.to_string(),
            searched: Vec::new(),
        })?;

        for root in &self.roots {
            let base = root.join(&relative);
            let source = base.with_extension(SOURCE_EXTENSION);
            let image = base.with_extension(CACHE_EXTENSION);

            match (source.is_file(), image.is_file()) {
                (false, false) => continue,
                (false, true) => {
                    let cached = read_image(&image)?;
                    return Ok((cached.artifact, ModuleOrigin::Cache(image)));
                }
                (true, has_image) => {
                    let text = read_source(&source)?;
                    let digest = cache::source_digest(&text);
                    if has_image && self.prefer_cached {
                        if let Some(artifact) = fresh_image(&image, &digest)? {
                            return Ok((artifact, ModuleOrigin::Cache(image)));
                        }
                    }
                    let artifact = self.compile(name, &text, &digest, &image)?;
                    return Ok((artifact, ModuleOrigin::Source(source)));
                }
            }
        }

        Err(LoadError::NotFound {
            name: name.to_string(),
            searched: self.roots.clone(),
        })
    }

    fn compile(
        &self,
        name: &str,
        text: &str,
        digest: &SourceDigest,
        image: &Path,
    ) -> Result<ModuleArtifact, LoadError> {
        let artifact = self
            .compiler
            .compile(name, text)
            .map_err(|source| LoadError::Compile {
                name: name.to_string(),
                source,
            })?;

        if self.persist_bytecode {
            let written = cache::encode(&artifact, Some(*digest))
                .and_then(|bytes| fs::write(image, bytes).map_err(Into::into));
            if let Err(err) = written {
                warn!(module = name, path = ?image, error = %err, "failed to write cache image");
            }
        }
        Ok(artifact)
    }
}

fn qualified(module: &str, function: &str) -> String {
    format!("{}.{}", module, function)
}

/// `a.b.c` as the relative path `a/b/c`. Empty segments are rejected.
fn module_path(name: &str) -> Option<PathBuf> {
    let mut path = PathBuf::new();
    for segment in name.split('.') {
        if segment.is_empty() || segment.contains(['/', '\\']) {
            return None;
        }
        path.push(segment);
    }
    Some(path)
}

fn read_source(path: &Path) -> Result<String, LoadError> {
    fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_image(path: &Path) -> Result<CachedModule, LoadError> {
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    cache::decode(&bytes).map_err(|source| LoadError::Cache {
        path: path.to_path_buf(),
        source,
    })
}

/// The image's artifact if it was compiled from source with `digest`, or
/// `None` if the source has changed since. A malformed or version-mismatched
/// image is an error even though the source could be recompiled.
fn fresh_image(path: &Path, digest: &SourceDigest) -> Result<Option<ModuleArtifact>, LoadError> {
    let cached = read_image(path)?;
    if cached.source_digest.as_ref() == Some(digest) {
        Ok(Some(cached.artifact))
    } else {
        warn!(path = ?path, "stale cache image, recompiling");
        Ok(None)
    }
}
