//! Runtime façade
//!
//! [`RuntimeCore`] is the state every fiber shares: the heap, the module
//! table and the native registry. [`Runtime`] wires it to a loader and a
//! scheduler built from one [`RuntimeConfig`].
//!
//! Values the host allocates are not reachable from any fiber, so they come
//! back as [`Rooted`] handles that keep them alive until dropped. A spawn
//! takes over its arguments atomically with respect to collection; callers
//! only need to hold the handles until the spawn returns.

use crate::builtins;
use crate::builtins::registry::NativeRegistry;
use crate::config::RuntimeConfig;
use crate::error::{LoadError, VmError};
use crate::loader::{Compiler, ModuleLoader, NoCompiler};
use crate::module::{Module, ModuleTable};
use crate::scheduler::{FiberHandle, Scheduler};
use crate::vm::{ExecEnv, Spawner};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::debug;
use weft_types::sync::RwLock;
use weft_types::{
    ArgVector, Heap, HeapError, HeapRef, MarkSweep, ModuleArtifact, NativeId, SweepStats,
};

/// A heap value pinned on behalf of the host. Collections treat it as a root
/// until every clone is dropped.
pub struct Rooted {
    heap: Arc<Heap>,
    value: HeapRef,
}

impl Rooted {
    pub fn get(&self) -> HeapRef {
        self.value
    }
}

impl Clone for Rooted {
    fn clone(&self) -> Self {
        self.heap.pin(self.value);
        Self {
            heap: Arc::clone(&self.heap),
            value: self.value,
        }
    }
}

impl Drop for Rooted {
    fn drop(&mut self) {
        self.heap.unpin(self.value);
    }
}

impl std::fmt::Debug for Rooted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Rooted").field(&self.value).finish()
    }
}

/// Shared runtime state.
pub struct RuntimeCore {
    pub heap: Arc<Heap>,
    pub modules: ModuleTable,
    pub natives: NativeRegistry,
    /// Read while mutating the heap graph, written while collecting
    pub(crate) world: RwLock<()>,
}

impl RuntimeCore {
    pub fn new(heap: Heap) -> Self {
        Self {
            heap: Arc::new(heap),
            modules: ModuleTable::new(),
            natives: NativeRegistry::new(),
            world: RwLock::new(()),
        }
    }

    pub fn env<'a>(&'a self, spawner: &'a dyn Spawner, interrupt: &'a AtomicBool) -> ExecEnv<'a> {
        ExecEnv {
            heap: &self.heap,
            modules: &self.modules,
            natives: &self.natives,
            spawner,
            interrupt,
        }
    }
}

pub struct Runtime {
    config: RuntimeConfig,
    core: Arc<RuntimeCore>,
    loader: ModuleLoader,
    scheduler: Scheduler,
}

impl Runtime {
    /// A runtime that can only load cache images, native modules and
    /// installed artifacts.
    pub fn new(config: RuntimeConfig) -> Result<Self, VmError> {
        Self::with_compiler(config, Arc::new(NoCompiler))
    }

    pub fn with_compiler(
        config: RuntimeConfig,
        compiler: Arc<dyn Compiler>,
    ) -> Result<Self, VmError> {
        let heap = Heap::new(config.heap_capacity).with_gc_threshold(config.gc_threshold);
        let core = Arc::new(RuntimeCore::new(heap));
        let loader = ModuleLoader::new(Arc::clone(&core), compiler, &config);
        builtins::install(&loader);
        let scheduler = Scheduler::new(
            Arc::clone(&core),
            Arc::new(MarkSweep::new()),
            config.workers,
            config.burst,
        )?;
        debug!(roots = ?loader.roots(), "runtime ready");

        Ok(Self {
            config,
            core,
            loader,
            scheduler,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.core.heap
    }

    pub fn core(&self) -> &Arc<RuntimeCore> {
        &self.core
    }

    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn load(&self, name: &str) -> Result<Arc<Module>, LoadError> {
        self.loader.load(name)
    }

    pub fn install_artifact(
        &self,
        name: &str,
        artifact: &ModuleArtifact,
    ) -> Result<Arc<Module>, LoadError> {
        self.loader.install(name, artifact)
    }

    /// Allocate a value for the host. `build` runs while no collection can
    /// start, and the result is pinned before one can.
    pub fn allocate(
        &self,
        build: impl FnOnce(&Heap) -> Result<HeapRef, HeapError>,
    ) -> Result<Rooted, VmError> {
        let _world = self.core.world.read();
        let value = build(&self.core.heap)?;
        Ok(self.pinned(value))
    }

    /// Keep a value the host already holds alive, such as a fiber's result
    /// that must outlive its handle.
    pub fn root(&self, value: HeapRef) -> Rooted {
        let _world = self.core.world.read();
        self.pinned(value)
    }

    fn pinned(&self, value: HeapRef) -> Rooted {
        self.core.heap.pin(value);
        Rooted {
            heap: Arc::clone(&self.core.heap),
            value,
        }
    }

    /// Queue the module body on a fiber. Bodies never run on load; the
    /// module counts as loaded once its body returns.
    pub fn run_module(&self, module: &Arc<Module>) -> Result<FiberHandle, VmError> {
        let handle = self.scheduler.spawn(module.callable(), ArgVector::default())?;
        let body_of = Arc::clone(module);
        handle.completion().on_resolve(Box::new(move |result| {
            if result.is_ok() {
                body_of.mark_loaded();
            }
        }));
        Ok(handle)
    }

    /// Queue a call to the exported global `name` of `module`. The values in
    /// `args` must stay reachable until this returns, for instance through
    /// [`Rooted`] handles; from then on the fiber owns them.
    pub fn call_export(
        &self,
        module: &Module,
        name: &str,
        args: ArgVector,
    ) -> Result<FiberHandle, VmError> {
        let callable = module.export(name).ok_or_else(|| HeapError::MissingAttribute {
            name: name.to_string(),
        })?;
        self.spin_fiber(callable, args)
    }

    pub fn spin_fiber(&self, callable: HeapRef, args: ArgVector) -> Result<FiberHandle, VmError> {
        self.scheduler.spawn(callable, args)
    }

    /// Run `callable` on its own OS thread instead of the worker pool.
    pub fn spin_dedicated(&self, callable: HeapRef, args: ArgVector) -> Result<FiberHandle, VmError> {
        self.scheduler.spawn_dedicated(callable, args)
    }

    pub fn run_to_completion(&self) {
        self.scheduler.run_to_completion();
    }

    pub fn collect_garbage(&self) -> SweepStats {
        self.scheduler.collect_garbage()
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// Id of a registered native, by qualified name such as `core.print`.
    pub fn native(&self, name: &str) -> Result<NativeId, VmError> {
        self.core
            .natives
            .id_of(name)
            .ok_or_else(|| VmError::UnknownNative(name.to_string()))
    }
}
