//! Runtime modules.
//!
//! A [`Module`] is a materialized [`ModuleArtifact`]: its constant pool lives
//! on the heap, its globals are mutable slots, and its body is a callable the
//! host runs explicitly.

use crate::error::VmError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use weft_types::sync::RwLock;
use weft_types::{
    Callable, CodeBuilder, Constant, Heap, HeapRef, ModuleArtifact, ModuleId, NativeId, OpCode,
    RootSource,
};

/// Where a module's code came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOrigin {
    Source(PathBuf),
    Cache(PathBuf),
    Native,
    Host,
}

#[derive(Debug)]
pub struct Module {
    id: ModuleId,
    name: String,
    constants: Vec<HeapRef>,
    pool: Vec<Constant>,
    callable: HeapRef,
    globals: RwLock<Vec<HeapRef>>,
    global_names: Vec<String>,
    exports: Vec<String>,
    loaded: AtomicBool,
    origin: ModuleOrigin,
}

impl Module {
    /// Materialize `artifact` into `heap`.
    pub fn from_artifact(
        id: ModuleId,
        name: &str,
        artifact: &ModuleArtifact,
        origin: ModuleOrigin,
        heap: &Heap,
    ) -> Result<Self, VmError> {
        let constants = artifact
            .constants
            .iter()
            .map(|c| materialize(c, heap))
            .collect::<Result<Vec<_>, _>>()?;
        let body = heap.allocate_code(Arc::new(artifact.body()))?;
        let callable = heap.allocate_callable(Callable::code(body, id, Vec::new()))?;

        Ok(Self {
            id,
            name: name.to_string(),
            constants,
            pool: artifact.constants.clone(),
            callable,
            globals: RwLock::new(vec![HeapRef::NULL; artifact.globals.len()]),
            global_names: artifact.globals.clone(),
            exports: artifact.exports.clone(),
            loaded: AtomicBool::new(false),
            origin,
        })
    }

    /// A module whose globals are native callables bound to null, all
    /// exported.
    pub fn native(
        id: ModuleId,
        name: &str,
        functions: &[(String, NativeId)],
        heap: &Heap,
    ) -> Result<Self, VmError> {
        let globals = functions
            .iter()
            .map(|(_, native)| heap.allocate_callable(Callable::native(*native)))
            .collect::<Result<Vec<_>, _>>()?;
        let names: Vec<String> = functions.iter().map(|(n, _)| n.clone()).collect();

        let mut body = CodeBuilder::new(name);
        body.emit(OpCode::LoadNull);
        body.emit(OpCode::Return);
        let body = body
            .build()
            .map_err(|e| VmError::unsupported(e.to_string()))?;
        let body = heap.allocate_code(Arc::new(body))?;
        let callable = heap.allocate_callable(Callable::code(body, id, Vec::new()))?;

        Ok(Self {
            id,
            name: name.to_string(),
            constants: Vec::new(),
            pool: Vec::new(),
            callable,
            globals: RwLock::new(globals),
            global_names: names.clone(),
            exports: names,
            loaded: AtomicBool::new(true),
            origin: ModuleOrigin::Native,
        })
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &ModuleOrigin {
        &self.origin
    }

    /// The module-level callable.
    pub fn callable(&self) -> HeapRef {
        self.callable
    }

    pub fn constant(&self, index: i64) -> Result<HeapRef, VmError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.constants.get(i))
            .copied()
            .ok_or_else(|| bad_constant(index))
    }

    /// The compile-time form of constant `index`.
    pub fn constant_entry(&self, index: i64) -> Result<&Constant, VmError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.pool.get(i))
            .ok_or_else(|| bad_constant(index))
    }

    /// String constant used as an attribute name.
    pub fn name_at(&self, index: i64) -> Result<&str, VmError> {
        self.constant_entry(index)?
            .as_str()
            .ok_or_else(|| VmError::InvalidOperand {
                opcode: "constant".to_string(),
                detail: format!("constant {} is not a string", index),
            })
    }

    pub fn global(&self, index: i64) -> Result<HeapRef, VmError> {
        let globals = self.globals.read();
        usize::try_from(index)
            .ok()
            .and_then(|i| globals.get(i))
            .copied()
            .ok_or_else(|| bad_global(index))
    }

    pub fn set_global(&self, index: i64, value: HeapRef) -> Result<(), VmError> {
        let mut globals = self.globals.write();
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| globals.get_mut(i))
            .ok_or_else(|| bad_global(index))?;
        *slot = value;
        Ok(())
    }

    pub fn global_by_name(&self, name: &str) -> Option<HeapRef> {
        let index = self.global_names.iter().position(|g| g == name)?;
        self.globals.read().get(index).copied()
    }

    pub fn global_names(&self) -> &[String] {
        &self.global_names
    }

    /// The current value of an exported global.
    pub fn export(&self, name: &str) -> Option<HeapRef> {
        if !self.exports.iter().any(|e| e == name) {
            return None;
        }
        self.global_by_name(name)
    }

    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Record that the module body has run.
    pub fn mark_loaded(&self) {
        self.loaded.store(true, Ordering::Release);
    }
}

impl RootSource for Module {
    fn roots(&self, out: &mut Vec<HeapRef>) {
        out.push(self.callable);
        out.extend(self.constants.iter().copied());
        out.extend(self.globals.read().iter().copied());
    }
}

fn materialize(constant: &Constant, heap: &Heap) -> Result<HeapRef, VmError> {
    Ok(match constant {
        Constant::Null => heap.null(),
        Constant::Str(s) => heap.allocate_str(s)?,
        Constant::Int(i) => heap.allocate_int(*i)?,
        Constant::Float(f) => heap.allocate_float(*f)?,
        Constant::Bool(b) => heap.boolean(*b),
        Constant::Code(code) => heap.allocate_code(Arc::clone(code))?,
        Constant::RecordTemplate(template) => {
            let obj = heap.allocate_object()?;
            let name = heap.allocate_str(&template.name)?;
            let fields = template
                .fields
                .iter()
                .map(|f| heap.allocate_str(f))
                .collect::<Result<Vec<_>, _>>()?;
            let fields = heap.allocate_array(fields)?;
            heap.define_const(obj, "name", name)?;
            heap.define_const(obj, "fields", fields)?;
            heap.seal(obj)?;
            obj
        }
        Constant::Handler(handler) => {
            let obj = heap.allocate_object()?;
            for (field, value) in [
                ("start", handler.start),
                ("end", handler.end),
                ("target", handler.target),
            ] {
                let value = heap.allocate_int(i64::from(value))?;
                heap.define_const(obj, field, value)?;
            }
            heap.seal(obj)?;
            obj
        }
    })
}

fn bad_constant(index: i64) -> VmError {
    VmError::InvalidOperand {
        opcode: "constant".to_string(),
        detail: format!("no constant at index {}", index),
    }
}

fn bad_global(index: i64) -> VmError {
    VmError::InvalidOperand {
        opcode: "global".to_string(),
        detail: format!("no global at index {}", index),
    }
}

/// Every materialized module, indexed by [`ModuleId`].
#[derive(Default)]
pub struct ModuleTable {
    modules: RwLock<Vec<Arc<Module>>>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a module with the next free id and register it.
    pub fn insert<E>(
        &self,
        build: impl FnOnce(ModuleId) -> Result<Module, E>,
    ) -> Result<Arc<Module>, E> {
        let mut modules = self.modules.write();
        let module = Arc::new(build(ModuleId(modules.len() as u32))?);
        modules.push(Arc::clone(&module));
        Ok(module)
    }

    pub fn get(&self, id: ModuleId) -> Option<Arc<Module>> {
        self.modules.read().get(id.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RootSource for ModuleTable {
    fn roots(&self, out: &mut Vec<HeapRef>) {
        for module in self.modules.read().iter() {
            module.roots(out);
        }
    }
}
