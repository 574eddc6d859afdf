//! Native function registry
//!
//! Natives are plain function pointers addressed by [`NativeId`]. Ids are
//! stable for the lifetime of the registry, so callables created on the heap
//! keep referring to the same function.

use crate::error::VmError;
use crate::vm::Spawner;
use std::collections::HashMap;
use weft_types::sync::RwLock;
use weft_types::{ArgVector, Completion, Heap, HeapRef, NativeId};

/// What a native hands back to its frame.
#[derive(Debug, Clone)]
pub enum NativeReturn {
    Ready(HeapRef),
    /// Park the frame until the completion resolves
    Pending(Completion),
}

/// Execution context passed to natives.
pub struct NativeContext<'a> {
    pub fiber: u64,
    pub heap: &'a Heap,
    spawner: &'a dyn Spawner,
}

impl<'a> NativeContext<'a> {
    pub(crate) fn new(fiber: u64, heap: &'a Heap, spawner: &'a dyn Spawner) -> Self {
        Self {
            fiber,
            heap,
            spawner,
        }
    }

    /// Start `callable` on a new fiber.
    pub fn spawn(&self, callable: HeapRef, args: ArgVector) -> Result<Completion, VmError> {
        self.spawner.spawn(callable, args)
    }
}

/// Type signature for native functions.
///
/// `args.positional[0]` is the invoked callable and `[1]` its receiver;
/// user arguments start at index 2.
pub type NativeFn =
    fn(&mut NativeContext, HeapRef, HeapRef, &ArgVector) -> Result<NativeReturn, VmError>;

/// Offset of the first user argument in a native's argument vector.
pub const NATIVE_ARG_OFFSET: usize = 2;

#[derive(Clone)]
pub struct NativeEntry {
    pub name: String,
    pub func: NativeFn,
}

#[derive(Default)]
struct Entries {
    name_to_id: HashMap<String, NativeId>,
    functions: Vec<NativeEntry>,
}

/// Registry of native functions.
#[derive(Default)]
pub struct NativeRegistry {
    entries: RwLock<Entries>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `func` under `name`. Registering a name again replaces the
    /// function but keeps its id.
    pub fn register(&self, name: &str, func: NativeFn) -> NativeId {
        let mut entries = self.entries.write();
        if let Some(&id) = entries.name_to_id.get(name) {
            entries.functions[id.0 as usize].func = func;
            return id;
        }
        let id = NativeId(entries.functions.len() as u32);
        entries.name_to_id.insert(name.to_string(), id);
        entries.functions.push(NativeEntry {
            name: name.to_string(),
            func,
        });
        id
    }

    pub fn get(&self, id: NativeId) -> Result<NativeEntry, VmError> {
        self.entries
            .read()
            .functions
            .get(id.0 as usize)
            .cloned()
            .ok_or_else(|| VmError::unsupported(format!("no native function registered as {}", id)))
    }

    pub fn id_of(&self, name: &str) -> Option<NativeId> {
        self.entries.read().name_to_id.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.read().functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
