//! Heap objects and the attribute model.
//!
//! Every heap value, including primitives, carries an attribute table.
//! Primitives are immutable and may be shared canonical instances, so
//! writes to their tables fail with [`HeapError::Immutable`]; reads return
//! nothing. Null rejects every attribute operation with
//! [`HeapError::NullAccess`].

use crate::code::CodeObject;
use crate::error::HeapError;
use crate::sync::{Condvar, Mutex, RwLock};
use crate::value::{HeapRef, ModuleId, NativeId};
use indexmap::IndexMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One attribute slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    pub value: HeapRef,
    pub constant: bool,
}

/// Insertion-ordered attribute table.
pub type AttrTable = IndexMap<String, Attr>;

/// What the interpreter enters when a callable is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// Heap handle of a `Code` object
    Code(HeapRef),
    Native(NativeId),
}

/// An invocable value: code or a native function, a receiver and, for code,
/// the shared capture cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Callable {
    pub target: CallTarget,
    /// Module whose constants and globals the code runs against
    pub module: Option<ModuleId>,
    pub receiver: HeapRef,
    pub captures: Vec<HeapRef>,
}

impl Callable {
    pub fn native(id: NativeId) -> Self {
        Self {
            target: CallTarget::Native(id),
            module: None,
            receiver: HeapRef::NULL,
            captures: Vec::new(),
        }
    }

    pub fn code(code: HeapRef, module: ModuleId, captures: Vec<HeapRef>) -> Self {
        Self {
            target: CallTarget::Code(code),
            module: Some(module),
            receiver: HeapRef::NULL,
            captures,
        }
    }

    /// Same target and capture cells, different receiver.
    pub fn rebound(&self, receiver: HeapRef) -> Self {
        Self {
            receiver,
            ..self.clone()
        }
    }
}

/// Arguments passed to a call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgVector {
    pub positional: Vec<HeapRef>,
    pub keywords: IndexMap<String, HeapRef>,
}

impl ArgVector {
    pub fn new(positional: Vec<HeapRef>) -> Self {
        Self {
            positional,
            keywords: IndexMap::new(),
        }
    }

    pub fn keyword(mut self, name: impl Into<String>, value: HeapRef) -> Self {
        self.keywords.insert(name.into(), value);
        self
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    /// Every handle held by the arguments.
    pub fn values(&self) -> impl Iterator<Item = HeapRef> + '_ {
        self.positional
            .iter()
            .copied()
            .chain(self.keywords.values().copied())
    }
}

type Outcome = Result<HeapRef, HeapRef>;

/// Callback run once when a completion resolves.
pub type Waiter = Box<dyn FnOnce(Outcome) + Send>;

#[derive(Default)]
struct Slot {
    result: Option<Outcome>,
    waiters: Vec<Waiter>,
    /// Set once every waiter has run
    settled: bool,
}

struct CompletionState {
    slot: Mutex<Slot>,
    ready: Condvar,
}

/// A one-shot result slot shared between a producer and its waiters.
///
/// `Ok` carries a value, `Err` carries a raised error value. Parked fibers
/// register a [`Waiter`] that re-queues them; host threads block on
/// [`Completion::wait`], which returns only after every waiter has run.
#[derive(Clone)]
pub struct Completion(Arc<CompletionState>);

impl Completion {
    pub fn new() -> Self {
        Completion(Arc::new(CompletionState {
            slot: Mutex::new(Slot::default()),
            ready: Condvar::new(),
        }))
    }

    pub fn resolved(result: Outcome) -> Self {
        let completion = Self::new();
        completion.resolve(result);
        completion
    }

    /// Store the result, run the waiters, then wake blocked threads.
    /// Returns false if it was already resolved, in which case the first
    /// result stands.
    pub fn resolve(&self, result: Outcome) -> bool {
        let waiters = {
            let mut slot = self.0.slot.lock();
            if slot.result.is_some() {
                return false;
            }
            slot.result = Some(result);
            std::mem::take(&mut slot.waiters)
        };
        for waiter in waiters {
            waiter(result);
        }

        let mut slot = self.0.slot.lock();
        slot.settled = true;
        self.0.ready.notify_all();
        true
    }

    /// Run `waiter` once the completion resolves; immediately if it
    /// already has.
    pub fn on_resolve(&self, waiter: Waiter) {
        let mut slot = self.0.slot.lock();
        match slot.result {
            Some(result) => {
                drop(slot);
                waiter(result);
            }
            None => slot.waiters.push(waiter),
        }
    }

    pub fn poll(&self) -> Option<Outcome> {
        self.0.slot.lock().result
    }

    pub fn is_resolved(&self) -> bool {
        self.0.slot.lock().result.is_some()
    }

    pub fn wait(&self) -> Outcome {
        let mut slot = self.0.slot.lock();
        loop {
            if let (true, Some(result)) = (slot.settled, slot.result) {
                return result;
            }
            self.0.ready.wait(&mut slot);
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.0.slot.lock();
        while !slot.settled {
            if self.0.ready.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        if slot.settled {
            slot.result
        } else {
            None
        }
    }

    pub fn ptr_eq(&self, other: &Completion) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Completion").field(&self.poll()).finish()
    }
}

/// Payload of a heap object.
#[derive(Debug)]
pub enum ObjectKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Array(RwLock<Vec<HeapRef>>),
    Object,
    Code(Arc<CodeObject>),
    Callable(Callable),
    /// Capture cell shared between a frame and its closures
    Cell(RwLock<HeapRef>),
    Future(Completion),
}

impl ObjectKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjectKind::Null => "null",
            ObjectKind::Bool(_) => "bool",
            ObjectKind::Int(_) => "int",
            ObjectKind::Float(_) => "float",
            ObjectKind::Str(_) => "str",
            ObjectKind::Array(_) => "array",
            ObjectKind::Object => "object",
            ObjectKind::Code(_) => "code",
            ObjectKind::Callable(_) => "callable",
            ObjectKind::Cell(_) => "cell",
            ObjectKind::Future(_) => "future",
        }
    }
}

/// A heap slot's contents.
#[derive(Debug)]
pub struct HeapObject {
    kind: ObjectKind,
    attrs: RwLock<AttrTable>,
    marked: AtomicBool,
    sealed: AtomicBool,
}

impl HeapObject {
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            attrs: RwLock::new(AttrTable::new()),
            marked: AtomicBool::new(false),
            sealed: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, ObjectKind::Null)
    }

    /// `Ok(None)` when the attribute is absent.
    pub fn get_attr(&self, name: &str) -> Result<Option<HeapRef>, HeapError> {
        self.ensure_not_null()?;
        Ok(self.attrs.read().get(name).map(|a| a.value))
    }

    pub fn set_attr(&self, name: &str, value: HeapRef) -> Result<(), HeapError> {
        self.store(name, value, false)
    }

    /// Store an attribute that can never be reassigned.
    pub fn define_const(&self, name: &str, value: HeapRef) -> Result<(), HeapError> {
        self.store(name, value, true)
    }

    pub fn remove_attr(&self, name: &str) -> Result<Option<HeapRef>, HeapError> {
        self.ensure_writable()?;
        if self.is_sealed() {
            return Err(HeapError::SealedObject {
                name: name.to_string(),
            });
        }
        let mut attrs = self.attrs.write();
        match attrs.get(name) {
            Some(attr) if attr.constant => Err(HeapError::InvalidReassignment {
                name: name.to_string(),
            }),
            Some(_) => Ok(attrs.shift_remove(name).map(|a| a.value)),
            None => Ok(None),
        }
    }

    pub fn is_constant(&self, name: &str) -> bool {
        self.attrs.read().get(name).is_some_and(|a| a.constant)
    }

    pub fn attr_count(&self) -> usize {
        self.attrs.read().len()
    }

    /// Snapshot of `(name, value)` pairs in insertion order.
    pub fn attr_entries(&self) -> Vec<(String, HeapRef)> {
        self.attrs
            .read()
            .iter()
            .map(|(k, a)| (k.clone(), a.value))
            .collect()
    }

    pub fn attr_values(&self) -> Vec<HeapRef> {
        self.attrs.read().values().map(|a| a.value).collect()
    }

    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Set the mark flag. Returns true only for the call that set it.
    pub fn mark(&self) -> bool {
        !self.marked.swap(true, Ordering::AcqRel)
    }

    pub fn is_marked(&self) -> bool {
        self.marked.load(Ordering::Acquire)
    }

    pub fn clear_mark(&self) {
        self.marked.store(false, Ordering::Release);
    }

    fn store(&self, name: &str, value: HeapRef, constant: bool) -> Result<(), HeapError> {
        self.ensure_writable()?;
        let mut attrs = self.attrs.write();
        match attrs.get_mut(name) {
            Some(attr) if attr.constant => Err(HeapError::InvalidReassignment {
                name: name.to_string(),
            }),
            Some(attr) => {
                attr.value = value;
                attr.constant = constant;
                Ok(())
            }
            None if self.is_sealed() => Err(HeapError::SealedObject {
                name: name.to_string(),
            }),
            None => {
                attrs.insert(name.to_string(), Attr { value, constant });
                Ok(())
            }
        }
    }

    fn ensure_not_null(&self) -> Result<(), HeapError> {
        if self.is_null() {
            Err(HeapError::NullAccess)
        } else {
            Ok(())
        }
    }

    fn ensure_writable(&self) -> Result<(), HeapError> {
        self.ensure_not_null()?;
        match self.kind {
            ObjectKind::Bool(_) | ObjectKind::Int(_) | ObjectKind::Float(_) | ObjectKind::Str(_) => {
                Err(HeapError::Immutable {
                    kind: self.kind.type_name(),
                })
            }
            _ => Ok(()),
        }
    }
}
