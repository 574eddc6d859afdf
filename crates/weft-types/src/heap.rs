//! The heap arena.
//!
//! Objects live in a slot vector behind an `RwLock`; handles are slot
//! indices. Freed slots go on a free list and are reused by later
//! allocations. Null, both booleans and the small integers are allocated
//! once at construction and never swept.

use crate::error::HeapError;
use crate::gc::RootSource;
use crate::code::CodeObject;
use crate::object::{CallTarget, Callable, Completion, HeapObject, ObjectKind};
use crate::sync::{Mutex, RwLock};
use crate::value::HeapRef;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

pub const SMALL_INT_MIN: i64 = -5;
pub const SMALL_INT_MAX: i64 = 256;

const TRUE_SLOT: usize = 1;
const FALSE_SLOT: usize = 2;
const SMALL_INT_BASE: usize = 3;
const PERMANENT_SLOTS: usize = SMALL_INT_BASE + (SMALL_INT_MAX - SMALL_INT_MIN + 1) as usize;

/// Default number of non-canonical objects a heap may hold.
pub const DEFAULT_CAPACITY: usize = 1 << 20;

const DISPLAY_DEPTH: usize = 3;

struct Slots {
    objects: Vec<Option<Arc<HeapObject>>>,
    free: Vec<u32>,
}

pub struct Heap {
    slots: RwLock<Slots>,
    capacity: usize,
    /// Live non-canonical objects
    live: AtomicUsize,
    /// Heap-pointer counter: allocations since construction
    allocated: AtomicU64,
    since_collection: AtomicUsize,
    gc_threshold: AtomicUsize,
    pins: Mutex<HashMap<HeapRef, usize>>,
}

impl Heap {
    /// Create a heap holding at most `capacity` objects besides the
    /// canonical ones.
    pub fn new(capacity: usize) -> Self {
        let mut objects = Vec::with_capacity(PERMANENT_SLOTS);
        objects.push(Some(Arc::new(HeapObject::new(ObjectKind::Null))));
        objects.push(Some(Arc::new(HeapObject::new(ObjectKind::Bool(true)))));
        objects.push(Some(Arc::new(HeapObject::new(ObjectKind::Bool(false)))));
        for i in SMALL_INT_MIN..=SMALL_INT_MAX {
            objects.push(Some(Arc::new(HeapObject::new(ObjectKind::Int(i)))));
        }

        Self {
            slots: RwLock::new(Slots {
                objects,
                free: Vec::new(),
            }),
            capacity,
            live: AtomicUsize::new(0),
            allocated: AtomicU64::new(0),
            since_collection: AtomicUsize::new(0),
            gc_threshold: AtomicUsize::new((capacity / 4).max(1)),
            pins: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_gc_threshold(self, threshold: usize) -> Self {
        self.gc_threshold.store(threshold, Ordering::Relaxed);
        self
    }

    // ========================================================================
    // Canonical values
    // ========================================================================

    pub fn null(&self) -> HeapRef {
        HeapRef::NULL
    }

    pub fn boolean(&self, value: bool) -> HeapRef {
        HeapRef::from_index(if value { TRUE_SLOT } else { FALSE_SLOT })
    }

    pub fn is_canonical(&self, r: HeapRef) -> bool {
        r.index() < PERMANENT_SLOTS
    }

    fn small_int(value: i64) -> Option<HeapRef> {
        (SMALL_INT_MIN..=SMALL_INT_MAX)
            .contains(&value)
            .then(|| HeapRef::from_index(SMALL_INT_BASE + (value - SMALL_INT_MIN) as usize))
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    pub fn allocate_int(&self, value: i64) -> Result<HeapRef, HeapError> {
        match Self::small_int(value) {
            Some(r) => Ok(r),
            None => self.insert(ObjectKind::Int(value)),
        }
    }

    pub fn allocate_float(&self, value: f64) -> Result<HeapRef, HeapError> {
        self.insert(ObjectKind::Float(value))
    }

    pub fn allocate_bool(&self, value: bool) -> Result<HeapRef, HeapError> {
        Ok(self.boolean(value))
    }

    pub fn allocate_str(&self, value: &str) -> Result<HeapRef, HeapError> {
        self.insert(ObjectKind::Str(Arc::from(value)))
    }

    pub fn allocate_array(&self, items: Vec<HeapRef>) -> Result<HeapRef, HeapError> {
        self.insert(ObjectKind::Array(RwLock::new(items)))
    }

    pub fn allocate_object(&self) -> Result<HeapRef, HeapError> {
        self.insert(ObjectKind::Object)
    }

    pub fn allocate_code(&self, code: Arc<CodeObject>) -> Result<HeapRef, HeapError> {
        self.insert(ObjectKind::Code(code))
    }

    pub fn allocate_callable(&self, callable: Callable) -> Result<HeapRef, HeapError> {
        self.insert(ObjectKind::Callable(callable))
    }

    pub fn allocate_cell(&self, content: HeapRef) -> Result<HeapRef, HeapError> {
        self.insert(ObjectKind::Cell(RwLock::new(content)))
    }

    pub fn allocate_future(&self, completion: Completion) -> Result<HeapRef, HeapError> {
        self.insert(ObjectKind::Future(completion))
    }

    /// Build a language-level error value carrying `kind` and `message`.
    pub fn allocate_error(&self, kind: &str, message: &str) -> Result<HeapRef, HeapError> {
        let error = self.allocate_object()?;
        let kind = self.allocate_str(kind)?;
        let message = self.allocate_str(message)?;
        let obj = self.get(error)?;
        obj.set_attr("kind", kind)?;
        obj.set_attr("message", message)?;
        Ok(error)
    }

    fn insert(&self, kind: ObjectKind) -> Result<HeapRef, HeapError> {
        let mut slots = self.slots.write();
        if self.live.load(Ordering::Acquire) >= self.capacity
            || (slots.free.is_empty() && slots.objects.len() >= u32::MAX as usize)
        {
            return Err(HeapError::OutOfMemory {
                capacity: self.capacity,
            });
        }

        let object = Some(Arc::new(HeapObject::new(kind)));
        let index = match slots.free.pop() {
            Some(index) => {
                slots.objects[index as usize] = object;
                index as usize
            }
            None => {
                slots.objects.push(object);
                slots.objects.len() - 1
            }
        };

        self.live.fetch_add(1, Ordering::AcqRel);
        self.allocated.fetch_add(1, Ordering::Relaxed);
        self.since_collection.fetch_add(1, Ordering::Relaxed);
        Ok(HeapRef::from_index(index))
    }

    // ========================================================================
    // Access
    // ========================================================================

    pub fn get(&self, r: HeapRef) -> Result<Arc<HeapObject>, HeapError> {
        self.object(r).ok_or(HeapError::DanglingReference(r))
    }

    /// The object in slot `r`, if the slot is live.
    pub fn object(&self, r: HeapRef) -> Option<Arc<HeapObject>> {
        self.slots.read().objects.get(r.index()).cloned().flatten()
    }

    pub fn contains(&self, r: HeapRef) -> bool {
        self.object(r).is_some()
    }

    pub fn get_attr(&self, target: HeapRef, name: &str) -> Result<Option<HeapRef>, HeapError> {
        self.get(target)?.get_attr(name)
    }

    pub fn set_attr(&self, target: HeapRef, name: &str, value: HeapRef) -> Result<(), HeapError> {
        self.get(target)?.set_attr(name, value)
    }

    pub fn define_const(
        &self,
        target: HeapRef,
        name: &str,
        value: HeapRef,
    ) -> Result<(), HeapError> {
        self.get(target)?.define_const(name, value)
    }

    pub fn remove_attr(&self, target: HeapRef, name: &str) -> Result<Option<HeapRef>, HeapError> {
        self.get(target)?.remove_attr(name)
    }

    pub fn seal(&self, target: HeapRef) -> Result<(), HeapError> {
        let obj = self.get(target)?;
        if obj.is_null() {
            return Err(HeapError::NullAccess);
        }
        obj.seal();
        Ok(())
    }

    pub fn is_sealed(&self, target: HeapRef) -> bool {
        self.object(target).is_some_and(|o| o.is_sealed())
    }

    pub fn int_value(&self, r: HeapRef) -> Option<i64> {
        match self.object(r)?.kind() {
            ObjectKind::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn float_value(&self, r: HeapRef) -> Option<f64> {
        match self.object(r)?.kind() {
            ObjectKind::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn bool_value(&self, r: HeapRef) -> Option<bool> {
        match self.object(r)?.kind() {
            ObjectKind::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn str_value(&self, r: HeapRef) -> Option<Arc<str>> {
        match self.object(r)?.kind() {
            ObjectKind::Str(s) => Some(Arc::clone(s)),
            _ => None,
        }
    }

    /// Snapshot of an array's elements.
    pub fn array_items(&self, r: HeapRef) -> Option<Vec<HeapRef>> {
        match self.object(r)?.kind() {
            ObjectKind::Array(items) => Some(items.read().clone()),
            _ => None,
        }
    }

    pub fn array_get(&self, r: HeapRef, index: usize) -> Result<Option<HeapRef>, HeapError> {
        let obj = self.get(r)?;
        match obj.kind() {
            ObjectKind::Array(items) => Ok(items.read().get(index).copied()),
            other => Err(wrong_kind("array", other)),
        }
    }

    /// Returns false when `index` is out of range.
    pub fn array_set(&self, r: HeapRef, index: usize, value: HeapRef) -> Result<bool, HeapError> {
        let obj = self.get(r)?;
        match obj.kind() {
            ObjectKind::Array(items) => match items.write().get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    Ok(true)
                }
                None => Ok(false),
            },
            other => Err(wrong_kind("array", other)),
        }
    }

    pub fn array_push(&self, r: HeapRef, value: HeapRef) -> Result<(), HeapError> {
        let obj = self.get(r)?;
        match obj.kind() {
            ObjectKind::Array(items) => {
                items.write().push(value);
                Ok(())
            }
            other => Err(wrong_kind("array", other)),
        }
    }

    pub fn callable(&self, r: HeapRef) -> Option<Callable> {
        match self.object(r)?.kind() {
            ObjectKind::Callable(c) => Some(c.clone()),
            _ => None,
        }
    }

    pub fn code(&self, r: HeapRef) -> Option<Arc<CodeObject>> {
        match self.object(r)?.kind() {
            ObjectKind::Code(code) => Some(Arc::clone(code)),
            _ => None,
        }
    }

    pub fn completion(&self, r: HeapRef) -> Option<Completion> {
        match self.object(r)?.kind() {
            ObjectKind::Future(c) => Some(c.clone()),
            _ => None,
        }
    }

    pub fn cell_get(&self, cell: HeapRef) -> Result<HeapRef, HeapError> {
        let obj = self.get(cell)?;
        match obj.kind() {
            ObjectKind::Cell(content) => Ok(*content.read()),
            other => Err(wrong_kind("cell", other)),
        }
    }

    pub fn cell_set(&self, cell: HeapRef, value: HeapRef) -> Result<(), HeapError> {
        let obj = self.get(cell)?;
        match obj.kind() {
            ObjectKind::Cell(content) => {
                *content.write() = value;
                Ok(())
            }
            other => Err(wrong_kind("cell", other)),
        }
    }

    /// A new callable sharing `callable`'s target and capture cells, bound to
    /// `receiver`.
    pub fn rebind(&self, callable: HeapRef, receiver: HeapRef) -> Result<HeapRef, HeapError> {
        let obj = self.get(callable)?;
        let rebound = match obj.kind() {
            ObjectKind::Callable(c) => c.rebound(receiver),
            other => return Err(wrong_kind("callable", other)),
        };
        self.allocate_callable(rebound)
    }

    // ========================================================================
    // Value helpers
    // ========================================================================

    pub fn type_name(&self, r: HeapRef) -> &'static str {
        self.object(r).map_or("dangling", |o| o.type_name())
    }

    /// null, false, 0, 0.0 and "" are false; everything else is true.
    pub fn truthy(&self, r: HeapRef) -> bool {
        let Some(obj) = self.object(r) else {
            return false;
        };
        match obj.kind() {
            ObjectKind::Null => false,
            ObjectKind::Bool(b) => *b,
            ObjectKind::Int(i) => *i != 0,
            ObjectKind::Float(f) => *f != 0.0,
            ObjectKind::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Structural equality for primitives, identity for everything else.
    pub fn values_equal(&self, a: HeapRef, b: HeapRef) -> bool {
        if a == b {
            return true;
        }
        let (Some(x), Some(y)) = (self.object(a), self.object(b)) else {
            return false;
        };
        match (x.kind(), y.kind()) {
            (ObjectKind::Int(l), ObjectKind::Int(r)) => l == r,
            (ObjectKind::Float(l), ObjectKind::Float(r)) => l == r,
            (ObjectKind::Int(l), ObjectKind::Float(r)) => (*l as f64) == *r,
            (ObjectKind::Float(l), ObjectKind::Int(r)) => *l == (*r as f64),
            (ObjectKind::Str(l), ObjectKind::Str(r)) => l == r,
            (ObjectKind::Bool(l), ObjectKind::Bool(r)) => l == r,
            (ObjectKind::Null, ObjectKind::Null) => true,
            _ => false,
        }
    }

    /// Human-readable rendering for logs and messages.
    pub fn display(&self, r: HeapRef) -> String {
        let mut out = String::new();
        self.render(r, DISPLAY_DEPTH, &mut out);
        out
    }

    /// `Kind: message` for error objects, plain display otherwise.
    pub fn describe_error(&self, r: HeapRef) -> String {
        let field = |name: &str| {
            self.get_attr(r, name)
                .ok()
                .flatten()
                .and_then(|v| self.str_value(v))
        };
        match (field("kind"), field("message")) {
            (Some(kind), Some(message)) => format!("{}: {}", kind, message),
            _ => self.display(r),
        }
    }

    fn render(&self, r: HeapRef, depth: usize, out: &mut String) {
        let Some(obj) = self.object(r) else {
            out.push_str("<dangling>");
            return;
        };
        match obj.kind() {
            ObjectKind::Null => out.push_str("null"),
            ObjectKind::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            ObjectKind::Int(i) => out.push_str(&i.to_string()),
            ObjectKind::Float(f) if f.is_finite() && f.fract() == 0.0 => {
                out.push_str(&format!("{:.1}", f))
            }
            ObjectKind::Float(f) => out.push_str(&f.to_string()),
            ObjectKind::Str(s) => out.push_str(s),
            ObjectKind::Array(_) | ObjectKind::Object if depth == 0 => out.push_str("..."),
            ObjectKind::Array(items) => {
                let items = items.read().clone();
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.render(*item, depth - 1, out);
                }
                out.push(']');
            }
            ObjectKind::Object => {
                out.push('{');
                for (i, (name, value)) in obj.attr_entries().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(name);
                    out.push_str(": ");
                    self.render(*value, depth - 1, out);
                }
                out.push('}');
            }
            ObjectKind::Code(code) => out.push_str(&format!("<code {}>", code.display_name())),
            ObjectKind::Callable(c) => {
                let name = match c.target {
                    CallTarget::Code(code) => self
                        .code(code)
                        .map_or_else(|| "?".to_string(), |c| c.display_name().to_string()),
                    CallTarget::Native(id) => id.to_string(),
                };
                out.push_str(&format!("<callable {}>", name));
            }
            ObjectKind::Cell(_) => out.push_str("<cell>"),
            ObjectKind::Future(c) => out.push_str(if c.is_resolved() {
                "<future resolved>"
            } else {
                "<future pending>"
            }),
        }
    }

    // ========================================================================
    // Pinning
    // ========================================================================

    /// Keep `r` alive across collections until a matching `unpin`.
    pub fn pin(&self, r: HeapRef) {
        *self.pins.lock().entry(r).or_insert(0) += 1;
    }

    pub fn unpin(&self, r: HeapRef) {
        let mut pins = self.pins.lock();
        if let Some(count) = pins.get_mut(&r) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&r);
            }
        }
    }

    pub fn is_pinned(&self, r: HeapRef) -> bool {
        self.pins.lock().contains_key(&r)
    }

    // ========================================================================
    // Collector support
    // ========================================================================

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live objects, canonical ones excluded.
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn gc_threshold(&self) -> usize {
        self.gc_threshold.load(Ordering::Relaxed)
    }

    pub fn set_gc_threshold(&self, threshold: usize) {
        self.gc_threshold.store(threshold, Ordering::Relaxed);
    }

    /// True once enough allocations happened since the last sweep. A zero
    /// threshold disables automatic collection.
    pub fn should_collect(&self) -> bool {
        let threshold = self.gc_threshold();
        threshold > 0 && self.since_collection.load(Ordering::Relaxed) >= threshold
    }

    /// Handles of every live slot.
    pub fn live_refs(&self) -> Vec<HeapRef> {
        self.slots
            .read()
            .objects
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_some())
            .map(|(i, _)| HeapRef::from_index(i))
            .collect()
    }

    /// Visit every live slot under the write lock and free the non-canonical
    /// ones `keep` rejects. Canonical slots are visited but never freed.
    /// Returns the number of freed slots.
    pub fn sweep_with(&self, mut keep: impl FnMut(HeapRef, &HeapObject) -> bool) -> usize {
        let mut slots = self.slots.write();
        let Slots { objects, free } = &mut *slots;
        let mut freed = 0;
        for (index, slot) in objects.iter_mut().enumerate() {
            let Some(obj) = slot.as_ref() else { continue };
            let kept = keep(HeapRef::from_index(index), obj);
            if !kept && index >= PERMANENT_SLOTS {
                *slot = None;
                free.push(index as u32);
                freed += 1;
            }
        }
        self.live.fetch_sub(freed, Ordering::AcqRel);
        self.since_collection.store(0, Ordering::Relaxed);
        freed
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RootSource for Heap {
    /// Canonical values and pins.
    fn roots(&self, out: &mut Vec<HeapRef>) {
        out.extend((0..PERMANENT_SLOTS).map(HeapRef::from_index));
        out.extend(self.pins.lock().keys().copied());
    }
}

fn wrong_kind(expected: &'static str, found: &ObjectKind) -> HeapError {
    HeapError::WrongKind {
        expected,
        found: found.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ModuleId, NativeId};
    use proptest::prelude::*;

    #[test]
    fn test_canonical_booleans_and_null() {
        let heap = Heap::new(16);
        assert_eq!(heap.allocate_bool(true).unwrap(), heap.boolean(true));
        assert_ne!(heap.boolean(true), heap.boolean(false));
        assert_eq!(heap.type_name(heap.null()), "null");
        assert!(heap.is_canonical(heap.boolean(false)));
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn test_large_ints_are_distinct() {
        let heap = Heap::new(16);
        let a = heap.allocate_int(1000).unwrap();
        let b = heap.allocate_int(1000).unwrap();
        assert_ne!(a, b);
        assert!(heap.values_equal(a, b));
        assert_eq!(heap.live_count(), 2);
        assert_eq!(heap.allocated(), 2);
    }

    #[test]
    fn test_capacity_exhaustion() {
        let heap = Heap::new(2);
        heap.allocate_object().unwrap();
        heap.allocate_str("x").unwrap();
        assert_eq!(
            heap.allocate_float(1.5),
            Err(HeapError::OutOfMemory { capacity: 2 })
        );
        // canonical values never need a slot
        assert!(heap.allocate_int(7).is_ok());
    }

    #[test]
    fn test_freed_slot_is_reused() {
        let heap = Heap::new(8);
        let keep = heap.allocate_object().unwrap();
        let drop = heap.allocate_object().unwrap();
        let freed = heap.sweep_with(|r, _| r != drop);
        assert_eq!(freed, 1);
        assert!(!heap.contains(drop));
        assert!(heap.contains(keep));
        assert_eq!(heap.allocate_str("again").unwrap(), drop);
    }

    #[test]
    fn test_sweep_never_frees_canonical_slots() {
        let heap = Heap::new(8);
        heap.sweep_with(|_, _| false);
        assert_eq!(heap.int_value(heap.allocate_int(3).unwrap()), Some(3));
        assert_eq!(heap.bool_value(heap.boolean(true)), Some(true));
    }

    #[test]
    fn test_rebind_shares_code_and_cells() {
        let heap = Heap::new(16);
        let code = heap
            .allocate_code(Arc::new(crate::code::CodeBuilder::new("m").build().unwrap()))
            .unwrap();
        let cell = heap.allocate_cell(heap.null()).unwrap();
        let f = heap
            .allocate_callable(Callable::code(code, ModuleId(0), vec![cell]))
            .unwrap();
        let recv = heap.allocate_object().unwrap();
        let g = heap.rebind(f, recv).unwrap();

        let bound = heap.callable(g).unwrap();
        assert_ne!(f, g);
        assert_eq!(bound.target, CallTarget::Code(code));
        assert_eq!(bound.captures, vec![cell]);
        assert_eq!(bound.receiver, recv);
        assert_eq!(heap.callable(f).unwrap().receiver, HeapRef::NULL);
    }

    #[test]
    fn test_rebind_native() {
        let heap = Heap::new(16);
        let f = heap.allocate_callable(Callable::native(NativeId(3))).unwrap();
        let g = heap.rebind(f, heap.boolean(true)).unwrap();
        assert_eq!(heap.callable(g).unwrap().target, CallTarget::Native(NativeId(3)));
        assert!(matches!(
            heap.rebind(heap.null(), f),
            Err(HeapError::WrongKind { .. })
        ));
    }

    #[test]
    fn test_every_value_holds_attributes() {
        let heap = Heap::new(16);
        let s = heap.allocate_str("abc").unwrap();
        let arr = heap.allocate_array(vec![s]).unwrap();
        let unit = heap.allocate_str("cm").unwrap();
        heap.set_attr(arr, "unit", unit).unwrap();
        assert_eq!(heap.get_attr(arr, "unit").unwrap(), Some(unit));
        assert_eq!(heap.get_attr(s, "unit").unwrap(), None);
        assert_eq!(heap.seal(heap.null()), Err(HeapError::NullAccess));
    }

    #[test]
    fn test_shared_primitives_reject_attribute_writes() {
        let heap = Heap::new(16);
        let seven = heap.allocate_int(7).unwrap();
        let tag = heap.allocate_str("tag").unwrap();
        assert_eq!(
            heap.set_attr(seven, "tag", tag),
            Err(HeapError::Immutable { kind: "int" })
        );
        assert_eq!(heap.get_attr(heap.allocate_int(7).unwrap(), "tag").unwrap(), None);

        let yes = heap.boolean(true);
        assert!(matches!(heap.define_const(yes, "x", tag), Err(HeapError::Immutable { .. })));
        assert!(matches!(heap.remove_attr(tag, "x"), Err(HeapError::Immutable { .. })));
        let float = heap.allocate_float(1.5).unwrap();
        let err = heap.set_attr(float, "x", tag).unwrap_err();
        assert_eq!(err.kind_name(), "ImmutableValueError");
    }

    #[test]
    fn test_truthiness() {
        let heap = Heap::new(16);
        let empty = heap.allocate_str("").unwrap();
        let zero_f = heap.allocate_float(0.0).unwrap();
        let obj = heap.allocate_object().unwrap();
        for falsy in [heap.null(), heap.boolean(false), heap.allocate_int(0).unwrap(), empty, zero_f] {
            assert!(!heap.truthy(falsy), "{}", heap.display(falsy));
        }
        assert!(heap.truthy(obj));
        assert!(heap.truthy(heap.allocate_int(-1).unwrap()));
    }

    #[test]
    fn test_display_and_errors() {
        let heap = Heap::new(32);
        let items = vec![heap.allocate_int(1).unwrap(), heap.allocate_float(2.0).unwrap()];
        let arr = heap.allocate_array(items).unwrap();
        assert_eq!(heap.display(arr), "[1, 2.0]");

        let err = heap.allocate_error("DivisionByZero", "division by zero").unwrap();
        assert_eq!(heap.describe_error(err), "DivisionByZero: division by zero");
    }

    #[test]
    fn test_pins_are_counted() {
        let heap = Heap::new(4);
        let r = heap.allocate_object().unwrap();
        heap.pin(r);
        heap.pin(r);
        heap.unpin(r);
        assert!(heap.is_pinned(r));
        heap.unpin(r);
        assert!(!heap.is_pinned(r));
    }

    #[test]
    fn test_should_collect_after_threshold() {
        let heap = Heap::new(64).with_gc_threshold(3);
        heap.allocate_object().unwrap();
        heap.allocate_object().unwrap();
        assert!(!heap.should_collect());
        heap.allocate_object().unwrap();
        assert!(heap.should_collect());
        heap.sweep_with(|_, _| true);
        assert!(!heap.should_collect());
    }

    proptest! {
        #[test]
        fn prop_small_ints_are_canonical(i in SMALL_INT_MIN..=SMALL_INT_MAX) {
            let heap = Heap::new(4);
            let a = heap.allocate_int(i).unwrap();
            let b = heap.allocate_int(i).unwrap();
            prop_assert_eq!(a, b);
            prop_assert_eq!(heap.int_value(a), Some(i));
            prop_assert_eq!(heap.live_count(), 0);
        }

        #[test]
        fn prop_ints_outside_range_allocate(i in any::<i64>().prop_filter(
            "outside the canonical range",
            |i| !(SMALL_INT_MIN..=SMALL_INT_MAX).contains(i),
        )) {
            let heap = Heap::new(4);
            let a = heap.allocate_int(i).unwrap();
            prop_assert!(!heap.is_canonical(a));
            prop_assert_eq!(heap.int_value(a), Some(i));
        }
    }
}
