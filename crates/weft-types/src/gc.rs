//! Collector contract and the default mark-and-sweep collector.
//!
//! The runtime supplies roots through [`RootSource`]; objects expose their
//! outgoing references through [`Trace`]. Collection must not race with
//! mutation: the runtime only collects while every fiber is parked between
//! bursts.

use crate::heap::Heap;
use crate::object::{CallTarget, HeapObject, ObjectKind};
use crate::value::HeapRef;

/// Direct references held by a value.
pub trait Trace {
    fn trace(&self, out: &mut Vec<HeapRef>);
}

/// Supplier of root references.
pub trait RootSource {
    fn roots(&self, out: &mut Vec<HeapRef>);
}

impl Trace for HeapObject {
    fn trace(&self, out: &mut Vec<HeapRef>) {
        out.extend(self.attr_values());
        match self.kind() {
            ObjectKind::Array(items) => out.extend(items.read().iter().copied()),
            ObjectKind::Callable(callable) => {
                if let CallTarget::Code(code) = callable.target {
                    out.push(code);
                }
                out.push(callable.receiver);
                out.extend(callable.captures.iter().copied());
            }
            ObjectKind::Cell(content) => out.push(*content.read()),
            ObjectKind::Future(completion) => match completion.poll() {
                Some(Ok(value)) | Some(Err(value)) => out.push(value),
                None => {}
            },
            ObjectKind::Null
            | ObjectKind::Bool(_)
            | ObjectKind::Int(_)
            | ObjectKind::Float(_)
            | ObjectKind::Str(_)
            | ObjectKind::Object
            | ObjectKind::Code(_) => {}
        }
    }
}

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub freed: usize,
    pub survivors: usize,
}

pub trait Collector: Send + Sync {
    /// Mark everything reachable from `roots` and from the heap's own roots.
    /// Returns the number of objects newly marked.
    fn mark(&self, heap: &Heap, roots: &[HeapRef]) -> usize;

    /// Free unmarked objects and reset marks on the survivors.
    fn sweep(&self, heap: &Heap) -> SweepStats;

    fn collect(&self, heap: &Heap, roots: &[HeapRef]) -> SweepStats {
        self.mark(heap, roots);
        self.sweep(heap)
    }
}

/// Worklist-driven mark-and-sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkSweep;

impl MarkSweep {
    pub fn new() -> Self {
        MarkSweep
    }
}

impl Collector for MarkSweep {
    fn mark(&self, heap: &Heap, roots: &[HeapRef]) -> usize {
        let mut worklist: Vec<HeapRef> = roots.to_vec();
        heap.roots(&mut worklist);

        let mut marked = 0;
        while let Some(r) = worklist.pop() {
            let Some(obj) = heap.object(r) else { continue };
            if obj.mark() {
                marked += 1;
                obj.trace(&mut worklist);
            }
        }
        marked
    }

    fn sweep(&self, heap: &Heap) -> SweepStats {
        let mut survivors = 0;
        let freed = heap.sweep_with(|_, obj| {
            let kept = obj.is_marked();
            if kept {
                obj.clear_mark();
                survivors += 1;
            }
            kept
        });
        SweepStats { freed, survivors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{CaptureSource, CodeBuilder};
    use crate::object::{Callable, Completion};
    use crate::value::ModuleId;
    use std::sync::Arc;

    #[test]
    fn test_unreachable_object_is_swept_and_slot_reused() {
        let heap = Heap::new(16);
        let kept = heap.allocate_object().unwrap();
        let garbage = heap.allocate_str("gone").unwrap();

        let stats = MarkSweep.collect(&heap, &[kept]);
        assert_eq!(stats.freed, 1);
        assert!(heap.contains(kept));
        assert!(!heap.contains(garbage));
        assert_eq!(heap.allocate_object().unwrap(), garbage);
    }

    #[test]
    fn test_mark_is_idempotent() {
        let heap = Heap::new(16);
        let root = heap.allocate_object().unwrap();
        let child = heap.allocate_str("child").unwrap();
        heap.set_attr(root, "child", child).unwrap();

        let first = MarkSweep.mark(&heap, &[root]);
        let second = MarkSweep.mark(&heap, &[root]);
        assert!(first >= 2);
        assert_eq!(second, 0);

        let stats = MarkSweep.sweep(&heap);
        assert_eq!(stats.freed, 0);
        assert!(!heap.get(root).unwrap().is_marked());
    }

    #[test]
    fn test_reachable_cycle_survives() {
        let heap = Heap::new(16);
        let a = heap.allocate_object().unwrap();
        let b = heap.allocate_object().unwrap();
        heap.set_attr(a, "next", b).unwrap();
        heap.set_attr(b, "next", a).unwrap();

        MarkSweep.collect(&heap, &[a]);
        assert!(heap.contains(a));
        assert!(heap.contains(b));
    }

    #[test]
    fn test_unreachable_closure_cycle_is_reclaimed() {
        let heap = Heap::new(16);
        let code = CodeBuilder::new("loop")
            .capture(CaptureSource::Local(0))
            .locals(1)
            .build()
            .unwrap();
        let code = heap.allocate_code(Arc::new(code)).unwrap();
        let cell = heap.allocate_cell(heap.null()).unwrap();
        let closure = heap
            .allocate_callable(Callable::code(code, ModuleId(0), vec![cell]))
            .unwrap();
        heap.cell_set(cell, closure).unwrap();

        let stats = MarkSweep.collect(&heap, &[]);
        assert_eq!(stats.freed, 3);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn test_traces_arrays_futures_and_receivers() {
        let heap = Heap::new(16);
        let elem = heap.allocate_str("elem").unwrap();
        let arr = heap.allocate_array(vec![elem]).unwrap();
        let result = heap.allocate_float(0.5).unwrap();
        let fut = heap
            .allocate_future(Completion::resolved(Ok(result)))
            .unwrap();
        let recv = heap.allocate_object().unwrap();
        let f = heap
            .allocate_callable(Callable::native(crate::value::NativeId(0)).rebound(recv))
            .unwrap();

        MarkSweep.collect(&heap, &[arr, fut, f]);
        for r in [elem, arr, result, fut, recv, f] {
            assert!(heap.contains(r));
        }
    }

    #[test]
    fn test_pins_are_roots() {
        let heap = Heap::new(16);
        let pinned = heap.allocate_object().unwrap();
        heap.pin(pinned);
        let tag = heap.allocate_str("tag").unwrap();
        heap.set_attr(pinned, "tag", tag).unwrap();

        MarkSweep.collect(&heap, &[]);
        assert!(heap.contains(pinned));
        assert!(heap.contains(tag));

        heap.unpin(pinned);
        MarkSweep.collect(&heap, &[]);
        assert!(!heap.contains(pinned));
    }
}
