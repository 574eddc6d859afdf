//! Stack-frame interpreter and fibers.
//!
//! A [`Fiber`] owns a stack of [`Frame`]s. Frames never call each other on
//! the host stack: a call yields a child frame that the fiber pushes, and a
//! completed frame hands its result to the new top frame. This keeps every
//! fiber suspendable between frame advances.

mod execution;
mod fiber;
mod frame;
mod ops;
mod result;

pub use fiber::{Advance, Fiber, FiberId, FiberOutcome, FiberStatus, MAX_CALL_DEPTH};
pub use frame::{CodeFrame, Frame, NativeFrame, INSTRUCTION_SLICE};
pub use result::FrameStep;

use crate::builtins::registry::NativeRegistry;
use crate::error::VmError;
use crate::module::ModuleTable;
use std::sync::atomic::{AtomicBool, Ordering};
use weft_types::{ArgVector, Completion, Heap, HeapRef};

/// Starts fibers on behalf of running code.
pub trait Spawner: Send + Sync {
    fn spawn(&self, callable: HeapRef, args: ArgVector) -> Result<Completion, VmError>;
}

/// Spawner for code running outside a scheduler.
pub struct NoSpawn;

impl Spawner for NoSpawn {
    fn spawn(&self, _callable: HeapRef, _args: ArgVector) -> Result<Completion, VmError> {
        Err(VmError::unsupported("spawning fibers requires a scheduler"))
    }
}

/// Everything a frame needs from the runtime while it executes.
pub struct ExecEnv<'a> {
    pub heap: &'a Heap,
    pub modules: &'a ModuleTable,
    pub natives: &'a NativeRegistry,
    pub spawner: &'a dyn Spawner,
    /// Set when the host wants fibers to stop at the next frame boundary
    pub interrupt: &'a AtomicBool,
}

impl ExecEnv<'_> {
    /// True when an unlimited burst should still end early: a stop was
    /// requested or the heap is waiting for a collection.
    pub fn should_pause(&self) -> bool {
        self.interrupt.load(Ordering::Acquire) || self.heap.should_collect()
    }
}
