//! Weft Types
//!
//! Heap and value model shared by the Weft runtime.
//!
//! # Modules
//!
//! - `value`: Copyable handles into the heap arena
//! - `object`: Heap objects, attribute tables, callables and capture cells
//! - `heap`: The arena allocator with canonical primitives
//! - `gc`: Collector contract and the default mark-and-sweep collector
//! - `opcode`: Instruction set definitions
//! - `code`: Code objects, signatures and the label-resolving code builder
//! - `artifact`: The compiler-to-runtime module artifact
//! - `sync`: Synchronization aliases

pub mod artifact;
pub mod code;
pub mod error;
pub mod gc;
pub mod heap;
pub mod object;
pub mod opcode;
pub mod sync;
pub mod value;

// Re-exports
pub use artifact::{ArtifactBuilder, Constant, ModuleArtifact, RecordTemplate};
pub use code::{
    CaptureSource, CodeBuilder, CodeObject, HandlerRecord, Instruction, Label, Signature,
    SourceLocation,
};
pub use error::{BuildError, HeapError};
pub use gc::{Collector, MarkSweep, RootSource, SweepStats, Trace};
pub use heap::{Heap, SMALL_INT_MAX, SMALL_INT_MIN};
pub use object::{
    ArgVector, Attr, AttrTable, CallTarget, Callable, Completion, HeapObject, ObjectKind, Waiter,
};
pub use opcode::OpCode;
pub use value::{HeapRef, ModuleId, NativeId};
