//! Execution result types

use crate::vm::frame::Frame;
use weft_types::HeapRef;

/// Why a frame stopped advancing.
pub enum FrameStep {
    /// The frame made a call; the child runs before the frame resumes
    Call(Box<Frame>),
    Return(HeapRef),
    /// Completed with the error flag set
    Raise(HeapRef),
    /// Waiting on an unresolved completion
    Blocked,
    /// Instruction budget spent; still runnable
    Yield,
}

/// Result of executing one instruction
pub(crate) enum ExecutionResult {
    Continue,
    Call(Frame),
    Return(HeapRef),
    Raise(HeapRef),
}
