use crate::value::HeapRef;
use thiserror::Error;

/// Failures raised by the heap and the object model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HeapError {
    #[error("heap exhausted: capacity of {capacity} objects reached")]
    OutOfMemory { capacity: usize },

    #[error("cannot add or remove attribute '{name}' on a sealed object")]
    SealedObject { name: String },

    #[error("cannot reassign constant attribute '{name}'")]
    InvalidReassignment { name: String },

    #[error("attribute access on null")]
    NullAccess,

    #[error("cannot write attributes on shared {kind} value")]
    Immutable { kind: &'static str },

    #[error("missing attribute '{name}'")]
    MissingAttribute { name: String },

    #[error("dangling heap reference {0}")]
    DanglingReference(HeapRef),

    #[error("expected {expected}, found {found}")]
    WrongKind {
        expected: &'static str,
        found: &'static str,
    },
}

impl HeapError {
    /// The `kind` attribute used when this error becomes a language-level value.
    pub fn kind_name(&self) -> &'static str {
        match self {
            HeapError::OutOfMemory { .. } => "OutOfMemory",
            HeapError::SealedObject { .. } => "SealedObjectError",
            HeapError::InvalidReassignment { .. } => "InvalidReassignment",
            HeapError::NullAccess => "NullAccess",
            HeapError::Immutable { .. } => "ImmutableValueError",
            HeapError::MissingAttribute { .. } => "MissingAttribute",
            HeapError::DanglingReference(_) => "DanglingReference",
            HeapError::WrongKind { .. } => "TypeError",
        }
    }

    /// Allocation failure cannot be handled by the program that hit it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HeapError::OutOfMemory { .. })
    }
}

/// Failures while assembling code with [`crate::CodeBuilder`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("label {0} was used but never placed")]
    UnplacedLabel(u32),

    #[error("label {0} placed twice")]
    DuplicateLabel(u32),
}
