//! Error types for the interpreter, loader and module cache

use std::path::PathBuf;
use thiserror::Error;
use weft_types::{Heap, HeapError, HeapRef};

/// Problems binding arguments to, or entering, a callable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvocationError {
    #[error("{callee} expects {expected} positional argument(s), got {got}")]
    Arity {
        callee: String,
        expected: String,
        got: usize,
    },

    #[error("type error in {operation}: {detail}")]
    Type { operation: String, detail: String },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("{callee} got an unexpected keyword argument '{name}'")]
    UnexpectedKeyword { callee: String, name: String },
}

/// VM runtime errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    #[error(transparent)]
    Heap(#[from] HeapError),

    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error("division by zero")]
    DivisionByZero,

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("invalid operand for {opcode}: {detail}")]
    InvalidOperand { opcode: String, detail: String },

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("unknown native function {0}")]
    UnknownNative(String),
}

impl VmError {
    pub fn type_error(operation: &str, detail: impl Into<String>) -> Self {
        VmError::Invocation(InvocationError::Type {
            operation: operation.to_string(),
            detail: detail.into(),
        })
    }

    pub fn unsupported(what: impl Into<String>) -> Self {
        VmError::Invocation(InvocationError::Unsupported(what.into()))
    }

    /// Fatal errors terminate the fiber without a handler search.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VmError::Heap(e) if e.is_fatal())
    }

    /// The `kind` attribute of the language-level error value.
    pub fn kind_name(&self) -> &'static str {
        match self {
            VmError::Heap(e) => e.kind_name(),
            VmError::Invocation(InvocationError::Arity { .. }) => "ArityError",
            VmError::Invocation(InvocationError::Type { .. }) => "TypeError",
            VmError::Invocation(InvocationError::Unsupported(_)) => "Unsupported",
            VmError::Invocation(InvocationError::UnexpectedKeyword { .. }) => {
                "UnexpectedKeyword"
            }
            VmError::DivisionByZero => "DivisionByZero",
            VmError::IndexOutOfRange { .. } => "IndexOutOfRange",
            VmError::InvalidOperand { .. } => "InvalidOperand",
            VmError::StackUnderflow => "StackUnderflow",
            VmError::UnknownNative(_) => "UnknownNative",
        }
    }

    /// Build the heap error object a handler receives.
    pub fn to_value(&self, heap: &Heap) -> Result<HeapRef, VmError> {
        Ok(heap.allocate_error(self.kind_name(), &self.to_string())?)
    }
}

/// Binary module cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("not a module cache image")]
    BadMagic,

    #[error("cache format version {found}, expected {expected}")]
    VersionMismatch { found: u16, expected: u16 },

    #[error("cache image truncated")]
    Truncated,

    #[error("unknown constant tag {0}")]
    UnknownTag(u8),

    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),

    #[error("invalid UTF-8 in cache image")]
    InvalidUtf8,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Module loading errors
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("module '{name}' not found (searched {searched:?})")]
    NotFound { name: String, searched: Vec<PathBuf> },

    #[error("failed to compile module '{name}': {source}")]
    Compile {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("bad cache image {path:?}: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: CacheError,
    },

    #[error("i/o error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to materialize module '{name}': {source}")]
    Materialize {
        name: String,
        #[source]
        source: VmError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_allocation_failure_is_fatal() {
        assert!(VmError::from(HeapError::OutOfMemory { capacity: 1 }).is_fatal());
        assert!(!VmError::DivisionByZero.is_fatal());
        assert!(!VmError::from(HeapError::NullAccess).is_fatal());
    }

    #[test]
    fn test_error_value_carries_kind_and_message() {
        let heap = Heap::new(16);
        let value = VmError::DivisionByZero.to_value(&heap).unwrap();
        assert_eq!(
            heap.describe_error(value),
            "DivisionByZero: division by zero"
        );
    }

    #[test]
    fn test_kind_names() {
        let arity = VmError::from(InvocationError::Arity {
            callee: "f".into(),
            expected: "2".into(),
            got: 1,
        });
        assert_eq!(arity.kind_name(), "ArityError");
        assert_eq!(arity.to_string(), "f expects 2 positional argument(s), got 1");
        assert_eq!(VmError::type_error("add", "int + str").kind_name(), "TypeError");
    }
}
