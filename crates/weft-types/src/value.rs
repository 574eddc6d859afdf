//! Handles into the heap arena and the runtime's small id types.

use std::fmt;

/// A copyable handle to a heap slot.
///
/// Every runtime value is a `HeapRef`. Slot 0 always holds the canonical null,
/// so `HeapRef::NULL` is valid without consulting the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapRef(u32);

impl HeapRef {
    pub const NULL: HeapRef = HeapRef(0);

    pub fn from_index(index: usize) -> Self {
        HeapRef(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl Default for HeapRef {
    fn default() -> Self {
        HeapRef::NULL
    }
}

impl fmt::Display for HeapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies a materialized module in the runtime's module table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub u32);

/// Identifies a registered native function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeId(pub u32);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

impl fmt::Display for NativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "native#{}", self.0)
    }
}
