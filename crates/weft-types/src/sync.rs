//! Synchronization aliases used across the runtime.
//!
//! parking_lot locks never poison, so guards are taken without `Result`
//! plumbing. Heap objects, arrays and capture cells all sit behind these.

pub use parking_lot::{Condvar, Mutex, RwLock};
