//! Weft Virtual Machine
//!
//! This crate runs compiled Weft modules. Code executes on a stack-based
//! interpreter whose frames live on an explicit per-fiber stack, so any fiber
//! can be suspended between frame advances and resumed on another thread.
//!
//! # Architecture
//!
//! - Fibers are multiplexed over a bounded pool of worker threads
//! - Calls push child frames instead of recursing on the host stack
//! - A mark-and-sweep collector runs between bursts, never mid-frame
//! - Modules are compiled once and cached as versioned binary images
//!
//! # Modules
//!
//! - `vm`: Frames, instruction handlers and fibers
//! - `scheduler`: Worker pool, fiber handles and collection safe points
//! - `module`: Materialized modules and the module table
//! - `loader`: Module resolution, compilation and cache reuse
//! - `cache`: Binary module cache format
//! - `builtins`: Native function registry and the `core` module
//! - `runtime`: Shared runtime state and the embedding façade
//! - `config`: Startup configuration
//! - `logging`: Tracing subscriber setup
//! - `error`: Error types for execution, loading and caching

#![allow(clippy::result_large_err)]

pub mod builtins;
pub mod cache;
pub mod config;
pub mod error;
pub mod loader;
pub mod logging;
pub mod module;
pub mod runtime;
pub mod scheduler;
pub mod vm;

// Re-export main types
pub use builtins::registry::{NativeContext, NativeFn, NativeRegistry, NativeReturn};
pub use cache::CachedModule;
pub use config::{ConfigError, RuntimeConfig};
pub use error::{CacheError, InvocationError, LoadError, VmError};
pub use loader::{Compiler, ModuleLoader, NativeModule, NoCompiler};
pub use module::{Module, ModuleOrigin, ModuleTable};
pub use runtime::{Rooted, Runtime, RuntimeCore};
pub use scheduler::{FiberHandle, Scheduler};
pub use vm::{Fiber, FiberId, FiberOutcome, FiberStatus};

#[cfg(test)]
mod tests;
