//! Built-in functions
//!
//! Everything here is registered in the native module `core`:
//! - utils: print, len, type_of, seal, keys
//! - concurrency: spawn, join, sleep

pub mod concurrency;
pub mod registry;
pub mod utils;

use crate::error::{InvocationError, VmError};
use crate::loader::{ModuleLoader, NativeModule};
use registry::NATIVE_ARG_OFFSET;
use weft_types::{ArgVector, HeapRef};

/// Name of the native module holding the built-ins.
pub const CORE_MODULE: &str = "core";

/// Register the built-in module with `loader`.
pub fn install(loader: &ModuleLoader) {
    let module = NativeModule::new(CORE_MODULE)
        .function("print", utils::vm_print)
        .function("len", utils::vm_len)
        .function("type_of", utils::vm_type_of)
        .function("seal", utils::vm_seal)
        .function("keys", utils::vm_keys)
        .function("spawn", concurrency::vm_spawn)
        .function("join", concurrency::vm_join)
        .function("sleep", concurrency::vm_sleep);
    loader.register_native_module(module);
}

/// User arguments of a native call.
pub(crate) fn user_args(args: &ArgVector) -> &[HeapRef] {
    args.positional.get(NATIVE_ARG_OFFSET..).unwrap_or(&[])
}

/// User arguments, which must number exactly `expected`.
pub(crate) fn exact_args<'a>(
    callee: &str,
    args: &'a ArgVector,
    expected: usize,
) -> Result<&'a [HeapRef], VmError> {
    let user = user_args(args);
    if user.len() != expected {
        return Err(InvocationError::Arity {
            callee: callee.to_string(),
            expected: expected.to_string(),
            got: user.len(),
        }
        .into());
    }
    Ok(user)
}
