//! Concurrency built-ins
//!
//! Futures are heap values wrapping a [`Completion`]. A native that returns
//! [`NativeReturn::Pending`] parks its frame; the scheduler takes the fiber
//! off the queue until the completion resolves.

use super::registry::{NativeContext, NativeReturn};
use super::{exact_args, user_args};
use crate::error::{InvocationError, VmError};
use std::thread;
use std::time::Duration;
use weft_types::{ArgVector, Completion, HeapRef};

/// spawn(f, *args, **kwargs) -> future
///
/// Runs `f` on a new fiber. The future resolves with its return value, or
/// with its uncaught error.
pub fn vm_spawn(
    ctx: &mut NativeContext,
    _receiver: HeapRef,
    _callable: HeapRef,
    args: &ArgVector,
) -> Result<NativeReturn, VmError> {
    let (&callable, rest) =
        user_args(args)
            .split_first()
            .ok_or_else(|| InvocationError::Arity {
                callee: "spawn".to_string(),
                expected: "at least 1".to_string(),
                got: 0,
            })?;
    let forwarded = ArgVector {
        positional: rest.to_vec(),
        keywords: args.keywords.clone(),
    };
    let completion = ctx.spawn(callable, forwarded)?;
    Ok(NativeReturn::Ready(ctx.heap.allocate_future(completion)?))
}

/// join(future) -> value
///
/// Waits for the future. An error the spawned fiber did not catch is raised
/// again in the joining fiber.
pub fn vm_join(
    ctx: &mut NativeContext,
    _receiver: HeapRef,
    _callable: HeapRef,
    args: &ArgVector,
) -> Result<NativeReturn, VmError> {
    let future = exact_args("join", args, 1)?[0];
    let completion = ctx.heap.completion(future).ok_or_else(|| {
        VmError::type_error(
            "join",
            format!("expected future, got {}", ctx.heap.type_name(future)),
        )
    })?;
    Ok(NativeReturn::Pending(completion))
}

/// sleep(ms) -> null
///
/// Resolves from a timer thread; the fiber yields its worker meanwhile.
pub fn vm_sleep(
    ctx: &mut NativeContext,
    _receiver: HeapRef,
    _callable: HeapRef,
    args: &ArgVector,
) -> Result<NativeReturn, VmError> {
    let ms = exact_args("sleep", args, 1)?[0];
    let ms = ctx.heap.int_value(ms).ok_or_else(|| {
        VmError::type_error(
            "sleep",
            format!("expected int milliseconds, got {}", ctx.heap.type_name(ms)),
        )
    })?;
    if ms <= 0 {
        return Ok(NativeReturn::Ready(HeapRef::NULL));
    }

    let completion = Completion::new();
    let timer = completion.clone();
    thread::Builder::new()
        .name(format!("weft-timer-{}", ctx.fiber))
        .spawn(move || {
            thread::sleep(Duration::from_millis(ms as u64));
            timer.resolve(Ok(HeapRef::NULL));
        })
        .map_err(|err| VmError::unsupported(format!("cannot start timer: {}", err)))?;
    Ok(NativeReturn::Pending(completion))
}
