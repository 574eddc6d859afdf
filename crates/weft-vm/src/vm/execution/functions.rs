//! Closure creation, binding and call instruction execution

use crate::error::VmError;
use crate::vm::frame::{CodeFrame, Frame, Slot};
use crate::vm::result::ExecutionResult;
use crate::vm::ExecEnv;
use std::sync::Arc;
use weft_types::{ArgVector, Callable, CaptureSource, Constant, Heap, HeapRef, ObjectKind, OpCode};

impl CodeFrame {
    /// Execute closure and call instructions
    pub(crate) fn execute_functions(
        &mut self,
        env: &ExecEnv,
        opcode: OpCode,
        operand: Option<i64>,
    ) -> Result<ExecutionResult, VmError> {
        match opcode {
            OpCode::MakeClosure => {
                let index = Self::operand(opcode, operand)?;
                let module = Arc::clone(&self.module);
                let template = match module.constant_entry(index)? {
                    Constant::Code(code) => Arc::clone(code),
                    _ => {
                        return Err(VmError::InvalidOperand {
                            opcode: opcode.to_string(),
                            detail: format!("constant {} is not code", index),
                        })
                    }
                };

                let mut captures = Vec::with_capacity(template.captures.len());
                for source in &template.captures {
                    let cell = match *source {
                        CaptureSource::Local(i) => self.box_local(env.heap, i as usize)?,
                        CaptureSource::Capture(i) => *self
                            .captures
                            .get(i as usize)
                            .ok_or_else(|| VmError::InvalidOperand {
                                opcode: opcode.to_string(),
                                detail: format!("no capture {} to re-share", i),
                            })?,
                    };
                    captures.push(cell);
                }

                let code = module.constant(index)?;
                let closure = env
                    .heap
                    .allocate_callable(Callable::code(code, module.id(), captures))?;
                self.push(closure);
            }

            OpCode::Bind => {
                let receiver = self.pop()?;
                let callable = self.pop()?;
                let bound = env.heap.rebind(callable, receiver)?;
                self.push(bound);
            }

            OpCode::Call => {
                let count = Self::count(opcode, operand)?;
                let positional = self.pop_many(count)?;
                let callable = self.pop()?;
                let child = Frame::invoke(env, callable, ArgVector::new(positional))?;
                return Ok(ExecutionResult::Call(child));
            }

            OpCode::CallKw => {
                let count = Self::count(opcode, operand)?;
                let keywords = self.pop()?;
                let positional = self.pop_many(count)?;
                let callable = self.pop()?;
                let args = keyword_args(env.heap, positional, keywords)?;
                let child = Frame::invoke(env, callable, args)?;
                return Ok(ExecutionResult::Call(child));
            }

            _ => unreachable!("Non-function opcode in function handler"),
        }
        Ok(ExecutionResult::Continue)
    }

    /// The capture cell for local `i`, boxing the local on first capture.
    fn box_local(&mut self, heap: &Heap, i: usize) -> Result<HeapRef, VmError> {
        let slot = self.locals.get(i).copied().ok_or_else(|| VmError::InvalidOperand {
            opcode: OpCode::MakeClosure.to_string(),
            detail: format!("no local {} to capture", i),
        })?;
        match slot {
            Slot::Cell(cell) => Ok(cell),
            Slot::Value(value) => {
                let cell = heap.allocate_cell(value)?;
                self.locals[i] = Slot::Cell(cell);
                Ok(cell)
            }
        }
    }

    fn count(opcode: OpCode, operand: Option<i64>) -> Result<usize, VmError> {
        let raw = Self::operand(opcode, operand)?;
        usize::try_from(raw).map_err(|_| VmError::InvalidOperand {
            opcode: opcode.to_string(),
            detail: format!("negative argument count {}", raw),
        })
    }
}

/// Keyword arguments come from the attributes of an object; null means none.
fn keyword_args(
    heap: &Heap,
    positional: Vec<HeapRef>,
    keywords: HeapRef,
) -> Result<ArgVector, VmError> {
    let mut args = ArgVector::new(positional);
    if keywords.is_null() {
        return Ok(args);
    }
    let obj = heap.get(keywords)?;
    if !matches!(obj.kind(), ObjectKind::Object) {
        return Err(VmError::type_error(
            "call",
            format!("keyword arguments must be an object, got {}", obj.type_name()),
        ));
    }
    args.keywords.extend(obj.attr_entries());
    Ok(args)
}
