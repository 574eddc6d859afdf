//! Call frames
//!
//! A [`CodeFrame`] interprets a code object against its module; a
//! [`NativeFrame`] runs a native function once and, if the native returned a
//! pending completion, waits for it.

use crate::builtins::registry::{NativeContext, NativeFn, NativeReturn};
use crate::error::{InvocationError, VmError};
use crate::module::Module;
use crate::vm::result::{ExecutionResult, FrameStep};
use crate::vm::ExecEnv;
use std::sync::Arc;
use weft_types::{
    ArgVector, CallTarget, CodeObject, Completion, Heap, HeapError, HeapRef, OpCode, RootSource,
};

/// Instructions a code frame runs per advance before yielding.
pub const INSTRUCTION_SLICE: usize = 256;

/// A local variable, either held directly or boxed in a capture cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Value(HeapRef),
    Cell(HeapRef),
}

pub struct CodeFrame {
    pub(crate) callable: HeapRef,
    pub(crate) code: Arc<CodeObject>,
    pub(crate) module: Arc<Module>,
    pub(crate) receiver: HeapRef,
    pub(crate) operands: Vec<HeapRef>,
    pub(crate) locals: Vec<Slot>,
    pub(crate) captures: Vec<HeapRef>,
    pub(crate) ip: usize,
    pending_error: Option<HeapRef>,
}

pub struct NativeFrame {
    callable: HeapRef,
    receiver: HeapRef,
    name: String,
    func: NativeFn,
    args: ArgVector,
    pending: Option<Completion>,
}

pub enum Frame {
    Code(CodeFrame),
    Native(NativeFrame),
}

impl Frame {
    /// Build the frame that runs `callable` with `args`.
    ///
    /// Binding failures are returned to the caller, which raises them at the
    /// call site.
    pub fn invoke(env: &ExecEnv, callable: HeapRef, args: ArgVector) -> Result<Frame, VmError> {
        let target = env.heap.callable(callable).ok_or_else(|| {
            VmError::type_error(
                "call",
                format!("{} is not callable", env.heap.type_name(callable)),
            )
        })?;

        match target.target {
            CallTarget::Native(id) => {
                let entry = env.natives.get(id)?;
                let mut positional = Vec::with_capacity(args.positional.len() + 2);
                positional.push(callable);
                positional.push(target.receiver);
                positional.extend(args.positional);
                Ok(Frame::Native(NativeFrame {
                    callable,
                    receiver: target.receiver,
                    name: entry.name,
                    func: entry.func,
                    args: ArgVector {
                        positional,
                        keywords: args.keywords,
                    },
                    pending: None,
                }))
            }
            CallTarget::Code(code_ref) => {
                let code = env.heap.code(code_ref).ok_or(HeapError::WrongKind {
                    expected: "code",
                    found: env.heap.type_name(code_ref),
                })?;
                let module_id = target
                    .module
                    .ok_or_else(|| VmError::unsupported("code callable without a module"))?;
                let module = env
                    .modules
                    .get(module_id)
                    .ok_or_else(|| VmError::unsupported(format!("{} is not loaded", module_id)))?;
                let locals = bind_arguments(&code, args, env.heap)?;

                Ok(Frame::Code(CodeFrame {
                    callable,
                    code,
                    module,
                    receiver: target.receiver,
                    operands: Vec::new(),
                    locals,
                    captures: target.captures,
                    ip: 0,
                    pending_error: None,
                }))
            }
        }
    }

    pub fn advance(
        &mut self,
        env: &ExecEnv,
        fiber: u64,
        budget: usize,
    ) -> Result<FrameStep, VmError> {
        match self {
            Frame::Code(frame) => frame.advance(env, budget),
            Frame::Native(frame) => frame.advance(env, fiber),
        }
    }

    /// Deliver a child's return value.
    pub fn resume(&mut self, value: HeapRef) {
        if let Frame::Code(frame) = self {
            frame.operands.push(value);
        }
    }

    /// Deliver an error raised by a child. The frame handles it at the call
    /// site or completes with it on its next advance.
    pub fn deliver_error(&mut self, error: HeapRef) {
        match self {
            Frame::Code(frame) => {
                let call_site = frame.ip.saturating_sub(1);
                if !frame.intercept(call_site, error) {
                    frame.pending_error = Some(error);
                }
            }
            Frame::Native(frame) => frame.pending = Some(Completion::resolved(Err(error))),
        }
    }

    /// The completion a native frame is still waiting on.
    pub(crate) fn pending(&self) -> Option<&Completion> {
        match self {
            Frame::Native(frame) => frame.pending.as_ref().filter(|c| !c.is_resolved()),
            Frame::Code(_) => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Frame::Code(frame) => frame.code.display_name(),
            Frame::Native(frame) => &frame.name,
        }
    }
}

impl RootSource for Frame {
    fn roots(&self, out: &mut Vec<HeapRef>) {
        match self {
            Frame::Code(frame) => {
                out.push(frame.callable);
                out.push(frame.receiver);
                out.extend(frame.operands.iter().copied());
                out.extend(frame.locals.iter().map(|slot| match *slot {
                    Slot::Value(v) | Slot::Cell(v) => v,
                }));
                out.extend(frame.captures.iter().copied());
                out.extend(frame.pending_error);
            }
            Frame::Native(frame) => {
                out.push(frame.callable);
                out.push(frame.receiver);
                out.extend(frame.args.values());
                if let Some(Ok(v) | Err(v)) = frame.pending.as_ref().and_then(|c| c.poll()) {
                    out.push(v);
                }
            }
        }
    }
}

impl CodeFrame {
    fn advance(&mut self, env: &ExecEnv, budget: usize) -> Result<FrameStep, VmError> {
        if let Some(error) = self.pending_error.take() {
            return Ok(FrameStep::Raise(error));
        }

        for _ in 0..budget {
            let fault_ip = self.ip;
            let error = match self.step(env) {
                Ok(ExecutionResult::Continue) => continue,
                Ok(ExecutionResult::Call(child)) => return Ok(FrameStep::Call(Box::new(child))),
                Ok(ExecutionResult::Return(value)) => return Ok(FrameStep::Return(value)),
                Ok(ExecutionResult::Raise(error)) => error,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => err.to_value(env.heap)?,
            };
            if !self.intercept(fault_ip, error) {
                return Ok(FrameStep::Raise(error));
            }
        }
        Ok(FrameStep::Yield)
    }

    /// Execute a single instruction
    fn step(&mut self, env: &ExecEnv) -> Result<ExecutionResult, VmError> {
        let (opcode, operand) = match self.code.instructions.get(self.ip) {
            Some(instruction) => (instruction.opcode, instruction.operand),
            // Falling off the end returns null
            None => return Ok(ExecutionResult::Return(HeapRef::NULL)),
        };
        self.ip += 1;

        match opcode {
            OpCode::Nop
            | OpCode::Pop
            | OpCode::Dup
            | OpCode::Swap
            | OpCode::LoadConst
            | OpCode::LoadNull
            | OpCode::LoadTrue
            | OpCode::LoadFalse
            | OpCode::LoadInt
            | OpCode::LoadLocal
            | OpCode::StoreLocal
            | OpCode::LoadCapture
            | OpCode::StoreCapture
            | OpCode::LoadGlobal
            | OpCode::StoreGlobal
            | OpCode::LoadSelf => self.execute_variables(env, opcode, operand),

            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Neg
            | OpCode::Eq
            | OpCode::Ne
            | OpCode::Lt
            | OpCode::Le
            | OpCode::Gt
            | OpCode::Ge
            | OpCode::Not
            | OpCode::BitAnd
            | OpCode::BitOr
            | OpCode::BitXor
            | OpCode::Shl
            | OpCode::Shr
            | OpCode::BitNot => self.execute_arithmetic(env, opcode),

            OpCode::LoadAttr
            | OpCode::StoreAttr
            | OpCode::StoreConstAttr
            | OpCode::DeleteAttr
            | OpCode::LoadIndex
            | OpCode::StoreIndex
            | OpCode::MakeArray
            | OpCode::MakeObject
            | OpCode::MakeRecord
            | OpCode::Seal => self.execute_objects(env, opcode, operand),

            OpCode::Jump
            | OpCode::JumpIfTrue
            | OpCode::JumpIfFalse
            | OpCode::Return
            | OpCode::Raise => self.execute_control(env, opcode, operand),

            OpCode::MakeClosure | OpCode::Bind | OpCode::Call | OpCode::CallKw => {
                self.execute_functions(env, opcode, operand)
            }
        }
    }

    /// Route an error raised at `fault_ip` to a handler. Returns false if
    /// nothing covers it.
    fn intercept(&mut self, fault_ip: usize, error: HeapRef) -> bool {
        match self.code.handler_for(fault_ip) {
            Some(target) => {
                self.operands.clear();
                self.operands.push(error);
                self.ip = target as usize;
                true
            }
            None => false,
        }
    }

    // ===== Helper methods =====

    pub(crate) fn push(&mut self, value: HeapRef) {
        self.operands.push(value);
    }

    pub(crate) fn pop(&mut self) -> Result<HeapRef, VmError> {
        self.operands.pop().ok_or(VmError::StackUnderflow)
    }

    pub(crate) fn peek(&self) -> Result<HeapRef, VmError> {
        self.operands.last().copied().ok_or(VmError::StackUnderflow)
    }

    /// Pop the top `count` operands, oldest first.
    pub(crate) fn pop_many(&mut self, count: usize) -> Result<Vec<HeapRef>, VmError> {
        let start = self
            .operands
            .len()
            .checked_sub(count)
            .ok_or(VmError::StackUnderflow)?;
        Ok(self.operands.split_off(start))
    }

    pub(crate) fn operand(opcode: OpCode, operand: Option<i64>) -> Result<i64, VmError> {
        operand.ok_or_else(|| VmError::InvalidOperand {
            opcode: opcode.to_string(),
            detail: "missing operand".to_string(),
        })
    }

    /// Operand as an index below `len`.
    pub(crate) fn index(opcode: OpCode, operand: Option<i64>, len: usize) -> Result<usize, VmError> {
        let raw = Self::operand(opcode, operand)?;
        usize::try_from(raw)
            .ok()
            .filter(|&i| i < len)
            .ok_or_else(|| VmError::InvalidOperand {
                opcode: opcode.to_string(),
                detail: format!("index {} out of range 0..{}", raw, len),
            })
    }
}

impl NativeFrame {
    fn advance(&mut self, env: &ExecEnv, fiber: u64) -> Result<FrameStep, VmError> {
        if self.pending.is_none() {
            let mut ctx = NativeContext::new(fiber, env.heap, env.spawner);
            match (self.func)(&mut ctx, self.receiver, self.callable, &self.args) {
                Ok(NativeReturn::Ready(value)) => return Ok(FrameStep::Return(value)),
                Ok(NativeReturn::Pending(completion)) => self.pending = Some(completion),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => return Ok(FrameStep::Raise(err.to_value(env.heap)?)),
            }
        }

        match self.pending.as_ref().and_then(|c| c.poll()) {
            Some(Ok(value)) => Ok(FrameStep::Return(value)),
            Some(Err(error)) => Ok(FrameStep::Raise(error)),
            None => Ok(FrameStep::Blocked),
        }
    }
}

/// Bind arguments into a fresh local vector laid out as
/// `[positional.., named.., *varargs?, **varkw?, rest..]`.
fn bind_arguments(code: &CodeObject, args: ArgVector, heap: &Heap) -> Result<Vec<Slot>, VmError> {
    let signature = &code.signature;
    let expected = signature.positional as usize;
    let got = args.positional.len();
    if got < expected || (got > expected && !signature.variadic) {
        return Err(InvocationError::Arity {
            callee: code.display_name().to_string(),
            expected: if signature.variadic {
                format!("at least {}", expected)
            } else {
                expected.to_string()
            },
            got,
        }
        .into());
    }

    let size = (code.local_count as usize).max(signature.param_slots());
    let mut locals = vec![Slot::Value(HeapRef::NULL); size];
    let mut positional = args.positional.into_iter();
    for slot in locals.iter_mut().take(expected) {
        if let Some(value) = positional.next() {
            *slot = Slot::Value(value);
        }
    }

    let mut extra_keywords = Vec::new();
    for (name, value) in args.keywords {
        match signature.named.iter().position(|n| *n == name) {
            Some(i) => locals[expected + i] = Slot::Value(value),
            None if signature.variadic_keywords => extra_keywords.push((name, value)),
            None => {
                return Err(InvocationError::UnexpectedKeyword {
                    callee: code.display_name().to_string(),
                    name,
                }
                .into())
            }
        }
    }

    let mut next = expected + signature.named.len();
    if signature.variadic {
        locals[next] = Slot::Value(heap.allocate_array(positional.collect())?);
        next += 1;
    }
    if signature.variadic_keywords {
        let kwargs = heap.allocate_object()?;
        for (name, value) in extra_keywords {
            heap.set_attr(kwargs, &name, value)?;
        }
        locals[next] = Slot::Value(kwargs);
    }
    Ok(locals)
}
