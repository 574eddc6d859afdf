//! Stack, constant and variable instruction execution

use crate::error::VmError;
use crate::vm::frame::{CodeFrame, Slot};
use crate::vm::result::ExecutionResult;
use crate::vm::ExecEnv;
use weft_types::{HeapRef, OpCode};

impl CodeFrame {
    /// Execute stack, constant and variable instructions
    pub(crate) fn execute_variables(
        &mut self,
        env: &ExecEnv,
        opcode: OpCode,
        operand: Option<i64>,
    ) -> Result<ExecutionResult, VmError> {
        match opcode {
            OpCode::Nop => {}

            OpCode::Pop => {
                self.pop()?;
            }

            OpCode::Dup => {
                let top = self.peek()?;
                self.push(top);
            }

            OpCode::Swap => {
                let a = self.pop()?;
                let b = self.pop()?;
                self.push(a);
                self.push(b);
            }

            OpCode::LoadConst => {
                let value = self.module.constant(Self::operand(opcode, operand)?)?;
                self.push(value);
            }

            OpCode::LoadNull => self.push(HeapRef::NULL),
            OpCode::LoadTrue => self.push(env.heap.boolean(true)),
            OpCode::LoadFalse => self.push(env.heap.boolean(false)),

            OpCode::LoadInt => {
                let value = env.heap.allocate_int(Self::operand(opcode, operand)?)?;
                self.push(value);
            }

            OpCode::LoadLocal => {
                let i = Self::index(opcode, operand, self.locals.len())?;
                let value = match self.locals[i] {
                    Slot::Value(v) => v,
                    Slot::Cell(cell) => env.heap.cell_get(cell)?,
                };
                self.push(value);
            }

            OpCode::StoreLocal => {
                let i = Self::index(opcode, operand, self.locals.len())?;
                let value = self.pop()?;
                match self.locals[i] {
                    Slot::Value(_) => self.locals[i] = Slot::Value(value),
                    Slot::Cell(cell) => env.heap.cell_set(cell, value)?,
                }
            }

            OpCode::LoadCapture => {
                let i = Self::index(opcode, operand, self.captures.len())?;
                let value = env.heap.cell_get(self.captures[i])?;
                self.push(value);
            }

            OpCode::StoreCapture => {
                let i = Self::index(opcode, operand, self.captures.len())?;
                let value = self.pop()?;
                env.heap.cell_set(self.captures[i], value)?;
            }

            OpCode::LoadGlobal => {
                let value = self.module.global(Self::operand(opcode, operand)?)?;
                self.push(value);
            }

            OpCode::StoreGlobal => {
                let index = Self::operand(opcode, operand)?;
                let value = self.pop()?;
                self.module.set_global(index, value)?;
            }

            OpCode::LoadSelf => self.push(self.receiver),

            _ => unreachable!("Non-variable opcode in variable handler"),
        }
        Ok(ExecutionResult::Continue)
    }
}
