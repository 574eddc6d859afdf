//! Control flow instruction execution

use crate::error::VmError;
use crate::vm::frame::CodeFrame;
use crate::vm::result::ExecutionResult;
use crate::vm::ExecEnv;
use weft_types::{HeapRef, OpCode};

impl CodeFrame {
    /// Execute jumps and frame completion
    pub(crate) fn execute_control(
        &mut self,
        env: &ExecEnv,
        opcode: OpCode,
        operand: Option<i64>,
    ) -> Result<ExecutionResult, VmError> {
        match opcode {
            OpCode::Jump => {
                self.ip = self.jump_target(opcode, operand)?;
            }

            OpCode::JumpIfTrue | OpCode::JumpIfFalse => {
                let target = self.jump_target(opcode, operand)?;
                let condition = self.pop()?;
                if env.heap.truthy(condition) == (opcode == OpCode::JumpIfTrue) {
                    self.ip = target;
                }
            }

            OpCode::Return => {
                let value = self.operands.pop().unwrap_or(HeapRef::NULL);
                return Ok(ExecutionResult::Return(value));
            }

            OpCode::Raise => {
                let error = self.pop()?;
                return Ok(ExecutionResult::Raise(error));
            }

            _ => unreachable!("Non-control opcode in control handler"),
        }
        Ok(ExecutionResult::Continue)
    }

    /// A target equal to the instruction count ends the frame with null.
    fn jump_target(&self, opcode: OpCode, operand: Option<i64>) -> Result<usize, VmError> {
        Self::index(opcode, operand, self.code.instructions.len() + 1)
    }
}
