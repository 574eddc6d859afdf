//! Arithmetic, comparison and bitwise instruction execution

use crate::error::VmError;
use crate::vm::frame::CodeFrame;
use crate::vm::ops::ValueOperations;
use crate::vm::result::ExecutionResult;
use crate::vm::ExecEnv;
use weft_types::OpCode;

impl CodeFrame {
    /// Execute operator instructions
    pub(crate) fn execute_arithmetic(
        &mut self,
        env: &ExecEnv,
        opcode: OpCode,
    ) -> Result<ExecutionResult, VmError> {
        let ops = ValueOperations::new(env.heap);
        let result = match opcode {
            OpCode::Neg | OpCode::Not | OpCode::BitNot => {
                let value = self.pop()?;
                ops.unary(opcode, value)?
            }
            _ => {
                let right = self.pop()?;
                let left = self.pop()?;
                ops.binary(opcode, left, right)?
            }
        };
        self.push(result);
        Ok(ExecutionResult::Continue)
    }
}
