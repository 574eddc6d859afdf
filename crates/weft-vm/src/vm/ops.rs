//! Value operation helpers
//!
//! Operator semantics are deliberately small: integer arithmetic wraps,
//! mixed int/float promotes to float, strings and arrays concatenate with
//! `Add`, and bitwise operators take integers only.

use crate::error::VmError;
use std::cmp::Ordering;
use std::sync::Arc;
use weft_types::{Heap, HeapRef, ObjectKind, OpCode};

/// Snapshot of an operand's primitive payload.
enum Operand {
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Array(Vec<HeapRef>),
    Other(&'static str),
}

impl Operand {
    fn type_name(&self) -> &'static str {
        match self {
            Operand::Int(_) => "int",
            Operand::Float(_) => "float",
            Operand::Str(_) => "str",
            Operand::Array(_) => "array",
            Operand::Other(name) => name,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Operand::Int(i) => Some(*i as f64),
            Operand::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// Implementation of value operations for the VM
pub(crate) struct ValueOperations<'a> {
    heap: &'a Heap,
}

impl<'a> ValueOperations<'a> {
    pub(crate) fn new(heap: &'a Heap) -> Self {
        Self { heap }
    }

    pub(crate) fn binary(
        &self,
        opcode: OpCode,
        left: HeapRef,
        right: HeapRef,
    ) -> Result<HeapRef, VmError> {
        match opcode {
            OpCode::Eq => return Ok(self.heap.boolean(self.heap.values_equal(left, right))),
            OpCode::Ne => return Ok(self.heap.boolean(!self.heap.values_equal(left, right))),
            _ => {}
        }

        let l = self.operand(left)?;
        let r = self.operand(right)?;
        match opcode {
            OpCode::Add => self.add_values(l, r),
            OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod => self.numeric(opcode, l, r),
            OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge => self.compare(opcode, l, r),
            OpCode::BitAnd | OpCode::BitOr | OpCode::BitXor | OpCode::Shl | OpCode::Shr => {
                self.bitwise(opcode, l, r)
            }
            _ => Err(VmError::InvalidOperand {
                opcode: opcode.to_string(),
                detail: "not a binary operator".to_string(),
            }),
        }
    }

    pub(crate) fn unary(&self, opcode: OpCode, value: HeapRef) -> Result<HeapRef, VmError> {
        if opcode == OpCode::Not {
            return Ok(self.heap.boolean(!self.heap.truthy(value)));
        }
        match (opcode, self.operand(value)?) {
            (OpCode::Neg, Operand::Int(i)) => Ok(self.heap.allocate_int(i.wrapping_neg())?),
            (OpCode::Neg, Operand::Float(f)) => Ok(self.heap.allocate_float(-f)?),
            (OpCode::BitNot, Operand::Int(i)) => Ok(self.heap.allocate_int(!i)?),
            (_, other) => Err(VmError::type_error(
                opcode.name(),
                format!("unsupported operand {}", other.type_name()),
            )),
        }
    }

    fn operand(&self, r: HeapRef) -> Result<Operand, VmError> {
        let obj = self.heap.get(r)?;
        Ok(match obj.kind() {
            ObjectKind::Int(i) => Operand::Int(*i),
            ObjectKind::Float(f) => Operand::Float(*f),
            ObjectKind::Str(s) => Operand::Str(Arc::clone(s)),
            ObjectKind::Array(items) => Operand::Array(items.read().clone()),
            other => Operand::Other(other.type_name()),
        })
    }

    fn add_values(&self, left: Operand, right: Operand) -> Result<HeapRef, VmError> {
        match (left, right) {
            (Operand::Int(a), Operand::Int(b)) => Ok(self.heap.allocate_int(a.wrapping_add(b))?),
            (Operand::Str(a), Operand::Str(b)) => {
                Ok(self.heap.allocate_str(&format!("{}{}", a, b))?)
            }
            (Operand::Array(mut a), Operand::Array(b)) => {
                a.extend(b);
                Ok(self.heap.allocate_array(a)?)
            }
            (l, r) => match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => Ok(self.heap.allocate_float(a + b)?),
                _ => Err(mismatch(OpCode::Add, &l, &r)),
            },
        }
    }

    fn numeric(&self, opcode: OpCode, left: Operand, right: Operand) -> Result<HeapRef, VmError> {
        if let (Operand::Int(a), Operand::Int(b)) = (&left, &right) {
            let (a, b) = (*a, *b);
            let value = match opcode {
                OpCode::Sub => a.wrapping_sub(b),
                OpCode::Mul => a.wrapping_mul(b),
                OpCode::Div | OpCode::Mod if b == 0 => return Err(VmError::DivisionByZero),
                OpCode::Div => a.wrapping_div(b),
                _ => a.wrapping_rem(b),
            };
            return Ok(self.heap.allocate_int(value)?);
        }

        let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
            return Err(mismatch(opcode, &left, &right));
        };
        let value = match opcode {
            OpCode::Sub => a - b,
            OpCode::Mul => a * b,
            OpCode::Div | OpCode::Mod if b == 0.0 => return Err(VmError::DivisionByZero),
            OpCode::Div => a / b,
            _ => a % b,
        };
        Ok(self.heap.allocate_float(value)?)
    }

    fn compare(&self, opcode: OpCode, left: Operand, right: Operand) -> Result<HeapRef, VmError> {
        let ordering = match (&left, &right) {
            (Operand::Int(a), Operand::Int(b)) => Some(a.cmp(b)),
            (Operand::Str(a), Operand::Str(b)) => Some(a.cmp(b)),
            _ => match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => return Err(mismatch(opcode, &left, &right)),
            },
        };
        // NaN compares false both ways
        let result = ordering.is_some_and(|o| match opcode {
            OpCode::Lt => o == Ordering::Less,
            OpCode::Le => o != Ordering::Greater,
            OpCode::Gt => o == Ordering::Greater,
            _ => o != Ordering::Less,
        });
        Ok(self.heap.boolean(result))
    }

    fn bitwise(&self, opcode: OpCode, left: Operand, right: Operand) -> Result<HeapRef, VmError> {
        let (Operand::Int(a), Operand::Int(b)) = (&left, &right) else {
            return Err(mismatch(opcode, &left, &right));
        };
        let (a, b) = (*a, *b);
        let value = match opcode {
            OpCode::BitAnd => a & b,
            OpCode::BitOr => a | b,
            OpCode::BitXor => a ^ b,
            OpCode::Shl | OpCode::Shr if !(0..64).contains(&b) => {
                return Err(VmError::type_error(
                    opcode.name(),
                    format!("shift amount {} out of range", b),
                ))
            }
            OpCode::Shl => a << b,
            _ => a >> b,
        };
        Ok(self.heap.allocate_int(value)?)
    }
}

fn mismatch(opcode: OpCode, left: &Operand, right: &Operand) -> VmError {
    VmError::type_error(
        opcode.name(),
        format!("unsupported operands {} and {}", left.type_name(), right.type_name()),
    )
}
