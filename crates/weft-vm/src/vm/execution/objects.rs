//! Attribute, indexing and construction instruction execution

use crate::error::VmError;
use crate::vm::frame::CodeFrame;
use crate::vm::result::ExecutionResult;
use crate::vm::ExecEnv;
use std::sync::Arc;
use weft_types::{Constant, Heap, HeapError, HeapRef, ObjectKind, OpCode};

impl CodeFrame {
    /// Execute attribute, indexing and construction instructions
    pub(crate) fn execute_objects(
        &mut self,
        env: &ExecEnv,
        opcode: OpCode,
        operand: Option<i64>,
    ) -> Result<ExecutionResult, VmError> {
        let heap = env.heap;
        match opcode {
            OpCode::LoadAttr => {
                let module = Arc::clone(&self.module);
                let name = module.name_at(Self::operand(opcode, operand)?)?;
                let target = self.pop()?;
                let value = heap
                    .get_attr(target, name)?
                    .ok_or_else(|| missing(name))?;
                self.push(value);
            }

            OpCode::StoreAttr | OpCode::StoreConstAttr => {
                let module = Arc::clone(&self.module);
                let name = module.name_at(Self::operand(opcode, operand)?)?;
                let value = self.pop()?;
                let target = self.pop()?;
                if opcode == OpCode::StoreConstAttr {
                    heap.define_const(target, name, value)?;
                } else {
                    heap.set_attr(target, name, value)?;
                }
                self.push(target);
            }

            OpCode::DeleteAttr => {
                let module = Arc::clone(&self.module);
                let name = module.name_at(Self::operand(opcode, operand)?)?;
                let target = self.pop()?;
                heap.remove_attr(target, name)?
                    .ok_or_else(|| missing(name))?;
                self.push(target);
            }

            OpCode::LoadIndex => {
                let index = self.pop()?;
                let target = self.pop()?;
                let value = load_index(heap, target, index)?;
                self.push(value);
            }

            OpCode::StoreIndex => {
                let value = self.pop()?;
                let index = self.pop()?;
                let target = self.pop()?;
                store_index(heap, target, index, value)?;
                self.push(target);
            }

            OpCode::MakeArray => {
                let count = usize::try_from(Self::operand(opcode, operand)?).map_err(|_| {
                    VmError::InvalidOperand {
                        opcode: opcode.to_string(),
                        detail: "negative element count".to_string(),
                    }
                })?;
                let items = self.pop_many(count)?;
                let array = heap.allocate_array(items)?;
                self.push(array);
            }

            OpCode::MakeObject => {
                let obj = heap.allocate_object()?;
                self.push(obj);
            }

            OpCode::MakeRecord => {
                let module = Arc::clone(&self.module);
                let template = match module.constant_entry(Self::operand(opcode, operand)?)? {
                    Constant::RecordTemplate(template) => template,
                    _ => {
                        return Err(VmError::InvalidOperand {
                            opcode: opcode.to_string(),
                            detail: "constant is not a record template".to_string(),
                        })
                    }
                };
                let values = self.pop_many(template.fields.len())?;
                let record = heap.allocate_object()?;
                for (field, value) in template.fields.iter().zip(values) {
                    heap.set_attr(record, field, value)?;
                }
                heap.seal(record)?;
                self.push(record);
            }

            OpCode::Seal => {
                let target = self.peek()?;
                heap.seal(target)?;
            }

            _ => unreachable!("Non-object opcode in object handler"),
        }
        Ok(ExecutionResult::Continue)
    }
}

fn missing(name: &str) -> VmError {
    HeapError::MissingAttribute {
        name: name.to_string(),
    }
    .into()
}

/// Element or attribute read: string keys read attributes, integer keys
/// index arrays and strings.
fn load_index(heap: &Heap, target: HeapRef, index: HeapRef) -> Result<HeapRef, VmError> {
    if let Some(name) = heap.str_value(index) {
        return heap.get_attr(target, &name)?.ok_or_else(|| missing(&name));
    }
    let Some(i) = heap.int_value(index) else {
        return Err(VmError::type_error(
            "index",
            format!("cannot index with {}", heap.type_name(index)),
        ));
    };

    let obj = heap.get(target)?;
    match obj.kind() {
        ObjectKind::Array(items) => {
            let items = items.read();
            position(i, items.len()).map(|p| items[p])
        }
        ObjectKind::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let p = position(i, chars.len())?;
            Ok(heap.allocate_str(&chars[p].to_string())?)
        }
        other => Err(VmError::type_error(
            "index",
            format!("{} is not indexable by int", other.type_name()),
        )),
    }
}

fn store_index(
    heap: &Heap,
    target: HeapRef,
    index: HeapRef,
    value: HeapRef,
) -> Result<(), VmError> {
    if let Some(name) = heap.str_value(index) {
        return Ok(heap.set_attr(target, &name, value)?);
    }
    let Some(i) = heap.int_value(index) else {
        return Err(VmError::type_error(
            "index",
            format!("cannot index with {}", heap.type_name(index)),
        ));
    };
    let len = heap
        .array_items(target)
        .map(|items| items.len())
        .ok_or_else(|| {
            VmError::type_error(
                "index",
                format!("{} does not support item assignment", heap.type_name(target)),
            )
        })?;
    let p = position(i, len)?;
    if heap.array_set(target, p, value)? {
        Ok(())
    } else {
        Err(VmError::IndexOutOfRange { index: i, len })
    }
}

fn position(index: i64, len: usize) -> Result<usize, VmError> {
    usize::try_from(index)
        .ok()
        .filter(|&p| p < len)
        .ok_or(VmError::IndexOutOfRange { index, len })
}
