//! Value inspection and output built-ins

use super::exact_args;
use super::registry::{NativeContext, NativeReturn};
use super::user_args;
use crate::error::VmError;
use weft_types::{ArgVector, HeapRef, ObjectKind};

/// print(*values) -> null
///
/// Writes the values to stdout separated by spaces.
pub fn vm_print(
    ctx: &mut NativeContext,
    _receiver: HeapRef,
    _callable: HeapRef,
    args: &ArgVector,
) -> Result<NativeReturn, VmError> {
    let line: Vec<String> = user_args(args)
        .iter()
        .map(|&value| ctx.heap.display(value))
        .collect();
    println!("{}", line.join(" "));
    Ok(NativeReturn::Ready(HeapRef::NULL))
}

/// len(value) -> int
///
/// Characters of a string, elements of an array, attributes of anything
/// else that has them.
pub fn vm_len(
    ctx: &mut NativeContext,
    _receiver: HeapRef,
    _callable: HeapRef,
    args: &ArgVector,
) -> Result<NativeReturn, VmError> {
    let value = exact_args("len", args, 1)?[0];
    let object = ctx.heap.get(value)?;
    let len = match object.kind() {
        ObjectKind::Str(s) => s.chars().count(),
        ObjectKind::Array(items) => items.read().len(),
        ObjectKind::Object => object.attr_count(),
        _ => {
            return Err(VmError::type_error(
                "len",
                format!("{} has no length", object.type_name()),
            ))
        }
    };
    Ok(NativeReturn::Ready(ctx.heap.allocate_int(len as i64)?))
}

/// type_of(value) -> str
pub fn vm_type_of(
    ctx: &mut NativeContext,
    _receiver: HeapRef,
    _callable: HeapRef,
    args: &ArgVector,
) -> Result<NativeReturn, VmError> {
    let value = exact_args("type_of", args, 1)?[0];
    let name = ctx.heap.type_name(value);
    Ok(NativeReturn::Ready(ctx.heap.allocate_str(name)?))
}

/// seal(object) -> object
pub fn vm_seal(
    ctx: &mut NativeContext,
    _receiver: HeapRef,
    _callable: HeapRef,
    args: &ArgVector,
) -> Result<NativeReturn, VmError> {
    let value = exact_args("seal", args, 1)?[0];
    ctx.heap.seal(value)?;
    Ok(NativeReturn::Ready(value))
}

/// keys(object) -> array of attribute names in insertion order
pub fn vm_keys(
    ctx: &mut NativeContext,
    _receiver: HeapRef,
    _callable: HeapRef,
    args: &ArgVector,
) -> Result<NativeReturn, VmError> {
    let value = exact_args("keys", args, 1)?[0];
    let object = ctx.heap.get(value)?;
    if object.is_null() {
        return Err(weft_types::HeapError::NullAccess.into());
    }
    let names = object
        .attr_entries()
        .into_iter()
        .map(|(name, _)| ctx.heap.allocate_str(&name))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(NativeReturn::Ready(ctx.heap.allocate_array(names)?))
}
