//! Code objects and the builder used to assemble them.
//!
//! A [`CodeObject`] is immutable once built and shared behind an `Arc` by
//! every callable created from it. Jump targets and handler ranges are
//! absolute instruction offsets; [`CodeBuilder`] resolves them from labels.

use crate::error::BuildError;
use crate::opcode::OpCode;
use std::fmt;

/// Position in the source text, carried for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A single decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: OpCode,
    pub operand: Option<i64>,
    /// Offset to resume at when this instruction faults.
    pub catch: Option<u32>,
    pub location: Option<SourceLocation>,
}

impl Instruction {
    pub fn new(opcode: OpCode) -> Self {
        Self {
            opcode,
            operand: None,
            catch: None,
            location: None,
        }
    }

    pub fn with_operand(opcode: OpCode, operand: i64) -> Self {
        Self {
            operand: Some(operand),
            ..Self::new(opcode)
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        if let Some(operand) = self.operand {
            write!(f, " {}", operand)?;
        }
        if let Some(target) = self.catch {
            write!(f, " catch->{}", target)?;
        }
        Ok(())
    }
}

/// Parameter shape of a code object.
///
/// Arguments bind into locals as
/// `[positional.., named.., *varargs?, **varkw?]`, followed by the body's
/// own locals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    pub positional: u16,
    pub named: Vec<String>,
    pub variadic: bool,
    pub variadic_keywords: bool,
}

impl Signature {
    pub fn positional(count: u16) -> Self {
        Self {
            positional: count,
            ..Self::default()
        }
    }

    /// Number of local slots consumed by parameters.
    pub fn param_slots(&self) -> usize {
        self.positional as usize
            + self.named.len()
            + usize::from(self.variadic)
            + usize::from(self.variadic_keywords)
    }
}

/// Where a closure's capture cell comes from when the closure is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    /// Local slot of the creating frame, boxed on first capture
    Local(u32),
    /// Capture cell of the creating frame's own callable
    Capture(u32),
}

/// Protected range `[start, end)` whose faults resume at `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerRecord {
    pub start: u32,
    pub end: u32,
    pub target: u32,
}

impl HandlerRecord {
    pub fn covers(&self, offset: usize) -> bool {
        (self.start as usize) <= offset && offset < self.end as usize
    }

    fn span(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}

/// Compiled body of a function or module.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeObject {
    pub name: Option<String>,
    pub signature: Signature,
    pub local_count: u32,
    pub instructions: Vec<Instruction>,
    pub captures: Vec<CaptureSource>,
    pub handlers: Vec<HandlerRecord>,
}

impl CodeObject {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    /// Resume offset for a fault at `offset`: the instruction's own catch
    /// target first, then the narrowest handler covering it.
    pub fn handler_for(&self, offset: usize) -> Option<u32> {
        if let Some(target) = self.instructions.get(offset).and_then(|i| i.catch) {
            return Some(target);
        }
        self.handlers
            .iter()
            .filter(|h| h.covers(offset))
            .min_by_key(|h| h.span())
            .map(|h| h.target)
    }
}

/// Forward-referenceable instruction offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(u32);

/// Assembles a [`CodeObject`], resolving labels at `build`.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    name: Option<String>,
    signature: Signature,
    locals: u32,
    instructions: Vec<Instruction>,
    captures: Vec<CaptureSource>,
    labels: Vec<Option<u32>>,
    jumps: Vec<(usize, Label)>,
    catches: Vec<(usize, Label)>,
    handlers: Vec<(Label, Label, Label)>,
    location: Option<SourceLocation>,
    duplicate: Option<u32>,
}

impl CodeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn positional(mut self, count: u16) -> Self {
        self.signature.positional = count;
        self
    }

    pub fn named(mut self, names: &[&str]) -> Self {
        self.signature.named = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn variadic(mut self) -> Self {
        self.signature.variadic = true;
        self
    }

    pub fn variadic_keywords(mut self) -> Self {
        self.signature.variadic_keywords = true;
        self
    }

    /// Total local slots, parameters included. Never fewer than the
    /// signature needs.
    pub fn locals(mut self, count: u32) -> Self {
        self.locals = count;
        self
    }

    pub fn capture(mut self, source: CaptureSource) -> Self {
        self.captures.push(source);
        self
    }

    /// Attach a source location to instructions emitted from now on.
    pub fn at(&mut self, line: u32, column: u32) -> &mut Self {
        self.location = Some(SourceLocation { line, column });
        self
    }

    pub fn emit(&mut self, opcode: OpCode) -> usize {
        self.push(Instruction::new(opcode))
    }

    pub fn emit_arg(&mut self, opcode: OpCode, operand: i64) -> usize {
        self.push(Instruction::with_operand(opcode, operand))
    }

    /// Emit a jump whose target is resolved from `label`.
    pub fn jump(&mut self, opcode: OpCode, label: Label) -> usize {
        let at = self.push(Instruction::with_operand(opcode, 0));
        self.jumps.push((at, label));
        at
    }

    /// Give the instruction at `at` its own catch target.
    pub fn catch(&mut self, at: usize, label: Label) {
        self.catches.push((at, label));
    }

    /// Protect `[start, end)` with a handler resuming at `target`.
    pub fn handler(&mut self, start: Label, end: Label, target: Label) {
        self.handlers.push((start, end, target));
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label((self.labels.len() - 1) as u32)
    }

    /// Bind `label` to the next instruction offset.
    pub fn place(&mut self, label: Label) {
        let offset = self.instructions.len() as u32;
        match self.labels.get_mut(label.0 as usize) {
            Some(slot @ None) => *slot = Some(offset),
            Some(Some(_)) => self.duplicate = Some(label.0),
            None => {}
        }
    }

    pub fn offset(&self) -> usize {
        self.instructions.len()
    }

    pub fn build(mut self) -> Result<CodeObject, BuildError> {
        if let Some(label) = self.duplicate {
            return Err(BuildError::DuplicateLabel(label));
        }

        for (at, label) in std::mem::take(&mut self.jumps) {
            let target = self.resolve(label)?;
            self.instructions[at].operand = Some(target as i64);
        }
        for (at, label) in std::mem::take(&mut self.catches) {
            let target = self.resolve(label)?;
            if let Some(instruction) = self.instructions.get_mut(at) {
                instruction.catch = Some(target);
            }
        }
        let handlers = std::mem::take(&mut self.handlers)
            .into_iter()
            .map(|(start, end, target)| {
                Ok(HandlerRecord {
                    start: self.resolve(start)?,
                    end: self.resolve(end)?,
                    target: self.resolve(target)?,
                })
            })
            .collect::<Result<Vec<_>, BuildError>>()?;

        let local_count = self.locals.max(self.signature.param_slots() as u32);
        Ok(CodeObject {
            name: self.name,
            signature: self.signature,
            local_count,
            instructions: self.instructions,
            captures: self.captures,
            handlers,
        })
    }

    fn push(&mut self, mut instruction: Instruction) -> usize {
        instruction.location = self.location;
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    fn resolve(&self, label: Label) -> Result<u32, BuildError> {
        self.labels
            .get(label.0 as usize)
            .copied()
            .flatten()
            .ok_or(BuildError::UnplacedLabel(label.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_jump_resolution() {
        let mut b = CodeBuilder::new("f");
        let end = b.new_label();
        b.emit(OpCode::LoadTrue);
        b.jump(OpCode::JumpIfTrue, end);
        b.emit_arg(OpCode::LoadInt, 1);
        b.place(end);
        b.emit(OpCode::LoadNull);
        b.emit(OpCode::Return);
        let code = b.build().unwrap();

        assert_eq!(code.instructions[1].operand, Some(3));
        assert_eq!(code.display_name(), "f");
    }

    #[test]
    fn test_unplaced_label_is_rejected() {
        let mut b = CodeBuilder::anonymous();
        let nowhere = b.new_label();
        b.jump(OpCode::Jump, nowhere);
        assert_eq!(b.build(), Err(BuildError::UnplacedLabel(0)));
    }

    #[test]
    fn test_locals_cover_parameters() {
        let code = CodeBuilder::new("g")
            .positional(2)
            .named(&["scale"])
            .variadic()
            .locals(1)
            .build()
            .unwrap();
        assert_eq!(code.signature.param_slots(), 4);
        assert_eq!(code.local_count, 4);
    }

    #[test]
    fn test_catch_target_wins_over_handler() {
        let mut b = CodeBuilder::anonymous();
        let start = b.new_label();
        let end = b.new_label();
        let outer = b.new_label();
        let inner = b.new_label();
        b.place(start);
        let faulting = b.emit(OpCode::Raise);
        b.emit(OpCode::Raise);
        b.place(end);
        b.place(outer);
        b.emit(OpCode::Return);
        b.place(inner);
        b.emit(OpCode::Return);
        b.catch(faulting, inner);
        b.handler(start, end, outer);
        let code = b.build().unwrap();

        assert_eq!(code.handler_for(0), Some(3));
        assert_eq!(code.handler_for(1), Some(2));
        assert_eq!(code.handler_for(2), None);
    }

    #[test]
    fn test_innermost_handler_is_chosen() {
        let code = CodeObject {
            name: None,
            signature: Signature::default(),
            local_count: 0,
            instructions: vec![Instruction::new(OpCode::Nop); 10],
            captures: Vec::new(),
            handlers: vec![
                HandlerRecord { start: 0, end: 10, target: 9 },
                HandlerRecord { start: 2, end: 5, target: 8 },
            ],
        };
        assert_eq!(code.handler_for(3), Some(8));
        assert_eq!(code.handler_for(6), Some(9));
    }

    #[test]
    fn test_locations_follow_at() {
        let mut b = CodeBuilder::anonymous();
        b.emit(OpCode::Nop);
        b.at(4, 2);
        b.emit(OpCode::Nop);
        let code = b.build().unwrap();
        assert_eq!(code.instructions[0].location, None);
        assert_eq!(
            code.instructions[1].location,
            Some(SourceLocation { line: 4, column: 2 })
        );
    }
}
