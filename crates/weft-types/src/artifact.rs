//! The compiler's output for one module.
//!
//! A [`ModuleArtifact`] is plain data: it holds no heap handles and can be
//! cached to disk, shipped between threads, and materialized into any heap.

use crate::code::{CodeObject, HandlerRecord, Instruction};
use std::sync::Arc;

/// Shape of a data record created by `MakeRecord`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTemplate {
    pub name: String,
    pub fields: Vec<String>,
}

/// Constant pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Code template for `MakeClosure`
    Code(Arc<CodeObject>),
    RecordTemplate(RecordTemplate),
    /// Handler protecting part of the module body
    Handler(HandlerRecord),
}

impl Constant {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::Str(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleArtifact {
    pub name: String,
    pub constants: Vec<Constant>,
    pub instructions: Vec<Instruction>,
    pub globals: Vec<String>,
    pub exports: Vec<String>,
    pub local_count: u32,
}

impl ModuleArtifact {
    /// The module body as a parameterless code object. Handler constants
    /// protect ranges of the body.
    pub fn body(&self) -> CodeObject {
        CodeObject {
            name: Some(self.name.clone()),
            signature: Default::default(),
            local_count: self.local_count,
            instructions: self.instructions.clone(),
            captures: Vec::new(),
            handlers: self
                .constants
                .iter()
                .filter_map(|c| match c {
                    Constant::Handler(h) => Some(*h),
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn global_index(&self, name: &str) -> Option<usize> {
        self.globals.iter().position(|g| g == name)
    }
}

/// Assembles a [`ModuleArtifact`] with interned constants.
#[derive(Debug, Default)]
pub struct ArtifactBuilder {
    name: String,
    constants: Vec<Constant>,
    globals: Vec<String>,
    exports: Vec<String>,
}

impl ArtifactBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a constant and return its index
    pub fn constant(&mut self, constant: Constant) -> i64 {
        self.constants.push(constant);
        (self.constants.len() - 1) as i64
    }

    /// Add a string constant, reusing an existing entry
    pub fn string(&mut self, s: &str) -> i64 {
        if let Some(idx) = self.constants.iter().position(|c| c.as_str() == Some(s)) {
            return idx as i64;
        }
        self.constant(Constant::Str(s.to_string()))
    }

    pub fn code(&mut self, code: CodeObject) -> i64 {
        self.constant(Constant::Code(Arc::new(code)))
    }

    pub fn record(&mut self, name: &str, fields: &[&str]) -> i64 {
        self.constant(Constant::RecordTemplate(RecordTemplate {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }))
    }

    /// Declare a global slot and return its index
    pub fn global(&mut self, name: &str) -> i64 {
        if let Some(idx) = self.globals.iter().position(|g| g == name) {
            return idx as i64;
        }
        self.globals.push(name.to_string());
        (self.globals.len() - 1) as i64
    }

    /// Declare a global and export it
    pub fn export(&mut self, name: &str) -> i64 {
        let idx = self.global(name);
        if !self.exports.iter().any(|e| e == name) {
            self.exports.push(name.to_string());
        }
        idx
    }

    /// Finish with `body` as the module's top-level code. The body's handler
    /// records move into the constant pool.
    pub fn build(mut self, body: CodeObject) -> ModuleArtifact {
        for handler in &body.handlers {
            self.constants.push(Constant::Handler(*handler));
        }
        ModuleArtifact {
            name: self.name,
            constants: self.constants,
            instructions: body.instructions,
            globals: self.globals,
            exports: self.exports,
            local_count: body.local_count,
        }
    }
}
