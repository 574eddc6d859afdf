//! Helper functions and common imports for integration tests.

use crate::config::RuntimeConfig;
use crate::module::Module;
use crate::runtime::{Rooted, Runtime};
use crate::scheduler::FiberHandle;
use crate::vm::FiberOutcome;
use std::sync::Arc;
use weft_types::{ArgVector, ArtifactBuilder, CodeBuilder, CodeObject, HeapRef, OpCode};

/// Runtime with a small pool and no module roots.
pub fn runtime() -> Runtime {
    runtime_with(|_| {})
}

/// Runtime with a small pool, adjusted by `configure`.
pub fn runtime_with(configure: impl FnOnce(&mut RuntimeConfig)) -> Runtime {
    let mut config = RuntimeConfig {
        search_paths: Vec::new(),
        workers: 2,
        burst: 8,
        ..RuntimeConfig::default()
    };
    configure(&mut config);
    Runtime::new(config).expect("runtime starts")
}

/// Install `artifact` and run its body to completion.
pub fn install_and_run(rt: &Runtime, artifact: &weft_types::ModuleArtifact) -> Arc<Module> {
    let module = rt
        .install_artifact(&artifact.name, artifact)
        .expect("artifact installs");
    let outcome = rt.run_module(&module).expect("body spawns").join();
    assert!(outcome.is_ok(), "module body failed: {:?}", outcome);
    module
}

/// A module whose body binds each `(name, code)` pair to an exported
/// global.
pub fn module_of(name: &str, functions: Vec<(&str, CodeObject)>) -> weft_types::ModuleArtifact {
    let mut artifact = ArtifactBuilder::new(name);
    let mut body = CodeBuilder::new(name);
    for (export, code) in functions {
        let k = artifact.code(code);
        let g = artifact.export(export);
        body.emit_arg(OpCode::MakeClosure, k);
        body.emit_arg(OpCode::StoreGlobal, g);
    }
    body.emit(OpCode::LoadNull);
    body.emit(OpCode::Return);
    artifact.build(body.build().expect("body builds"))
}

/// `artifact` with a body exporting `code` as `export`.
pub fn module_with(
    mut artifact: ArtifactBuilder,
    export: &str,
    code: CodeObject,
) -> weft_types::ModuleArtifact {
    let k = artifact.code(code);
    let g = artifact.export(export);
    let mut body = CodeBuilder::anonymous();
    body.emit_arg(OpCode::MakeClosure, k);
    body.emit_arg(OpCode::StoreGlobal, g);
    artifact.build(body.build().expect("body builds"))
}

/// Call export `name` with integer arguments and wait for it.
pub fn call_ints(rt: &Runtime, module: &Module, name: &str, args: &[i64]) -> FiberOutcome {
    spawn_ints(rt, module, name, args).join()
}

pub fn spawn_ints(rt: &Runtime, module: &Module, name: &str, args: &[i64]) -> FiberHandle {
    let args = ints(rt, args);
    rt.call_export(module, name, ArgVector::new(refs(&args)))
        .expect("call spawns")
}

/// Integers allocated and rooted on behalf of the test.
pub fn ints(rt: &Runtime, values: &[i64]) -> Vec<Rooted> {
    values
        .iter()
        .map(|&v| rt.allocate(|heap| heap.allocate_int(v)).expect("int allocates"))
        .collect()
}

pub fn refs(rooted: &[Rooted]) -> Vec<HeapRef> {
    rooted.iter().map(Rooted::get).collect()
}

/// The integer a fiber returned.
pub fn returned_int(rt: &Runtime, outcome: &FiberOutcome) -> i64 {
    match outcome {
        FiberOutcome::Returned(v) => rt
            .heap()
            .int_value(*v)
            .unwrap_or_else(|| panic!("expected int, got {}", rt.heap().display(*v))),
        other => panic!("expected a return, got {:?}", other),
    }
}

/// `sum(n)`: adds 0..n in a loop, allocating `garbage` empty arrays per
/// iteration.
pub fn summing_loop(garbage: usize) -> CodeObject {
    let mut code = CodeBuilder::new("sum").positional(1).locals(3);
    let top = code.new_label();
    let end = code.new_label();
    // locals: 0 = n, 1 = i, 2 = acc
    code.emit_arg(OpCode::LoadInt, 0);
    code.emit_arg(OpCode::StoreLocal, 1);
    code.emit_arg(OpCode::LoadInt, 0);
    code.emit_arg(OpCode::StoreLocal, 2);
    code.place(top);
    code.emit_arg(OpCode::LoadLocal, 1);
    code.emit_arg(OpCode::LoadLocal, 0);
    code.emit(OpCode::Lt);
    code.jump(OpCode::JumpIfFalse, end);
    code.emit_arg(OpCode::LoadLocal, 2);
    code.emit_arg(OpCode::LoadLocal, 1);
    code.emit(OpCode::Add);
    code.emit_arg(OpCode::StoreLocal, 2);
    for _ in 0..garbage {
        code.emit_arg(OpCode::MakeArray, 0);
        code.emit(OpCode::Pop);
    }
    code.emit_arg(OpCode::LoadLocal, 1);
    code.emit_arg(OpCode::LoadInt, 1);
    code.emit(OpCode::Add);
    code.emit_arg(OpCode::StoreLocal, 1);
    code.jump(OpCode::Jump, top);
    code.place(end);
    code.emit_arg(OpCode::LoadLocal, 2);
    code.emit(OpCode::Return);
    code.build().expect("loop builds")
}

/// `spin()`: loops forever.
pub fn endless_loop() -> CodeObject {
    let mut code = CodeBuilder::new("spin");
    let top = code.new_label();
    code.place(top);
    code.emit(OpCode::Nop);
    code.jump(OpCode::Jump, top);
    code.build().expect("loop builds")
}
