//! Capture cells, receivers and argument binding.

use super::helpers::*;
use crate::vm::FiberOutcome;
use weft_types::{ArgVector, ArtifactBuilder, CaptureSource, CodeBuilder, OpCode};

#[test]
fn test_sibling_closures_share_one_cell() {
    let rt = runtime();
    let mut artifact = ArtifactBuilder::new("pair");

    let mut inc = CodeBuilder::new("inc").capture(CaptureSource::Local(0));
    inc.emit_arg(OpCode::LoadCapture, 0);
    inc.emit_arg(OpCode::LoadInt, 1);
    inc.emit(OpCode::Add);
    inc.emit_arg(OpCode::StoreCapture, 0);
    inc.emit(OpCode::LoadNull);
    inc.emit(OpCode::Return);
    let inc = artifact.code(inc.build().unwrap());

    let mut get = CodeBuilder::new("get").capture(CaptureSource::Local(0));
    get.emit_arg(OpCode::LoadCapture, 0);
    get.emit(OpCode::Return);
    let get = artifact.code(get.build().unwrap());

    let mut pair = CodeBuilder::new("pair").locals(1);
    pair.emit_arg(OpCode::LoadInt, 0);
    pair.emit_arg(OpCode::StoreLocal, 0);
    pair.emit_arg(OpCode::MakeClosure, inc);
    pair.emit_arg(OpCode::MakeClosure, get);
    pair.emit_arg(OpCode::MakeArray, 2);
    pair.emit(OpCode::Return);
    let pair = artifact.code(pair.build().unwrap());

    let g = artifact.export("pair");
    let mut body = CodeBuilder::new("pair");
    body.emit_arg(OpCode::MakeClosure, pair);
    body.emit_arg(OpCode::StoreGlobal, g);
    let module = install_and_run(&rt, &artifact.build(body.build().unwrap()));

    let handle = spawn_ints(&rt, &module, "pair", &[]);
    let closures = handle.join().value().unwrap();
    let items = rt.heap().array_items(closures).unwrap();
    let call = |f| rt.spin_fiber(f, ArgVector::default()).unwrap().join();

    assert_eq!(returned_int(&rt, &call(items[1])), 0);
    call(items[0]);
    call(items[0]);
    assert_eq!(returned_int(&rt, &call(items[1])), 2);
}

#[test]
fn test_enclosing_frame_sees_writes_through_nested_captures() {
    let rt = runtime();
    let mut artifact = ArtifactBuilder::new("nested");

    // inner re-shares mid's first capture and adds 10 to it
    let mut inner = CodeBuilder::new("inner").capture(CaptureSource::Capture(0));
    inner.emit_arg(OpCode::LoadCapture, 0);
    inner.emit_arg(OpCode::LoadInt, 10);
    inner.emit(OpCode::Add);
    inner.emit_arg(OpCode::StoreCapture, 0);
    inner.emit(OpCode::LoadNull);
    inner.emit(OpCode::Return);
    let inner = artifact.code(inner.build().unwrap());

    let mut mid = CodeBuilder::new("mid").capture(CaptureSource::Local(0));
    mid.emit_arg(OpCode::MakeClosure, inner);
    mid.emit_arg(OpCode::Call, 0);
    mid.emit(OpCode::Return);
    let mid = artifact.code(mid.build().unwrap());

    let mut outer = CodeBuilder::new("outer").locals(1);
    outer.emit_arg(OpCode::LoadInt, 1);
    outer.emit_arg(OpCode::StoreLocal, 0);
    outer.emit_arg(OpCode::MakeClosure, mid);
    outer.emit_arg(OpCode::Call, 0);
    outer.emit(OpCode::Pop);
    outer.emit_arg(OpCode::LoadLocal, 0);
    outer.emit(OpCode::Return);
    let outer = artifact.code(outer.build().unwrap());

    let g = artifact.export("outer");
    let mut body = CodeBuilder::new("nested");
    body.emit_arg(OpCode::MakeClosure, outer);
    body.emit_arg(OpCode::StoreGlobal, g);
    let module = install_and_run(&rt, &artifact.build(body.build().unwrap()));

    let outcome = call_ints(&rt, &module, "outer", &[]);
    assert_eq!(returned_int(&rt, &outcome), 11);
}

#[test]
fn test_bound_method_reads_receiver() {
    let rt = runtime();
    let mut artifact = ArtifactBuilder::new("methods");
    let n = artifact.string("n");

    let mut method = CodeBuilder::new("get_n");
    method.emit(OpCode::LoadSelf);
    method.emit_arg(OpCode::LoadAttr, n);
    method.emit(OpCode::Return);
    let method = artifact.code(method.build().unwrap());

    let mut run = CodeBuilder::new("run");
    run.emit(OpCode::MakeObject);
    run.emit_arg(OpCode::LoadInt, 42);
    run.emit_arg(OpCode::StoreAttr, n);
    run.emit_arg(OpCode::MakeClosure, method);
    run.emit(OpCode::Swap);
    run.emit(OpCode::Bind);
    run.emit_arg(OpCode::Call, 0);
    run.emit(OpCode::Return);
    let module = install_and_run(&rt, &module_with(artifact, "run", run.build().unwrap()));

    let outcome = call_ints(&rt, &module, "run", &[]);
    assert_eq!(returned_int(&rt, &outcome), 42);
}

fn keyword_module(variadic_keywords: bool) -> weft_types::ModuleArtifact {
    let mut code = CodeBuilder::new("kw").positional(1).named(&["b"]);
    if variadic_keywords {
        code = code.variadic_keywords();
    }
    code.emit_arg(OpCode::LoadLocal, 0);
    code.emit_arg(OpCode::LoadLocal, 1);
    code.emit(OpCode::Add);
    code.emit(OpCode::Return);
    module_of("kw", vec![("kw", code.build().unwrap())])
}

#[test]
fn test_keyword_fills_named_parameter() {
    let rt = runtime();
    let module = install_and_run(&rt, &keyword_module(false));
    let values = ints(&rt, &[1, 2]);
    let (a, b) = (values[0].get(), values[1].get());

    let outcome = rt
        .call_export(&module, "kw", ArgVector::new(vec![a]).keyword("b", b))
        .unwrap()
        .join();
    assert_eq!(returned_int(&rt, &outcome), 3);
}

#[test]
fn test_unknown_keyword_is_rejected_without_catch_all() {
    let rt = runtime();
    let module = install_and_run(&rt, &keyword_module(false));
    let values = ints(&rt, &[1, 2, 3]);
    let (a, b, c) = (values[0].get(), values[1].get(), values[2].get());
    let args = ArgVector::new(vec![a]).keyword("b", b).keyword("c", c);
    let err = rt.call_export(&module, "kw", args).unwrap_err();
    assert_eq!(err.kind_name(), "UnexpectedKeyword");

    let module = install_and_run(&rt, &keyword_module(true));
    let args = ArgVector::new(vec![a]).keyword("b", b).keyword("c", c);
    let outcome = rt.call_export(&module, "kw", args).unwrap().join();
    assert_eq!(returned_int(&rt, &outcome), 3);
}

#[test]
fn test_arity_error_inside_code_is_catchable() {
    let rt = runtime();
    let mut artifact = ArtifactBuilder::new("arity");
    let kind = artifact.string("kind");

    let mut two = CodeBuilder::new("two").positional(2);
    two.emit(OpCode::LoadNull);
    two.emit(OpCode::Return);
    let two = artifact.code(two.build().unwrap());

    let mut run = CodeBuilder::new("run");
    let handler = run.new_label();
    run.emit_arg(OpCode::MakeClosure, two);
    run.emit_arg(OpCode::LoadInt, 1);
    let call = run.emit_arg(OpCode::Call, 1);
    run.catch(call, handler);
    run.emit(OpCode::Return);
    run.place(handler);
    run.emit_arg(OpCode::LoadAttr, kind);
    run.emit(OpCode::Return);
    let module = install_and_run(&rt, &module_with(artifact, "run", run.build().unwrap()));

    let outcome = call_ints(&rt, &module, "run", &[]);
    let FiberOutcome::Returned(kind) = outcome else {
        panic!("expected the error kind, got {:?}", outcome);
    };
    assert_eq!(rt.heap().str_value(kind).as_deref(), Some("ArityError"));
}
