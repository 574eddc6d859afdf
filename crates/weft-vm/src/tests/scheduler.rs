//! Worker pool scheduling, fiber lifecycle and the concurrency built-ins.

use super::helpers::*;
use crate::vm::{FiberOutcome, FiberStatus};
use std::time::{Duration, Instant};
use weft_types::{ArgVector, ArtifactBuilder, CodeBuilder, CodeObject, HeapRef, OpCode};

fn core_function(rt: &crate::Runtime, name: &str) -> HeapRef {
    rt.load("core")
        .expect("core loads")
        .export(name)
        .unwrap_or_else(|| panic!("core.{} missing", name))
}

/// `parent(spawn, join, child, arg)`: spawns `child(arg)` and joins it.
fn spawn_and_join() -> CodeObject {
    let mut code = CodeBuilder::new("parent").positional(4).locals(5);
    code.emit_arg(OpCode::LoadLocal, 0);
    code.emit_arg(OpCode::LoadLocal, 2);
    code.emit_arg(OpCode::LoadLocal, 3);
    code.emit_arg(OpCode::Call, 2);
    code.emit_arg(OpCode::StoreLocal, 4);
    code.emit_arg(OpCode::LoadLocal, 1);
    code.emit_arg(OpCode::LoadLocal, 4);
    code.emit_arg(OpCode::Call, 1);
    code.emit(OpCode::Return);
    code.build().unwrap()
}

#[test]
fn test_more_fibers_than_workers_all_finish() {
    let rt = runtime();
    let module = install_and_run(&rt, &module_of("loops", vec![("sum", summing_loop(0))]));
    assert_eq!(rt.scheduler().worker_count(), 2);

    let handles: Vec<_> = (0..16)
        .map(|i| spawn_ints(&rt, &module, "sum", &[100 + i]))
        .collect();
    rt.run_to_completion();

    assert_eq!(rt.scheduler().live_count(), 0);
    for (i, handle) in handles.iter().enumerate() {
        let n = 100 + i as i64;
        assert_eq!(returned_int(&rt, &handle.join()), n * (n - 1) / 2);
        assert_eq!(handle.status(), FiberStatus::Completed);
    }
    assert_eq!(rt.scheduler().effective_burst(), Some(8));
}

#[test]
fn test_stop_terminates_unfinished_fibers() {
    let rt = runtime_with(|config| config.workers = 1);
    let module = install_and_run(&rt, &module_of("spin", vec![("spin", endless_loop())]));

    let handles: Vec<_> = (0..3).map(|_| spawn_ints(&rt, &module, "spin", &[])).collect();
    // With fewer workers than fibers each burst is unbounded
    assert_eq!(rt.scheduler().effective_burst(), None);
    std::thread::sleep(Duration::from_millis(20));
    rt.stop();

    assert!(rt.scheduler().is_stopped());
    assert_eq!(rt.scheduler().live_count(), 0);
    for handle in &handles {
        assert_eq!(
            handle.join(),
            FiberOutcome::Aborted("scheduler stopped".to_string())
        );
        assert_eq!(handle.status(), FiberStatus::Terminated);
    }
    assert!(rt.spin_fiber(module.export("spin").unwrap(), ArgVector::default()).is_err());
}

#[test]
fn test_spawned_fiber_result_is_joined() {
    let rt = runtime();
    let module = install_and_run(
        &rt,
        &module_of(
            "tasks",
            vec![("parent", spawn_and_join()), ("sum", summing_loop(0))],
        ),
    );
    let spawn = core_function(&rt, "spawn");
    let join = core_function(&rt, "join");
    let child = module.export("sum").unwrap();
    let arg = ints(&rt, &[5]);

    let outcome = rt
        .call_export(&module, "parent", ArgVector::new(vec![spawn, join, child, arg[0].get()]))
        .unwrap()
        .join();
    assert_eq!(returned_int(&rt, &outcome), 10);
}

#[test]
fn test_join_reraises_child_error() {
    let rt = runtime();
    let mut fail = CodeBuilder::new("fail").positional(1);
    fail.emit_arg(OpCode::LoadLocal, 0);
    fail.emit_arg(OpCode::LoadInt, 0);
    fail.emit(OpCode::Div);
    fail.emit(OpCode::Return);
    let module = install_and_run(
        &rt,
        &module_of(
            "tasks",
            vec![("parent", spawn_and_join()), ("fail", fail.build().unwrap())],
        ),
    );
    let one = ints(&rt, &[1]);
    let args = vec![
        core_function(&rt, "spawn"),
        core_function(&rt, "join"),
        module.export("fail").unwrap(),
        one[0].get(),
    ];

    let outcome = rt
        .call_export(&module, "parent", ArgVector::new(args))
        .unwrap()
        .join();
    let FiberOutcome::Raised(error) = outcome else {
        panic!("expected the child's error, got {:?}", outcome);
    };
    assert!(rt.heap().describe_error(error).starts_with("DivisionByZero"));
}

/// `nap(sleep, ms)`: calls `sleep(ms)`.
fn nap() -> CodeObject {
    let mut code = CodeBuilder::new("nap").positional(2);
    code.emit_arg(OpCode::LoadLocal, 0);
    code.emit_arg(OpCode::LoadLocal, 1);
    code.emit_arg(OpCode::Call, 1);
    code.emit(OpCode::Return);
    code.build().unwrap()
}

/// Start `nap(sleep, ms)` and wait until the fiber has parked.
fn parked_nap(rt: &crate::Runtime, ms: i64) -> crate::FiberHandle {
    let module = install_and_run(rt, &module_of("nap", vec![("nap", nap())]));
    let sleep = core_function(rt, "sleep");
    let ms = ints(rt, &[ms]);
    let handle = rt
        .call_export(&module, "nap", ArgVector::new(vec![sleep, ms[0].get()]))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while handle.status() != FiberStatus::Waiting {
        assert!(Instant::now() < deadline, "fiber never parked");
        std::thread::sleep(Duration::from_millis(1));
    }
    handle
}

#[test]
fn test_sleep_suspends_fiber() {
    let rt = runtime();
    let module = install_and_run(&rt, &module_of("nap", vec![("nap", nap())]));
    let sleep = core_function(&rt, "sleep");
    let ms = ints(&rt, &[20]);

    let started = Instant::now();
    let handle = rt
        .call_export(&module, "nap", ArgVector::new(vec![sleep, ms[0].get()]))
        .unwrap();
    let outcome = handle.join();
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(outcome, FiberOutcome::Returned(HeapRef::NULL));
}

#[test]
fn test_dedicated_fiber_runs_off_pool() {
    let rt = runtime();
    let module = install_and_run(&rt, &module_of("loops", vec![("sum", summing_loop(0))]));
    let arg = ints(&rt, &[1000]);

    let handle = rt
        .spin_dedicated(module.export("sum").unwrap(), ArgVector::new(refs(&arg)))
        .unwrap();
    assert_eq!(returned_int(&rt, &handle.join()), 499_500);
    assert!(handle.is_finished());
}

#[test]
fn test_spawning_non_callable_fails_at_call_site() {
    let rt = runtime();
    let value = ints(&rt, &[3]);
    let err = rt.spin_fiber(value[0].get(), ArgVector::default()).unwrap_err();
    assert_eq!(err.kind_name(), "TypeError");
}

#[test]
fn test_join_timeout_on_running_fiber() {
    let rt = runtime();
    let module = install_and_run(&rt, &module_of("spin", vec![("spin", endless_loop())]));
    let handle = spawn_ints(&rt, &module, "spin", &[]);

    assert!(handle.join_timeout(Duration::from_millis(10)).is_none());
    assert!(handle.try_outcome().is_none());
    rt.stop();
    assert!(matches!(handle.join(), FiberOutcome::Aborted(_)));
}

#[test]
fn test_fibers_get_distinct_ids() {
    let rt = runtime();
    let module = install_and_run(&rt, &module_of("loops", vec![("sum", summing_loop(0))]));
    let a = spawn_ints(&rt, &module, "sum", &[3]);
    let b = spawn_ints(&rt, &module, "sum", &[3]);
    assert_ne!(a.id(), b.id());
    rt.run_to_completion();
    assert!(a.is_finished() && b.is_finished());
}

/// `bump()` increments the module global `total`.
fn shared_counter() -> weft_types::ModuleArtifact {
    let mut artifact = ArtifactBuilder::new("shared");
    let total = artifact.global("total");

    let mut bump = CodeBuilder::new("bump");
    bump.emit_arg(OpCode::LoadGlobal, total);
    bump.emit_arg(OpCode::LoadInt, 1);
    bump.emit(OpCode::Add);
    bump.emit_arg(OpCode::StoreGlobal, total);
    bump.emit(OpCode::LoadNull);
    bump.emit(OpCode::Return);
    let bump = artifact.code(bump.build().unwrap());
    let bump_global = artifact.export("bump");

    let mut body = CodeBuilder::new("shared");
    body.emit_arg(OpCode::LoadInt, 0);
    body.emit_arg(OpCode::StoreGlobal, total);
    body.emit_arg(OpCode::MakeClosure, bump);
    body.emit_arg(OpCode::StoreGlobal, bump_global);
    artifact.build(body.build().unwrap())
}

#[test]
fn test_fibers_share_module_globals() {
    // One worker keeps the unsynchronized read-modify-write sequential
    let rt = runtime_with(|config| config.workers = 1);
    let module = install_and_run(&rt, &shared_counter());
    let handles: Vec<_> = (0..5).map(|_| spawn_ints(&rt, &module, "bump", &[])).collect();
    rt.run_to_completion();

    assert!(handles.iter().all(|h| h.join().is_ok()));
    let total = module.global_by_name("total").unwrap();
    assert_eq!(rt.heap().int_value(total), Some(5));
}

#[test]
fn test_parked_fiber_does_not_occupy_workers() {
    let rt = runtime();
    let handle = parked_nap(&rt, 300);

    let bursts = rt.scheduler().bursts_run();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(rt.scheduler().bursts_run(), bursts);
    assert_eq!(handle.status(), FiberStatus::Waiting);

    assert_eq!(handle.join(), FiberOutcome::Returned(HeapRef::NULL));
    assert!(rt.scheduler().bursts_run() > bursts);
}

#[test]
fn test_stop_terminates_parked_fibers() {
    let rt = runtime();
    let handle = parked_nap(&rt, 2000);
    rt.stop();

    assert_eq!(rt.scheduler().live_count(), 0);
    assert_eq!(
        handle.join(),
        FiberOutcome::Aborted("scheduler stopped".to_string())
    );
    assert_eq!(handle.status(), FiberStatus::Terminated);
}

#[test]
fn test_finished_dedicated_threads_are_reaped() {
    let rt = runtime();
    let module = install_and_run(&rt, &module_of("loops", vec![("sum", summing_loop(0))]));
    let sum = module.export("sum").unwrap();
    let arg = ints(&rt, &[10]);

    for _ in 0..3 {
        let handle = rt.spin_dedicated(sum, ArgVector::new(refs(&arg))).unwrap();
        assert_eq!(returned_int(&rt, &handle.join()), 45);
    }
    // Threads exit right after publishing their outcome
    std::thread::sleep(Duration::from_millis(100));

    let last = rt.spin_dedicated(sum, ArgVector::new(refs(&arg))).unwrap();
    assert_eq!(rt.scheduler().dedicated_threads(), 1);
    assert_eq!(returned_int(&rt, &last.join()), 45);
}

#[test]
fn test_outcome_is_readable_after_join() {
    let rt = runtime();
    let module = install_and_run(&rt, &module_of("loops", vec![("sum", summing_loop(0))]));
    let handle = spawn_ints(&rt, &module, "sum", &[4]);

    let joined = handle.join();
    assert_eq!(returned_int(&rt, &joined), 6);
    assert_eq!(handle.try_outcome(), Some(joined.clone()));
    assert_eq!(handle.join_timeout(Duration::from_millis(1)), Some(joined));
}
