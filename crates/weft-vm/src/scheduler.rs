//! Fiber scheduler
//!
//! A fixed pool of worker threads shares one injector queue of runnable
//! fibers. Workers advance a fiber for one burst, then re-queue it, park it
//! or retire it. Fibers are never advanced by two threads at once: each lives
//! in a [`FiberCell`] whose mutex is held for the whole burst.
//!
//! A fiber whose top frame waits on a [`Completion`] is parked: it leaves the
//! queue and a waiter on that completion re-queues it once it resolves.
//!
//! Workers hold the runtime's world lock for reading while they run a burst.
//! A collection takes it for writing, so the collector only ever sees fibers
//! parked between frame advances.

use crate::error::VmError;
use crate::runtime::RuntimeCore;
use crate::vm::{Advance, Fiber, FiberId, FiberOutcome, FiberStatus, Spawner};
use crossbeam_deque::{Injector, Steal};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace};
use weft_types::sync::{Condvar, Mutex};
use weft_types::{ArgVector, Collector, Completion, Heap, HeapRef, RootSource, SweepStats};

/// Frame advances per burst on a dedicated thread.
pub const DEDICATED_BURST: usize = 1024;

/// How long an idle worker parks before polling the queue again.
const IDLE_PARK: Duration = Duration::from_millis(10);

const STOPPED: &str = "scheduler stopped";

/// Whether a host handle still wants the fiber's result kept alive.
#[derive(Default)]
struct HandleState {
    attached: bool,
    pinned: Option<HeapRef>,
}

/// A scheduled fiber plus the completion its waiters block on.
pub(crate) struct FiberCell {
    id: FiberId,
    fiber: Mutex<Fiber>,
    completion: Completion,
    handle: Mutex<HandleState>,
}

impl FiberCell {
    fn new(fiber: Fiber, attached: bool) -> Self {
        Self {
            id: fiber.id(),
            fiber: Mutex::new(fiber),
            completion: Completion::new(),
            handle: Mutex::new(HandleState {
                attached,
                pinned: None,
            }),
        }
    }
}

/// Pool state shared between the scheduler and its workers.
struct PoolShared {
    core: Arc<RuntimeCore>,
    collector: Arc<dyn Collector>,
    queue: Injector<Arc<FiberCell>>,
    /// Every fiber that has been spawned and not yet retired
    fibers: Mutex<HashMap<FiberId, Arc<FiberCell>>>,
    next_id: AtomicU64,
    workers: usize,
    burst: usize,
    /// Current per-burst limit; 0 means unlimited
    effective_burst: AtomicUsize,
    live: Mutex<usize>,
    all_done: Condvar,
    idle: Mutex<()>,
    work_ready: Condvar,
    /// Also serves as the interrupt flag fibers check between frames
    shutdown: AtomicBool,
    collecting: AtomicBool,
    /// Threads of dedicated fibers not yet reaped
    dedicated: Mutex<Vec<JoinHandle<()>>>,
    bursts: AtomicU64,
}

impl PoolShared {
    fn spawn_cell(
        &self,
        callable: HeapRef,
        args: ArgVector,
        attached: bool,
    ) -> Result<Arc<FiberCell>, VmError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(VmError::unsupported(STOPPED));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let env = self.core.env(self, &self.shutdown);
        let fiber = Fiber::spin(id, &env, callable, args)?;
        let cell = Arc::new(FiberCell::new(fiber, attached));

        self.fibers.lock().insert(id, Arc::clone(&cell));
        self.adjust_live(|live| live + 1);
        debug!(fiber = id, "fiber spawned");
        Ok(cell)
    }

    fn enqueue(&self, cell: Arc<FiberCell>) {
        cell.fiber.lock().set_status(FiberStatus::Queued);
        self.queue.push(cell);
        self.work_ready.notify_one();
    }

    fn next_runnable(&self) -> Option<Arc<FiberCell>> {
        loop {
            match self.queue.steal() {
                Steal::Success(cell) => return Some(cell),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    fn park(&self) {
        let mut guard = self.idle.lock();
        if self.queue.is_empty() && !self.shutdown.load(Ordering::Acquire) {
            self.work_ready.wait_for(&mut guard, IDLE_PARK);
        }
    }

    fn burst_limit(&self) -> Option<usize> {
        match self.effective_burst.load(Ordering::Acquire) {
            0 => None,
            limit => Some(limit),
        }
    }

    /// Update the live count and recompute the burst policy: with at least
    /// as many live fibers as workers, each worker runs its fiber until it
    /// finishes or blocks.
    fn adjust_live(&self, update: impl FnOnce(usize) -> usize) {
        let mut live = self.live.lock();
        *live = update(*live);
        let limit = if *live >= self.workers { 0 } else { self.burst };
        self.effective_burst.store(limit, Ordering::Release);
        if *live == 0 {
            self.all_done.notify_all();
        }
    }

    /// Run one burst of `cell` on the calling worker.
    fn run_slice(self: &Arc<Self>, cell: Arc<FiberCell>) {
        self.bursts.fetch_add(1, Ordering::Relaxed);
        let (advance, waiting_on) = {
            let _world = self.core.world.read();
            let mut fiber = cell.fiber.lock();
            fiber.set_status(FiberStatus::Running);
            let env = self.core.env(&**self, &self.shutdown);
            let advance = fiber.advance(&env, self.burst_limit());
            match advance {
                Advance::Finished => (advance, None),
                Advance::Blocked => {
                    let waiting_on = fiber.blocked_on();
                    fiber.set_status(match waiting_on {
                        Some(_) => FiberStatus::Waiting,
                        None => FiberStatus::Queued,
                    });
                    (advance, waiting_on)
                }
                Advance::Progress => {
                    fiber.set_status(FiberStatus::Queued);
                    (advance, None)
                }
            }
        };

        match (advance, waiting_on) {
            (Advance::Finished, _) => self.retire(&cell),
            (Advance::Blocked, Some(completion)) => {
                trace!(fiber = cell.id, "fiber parked");
                let shared = Arc::clone(self);
                completion.on_resolve(Box::new(move |_| shared.enqueue(cell)));
            }
            _ => self.queue.push(cell),
        }
    }

    /// Publish a finished fiber's outcome and drop it from the pool.
    fn retire(&self, cell: &FiberCell) {
        {
            let _world = self.core.world.read();
            let heap = &self.core.heap;
            let outcome = cell
                .fiber
                .lock()
                .outcome()
                .cloned()
                .unwrap_or_else(|| FiberOutcome::Aborted("fiber retired unfinished".to_string()));

            let result = match &outcome {
                FiberOutcome::Returned(value) => {
                    debug!(fiber = cell.id, "fiber completed");
                    Ok(*value)
                }
                FiberOutcome::Raised(error) => {
                    error!(fiber = cell.id, error = %heap.describe_error(*error), "uncaught error");
                    Err(*error)
                }
                FiberOutcome::Aborted(reason) => {
                    error!(fiber = cell.id, %reason, "fiber aborted");
                    Err(heap
                        .allocate_error("Aborted", reason)
                        .unwrap_or(HeapRef::NULL))
                }
            };

            let value = match result {
                Ok(v) | Err(v) => v,
            };
            let mut handle = cell.handle.lock();
            if handle.attached {
                heap.pin(value);
                handle.pinned = Some(value);
            }
            drop(handle);
            cell.completion.resolve(result);
        }

        self.fibers.lock().remove(&cell.id);
        self.adjust_live(|live| live.saturating_sub(1));
    }

    fn maybe_collect(&self) {
        if !self.core.heap.should_collect() {
            return;
        }
        if self
            .collecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.collect_garbage();
            self.collecting.store(false, Ordering::Release);
        }
    }

    fn collect_garbage(&self) -> SweepStats {
        let _world = self.core.world.write();
        let mut roots = Vec::new();
        self.core.modules.roots(&mut roots);
        for cell in self.fibers.lock().values() {
            cell.fiber.lock().roots(&mut roots);
        }
        let stats = self.collector.collect(&self.core.heap, &roots);
        info!(
            freed = stats.freed,
            survivors = stats.survivors,
            roots = roots.len(),
            "collection finished"
        );
        stats
    }

    /// Body of a dedicated fiber thread.
    fn run_dedicated(&self, cell: Arc<FiberCell>) {
        loop {
            let (advance, waiting_on) = {
                let _world = self.core.world.read();
                let mut fiber = cell.fiber.lock();
                if self.shutdown.load(Ordering::Acquire) {
                    (fiber.abort(STOPPED), None)
                } else {
                    fiber.set_status(FiberStatus::Running);
                    let env = self.core.env(self, &self.shutdown);
                    let advance = fiber.advance(&env, Some(DEDICATED_BURST));
                    if advance == Advance::Blocked {
                        fiber.set_status(FiberStatus::Waiting);
                    }
                    (advance, fiber.blocked_on())
                }
            };
            match advance {
                Advance::Finished => break,
                Advance::Blocked => {
                    if let Some(completion) = waiting_on {
                        // The thread is the fiber's own, so it sleeps on the
                        // completion and wakes periodically to see a stop
                        while completion.wait_timeout(IDLE_PARK).is_none()
                            && !self.shutdown.load(Ordering::Acquire)
                        {}
                    }
                }
                Advance::Progress => {}
            }
            self.maybe_collect();
        }
        self.retire(&cell);
    }

    /// Terminate every fiber that has not retired: queued ones and parked
    /// ones alike.
    fn drain(&self) {
        while let Some(cell) = self.next_runnable() {
            self.terminate(&cell);
        }
        let parked: Vec<_> = self.fibers.lock().values().cloned().collect();
        for cell in parked {
            self.terminate(&cell);
        }
    }

    /// Abort and retire `cell` unless it already finished, in which case
    /// whoever finished it retires it.
    fn terminate(&self, cell: &FiberCell) {
        let aborted = {
            let mut fiber = cell.fiber.lock();
            if fiber.is_finished() {
                false
            } else {
                fiber.abort(STOPPED);
                true
            }
        };
        if aborted {
            self.retire(cell);
        }
    }

    /// Forget dedicated threads that have already exited.
    fn reap_dedicated(&self) {
        self.dedicated.lock().retain(|handle| !handle.is_finished());
    }
}

impl Spawner for PoolShared {
    fn spawn(&self, callable: HeapRef, args: ArgVector) -> Result<Completion, VmError> {
        let cell = self.spawn_cell(callable, args, false)?;
        let completion = cell.completion.clone();
        self.enqueue(cell);
        Ok(completion)
    }
}

fn worker_loop(shared: Arc<PoolShared>, index: usize) {
    debug!(worker = index, "worker started");
    while !shared.shutdown.load(Ordering::Acquire) {
        match shared.next_runnable() {
            Some(cell) => {
                shared.run_slice(cell);
                shared.maybe_collect();
            }
            None => shared.park(),
        }
    }
    debug!(worker = index, "worker exiting");
}

/// Bounded worker pool that multiplexes fibers.
pub struct Scheduler {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Start `workers` threads. `burst` is the number of frame advances a
    /// fiber gets per turn while the pool is undersubscribed.
    pub fn new(
        core: Arc<RuntimeCore>,
        collector: Arc<dyn Collector>,
        workers: usize,
        burst: usize,
    ) -> Result<Self, VmError> {
        let workers = workers.max(1);
        let burst = burst.max(1);
        let shared = Arc::new(PoolShared {
            core,
            collector,
            queue: Injector::new(),
            fibers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            workers,
            burst,
            effective_burst: AtomicUsize::new(burst),
            live: Mutex::new(0),
            all_done: Condvar::new(),
            idle: Mutex::new(()),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            collecting: AtomicBool::new(false),
            dedicated: Mutex::new(Vec::new()),
            bursts: AtomicU64::new(0),
        });

        let scheduler = Self {
            shared: Arc::clone(&shared),
            workers: Mutex::new(Vec::with_capacity(workers)),
        };
        for index in 0..workers {
            let worker_shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("weft-worker-{}", index))
                .spawn(move || worker_loop(worker_shared, index))
                .map_err(|err| VmError::unsupported(format!("cannot start worker thread: {}", err)))?;
            scheduler.workers.lock().push(handle);
        }

        info!(workers, burst, "scheduler started");
        Ok(scheduler)
    }

    /// Queue `callable` on a new fiber.
    pub fn spawn(&self, callable: HeapRef, args: ArgVector) -> Result<FiberHandle, VmError> {
        let cell = {
            let _world = self.shared.core.world.read();
            self.shared.spawn_cell(callable, args, true)?
        };
        let handle = self.handle(&cell);
        self.shared.enqueue(cell);
        if self.is_stopped() {
            // Raced with stop(); nothing will run it now
            self.shared.drain();
        }
        Ok(handle)
    }

    /// Run `callable` on a fiber that owns an OS thread of its own. It still
    /// counts as live, is still a collection root, and completes through the
    /// same path as pooled fibers.
    pub fn spawn_dedicated(
        &self,
        callable: HeapRef,
        args: ArgVector,
    ) -> Result<FiberHandle, VmError> {
        let cell = {
            let _world = self.shared.core.world.read();
            self.shared.spawn_cell(callable, args, true)?
        };
        let handle = self.handle(&cell);

        let shared = Arc::clone(&self.shared);
        let thread_cell = Arc::clone(&cell);
        let spawned = thread::Builder::new()
            .name(format!("weft-dedicated-{}", cell.id))
            .spawn(move || shared.run_dedicated(thread_cell));
        match spawned {
            Ok(join) => {
                self.shared.reap_dedicated();
                self.shared.dedicated.lock().push(join);
                Ok(handle)
            }
            Err(err) => {
                cell.fiber.lock().abort(format!("cannot start dedicated thread: {}", err));
                self.shared.retire(&cell);
                Ok(handle)
            }
        }
    }

    fn handle(&self, cell: &Arc<FiberCell>) -> FiberHandle {
        FiberHandle {
            cell: Arc::clone(cell),
            heap: Arc::clone(&self.shared.core.heap),
        }
    }

    /// Block until every spawned fiber has finished.
    pub fn run_to_completion(&self) {
        let mut live = self.shared.live.lock();
        while *live > 0 {
            self.shared.all_done.wait(&mut live);
        }
    }

    /// Fibers spawned and not yet finished.
    pub fn live_count(&self) -> usize {
        *self.shared.live.lock()
    }

    pub fn worker_count(&self) -> usize {
        self.shared.workers
    }

    /// Current per-burst limit; `None` while the pool is saturated.
    pub fn effective_burst(&self) -> Option<usize> {
        self.shared.burst_limit()
    }

    /// Bursts run by pool workers since the scheduler started.
    pub fn bursts_run(&self) -> u64 {
        self.shared.bursts.load(Ordering::Relaxed)
    }

    /// Dedicated fiber threads still tracked for joining at stop.
    pub(crate) fn dedicated_threads(&self) -> usize {
        self.shared.dedicated.lock().len()
    }

    /// Collect now, between bursts.
    pub fn collect_garbage(&self) -> SweepStats {
        self.shared.collect_garbage()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stop the pool. Workers exit after their current burst; fibers still
    /// queued or parked afterwards are terminated.
    pub fn stop(&self) {
        let first = !self.shared.shutdown.swap(true, Ordering::AcqRel);
        self.shared.work_ready.notify_all();

        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
        let dedicated: Vec<_> = self.shared.dedicated.lock().drain(..).collect();
        for handle in dedicated {
            let _ = handle.join();
        }
        self.shared.drain();

        if first {
            info!("scheduler stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Host-side handle to a spawned fiber.
///
/// While the handle is alive the fiber's result stays pinned on the heap.
pub struct FiberHandle {
    cell: Arc<FiberCell>,
    heap: Arc<Heap>,
}

impl FiberHandle {
    pub fn id(&self) -> FiberId {
        self.cell.id
    }

    pub fn status(&self) -> FiberStatus {
        self.cell.fiber.lock().status()
    }

    pub fn is_finished(&self) -> bool {
        self.cell.completion.is_resolved()
    }

    /// Wait for the fiber to finish.
    pub fn join(&self) -> FiberOutcome {
        let _ = self.cell.completion.wait();
        self.outcome_now()
    }

    pub fn join_timeout(&self, timeout: Duration) -> Option<FiberOutcome> {
        self.cell
            .completion
            .wait_timeout(timeout)
            .map(|_| self.outcome_now())
    }

    pub fn try_outcome(&self) -> Option<FiberOutcome> {
        self.cell
            .completion
            .poll()
            .is_some()
            .then(|| self.outcome_now())
    }

    /// The completion resolved when the fiber retires.
    pub fn completion(&self) -> Completion {
        self.cell.completion.clone()
    }

    fn outcome_now(&self) -> FiberOutcome {
        self.cell
            .fiber
            .lock()
            .outcome()
            .cloned()
            .unwrap_or_else(|| FiberOutcome::Aborted(STOPPED.to_string()))
    }
}

impl Drop for FiberHandle {
    fn drop(&mut self) {
        let mut handle = self.cell.handle.lock();
        handle.attached = false;
        if let Some(value) = handle.pinned.take() {
            self.heap.unpin(value);
        }
    }
}

impl std::fmt::Debug for FiberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberHandle")
            .field("id", &self.cell.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}
