//! Fibers: cooperatively scheduled stacks of frames.

use crate::error::VmError;
use crate::vm::frame::{Frame, INSTRUCTION_SLICE};
use crate::vm::result::FrameStep;
use crate::vm::ExecEnv;
use std::time::Instant;
use tracing::debug;
use weft_types::{ArgVector, Completion, HeapRef, RootSource};

/// Maximum call stack depth
pub const MAX_CALL_DEPTH: usize = 10_000;

pub type FiberId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    Created,
    Running,
    Queued,
    /// Parked until the completion its top frame waits on resolves
    Waiting,
    Completed,
    Terminated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FiberOutcome {
    Returned(HeapRef),
    /// Uncaught language-level error
    Raised(HeapRef),
    /// Host fault such as allocation failure or a scheduler stop
    Aborted(String),
}

impl FiberOutcome {
    pub fn value(&self) -> Option<HeapRef> {
        match self {
            FiberOutcome::Returned(v) | FiberOutcome::Raised(v) => Some(*v),
            FiberOutcome::Aborted(_) => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, FiberOutcome::Returned(_))
    }
}

/// Result of advancing a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Still runnable
    Progress,
    /// The top frame waits on a completion
    Blocked,
    Finished,
}

pub struct Fiber {
    id: FiberId,
    frames: Vec<Frame>,
    status: FiberStatus,
    created_at: Instant,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    outcome: Option<FiberOutcome>,
}

impl Fiber {
    pub fn new(id: FiberId, root: Frame) -> Self {
        Self {
            id,
            frames: vec![root],
            status: FiberStatus::Created,
            created_at: Instant::now(),
            started_at: None,
            finished_at: None,
            outcome: None,
        }
    }

    /// A fiber that will run `callable` with `args`.
    pub fn spin(
        id: FiberId,
        env: &ExecEnv,
        callable: HeapRef,
        args: ArgVector,
    ) -> Result<Self, VmError> {
        Ok(Self::new(id, Frame::invoke(env, callable, args)?))
    }

    pub fn id(&self) -> FiberId {
        self.id
    }

    pub fn status(&self) -> FiberStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: FiberStatus) {
        if !self.is_finished() {
            self.status = status;
        }
    }

    pub fn outcome(&self) -> Option<&FiberOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The unresolved completion the top frame waits on, if any.
    pub(crate) fn blocked_on(&self) -> Option<Completion> {
        self.frames.last().and_then(Frame::pending).cloned()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at
    }

    /// Pop the top frame, advance it once and route whatever it produced.
    pub fn advance_frame(&mut self, env: &ExecEnv) -> Advance {
        if self.is_finished() {
            return Advance::Finished;
        }
        self.started_at.get_or_insert_with(Instant::now);
        let Some(mut frame) = self.frames.pop() else {
            return self.finish(FiberOutcome::Returned(HeapRef::NULL));
        };

        match frame.advance(env, self.id, INSTRUCTION_SLICE) {
            Ok(FrameStep::Yield) => {
                self.frames.push(frame);
                Advance::Progress
            }
            Ok(FrameStep::Blocked) => {
                self.frames.push(frame);
                Advance::Blocked
            }
            Ok(FrameStep::Call(child)) => {
                if self.frames.len() + 1 >= MAX_CALL_DEPTH {
                    return self.overflow(env, frame);
                }
                debug!(fiber = self.id, callee = child.name(), depth = self.frames.len() + 2, "push frame");
                self.frames.push(frame);
                self.frames.push(*child);
                Advance::Progress
            }
            Ok(FrameStep::Return(value)) => {
                debug!(fiber = self.id, frame = frame.name(), "pop frame");
                match self.frames.last_mut() {
                    Some(parent) => {
                        parent.resume(value);
                        Advance::Progress
                    }
                    None => self.finish(FiberOutcome::Returned(value)),
                }
            }
            Ok(FrameStep::Raise(error)) => {
                debug!(fiber = self.id, frame = frame.name(), "pop frame with error");
                match self.frames.last_mut() {
                    Some(parent) => {
                        parent.deliver_error(error);
                        Advance::Progress
                    }
                    None => self.finish(FiberOutcome::Raised(error)),
                }
            }
            Err(fatal) => self.abort(fatal.to_string()),
        }
    }

    /// Advance until the fiber finishes, blocks, or spends `burst` frame
    /// advances. `None` runs unbounded, though a pause request from the
    /// environment still ends the burst.
    pub fn advance(&mut self, env: &ExecEnv, burst: Option<usize>) -> Advance {
        let mut steps = 0;
        loop {
            match self.advance_frame(env) {
                Advance::Progress => {}
                other => return other,
            }
            steps += 1;
            match burst {
                Some(limit) if steps >= limit => return Advance::Progress,
                None if env.should_pause() => return Advance::Progress,
                _ => {}
            }
        }
    }

    /// Terminate without running any more frames.
    pub fn abort(&mut self, reason: impl Into<String>) -> Advance {
        self.frames.clear();
        self.finish(FiberOutcome::Aborted(reason.into()))
    }

    fn overflow(&mut self, env: &ExecEnv, mut frame: Frame) -> Advance {
        let message = format!("call depth exceeded {}", MAX_CALL_DEPTH);
        match env.heap.allocate_error("StackOverflow", &message) {
            Ok(error) => {
                frame.deliver_error(error);
                self.frames.push(frame);
                Advance::Progress
            }
            Err(err) => self.abort(err.to_string()),
        }
    }

    fn finish(&mut self, outcome: FiberOutcome) -> Advance {
        self.status = match outcome {
            FiberOutcome::Returned(_) => FiberStatus::Completed,
            _ => FiberStatus::Terminated,
        };
        self.finished_at = Some(Instant::now());
        self.outcome = Some(outcome);
        Advance::Finished
    }
}

impl RootSource for Fiber {
    fn roots(&self, out: &mut Vec<HeapRef>) {
        for frame in &self.frames {
            frame.roots(out);
        }
        if let Some(value) = self.outcome.as_ref().and_then(FiberOutcome::value) {
            out.push(value);
        }
    }
}
