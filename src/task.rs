//! The task object: a work closure, its destination for the result, and the
//! stack plus saved machine context needed to suspend and resume it.
//!
//! Grounded on the `task_t` struct and `task_wrapper`/`run_task` trampoline
//! in `threadpool.c`: a task is either `Initial` (never run, needs a fresh
//! stack and context installed) or `Resume` (was yielded, its context is
//! simply switched back into). An abort doesn't need a third queue state of
//! its own here: it's detected by the task itself at its next suspension
//! point (see `worker::suspend`), which unwinds that task's native stack
//! there and then instead of waiting for the worker to notice separately.

use crate::handle::{Delivery, RawHandle};
use crate::queue::Queue;
use crate::stack::StackHandle;
use std::any::Any;
use std::sync::Arc;

pub(crate) type BoxedWork = Box<dyn FnOnce() -> Box<dyn Any + Send> + Send>;
pub(crate) type ResultQueue = Queue<Box<dyn Any + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    Initial,
    Resume,
}

/// A task's outcome as observed by the trampoline that ran it: either the
/// boxed return value, or the payload `std::panic::catch_unwind` caught.
pub(crate) enum TaskOutcome {
    Value(Box<dyn Any + Send>),
    Panic(Box<dyn Any + Send>),
}

/// Where a task's result goes once it completes. The sentinel-pointer
/// encoding in the source (`QUEUE_RESULT`/`DISCARD_RESULT` as low integers
/// masquerading as handle pointers) becomes a plain enum here.
pub(crate) enum Destination {
    Handle(Arc<RawHandle>),
    QueueResult(Arc<ResultQueue>),
    Discard,
}

impl Destination {
    pub(crate) fn deliver(&self, outcome: TaskOutcome) {
        match (self, outcome) {
            (Destination::Handle(handle), TaskOutcome::Value(result)) => {
                handle.finish(Delivery::Value(result))
            }
            (Destination::Handle(handle), TaskOutcome::Panic(payload)) => {
                handle.finish(Delivery::Panic(payload))
            }
            (Destination::QueueResult(queue), TaskOutcome::Value(result)) => {
                queue.enqueue(result)
            }
            (Destination::QueueResult(_), TaskOutcome::Panic(payload)) => {
                log::error!("task panicked with no handle to report it to: {:?}", panic_message(&payload));
            }
            (Destination::Discard, TaskOutcome::Value(_)) => {}
            (Destination::Discard, TaskOutcome::Panic(payload)) => {
                log::error!("discarded task panicked: {:?}", panic_message(&payload));
            }
        }
    }

    /// Whether the eventual awaiter (if any) has asked this task to abort.
    pub(crate) fn should_abort(&self) -> bool {
        match self {
            Destination::Handle(handle) => handle.should_abort(),
            Destination::QueueResult(_) | Destination::Discard => false,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

/// A unit of scheduled work: a stackful coroutine that runs `work` to
/// completion, suspending at `yield`/`await`/`sleep` points without
/// unwinding its call stack.
pub(crate) struct Task {
    pub(crate) kind: TaskKind,
    pub(crate) destination: Destination,
    work: Option<BoxedWork>,
    pub(crate) stack: Option<StackHandle>,
    /// The context to switch into to continue this task. `None` exactly
    /// while the task is actively running on some worker.
    pub(crate) resume_ctx: Option<context::Context>,
}

// Safety: a `Task` is handed between exactly one worker at a time; it is
// never accessed concurrently. The raw `context::Context` it carries is not
// `Send` by default only because the crate can't prove that, not because
// sharing it is actually unsound here.
unsafe impl Send for Task {}

impl Task {
    pub(crate) fn new(work: BoxedWork, destination: Destination) -> Self {
        Self {
            kind: TaskKind::Initial,
            destination,
            work: Some(work),
            stack: None,
            resume_ctx: None,
        }
    }

    pub(crate) fn take_work(&mut self) -> BoxedWork {
        self.work.take().expect("task work already taken")
    }
}
