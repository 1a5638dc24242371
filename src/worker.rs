//! Per-thread worker state and the task-switching primitives tasks call
//! into: [`yield_now`], [`sleep`], and the abort check folded into both.
//!
//! Mirrors `worker_main`/`task_main`/`yield_to_worker` in `worker_pool.rs`:
//! each worker OS thread runs a small loop (`run` here, `worker_main` there)
//! that resumes a task's saved [`context::Context`] and interprets whatever
//! [`Signal`] comes back across the stack switch. Unlike the teacher there
//! is no work-stealing deque: every worker pulls from one shared [`Queue`],
//! matching `queue.c`/`threadpool.c`'s single global queue, since work
//! stealing is explicitly out of scope here.

use crate::pool::PoolInner;
use crate::task::{Task, TaskKind, TaskOutcome};
use context::{Context, Transfer};
use std::cell::Cell;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

thread_local! {
    static CURRENT: Cell<Option<*const WorkerState>> = const { Cell::new(None) };
}

/// Data a worker thread publishes about itself for the duration of its
/// `run` loop, readable by the task-switching free functions below. Per §4.D
/// of the source design: "thread-local data must be re-read after every
/// context switch", since a resumed task may land on a different worker.
struct WorkerState {
    /// The task currently executing on this worker, valid only while a
    /// task's context is actually running (i.e. while we're inside the
    /// window between resuming it and it yielding back).
    active_task: Cell<*mut Task>,
}

/// True if called from a worker thread currently running a task. `yield_now`
/// and `sleep` are only meaningful there; calling them elsewhere panics,
/// matching the source's "undefined behavior off a worker thread" stance
/// made explicit instead of silent.
pub fn is_worker() -> bool {
    CURRENT.with(|c| c.get().is_some())
}

/// Marker panic payload used to unwind an aborted task's native stack
/// without mistaking the unwind for a genuine panic in the task body.
struct AbortUnwind;

/// Suspends the current task, returning control to its worker so another
/// ready task can run. The task is re-enqueued at the back of the shared
/// queue and may resume on a different worker thread entirely.
///
/// # Panics
///
/// Panics if called off a worker thread. Panics (by unwinding the task's own
/// stack) if the task's handle has been marked `Aborting` since it last ran.
pub fn yield_now() {
    suspend(Signal::Yielded);
}

/// Suspends the current task until at least `duration` has elapsed. Other
/// tasks may run on this and other workers while it is parked; this does
/// not block the OS thread.
///
/// # Panics
///
/// Same as [`yield_now`].
pub fn sleep(duration: Duration) {
    suspend(Signal::Sleeping(Instant::now() + duration));
}

/// What a suspending task hands back to its worker across the stack switch.
pub(crate) enum Signal {
    Yielded,
    Sleeping(Instant),
    Completed(TaskOutcome),
}

fn current() -> &'static WorkerState {
    let ptr = CURRENT
        .with(Cell::get)
        .expect("coropool::yield_now/sleep called off a worker thread");
    // Safety: a worker publishes this pointer for the lifetime of its `run`
    // loop and clears it only after every task has retired; the pointer is
    // read only from the thread that owns it.
    unsafe { &*ptr }
}

fn abort_if_requested(task: &Task) {
    if task.destination.should_abort() {
        std::panic::panic_any(AbortUnwind);
    }
}

fn suspend(signal: Signal) {
    let state = current();
    let task = unsafe { &mut *state.active_task.get() };
    abort_if_requested(task);

    let worker_ctx = task
        .resume_ctx
        .take()
        .expect("task has no context to yield to");
    let boxed = Box::new(signal);
    let transfer = unsafe { worker_ctx.resume(Box::into_raw(boxed) as usize) };

    // The switch back into us may have happened on a different thread than
    // the one that suspended: re-resolve `CURRENT` rather than reusing
    // `state`/`task`, which belonged to the old thread's stack frame, before
    // touching the task through it.
    let state = current();
    let task = unsafe { &mut *state.active_task.get() };
    task.resume_ctx = Some(transfer.context);
    abort_if_requested(task);
}

/// The entry point installed on a fresh task stack. Runs the task's work
/// closure to completion (or until it panics or is aborted), then retires
/// it by handing a final [`Signal::Completed`] back to the worker. Mirrors
/// `task_main` in `worker_pool.rs`, including its `catch_unwind` wrapping,
/// minus the per-stack reuse loop: here each [`Context`] backs exactly one
/// task, and the stack itself (not the `Context`) is what gets recycled.
extern "C" fn task_trampoline(transfer: Transfer) -> ! {
    let state = current();
    let task = unsafe { &mut *state.active_task.get() };
    task.resume_ctx = Some(transfer.context);

    let work = task.take_work();
    let outcome = match std::panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(value) => TaskOutcome::Value(value),
        Err(payload) => {
            if payload.downcast_ref::<AbortUnwind>().is_some() {
                // Discarded, not reported: an aborted task's result (if it
                // has one at all) is never delivered.
                TaskOutcome::Panic(Box::new(AbortUnwind))
            } else {
                TaskOutcome::Panic(payload)
            }
        }
    };

    let state = current();
    let task = unsafe { &mut *state.active_task.get() };
    let worker_ctx = task
        .resume_ctx
        .take()
        .expect("task has no context to retire through");
    let boxed = Box::new(Signal::Completed(outcome));
    let _ = unsafe { worker_ctx.resume(Box::into_raw(boxed) as usize) };
    unreachable!("a retired task's stack is never resumed again")
}

/// Whether a [`TaskOutcome::Panic`] payload is the abort marker rather than
/// a genuine panic, i.e. whether it should be discarded silently instead of
/// delivered to the task's destination.
fn is_abort_marker(payload: &(dyn std::any::Any + Send)) -> bool {
    payload.downcast_ref::<AbortUnwind>().is_some()
}

/// Runs the worker loop for one OS thread until the pool is closed and its
/// queues are drained. Mirrors `worker_main`: dequeue, install as current,
/// switch into its context, interpret what comes back, repeat.
pub(crate) fn run(pool: Arc<PoolInner>) {
    // Leaked and reclaimed explicitly below, the same way `WORKER` is
    // published and later freed in `worker_pool.rs`'s thread body: a stack
    // local wouldn't let `current()` soundly hand out a `&'static`
    // reference across an arbitrary number of task context switches.
    let state: &'static WorkerState = Box::leak(Box::new(WorkerState {
        active_task: Cell::new(std::ptr::null_mut()),
    }));
    CURRENT.with(|c| c.set(Some(state as *const WorkerState)));

    loop {
        pool.promote_ready_sleepers();
        let deadline = pool.next_wake();

        let mut task = match pool.ready.dequeue_until(deadline) {
            crate::queue::Wait::Item(task) => task,
            crate::queue::Wait::TimedOut => continue,
            crate::queue::Wait::Unblocked => break,
        };

        state.active_task.set(&mut task as *mut Task);

        let ctx = match task.kind {
            TaskKind::Initial => {
                let stack = task.stack.as_ref().expect("initial task has no stack");
                // Safety: `stack` outlives this context; the context never
                // escapes this loop iteration without the stack attached.
                unsafe { Context::new(&stack.as_stack(), task_trampoline) }
            }
            TaskKind::Resume => task
                .resume_ctx
                .take()
                .expect("resumable task has no saved context"),
        };

        // Safety: tasks are well-behaved per the contract documented on
        // `yield_now`/`sleep`/`JoinHandle::join`.
        let transfer = unsafe { ctx.resume(0) };
        state.active_task.set(std::ptr::null_mut());

        // Safety: `task_trampoline` and `suspend` always box a `Signal`
        // before resuming back to us and never drop it themselves.
        let signal = unsafe { Box::from_raw(transfer.data as *mut Signal) };

        match *signal {
            Signal::Yielded => {
                task.resume_ctx = Some(transfer.context);
                task.kind = TaskKind::Resume;
                pool.ready.enqueue(task);
            }
            Signal::Sleeping(wake_at) => {
                task.resume_ctx = Some(transfer.context);
                task.kind = TaskKind::Resume;
                pool.sleep_until(task, wake_at);
            }
            Signal::Completed(outcome) => {
                retire(&pool, task, outcome);
            }
        }
    }

    CURRENT.with(|c| c.set(None));

    // Safety: `CURRENT` has been cleared and no task is executing on this
    // thread, so nothing else can still be holding the pointer we leaked.
    unsafe { drop(Box::from_raw(state as *const WorkerState as *mut WorkerState)) };
}

fn retire(pool: &PoolInner, mut task: Task, outcome: TaskOutcome) {
    if let TaskOutcome::Panic(payload) = &outcome {
        if is_abort_marker(payload.as_ref()) {
            log::debug!("task aborted on timeout, result discarded");
            if let Some(stack) = task.stack.take() {
                pool.stacks.lock().release(stack);
            }
            pool.task_finished();
            return;
        }
    }
    task.destination.deliver(outcome);
    if let Some(stack) = task.stack.take() {
        pool.stacks.lock().release(stack);
    }
    pool.task_finished();
}
