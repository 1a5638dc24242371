//! Synchronization endpoint between a task's producer and its result.
//!
//! Mirrors `tpool_handle` in `threadpool.c`, generalized with a timeout and
//! an abort path (`tpool_task_await(handle, timeout, timeout_val)` in a
//! later source variant). A handle is single-consumer: [`JoinHandle::join`]
//! and friends take `self` by value, so the type system rules out a second
//! awaiter rather than leaving it as unspecified behavior.
//!
//! The specification treats a task panic as marshaling nothing back through
//! the handle at all ("implementations in languages with structured error
//! propagation SHOULD catch at the wrapper boundary and surface a distinct
//! error kind"). This crate does that: a panicking task is caught at the
//! task trampoline (see `worker.rs`, grounded on the `catch_unwind` +
//! `PanicData` wrapping in `worker_pool.rs`'s `task_main`) and its payload is
//! delivered as [`Outcome::Panicked`] rather than silently dropped.

use crate::worker;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The result of awaiting a [`JoinHandle`].
#[derive(Debug)]
pub enum Outcome<T> {
    /// The task ran to completion.
    Completed(T),
    /// The task's body panicked; the payload is whatever `std::panic::catch_unwind` caught.
    Panicked(Box<dyn Any + Send>),
    /// The deadline passed before the task completed. The task is marked
    /// for abort at its next yield; any result it later produces is
    /// discarded.
    TimedOut,
}

impl<T> Outcome<T> {
    /// Returns the completed value, or `default` for any other outcome.
    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Outcome::Completed(value) => value,
            _ => default,
        }
    }

    /// Returns the completed value, resuming a caught panic or panicking
    /// with a message on timeout.
    pub fn unwrap(self) -> T {
        match self {
            Outcome::Completed(value) => value,
            Outcome::Panicked(payload) => std::panic::resume_unwind(payload),
            Outcome::TimedOut => panic!("join() deadline expired"),
        }
    }
}

pub(crate) enum Delivery {
    Value(Box<dyn Any + Send>),
    Panic(Box<dyn Any + Send>),
}

pub(crate) enum HandleState {
    Waiting,
    Finished(Delivery),
    /// Set by a timed-out awaiter; observed by the task at its next yield,
    /// at which point it is retired without delivering its result.
    Aborting,
}

pub(crate) struct RawHandle {
    state: Mutex<HandleState>,
    cond: Condvar,
}

impl RawHandle {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HandleState::Waiting),
            cond: Condvar::new(),
        })
    }

    pub(crate) fn finish(&self, delivery: Delivery) {
        let mut state = self.state.lock();
        *state = HandleState::Finished(delivery);
        drop(state);
        self.cond.notify_all();
    }

    /// Called by the task's own worker at its next yield point. Returns
    /// `true` if the task should abort instead of continuing.
    pub(crate) fn should_abort(&self) -> bool {
        matches!(*self.state.lock(), HandleState::Aborting)
    }
}

/// A handle to a spawned task's eventual result.
///
/// Awaiting consumes the handle: there is no way to observe a result twice,
/// and the type system rules out two concurrent awaiters.
pub struct JoinHandle<T> {
    raw: Arc<RawHandle>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> JoinHandle<T> {
    pub(crate) fn new(raw: Arc<RawHandle>) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Blocks (or, on a worker thread, yields) until the task completes.
    /// Panics if the task itself panicked.
    pub fn join(self) -> T {
        self.join_timeout(None).unwrap()
    }

    /// Waits at most `timeout` for the task to complete.
    pub fn join_timeout(self, timeout: Option<Duration>) -> Outcome<T> {
        let on_worker = worker::is_worker();
        let deadline = timeout.map(|d| Instant::now() + d);

        let mut state = self.raw.state.lock();
        loop {
            match &*state {
                HandleState::Waiting => {}
                HandleState::Finished(_) => break,
                HandleState::Aborting => unreachable!("only an awaiter sets Aborting"),
            }

            if on_worker {
                // A worker must never block its OS thread on another task's
                // completion: that dependency might only ever run on this
                // very thread. Yield back to the scheduler instead, which
                // may resume us on a different worker entirely.
                drop(state);
                worker::yield_now();
                state = self.raw.state.lock();

                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline && matches!(&*state, HandleState::Waiting) {
                        *state = HandleState::Aborting;
                        drop(state);
                        return Outcome::TimedOut;
                    }
                }
            } else if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    *state = HandleState::Aborting;
                    drop(state);
                    return Outcome::TimedOut;
                }
                let timed_out = self
                    .raw
                    .cond
                    .wait_for(&mut state, deadline - now)
                    .timed_out();
                if timed_out && matches!(&*state, HandleState::Waiting) {
                    *state = HandleState::Aborting;
                    drop(state);
                    return Outcome::TimedOut;
                }
            } else {
                self.raw.cond.wait(&mut state);
            }
        }

        match std::mem::replace(&mut *state, HandleState::Aborting) {
            HandleState::Finished(Delivery::Value(result)) => Outcome::Completed(
                *result
                    .downcast::<T>()
                    .expect("task result type mismatch with JoinHandle<T>"),
            ),
            HandleState::Finished(Delivery::Panic(payload)) => Outcome::Panicked(payload),
            _ => unreachable!(),
        }
    }

    /// Like [`join_timeout`](Self::join_timeout), but returns `default` for
    /// a timeout and resumes the panic for a panicked task — the literal
    /// shape of `tpool_task_await(handle, timeout, timeout_val)`.
    pub fn join_or(self, timeout: Duration, default: T) -> T {
        self.join_timeout(Some(timeout)).unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_then_join_returns_value() {
        let raw = RawHandle::new();
        raw.finish(Delivery::Value(Box::new(42i32)));
        let handle: JoinHandle<i32> = JoinHandle::new(raw);
        assert_eq!(handle.join(), 42);
    }

    #[test]
    fn join_timeout_outside_pool_returns_timed_out_on_expiry() {
        let raw = RawHandle::new();
        let handle: JoinHandle<i32> = JoinHandle::new(raw);
        let result = handle.join_timeout(Some(Duration::from_millis(20)));
        assert!(matches!(result, Outcome::TimedOut));
    }

    #[test]
    fn join_or_returns_default_on_timeout() {
        let raw = RawHandle::new();
        let handle: JoinHandle<i32> = JoinHandle::new(raw);
        assert_eq!(handle.join_or(Duration::from_millis(20), -1), -1);
    }

    #[test]
    fn panic_delivery_resumes_on_unwrap() {
        let raw = RawHandle::new();
        raw.finish(Delivery::Panic(Box::new("boom")));
        let handle: JoinHandle<i32> = JoinHandle::new(raw);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handle.join()));
        assert!(result.is_err());
    }
}
