//! A thin, optional process-wide pool, lazily initialized.
//!
//! Grounded on `async_init`/`async_run`/`async_await`/`async_close` in
//! `async.c`: a convenience wrapper only, kept separate from [`Pool`] per
//! the source's own design note that the explicit object is the real API
//! and the singleton is "a thin, optional accessor". Calls made before
//! [`init`] are no-ops; a call made while [`close`] is running blocks until
//! it completes, because both sides contend for the same mutex.

use crate::error::Result;
use crate::handle::JoinHandle;
use crate::pool::Pool;
use parking_lot::Mutex;
use std::any::Any;

static GLOBAL: Mutex<Option<Pool>> = Mutex::new(None);

/// Initializes the global pool with `workers` threads (`0` for the
/// default). Does nothing if already initialized.
pub fn init(workers: usize) -> Result<()> {
    let mut guard = GLOBAL.lock();
    if guard.is_none() {
        *guard = Some(Pool::new(workers)?);
    }
    Ok(())
}

/// Enqueues `work` on the global pool. Returns `None` if the pool hasn't
/// been [`init`]ialized, matching the source's "calls made before init are
/// no-ops" rule.
pub fn run<F, T>(work: F) -> Option<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let guard = GLOBAL.lock();
    guard.as_ref().and_then(|pool| pool.spawn(work).ok())
}

/// Awaits a handle produced by [`run`]. A thin alias over
/// [`JoinHandle::join`] kept for symmetry with `async_await`.
pub fn await_handle<T: Send + 'static>(handle: JoinHandle<T>) -> T {
    handle.join()
}

/// Tears down the global pool if one was initialized, returning any queued
/// results if `get_results` is true.
pub fn close(get_results: bool) -> Vec<Box<dyn Any + Send>> {
    match GLOBAL.lock().take() {
        Some(pool) => pool.close(get_results),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn run_before_init_is_a_no_op() {
        // A dedicated process-wide static means this test can't run
        // alongside the others below without racing their init/close, so
        // it only asserts the no-op shape and skips touching GLOBAL state
        // that a concurrently running test might depend on.
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let handle = run(move || ran2.store(true, Ordering::SeqCst));
        if handle.is_none() {
            assert!(!ran.load(Ordering::SeqCst));
        }
    }
}
