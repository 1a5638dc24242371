//! A cooperative async runtime built atop a worker thread pool.
//!
//! Tasks are ordinary closures run on their own stack; they suspend and
//! resume at explicit points — [`yield_now`], [`sleep`], and awaiting a
//! [`JoinHandle`] — without unwinding the call stack, so ordinary recursion
//! and call graphs work unmodified. A fixed number of OS threads
//! multiplexes an unbounded number of tasks over one shared queue.
//!
//! ```ignore
//! let pool = coropool::Pool::new(4)?;
//! let handle = pool.spawn(|| 2 + 2)?;
//! assert_eq!(handle.join(), 4);
//! pool.close(false);
//! ```
//!
//! Work stealing, task priorities, affinity, and async I/O integration are
//! not provided; see the [`pool`] module docs for what is.

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    rustdoc::broken_intra_doc_links
)]

mod atomic;
mod error;
mod handle;
mod pool;
mod queue;
mod singleton;
mod stack;
mod task;
mod worker;

pub use atomic::{atomic_end, atomic_start, AtomicAlloc, AtomicSection};
pub use error::{Error, Result};
pub use handle::{JoinHandle, Outcome};
pub use pool::{Builder, Pool};
pub use worker::{is_worker, sleep, yield_now};

/// The process-wide convenience pool: a thin, optional accessor over an
/// explicit [`Pool`]. Prefer owning a `Pool` directly unless a single
/// shared instance is genuinely easier to thread through your program.
pub mod global {
    pub use crate::singleton::{await_handle, close, init, run};
}
