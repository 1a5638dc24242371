use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the pool.
///
/// Misuse that the specification leaves undefined behavior for (awaiting a
/// handle from two consumers, yielding off a worker thread, unbalanced atomic
/// sections, enqueuing during [`Pool::close`](crate::Pool::close)) is not
/// represented here: it panics instead, matching the `debug_assert`-heavy
/// style of the source this crate is based on.
#[derive(Debug, Error)]
pub enum Error {
    /// A worker thread failed to spawn.
    #[error("failed to spawn worker thread: {0}")]
    InitFailure(#[from] std::io::Error),

    /// Every task slot is in use and no further stacks may be allocated.
    #[error("stack pool exhausted: {allocated} stacks already live")]
    StacksExhausted {
        /// Number of stacks currently allocated.
        allocated: usize,
    },
}
