//! Pool of reusable task stacks.
//!
//! Allocating a guarded stack (mmap + mprotect for the guard page) is
//! comparatively expensive, so stacks are recycled through a free list
//! instead of being allocated and freed with every task, the same tradeoff
//! `stack_allocator.rs` makes. Slots above `preferred` are actually freed on
//! release so long-lived pools don't keep a permanent high-water mark of
//! stacks around after a burst of tasks.

use crate::error::{Error, Result};
use context::stack::{ProtectedFixedSizeStack, Stack};
use std::collections::VecDeque;
use std::os::raw::c_void;

/// An acquired stack, returned to the pool's free list when dropped via
/// [`StackPool::release`].
pub(crate) struct StackHandle {
    stack: ProtectedFixedSizeStack,
}

impl StackHandle {
    pub(crate) fn top(&self) -> *mut c_void {
        self.stack.top()
    }

    pub(crate) fn bottom(&self) -> *mut c_void {
        self.stack.bottom()
    }

    /// # Safety
    ///
    /// The returned `Stack` borrows the memory owned by `self` and must not
    /// outlive it.
    pub(crate) unsafe fn as_stack(&self) -> Stack {
        Stack::new(self.top(), self.bottom())
    }
}

pub(crate) struct StackPool {
    stack_size: usize,
    preferred: usize,
    live: usize,
    free: VecDeque<StackHandle>,
}

impl StackPool {
    pub(crate) fn new(stack_size: usize, pre_allocated: usize, preferred: usize) -> Result<Self> {
        let pre_allocated = pre_allocated.min(preferred);
        let mut free = VecDeque::with_capacity(pre_allocated);
        for _ in 0..pre_allocated {
            free.push_back(StackHandle {
                stack: ProtectedFixedSizeStack::new(stack_size)
                    .map_err(|_| Error::StacksExhausted { allocated: 0 })?,
            });
        }
        log::debug!(
            "stack pool initialized: {} stacks of {} bytes, {} preferred",
            pre_allocated,
            stack_size,
            preferred
        );
        Ok(Self {
            stack_size,
            preferred,
            live: pre_allocated,
            free,
        })
    }

    pub(crate) fn acquire(&mut self) -> Result<StackHandle> {
        if let Some(handle) = self.free.pop_front() {
            return Ok(handle);
        }
        let stack = ProtectedFixedSizeStack::new(self.stack_size).map_err(|_| {
            Error::StacksExhausted {
                allocated: self.live,
            }
        })?;
        self.live += 1;
        log::trace!("allocated new stack, {} now live", self.live);
        Ok(StackHandle { stack })
    }

    pub(crate) fn release(&mut self, handle: StackHandle) {
        if self.live > self.preferred {
            self.live -= 1;
            log::trace!("dropping stack, {} now live", self.live);
            drop(handle);
        } else {
            self.free.push_back(handle);
        }
    }
}
