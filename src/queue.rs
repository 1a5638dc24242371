//! An unbounded multi-producer/multi-consumer FIFO queue.
//!
//! Ported from the two-stack queue in `queue.c`: items are pushed onto an
//! `in` stack and popped off an `out` stack, with `out` refilled by draining
//! (and thereby reversing) `in` whenever it runs dry. Amortized O(1) per
//! operation, a single lock held for the duration of each push/pop.
//!
//! The original keeps the body (`in`/`out`/`count`) behind one mutex and the
//! wake condition behind a second one, so that a blocked consumer never holds
//! the body lock while parked. `parking_lot::Condvar` isn't tied to a
//! specific mutex the way a pthread condvar is, so that split buys nothing
//! here: one mutex guards everything and the condvar parks directly on it.

use parking_lot::{Condvar, Mutex};
use std::time::Instant;

/// Outcome of a bounded wait on the queue, used by the worker loop to tell
/// "nothing ready yet, but keep running" apart from "shut down".
pub(crate) enum Wait<T> {
    Item(T),
    TimedOut,
    Unblocked,
}

struct Body<T> {
    r#in: Vec<T>,
    out: Vec<T>,
    count: usize,
    unblocked: bool,
}

/// An unbounded FIFO queue with a blocking `dequeue` and a broadcastable
/// "unblock" state used to shut the queue down.
pub(crate) struct Queue<T> {
    body: Mutex<Body<T>>,
    not_empty: Condvar,
}

impl<T> Queue<T> {
    pub(crate) fn new() -> Self {
        Self {
            body: Mutex::new(Body {
                r#in: Vec::new(),
                out: Vec::new(),
                count: 0,
                unblocked: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Number of items currently queued.
    pub(crate) fn len(&self) -> usize {
        self.body.lock().count
    }

    pub(crate) fn enqueue(&self, item: T) {
        let mut body = self.body.lock();
        body.r#in.push(item);
        body.count += 1;
        drop(body);
        self.not_empty.notify_one();
    }

    /// Pops the next item in FIFO order, blocking until one is available or
    /// the queue has been unblocked.
    pub(crate) fn dequeue(&self) -> Option<T> {
        let mut body = self.body.lock();
        while body.count == 0 && !body.unblocked {
            self.not_empty.wait(&mut body);
        }
        Self::pop_locked(&mut body)
    }

    /// Like [`dequeue`](Self::dequeue), but gives up and returns
    /// [`Wait::TimedOut`] once `deadline` passes instead of blocking
    /// indefinitely. A `None` deadline blocks as `dequeue` does.
    ///
    /// Used by the worker loop so a thread with sleeping tasks to wake can
    /// still notice new work arriving on the shared queue in the meantime,
    /// rather than sleeping past the soonest wakeup.
    pub(crate) fn dequeue_until(&self, deadline: Option<Instant>) -> Wait<T> {
        let mut body = self.body.lock();
        loop {
            if let Some(item) = Self::pop_locked(&mut body) {
                return Wait::Item(item);
            }
            if body.unblocked {
                return Wait::Unblocked;
            }
            match deadline {
                None => self.not_empty.wait(&mut body),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Wait::TimedOut;
                    }
                    self.not_empty.wait_for(&mut body, deadline - now);
                }
            }
        }
    }

    fn pop_locked(body: &mut Body<T>) -> Option<T> {
        if body.out.is_empty() {
            // Reverse `in` into `out`, preserving FIFO order.
            while let Some(item) = body.r#in.pop() {
                body.out.push(item);
            }
        }
        let item = body.out.pop();
        if item.is_some() {
            body.count -= 1;
        }
        item
    }

    /// Marks the queue as unblocked: every waiting and future `dequeue` on an
    /// empty queue returns `None` instead of blocking. Used at pool shutdown.
    pub(crate) fn unblock(&self) {
        let mut body = self.body.lock();
        body.unblocked = true;
        drop(body);
        self.not_empty.notify_all();
    }

    /// Drains the queue into a `Vec`, preserving enqueue order. Used by
    /// `close(get_results = true)` once no producer can race the drain.
    pub(crate) fn drain_ordered(&self) -> Vec<T> {
        let mut body = self.body.lock();
        let mut out = Vec::with_capacity(body.count);
        while let Some(item) = Self::pop_locked(&mut body) {
            out.push(item);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_single_producer_single_consumer() {
        let q = Queue::new();
        q.enqueue('a');
        q.enqueue('b');
        q.enqueue('c');
        assert_eq!(q.dequeue(), Some('a'));
        assert_eq!(q.dequeue(), Some('b'));
        assert_eq!(q.dequeue(), Some('c'));
    }

    #[test]
    fn conservation_invariant() {
        let q = Queue::new();
        for i in 0..10 {
            q.enqueue(i);
        }
        q.dequeue();
        q.dequeue();
        let body = q.body.lock();
        assert_eq!(body.count, body.r#in.len() + body.out.len());
    }

    #[test]
    fn unblock_wakes_waiting_consumer() {
        let q = Arc::new(Queue::<u32>::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.dequeue());
        thread::sleep(std::time::Duration::from_millis(50));
        q.unblock();
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn drain_ordered_preserves_fifo() {
        let q = Queue::new();
        for i in 0..5 {
            q.enqueue(i);
        }
        assert_eq!(q.drain_ordered(), vec![0, 1, 2, 3, 4]);
    }
}
