//! Event loop abstraction (C2).
//!
//! The pipeline only ever calls [`EventLoop::in_loop`], [`EventLoop::execute`]
//! and the `make_promise` helper below; `schedule` exists for completeness
//! and for handlers that want delayed work, but the pipeline itself never
//! calls it. [`EmbeddedEventLoop`] is the synchronous, single-threaded
//! implementation used by tests and by the embedded driver (C6).

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Duration;

use crate::deferred::Deferred;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Thread-affinity oracle and task queue for a single channel's pipeline.
///
/// A pipeline never runs on more than one loop over its lifetime, and every
/// mutation/dispatch it performs is required to happen on that loop (§5).
pub trait EventLoop: Send + Sync {
    /// True if the calling thread is the loop's owning thread.
    fn in_loop(&self) -> bool;

    /// Submits a task for execution on the loop. If called from `in_loop`,
    /// implementations are free to still defer to the loop's own queue
    /// (this crate's embedded loop always does, so reentrant continuations
    /// never run within the caller's stack frame).
    fn execute(&self, task: Task);

    /// Submits a task to run no sooner than `delay` from now.
    fn schedule(&self, delay: Duration, task: Task);
}

impl dyn EventLoop {
    /// Factory for a new, unfulfilled deferred bound to this loop.
    pub fn make_promise<V: Send + 'static>(self: &Arc<Self>) -> Deferred<V> {
        Deferred::new(Arc::clone(self))
    }
}

/// A deterministic, single-threaded event loop: tasks submitted via
/// [`EventLoop::execute`] and [`EventLoop::schedule`] only run when
/// [`EmbeddedEventLoop::run`] is called, in submission order (scheduled
/// tasks are ordered by delay, then by submission order among equal delays).
///
/// This is the loop the embedded driver (C6) binds every test channel to.
pub struct EmbeddedEventLoop {
    owner: ThreadId,
    immediate: Mutex<VecDeque<Task>>,
    delayed: Mutex<BinaryHeap<Reverse<(Duration, u64)>>>,
    delayed_tasks: Mutex<std::collections::HashMap<u64, Task>>,
    sequence: AtomicU64,
}

impl EmbeddedEventLoop {
    pub fn new() -> Self {
        Self {
            owner: std::thread::current().id(),
            immediate: Mutex::new(VecDeque::new()),
            delayed: Mutex::new(BinaryHeap::new()),
            delayed_tasks: Mutex::new(std::collections::HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Drains all pending immediate and delayed tasks synchronously, in
    /// order, including any tasks newly submitted by tasks that are
    /// themselves running (so a continuation chain fully settles).
    pub fn run(&self) {
        loop {
            // Delayed tasks become ready as soon as `run` is called at all:
            // the embedded loop has no real clock, so `run` treats every
            // outstanding scheduled task as due.
            let ready: Vec<Task> = {
                let mut delayed = self.delayed.lock().unwrap();
                let mut delayed_tasks = self.delayed_tasks.lock().unwrap();
                let mut ready = Vec::new();
                while let Some(Reverse((_, seq))) = delayed.pop() {
                    if let Some(task) = delayed_tasks.remove(&seq) {
                        ready.push(task);
                    }
                }
                ready
            };
            for task in ready {
                self.immediate.lock().unwrap().push_back(task);
            }

            let next = self.immediate.lock().unwrap().pop_front();
            match next {
                Some(task) => task(),
                None => break,
            }
        }
    }
}

impl Default for EmbeddedEventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop for EmbeddedEventLoop {
    fn in_loop(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    fn execute(&self, task: Task) {
        self.immediate.lock().unwrap().push_back(task);
    }

    fn schedule(&self, delay: Duration, task: Task) {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.delayed_tasks.lock().unwrap().insert(seq, task);
        self.delayed.lock().unwrap().push(Reverse((delay, seq)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_loop_is_true_only_on_owning_thread() {
        let loop_ = EmbeddedEventLoop::new();
        assert!(loop_.in_loop());
        let loop_ = Arc::new(loop_);
        let loop2 = Arc::clone(&loop_);
        let result = std::thread::spawn(move || loop2.in_loop()).join().unwrap();
        assert!(!result);
    }

    #[test]
    fn run_drains_tasks_in_fifo_order() {
        let loop_ = EmbeddedEventLoop::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            loop_.execute(Box::new(move || seen.lock().unwrap().push(i)));
        }
        loop_.run();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn tasks_submitted_during_run_are_also_drained() {
        let loop_ = Arc::new(EmbeddedEventLoop::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let loop_clone = Arc::clone(&loop_);
        let seen_clone = Arc::clone(&seen);
        loop_.execute(Box::new(move || {
            seen_clone.lock().unwrap().push(1);
            let seen_inner = Arc::clone(&seen_clone);
            loop_clone.execute(Box::new(move || seen_inner.lock().unwrap().push(2)));
        }));
        loop_.run();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}
