//! Single-assignment, loop-affine completion value (C1).
//!
//! A [`Deferred<V>`] is fulfilled at most once, either by [`Deferred::succeed`]
//! or [`Deferred::fail`]. Continuations registered through [`Deferred::on_complete`]
//! always run on the [`EventLoop`] the deferred was created against, in the
//! order they were registered, even if the deferred is already fulfilled by
//! the time the continuation is registered.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::PipelineError;
use crate::runtime::EventLoop;

type Continuation<V> = Box<dyn FnOnce(&Result<V, PipelineError>) + Send + 'static>;

enum State<V> {
    Pending(Vec<Continuation<V>>),
    Done(Result<V, PipelineError>),
}

struct Inner<V> {
    event_loop: Arc<dyn EventLoop>,
    state: Mutex<State<V>>,
    condvar: Condvar,
}

/// A single-assignment value-or-error cell fulfilled on its owning event loop.
///
/// Cloning a `Deferred` shares the same underlying cell; every clone observes
/// the same fulfilment.
pub struct Deferred<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for Deferred<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for Deferred<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.state.lock().unwrap() {
            State::Pending(_) => "pending",
            State::Done(Ok(_)) => "done(ok)",
            State::Done(Err(_)) => "done(err)",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

impl<V: Send + 'static> Deferred<V> {
    /// Creates a new, unfulfilled deferred bound to `event_loop`.
    pub fn new(event_loop: Arc<dyn EventLoop>) -> Self {
        Self {
            inner: Arc::new(Inner {
                event_loop,
                state: Mutex::new(State::Pending(Vec::new())),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Returns an already-fulfilled deferred. Used where a result is known
    /// synchronously (e.g. rejecting a mutation before it is ever submitted).
    pub fn ready(event_loop: Arc<dyn EventLoop>, result: Result<V, PipelineError>) -> Self {
        let this = Self::new(event_loop);
        this.fulfil(result);
        this
    }

    /// Fulfils the deferred with a success value.
    ///
    /// A second call to `succeed` or `fail` is a programmer error: fulfilment
    /// is single-assignment.
    pub fn succeed(&self, value: V) {
        self.fulfil(Ok(value));
    }

    /// Fulfils the deferred with a failure.
    pub fn fail(&self, error: PipelineError) {
        self.fulfil(Err(error));
    }

    fn fulfil(&self, result: Result<V, PipelineError>) {
        let callbacks = {
            let mut guard = self.inner.state.lock().unwrap();
            match &*guard {
                State::Done(_) => {
                    debug_assert!(
                        false,
                        "deferred fulfilled twice: double fulfilment is a programmer error"
                    );
                    return;
                }
                State::Pending(_) => {}
            }
            let previous = std::mem::replace(&mut *guard, State::Done(result));
            match previous {
                State::Pending(callbacks) => callbacks,
                State::Done(_) => unreachable!(),
            }
        };
        self.inner.condvar.notify_all();
        self.run_continuations(callbacks);
    }

    fn run_continuations(&self, callbacks: Vec<Continuation<V>>) {
        if callbacks.is_empty() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        inner.event_loop.clone().execute(Box::new(move || {
            let guard = inner.state.lock().unwrap();
            let result = match &*guard {
                State::Done(result) => clone_result(result),
                State::Pending(_) => unreachable!("fulfilled before continuations ran"),
            };
            drop(guard);
            for cb in callbacks {
                cb(&result);
            }
        }));
    }

    /// Registers a continuation that runs on the owning loop, in registration
    /// order, once the deferred is fulfilled. If already fulfilled, the
    /// continuation is still scheduled onto the loop rather than run inline.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&Result<V, PipelineError>) + Send + 'static,
    {
        let mut guard = self.inner.state.lock().unwrap();
        match &mut *guard {
            State::Pending(callbacks) => {
                callbacks.push(Box::new(callback));
            }
            State::Done(result) => {
                let result = clone_result(result);
                drop(guard);
                self.inner
                    .event_loop
                    .clone()
                    .execute(Box::new(move || callback(&result)));
            }
        }
    }

    /// Blocks the calling thread until fulfilled and returns a clone of the
    /// result. Must not be called from within the owning loop: doing so would
    /// deadlock a single-threaded loop, and is treated as a programmer error.
    pub fn wait(&self) -> Result<V, PipelineError>
    where
        V: Clone,
    {
        if self.inner.event_loop.in_loop() {
            return Err(crate::programmer_error!(
                "Deferred::wait called from within its own owning event loop"
            ));
        }
        let guard = self.inner.state.lock().unwrap();
        let guard = self
            .inner
            .condvar
            .wait_while(guard, |s| matches!(s, State::Pending(_)))
            .unwrap();
        match &*guard {
            State::Done(result) => clone_result(result),
            State::Pending(_) => unreachable!(),
        }
    }

    /// Returns a new deferred on the same loop that completes with `f` applied
    /// to the success value, or propagates the failure unchanged.
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Send + 'static,
        F: FnOnce(V) -> U + Send + 'static,
    {
        let next = Deferred::new(Arc::clone(&self.inner.event_loop));
        let next_clone = next.clone();
        self.on_complete(move |result| match clone_result(result) {
            Ok(v) => next_clone.succeed(f(v)),
            Err(e) => next_clone.fail(e),
        });
        next
    }

    /// Like [`Deferred::map`] but `f` itself returns a deferred, which is
    /// chained into the result.
    pub fn flat_map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Send + 'static,
        F: FnOnce(V) -> Deferred<U> + Send + 'static,
    {
        let next = Deferred::new(Arc::clone(&self.inner.event_loop));
        let next_clone = next.clone();
        self.on_complete(move |result| match clone_result(result) {
            Ok(v) => {
                let inner_deferred = f(v);
                let next_clone2 = next_clone.clone();
                inner_deferred.on_complete(move |inner_result| {
                    match clone_result(inner_result) {
                        Ok(v) => next_clone2.succeed(v),
                        Err(e) => next_clone2.fail(e),
                    }
                });
            }
            Err(e) => next_clone.fail(e),
        });
        next
    }
}

fn clone_result<V: Clone>(result: &Result<V, PipelineError>) -> Result<V, PipelineError> {
    match result {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(PipelineError::new(e.code(), e.message().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::EmbeddedEventLoop;

    #[test]
    fn succeed_runs_continuations_in_order() {
        let loop_ = Arc::new(EmbeddedEventLoop::new());
        let deferred: Deferred<i32> = Deferred::new(loop_.clone());
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            deferred.on_complete(move |_| order.lock().unwrap().push(i));
        }
        deferred.succeed(7);
        loop_.run();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn on_complete_after_fulfilment_still_runs_on_loop() {
        let loop_ = Arc::new(EmbeddedEventLoop::new());
        let deferred: Deferred<i32> = Deferred::new(loop_.clone());
        deferred.succeed(1);
        let seen = Arc::new(Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        deferred.on_complete(move |r| *seen2.lock().unwrap() = Some(r.as_ref().copied().ok()));
        assert!(seen.lock().unwrap().is_none(), "must not run inline");
        loop_.run();
        assert_eq!(*seen.lock().unwrap(), Some(Some(1)));
    }

    #[test]
    fn map_propagates_failure() {
        let loop_ = Arc::new(EmbeddedEventLoop::new());
        let deferred: Deferred<i32> = Deferred::new(loop_.clone());
        let mapped = deferred.map(|v| v + 1);
        let seen = Arc::new(Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        mapped.on_complete(move |r| *seen2.lock().unwrap() = Some(r.is_err()));
        deferred.fail(PipelineError::not_found("x"));
        loop_.run();
        loop_.run();
        assert_eq!(*seen.lock().unwrap(), Some(true));
    }

    #[test]
    fn wait_from_owning_loop_thread_is_a_programmer_error() {
        let loop_ = Arc::new(EmbeddedEventLoop::new());
        let deferred: Deferred<i32> = Deferred::new(loop_.clone());
        deferred.succeed(1);
        assert!(deferred.wait().is_err());
    }

    #[test]
    fn wait_from_another_thread_blocks_until_fulfilled() {
        let loop_ = Arc::new(EmbeddedEventLoop::new());
        let deferred: Deferred<i32> = Deferred::new(loop_.clone());
        let deferred2 = deferred.clone();
        let handle = std::thread::spawn(move || deferred2.wait());
        std::thread::sleep(std::time::Duration::from_millis(10));
        deferred.succeed(42);
        assert_eq!(handle.join().unwrap().unwrap(), 42);
    }
}
