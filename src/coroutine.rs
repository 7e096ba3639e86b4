//! Routines written as async functions.
//!
//! The body of a [Coroutine] is an ordinary `async` block. Its suspension points are the awaits
//! on its [Co] handle: each one hands a [Yield] to the controller and resolves to the value the
//! controller feeds back. The future is polled with a no-op waker, so it only makes progress when
//! its controller resumes it.
//!
//! # Panics
//!
//! Awaiting anything other than the [Co] handle's futures on a pending path is a contract
//! violation: the coroutine would stop without yielding. Resuming it then panics, and the
//! controller finishes the run with [Error::Panicked](crate::Error::Panicked).
//!
//! ```
//! use std::time::Duration;
//! use interruptible::{continuation::delay, Computation, Controller, runtime::Executor};
//!
//! let ex = Executor::default();
//! let spawner = ex.spawner();
//! let computation = Computation::coroutine({
//!     let spawner = spawner.clone();
//!     move |co| {
//!         let spawner = spawner.clone();
//!         async move {
//!             let waited = co.wait(delay(&spawner, Duration::from_millis(5))).await;
//!             let echoed = co.yield_value(waited * 2).await;
//!             Ok::<_, ()>(echoed.as_millis())
//!         }
//!     }
//! });
//!
//! let controller = Controller::new(&spawner, computation);
//! controller.start(|outcome| assert_eq!(outcome, Ok(10)));
//! ex.run();
//! assert_eq!(controller.result(), Some(10));
//! ```

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::continuation::Continuation;
use crate::routine::{Routine, Step, StepResult, Yield};
use crate::runtime::utils::noop_waker_ref;

/// The hand-off between a coroutine body and its driver.
struct Slot<T, E> {
    yielded: Option<Yield<T, E>>,
    input: Option<T>,
}

/// The handle a coroutine body suspends through.
pub struct Co<T, E> {
    slot: Rc<RefCell<Slot<T, E>>>,
}

impl<T, E> Co<T, E> {
    /// Suspend with a plain value. Resolves to the value it is resumed with, which is the same
    /// value when the routine runs under a controller.
    pub fn yield_value(&self, value: T) -> Suspend<T, E> {
        self.suspend(Yield::Value(value))
    }

    /// Suspend until `continuation` settles. Resolves to its successful result; a failure ends
    /// the run and the body is never resumed.
    pub fn wait(&self, continuation: Continuation<T, E>) -> Suspend<T, E> {
        self.suspend(Yield::Await(continuation))
    }

    /// Suspend with an arbitrary [Yield].
    pub fn suspend(&self, y: Yield<T, E>) -> Suspend<T, E> {
        Suspend {
            slot: self.slot.clone(),
            yielded: Some(y),
        }
    }
}

/// Future returned by the suspension methods of [Co].
#[must_use = "a coroutine only suspends when the returned future is awaited"]
pub struct Suspend<T, E> {
    slot: Rc<RefCell<Slot<T, E>>>,
    yielded: Option<Yield<T, E>>,
}

// Nothing in a Suspend is structurally pinned.
impl<T, E> Unpin for Suspend<T, E> {}

impl<T, E> Future for Suspend<T, E> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        match this.yielded.take() {
            Some(y) => {
                this.slot.borrow_mut().yielded = Some(y);
                Poll::Pending
            }
            None => {
                let input = this.slot.borrow_mut().input.take();
                Poll::Ready(input.expect("logic error: coroutine resumed without a value"))
            }
        }
    }
}

/// A [Routine] driven by polling an async body.
pub struct Coroutine<T, R, E> {
    slot: Rc<RefCell<Slot<T, E>>>,
    fut: Pin<Box<dyn Future<Output = Result<R, E>>>>,
    complete: bool,
}

impl<T, R, E> Coroutine<T, R, E> {
    /// Create the coroutine by calling `f` with its handle. Nothing in the body runs until the
    /// first resume.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Co<T, E>) -> Fut,
        Fut: Future<Output = Result<R, E>> + 'static,
    {
        let slot = Rc::new(RefCell::new(Slot {
            yielded: None,
            input: None,
        }));
        let fut = Box::pin(f(Co { slot: slot.clone() }));
        Self {
            slot,
            fut,
            complete: false,
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

impl<T, R, E> Routine for Coroutine<T, R, E> {
    type Value = T;
    type Output = R;
    type Error = E;

    fn resume(&mut self, input: Option<T>) -> StepResult<T, R, E> {
        assert!(!self.complete, "coroutine resumed after completion");

        self.slot.borrow_mut().input = input;

        let mut cx = Context::from_waker(noop_waker_ref());
        match self.fut.as_mut().poll(&mut cx) {
            Poll::Ready(out) => {
                self.complete = true;
                out.map(Step::Complete)
            }
            Poll::Pending => match self.slot.borrow_mut().yielded.take() {
                Some(y) => Ok(Step::Yielded(y)),
                None => panic!("coroutine is pending without suspending through its handle"),
            },
        }
    }
}

impl<T, R, E> std::fmt::Debug for Coroutine<T, R, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("complete", &self.complete)
            .finish_non_exhaustive()
    }
}
