//! Continuation requests: single-shot asynchronous operations a routine hands to its controller.
//!
//! A [Continuation] is invoked exactly once with a [Callback], and the callback is called at most
//! once with the result. Both rules are carried by `FnOnce`, so a continuation cannot call back
//! twice.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use interruptible::{continuation::delay, runtime::Executor};
//!
//! let ex = Executor::default();
//! let got = std::rc::Rc::new(std::cell::Cell::new(None));
//!
//! let sleep = delay::<()>(&ex.spawner(), Duration::from_millis(10));
//! sleep.invoke({
//!     let got = got.clone();
//!     move |res| got.set(res.ok())
//! });
//!
//! ex.run();
//! assert_eq!(got.get(), Some(Duration::from_millis(10)));
//! assert_eq!(ex.now(), Duration::from_millis(10));
//! ```

use std::future::Future;
use std::time::Duration;

use crate::runtime::{OnReadyFn, Spawner};

/// The completion handler passed to a continuation.
pub type Callback<T, E> = Box<dyn FnOnce(Result<T, E>)>;

/// A single-invocation asynchronous operation producing a `T` or failing with an `E`.
pub struct Continuation<T, E> {
    f: Box<dyn FnOnce(Callback<T, E>)>,
}

impl<T: 'static, E: 'static> Continuation<T, E> {
    /// Wrap a function that starts the operation and eventually calls `done`.
    ///
    /// `done` may be called synchronously, later, or never.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Callback<T, E>) + 'static,
    {
        Self { f: Box::new(f) }
    }

    /// A continuation that completes with `result` as soon as it is invoked.
    pub fn ready(result: Result<T, E>) -> Self {
        Self::new(move |done| done(result))
    }

    /// A continuation that runs `fut` as a detached future on `spawner` and completes with its
    /// output.
    pub fn from_future<F>(spawner: &Spawner, fut: F) -> Self
    where
        F: Future<Output = Result<T, E>> + 'static,
    {
        let spawner = spawner.clone();
        Self::new(move |done| spawner.spawn_detach(OnReadyFn::new(fut, done)))
    }

    /// Start the operation.
    pub fn invoke(self, done: impl FnOnce(Result<T, E>) + 'static) {
        (self.f)(Box::new(done))
    }

    /// Transform the successful result.
    pub fn map<U: 'static>(self, g: impl FnOnce(T) -> U + 'static) -> Continuation<U, E> {
        Continuation::new(move |done: Callback<U, E>| self.invoke(move |res| done(res.map(g))))
    }

    /// Transform the failure.
    pub fn map_err<F: 'static>(self, g: impl FnOnce(E) -> F + 'static) -> Continuation<T, F> {
        Continuation::new(move |done: Callback<T, F>| self.invoke(move |res| done(res.map_err(g))))
    }
}

impl<T, E> std::fmt::Debug for Continuation<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation").finish_non_exhaustive()
    }
}

/// A continuation that waits `duration` on the spawner's clock, then succeeds with `duration`.
pub fn delay<E: 'static>(spawner: &Spawner, duration: Duration) -> Continuation<Duration, E> {
    let spawner = spawner.clone();
    Continuation::new(move |done| spawner.set_timeout(duration, move || done(Ok(duration))))
}
