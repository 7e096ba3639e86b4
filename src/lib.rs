//! Pause, resume, reset and kill step-wise computations that await asynchronous continuations.
//!
//! A [Controller] is bound to a [Computation]: either a plain function, or a factory for a
//! [Routine] that suspends at every step with a value or a [Continuation] request. The controller
//! drives the routine on a single-threaded [Executor](runtime::Executor), and a caller may pause it
//! between steps, resume it, reset it, or kill it. Every run ends with exactly one call of its
//! terminal callback.

pub mod config;
pub mod continuation;
pub mod controller;
pub mod coroutine;
pub mod error;
pub mod routine;
pub mod runtime;

pub use config::Config;
pub use continuation::{delay, Continuation};
pub use controller::{Controller, State};
pub use coroutine::Co;
pub use error::{Error, Outcome};
pub use routine::{Computation, Routine, Step, Yield};

/// Create a controller bound to `computation`.
#[inline]
pub fn create<T, R, E>(
    spawner: &runtime::Spawner,
    computation: Computation<T, R, E>,
) -> Controller<T, R, E>
where
    T: 'static,
    R: Clone + 'static,
    E: Clone + 'static,
{
    Controller::new(spawner, computation)
}
