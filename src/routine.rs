//! Step-wise computations a [Controller](crate::Controller) can drive.
//!
//! A [Routine] is resumed once per step. Each resumption either suspends it with a [Yield] or
//! completes it with a final value. A yield is a plain value that is fed straight back into the
//! next step, or a [Continuation] whose result is fed back once it settles.

use std::future::Future;

use crate::continuation::Continuation;
use crate::coroutine::{Co, Coroutine};

/// How a resumed routine left off: suspended at `Yielded`, or done with its final value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<Y, D> {
    Yielded(Y),
    Complete(D),
}

impl<Y, D> Step<Y, D> {
    /// Whether the routine suspended and expects to be resumed again.
    pub fn is_yielded(&self) -> bool {
        matches!(self, Step::Yielded(_))
    }
}

/// What a routine suspends with.
#[derive(Debug)]
pub enum Yield<T, E> {
    /// An immediately available value. It becomes the input of the next step.
    Value(T),
    /// A continuation request. The controller invokes it once; its result becomes the input of the
    /// next step, and its failure ends the run.
    Await(Continuation<T, E>),
}

/// The result of resuming a routine.
pub type StepResult<T, R, E> = Result<Step<Yield<T, E>, R>, E>;

/// A suspend-capable computation.
pub trait Routine {
    /// Values exchanged at suspension points.
    type Value;
    /// The final value of a run.
    type Output;
    /// The error a step, or a continuation awaited by the routine, can fail with.
    type Error;

    /// Run until the next suspension point or completion.
    ///
    /// `input` is `None` for the first step. Every later step receives the value the previous
    /// suspension resolved to.
    fn resume(
        &mut self,
        input: Option<Self::Value>,
    ) -> StepResult<Self::Value, Self::Output, Self::Error>;
}

impl<X: Routine + ?Sized> Routine for Box<X> {
    type Value = X::Value;
    type Output = X::Output;
    type Error = X::Error;

    #[inline]
    fn resume(
        &mut self,
        input: Option<Self::Value>,
    ) -> StepResult<Self::Value, Self::Output, Self::Error> {
        (**self).resume(input)
    }
}

/// A boxed routine as stored by a controller.
pub type BoxRoutine<T, R, E> = Box<dyn Routine<Value = T, Output = R, Error = E>>;

/// A [Routine] backed by a closure. Created by [from_fn].
pub struct FnRoutine<F, T, R, E> {
    f: F,
    _types: std::marker::PhantomData<fn(Option<T>) -> StepResult<T, R, E>>,
}

/// Build a routine from a closure that is called once per step.
///
/// ```
/// use interruptible::routine::{from_fn, Routine, Step, Yield};
///
/// let mut n = 0;
/// let mut countdown = from_fn(move |_input: Option<u32>| -> Result<_, ()> {
///     n += 1;
///     Ok(if n < 3 { Step::Yielded(Yield::Value(n)) } else { Step::Complete("liftoff") })
/// });
///
/// assert!(countdown.resume(None).unwrap().is_yielded());
/// assert!(countdown.resume(Some(1)).unwrap().is_yielded());
/// assert!(matches!(countdown.resume(Some(2)), Ok(Step::Complete("liftoff"))));
/// ```
pub fn from_fn<F, T, R, E>(f: F) -> FnRoutine<F, T, R, E>
where
    F: FnMut(Option<T>) -> StepResult<T, R, E>,
{
    FnRoutine {
        f,
        _types: std::marker::PhantomData,
    }
}

impl<F, T, R, E> Routine for FnRoutine<F, T, R, E>
where
    F: FnMut(Option<T>) -> StepResult<T, R, E>,
{
    type Value = T;
    type Output = R;
    type Error = E;

    #[inline]
    fn resume(&mut self, input: Option<T>) -> StepResult<T, R, E> {
        (self.f)(input)
    }
}

type PlainFn<R, E> = Box<dyn FnMut() -> Result<R, E>>;
type RoutineFactory<T, R, E> = Box<dyn FnMut() -> BoxRoutine<T, R, E>>;

/// The computation a controller is bound to.
///
/// Routines are bound as factories: every run starts from a fresh routine instance, so a
/// controller can be reset and started again.
pub enum Computation<T, R, E> {
    /// A function without suspension points, run once per start.
    Plain(PlainFn<R, E>),
    /// A factory for the routine driven by each run.
    Routine(RoutineFactory<T, R, E>),
}

impl<T: 'static, R: 'static, E: 'static> Computation<T, R, E> {
    /// Bind a plain function.
    pub fn plain(f: impl FnMut() -> Result<R, E> + 'static) -> Self {
        Computation::Plain(Box::new(f))
    }

    /// Bind a routine factory.
    pub fn routine<X, F>(mut factory: F) -> Self
    where
        X: Routine<Value = T, Output = R, Error = E> + 'static,
        F: FnMut() -> X + 'static,
    {
        Computation::Routine(Box::new(move || Box::new(factory()) as BoxRoutine<T, R, E>))
    }

    /// Bind a factory of step closures; see [from_fn].
    pub fn steps<S, F>(mut factory: F) -> Self
    where
        S: FnMut(Option<T>) -> StepResult<T, R, E> + 'static,
        F: FnMut() -> S + 'static,
    {
        Self::routine(move || from_fn(factory()))
    }

    /// Bind an async function whose suspension points are the awaits on its [Co] handle.
    pub fn coroutine<F, Fut>(f: F) -> Self
    where
        F: Fn(Co<T, E>) -> Fut + 'static,
        Fut: Future<Output = Result<R, E>> + 'static,
    {
        Self::routine(move || Coroutine::new(&f))
    }
}

impl<T, R, E> std::fmt::Debug for Computation<T, R, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Computation::Plain(_) => f.write_str("Computation::Plain"),
            Computation::Routine(_) => f.write_str("Computation::Routine"),
        }
    }
}
