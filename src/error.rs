//! Errors a run can finish with.

/// The error half of a terminal outcome.
///
/// `E` is the error type of the bound computation and of the continuations it awaits.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error<E> {
    /// The controller was started without a computation bound to it. No steps were taken.
    #[error("computation is not a function")]
    NotCallable,

    /// The computation returned an error while producing a step.
    #[error("routine failed: {0}")]
    Routine(E),

    /// A continuation request reported a failure. The routine was not resumed afterwards.
    #[error("continuation failed: {0}")]
    Continuation(E),

    /// The computation or a continuation request panicked.
    #[error("panicked: {0}")]
    Panicked(String),
}

impl<E> Error<E> {
    /// The error produced by the computation or by a continuation, if there is one.
    #[inline]
    pub fn into_inner(self) -> Option<E> {
        match self {
            Error::Routine(e) | Error::Continuation(e) => Some(e),
            Error::NotCallable | Error::Panicked(_) => None,
        }
    }

    /// Borrowing version of [Error::into_inner].
    #[inline]
    pub fn inner(&self) -> Option<&E> {
        match self {
            Error::Routine(e) | Error::Continuation(e) => Some(e),
            Error::NotCallable | Error::Panicked(_) => None,
        }
    }

    /// Build a [Error::Panicked] from a payload caught by `catch_unwind`.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Error::Panicked(msg)
    }
}

/// What a terminal callback receives: the final value, or why the run failed.
pub type Outcome<R, E> = Result<R, Error<E>>;
