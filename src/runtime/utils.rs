/// Re-export an implementation of an async function to yield immediately.
///
/// Awaiting it inside a detached future sends the future to the back of the macro-task queue.
pub use futures_lite::future::yield_now;

/// Re-export a waker that does nothing when woken.
///
/// Coroutines are polled with it: they only ever make progress when their controller resumes them.
pub use futures_util::task::noop_waker_ref;
