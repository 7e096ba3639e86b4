//! The controller state machine.
//!
//! A [Controller] drives the computation it is bound to one step at a time on a
//! [Spawner]'s queues. Plain yields are fed back on the next tick, continuation requests are
//! invoked and their results fed back once they settle. Between steps sits the checkpoint where
//! a requested pause lands.
//!
//! ```text
//!   idle --start--> running --pause--> paused --resume--> running
//!                      |                  |
//!                      +--complete/fail---+--> finished --reset--> idle
//!                                         +-----------------reset--> idle
//! ```
//!
//! Every operation is a silent no-op when called in a state it does not apply to. Outcomes are
//! only ever delivered through the terminal callback, always from a scheduled task and never from
//! inside the call that caused them.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{Error, Outcome};
use crate::routine::{BoxRoutine, Computation, Step, Yield};
use crate::runtime::Spawner;

/// Lifecycle state of a [Controller].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Idle,
    Running,
    Paused,
    Finished,
}

/// Identifies a controller in log events.
pub type ControllerId = u64;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

type TerminalCallback<R, E> = Box<dyn FnOnce(Outcome<R, E>)>;
type Acknowledge<T, R, E> = Box<dyn FnOnce(&Controller<T, R, E>)>;
type Acks<T, R, E> = Vec<Acknowledge<T, R, E>>;

/// What happens at the checkpoint after a step suspended.
enum Checkpoint<T, R, E> {
    Continue(Yield<T, E>),
    Halt(Vec<Ack<T, R, E>>),
}

/// Callbacks waiting for a requested pause to land.
enum Ack<T, R, E> {
    Pause(Acknowledge<T, R, E>),
    Kill(Acknowledge<T, R, E>),
}

struct Inner<T, R, E> {
    state: State,
    computation: Option<Computation<T, R, E>>,
    routine: Option<BoxRoutine<T, R, E>>,
    step_count: usize,
    pending: Option<Yield<T, E>>,
    callback: Option<TerminalCallback<R, E>>,
    outcome: Option<Outcome<R, E>>,
    acks: Vec<Ack<T, R, E>>,
    /// Bumped by every start and reset. Scheduled work from an older epoch is discarded.
    epoch: u64,
    config: Config,
}

impl<T, R, E> Inner<T, R, E> {
    #[inline]
    fn is_live(&self, epoch: u64) -> bool {
        self.epoch == epoch && matches!(self.state, State::Running | State::Paused)
    }

    fn kill_requested(&self) -> bool {
        self.acks.iter().any(|ack| matches!(ack, Ack::Kill(_)))
    }
}

/// Drives a computation and exposes pause, resume, reset and kill.
///
/// `T` is the type exchanged at suspension points, `R` the final value and `E` the error type.
/// Cloning a controller yields another handle to the same controller.
pub struct Controller<T, R, E> {
    id: ControllerId,
    inner: Rc<RefCell<Inner<T, R, E>>>,
    spawner: Spawner,
}

impl<T, R, E> Clone for Controller<T, R, E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: self.inner.clone(),
            spawner: self.spawner.clone(),
        }
    }
}

impl<T, R, E> Controller<T, R, E>
where
    T: 'static,
    R: Clone + 'static,
    E: Clone + 'static,
{
    /// Bind a computation. The controller starts out idle.
    pub fn new(spawner: &Spawner, computation: Computation<T, R, E>) -> Self {
        Self::build(spawner, Some(computation), Config::default())
    }

    pub fn with_config(
        spawner: &Spawner,
        computation: Computation<T, R, E>,
        config: Config,
    ) -> Self {
        Self::build(spawner, Some(computation), config)
    }

    /// A controller with nothing to run. Starting it finishes the run with
    /// [Error::NotCallable].
    pub fn unbound(spawner: &Spawner) -> Self {
        Self::build(spawner, None, Config::default())
    }

    fn build(
        spawner: &Spawner,
        computation: Option<Computation<T, R, E>>,
        config: Config,
    ) -> Self {
        let inner = Inner {
            state: State::Idle,
            computation,
            routine: None,
            step_count: 0,
            pending: None,
            callback: None,
            outcome: None,
            acks: Vec::new(),
            epoch: 0,
            config,
        };
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            inner: Rc::new(RefCell::new(inner)),
            spawner: spawner.clone(),
        }
    }

    #[inline]
    pub fn id(&self) -> ControllerId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> State {
        self.inner.borrow().state
    }

    #[inline]
    pub fn config(&self) -> Config {
        self.inner.borrow().config
    }

    /// The outcome of the last run, kept until [Controller::reset].
    pub fn outcome(&self) -> Option<Outcome<R, E>> {
        self.inner.borrow().outcome.clone()
    }

    /// The error of the last run, if it failed.
    pub fn error(&self) -> Option<Error<E>> {
        self.outcome().and_then(Result::err)
    }

    /// The final value of the last run, if it succeeded.
    pub fn result(&self) -> Option<R> {
        self.outcome().and_then(Result::ok)
    }

    /// Start a run. `callback` receives the outcome exactly once.
    ///
    /// Only effective when idle. The controller is running as soon as this returns; the first
    /// step is taken on the next tick.
    pub fn start(&self, callback: impl FnOnce(Outcome<R, E>) + 'static) -> &Self {
        let epoch = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != State::Idle {
                trace!(id = self.id, state = ?inner.state, "start ignored");
                return self;
            }
            inner.state = State::Running;
            inner.epoch += 1;
            inner.step_count = 0;
            inner.callback = Some(Box::new(callback));
            inner.epoch
        };
        debug!(id = self.id, epoch, "controller started");

        let this = self.clone();
        self.spawner.next_tick(move || this.begin(epoch));
        self
    }

    /// Request a pause. See [Controller::pause_with].
    pub fn pause(&self) -> &Self {
        self.request_pause(None)
    }

    /// Request a pause and get notified when it lands.
    ///
    /// Only effective while running. The state is `Paused` immediately, but the routine stops at
    /// its next checkpoint: a continuation already in flight runs on, and `on_paused` is called
    /// once the routine has produced its next suspension. If the run finishes first, `on_paused`
    /// is never called.
    pub fn pause_with(&self, on_paused: impl FnOnce(&Self) + 'static) -> &Self {
        self.request_pause(Some(Box::new(on_paused)))
    }

    fn request_pause(&self, on_paused: Option<Acknowledge<T, R, E>>) -> &Self {
        let mut inner = self.inner.borrow_mut();
        if inner.state == State::Running {
            inner.state = State::Paused;
            if let Some(ack) = on_paused {
                inner.acks.push(Ack::Pause(ack));
            }
            debug!(id = self.id, epoch = inner.epoch, "pause requested");
        }
        self
    }

    /// Continue a paused run. Only effective while paused, and not while a kill is waiting for
    /// its pause to land.
    ///
    /// When the pause has landed, the held-back suspension is dispatched on the next tick. When
    /// it has not landed yet, the pending pause is simply withdrawn.
    pub fn resume(&self) -> &Self {
        let held = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != State::Paused {
                return self;
            }
            if inner.kill_requested() {
                trace!(id = self.id, epoch = inner.epoch, "resume ignored, kill pending");
                return self;
            }
            inner.state = State::Running;
            inner.acks.clear();
            let epoch = inner.epoch;
            debug!(id = self.id, epoch, "controller resumed");
            inner.pending.take().map(|y| (epoch, y))
        };

        if let Some((epoch, y)) = held {
            let this = self.clone();
            self.spawner.next_tick(move || this.dispatch(epoch, y));
        }
        self
    }

    /// Return to idle, dropping every run-scoped field. Only effective while paused or finished.
    pub fn reset(&self) -> &Self {
        self.reset_run();
        self
    }

    /// Returns whether the controller was reset.
    fn reset_run(&self) -> bool {
        // Dropped after the borrow is released: destructors may hold handles to this controller.
        let _dropped = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Paused | State::Finished) {
                return false;
            }
            inner.state = State::Idle;
            inner.epoch += 1;
            inner.step_count = 0;
            debug!(id = self.id, epoch = inner.epoch, "controller reset");
            (
                inner.routine.take(),
                inner.pending.take(),
                inner.callback.take(),
                inner.outcome.take(),
                std::mem::take(&mut inner.acks),
            )
        };
        true
    }

    /// Stop the run and return to idle. See [Controller::kill_with].
    pub fn kill(&self) -> &Self {
        self.kill_with(|_| {})
    }

    /// Pause, reset once the pause has landed, then call `callback`.
    ///
    /// When the controller is idle or finished this is a reset followed by `callback` on the next
    /// tick. When the run finishes before the pause lands, the terminal callback fires first.
    /// Until the pause lands, [Controller::resume] is ignored and pause acknowledgements are
    /// dropped.
    pub fn kill_with(&self, callback: impl FnOnce(&Self) + 'static) -> &Self {
        let callback: Acknowledge<T, R, E> = Box::new(callback);
        let halted = {
            let mut inner = self.inner.borrow_mut();
            match inner.state {
                State::Running => {
                    inner.state = State::Paused;
                    inner.acks.push(Ack::Kill(callback));
                    debug!(id = self.id, epoch = inner.epoch, "kill requested");
                    return self;
                }
                State::Paused if inner.pending.is_none() => {
                    inner.acks.push(Ack::Kill(callback));
                    debug!(id = self.id, epoch = inner.epoch, "kill requested");
                    return self;
                }
                State::Paused | State::Idle | State::Finished => callback,
            }
        };

        self.reset();
        let this = self.clone();
        self.spawner.next_tick(move || halted(&this));
        self
    }

    /// First tick of a run: build the routine, or run the plain function.
    fn begin(&self, epoch: u64) {
        let computation = {
            let mut inner = self.inner.borrow_mut();
            if !inner.is_live(epoch) {
                return;
            }
            inner.computation.take()
        };

        let mut computation = match computation {
            Some(c) => c,
            None => return self.finish(epoch, Err(Error::NotCallable)),
        };

        let built = catch_unwind(AssertUnwindSafe(|| match &mut computation {
            Computation::Plain(f) => Err(f()),
            Computation::Routine(factory) => Ok(factory()),
        }));
        self.inner.borrow_mut().computation = Some(computation);

        match built {
            Ok(Ok(routine)) => {
                {
                    let mut inner = self.inner.borrow_mut();
                    if !inner.is_live(epoch) {
                        return;
                    }
                    inner.routine = Some(routine);
                }
                self.step(epoch, None);
            }
            Ok(Err(res)) => self.finish(epoch, res.map_err(Error::Routine)),
            Err(payload) => self.finish(epoch, Err(Error::from_panic(payload))),
        }
    }

    /// Resume the routine once and act on what it produced.
    fn step(&self, epoch: u64, input: Option<T>) {
        let mut routine = {
            let mut inner = self.inner.borrow_mut();
            if !inner.is_live(epoch) {
                return;
            }
            match inner.routine.take() {
                Some(r) => r,
                None => return,
            }
        };

        trace!(id = self.id, epoch, "step");
        let stepped = catch_unwind(AssertUnwindSafe(|| routine.resume(input)));

        let y = match stepped {
            Ok(Ok(Step::Yielded(y))) => y,
            Ok(Ok(Step::Complete(r))) => return self.finish(epoch, Ok(r)),
            Ok(Err(e)) => return self.finish(epoch, Err(Error::Routine(e))),
            Err(payload) => return self.finish(epoch, Err(Error::from_panic(payload))),
        };

        let checkpoint = {
            let mut inner = self.inner.borrow_mut();
            if inner.epoch != epoch {
                // Reset from inside the step.
                return;
            }
            inner.routine = Some(routine);
            if inner.state == State::Paused {
                inner.pending = Some(y);
                debug!(id = self.id, epoch, "pause landed");
                Checkpoint::Halt(std::mem::take(&mut inner.acks))
            } else {
                Checkpoint::Continue(y)
            }
        };

        match checkpoint {
            Checkpoint::Continue(y) => self.dispatch(epoch, y),
            Checkpoint::Halt(acks) => self.acknowledge(acks),
        }
    }

    /// Feed a plain value back, or invoke a continuation request and feed back its result.
    fn dispatch(&self, epoch: u64, y: Yield<T, E>) {
        if !self.inner.borrow().is_live(epoch) {
            return;
        }
        match y {
            Yield::Value(v) => self.schedule_step(epoch, v),
            Yield::Await(continuation) => {
                trace!(id = self.id, epoch, "awaiting continuation");
                let this = self.clone();
                let invoked = catch_unwind(AssertUnwindSafe(move || {
                    continuation.invoke(move |res| match res {
                        Ok(v) => this.schedule_step(epoch, v),
                        Err(e) => this.schedule_finish(epoch, Err(Error::Continuation(e))),
                    })
                }));
                if let Err(payload) = invoked {
                    self.finish(epoch, Err(Error::from_panic(payload)));
                }
            }
        }
    }

    /// Queue the next step, yielding to the macro-task queue once every `max_sync_steps` steps.
    fn schedule_step(&self, epoch: u64, input: T) {
        let yield_to_host = {
            let mut inner = self.inner.borrow_mut();
            inner.step_count += 1;
            if inner.step_count >= inner.config.step_budget() {
                inner.step_count = 0;
                true
            } else {
                false
            }
        };

        let this = self.clone();
        if yield_to_host {
            trace!(id = self.id, epoch, "yielding to the macro-task queue");
            self.spawner.defer(move || this.step(epoch, Some(input)));
        } else {
            self.spawner.next_tick(move || this.step(epoch, Some(input)));
        }
    }

    fn schedule_finish(&self, epoch: u64, outcome: Outcome<R, E>) {
        let this = self.clone();
        self.spawner.next_tick(move || this.finish(epoch, outcome));
    }

    /// Record the outcome and fire the terminal callback.
    fn finish(&self, epoch: u64, outcome: Outcome<R, E>) {
        let (callback, acks, _routine) = {
            let mut inner = self.inner.borrow_mut();
            if !inner.is_live(epoch) {
                return;
            }
            inner.state = State::Finished;
            inner.pending = None;
            inner.outcome = Some(outcome.clone());
            (
                inner.callback.take(),
                std::mem::take(&mut inner.acks),
                inner.routine.take(),
            )
        };
        debug!(id = self.id, epoch, ok = outcome.is_ok(), "controller finished");

        if let Some(callback) = callback {
            callback(outcome);
        }

        // A pause that never landed has nothing left to acknowledge. A kill still resets, unless
        // the terminal callback already started another run.
        let (_, kills) = split_acks(acks);
        if kills.is_empty() {
            return;
        }
        if self.reset_run() || self.state() == State::Idle {
            for killed in kills {
                killed(self);
            }
        } else {
            debug!(id = self.id, epoch, "kill dropped, controller was restarted");
        }
    }

    /// Call everything that was waiting for the pause to land.
    ///
    /// A kill takes precedence: the controller is reset before any callback runs and the pause
    /// acknowledgements are dropped.
    fn acknowledge(&self, acks: Vec<Ack<T, R, E>>) {
        let (pauses, kills) = split_acks(acks);
        if kills.is_empty() {
            for on_paused in pauses {
                on_paused(self);
            }
        } else if self.reset_run() {
            for killed in kills {
                killed(self);
            }
        }
    }
}

/// Splits acknowledgements into pause and kill callbacks, each in request order.
fn split_acks<T, R, E>(acks: Vec<Ack<T, R, E>>) -> (Acks<T, R, E>, Acks<T, R, E>) {
    let mut pauses = Vec::new();
    let mut kills = Vec::new();
    for ack in acks {
        match ack {
            Ack::Pause(f) => pauses.push(f),
            Ack::Kill(f) => kills.push(f),
        }
    }
    (pauses, kills)
}

impl<T, R, E> std::fmt::Debug for Controller<T, R, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Controller")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("epoch", &inner.epoch)
            .field("computation", &inner.computation)
            .finish_non_exhaustive()
    }
}
