//! A deterministic, single-threaded host scheduler with a next-tick queue, a macro-task queue,
//! virtual-time timers and detached futures.
//!
//! Work is run in this order on every turn:
//!
//!   1. the next-tick (micro-task) queue, drained completely before anything else runs,
//!   2. the macro-task queue, which due timers and woken futures join,
//!   3. the earliest pending timer, advancing the virtual clock to its deadline.
//!
//! Time is virtual: nothing here reads the wall clock, so runs are reproducible.

use std::cell::RefCell;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use tracing::trace;

use super::waker::{task_waker, WokenTasks};

/// A unique identifier assigned to each detached future upon its creation.
pub(crate) type TaskId = usize;

/// A unit of scheduled work.
type Job = Box<dyn FnOnce()>;

/// A detached future that the executor will run.
struct Task {
    id: TaskId,
    fut: Pin<Box<dyn Future<Output = ()>>>,
}

/// An entry of the macro-task queue, and what a single turn decided to run.
enum Macro {
    Run(Job),
    Poll(TaskId),
}

struct Timer {
    deadline: Duration,
    seq: u64,
    job: Job,
}

impl PartialEq for Timer {
    fn eq(&self, o: &Self) -> bool {
        self.cmp(o) == Ordering::Equal
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, o: &Self) -> Option<Ordering> {
        Some(self.cmp(o))
    }
}

impl Ord for Timer {
    fn cmp(&self, o: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(o.deadline, o.seq))
    }
}

#[derive(Default)]
struct Inner {
    task_id: TaskId,
    tasks: Vec<Task>,
    micro: VecDeque<Job>,
    macros: VecDeque<Macro>,
    timers: BinaryHeap<Reverse<Timer>>,
    timer_seq: u64,
    now: Duration,
    unfinished_tasks: isize,
}

impl Inner {
    /// Move every timer whose deadline has passed into the macro-task queue.
    fn promote_due_timers(&mut self) {
        while matches!(self.timers.peek(), Some(Reverse(t)) if t.deadline <= self.now) {
            if let Some(Reverse(timer)) = self.timers.pop() {
                self.macros.push_back(Macro::Run(timer.job));
            }
        }
    }
}

/// A handle for scheduling work onto an [Executor]. Clone it as many times as needed.
///
/// A spawner cannot drive the executor; only the owner of the [Executor] decides when work runs.
#[derive(Clone)]
pub struct Spawner {
    inner: Rc<RefCell<Inner>>,
}

impl Spawner {
    /// Run `f` on the next tick, before any macro task or timer.
    #[inline]
    pub fn next_tick(&self, f: impl FnOnce() + 'static) {
        self.inner.borrow_mut().micro.push_back(Box::new(f));
    }

    /// Run `f` from the macro-task queue, after all currently queued next-tick work.
    #[inline]
    pub fn defer(&self, f: impl FnOnce() + 'static) {
        self.inner.borrow_mut().macros.push_back(Macro::Run(Box::new(f)));
    }

    /// Run `f` once `delay` has elapsed on the virtual clock.
    #[inline]
    pub fn set_timeout(&self, delay: Duration, f: impl FnOnce() + 'static) {
        let mut inner = self.inner.borrow_mut();
        let deadline = inner.now + delay;
        let seq = inner.timer_seq;
        inner.timer_seq += 1;
        inner.timers.push(Reverse(Timer {
            deadline,
            seq,
            job: Box::new(f),
        }));
    }

    /// Run a future to completion. It is first polled from the macro-task queue and then every
    /// time it is woken.
    #[inline]
    pub fn spawn_detach(&self, fut: impl Future<Output = ()> + 'static) {
        // Allocate the task on the heap and turn it into a trait object.
        let fut: Pin<Box<dyn Future<Output = ()>>> = Box::pin(fut);

        let mut inner = self.inner.borrow_mut();

        let id = inner.task_id;
        inner.task_id += 1;

        inner.tasks.push(Task { id, fut });
        inner.macros.push_back(Macro::Poll(id));

        // Track this task as an unfinished task.
        inner.unfinished_tasks += 1;
    }

    /// Virtual time elapsed since the executor was created or last reset.
    #[inline]
    pub fn now(&self) -> Duration {
        self.inner.borrow().now
    }
}

/// An executor that runs next-tick callbacks, macro tasks, timers and detached futures on the
/// current thread.
#[derive(Default)]
pub struct Executor {
    inner: Rc<RefCell<Inner>>,
    woken: WokenTasks,
}

impl Executor {
    /// Create a new Spawner. Clone it as many times as needed.
    #[inline]
    pub fn spawner(&self) -> Spawner {
        Spawner {
            inner: self.inner.clone(),
        }
    }

    /// Run one unit of work.
    ///
    /// The return value indicates whether anything ran. `false` means the executor is idle.
    #[inline]
    pub fn turn(&self) -> bool {
        self.turn_until(None)
    }

    /// Run until there is no work left, advancing the virtual clock through every timer.
    ///
    /// Returns the number of units of work that ran.
    pub fn run(&self) -> usize {
        let mut ran = 0;
        while self.turn() {
            ran += 1;
        }
        ran
    }

    /// Run all work that becomes due within `duration` from now, then move the clock to that
    /// point in time.
    ///
    /// Returns the number of units of work that ran.
    pub fn run_for(&self, duration: Duration) -> usize {
        let limit = self.now() + duration;
        let mut ran = 0;
        while self.turn_until(Some(limit)) {
            ran += 1;
        }
        let mut inner = self.inner.borrow_mut();
        if inner.now < limit {
            inner.now = limit;
        }
        ran
    }

    /// Virtual time elapsed since the executor was created or last reset.
    #[inline]
    pub fn now(&self) -> Duration {
        self.inner.borrow().now
    }

    /// The number of queued units of work: next-tick callbacks, macro tasks and timers.
    ///
    /// Polls queued for futures that have since finished are not counted. A future woken several
    /// times before it is polled counts once per wake.
    pub fn pending(&self) -> usize {
        self.collect_woken();
        let inner = self.inner.borrow();
        let macros = inner
            .macros
            .iter()
            .filter(|m| match m {
                Macro::Run(_) => true,
                Macro::Poll(id) => inner.tasks.iter().any(|t| t.id == *id),
            })
            .count();
        inner.micro.len() + macros + inner.timers.len()
    }

    /// Obtain the number of unfinished detached futures.
    ///
    /// If the number is positive and the executor is idle, those futures are waiting on a wakeup
    /// that will never come from this executor.
    #[inline]
    pub fn unfinished_tasks(&self) -> isize {
        self.inner.borrow().unfinished_tasks
    }

    /// Drop all queued work and detached futures, and rewind the clock.
    pub fn reset(&self) {
        // Take everything out first so that destructors run without the borrow held.
        let dropped = {
            let mut inner = self.inner.borrow_mut();
            let dropped = std::mem::take(&mut *inner);
            inner.task_id = dropped.task_id;
            dropped
        };
        self.woken.lock().clear();
        drop(dropped);
    }

    /// Move the ids of woken futures into the macro-task queue.
    fn collect_woken(&self) {
        let woken: Vec<TaskId> = std::mem::take(&mut *self.woken.lock());
        if woken.is_empty() {
            return;
        }
        let mut inner = self.inner.borrow_mut();
        for id in woken {
            inner.macros.push_back(Macro::Poll(id));
        }
    }

    fn turn_until(&self, limit: Option<Duration>) -> bool {
        self.collect_woken();

        let next = {
            let mut inner = self.inner.borrow_mut();
            if let Some(job) = inner.micro.pop_front() {
                Macro::Run(job)
            } else {
                inner.promote_due_timers();
                match inner.macros.pop_front() {
                    Some(next) => next,
                    None => {
                        let due = match (inner.timers.peek(), limit) {
                            (None, _) => false,
                            (Some(_), None) => true,
                            (Some(Reverse(t)), Some(limit)) => t.deadline <= limit,
                        };
                        if !due {
                            return false;
                        }
                        let Reverse(timer) = match inner.timers.pop() {
                            Some(t) => t,
                            None => return false,
                        };
                        if timer.deadline > inner.now {
                            trace!(now = ?timer.deadline, "advancing virtual clock");
                            inner.now = timer.deadline;
                        }
                        Macro::Run(timer.job)
                    }
                }
            }
        };

        // The borrow is released here: jobs are free to schedule more work.
        match next {
            Macro::Run(job) => job(),
            Macro::Poll(id) => self.poll_task(id),
        }
        true
    }

    fn poll_task(&self, id: TaskId) {
        let mut task = {
            let mut inner = self.inner.borrow_mut();
            // A task can be woken more than once before it is polled, or after it finished.
            let idx = match inner.tasks.iter().position(|t| t.id == id) {
                Some(idx) => idx,
                None => return,
            };
            inner.tasks.swap_remove(idx)
        };

        let w = task_waker(task.id, self.woken.clone());
        let context = &mut Context::from_waker(&w);
        let poll_result = task.fut.as_mut().poll(context);

        let mut inner = self.inner.borrow_mut();
        match poll_result {
            Poll::Ready(()) => {
                inner.unfinished_tasks -= 1;
            }
            Poll::Pending => {
                // Put the task back since there is more work to do.
                inner.tasks.push(task);
            }
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Executor")
            .field("now", &inner.now)
            .field("micro", &inner.micro.len())
            .field("macros", &inner.macros.len())
            .field("timers", &inner.timers.len())
            .field("unfinished_tasks", &inner.unfinished_tasks)
            .finish()
    }
}

impl std::fmt::Debug for Spawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spawner").finish_non_exhaustive()
    }
}
