//! Wakers for detached futures.
//!
//! Waking a task only records its id in a shared list; the [Executor](super::Executor) moves the
//! recorded ids into its macro-task queue on its next turn. The list is behind a spin lock, so a
//! future may be woken from another thread even though it is only ever polled on the executor's.

use std::sync::Arc;
use std::task::{Wake, Waker};

use spin::Mutex;

use super::executor::TaskId;

/// Ids of tasks woken since the executor last looked.
pub(crate) type WokenTasks = Arc<Mutex<Vec<TaskId>>>;

struct TaskWaker {
    id: TaskId,
    woken: WokenTasks,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.woken.lock().push(self.id);
    }
}

/// Converts a task id into a [`Waker`] that re-queues the task when woken.
#[inline]
pub(crate) fn task_waker(id: TaskId, woken: WokenTasks) -> Waker {
    Waker::from(Arc::new(TaskWaker { id, woken }))
}
