/// The number of consecutive steps a controller takes before it yields to the macro-task queue.
pub const DEFAULT_MAX_SYNC_STEPS: usize = 2000;

/// Controller tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Consecutive steps scheduled on the next-tick queue before one is sent to the macro-task
    /// queue instead, giving timers and other queued work a chance to run. Zero acts as one.
    pub max_sync_steps: usize,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_sync_steps(mut self, max_sync_steps: usize) -> Self {
        self.max_sync_steps = max_sync_steps;
        self
    }

    #[inline]
    pub(crate) fn step_budget(&self) -> usize {
        self.max_sync_steps.max(1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_sync_steps: DEFAULT_MAX_SYNC_STEPS,
        }
    }
}
