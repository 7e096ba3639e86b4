pub mod executor;
pub mod on_ready_fn;
pub mod utils;
mod waker;

pub use executor::{Executor, Spawner};
pub use on_ready_fn::OnReadyFn;
