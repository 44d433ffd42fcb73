//! Shared utility modules used across canopy components.

pub mod interrupt;
pub mod pool;
pub mod text;

pub use interrupt::Interrupt;
pub use pool::{Task, WorkerPool, run_or_submit};
