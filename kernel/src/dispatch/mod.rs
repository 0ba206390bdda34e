//! Dispatch queues, their work items and the system queues.

pub mod item;
pub mod queue;
pub mod system;

pub use item::{ItemType, Timer, WorkItem};
pub use queue::DispatchQueue;
pub use system::{SystemQueue, SystemQueues};
