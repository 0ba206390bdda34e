//! Execution contexts: the monotonic clock, virtual processors and the pool
//! that recycles them.

pub mod clock;
pub mod pool;
pub mod vp;

pub use clock::Timestamp;
pub use pool::VirtualProcessorPool;
pub use vp::{VirtualProcessor, VirtualProcessorRef, VpEntry, VpFlags, VpParameters};
