// =============================================================================
// kdispatch — Kernel Concurrency Core
// =============================================================================
//
// Everything in the kernel that wants code to run "later", "elsewhere" or
// "every N milliseconds" goes through this crate.
//
// LAYERS (bottom-up):
//   util     — fatal failure path, arena-backed linked list
//   sync     — semaphore and one-shot completion signal
//   task     — monotonic clock, virtual processors, the VP pool
//   dispatch — work items, timers, dispatch queues, system queues
//
// The crate logs through the `log` facade only. Whoever boots it picks the
// backend; `dispatchd` installs klog.
//
// A QUICK TOUR:
//
//   let pool = VirtualProcessorPool::new();
//   let queues = SystemQueues::create(&pool)?;
//   queues.main().dispatch_async(|| klog::info!("hello from main"))?;
//   queues.teardown()?;
//   pool.shutdown();
// =============================================================================

// =============================================================================
// Module declarations
// =============================================================================

/// Compile-time sizing: caches, heartbeat, priorities, the system queue table.
pub mod config;

/// Work items, timers, dispatch queues and the system queues.
pub mod dispatch;

/// Recoverable error types.
pub mod error;

/// Semaphore and completion signal.
pub mod sync;

/// Clock, virtual processors and the virtual processor pool.
pub mod task;

/// Fatal failure path and the intrusive-style list.
pub mod util;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{QueueConfig, Qos};
pub use dispatch::{DispatchQueue, ItemType, SystemQueue, SystemQueues, Timer, WorkItem};
pub use error::{DispatchError, PoolError};
pub use sync::{CompletionSignaler, Semaphore};
pub use task::{Timestamp, VirtualProcessor, VirtualProcessorPool};
pub use util::fail::{set_abort_hook, FatalError};
