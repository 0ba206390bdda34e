// =============================================================================
// kdispatch — Kernel Synchronization Primitives
// =============================================================================
//
// Two kinds of lock are in use:
//   - `spin::Mutex` for short critical sections that never block: the pool
//     lists, work item bodies, the abort hook slot.
//   - `parking_lot::{Mutex, Condvar}` where a thread has to sleep: each
//     dispatch queue's state, each virtual processor's park state, and the
//     semaphores below.
//
// IMPORTANT: Lock ordering rules:
//   Level 1 (innermost): work item body
//   Level 2: virtual processor state
//   Level 3: pool lists
//   Level 4 (outermost): dispatch queue state
//
// Locks are taken outermost first. NEVER acquire an outer lock while
// holding an inner one.
// The pool lists and a queue lock are never held together: a queue reserves
// a lane under its lock, drops the lock, and only then goes to the pool.
// =============================================================================

pub mod semaphore;

pub use semaphore::{CompletionSignaler, Semaphore};
