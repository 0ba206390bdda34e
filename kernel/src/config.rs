// =============================================================================
// kdispatch — Kernel Dispatch Configuration
// =============================================================================
//
// Every sizing decision of the dispatch subsystem lives here, as constants,
// the same way the rest of the kernel sizes its stacks and tables:
//
//   - work item / timer cache capacities per queue
//   - the idle heartbeat after which an unused worker retires
//   - the virtual processor reuse cache capacity
//   - default virtual processor stack sizes and priorities
//   - the QoS classes and the dispatch priority band
//   - the table of system queues created at boot
//
// `QueueConfig` carries the per-queue overrides. Its `Default` is exactly
// the constants below; overriding is meant for tests and special queues.
// =============================================================================

use core::time::Duration;

use crate::dispatch::system::SystemQueue;

// ── Queue sizing ────────────────────────────────────────────────

/// Maximum number of recycled immediate work items a queue keeps.
pub const ITEM_CACHE_CAPACITY: usize = 8;

/// Maximum number of recycled timers a queue keeps.
pub const TIMER_CACHE_CAPACITY: usize = 8;

/// How long a worker waits for new work before retiring its lane.
pub const IDLE_HEARTBEAT: Duration = Duration::from_secs(2);

/// Upper bound on a queue's concurrency lanes.
pub const MAX_CONCURRENCY: usize = i8::MAX as usize;

// ── Virtual processors ──────────────────────────────────────────

/// Parked virtual processors the pool keeps for reuse. A worker that
/// relinquishes itself while the cache is full is finalized instead.
pub const REUSE_CACHE_CAPACITY: usize = 16;

/// Kernel stack size of a virtual processor (256 KiB).
pub const VP_DEFAULT_KERNEL_STACK_SIZE: usize = 256 * 1024;

/// User stack size of a virtual processor. Dispatch workers never enter
/// user mode, so they get none.
pub const VP_DEFAULT_USER_STACK_SIZE: usize = 0;

/// Smallest kernel stack a virtual processor is created with.
pub const VP_MIN_KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Number of scheduler priority levels.
pub const VP_PRIORITY_COUNT: i32 = 64;

/// Levels at the bottom of the range that dispatch queues never use.
pub const VP_PRIORITIES_RESERVED_LOW: i32 = 2;

/// Levels at the top of the range that dispatch queues never use.
pub const VP_PRIORITIES_RESERVED_HIGH: i32 = 2;

/// Priority of a virtual processor that nobody configured.
pub const VP_PRIORITY_NORMAL: i32 = VP_PRIORITY_COUNT / 2;

// ── QoS and dispatch priorities ─────────────────────────────────

/// Quality-of-service class of a dispatch queue. Higher classes map to
/// higher scheduler priority bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Qos {
    Idle = 0,
    Background = 1,
    Utility = 2,
    Interactive = 3,
    Realtime = 4,
}

/// Number of priority steps inside one QoS band.
pub const DISPATCH_PRIORITY_COUNT: i32 = 12;

/// Highest priority a queue may ask for within its QoS band.
pub const DISPATCH_PRIORITY_HIGHEST: i8 = 5;

/// Default priority within a QoS band.
pub const DISPATCH_PRIORITY_NORMAL: i8 = 0;

/// Lowest priority a queue may ask for within its QoS band.
pub const DISPATCH_PRIORITY_LOWEST: i8 = -6;

/// Scheduler priority of the workers of a queue with the given QoS and
/// dispatch priority.
///
/// Each QoS class owns a band of `DISPATCH_PRIORITY_COUNT` levels above the
/// reserved low levels; the dispatch priority picks a level inside the band.
pub const fn vp_priority(qos: Qos, priority: i8) -> i32 {
    (qos as i32) * DISPATCH_PRIORITY_COUNT
        + (priority as i32 + DISPATCH_PRIORITY_COUNT / 2)
        + VP_PRIORITIES_RESERVED_LOW
}

// ── Per-queue overrides ─────────────────────────────────────────

/// Tunables of a single dispatch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Bound of the immediate work item cache.
    pub item_cache_capacity: usize,
    /// Bound of the timer cache.
    pub timer_cache_capacity: usize,
    /// Idle window after which a worker retires.
    pub idle_heartbeat: Duration,
    /// Maximum number of queue-owned items and timers alive at once
    /// (cached or in flight). `None` leaves allocation unbounded; when the
    /// limit is hit and the cache is empty, submissions fail with
    /// `DispatchError::OutOfMemory`.
    pub allocation_limit: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            item_cache_capacity: ITEM_CACHE_CAPACITY,
            timer_cache_capacity: TIMER_CACHE_CAPACITY,
            idle_heartbeat: IDLE_HEARTBEAT,
            allocation_limit: None,
        }
    }
}

// ── System queues ───────────────────────────────────────────────

/// One row of the system queue table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemQueueDescriptor {
    pub kind: SystemQueue,
    pub name: &'static str,
    pub max_concurrency: usize,
    pub qos: Qos,
    pub priority: i8,
}

/// The queues created at boot. They differ only in lane count, QoS and
/// priority; `SystemQueues::create` builds them in this order.
pub const SYSTEM_QUEUES: [SystemQueueDescriptor; 5] = [
    SystemQueueDescriptor {
        kind: SystemQueue::Realtime,
        name: "realtime",
        max_concurrency: 4,
        qos: Qos::Realtime,
        priority: DISPATCH_PRIORITY_NORMAL,
    },
    SystemQueueDescriptor {
        kind: SystemQueue::Main,
        name: "main",
        max_concurrency: 1,
        qos: Qos::Interactive,
        priority: DISPATCH_PRIORITY_NORMAL,
    },
    SystemQueueDescriptor {
        kind: SystemQueue::Utility,
        name: "utility",
        max_concurrency: 4,
        qos: Qos::Utility,
        priority: DISPATCH_PRIORITY_NORMAL,
    },
    SystemQueueDescriptor {
        kind: SystemQueue::Background,
        name: "background",
        max_concurrency: 4,
        qos: Qos::Background,
        priority: DISPATCH_PRIORITY_NORMAL,
    },
    SystemQueueDescriptor {
        kind: SystemQueue::Idle,
        name: "idle",
        max_concurrency: 2,
        qos: Qos::Idle,
        priority: DISPATCH_PRIORITY_NORMAL,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_bands_stay_inside_the_usable_range() {
        let lowest = vp_priority(Qos::Idle, DISPATCH_PRIORITY_LOWEST);
        let highest = vp_priority(Qos::Realtime, DISPATCH_PRIORITY_HIGHEST);

        assert_eq!(lowest, VP_PRIORITIES_RESERVED_LOW);
        assert_eq!(highest, VP_PRIORITY_COUNT - VP_PRIORITIES_RESERVED_HIGH - 1);
    }

    #[test]
    fn higher_qos_always_outranks_lower_qos() {
        let interactive_low = vp_priority(Qos::Interactive, DISPATCH_PRIORITY_LOWEST);
        let utility_high = vp_priority(Qos::Utility, DISPATCH_PRIORITY_HIGHEST);
        assert!(interactive_low > utility_high);
    }

    #[test]
    fn system_queue_table_is_in_kind_order() {
        for (index, desc) in SYSTEM_QUEUES.iter().enumerate() {
            assert_eq!(desc.kind as usize, index, "{}", desc.name);
            assert!(desc.max_concurrency >= 1 && desc.max_concurrency <= MAX_CONCURRENCY);
        }
    }

    #[test]
    fn default_queue_config_matches_the_constants() {
        let config = QueueConfig::default();
        assert_eq!(config.item_cache_capacity, 8);
        assert_eq!(config.timer_cache_capacity, 8);
        assert_eq!(config.idle_heartbeat, Duration::from_secs(2));
        assert_eq!(config.allocation_limit, None);
    }
}
