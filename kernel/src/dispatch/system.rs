//! The standard queues every kernel service can rely on.
//!
//! Boot code creates one [`SystemQueues`] value and passes it (or clones of
//! the individual queues) to whoever needs them. There are no globals.

use crate::config::{QueueConfig, SYSTEM_QUEUES};
use crate::dispatch::queue::DispatchQueue;
use crate::error::DispatchError;
use crate::task::pool::VirtualProcessorPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemQueue {
    /// Latency-critical work, e.g. input and audio.
    Realtime,
    /// Serial queue for UI and other work that must not interleave.
    Main,
    Utility,
    Background,
    /// Runs only when nothing else wants the CPU.
    Idle,
}

pub struct SystemQueues {
    /// In `SYSTEM_QUEUES` order.
    queues: Vec<(SystemQueue, DispatchQueue)>,
}

impl SystemQueues {
    /// Create every queue of the system queue table on `pool`.
    pub fn create(pool: &VirtualProcessorPool) -> Result<Self, DispatchError> {
        let mut queues = Vec::with_capacity(SYSTEM_QUEUES.len());
        for desc in SYSTEM_QUEUES.iter() {
            let queue = DispatchQueue::create_with_config(
                pool,
                desc.name,
                desc.max_concurrency,
                desc.qos,
                desc.priority,
                QueueConfig::default(),
            )?;
            queues.push((desc.kind, queue));
        }
        log::info!(target: "kdispatch", "system queues: {} created", queues.len());
        Ok(Self { queues })
    }

    pub fn get(&self, kind: SystemQueue) -> &DispatchQueue {
        // The table lists the kinds in declaration order.
        &self.queues[kind as usize].1
    }

    pub fn realtime(&self) -> &DispatchQueue {
        self.get(SystemQueue::Realtime)
    }

    pub fn main(&self) -> &DispatchQueue {
        self.get(SystemQueue::Main)
    }

    pub fn utility(&self) -> &DispatchQueue {
        self.get(SystemQueue::Utility)
    }

    pub fn background(&self) -> &DispatchQueue {
        self.get(SystemQueue::Background)
    }

    pub fn idle(&self) -> &DispatchQueue {
        self.get(SystemQueue::Idle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SystemQueue, &DispatchQueue)> {
        self.queues.iter().map(|(kind, queue)| (*kind, queue))
    }

    /// Shut every queue down, last created first. Stops at the first queue
    /// that refuses.
    pub fn teardown(self) -> Result<(), DispatchError> {
        for (kind, queue) in self.queues.iter().rev() {
            log::debug!(target: "kdispatch", "system queues: tearing down {kind:?}");
            queue.shutdown()?;
        }
        Ok(())
    }
}
