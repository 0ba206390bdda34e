//! Virtual processor pool.
//!
//! Creating a VP means creating a thread and a stack; dispatch queues
//! staff and retire lanes far more often than that should happen. The pool
//! keeps every VP it handed out on an *in-use* list and takes back VPs
//! whose work is done onto a *reuse* list, where they stay parked until the
//! next `acquire`. A VP is always on exactly one of the two lists.
//!
//! The reuse list is bounded. A VP relinquished while it is full is
//! finalized instead.
//!
//! New VPs come from a spawn function, [`VirtualProcessor::create`] unless
//! the pool was built with [`VirtualProcessorPool::with_spawner`].

use std::io;
use std::sync::Arc;

use spin::Mutex;

use crate::config::REUSE_CACHE_CAPACITY;
use crate::error::PoolError;
use crate::task::vp::{VirtualProcessor, VirtualProcessorRef, VpEntry, VpParameters};
use crate::util::list::SlotList;

struct PoolLists {
    in_use: SlotList<VirtualProcessorRef>,
    reuse: SlotList<VirtualProcessorRef>,
    shut_down: bool,
}

/// Creates the thread behind a new VP.
type Spawner = dyn Fn(VpParameters) -> io::Result<VirtualProcessorRef> + Send + Sync;

struct PoolInner {
    lists: Mutex<PoolLists>,
    reuse_capacity: usize,
    spawn: Box<Spawner>,
}

/// Shared handle to a pool of reusable virtual processors.
#[derive(Clone)]
pub struct VirtualProcessorPool {
    inner: Arc<PoolInner>,
}

impl Default for VirtualProcessorPool {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualProcessorPool {
    pub fn new() -> Self {
        Self::with_reuse_capacity(REUSE_CACHE_CAPACITY)
    }

    pub fn with_reuse_capacity(reuse_capacity: usize) -> Self {
        Self::with_spawner(reuse_capacity, VirtualProcessor::create)
    }

    /// A pool that creates its VPs with `spawn`. An error from `spawn`
    /// fails the `acquire` that needed the VP.
    pub fn with_spawner<F>(reuse_capacity: usize, spawn: F) -> Self
    where
        F: Fn(VpParameters) -> io::Result<VirtualProcessorRef> + Send + Sync + 'static,
    {
        log::debug!(target: "kdispatch", "vp pool: created (reuse capacity {reuse_capacity})");
        Self {
            inner: Arc::new(PoolInner {
                lists: Mutex::new(PoolLists {
                    in_use: SlotList::new(),
                    reuse: SlotList::new(),
                    shut_down: false,
                }),
                reuse_capacity,
                spawn: Box::new(spawn),
            }),
        }
    }

    /// Hand out a VP configured with `params` and `entry`.
    ///
    /// A parked VP from the reuse list is preferred; otherwise a new one is
    /// created. Either way the VP comes back suspended: the caller resumes
    /// it once it is ready for the entry to run. The entry must end by
    /// calling [`relinquish`](Self::relinquish) on its own VP.
    pub fn acquire(
        &self,
        params: VpParameters,
        entry: VpEntry,
        is_user: bool,
    ) -> Result<VirtualProcessorRef, PoolError> {
        let reused = {
            let mut lists = self.inner.lists.lock();
            let found = lists
                .reuse
                .iter()
                .find(|(_, vp)| vp.is_suspended())
                .map(|(link, _)| link);
            match found.and_then(|link| lists.reuse.remove(link)) {
                Some(vp) => {
                    let link = lists.in_use.push_front(Arc::clone(&vp));
                    *vp.pool_link.lock() = Some(link);
                    Some(vp)
                }
                None => None,
            }
        };

        let vp = match reused {
            Some(vp) => {
                log::trace!(target: "kdispatch", "vp pool: reusing vp{}", vp.id());
                vp
            }
            None => {
                let vp = (self.inner.spawn)(params)?;
                let mut lists = self.inner.lists.lock();
                let link = lists.in_use.push_front(Arc::clone(&vp));
                *vp.pool_link.lock() = Some(link);
                vp
            }
        };

        // Configuration is reapplied on every acquire, reused or not.
        vp.set_priority(params.priority);
        vp.set_stack_sizes(params.kernel_stack_size, params.user_stack_size);
        vp.set_entry(entry, is_user);
        Ok(vp)
    }

    /// Give `vp` back. Called by the VP itself as the last thing its entry
    /// does: the VP parks on the reuse list if there is room, otherwise it
    /// is finalized. Either way it stops once the entry returns.
    pub fn relinquish(&self, vp: &VirtualProcessorRef) {
        let reused = {
            let mut lists = self.inner.lists.lock();
            let link = vp.pool_link.lock().take();
            if link.and_then(|link| lists.in_use.remove(link)).is_none() {
                log::warn!(target: "kdispatch", "vp pool: vp{} is not in use here", vp.id());
                return;
            }
            if !lists.shut_down && lists.reuse.len() < self.inner.reuse_capacity {
                let link = lists.reuse.push_front(Arc::clone(vp));
                *vp.pool_link.lock() = Some(link);
                true
            } else {
                false
            }
        };

        if reused {
            vp.suspend();
        } else {
            log::debug!(target: "kdispatch", "vp pool: reuse list full, finalizing vp{}", vp.id());
            vp.schedule_finalization();
        }
    }

    pub fn in_use_count(&self) -> usize {
        self.inner.lists.lock().in_use.len()
    }

    pub fn reuse_count(&self) -> usize {
        self.inner.lists.lock().reuse.len()
    }

    /// Finalize every parked VP and wait for their threads to end. VPs still
    /// in use finalize when they are relinquished.
    pub fn shutdown(&self) {
        let parked: Vec<VirtualProcessorRef> = {
            let mut lists = self.inner.lists.lock();
            lists.shut_down = true;
            lists.reuse.drain().collect()
        };
        log::info!(target: "kdispatch", "vp pool: shutting down {} parked vps", parked.len());
        for vp in &parked {
            *vp.pool_link.lock() = None;
            vp.schedule_finalization();
        }
        for vp in parked {
            vp.join();
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let lists = self.lists.get_mut();
        for vp in lists.reuse.drain() {
            vp.schedule_finalization();
        }
    }
}
