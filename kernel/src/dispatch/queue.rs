// =============================================================================
// kdispatch — Dispatch Queues
// =============================================================================
//
// A dispatch queue runs closures on a bounded, elastic set of workers.
//
// QUEUES:
//   items  — immediate work, strictly FIFO
//   timers — deadline-ordered; equal deadlines keep submission order
//
// LANES:
//   A queue has `max_concurrency` lanes. Submitting work staffs a vacant
//   lane with a virtual processor from the pool; a worker that finds no
//   work within the idle heartbeat retires its lane and goes back to the
//   pool. A serial queue has exactly one lane.
//
// CACHES:
//   Items and timers the queue creates itself are recycled through two
//   bounded caches, so steady-state submission does not allocate.
//
// LOCKING:
//   Everything above sits behind one mutex. Workers sleep on one condition
//   variable for work; submitters and shutdown sleep on another for lane
//   changes. Closures never run under the mutex, and the pool is never
//   entered while holding it: a lane is reserved as `Starting` under the
//   lock, the worker is acquired with the lock dropped, then installed and
//   resumed. A submission returns once a staffed lane will run its item.
//
// SCHEDULING:
//   A worker prefers a due timer over the FIFO head. A timer that is not
//   due never delays immediate work. A repeating timer that is not
//   cancelled is rearmed past `now` (missed ticks are skipped) and
//   reinserted before the worker looks for the next item.
// =============================================================================

use core::time::Duration;
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::{
    vp_priority, QueueConfig, Qos, DISPATCH_PRIORITY_HIGHEST, DISPATCH_PRIORITY_LOWEST,
    MAX_CONCURRENCY, VP_DEFAULT_KERNEL_STACK_SIZE, VP_DEFAULT_USER_STACK_SIZE,
};
use crate::dispatch::item::{Closure, ItemCore, ItemRef, ItemType, Timer, WorkItem};
use crate::error::DispatchError;
use crate::sync::CompletionSignaler;
use crate::task::clock::{self, Timestamp};
use crate::task::pool::VirtualProcessorPool;
use crate::task::vp::{VirtualProcessor, VirtualProcessorRef, VpParameters};
use crate::util::fail::{fatal, FatalError};
use crate::util::list::{Link, SlotList};

// ── Lanes ───────────────────────────────────────────────────────

enum Lane {
    Vacant,
    /// Reserved by a submitter that is acquiring a worker for it.
    Starting,
    Staffed(VirtualProcessorRef),
}

impl Lane {
    fn is_vacant(&self) -> bool {
        matches!(self, Lane::Vacant)
    }

    fn is_starting(&self) -> bool {
        matches!(self, Lane::Starting)
    }

    fn is_staffed(&self) -> bool {
        matches!(self, Lane::Staffed(_))
    }

    fn is_worker(&self, vp_id: u64) -> bool {
        matches!(self, Lane::Staffed(vp) if vp.id() == vp_id)
    }
}

/// Where a submission landed, so a failed lane start can take it back.
#[derive(Clone, Copy)]
enum Pending {
    Item(Link),
    Timer(Link),
}

// ── Queue state ─────────────────────────────────────────────────

struct QueueState {
    items: SlotList<ItemRef>,
    timers: SlotList<ItemRef>,
    item_cache: SlotList<ItemRef>,
    timer_cache: SlotList<ItemRef>,
    lanes: Box<[Lane]>,
    available_concurrency: usize,
    /// Queue-owned items alive right now, cached or in flight.
    allocated: usize,
    terminating: bool,
    config: QueueConfig,
}

impl QueueState {
    fn new(max_concurrency: usize, config: QueueConfig) -> Self {
        Self {
            items: SlotList::new(),
            timers: SlotList::new(),
            item_cache: SlotList::new(),
            timer_cache: SlotList::new(),
            lanes: (0..max_concurrency).map(|_| Lane::Vacant).collect(),
            available_concurrency: 0,
            allocated: 0,
            terminating: false,
            config,
        }
    }

    /// A queue-owned item loaded with `closure`, from the cache if possible.
    fn acquire_item(
        &mut self,
        closure: Closure,
        item_type: ItemType,
        deadline: Timestamp,
    ) -> Result<ItemRef, DispatchError> {
        let cache = match item_type {
            ItemType::Immediate => &mut self.item_cache,
            _ => &mut self.timer_cache,
        };
        if let Some(item) = cache.pop_front() {
            item.init(closure, deadline);
            return Ok(item);
        }

        if self
            .config
            .allocation_limit
            .is_some_and(|limit| self.allocated >= limit)
        {
            log::warn!(target: "kdispatch", "work item allocation refused ({} alive)", self.allocated);
            return Err(DispatchError::OutOfMemory);
        }
        self.allocated += 1;
        Ok(Arc::new(ItemCore::new(
            closure,
            item_type,
            deadline,
            Duration::ZERO,
            true,
        )))
    }

    /// Put a queue-owned item into its cache, or destroy it if the cache is
    /// full.
    fn relinquish_item(&mut self, item: ItemRef) {
        item.deinit();
        let (cache, capacity) = match item.item_type() {
            ItemType::Immediate => (&mut self.item_cache, self.config.item_cache_capacity),
            _ => (&mut self.timer_cache, self.config.timer_cache_capacity),
        };
        if cache.len() < capacity && cache.try_reserve(1).is_ok() {
            cache.push_front(item);
        } else {
            self.allocated -= 1;
        }
    }

    /// The queue is done with `item`: recycle it if the queue owns it,
    /// otherwise hand it back to its owner.
    fn finish(&mut self, item: ItemRef) {
        if item.owned_by_queue() {
            self.relinquish_item(item);
        } else {
            drop(item.take_completion());
            item.clear_dispatched();
        }
    }

    /// Queue an already claimed item and reserve a lane for it if one is
    /// vacant. On failure the item is finished.
    fn enqueue(
        &mut self,
        item: ItemRef,
        timed: bool,
    ) -> Result<(Pending, Option<usize>), DispatchError> {
        if self.terminating {
            self.finish(item);
            return Err(DispatchError::Terminated);
        }

        let list = if timed { &mut self.timers } else { &mut self.items };
        if list.try_reserve(1).is_err() {
            log::warn!(target: "kdispatch", "no room to queue a work item");
            self.finish(item);
            return Err(DispatchError::OutOfMemory);
        }

        let pending = if timed {
            Pending::Timer(self.insert_timer(item))
        } else {
            Pending::Item(self.items.push_back(item))
        };
        Ok((pending, self.reserve_lane()))
    }

    fn insert_timer(&mut self, timer: ItemRef) -> Link {
        self.timers
            .insert_sorted_by(timer, |new, cur| new.deadline() < cur.deadline())
    }

    fn reserve_lane(&mut self) -> Option<usize> {
        let lane = self.lanes.iter().position(Lane::is_vacant)?;
        self.lanes[lane] = Lane::Starting;
        Some(lane)
    }

    fn retract(&mut self, pending: Pending) -> Option<ItemRef> {
        match pending {
            Pending::Item(link) => self.items.remove(link),
            Pending::Timer(link) => self.timers.remove(link),
        }
    }

    fn is_queued(&self, pending: Pending) -> bool {
        match pending {
            Pending::Item(link) => self.items.contains(link),
            Pending::Timer(link) => self.timers.contains(link),
        }
    }

    fn lane_of(&self, vp_id: u64) -> Option<usize> {
        self.lanes.iter().position(|lane| lane.is_worker(vp_id))
    }

    fn all_lanes_vacant(&self) -> bool {
        self.lanes.iter().all(Lane::is_vacant)
    }
}

// ── Shared queue object ─────────────────────────────────────────

struct QueueShared {
    name: String,
    max_concurrency: usize,
    qos: Qos,
    priority: i8,
    pool: VirtualProcessorPool,
    state: Mutex<QueueState>,
    work_available: Condvar,
    /// Signalled whenever a lane changes between vacant, starting and
    /// staffed.
    lanes_changed: Condvar,
}

impl QueueShared {
    fn worker_parameters(&self) -> VpParameters {
        VpParameters {
            kernel_stack_size: VP_DEFAULT_KERNEL_STACK_SIZE,
            user_stack_size: VP_DEFAULT_USER_STACK_SIZE,
            priority: vp_priority(self.qos, self.priority),
        }
    }

    /// See to it that a worker runs `pending`. `lane` is the lane reserved
    /// for it at submission, if one was vacant. Called without the queue
    /// lock.
    ///
    /// A submission succeeds only when a staffed lane exists to run its
    /// item, or a worker has already taken it. A submitter without a lane
    /// waits for the lanes still starting; if none of them came up, it
    /// starts one itself.
    fn staff(self: &Arc<Self>, lane: Option<usize>, pending: Pending) -> Result<(), DispatchError> {
        let lane = match lane {
            Some(lane) => lane,
            None => {
                let mut state = self.state.lock();
                if self.settle_lanes(&mut state) || !state.is_queued(pending) {
                    return Ok(());
                }
                // Every lane is vacant here.
                state.lanes[0] = Lane::Starting;
                0
            }
        };

        let worker = Arc::clone(self);
        let acquired = self
            .pool
            .acquire(self.worker_parameters(), Box::new(move || worker.run()), false);

        match acquired {
            Ok(vp) => {
                {
                    let mut state = self.state.lock();
                    state.lanes[lane] = Lane::Staffed(Arc::clone(&vp));
                    state.available_concurrency += 1;
                    self.lanes_changed.notify_all();
                }
                log::debug!(target: "kdispatch", "{}: lane {lane} staffed by vp{}", self.name, vp.id());
                vp.resume();
                Ok(())
            }
            Err(err) => {
                let mut state = self.state.lock();
                state.lanes[lane] = Lane::Vacant;
                self.lanes_changed.notify_all();
                if self.settle_lanes(&mut state) {
                    log::warn!(target: "kdispatch", "{}: lane {lane} left vacant: {err}", self.name);
                    return Ok(());
                }
                match state.retract(pending) {
                    Some(item) => {
                        state.finish(item);
                        Err(DispatchError::from(err))
                    }
                    // Already picked up by a worker that has since retired.
                    None => Ok(()),
                }
            }
        }
    }

    /// Wait until no lane is starting. Returns whether a lane is staffed.
    fn settle_lanes(&self, state: &mut MutexGuard<'_, QueueState>) -> bool {
        loop {
            if state.lanes.iter().any(Lane::is_staffed) {
                return true;
            }
            if !state.lanes.iter().any(Lane::is_starting) {
                return false;
            }
            self.lanes_changed.wait(state);
        }
    }

    /// The worker loop. Runs on a pool VP until it finds no work for an
    /// idle heartbeat, then retires its lane and relinquishes the VP.
    fn run(self: Arc<Self>) {
        let Some(vp) = VirtualProcessor::current() else {
            fatal(FatalError::WorkerLost);
        };

        let mut rearm: Option<ItemRef> = None;
        let mut state = self.state.lock();
        loop {
            if let Some(timer) = rearm.take() {
                if timer.is_cancelled() || state.terminating {
                    state.finish(timer);
                } else {
                    timer.rearm(clock::now());
                    state.insert_timer(timer);
                }
            }

            // Waiting
            loop {
                if !state.items.is_empty() || state.terminating {
                    break;
                }
                let now = clock::now();
                let deadline = match state.timers.front() {
                    Some(timer) if timer.deadline() <= now => break,
                    Some(timer) => timer.deadline(),
                    None => now.saturating_add(state.config.idle_heartbeat),
                };
                if self
                    .work_available
                    .wait_until(&mut state, deadline.to_instant())
                    .timed_out()
                {
                    break;
                }
            }

            if state.items.is_empty() && state.timers.is_empty() {
                let Some(lane) = state.lane_of(vp.id()) else {
                    drop(state);
                    fatal(FatalError::WorkerLost);
                };
                state.lanes[lane] = Lane::Vacant;
                state.available_concurrency -= 1;
                self.lanes_changed.notify_all();
                drop(state);

                log::debug!(target: "kdispatch", "{}: lane {lane} retired (vp{})", self.name, vp.id());
                self.pool.relinquish(&vp);
                return;
            }

            let now = clock::now();
            let timer_due = state.timers.front().is_some_and(|t| t.deadline() <= now);
            let next = if timer_due {
                state.timers.pop_front()
            } else {
                state.items.pop_front()
            };
            let Some(item) = next else {
                continue;
            };

            // Executing
            let keep_armed = MutexGuard::unlocked(&mut state, || {
                item.invoke();

                let keep_armed =
                    item.item_type() == ItemType::RepeatingTimer && !item.is_cancelled();
                let completion = item.take_completion();
                if !keep_armed && !item.owned_by_queue() {
                    item.clear_dispatched();
                }
                if let Some(done) = completion.as_ref().and_then(Weak::upgrade) {
                    done.signal();
                }
                keep_armed
            });

            if keep_armed {
                rearm = Some(item);
            } else if item.owned_by_queue() {
                state.relinquish_item(item);
            }
        }
    }
}

// ── Public handle ───────────────────────────────────────────────

/// Handle to a dispatch queue. Clones refer to the same queue.
#[derive(Clone)]
pub struct DispatchQueue {
    shared: Arc<QueueShared>,
}

impl DispatchQueue {
    /// Create a queue with `max_concurrency` lanes whose workers run at the
    /// scheduler priority derived from `qos` and `priority`.
    pub fn create(
        pool: &VirtualProcessorPool,
        max_concurrency: usize,
        qos: Qos,
        priority: i8,
    ) -> Result<Self, DispatchError> {
        Self::create_with_config(
            pool,
            "anonymous",
            max_concurrency,
            qos,
            priority,
            QueueConfig::default(),
        )
    }

    pub fn create_with_config(
        pool: &VirtualProcessorPool,
        name: impl Into<String>,
        max_concurrency: usize,
        qos: Qos,
        priority: i8,
        config: QueueConfig,
    ) -> Result<Self, DispatchError> {
        if !(1..=MAX_CONCURRENCY).contains(&max_concurrency) {
            return Err(DispatchError::InvalidConcurrency(max_concurrency));
        }
        if !(DISPATCH_PRIORITY_LOWEST..=DISPATCH_PRIORITY_HIGHEST).contains(&priority) {
            return Err(DispatchError::InvalidPriority(priority));
        }

        let name = name.into();
        log::debug!(
            target: "kdispatch",
            "{name}: created ({max_concurrency} lanes, {qos:?}, priority {priority})"
        );
        Ok(Self {
            shared: Arc::new(QueueShared {
                name,
                max_concurrency,
                qos,
                priority,
                pool: pool.clone(),
                state: Mutex::new(QueueState::new(max_concurrency, config)),
                work_available: Condvar::new(),
                lanes_changed: Condvar::new(),
            }),
        })
    }

    // ── Submission ──────────────────────────────────────────────

    /// Queue-owned submission: the queue allocates (or recycles) the item.
    fn submit_closure(
        &self,
        closure: Closure,
        item_type: ItemType,
        deadline: Timestamp,
        completion: Option<Weak<CompletionSignaler>>,
    ) -> Result<(), DispatchError> {
        let mut state = self.shared.state.lock();
        if state.terminating {
            return Err(DispatchError::Terminated);
        }
        let item = state.acquire_item(closure, item_type, deadline)?;
        item.mark_dispatched();
        if let Some(completion) = completion {
            item.attach_completion(completion);
        }

        let (pending, lane) = state.enqueue(item, item_type != ItemType::Immediate)?;
        self.shared.work_available.notify_one();
        drop(state);

        self.shared.staff(lane, pending)
    }

    /// Caller-owned submission: the item is claimed before the lock is
    /// taken and handed back on failure.
    fn submit_item(
        &self,
        item: &ItemRef,
        completion: Option<Weak<CompletionSignaler>>,
    ) -> Result<(), DispatchError> {
        item.mark_dispatched();
        if let Some(completion) = completion {
            item.attach_completion(completion);
        }

        let timed = item.item_type() != ItemType::Immediate;
        let mut state = self.shared.state.lock();
        let (pending, lane) = state.enqueue(Arc::clone(item), timed)?;
        self.shared.work_available.notify_one();
        drop(state);

        self.shared.staff(lane, pending)
    }

    /// Run `f` on the queue and return right away.
    pub fn dispatch_async<F>(&self, f: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_closure(
            Closure::Once(Box::new(f)),
            ItemType::Immediate,
            Timestamp::ZERO,
            None,
        )
    }

    /// Run `f` on the queue and wait until it has finished.
    ///
    /// Calling this on a serial queue from that queue's own worker
    /// deadlocks: the only worker is the one waiting.
    pub fn dispatch_sync<F>(&self, f: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.warn_if_self_sync();
        let done = CompletionSignaler::new();
        self.submit_closure(
            Closure::Once(Box::new(f)),
            ItemType::Immediate,
            Timestamp::ZERO,
            Some(Arc::downgrade(&done)),
        )?;
        done.wait();
        Ok(())
    }

    /// Submit a caller-owned work item. Submitting an item whose previous
    /// submission has not finished is fatal.
    pub fn dispatch_work_item_async(&self, item: &WorkItem) -> Result<(), DispatchError> {
        self.submit_item(item.core(), None)
    }

    /// Submit a caller-owned work item and wait until it has run.
    pub fn dispatch_work_item_sync(&self, item: &WorkItem) -> Result<(), DispatchError> {
        self.warn_if_self_sync();
        let done = CompletionSignaler::new();
        self.submit_item(item.core(), Some(Arc::downgrade(&done)))?;
        done.wait();
        Ok(())
    }

    /// Schedule a caller-owned timer.
    pub fn dispatch_timer(&self, timer: &Timer) -> Result<(), DispatchError> {
        self.submit_item(timer.core(), None)
    }

    /// Run `f` once at `deadline`.
    pub fn dispatch_async_after<F>(&self, deadline: Timestamp, f: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_closure(
            Closure::Once(Box::new(f)),
            ItemType::OneShotTimer,
            deadline,
            None,
        )
    }

    /// Cancel `timer`. If it is still waiting in this queue it is taken out
    /// and never fires; returns whether that happened. A tick that is
    /// already running finishes, and a repeating timer is not rearmed.
    pub fn remove_timer(&self, timer: &Timer) -> bool {
        let core = timer.core();
        core.cancel();

        let mut state = self.shared.state.lock();
        let link = state
            .timers
            .iter()
            .find(|(_, pending)| Arc::ptr_eq(*pending, core))
            .map(|(link, _)| link);
        match link.and_then(|link| state.timers.remove(link)) {
            Some(timer) => {
                state.finish(timer);
                // Workers sleeping until this timer's deadline pick a new one.
                self.shared.work_available.notify_all();
                true
            }
            None => false,
        }
    }

    // ── Teardown ────────────────────────────────────────────────

    /// Stop the queue.
    ///
    /// New submissions fail with `Terminated`. Pending timers are cancelled
    /// and handed back without running; immediate items already queued
    /// still run. Blocks until every worker has retired.
    pub fn shutdown(&self) -> Result<(), DispatchError> {
        let me = VirtualProcessor::current().map(|vp| vp.id());
        let mut state = self.shared.state.lock();
        if me.is_some_and(|id| state.lane_of(id).is_some()) {
            return Err(DispatchError::ShutdownFromWorker);
        }

        if !state.terminating {
            state.terminating = true;
            log::info!(target: "kdispatch", "{}: shutting down", self.shared.name);
        }
        let timers: Vec<ItemRef> = state.timers.drain().collect();
        for timer in timers {
            timer.cancel();
            state.finish(timer);
        }
        self.shared.work_available.notify_all();

        while !state.all_lanes_vacant() {
            self.shared.lanes_changed.wait(&mut state);
        }
        Ok(())
    }

    fn warn_if_self_sync(&self) {
        if self.shared.max_concurrency != 1 {
            return;
        }
        let Some(vp) = VirtualProcessor::current() else {
            return;
        };
        if self.shared.state.lock().lane_of(vp.id()).is_some() {
            log::warn!(
                target: "kdispatch",
                "{}: synchronous dispatch from the queue's only worker will deadlock",
                self.shared.name
            );
        }
    }

    // ── Observability ───────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn max_concurrency(&self) -> usize {
        self.shared.max_concurrency
    }

    /// Lanes currently staffed by a worker.
    pub fn available_concurrency(&self) -> usize {
        self.shared.state.lock().available_concurrency
    }

    pub fn qos(&self) -> Qos {
        self.shared.qos
    }

    pub fn priority(&self) -> i8 {
        self.shared.priority
    }

    pub fn pending_items(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    pub fn pending_timers(&self) -> usize {
        self.shared.state.lock().timers.len()
    }

    pub fn cached_items(&self) -> usize {
        self.shared.state.lock().item_cache.len()
    }

    pub fn cached_timers(&self) -> usize {
        self.shared.state.lock().timer_cache.len()
    }

    pub fn is_terminating(&self) -> bool {
        self.shared.state.lock().terminating
    }
}

impl core::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("name", &self.shared.name)
            .field("max_concurrency", &self.shared.max_concurrency)
            .field("qos", &self.shared.qos)
            .field("priority", &self.shared.priority)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(config: QueueConfig) -> QueueState {
        QueueState::new(1, config)
    }

    fn noop() -> Closure {
        Closure::Once(Box::new(|| {}))
    }

    #[test]
    fn item_cache_keeps_at_most_eight() {
        let mut state = state_with(QueueConfig::default());
        let items: Vec<ItemRef> = (0..9)
            .map(|_| {
                state
                    .acquire_item(noop(), ItemType::Immediate, Timestamp::ZERO)
                    .expect("allocate")
            })
            .collect();
        assert_eq!(state.allocated, 9);

        for item in items {
            item.mark_dispatched();
            state.relinquish_item(item);
        }
        assert_eq!(state.item_cache.len(), 8);
        assert_eq!(state.allocated, 8);

        let reused = state
            .acquire_item(noop(), ItemType::Immediate, Timestamp::ZERO)
            .expect("reuse");
        assert!(!reused.is_being_dispatched());
        assert_eq!(state.item_cache.len(), 7);
        assert_eq!(state.allocated, 8);
    }

    #[test]
    fn timers_use_their_own_cache() {
        let mut state = state_with(QueueConfig::default());
        let timer = state
            .acquire_item(noop(), ItemType::OneShotTimer, Timestamp::ZERO)
            .expect("allocate");
        state.relinquish_item(timer);

        assert_eq!(state.timer_cache.len(), 1);
        assert!(state.item_cache.is_empty());
    }

    #[test]
    fn allocation_limit_refuses_once_the_cache_is_empty() {
        let mut state = state_with(QueueConfig {
            allocation_limit: Some(2),
            ..QueueConfig::default()
        });
        let first = state
            .acquire_item(noop(), ItemType::Immediate, Timestamp::ZERO)
            .expect("first");
        let _second = state
            .acquire_item(noop(), ItemType::Immediate, Timestamp::ZERO)
            .expect("second");
        assert!(matches!(
            state.acquire_item(noop(), ItemType::Immediate, Timestamp::ZERO),
            Err(DispatchError::OutOfMemory)
        ));

        state.relinquish_item(first);
        assert!(state
            .acquire_item(noop(), ItemType::Immediate, Timestamp::ZERO)
            .is_ok());
    }

    #[test]
    fn timers_sort_by_deadline_and_keep_ties_in_order() {
        let mut state = state_with(QueueConfig::default());
        let at = |ms: u64| Timestamp::from_duration(Duration::from_millis(ms));
        let mut submitted = Vec::new();
        for ms in [30, 10, 20, 10] {
            let timer = state
                .acquire_item(noop(), ItemType::OneShotTimer, at(ms))
                .expect("allocate");
            submitted.push(Arc::clone(&timer));
            state.insert_timer(timer);
        }

        let order: Vec<ItemRef> = state.timers.iter().map(|(_, t)| Arc::clone(t)).collect();
        assert!(Arc::ptr_eq(&order[0], &submitted[1]));
        assert!(Arc::ptr_eq(&order[1], &submitted[3]));
        assert!(Arc::ptr_eq(&order[2], &submitted[2]));
        assert!(Arc::ptr_eq(&order[3], &submitted[0]));
    }

    #[test]
    fn terminating_queue_hands_caller_items_back() {
        let mut state = state_with(QueueConfig::default());
        state.terminating = true;

        let item = WorkItem::new(|| {});
        item.core().mark_dispatched();
        assert!(matches!(
            state.enqueue(Arc::clone(item.core()), false),
            Err(DispatchError::Terminated)
        ));
        assert!(!item.is_being_dispatched());
    }

    #[test]
    fn only_vacant_lanes_are_reserved() {
        let mut state = QueueState::new(2, QueueConfig::default());
        assert_eq!(state.reserve_lane(), Some(0));
        assert_eq!(state.reserve_lane(), Some(1));
        assert_eq!(state.reserve_lane(), None);
        assert!(!state.all_lanes_vacant());
    }

    #[test]
    fn retracted_submission_is_no_longer_queued() {
        let mut state = state_with(QueueConfig::default());
        let item = state
            .acquire_item(noop(), ItemType::Immediate, Timestamp::ZERO)
            .expect("allocate");
        let (pending, lane) = state.enqueue(item, false).expect("enqueue");
        assert_eq!(lane, Some(0));
        assert!(state.is_queued(pending));

        let item = state.retract(pending).expect("still queued");
        assert!(!state.is_queued(pending));
        assert!(state.retract(pending).is_none());
        state.finish(item);
        assert_eq!(state.item_cache.len(), 1);
    }

    #[test]
    fn arguments_are_validated() {
        let pool = VirtualProcessorPool::new();
        assert!(matches!(
            DispatchQueue::create(&pool, 0, Qos::Utility, 0),
            Err(DispatchError::InvalidConcurrency(0))
        ));
        assert!(matches!(
            DispatchQueue::create(&pool, MAX_CONCURRENCY + 1, Qos::Utility, 0),
            Err(DispatchError::InvalidConcurrency(_))
        ));
        assert!(matches!(
            DispatchQueue::create(&pool, 1, Qos::Utility, DISPATCH_PRIORITY_HIGHEST + 1),
            Err(DispatchError::InvalidPriority(_))
        ));
        assert!(matches!(
            DispatchQueue::create(&pool, 1, Qos::Utility, DISPATCH_PRIORITY_LOWEST - 1),
            Err(DispatchError::InvalidPriority(_))
        ));
    }
}
