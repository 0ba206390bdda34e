//! Work items and timers.
//!
//! A work item is a closure plus the bookkeeping a dispatch queue needs to
//! run it exactly once per submission. A timer is a work item with a
//! deadline and, if it repeats, an interval.
//!
//! Items are owned by exactly one party at a time:
//!   - the caller, for items built with [`WorkItem::new`] / [`Timer::new`];
//!     the queue borrows them while they are in flight and hands them back;
//!   - the queue, for items it creates itself in `dispatch_async` and
//!     friends; those are recycled through the queue's caches.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use core::time::Duration;
use std::sync::{Arc, Weak};

use spin::Mutex;

use crate::sync::CompletionSignaler;
use crate::task::clock::{self, Timestamp};
use crate::util::fail::{fatal, FatalError};

// ── Types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Immediate,
    OneShotTimer,
    RepeatingTimer,
}

pub(crate) enum Closure {
    /// Queue-owned submissions: runs once, then the item is recycled.
    Once(Box<dyn FnOnce() + Send + 'static>),
    /// Caller-owned items and timers: may run again on the next
    /// submission or the next tick.
    Repeat(Box<dyn FnMut() + Send + 'static>),
}

struct ItemBody {
    closure: Option<Closure>,
    completion: Option<Weak<CompletionSignaler>>,
}

pub(crate) type ItemRef = Arc<ItemCore>;

/// State shared between an item's handle and the queue running it.
pub(crate) struct ItemCore {
    item_type: ItemType,
    interval: Duration,
    owned_by_queue: bool,
    body: Mutex<ItemBody>,
    /// Nanoseconds since boot. Only meaningful for timers.
    deadline: AtomicU64,
    is_being_dispatched: AtomicBool,
    cancelled: AtomicBool,
}

impl ItemCore {
    pub(crate) fn new(
        closure: Closure,
        item_type: ItemType,
        deadline: Timestamp,
        interval: Duration,
        owned_by_queue: bool,
    ) -> Self {
        Self {
            item_type,
            interval,
            owned_by_queue,
            body: Mutex::new(ItemBody {
                closure: Some(closure),
                completion: None,
            }),
            deadline: AtomicU64::new(deadline.as_nanos()),
            is_being_dispatched: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Reload a recycled item with a new closure.
    pub(crate) fn init(&self, closure: Closure, deadline: Timestamp) {
        self.body.lock().closure = Some(closure);
        self.set_deadline(deadline);
        self.cancelled.store(false, Ordering::Release);
    }

    /// Drop everything the last submission left behind so the item can sit
    /// in a cache.
    pub(crate) fn deinit(&self) {
        {
            let mut body = self.body.lock();
            body.closure = None;
            body.completion = None;
        }
        self.cancelled.store(false, Ordering::Release);
        self.is_being_dispatched.store(false, Ordering::Release);
    }

    pub(crate) fn item_type(&self) -> ItemType {
        self.item_type
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    pub(crate) fn owned_by_queue(&self) -> bool {
        self.owned_by_queue
    }

    /// Claim the item for one submission. A second claim before the first
    /// one finished is a broken contract.
    pub(crate) fn mark_dispatched(&self) {
        if self.is_being_dispatched.swap(true, Ordering::AcqRel) {
            fatal(FatalError::DoubleDispatch);
        }
    }

    pub(crate) fn clear_dispatched(&self) {
        self.is_being_dispatched.store(false, Ordering::Release);
    }

    pub(crate) fn is_being_dispatched(&self) -> bool {
        self.is_being_dispatched.load(Ordering::Acquire)
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn set_cancelled(&self, cancelled: bool) {
        self.cancelled.store(cancelled, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn deadline(&self) -> Timestamp {
        Timestamp::from_nanos(self.deadline.load(Ordering::Acquire))
    }

    pub(crate) fn set_deadline(&self, deadline: Timestamp) {
        self.deadline.store(deadline.as_nanos(), Ordering::Release);
    }

    /// Move a repeating timer's deadline to its next tick after `now`.
    pub(crate) fn rearm(&self, now: Timestamp) {
        self.set_deadline(clock::advance_past(self.deadline(), self.interval, now));
    }

    pub(crate) fn attach_completion(&self, completion: Weak<CompletionSignaler>) {
        self.body.lock().completion = Some(completion);
    }

    pub(crate) fn take_completion(&self) -> Option<Weak<CompletionSignaler>> {
        self.body.lock().completion.take()
    }

    /// Run the closure. The body lock is not held while it runs.
    pub(crate) fn invoke(&self) {
        let closure = self.body.lock().closure.take();
        match closure {
            Some(Closure::Once(f)) => f(),
            Some(Closure::Repeat(mut f)) => {
                f();
                self.body.lock().closure = Some(Closure::Repeat(f));
            }
            None => {}
        }
    }
}

impl fmt::Debug for ItemCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemCore")
            .field("type", &self.item_type)
            .field("owned_by_queue", &self.owned_by_queue)
            .field("deadline", &self.deadline())
            .field("interval", &self.interval)
            .field("dispatched", &self.is_being_dispatched())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ── Public handles ──────────────────────────────────────────────

/// A caller-owned unit of work that can be submitted again once its
/// previous submission has finished.
#[derive(Clone)]
pub struct WorkItem {
    core: ItemRef,
}

impl WorkItem {
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self {
            core: Arc::new(ItemCore::new(
                Closure::Repeat(Box::new(f)),
                ItemType::Immediate,
                Timestamp::ZERO,
                Duration::ZERO,
                false,
            )),
        }
    }

    /// Ask the item not to run again. Never interrupts a running closure.
    pub fn cancel(&self) {
        self.core.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    /// Set or clear the cancelled flag, e.g. to reuse a cancelled item.
    pub fn set_cancelled(&self, cancelled: bool) {
        self.core.set_cancelled(cancelled);
    }

    /// Whether a submission of this item is queued or running.
    pub fn is_being_dispatched(&self) -> bool {
        self.core.is_being_dispatched()
    }

    pub(crate) fn core(&self) -> &ItemRef {
        &self.core
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("dispatched", &self.is_being_dispatched())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A caller-owned work item that runs at `deadline` and then every
/// `interval`, if the interval is non-zero.
#[derive(Clone)]
pub struct Timer {
    core: ItemRef,
}

impl Timer {
    pub fn new<F>(deadline: Timestamp, interval: Duration, f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let item_type = if interval.is_zero() {
            ItemType::OneShotTimer
        } else {
            ItemType::RepeatingTimer
        };
        Self {
            core: Arc::new(ItemCore::new(
                Closure::Repeat(Box::new(f)),
                item_type,
                deadline,
                interval,
                false,
            )),
        }
    }

    /// When the timer fires next.
    pub fn deadline(&self) -> Timestamp {
        self.core.deadline()
    }

    pub fn interval(&self) -> Duration {
        self.core.interval()
    }

    pub fn is_repeating(&self) -> bool {
        self.core.item_type() == ItemType::RepeatingTimer
    }

    /// Stop the timer from firing again. A tick that is already running
    /// completes; a repeating timer is not rearmed afterwards.
    pub fn cancel(&self) {
        self.core.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    pub fn set_cancelled(&self, cancelled: bool) {
        self.core.set_cancelled(cancelled);
    }

    pub fn is_being_dispatched(&self) -> bool {
        self.core.is_being_dispatched()
    }

    pub(crate) fn core(&self) -> &ItemRef {
        &self.core
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("deadline", &self.deadline())
            .field("interval", &self.interval())
            .field("dispatched", &self.is_being_dispatched())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    #[test]
    fn timer_type_follows_the_interval() {
        let one_shot = Timer::new(Timestamp::ZERO, Duration::ZERO, || {});
        let repeating = Timer::new(Timestamp::ZERO, Duration::from_millis(10), || {});
        assert!(!one_shot.is_repeating());
        assert_eq!(one_shot.core().item_type(), ItemType::OneShotTimer);
        assert!(repeating.is_repeating());
        assert_eq!(repeating.interval(), Duration::from_millis(10));
    }

    #[test]
    fn repeat_closures_survive_invocation() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let item = WorkItem::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        item.core().invoke();
        item.core().invoke();
        assert_eq!(runs.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn once_closures_run_only_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let core = ItemCore::new(
            Closure::Once(Box::new(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            })),
            ItemType::Immediate,
            Timestamp::ZERO,
            Duration::ZERO,
            true,
        );

        core.invoke();
        core.invoke();
        assert_eq!(runs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn cancellation_can_be_reset() {
        let item = WorkItem::new(|| {});
        item.cancel();
        assert!(item.is_cancelled());
        item.set_cancelled(false);
        assert!(!item.is_cancelled());
    }

    #[test]
    fn deinit_clears_the_submission_state() {
        let core = ItemCore::new(
            Closure::Once(Box::new(|| {})),
            ItemType::Immediate,
            Timestamp::ZERO,
            Duration::ZERO,
            true,
        );
        let done = CompletionSignaler::new();
        core.mark_dispatched();
        core.attach_completion(Arc::downgrade(&done));
        core.cancel();

        core.deinit();
        assert!(!core.is_being_dispatched());
        assert!(!core.is_cancelled());
        assert!(core.take_completion().is_none());
    }

    #[test]
    fn rearm_skips_missed_ticks() {
        let timer = Timer::new(
            Timestamp::from_duration(Duration::from_millis(100)),
            Duration::from_millis(100),
            || {},
        );
        timer
            .core()
            .rearm(Timestamp::from_duration(Duration::from_millis(350)));
        assert_eq!(
            timer.deadline(),
            Timestamp::from_duration(Duration::from_millis(400))
        );
    }
}
