//! Virtual processors: the kernel's execution contexts.
//!
//! A virtual processor (VP) is one thread of execution with its own stack
//! and a scheduler priority. It runs one entry closure at a time. Between
//! entries it is *suspended*: parked on its own condition variable until
//! someone hands it a new entry and resumes it. A VP that is *finalized*
//! leaves its run loop and its thread ends.
//!
//! Lifecycle:
//!
//! ```text
//!   create ──► SUSPENDED|PARKED ──resume──► running entry
//!                    ▲                          │
//!                    └──────── suspend ◄────────┤
//!                                               └── finalize ──► gone
//! ```
//!
//! An entry that returns without suspending its VP finalizes it.

use core::sync::atomic::{AtomicU64, Ordering};
use std::cell::RefCell;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};

use crate::config::{
    VP_DEFAULT_KERNEL_STACK_SIZE, VP_DEFAULT_USER_STACK_SIZE, VP_MIN_KERNEL_STACK_SIZE,
    VP_PRIORITY_NORMAL,
};
use crate::util::fail::{fatal, FatalError};
use crate::util::list::Link;

// ── Identifiers ─────────────────────────────────────────────────

/// Monotonically increasing VP id counter.
static NEXT_VP_ID: AtomicU64 = AtomicU64::new(1);

fn alloc_vp_id() -> u64 {
    NEXT_VP_ID.fetch_add(1, Ordering::Relaxed)
}

thread_local! {
    static CURRENT: RefCell<Option<Weak<VirtualProcessor>>> = const { RefCell::new(None) };
}

// ── State ───────────────────────────────────────────────────────

bitflags! {
    /// Scheduling state of a virtual processor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VpFlags: u8 {
        /// The current entry runs in user mode.
        const USER      = 1 << 0;
        /// The VP must not run; it parks as soon as its entry returns.
        const SUSPENDED = 1 << 1;
        /// The VP's thread is actually sleeping in its park loop.
        const PARKED    = 1 << 2;
        /// The VP's thread leaves its run loop and ends.
        const FINALIZED = 1 << 3;
    }
}

/// Work handed to a virtual processor.
pub type VpEntry = Box<dyn FnOnce() + Send + 'static>;

pub type VirtualProcessorRef = Arc<VirtualProcessor>;

/// Configuration applied when a VP is created or reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VpParameters {
    pub kernel_stack_size: usize,
    pub user_stack_size: usize,
    pub priority: i32,
}

impl Default for VpParameters {
    fn default() -> Self {
        Self {
            kernel_stack_size: VP_DEFAULT_KERNEL_STACK_SIZE,
            user_stack_size: VP_DEFAULT_USER_STACK_SIZE,
            priority: VP_PRIORITY_NORMAL,
        }
    }
}

struct VpState {
    flags: VpFlags,
    entry: Option<VpEntry>,
    priority: i32,
    kernel_stack_size: usize,
    user_stack_size: usize,
}

// ── Virtual processor ───────────────────────────────────────────

pub struct VirtualProcessor {
    id: u64,
    state: Mutex<VpState>,
    wakeup: Condvar,
    /// Position in the owning pool's in-use or reuse list.
    pub(crate) pool_link: spin::Mutex<Option<Link>>,
    thread: spin::Mutex<Option<JoinHandle<()>>>,
}

impl VirtualProcessor {
    /// Create a suspended VP. Its thread starts right away and parks until
    /// the first `resume`.
    pub fn create(params: VpParameters) -> io::Result<VirtualProcessorRef> {
        let vp = Arc::new(VirtualProcessor {
            id: alloc_vp_id(),
            state: Mutex::new(VpState {
                flags: VpFlags::SUSPENDED,
                entry: None,
                priority: params.priority,
                kernel_stack_size: params.kernel_stack_size,
                user_stack_size: params.user_stack_size,
            }),
            wakeup: Condvar::new(),
            pool_link: spin::Mutex::new(None),
            thread: spin::Mutex::new(None),
        });

        let runner = Arc::clone(&vp);
        let handle = thread::Builder::new()
            .name(format!("vp{}", vp.id))
            .stack_size(params.kernel_stack_size.max(VP_MIN_KERNEL_STACK_SIZE))
            .spawn(move || runner.run())?;
        *vp.thread.lock() = Some(handle);

        log::trace!(target: "kdispatch", "vp{}: created (priority {})", vp.id, params.priority);
        Ok(vp)
    }

    /// The VP the calling thread runs on, if any.
    pub fn current() -> Option<VirtualProcessorRef> {
        CURRENT.with(|current| current.borrow().as_ref().and_then(Weak::upgrade))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn run(self: Arc<Self>) {
        CURRENT.with(|current| *current.borrow_mut() = Some(Arc::downgrade(&self)));

        'life: loop {
            let entry = {
                let mut state = self.state.lock();
                loop {
                    if state.flags.contains(VpFlags::FINALIZED) {
                        break 'life;
                    }
                    if !state.flags.contains(VpFlags::SUSPENDED) {
                        break;
                    }
                    state.flags.insert(VpFlags::PARKED);
                    self.wakeup.wait(&mut state);
                }
                state.flags.remove(VpFlags::PARKED);
                state.entry.take()
            };

            if let Some(entry) = entry {
                if panic::catch_unwind(AssertUnwindSafe(entry)).is_err() {
                    fatal(FatalError::ClosurePanicked);
                }
            }

            let mut state = self.state.lock();
            if !state.flags.contains(VpFlags::SUSPENDED) {
                state.flags.insert(VpFlags::FINALIZED);
            }
        }

        log::trace!(target: "kdispatch", "vp{}: finalized", self.id);
    }

    /// Let the VP run its entry.
    pub fn resume(&self) {
        let mut state = self.state.lock();
        state.flags.remove(VpFlags::SUSPENDED);
        self.wakeup.notify_all();
    }

    /// Stop the VP once its current entry returns.
    pub fn suspend(&self) {
        self.state.lock().flags.insert(VpFlags::SUSPENDED);
    }

    /// End the VP's thread once its current entry (if any) returns.
    pub fn schedule_finalization(&self) {
        let mut state = self.state.lock();
        state.flags.insert(VpFlags::FINALIZED);
        state.entry = None;
        self.wakeup.notify_all();
    }

    /// Suspended and actually parked, so it may be reconfigured and resumed.
    pub fn is_suspended(&self) -> bool {
        let flags = self.state.lock().flags;
        flags.contains(VpFlags::SUSPENDED | VpFlags::PARKED) && !flags.contains(VpFlags::FINALIZED)
    }

    pub fn is_finalized(&self) -> bool {
        self.state.lock().flags.contains(VpFlags::FINALIZED)
    }

    pub fn flags(&self) -> VpFlags {
        self.state.lock().flags
    }

    pub fn priority(&self) -> i32 {
        self.state.lock().priority
    }

    pub fn set_priority(&self, priority: i32) {
        self.state.lock().priority = priority;
    }

    /// Record the stack sizes the next entry runs with. A host thread keeps
    /// the stack it was created with, so only the bookkeeping changes.
    pub fn set_stack_sizes(&self, kernel_stack_size: usize, user_stack_size: usize) {
        let mut state = self.state.lock();
        state.kernel_stack_size = kernel_stack_size;
        state.user_stack_size = user_stack_size;
    }

    pub fn parameters(&self) -> VpParameters {
        let state = self.state.lock();
        VpParameters {
            kernel_stack_size: state.kernel_stack_size,
            user_stack_size: state.user_stack_size,
            priority: state.priority,
        }
    }

    /// Install the entry the VP runs after its next `resume`.
    pub fn set_entry(&self, entry: VpEntry, is_user: bool) {
        let mut state = self.state.lock();
        state.entry = Some(entry);
        state.flags.set(VpFlags::USER, is_user);
    }

    /// Wait for the VP's thread to end. Does nothing when called from the
    /// VP itself or when already joined.
    pub fn join(&self) {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::warn!(target: "kdispatch", "vp{}: thread ended in a panic", self.id);
            }
        }
    }
}

impl core::fmt::Debug for VirtualProcessor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VirtualProcessor")
            .field("id", &self.id)
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Semaphore;
    use crate::task::clock::Timestamp;
    use core::time::Duration;

    static CAPTURED: spin::Mutex<String> = spin::Mutex::new(String::new());

    fn capture_sink(args: core::fmt::Arguments<'_>) {
        use core::fmt::Write;

        let _ = CAPTURED.lock().write_fmt(args);
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Timestamp::after(Duration::from_secs(5));
        while Timestamp::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn new_vp_parks_until_resumed() {
        let vp = VirtualProcessor::create(VpParameters::default()).expect("create vp");
        assert!(wait_for(|| vp.is_suspended()));

        let ran = Arc::new(Semaphore::new(0));
        let signal = Arc::clone(&ran);
        vp.set_entry(Box::new(move || signal.release()), false);
        assert_eq!(ran.permits(), 0);

        vp.resume();
        assert!(ran.acquire_until(Timestamp::after(Duration::from_secs(5))));

        // The entry returned without suspending, so the VP finalizes.
        assert!(wait_for(|| vp.is_finalized()));
        vp.join();
    }

    #[test]
    fn suspended_entry_parks_again_and_can_be_reused() {
        let vp = VirtualProcessor::create(VpParameters::default()).expect("create vp");
        let ran = Arc::new(Semaphore::new(0));

        for _ in 0..2 {
            assert!(wait_for(|| vp.is_suspended()));
            let signal = Arc::clone(&ran);
            vp.set_entry(
                Box::new(move || {
                    let me = VirtualProcessor::current().expect("running on a vp");
                    me.suspend();
                    signal.release();
                }),
                false,
            );
            vp.resume();
            assert!(ran.acquire_until(Timestamp::after(Duration::from_secs(5))));
        }

        assert!(wait_for(|| vp.is_suspended()));
        vp.schedule_finalization();
        vp.join();
        assert!(vp.is_finalized());
    }

    #[test]
    fn entry_sees_its_own_vp_and_user_flag() {
        let vp = VirtualProcessor::create(VpParameters::default()).expect("create vp");
        let seen = Arc::new(spin::Mutex::new(None));
        let slot = Arc::clone(&seen);
        vp.set_entry(
            Box::new(move || *slot.lock() = VirtualProcessor::current().map(|vp| vp.id())),
            true,
        );
        assert!(vp.flags().contains(VpFlags::USER));

        vp.resume();
        vp.join();
        assert_eq!(*seen.lock(), Some(vp.id()));
        assert!(VirtualProcessor::current().is_none());
    }

    #[test]
    fn join_reports_a_thread_that_panicked() {
        // Another test may have installed the logger already.
        let _ = klog::init(capture_sink, klog::Level::Warn);
        klog::set_sink(capture_sink);

        fn failing_entry() {
            panic!("closure failed");
        }

        let vp = VirtualProcessor::create(VpParameters::default()).expect("create vp");
        crate::util::fail::with_panicking_hook(|| {
            vp.set_entry(Box::new(failing_entry), false);
            vp.resume();
            vp.join();
        });

        let expected = format!("vp{}: thread ended in a panic", vp.id());
        assert!(CAPTURED.lock().contains(&expected));
    }
}
