// =============================================================================
// kdispatch — Fatal Failure Path
// =============================================================================
//
// Some conditions are not errors, they are broken contracts: submitting a
// work item that is already in flight, a closure unwinding out of a worker,
// a worker that cannot find its own lane. None of them has a caller that
// could handle a `Result`, so they all end here.
//
// PHILOSOPHY:
//   A failure is FATAL. We report it at error level, let the installed
//   abort hook see it, and abort the process. The hook exists so a test
//   harness can turn a failure into a panic it can observe; the default
//   hook does nothing and the abort follows.
//
// WHAT WE RECORD:
//   `has_failed()` latches true on the first failure, so boot code and
//   tests can check after the fact whether the subsystem ever died.
// =============================================================================

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

/// The reasons the dispatch subsystem gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FatalError {
    /// A work item was submitted while a previous submission of it was
    /// still queued or running.
    #[error("work item is already being dispatched")]
    DoubleDispatch,
    /// A closure panicked on a virtual processor.
    #[error("closure panicked on a virtual processor")]
    ClosurePanicked,
    /// A dispatch worker retired without owning a lane of its queue.
    #[error("dispatch worker does not own a lane of its queue")]
    WorkerLost,
}

/// Called with the failure reason before the process aborts. A hook that
/// does not return (for example, one that panics) prevents the abort.
pub type AbortHook = fn(&FatalError);

fn default_hook(_: &FatalError) {}

static ABORT_HOOK: Mutex<AbortHook> = Mutex::new(default_hook);
static HAS_FAILED: AtomicBool = AtomicBool::new(false);

/// Install `hook`, returning the one it replaces.
pub fn set_abort_hook(hook: AbortHook) -> AbortHook {
    core::mem::replace(&mut *ABORT_HOOK.lock(), hook)
}

/// Whether `fatal` has been reached since boot.
pub fn has_failed() -> bool {
    HAS_FAILED.load(Ordering::Acquire)
}

/// Report `reason` and stop.
#[inline(never)]
pub fn fatal(reason: FatalError) -> ! {
    HAS_FAILED.store(true, Ordering::Release);
    log::error!(target: "kdispatch", "FATAL: {reason}");

    // Copy the hook out so a hook that panics never poisons the slot.
    let hook = *ABORT_HOOK.lock();
    hook(&reason);

    std::process::abort()
}

/// Run `f` with a hook that turns failures into panics. The hook is global,
/// so callers take turns.
#[cfg(test)]
pub(crate) fn with_panicking_hook<R>(f: impl FnOnce() -> R) -> R {
    use std::panic::{self, AssertUnwindSafe};

    static SERIAL: Mutex<()> = Mutex::new(());

    fn panicking_hook(reason: &FatalError) {
        panic!("fatal: {reason}");
    }

    let _serial = SERIAL.lock();
    let previous = set_abort_hook(panicking_hook);
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    set_abort_hook(previous);
    result.unwrap_or_else(|payload| panic::resume_unwind(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_sees_the_reason_before_abort() {
        let caught =
            with_panicking_hook(|| std::panic::catch_unwind(|| fatal(FatalError::WorkerLost)));

        let payload = caught.expect_err("fatal must not return");
        let message = payload
            .downcast_ref::<String>()
            .cloned()
            .unwrap_or_default();
        assert!(message.contains("does not own a lane"));
        assert!(has_failed());
    }
}
