// =============================================================================
// kdispatch — dispatchd
// =============================================================================
//
// Brings the dispatch subsystem up the way the kernel does at boot, pushes
// a few workloads through it, and takes it down again.
//
// WHAT WE DO HERE:
//   Phase 1: "Can Speak"  → Install klog as the log backend
//   Phase 2: "Can Work"   → Create the VP pool and the system queues
//   Phase 3: "Alive"      → Run the workloads:
//                             - a chain of async steps on the main queue
//                             - a repeating timer stopped after ten ticks
//                             - a synchronous round trip on utility
//   Phase 4: "Goodnight"  → Tear the queues down, then the pool
// =============================================================================

use core::sync::atomic::{AtomicU32, Ordering};
use core::time::Duration;
use std::sync::Arc;

use kdispatch::{
    DispatchError, DispatchQueue, Semaphore, SystemQueues, Timer, Timestamp,
    VirtualProcessorPool,
};

/// How many steps the main-queue chain takes.
const CHAIN_STEPS: u32 = 5;

/// How many ticks the repeating timer runs for.
const TIMER_TICKS: u32 = 10;

const TIMER_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> Result<(), DispatchError> {
    // =========================================================================
    // PHASE 1: "Can Speak"
    // =========================================================================
    if let Err(err) = klog::init(klog::stderr_sink, klog::Level::Info) {
        klog::println!("klog: {err}");
    }

    klog::println!();
    klog::println!("==========================================================");
    klog::println!("  kdispatch v{}", env!("CARGO_PKG_VERSION"));
    klog::println!("  Dispatch queues over an elastic virtual processor pool");
    klog::println!("==========================================================");
    klog::println!();

    // =========================================================================
    // PHASE 2: "Can Work"
    // =========================================================================
    let pool = VirtualProcessorPool::new();
    let queues = SystemQueues::create(&pool)?;
    for (kind, queue) in queues.iter() {
        klog::info!(
            "[init] {:<10} {:?}: {} lane(s), {:?}, priority {}",
            queue.name(),
            kind,
            queue.max_concurrency(),
            queue.qos(),
            queue.priority()
        );
    }

    // =========================================================================
    // PHASE 3: "Alive"
    // =========================================================================
    run_chain(queues.main())?;
    run_ticker(queues.utility())?;
    run_round_trip(queues.utility())?;

    // =========================================================================
    // PHASE 4: "Goodnight"
    // =========================================================================
    queues.teardown()?;
    klog::info!(
        "[exit] vp pool: {} in use, {} parked",
        pool.in_use_count(),
        pool.reuse_count()
    );
    pool.shutdown();
    klog::info!("[exit] done");
    Ok(())
}

/// Each step logs and submits the next one, so the steps run strictly in
/// order on the serial main queue.
fn chain_step(queue: DispatchQueue, step: u32, done: Arc<Semaphore>) {
    klog::info!("[chain] step {step} on '{}'", queue.name());
    if step == CHAIN_STEPS {
        done.release();
        return;
    }
    let next = queue.clone();
    if let Err(err) = queue.dispatch_async(move || chain_step(next, step + 1, done)) {
        klog::error!("[chain] step {} not submitted: {err}", step + 1);
    }
}

fn run_chain(queue: &DispatchQueue) -> Result<(), DispatchError> {
    let done = Arc::new(Semaphore::new(0));
    let first = queue.clone();
    let signal = Arc::clone(&done);
    queue.dispatch_async(move || chain_step(first, 1, signal))?;
    done.acquire();
    Ok(())
}

fn run_ticker(queue: &DispatchQueue) -> Result<(), DispatchError> {
    let ticks = Arc::new(AtomicU32::new(0));
    let finished = Arc::new(Semaphore::new(0));

    let counter = Arc::clone(&ticks);
    let signal = Arc::clone(&finished);
    let timer = Timer::new(Timestamp::after(TIMER_INTERVAL), TIMER_INTERVAL, move || {
        let tick = counter.fetch_add(1, Ordering::Relaxed) + 1;
        klog::info!("[timer] tick {tick}");
        if tick == TIMER_TICKS {
            signal.release();
        }
    });

    queue.dispatch_timer(&timer)?;
    finished.acquire();
    queue.remove_timer(&timer);
    klog::info!(
        "[timer] stopped after {} ticks",
        ticks.load(Ordering::Relaxed)
    );
    Ok(())
}

fn run_round_trip(queue: &DispatchQueue) -> Result<(), DispatchError> {
    let answer = Arc::new(AtomicU32::new(0));
    let slot = Arc::clone(&answer);
    queue.dispatch_sync(move || slot.store(6 * 7, Ordering::Relaxed))?;
    klog::info!(
        "[sync] '{}' answered {}",
        queue.name(),
        answer.load(Ordering::Relaxed)
    );
    Ok(())
}
