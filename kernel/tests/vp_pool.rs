//! Virtual processor pool: reuse, reconfiguration and finalization.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kdispatch::config::REUSE_CACHE_CAPACITY;
use kdispatch::task::{VirtualProcessorRef, VpParameters};
use kdispatch::{Semaphore, Timestamp, VirtualProcessor, VirtualProcessorPool};

const PATIENCE: Duration = Duration::from_secs(5);

fn settle(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Timestamp::after(PATIENCE);
    while Timestamp::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Acquire a VP whose entry waits on `gate` and then gives the VP back.
fn start(
    pool: &VirtualProcessorPool,
    params: VpParameters,
    gate: &Arc<Semaphore>,
) -> VirtualProcessorRef {
    let owner = pool.clone();
    let wait = Arc::clone(gate);
    let vp = pool
        .acquire(
            params,
            Box::new(move || {
                wait.acquire();
                if let Some(me) = VirtualProcessor::current() {
                    owner.relinquish(&me);
                }
            }),
            false,
        )
        .expect("acquire");
    vp.resume();
    vp
}

#[test]
fn acquired_vp_waits_for_resume() {
    let pool = VirtualProcessorPool::new();
    let ran = Arc::new(Semaphore::new(0));
    let signal = Arc::clone(&ran);
    let owner = pool.clone();

    let vp = pool
        .acquire(
            VpParameters::default(),
            Box::new(move || {
                signal.release();
                if let Some(me) = VirtualProcessor::current() {
                    owner.relinquish(&me);
                }
            }),
            false,
        )
        .expect("acquire");
    assert_eq!(pool.in_use_count(), 1);

    thread::sleep(Duration::from_millis(20));
    assert_eq!(ran.permits(), 0);

    vp.resume();
    assert!(ran.acquire_until(Timestamp::after(PATIENCE)));
    assert!(settle(|| vp.is_suspended()));
    assert_eq!(pool.in_use_count(), 0);
    assert_eq!(pool.reuse_count(), 1);
    pool.shutdown();
}

#[test]
fn reuse_reapplies_the_configuration() {
    let pool = VirtualProcessorPool::new();
    let gate = Arc::new(Semaphore::new(1));

    let low = VpParameters {
        priority: 10,
        ..VpParameters::default()
    };
    let first = start(&pool, low, &gate);
    assert!(settle(|| first.is_suspended() && pool.reuse_count() == 1));
    assert_eq!(first.priority(), 10);

    let high = VpParameters {
        priority: 40,
        kernel_stack_size: 512 * 1024,
        ..VpParameters::default()
    };
    gate.release();
    let second = start(&pool, high, &gate);
    assert_eq!(second.id(), first.id());
    assert_eq!(second.parameters(), high);

    assert!(settle(|| second.is_suspended()));
    pool.shutdown();
}

#[test]
fn surplus_vps_are_finalized() {
    let pool = VirtualProcessorPool::new();
    let gate = Arc::new(Semaphore::new(0));
    let count = REUSE_CACHE_CAPACITY + 1;

    let vps: Vec<VirtualProcessorRef> = (0..count)
        .map(|_| start(&pool, VpParameters::default(), &gate))
        .collect();
    assert_eq!(pool.in_use_count(), count);

    for _ in 0..count {
        gate.release();
    }
    assert!(settle(|| pool.in_use_count() == 0));
    assert_eq!(pool.reuse_count(), REUSE_CACHE_CAPACITY);

    assert!(settle(|| {
        let parked = vps.iter().filter(|vp| vp.is_suspended()).count();
        let gone = vps.iter().filter(|vp| vp.is_finalized()).count();
        parked == REUSE_CACHE_CAPACITY && gone == 1
    }));

    pool.shutdown();
    assert_eq!(pool.reuse_count(), 0);
    assert!(vps.iter().all(|vp| vp.is_finalized()));
}

#[test]
fn vp_relinquished_after_shutdown_is_finalized() {
    let pool = VirtualProcessorPool::new();
    let gate = Arc::new(Semaphore::new(0));
    let vp = start(&pool, VpParameters::default(), &gate);

    pool.shutdown();
    gate.release();

    assert!(settle(|| vp.is_finalized()));
    vp.join();
    assert_eq!(pool.in_use_count(), 0);
    assert_eq!(pool.reuse_count(), 0);
}
