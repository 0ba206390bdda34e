//! Recoverable errors of the dispatch subsystem.
//!
//! Broken contracts are not errors; they go through `util::fail`.

use std::io;

use thiserror::Error;

use crate::config::{DISPATCH_PRIORITY_HIGHEST, DISPATCH_PRIORITY_LOWEST, MAX_CONCURRENCY};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("max concurrency {0} is outside 1..={max}", max = MAX_CONCURRENCY)]
    InvalidConcurrency(usize),

    #[error(
        "priority {0} is outside {low}..={high}",
        low = DISPATCH_PRIORITY_LOWEST,
        high = DISPATCH_PRIORITY_HIGHEST
    )]
    InvalidPriority(i8),

    #[error("out of memory for work items")]
    OutOfMemory,

    #[error("dispatch queue is shutting down")]
    Terminated,

    #[error("no worker available: {0}")]
    WorkerUnavailable(#[from] PoolError),

    #[error("a dispatch queue cannot be shut down from one of its own workers")]
    ShutdownFromWorker,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to spawn a virtual processor: {0}")]
    Spawn(#[from] io::Error),
}
