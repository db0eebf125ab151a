//! Background maintenance and connection creation threads.
//!
//! Each pool owns one maintenance thread that:
//!
//! - fails callback waiters whose deadline has passed
//! - closes idle connections that are stale, broken, idle or too old
//! - starts topping the pool up to `min_size` while it is ready
//!
//! The maintenance thread never calls the connection factory itself.
//! Creations for callback acquisitions and `min_size` top-ups each run on
//! their own short-lived thread, so a slow handshake cannot hold back
//! waiter deadlines or other creations.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::connection::ConnectionFactory;
use crate::error::PoolError;
use crate::pool::{AcquireCallback, PoolInner};
use crate::timeout::Timeout;

/// A creation run off the caller's thread, under a reservation already taken.
pub(crate) enum Job<F: ConnectionFactory> {
    /// Open a connection and hand it to `callback`.
    Open {
        generation: u64,
        timeout: Timeout,
        callback: AcquireCallback<F>,
    },
    /// Open connections until the pool holds `min_size`.
    TopUp { generation: u64 },
}

impl<F: ConnectionFactory> Job<F> {
    fn run(self, inner: &Arc<PoolInner<F>>) {
        match self {
            Self::Open {
                generation,
                timeout,
                callback,
            } => callback(inner.open_connection(generation, &timeout)),
            Self::TopUp { generation } => {
                top_up(inner, generation);
                inner.worker.end_top_up();
            }
        }
    }

    /// Fail the job without running it, releasing its reservation.
    fn fail(self, inner: &Arc<PoolInner<F>>, err: PoolError) {
        inner.release_reservation();
        match self {
            Self::Open { callback, .. } => callback(Err(err)),
            Self::TopUp { .. } => {
                tracing::warn!(
                    address = %inner.address,
                    error = %err,
                    "could not start background connection creation"
                );
                inner.worker.end_top_up();
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::TopUp { .. } => "fill",
        }
    }
}

/// Run `job` on a thread of its own.
pub(crate) fn start<F: ConnectionFactory>(inner: &Arc<PoolInner<F>>, job: Job<F>) {
    let name = format!("docdb-pool-{}-{}", job.kind(), inner.address);
    // Shared with the thread so the job can still be failed if the spawn is refused.
    let slot = Arc::new(Mutex::new(Some(job)));
    let spawned = {
        let inner = Arc::clone(inner);
        let slot = Arc::clone(&slot);
        thread::Builder::new().name(name).spawn(move || {
            if let Some(job) = slot.lock().take() {
                job.run(&inner);
            }
        })
    };
    if let Err(err) = spawned {
        if let Some(job) = slot.lock().take() {
            job.fail(inner, PoolError::Spawn(err));
        }
    }
}

struct WorkerState {
    notified: bool,
    shutdown: bool,
}

/// Mailbox shared between the pool and its maintenance thread.
pub(crate) struct WorkerSignal {
    state: Mutex<WorkerState>,
    wake: Condvar,
    topping_up: AtomicBool,
}

impl WorkerSignal {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(WorkerState {
                notified: false,
                shutdown: false,
            }),
            wake: Condvar::new(),
            topping_up: AtomicBool::new(false),
        }
    }

    /// Ask for a maintenance pass as soon as possible.
    ///
    /// Also used to have the thread recompute its wake-up time after a
    /// callback waiter was queued.
    pub(crate) fn notify(&self) {
        let mut state = self.state.lock();
        state.notified = true;
        self.wake.notify_one();
    }

    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.wake.notify_one();
    }

    /// Claim the single top-up slot. Returns `false` if one is running.
    fn begin_top_up(&self) -> bool {
        !self.topping_up.swap(true, Ordering::AcqRel)
    }

    fn end_top_up(&self) {
        self.topping_up.store(false, Ordering::Release);
    }
}

/// What woke the worker up.
enum Wake {
    Work { notified: bool },
    Shutdown,
}

pub(crate) fn spawn<F: ConnectionFactory>(inner: Arc<PoolInner<F>>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("docdb-pool-{}", inner.address))
        .spawn(move || run(&inner))
}

fn run<F: ConnectionFactory>(inner: &Arc<PoolInner<F>>) {
    tracing::debug!(address = %inner.address, "pool maintenance worker started");
    // `None` when the configured delay is too large to represent.
    let mut next_pass = Instant::now().checked_add(inner.config.maintenance_initial_delay);

    loop {
        let wake_at = match (inner.next_waiter_deadline(), next_pass) {
            (Some(deadline), Some(pass)) => Some(deadline.min(pass)),
            (deadline, pass) => deadline.or(pass),
        };

        match wait(&inner.worker, wake_at) {
            Wake::Shutdown => break,
            Wake::Work { notified } => {
                inner.expire_waiters();

                let now = Instant::now();
                let due = next_pass.is_some_and(|pass| now >= pass);
                if due || notified {
                    maintain(inner);
                }
                if due {
                    next_pass = now.checked_add(inner.config.maintenance_frequency);
                }
            }
        }
    }
    tracing::debug!(address = %inner.address, "pool maintenance worker stopped");
}

fn wait(signal: &WorkerSignal, wake_at: Option<Instant>) -> Wake {
    let mut state = signal.state.lock();
    while !state.notified && !state.shutdown {
        match wake_at {
            Some(wake_at) => {
                if signal.wake.wait_until(&mut state, wake_at).timed_out() {
                    break;
                }
            }
            None => signal.wake.wait(&mut state),
        }
    }
    if state.shutdown {
        return Wake::Shutdown;
    }
    let notified = std::mem::take(&mut state.notified);
    Wake::Work { notified }
}

/// One maintenance pass: prune, then start a top-up if below `min_size`.
fn maintain<F: ConnectionFactory>(inner: &Arc<PoolInner<F>>) {
    inner.prune_idle();

    if !inner.worker.begin_top_up() {
        return;
    }
    match inner.reserve_for_min_size() {
        Some(generation) => start(inner, Job::TopUp { generation }),
        None => inner.worker.end_top_up(),
    }
}

fn top_up<F: ConnectionFactory>(inner: &Arc<PoolInner<F>>, mut generation: u64) {
    loop {
        match inner.open_connection(generation, &Timeout::infinite()) {
            // Checking it in parks it idle, or serves a waiter.
            Ok(conn) => drop(conn),
            Err(err) if err.is_pool_cleared() => return,
            Err(err) => {
                tracing::warn!(
                    address = %inner.address,
                    error = %err,
                    "background connection creation failed"
                );
                return;
            }
        }
        match inner.reserve_for_min_size() {
            Some(current) => generation = current,
            None => return,
        }
    }
}
