//! Waiting, fairness, and background behavior under contention.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use common::{eventually, init_tracing, pool_with, ready_pool};
use docdb_driver_pool::{PoolConfig, PoolError, PoolState};

#[test]
fn test_waiters_are_served_in_arrival_order() {
    init_tracing();
    let (pool, _factory) = ready_pool(1);
    let pool = Arc::new(pool);
    let held = pool.get().unwrap();

    let (tx, rx) = mpsc::channel();
    let mut handles = Vec::new();
    for i in 0..5 {
        let worker_pool = Arc::clone(&pool);
        let tx = tx.clone();
        handles.push(thread::spawn(move || {
            let conn = worker_pool.get_timeout(Duration::from_secs(5)).unwrap();
            tx.send(i).unwrap();
            drop(conn);
        }));
        // Make sure waiter i is queued before waiter i + 1 arrives.
        assert!(eventually(|| pool.status().waiting == i + 1));
    }

    drop(held);
    for handle in handles {
        handle.join().unwrap();
    }
    drop(tx);

    let order: Vec<usize> = rx.iter().collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_wait_times_out() {
    let (pool, _factory) = ready_pool(1);
    let _held = pool.get().unwrap();

    let started = Instant::now();
    let err = pool.get_timeout(Duration::from_millis(10)).unwrap_err();

    assert!(err.is_timeout());
    assert!(matches!(err, PoolError::WaitTimeout { max_size: 1, .. }));
    assert!(started.elapsed() >= Duration::from_millis(10));
    assert_eq!(pool.status().waiting, 0);
    assert_eq!(pool.metrics().checkouts_timed_out, 1);
}

#[test]
fn test_zero_timeout_fails_immediately_at_capacity() {
    let (pool, _factory) = ready_pool(1);
    let _held = pool.get().unwrap();

    let err = pool.get_timeout(Duration::ZERO).unwrap_err();
    assert!(err.is_timeout());
}

#[test]
fn test_invalidate_fails_all_waiters() {
    let (pool, _factory) = ready_pool(1);
    let pool = Arc::new(pool);
    let held = pool.get().unwrap();

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.get_timeout(Duration::from_secs(10)))
        })
        .collect();
    assert!(eventually(|| pool.status().waiting == 3));

    let started = Instant::now();
    pool.invalidate_with(std::io::Error::other("primary stepped down"));
    assert_eq!(pool.status().waiting, 0);

    for handle in handles {
        let err = handle.join().unwrap().unwrap_err();
        assert!(matches!(err, PoolError::Cleared { .. }));
        assert_eq!(
            err.clear_cause().unwrap().to_string(),
            "primary stepped down"
        );
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    drop(held);
}

#[test]
fn test_close_fails_all_waiters() {
    let (pool, _factory) = ready_pool(1);
    let pool = Arc::new(pool);
    let held = pool.get().unwrap();

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.get_timeout(Duration::from_secs(10)))
    };
    assert!(eventually(|| pool.status().waiting == 1));

    pool.close();
    let err = waiter.join().unwrap().unwrap_err();
    assert!(matches!(err, PoolError::Closed { .. }));
    drop(held);
}

#[test]
fn test_capacity_is_never_exceeded() {
    let (pool, factory) = ready_pool(3);
    let pool = Arc::new(pool);
    let barrier = Arc::new(Barrier::new(8));
    let peak = Arc::new(AtomicUsize::new(0));
    let current = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            let peak = Arc::clone(&peak);
            let current = Arc::clone(&current);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..20 {
                    let conn = pool.get_timeout(Duration::from_secs(5)).unwrap();
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::yield_now();
                    current.fetch_sub(1, Ordering::SeqCst);
                    drop(conn);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(factory.counters.created() <= 3);
    assert_eq!(pool.metrics().checkouts_successful, 160);
}

#[test]
fn test_waiter_gets_connection_created_for_it() {
    let (pool, factory) = ready_pool(1);
    let pool = Arc::new(pool);
    let held = pool.get().unwrap();

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.get_timeout(Duration::from_secs(5)).map(|c| c.generation()))
    };
    assert!(eventually(|| pool.status().waiting == 1));

    // The returned connection is discarded, so the waiter is granted
    // capacity to open a fresh one.
    held.discard();

    assert_eq!(waiter.join().unwrap().unwrap(), 0);
    assert_eq!(factory.counters.created(), 2);
}

#[test]
fn test_connection_created_across_invalidate_is_not_returned() {
    let (pool, factory) = ready_pool(2);
    factory.set_delay(Duration::from_millis(100));
    let pool = Arc::new(pool);

    let getter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.get_timeout(Duration::from_secs(5)))
    };
    assert!(eventually(|| factory.counters.attempts() == 1));

    pool.invalidate();

    let err = getter.join().unwrap().unwrap_err();
    assert!(err.is_pool_cleared());
    assert_eq!(factory.counters.closed(), 1);
    assert_eq!(pool.status().total, 0);
}

#[test]
fn test_get_async_invokes_callback_once() {
    let (pool, _factory) = ready_pool(1);
    let (tx, rx) = mpsc::channel();

    pool.get_async(move |result| {
        tx.send(result.map(|conn| conn.id())).unwrap();
    });

    let id = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
    assert_eq!(id, 1);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn test_get_async_on_paused_pool_fails() {
    let (pool, _factory) = pool_with(PoolConfig::new());
    let (tx, rx) = mpsc::channel();

    pool.get_async(move |result| {
        tx.send(result.map(|_| ())).unwrap();
    });

    let err = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap_err();
    assert!(matches!(err, PoolError::Cleared { .. }));
}

#[test]
fn test_get_async_waits_for_checkin() {
    let (pool, _factory) = ready_pool(1);
    let held = pool.get().unwrap();
    let held_id = held.id();
    let (tx, rx) = mpsc::channel();

    pool.get_async(move |result| {
        tx.send(result.map(|conn| conn.id())).unwrap();
    });
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    assert_eq!(pool.status().waiting, 1);

    drop(held);
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap(), held_id);
}

#[test]
fn test_get_async_times_out() {
    let (pool, _factory) = ready_pool(1);
    let _held = pool.get().unwrap();
    let (tx, rx) = mpsc::channel();

    pool.get_async_timeout(Duration::from_millis(20), move |result| {
        tx.send(result.map(|_| ())).unwrap();
    });

    let err = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(pool.status().waiting, 0);
}

#[test]
fn test_get_async_cleared_by_invalidate() {
    let (pool, _factory) = ready_pool(1);
    let _held = pool.get().unwrap();
    let (tx, rx) = mpsc::channel();

    for _ in 0..3 {
        let tx = tx.clone();
        pool.get_async(move |result| {
            tx.send(result.map(|_| ())).unwrap();
        });
    }
    drop(tx);

    pool.invalidate();

    // Every callback has run by the time invalidate returns.
    let results: Vec<_> = rx.try_iter().collect();
    assert_eq!(results.len(), 3);
    assert!(
        results
            .into_iter()
            .all(|r| matches!(r, Err(PoolError::Cleared { .. })))
    );
}

#[test]
fn test_get_async_pending_creation_fails_on_close() {
    let (pool, factory) = ready_pool(1);
    factory.set_delay(Duration::from_millis(50));
    let (tx, rx) = mpsc::channel();

    pool.get_async(move |result| {
        tx.send(result.map(|_| ())).unwrap();
    });
    pool.close();

    let err = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap_err();
    assert!(matches!(err, PoolError::Closed { .. }));
    assert_eq!(pool.state(), PoolState::Closed);
}

#[test]
fn test_get_async_deadline_holds_during_slow_creation() {
    let (pool, factory) = ready_pool(1);
    factory.set_delay(Duration::from_millis(500));
    let (first_tx, first_rx) = mpsc::channel();

    // Takes the only slot and spends half a second in the handshake.
    pool.get_async(move |result| {
        first_tx.send(result.map(|_| ())).unwrap();
    });
    assert!(eventually(|| factory.counters.attempts() == 1));

    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    pool.get_async_timeout(Duration::from_millis(10), move |result| {
        tx.send((started.elapsed(), result.map(|_| ()))).unwrap();
    });

    let (took, result) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(result.unwrap_err().is_timeout());
    assert!(took < Duration::from_millis(200), "waiter resolved after {took:?}");

    first_rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
}

#[test]
fn test_get_async_creations_run_concurrently() {
    let (pool, factory) = ready_pool(2);
    factory.set_delay(Duration::from_millis(300));
    let (tx, rx) = mpsc::channel();

    let started = Instant::now();
    for _ in 0..2 {
        let tx = tx.clone();
        pool.get_async(move |result| {
            tx.send(result.map(|_| ())).unwrap();
        });
    }
    assert!(eventually(|| factory.counters.attempts() == 2));
    assert!(started.elapsed() < Duration::from_millis(250));

    // Both handshakes are cut off by the pause and nothing new is attempted.
    pool.invalidate();
    for _ in 0..2 {
        let err = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap_err();
        assert!(matches!(err, PoolError::Cleared { .. }));
    }
    thread::sleep(Duration::from_millis(50));
    assert_eq!(factory.counters.attempts(), 2);
    assert!(eventually(|| factory.counters.closed() == 2));
    assert_eq!(pool.status().total, 0);
}

#[test]
fn test_min_size_top_up_stops_at_pause() {
    let (pool, factory) = pool_with(PoolConfig::new().min_size(3).max_size(3));
    factory.set_delay(Duration::from_millis(100));

    pool.ready();
    assert!(eventually(|| factory.counters.attempts() == 1));
    pool.invalidate();

    thread::sleep(Duration::from_millis(300));
    assert_eq!(factory.counters.attempts(), 1);
    assert!(eventually(|| pool.status().total == 0));
}

#[tokio::test]
async fn test_acquire_from_async_context() {
    let (pool, _factory) = ready_pool(2);

    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.generation(), 0);
    drop(conn);

    assert_eq!(pool.status().available, 1);
}

#[tokio::test]
async fn test_acquire_waits_for_release() {
    let (pool, _factory) = ready_pool(1);
    let pool = Arc::new(pool);
    let held = pool.get().unwrap();
    let held_id = held.id();

    let task = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire().await.map(|c| c.id()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!task.is_finished());

    drop(held);
    assert_eq!(task.await.unwrap().unwrap(), held_id);
}

#[test]
fn test_min_size_is_maintained() {
    let (pool, factory) = pool_with(PoolConfig::new().min_size(3).max_size(5));
    assert_eq!(factory.counters.created(), 0);

    pool.ready();

    assert!(eventually(|| pool.status().available == 3));
    assert_eq!(factory.counters.created(), 3);

    // Invalidation retires them and the pool stays empty until ready again.
    pool.invalidate();
    assert!(eventually(|| pool.status().total == 0));

    pool.ready();
    assert!(eventually(|| pool.status().available == 3));
    assert_eq!(pool.status().generation, 1);
}

#[test]
fn test_idle_connections_are_pruned() {
    let (pool, factory) = pool_with(
        PoolConfig::new()
            .max_size(4)
            .max_idle_time(Duration::from_millis(10)),
    );
    pool.ready();

    drop(pool.get().unwrap());
    assert_eq!(pool.status().available, 1);

    // Let it sit idle past max_idle_time, then nudge the worker.
    thread::sleep(Duration::from_millis(30));
    pool.invalidate_service(docdb_driver_pool::ServiceId::new(), 0);

    assert!(eventually(|| pool.status().available == 0));
    assert_eq!(factory.counters.closed(), 1);
}
