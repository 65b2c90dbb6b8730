/*!
 * Wait Subsystem Integration Tests
 *
 * Mutex recursion, semaphore bounds, event modes, multi-object waits,
 * abandoned mutexes and interrupts across real threads
 */

use kernel_sync::{
    EventMode, Handle, ObjectKind, SyncError, WaitAllOutcome, WaitAnyOutcome, WaitOutcome,
    WaitSubsystem, INFINITE,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serial_test::serial;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Spin until `n` threads are blocked inside the subsystem
fn wait_for_blocked(waits: &WaitSubsystem, n: usize) {
    let start = Instant::now();
    while waits.stats().waiting_threads < n {
        assert!(start.elapsed() < Duration::from_secs(5), "waiters never blocked");
        thread::sleep(Duration::from_millis(1));
    }
}

fn try_wait_elsewhere(waits: &WaitSubsystem, handle: Handle) -> WaitOutcome {
    let waits = waits.clone();
    thread::spawn(move || waits.wait(handle, 0).unwrap())
        .join()
        .unwrap()
}

// ============================================================================
// Mutex
// ============================================================================

#[test]
fn test_mutex_recursion_unwinds() {
    let waits = WaitSubsystem::new();
    let mutex = waits.create_mutex(false).unwrap();

    for _ in 0..3 {
        assert_eq!(waits.wait(mutex, 0).unwrap(), WaitOutcome::Signaled);
    }
    assert_eq!(try_wait_elsewhere(&waits, mutex), WaitOutcome::TimedOut);

    waits.release_mutex(mutex).unwrap();
    waits.release_mutex(mutex).unwrap();
    assert_eq!(try_wait_elsewhere(&waits, mutex), WaitOutcome::TimedOut);

    waits.release_mutex(mutex).unwrap();
    assert_eq!(waits.mutex_owner(mutex).unwrap(), None);
    assert_eq!(try_wait_elsewhere(&waits, mutex), WaitOutcome::Signaled);
}

#[test]
fn test_release_by_non_owner_fails() {
    let waits = WaitSubsystem::new();
    let mutex = waits.create_mutex(true).unwrap();
    let owner = waits.mutex_owner(mutex).unwrap();

    let other = waits.clone();
    let result = thread::spawn(move || other.release_mutex(mutex))
        .join()
        .unwrap();
    assert_eq!(result, Err(SyncError::NotOwned(mutex.raw())));
    assert_eq!(waits.mutex_owner(mutex).unwrap(), owner);
}

#[test]
fn test_release_mutex_hands_off_to_blocked_waiter() {
    let waits = WaitSubsystem::new();
    let mutex = waits.create_mutex(true).unwrap();

    let waiter = {
        let waits = waits.clone();
        thread::spawn(move || {
            let outcome = waits.wait(mutex, 5_000).unwrap();
            let owned = waits.mutex_owner(mutex).unwrap();
            waits.release_mutex(mutex).unwrap();
            (outcome, owned)
        })
    };
    wait_for_blocked(&waits, 1);
    waits.release_mutex(mutex).unwrap();

    let (outcome, owned) = waiter.join().unwrap();
    assert_eq!(outcome, WaitOutcome::Signaled);
    assert!(owned.is_some());
    assert_ne!(owned, Some(waits.current_thread()));
}

// ============================================================================
// Abandoned mutexes
// ============================================================================

#[test]
fn test_abandoned_mutex_reported_once() {
    let waits = WaitSubsystem::new();
    let mutex = waits.create_mutex(false).unwrap();

    let owner = waits.clone();
    thread::spawn(move || {
        assert_eq!(owner.wait(mutex, 0).unwrap(), WaitOutcome::Signaled);
        // Exit while still holding it
    })
    .join()
    .unwrap();

    assert_eq!(waits.mutex_owner(mutex).unwrap(), None);
    assert_eq!(waits.wait(mutex, 0).unwrap(), WaitOutcome::Abandoned);
    waits.release_mutex(mutex).unwrap();
    assert_eq!(waits.wait(mutex, 0).unwrap(), WaitOutcome::Signaled);
    waits.release_mutex(mutex).unwrap();
}

#[test]
fn test_abandoned_mutex_wakes_blocked_wait_any() {
    let waits = WaitSubsystem::new();
    let event = waits.create_event(false, EventMode::ManualReset).unwrap();
    let mutex = waits.create_mutex(false).unwrap();
    let (held_tx, held_rx) = mpsc::channel();

    let owner = {
        let waits = waits.clone();
        thread::spawn(move || {
            assert_eq!(waits.wait(mutex, 0).unwrap(), WaitOutcome::Signaled);
            held_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
        })
    };
    held_rx.recv().unwrap();

    assert_eq!(
        waits.wait_any(&[event, mutex], 5_000).unwrap(),
        WaitAnyOutcome::Abandoned(1)
    );
    owner.join().unwrap();

    waits.release_mutex(mutex).unwrap();
    assert_eq!(waits.stats().owned_mutexes, 0);
}

#[test]
fn test_abandoned_mutex_in_wait_all() {
    let waits = WaitSubsystem::new();
    let sem = waits.create_semaphore(1, 1).unwrap();
    let mutex = waits.create_mutex(false).unwrap();

    let owner = waits.clone();
    thread::spawn(move || {
        owner.wait(mutex, 0).unwrap();
    })
    .join()
    .unwrap();

    assert_eq!(
        waits.wait_all(&[sem, mutex], 0).unwrap(),
        WaitAllOutcome::Abandoned(1)
    );
    waits.release_mutex(mutex).unwrap();
}

// ============================================================================
// Semaphores
// ============================================================================

#[test]
fn test_semaphore_release_is_all_or_nothing() {
    let waits = WaitSubsystem::new();
    let sem = waits.create_semaphore(2, 3).unwrap();

    assert!(matches!(
        waits.release_semaphore(sem, 2),
        Err(SyncError::CountExceeded { count: 2, release: 2, maximum: 3 })
    ));
    assert_eq!(waits.release_semaphore(sem, 1).unwrap(), 2);

    for _ in 0..3 {
        assert_eq!(waits.wait(sem, 0).unwrap(), WaitOutcome::Signaled);
    }
    assert_eq!(waits.wait(sem, 0).unwrap(), WaitOutcome::TimedOut);
}

#[test]
fn test_semaphore_creation_validation() {
    let waits = WaitSubsystem::new();
    assert!(waits.create_semaphore(0, 0).is_err());
    assert!(waits.create_semaphore(-1, 4).is_err());
    assert!(waits.create_semaphore(5, 4).is_err());
    assert!(waits.release_semaphore(waits.create_semaphore(0, 1).unwrap(), 0).is_err());
}

#[test]
fn test_semaphore_release_wakes_up_to_count() {
    let waits = WaitSubsystem::new();
    let sem = waits.create_semaphore(0, 10).unwrap();

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let waits = waits.clone();
            thread::spawn(move || waits.wait(sem, 300).unwrap())
        })
        .collect();
    wait_for_blocked(&waits, 3);

    assert_eq!(waits.release_semaphore(sem, 2).unwrap(), 0);
    let outcomes: Vec<_> = waiters.into_iter().map(|h| h.join().unwrap()).collect();
    let signaled = outcomes.iter().filter(|&&o| o == WaitOutcome::Signaled).count();
    assert_eq!(signaled, 2);
    assert_eq!(waits.wait(sem, 0).unwrap(), WaitOutcome::TimedOut);
}

// ============================================================================
// Events
// ============================================================================

#[test]
fn test_auto_reset_event_consumed_by_one_wait() {
    let waits = WaitSubsystem::new();
    let event = waits.create_event(false, EventMode::AutoReset).unwrap();

    waits.set_event(event).unwrap();
    assert_eq!(waits.wait(event, 0).unwrap(), WaitOutcome::Signaled);
    assert_eq!(waits.wait(event, 20).unwrap(), WaitOutcome::TimedOut);
}

#[test]
fn test_manual_reset_event_releases_everyone() {
    let waits = WaitSubsystem::new();
    let event = waits.create_event(false, EventMode::ManualReset).unwrap();

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let waits = waits.clone();
            thread::spawn(move || waits.wait(event, 5_000).unwrap())
        })
        .collect();
    wait_for_blocked(&waits, 4);

    waits.set_event(event).unwrap();
    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Signaled);
    }

    // Still set until reset
    assert_eq!(waits.wait(event, 0).unwrap(), WaitOutcome::Signaled);
    waits.reset_event(event).unwrap();
    assert_eq!(waits.wait(event, 0).unwrap(), WaitOutcome::TimedOut);
}

// ============================================================================
// Multi-object waits
// ============================================================================

#[test]
fn test_wait_any_lowest_index_wins() {
    let waits = WaitSubsystem::new();
    let a = waits.create_semaphore(0, 1).unwrap();
    let b = waits.create_semaphore(0, 1).unwrap();

    waits.release_semaphore(b, 1).unwrap();
    waits.release_semaphore(a, 1).unwrap();
    assert_eq!(waits.wait_any(&[a, b], 0).unwrap(), WaitAnyOutcome::Signaled(0));
    assert_eq!(waits.wait_any(&[a, b], 0).unwrap(), WaitAnyOutcome::Signaled(1));
}

#[test]
fn test_wait_any_blocked_reports_signaler() {
    let waits = WaitSubsystem::new();
    let a = waits.create_event(false, EventMode::AutoReset).unwrap();
    let b = waits.create_event(false, EventMode::AutoReset).unwrap();

    let waiter = {
        let waits = waits.clone();
        thread::spawn(move || waits.wait_any(&[a, b], 5_000).unwrap())
    };
    wait_for_blocked(&waits, 1);
    waits.set_event(b).unwrap();

    assert_eq!(waiter.join().unwrap(), WaitAnyOutcome::Signaled(1));
    // The other node was unregistered; `a` keeps a later signal
    waits.set_event(a).unwrap();
    assert_eq!(waits.wait(a, 0).unwrap(), WaitOutcome::Signaled);
}

#[test]
fn test_wait_all_needs_every_object() {
    let waits = WaitSubsystem::new();
    let sem = waits.create_semaphore(0, 1).unwrap();
    let event = waits.create_event(false, EventMode::AutoReset).unwrap();

    let waiter = {
        let waits = waits.clone();
        thread::spawn(move || waits.wait_all(&[sem, event], 5_000).unwrap())
    };
    wait_for_blocked(&waits, 1);

    waits.set_event(event).unwrap();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(waits.stats().waiting_threads, 1);

    waits.release_semaphore(sem, 1).unwrap();
    assert_eq!(waiter.join().unwrap(), WaitAllOutcome::Signaled);

    // Both signals were consumed together
    assert_eq!(waits.wait(sem, 0).unwrap(), WaitOutcome::TimedOut);
    assert_eq!(waits.wait(event, 0).unwrap(), WaitOutcome::TimedOut);
}

#[test]
fn test_wait_all_timeout_consumes_nothing() {
    let waits = WaitSubsystem::new();
    let sem = waits.create_semaphore(1, 1).unwrap();
    let event = waits.create_event(false, EventMode::ManualReset).unwrap();

    assert_eq!(waits.wait_all(&[sem, event], 20).unwrap(), WaitAllOutcome::TimedOut);
    assert_eq!(waits.wait(sem, 0).unwrap(), WaitOutcome::Signaled);
}

#[test]
fn test_duplicate_handles() {
    let waits = WaitSubsystem::new();
    let event = waits.create_event(true, EventMode::ManualReset).unwrap();

    assert_eq!(
        waits.wait_all(&[event, event], 0),
        Err(SyncError::DuplicateHandle { index: 1 })
    );
    assert_eq!(
        waits.wait_any(&[event, event], 0).unwrap(),
        WaitAnyOutcome::Signaled(0)
    );
}

#[test]
fn test_wait_list_size_limits() {
    let waits = WaitSubsystem::new();
    assert!(matches!(waits.wait_any(&[], 0), Err(SyncError::InvalidArgument(_))));

    let handles: Vec<_> = (0..65)
        .map(|_| waits.create_event(false, EventMode::AutoReset).unwrap())
        .collect();
    assert_eq!(
        waits.wait_any(&handles, 0),
        Err(SyncError::TooManyHandles { count: 65, max: 64 })
    );
    assert_eq!(waits.wait_any(&handles[..64], 0).unwrap(), WaitAnyOutcome::TimedOut);
}

#[test]
fn test_invalid_timeout() {
    let waits = WaitSubsystem::new();
    let event = waits.create_event(false, EventMode::AutoReset).unwrap();
    assert!(matches!(waits.wait(event, -2), Err(SyncError::InvalidArgument(_))));
}

// ============================================================================
// Signal and wait
// ============================================================================

#[test]
fn test_signal_and_wait_round_trip() {
    let waits = WaitSubsystem::new();
    let ping = waits.create_event(false, EventMode::AutoReset).unwrap();
    let pong = waits.create_event(false, EventMode::AutoReset).unwrap();

    let responder = {
        let waits = waits.clone();
        thread::spawn(move || {
            for _ in 0..10 {
                assert_eq!(waits.wait(ping, 5_000).unwrap(), WaitOutcome::Signaled);
                waits.set_event(pong).unwrap();
            }
        })
    };

    for _ in 0..10 {
        assert_eq!(
            waits.signal_and_wait(ping, pong, 5_000).unwrap(),
            WaitOutcome::Signaled
        );
    }
    responder.join().unwrap();
}

#[test]
fn test_signal_and_wait_failed_signal_does_not_wait() {
    let waits = WaitSubsystem::new();
    let full = waits.create_semaphore(1, 1).unwrap();
    let never = waits.create_event(false, EventMode::ManualReset).unwrap();

    let start = Instant::now();
    assert!(matches!(
        waits.signal_and_wait(full, never, INFINITE),
        Err(SyncError::CountExceeded { .. })
    ));
    assert!(start.elapsed() < Duration::from_secs(1));

    let foreign = waits.create_mutex(false).unwrap();
    assert_eq!(
        waits.signal_and_wait(foreign, never, INFINITE),
        Err(SyncError::NotOwned(foreign.raw()))
    );
}

#[test]
fn test_signal_and_wait_releases_owned_mutex() {
    let waits = WaitSubsystem::new();
    let mutex = waits.create_mutex(true).unwrap();
    let done = waits.create_event(false, EventMode::ManualReset).unwrap();

    let other = {
        let waits = waits.clone();
        thread::spawn(move || {
            assert_eq!(waits.wait(mutex, 5_000).unwrap(), WaitOutcome::Signaled);
            waits.set_event(done).unwrap();
            waits.release_mutex(mutex).unwrap();
        })
    };
    wait_for_blocked(&waits, 1);

    assert_eq!(
        waits.signal_and_wait(mutex, done, 5_000).unwrap(),
        WaitOutcome::Signaled
    );
    other.join().unwrap();
}

// ============================================================================
// Interrupts
// ============================================================================

#[test]
fn test_interrupt_blocked_event_wait() {
    let waits = WaitSubsystem::new();
    let event = waits.create_event(false, EventMode::ManualReset).unwrap();
    let (token_tx, token_rx) = mpsc::channel();

    let waiter = {
        let waits = waits.clone();
        thread::spawn(move || {
            token_tx.send(waits.current_thread()).unwrap();
            waits.wait(event, INFINITE)
        })
    };
    let token = token_rx.recv().unwrap();
    wait_for_blocked(&waits, 1);

    waits.interrupt(token).unwrap();
    assert_eq!(waiter.join().unwrap(), Err(SyncError::Interrupted));
    assert_eq!(waits.stats().waiting_threads, 0);
}

#[test]
fn test_interrupt_stays_pending_across_mutex_wait() {
    let waits = WaitSubsystem::new();
    let mutex = waits.create_mutex(true).unwrap();
    let (token_tx, token_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel();

    let waiter = {
        let waits = waits.clone();
        thread::spawn(move || {
            token_tx.send(waits.current_thread()).unwrap();
            go_rx.recv().unwrap();
            let mutex_wait = waits.wait(mutex, 50);
            let sleep = waits.sleep(5_000);
            (mutex_wait, sleep)
        })
    };
    let token = token_rx.recv().unwrap();
    waits.interrupt(token).unwrap();
    go_tx.send(()).unwrap();

    let start = Instant::now();
    let (mutex_wait, sleep) = waiter.join().unwrap();
    assert_eq!(mutex_wait, Ok(WaitOutcome::TimedOut));
    assert_eq!(sleep, Err(SyncError::Interrupted));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_interrupt_sleeping_thread() {
    let waits = WaitSubsystem::new();
    let (token_tx, token_rx) = mpsc::channel();

    let sleeper = {
        let waits = waits.clone();
        thread::spawn(move || {
            token_tx.send(waits.current_thread()).unwrap();
            waits.sleep(INFINITE)
        })
    };
    let token = token_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(20));

    waits.interrupt(token).unwrap();
    assert_eq!(sleeper.join().unwrap(), Err(SyncError::Interrupted));
}

#[test]
fn test_interrupt_unknown_thread() {
    let waits = WaitSubsystem::new();
    let stranger = thread::spawn(kernel_sync::ThreadToken::current)
        .join()
        .unwrap();
    assert!(matches!(
        waits.interrupt(stranger),
        Err(SyncError::InvalidArgument(_))
    ));
}

// ============================================================================
// Handles
// ============================================================================

#[test]
fn test_stale_handle_fails() {
    let waits = WaitSubsystem::new();
    let event = waits.create_event(false, EventMode::AutoReset).unwrap();
    waits.delete_handle(event).unwrap();

    let replacement = waits.create_event(false, EventMode::AutoReset).unwrap();
    assert_ne!(replacement, event);

    assert_eq!(waits.wait(event, 0), Err(SyncError::InvalidHandle(event.raw())));
    assert_eq!(waits.set_event(event), Err(SyncError::InvalidHandle(event.raw())));
    assert_eq!(waits.delete_handle(event), Err(SyncError::InvalidHandle(event.raw())));
    assert!(waits.kind(event).unwrap_err().is_invalid_handle());
    assert_eq!(waits.kind(replacement).unwrap(), ObjectKind::AutoResetEvent);
}

#[test]
fn test_delete_detaches_waiters() {
    let waits = WaitSubsystem::new();
    let doomed = waits.create_event(false, EventMode::AutoReset).unwrap();
    let other = waits.create_event(false, EventMode::AutoReset).unwrap();

    let waiter = {
        let waits = waits.clone();
        thread::spawn(move || waits.wait_any(&[doomed, other], 5_000).unwrap())
    };
    wait_for_blocked(&waits, 1);

    waits.delete_handle(doomed).unwrap();
    waits.set_event(other).unwrap();
    assert_eq!(waiter.join().unwrap(), WaitAnyOutcome::Signaled(1));
}

#[test]
fn test_stats_after_thread_exit() {
    let waits = WaitSubsystem::new();
    let event = waits.create_event(false, EventMode::AutoReset).unwrap();

    let worker = waits.clone();
    thread::spawn(move || {
        worker.wait(event, 10).unwrap();
    })
    .join()
    .unwrap();

    let stats = waits.stats();
    assert_eq!(stats.threads, 0);
    assert_eq!(stats.waiter_nodes, 0);
    assert_eq!(stats.live_handles, 1);
}

#[test]
#[serial]
fn test_global_subsystem_is_shared() {
    let handle = WaitSubsystem::global()
        .create_event(false, EventMode::ManualReset)
        .unwrap();

    thread::spawn(move || WaitSubsystem::global().set_event(handle).unwrap())
        .join()
        .unwrap();

    assert_eq!(
        WaitSubsystem::global().wait(handle, 0).unwrap(),
        WaitOutcome::Signaled
    );
    WaitSubsystem::global().delete_handle(handle).unwrap();
}

// ============================================================================
// Contention
// ============================================================================

#[test]
fn test_timeouts_racing_releases_lose_no_count() {
    const WAITERS: usize = 8;
    const ATTEMPTS: usize = 2_000;
    const RELEASES: u32 = 5_000;

    let waits = WaitSubsystem::new();
    let sem = waits.create_semaphore(0, i32::MAX).unwrap();

    let waiters: Vec<_> = (0..WAITERS)
        .map(|i| {
            let waits = waits.clone();
            thread::spawn(move || {
                let mut acquired = 0u32;
                for n in 0..ATTEMPTS {
                    // Mix single and duplicated multi-object waits
                    let signaled = if (i + n) % 2 == 0 {
                        match waits.wait_any(&[sem, sem], 1).unwrap() {
                            WaitAnyOutcome::Signaled(_) => true,
                            WaitAnyOutcome::TimedOut => false,
                            other => panic!("unexpected outcome {:?}", other),
                        }
                    } else {
                        match waits.wait(sem, 1).unwrap() {
                            WaitOutcome::Signaled => true,
                            WaitOutcome::TimedOut => false,
                            other => panic!("unexpected outcome {:?}", other),
                        }
                    };
                    if signaled {
                        acquired += 1;
                    }
                }
                acquired
            })
        })
        .collect();

    let releaser = {
        let waits = waits.clone();
        thread::spawn(move || {
            for n in 0..RELEASES {
                waits.release_semaphore(sem, 1).unwrap();
                if n % 64 == 0 {
                    thread::yield_now();
                }
            }
        })
    };

    releaser.join().unwrap();
    let acquired: u32 = waiters.into_iter().map(|w| w.join().unwrap()).sum();

    let mut remaining = 0u32;
    while waits.wait(sem, 0).unwrap() == WaitOutcome::Signaled {
        remaining += 1;
    }
    assert_eq!(acquired + remaining, RELEASES);

    let stats = waits.stats();
    assert_eq!(stats.waiting_threads, 0);
    assert_eq!(stats.waiter_nodes, 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_semaphore_count_stays_in_bounds(
        maximum in 1i32..16,
        ops in prop::collection::vec((any::<bool>(), 1i32..6), 1..40)
    ) {
        let waits = WaitSubsystem::new();
        let sem = waits.create_semaphore(0, maximum).unwrap();
        let mut model = 0i32;

        for (release, n) in ops {
            if release {
                match waits.release_semaphore(sem, n) {
                    Ok(previous) => {
                        prop_assert_eq!(previous as i32, model);
                        model += n;
                    }
                    Err(SyncError::CountExceeded { count, .. }) => {
                        prop_assert_eq!(count as i32, model);
                        prop_assert!(model + n > maximum);
                    }
                    Err(e) => prop_assert!(false, "unexpected error {}", e),
                }
            } else {
                let outcome = waits.wait(sem, 0).unwrap();
                prop_assert_eq!(outcome == WaitOutcome::Signaled, model > 0);
                if model > 0 {
                    model -= 1;
                }
            }
            prop_assert!((0..=maximum).contains(&model));
        }
    }
}
