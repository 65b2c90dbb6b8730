/*!
 * Kernel Sync - Demo Entry Point
 *
 * Runs a batch of work items on the worker pool. The items contend on a
 * wait-subsystem mutex and report completion through a semaphore. A
 * registered wait on the stop event reports shutdown from a pool worker,
 * then the pool and wait statistics are printed as JSON.
 */

use anyhow::{bail, Context, Result};
use kernel_sync::threadpool::ThreadSpawner;
use kernel_sync::{
    init_tracing, EventMode, PoolConfig, ThreadPool, WaitAnyOutcome, WaitOutcome, WaitSubsystem,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use tracing::{info, warn};

const WORK_ITEMS: i32 = 64;

fn main() -> Result<()> {
    init_tracing();

    info!("Kernel sync demo starting...");
    info!("================================================");

    let config = PoolConfig::from_env().context("reading pool configuration")?;
    info!(
        min_threads = config.min_threads,
        max_threads = config.max_threads,
        processor_count = config.processor_count,
        "Initializing worker pool"
    );
    let waits = WaitSubsystem::new();
    let pool = ThreadPool::with_wait_subsystem(config, Arc::new(ThreadSpawner), waits.clone())?;

    let lock = waits.create_mutex(false)?;
    let done = waits.create_semaphore(0, WORK_ITEMS)?;
    let stop = waits.create_event(false, EventMode::ManualReset)?;
    let total = Arc::new(AtomicU64::new(0));

    for i in 0..WORK_ITEMS {
        let waits = waits.clone();
        let total = Arc::clone(&total);
        pool.queue_work_item(move || {
            match waits.wait(lock, 1_000) {
                Ok(WaitOutcome::Signaled) | Ok(WaitOutcome::Abandoned) => {
                    // Critical section
                    total.fetch_add(i as u64, Ordering::Relaxed);
                    std::thread::sleep(std::time::Duration::from_millis(2));
                    if let Err(e) = waits.release_mutex(lock) {
                        warn!(error = %e, "release failed");
                    }
                }
                Ok(WaitOutcome::TimedOut) => warn!(item = i, "mutex wait timed out"),
                Err(e) => warn!(item = i, error = %e, "mutex wait failed"),
            }
            if let Err(e) = waits.release_semaphore(done, 1) {
                warn!(error = %e, "completion signal failed");
            }
        });
    }

    for _ in 0..WORK_ITEMS {
        match waits.wait_any(&[stop, done], 10_000)? {
            WaitAnyOutcome::Signaled(1) => {}
            WaitAnyOutcome::TimedOut => bail!("work items did not finish in time"),
            other => bail!("unexpected wait outcome {:?}", other),
        }
    }

    let (stopped_tx, stopped_rx) = mpsc::sync_channel(1);
    pool.register_wait(
        stop,
        5_000,
        move |timed_out| {
            let _ = stopped_tx.try_send(timed_out);
        },
        true,
    )?;
    waits.set_event(stop)?;
    let timed_out = stopped_rx
        .recv_timeout(std::time::Duration::from_secs(10))
        .context("stop callback never ran")?;
    info!(timed_out, "Stop event observed by registered wait");

    let expected: u64 = (0..WORK_ITEMS as u64).sum();
    info!(
        total = total.load(Ordering::Relaxed),
        expected, "All work items completed"
    );

    println!("{}", serde_json::to_string_pretty(&pool.stats())?);
    println!("{}", serde_json::to_string_pretty(&waits.stats())?);

    for handle in [lock, done, stop] {
        waits.delete_handle(handle)?;
    }
    info!("================================================");
    Ok(())
}
