//! Stress tests for engines.
//!
//! These helpers run concurrent writers and readers against one engine and
//! report throughput plus any consistency violations they observed.

use crate::conformance::Fixture;
use crate::fixtures::{blocks, Block};
use pipestore_core::{
    Comparator, Context, SortOrder, SurrogateKey, Table, Transactable, Transaction,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations, including consistency violations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of writer threads.
    pub writers: usize,
    /// Number of reader threads.
    pub readers: usize,
    /// Transactions committed by each writer.
    pub transactions_per_writer: usize,
    /// Blocks staged per transaction.
    pub batch_size: u64,
    /// Page size used by readers.
    pub page_size: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            writers: 4,
            readers: 2,
            transactions_per_writer: 50,
            batch_size: 20,
            page_size: 64,
        }
    }
}

fn write_batch<B: Fixture>(engine: &B, size: u64) -> bool {
    let ctx = Context::background();
    engine
        .in_transaction(&ctx, |txn| txn.bulk_save(&ctx, &mut blocks(size)))
        .is_ok()
}

/// Walks the whole collection with `>` cursors and returns `false` if keys
/// ever fail to increase.
fn walk_is_ordered<T: Table<Block>>(table: &T, page_size: u64) -> bool {
    let ctx = Context::background();
    let mut cursor = SurrogateKey::UNASSIGNED;
    loop {
        let Ok(page) = table.cursor_list(&ctx, cursor, page_size, SortOrder::Asc, Comparator::Gt)
        else {
            return false;
        };
        if page.len() as u64 > page_size {
            return false;
        }
        for block in &page {
            if block.id <= cursor {
                return false;
            }
            cursor = block.id;
        }
        if page.is_empty() {
            return true;
        }
    }
}

/// Runs concurrent writers committing batches.
///
/// Afterwards the collection must hold exactly the committed rows; a
/// mismatch is counted as one failed operation.
pub fn concurrent_writers<B>(engine: &B, config: &StressConfig) -> StressTestResult
where
    B: Fixture + Sync,
{
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for _ in 0..config.writers {
            scope.spawn(|| {
                for _ in 0..config.transactions_per_writer {
                    if write_batch(engine, config.batch_size) {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    let duration = start.elapsed();
    let successful = successful.into_inner();
    let mut failed = failed.into_inner();

    let ctx = Context::background();
    let stored = engine
        .table::<Block>()
        .list(&ctx, u64::MAX, 0, SortOrder::Asc)
        .map_or(0, |rows| rows.len());
    if stored as u64 != successful as u64 * config.batch_size {
        failed += 1;
    }

    StressTestResult::new(successful, failed, duration)
}

/// Runs writers and cursor-walking readers at the same time.
///
/// Readers count a failure whenever a walk observes keys out of order.
pub fn concurrent_readers_and_writers<B>(engine: &B, config: &StressConfig) -> StressTestResult
where
    B: Fixture + Sync,
{
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let writers_done = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for _ in 0..config.writers {
            scope.spawn(|| {
                for _ in 0..config.transactions_per_writer {
                    if write_batch(engine, config.batch_size) {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                writers_done.fetch_add(1, Ordering::Release);
            });
        }
        for _ in 0..config.readers {
            scope.spawn(|| {
                let table = engine.table::<Block>();
                loop {
                    let finished = writers_done.load(Ordering::Acquire) == config.writers;
                    if walk_is_ordered(&table, config.page_size) {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                    if finished {
                        break;
                    }
                }
            });
        }
    });

    StressTestResult::new(
        successful.into_inner(),
        failed.into_inner(),
        start.elapsed(),
    )
}

/// Opens and closes transactions from many threads, returning the number
/// of sessions still open afterwards through `open_after`.
pub fn session_churn<B, F>(
    engine: &B,
    threads: usize,
    rounds: usize,
    open_after: F,
) -> StressTestResult
where
    B: Transactable + Sync,
    F: Fn(&B) -> usize,
{
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for worker in 0..threads {
            let successful = &successful;
            let failed = &failed;
            scope.spawn(move || {
                let ctx = Context::background();
                for round in 0..rounds {
                    match engine.begin_transaction(&ctx) {
                        Ok(txn) if (worker + round) % 2 == 0 => {
                            let _ = txn.close(&ctx);
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(txn) => {
                            drop(txn);
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
    });

    let mut failed = failed.into_inner();
    if open_after(engine) != 0 {
        failed += 1;
    }
    StressTestResult::new(successful.into_inner(), failed, start.elapsed())
}
