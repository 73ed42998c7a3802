//! Map phase: record distribution over sorting workers.
//!
//! One reading thread batches records into buckets and pushes them onto a bounded
//! queue; a fixed set of workers each drain buckets into their own [`RunBuilder`].
//! The bounded queue is what applies backpressure to the reader.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};

use crate::progress::ProgressLogger;
use crate::reader::LineReader;
use crate::record::Record;
use crate::run::RunBuilder;
use crate::sort::SortError;

/// How long the reader blocks on a full queue before re-checking the failure flag.
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Fans records out from a single reader to `workers` run builders.
pub struct Distributor {
    workers: usize,
    bucket_size: usize,
    queue_depth: usize,
    lines_per_run: usize,
}

impl Distributor {
    pub fn new(workers: usize, bucket_size: usize, queue_depth: usize, lines_per_run: usize) -> Self {
        assert!(workers > 0, "at least one worker required");
        assert!(bucket_size > 0, "bucket size must be positive");
        Distributor {
            workers,
            bucket_size,
            queue_depth,
            lines_per_run,
        }
    }

    /// Runs the map phase to completion: reads every record, distributes them and
    /// waits for every worker and its flusher to finish. Returns all run files.
    ///
    /// Run files are stable once this returns; they are never exposed while still
    /// being written.
    pub fn run(
        &self,
        reader: LineReader,
        tmp_dir: &Path,
        progress: &ProgressLogger,
    ) -> Result<Vec<PathBuf>, SortError> {
        let (bucket_tx, bucket_rx) = bounded::<Vec<Record>>(self.queue_depth);
        let failed = AtomicBool::new(false);

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.workers);
            for id in 0..self.workers {
                let bucket_rx = bucket_rx.clone();
                let failed = &failed;
                let builder = RunBuilder::new(tmp_dir, id, self.lines_per_run);
                handles.push(scope.spawn(move || Self::build_runs(builder, bucket_rx, failed)));
            }
            drop(bucket_rx);

            let read_result = self.read_into(reader, bucket_tx, &failed, progress);

            // wait for every worker to reach a terminal state before reporting
            let mut first_error = read_result.err();
            let mut runs = Vec::new();
            for handle in handles {
                match handle.join() {
                    Ok(Ok(mut worker_runs)) => runs.append(&mut worker_runs),
                    Ok(Err(err)) => first_error = first_error.or(Some(err)),
                    Err(_) => first_error = first_error.or(Some(SortError::WorkerPanicked("map"))),
                }
            }
            match first_error {
                Some(err) => Err(err),
                None => Ok(runs),
            }
        })
    }

    /// Reader loop: batch records into buckets, enqueue full buckets. Dropping the
    /// sender on return is what tells the workers the input is exhausted.
    fn read_into(
        &self,
        reader: LineReader,
        bucket_tx: Sender<Vec<Record>>,
        failed: &AtomicBool,
        progress: &ProgressLogger,
    ) -> Result<(), SortError> {
        let mut bucket = Vec::with_capacity(self.bucket_size);
        for record in reader {
            let record = record.map_err(SortError::Map)?;
            progress.add(record.num_bytes() + 1);
            bucket.push(record);
            if bucket.len() == self.bucket_size {
                let full = std::mem::replace(&mut bucket, Vec::with_capacity(self.bucket_size));
                if !Self::send_bucket(&bucket_tx, full, failed) {
                    return Ok(());
                }
            }
        }
        if !bucket.is_empty() {
            Self::send_bucket(&bucket_tx, bucket, failed);
        }
        Ok(())
    }

    /// Blocking enqueue with backpressure. Returns false when the pipeline has
    /// failed elsewhere and reading should stop; the failing worker reports the
    /// actual error.
    fn send_bucket(bucket_tx: &Sender<Vec<Record>>, bucket: Vec<Record>, failed: &AtomicBool) -> bool {
        let mut bucket = bucket;
        loop {
            if failed.load(Ordering::Relaxed) {
                return false;
            }
            match bucket_tx.send_timeout(bucket, SEND_POLL_INTERVAL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(returned)) => bucket = returned,
                // all workers gone; they only exit early on failure
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    /// Worker loop: drain buckets into this worker's builder until the upstream
    /// disconnects, then flush the remainder.
    fn build_runs(
        mut builder: RunBuilder,
        bucket_rx: Receiver<Vec<Record>>,
        failed: &AtomicBool,
    ) -> Result<Vec<PathBuf>, SortError> {
        while let Ok(bucket) = bucket_rx.recv() {
            for record in bucket {
                if let Err(err) = builder.push(record) {
                    failed.store(true, Ordering::Relaxed);
                    return Err(err);
                }
            }
        }
        builder.finish().map_err(|err| {
            failed.store(true, Ordering::Relaxed);
            err
        })
    }
}
