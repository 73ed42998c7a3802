//! Run production.
//!
//! A [`RunBuilder`] buffers records in a bounded heap and spills each full heap as
//! one sorted run file. Writing is handed to a dedicated flusher thread so the
//! worker can start filling the next heap while the previous one drains; at most
//! one flush is in flight per builder.

use std::fs::{self, File};
use std::io;
use std::io::prelude::*;
use std::mem;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::heap::BoundedHeap;
use crate::record::{compare_records, Record};
use crate::sort::SortError;

/// Heap of records ordered by line content.
pub type RecordHeap = BoundedHeap<Record, fn(&Record, &Record) -> io::Result<std::cmp::Ordering>>;

fn new_heap(capacity: usize) -> RecordHeap {
    BoundedHeap::new(capacity, compare_records)
}

struct FlushJob {
    heap: RecordHeap,
    path: PathBuf,
}

/// Builds sorted run files out of an unordered record stream.
///
/// Owned by exactly one map-phase worker. `finish` must be called to flush the
/// remainder and collect the run list; it also joins the flusher thread, so run
/// files are stable once it returns.
pub struct RunBuilder {
    heap: RecordHeap,
    lines_per_run: usize,
    dir: PathBuf,
    id: usize,
    next_run: usize,
    job_tx: Sender<FlushJob>,
    result_rx: Receiver<Result<PathBuf, SortError>>,
    flusher: JoinHandle<()>,
    flush_pending: bool,
    runs: Vec<PathBuf>,
}

impl RunBuilder {
    /// Creates a builder writing runs named after worker `id` into `dir`.
    pub fn new(dir: &Path, id: usize, lines_per_run: usize) -> Self {
        assert!(lines_per_run > 0, "lines per run must be positive");
        let (job_tx, job_rx) = bounded::<FlushJob>(1);
        let (result_tx, result_rx) = bounded(1);
        let flusher = thread::spawn(move || {
            for job in job_rx {
                let result = write_run(job);
                if result_tx.send(result).is_err() {
                    break;
                }
            }
        });
        RunBuilder {
            heap: new_heap(lines_per_run),
            lines_per_run,
            dir: dir.to_path_buf(),
            id,
            next_run: 0,
            job_tx,
            result_rx,
            flusher,
            flush_pending: false,
            runs: Vec::new(),
        }
    }

    /// Adds one record, spilling the heap to a new run file when it is full.
    pub fn push(&mut self, record: Record) -> Result<(), SortError> {
        if self.heap.is_full() {
            self.rotate()?;
        }
        self.heap.push(record).map_err(SortError::Map)
    }

    /// Flushes the remainder as a final (possibly undersized) run and returns the
    /// run files this builder produced, in creation order.
    pub fn finish(mut self) -> Result<Vec<PathBuf>, SortError> {
        if !self.heap.is_empty() {
            self.rotate()?;
        }
        self.await_flush()?;
        let RunBuilder { job_tx, flusher, runs, .. } = self;
        // closing the job channel stops the flusher
        drop(job_tx);
        if flusher.join().is_err() {
            return Err(SortError::WorkerPanicked("flush"));
        }
        Ok(runs)
    }

    /// Swaps in a fresh heap and submits the full one for writing.
    fn rotate(&mut self) -> Result<(), SortError> {
        self.await_flush()?;
        let path = self.dir.join(format!("run_{}_{}", self.id, self.next_run));
        self.next_run += 1;
        let full = mem::replace(&mut self.heap, new_heap(self.lines_per_run));
        log::debug!("worker {}: flushing {} records to {}", self.id, full.len(), path.display());
        if self.job_tx.send(FlushJob { heap: full, path }).is_err() {
            return Err(SortError::WorkerPanicked("flush"));
        }
        self.flush_pending = true;
        Ok(())
    }

    /// Waits for the in-flight flush, if any, and records its run file.
    fn await_flush(&mut self) -> Result<(), SortError> {
        if !self.flush_pending {
            return Ok(());
        }
        self.flush_pending = false;
        match self.result_rx.recv() {
            Ok(Ok(path)) => {
                self.runs.push(path);
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(SortError::WorkerPanicked("flush")),
        }
    }
}

/// Drains the heap into a new run file. The records come out in ascending order,
/// which is the only invariant run files carry. A partially written file from a
/// failed flush is deleted so the merge phase never sees it.
fn write_run(job: FlushJob) -> Result<PathBuf, SortError> {
    let FlushJob { mut heap, path } = job;
    let result = (|| -> io::Result<()> {
        let mut writer = io::BufWriter::new(File::create(&path)?);
        while let Some(record) = heap.pop()? {
            record.write_to(&mut writer)?;
        }
        writer.flush()
    })();
    match result {
        Ok(()) => Ok(path),
        Err(err) => {
            let _ = fs::remove_file(&path);
            Err(SortError::RunFile(path, err))
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use super::RunBuilder;
    use crate::record::Record;

    fn push_lines(builder: &mut RunBuilder, lines: &[&str]) {
        for line in lines {
            builder.push(Record::inline(line.as_bytes().to_vec())).unwrap();
        }
    }

    fn read_lines(path: &Path) -> Vec<String> {
        let content = fs::read_to_string(path).unwrap();
        content.lines().map(str::to_owned).collect()
    }

    #[test]
    fn test_single_undersized_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = RunBuilder::new(dir.path(), 0, 10);
        push_lines(&mut builder, &["banana", "apple", "cherry"]);

        let runs = builder.finish().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(read_lines(&runs[0]), vec!["apple", "banana", "cherry"]);
    }

    #[test]
    fn test_spills_on_full_heap() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = RunBuilder::new(dir.path(), 3, 2);
        push_lines(&mut builder, &["banana", "apple", "cherry"]);

        let runs = builder.finish().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(read_lines(&runs[0]), vec!["apple", "banana"]);
        assert_eq!(read_lines(&runs[1]), vec!["cherry"]);
    }

    #[test]
    fn test_every_run_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = RunBuilder::new(dir.path(), 0, 5);
        for value in [9, 2, 7, 4, 1, 8, 3, 6, 5, 0, 12, 11, 10] {
            builder.push(Record::inline(format!("{:02}", value).into_bytes())).unwrap();
        }

        let runs = builder.finish().unwrap();
        assert_eq!(runs.len(), 3);
        let mut total = 0;
        for run in &runs {
            let lines = read_lines(run);
            let mut sorted = lines.clone();
            sorted.sort();
            assert_eq!(lines, sorted);
            total += lines.len();
        }
        assert_eq!(total, 13);
    }

    #[test]
    fn test_empty_builder_produces_no_runs() {
        let dir = tempfile::tempdir().unwrap();
        let builder = RunBuilder::new(dir.path(), 0, 4);
        assert!(builder.finish().unwrap().is_empty());
    }
}
