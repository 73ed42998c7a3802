//! K-way merge of sorted record sources.
//!
//! [`RunMerger`] merges any number of sorted sources through a bounded heap keyed
//! by `(record, source index)`. [`ParallelMerger`] fans the run files out over a
//! few group mergers feeding bounded queues, then merges the queues into the
//! output on the calling thread.

use std::fs::File;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::heap::BoundedHeap;
use crate::reader::LineReader;
use crate::record::Record;
use crate::sort::SortError;

/// A sorted stream of records: pull one, or end of stream.
pub trait RecordSource {
    fn pull(&mut self) -> Result<Option<Record>, SortError>;
}

/// Records read back from one sorted run file.
pub struct FileSource {
    reader: LineReader,
}

impl FileSource {
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self, SortError> {
        let reader = LineReader::open(path, chunk_size).map_err(SortError::Reduce)?;
        Ok(FileSource { reader })
    }
}

impl RecordSource for FileSource {
    fn pull(&mut self) -> Result<Option<Record>, SortError> {
        self.reader.read_record().map_err(SortError::Reduce)
    }
}

/// Records pulled from a group merger's queue. The sending side closing the
/// channel is the end-of-stream signal, so an exhausted group and a failed group
/// both unblock the final merge.
pub struct QueueSource {
    queue_rx: Receiver<Record>,
}

impl QueueSource {
    pub fn new(queue_rx: Receiver<Record>) -> Self {
        QueueSource { queue_rx }
    }
}

impl RecordSource for QueueSource {
    fn pull(&mut self) -> Result<Option<Record>, SortError> {
        Ok(self.queue_rx.recv().ok())
    }
}

type FrontCompare = fn(&(Record, usize), &(Record, usize)) -> io::Result<std::cmp::Ordering>;

/// Records compare by line content; equal lines fall back to source index so the
/// merge order is deterministic.
fn compare_front(a: &(Record, usize), b: &(Record, usize)) -> io::Result<std::cmp::Ordering> {
    Ok(a.0.compare(&b.0)?.then(a.1.cmp(&b.1)))
}

/// Merges `K` sorted sources into one sorted stream using a heap of size `K`.
///
/// As long as every source is itself non-decreasing, the output is the fully
/// sorted merge: the heap always holds the frontier of every non-exhausted
/// source, and replacing a popped record with its successor from the same source
/// can never introduce anything smaller than what was already emitted.
pub struct RunMerger<S: RecordSource> {
    sources: Vec<S>,
    front: BoundedHeap<(Record, usize), FrontCompare>,
    initiated: bool,
}

impl<S: RecordSource> RunMerger<S> {
    pub fn new(sources: Vec<S>) -> Self {
        let front = BoundedHeap::new(sources.len(), compare_front as FrontCompare);
        RunMerger {
            sources,
            front,
            initiated: false,
        }
    }

    /// Pulls the first record of every source; empty sources never enter the heap.
    fn init(&mut self) -> Result<(), SortError> {
        for (index, source) in self.sources.iter_mut().enumerate() {
            if let Some(record) = source.pull()? {
                self.front.push((record, index)).map_err(SortError::Reduce)?;
            }
        }
        Ok(())
    }

    /// Returns the next record in non-decreasing order, or `None` once all
    /// sources are exhausted.
    pub fn next_record(&mut self) -> Result<Option<Record>, SortError> {
        if !self.initiated {
            self.initiated = true;
            self.init()?;
        }
        let (record, index) = match self.front.pop().map_err(SortError::Reduce)? {
            Some(front) => front,
            None => return Ok(None),
        };
        if let Some(next) = self.sources[index].pull()? {
            self.front.push((next, index)).map_err(SortError::Reduce)?;
        }
        Ok(Some(record))
    }
}

impl<S: RecordSource> Iterator for RunMerger<S> {
    type Item = Result<Record, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Two-level parallel merge: groups of run files are merged concurrently into
/// bounded queues, and the queues are merged into the output.
pub struct ParallelMerger {
    groups: usize,
    queue_depth: usize,
    chunk_size: usize,
}

impl ParallelMerger {
    pub fn new(groups: usize, queue_depth: usize, chunk_size: usize) -> Self {
        assert!(groups > 0, "at least one merge group required");
        assert!(queue_depth > 0, "merge queue depth must be positive");
        ParallelMerger {
            groups,
            queue_depth,
            chunk_size,
        }
    }

    /// Merges `runs` into `output`. Every run file must be sorted.
    pub fn merge(&self, runs: &[PathBuf], output: &Path) -> Result<(), SortError> {
        let groups = self.groups.min(runs.len());
        log::info!("merging {} runs in {} groups", runs.len(), groups);

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(groups);
            let mut queue_sources = Vec::with_capacity(groups);
            for segment in partition(runs, groups) {
                let (record_tx, record_rx) = bounded::<Record>(self.queue_depth);
                let chunk_size = self.chunk_size;
                handles.push(scope.spawn(move || merge_group(segment, chunk_size, record_tx)));
                queue_sources.push(QueueSource::new(record_rx));
            }

            // the final merge runs on this thread; a failed group closes its
            // queue, which ends that source early and lets the join below report
            let write_result = self.write_output(queue_sources, output);

            let mut first_error = None;
            for handle in handles {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => first_error = first_error.or(Some(err)),
                    Err(_) => first_error = first_error.or(Some(SortError::WorkerPanicked("merge"))),
                }
            }
            match (first_error, write_result) {
                (Some(err), _) => Err(err),
                (None, result) => result,
            }
        })
    }

    fn write_output(&self, sources: Vec<QueueSource>, output: &Path) -> Result<(), SortError> {
        let file = File::create(output).map_err(|err| SortError::Output(output.to_path_buf(), err))?;
        let mut writer = io::BufWriter::new(file);
        let mut merger = RunMerger::new(sources);
        let mut lines_written: u64 = 0;
        while let Some(record) = merger.next_record()? {
            record
                .write_to(&mut writer)
                .map_err(|err| SortError::Output(output.to_path_buf(), err))?;
            lines_written += 1;
        }
        writer
            .flush()
            .map_err(|err| SortError::Output(output.to_path_buf(), err))?;
        log::info!("final merge wrote {} lines", lines_written);
        Ok(())
    }
}

/// Splits `runs` into `groups` contiguous segments of roughly equal size.
/// `groups` must not exceed `runs.len()`, so no segment is empty.
fn partition(runs: &[PathBuf], groups: usize) -> Vec<&[PathBuf]> {
    let mut segments = Vec::with_capacity(groups);
    let mut start = 0;
    for group in 0..groups {
        let end = if group + 1 == groups {
            runs.len()
        } else {
            (group + 1) * runs.len() / groups
        };
        segments.push(&runs[start..end]);
        start = end;
    }
    segments
}

/// One group worker: k-way merge over this group's run files into its queue.
/// A send failure means the final merge is gone; stop quietly, the error
/// surfaces on its side.
fn merge_group(runs: &[PathBuf], chunk_size: usize, record_tx: Sender<Record>) -> Result<(), SortError> {
    let sources = runs
        .iter()
        .map(|run| FileSource::open(run, chunk_size))
        .collect::<Result<Vec<_>, _>>()?;
    let mut merger = RunMerger::new(sources);
    while let Some(record) = merger.next_record()? {
        if record_tx.send(record).is_err() {
            break;
        }
    }
    Ok(())
}
