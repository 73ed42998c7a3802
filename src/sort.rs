//! External sorter pipeline.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::distribute::Distributor;
use crate::merge::ParallelMerger;
use crate::progress::ProgressLogger;
use crate::reader::LineReader;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Input file is missing or not a regular file. Checked before any work starts.
    InvalidInput(PathBuf),
    /// Temporary directory creation error.
    TempDir(io::Error),
    /// Map phase failure: reading the input or comparing records against it.
    Map(io::Error),
    /// Creating or writing a run file failed.
    RunFile(PathBuf, io::Error),
    /// Reduce phase failure: reading run files back or merging them.
    Reduce(io::Error),
    /// Creating or writing the output file failed.
    Output(PathBuf, io::Error),
    /// A pipeline thread panicked; the name identifies the stage.
    WorkerPanicked(&'static str),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SortError::InvalidInput(_) => None,
            SortError::TempDir(err) => Some(err),
            SortError::Map(err) => Some(err),
            SortError::RunFile(_, err) => Some(err),
            SortError::Reduce(err) => Some(err),
            SortError::Output(_, err) => Some(err),
            SortError::WorkerPanicked(_) => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortError::InvalidInput(path) => write!(f, "input file {} does not exist", path.display()),
            SortError::TempDir(err) => write!(f, "temporary directory not created: {}", err),
            SortError::Map(err) => write!(f, "map phase failed: {}", err),
            SortError::RunFile(path, err) => write!(f, "writing run file {} failed: {}", path.display(), err),
            SortError::Reduce(err) => write!(f, "merge phase failed: {}", err),
            SortError::Output(path, err) => write!(f, "writing output {} failed: {}", path.display(), err),
            SortError::WorkerPanicked(stage) => write!(f, "a {} worker panicked", stage),
        }
    }
}

/// Progress is logged every this many input bytes.
const PROGRESS_LOG_INTERVAL: u64 = 50 * 1024 * 1024;

/// Big file sorter builder. Provides methods for [`BigSorter`] initialization.
///
/// Every knob is a performance parameter; none of them affects the sorted result.
#[derive(Clone)]
pub struct BigSorterBuilder {
    /// Read-buffer size and inline/referenced threshold, in bytes.
    chunk_size: usize,
    /// Heap capacity of one sorting worker, in records.
    lines_per_run: usize,
    /// Number of parallel sorting workers.
    workers: Option<usize>,
    /// Records per distributor bucket.
    bucket_size: usize,
    /// Distributor queue depth, in buckets.
    queue_depth: usize,
    /// Number of concurrent merge groups.
    merge_groups: usize,
    /// Per-group merge queue depth, in records.
    merge_queue_depth: usize,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
}

impl BigSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        BigSorterBuilder::default()
    }

    /// Sets the read-buffer size, which is also the threshold between inline and
    /// file-backed records (inclusive on the inline side).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> BigSorterBuilder {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets how many records one worker heap holds before spilling a run.
    pub fn with_lines_per_run(mut self, lines_per_run: usize) -> BigSorterBuilder {
        self.lines_per_run = lines_per_run;
        self
    }

    /// Sets the number of parallel sorting workers.
    pub fn with_workers(mut self, workers: usize) -> BigSorterBuilder {
        self.workers = Some(workers);
        self
    }

    /// Sets the number of records batched into one distributor bucket.
    pub fn with_bucket_size(mut self, bucket_size: usize) -> BigSorterBuilder {
        self.bucket_size = bucket_size;
        self
    }

    /// Sets the distributor queue depth, in buckets.
    pub fn with_queue_depth(mut self, queue_depth: usize) -> BigSorterBuilder {
        self.queue_depth = queue_depth;
        self
    }

    /// Sets the number of concurrent merge groups.
    pub fn with_merge_groups(mut self, merge_groups: usize) -> BigSorterBuilder {
        self.merge_groups = merge_groups;
        self
    }

    /// Sets the per-group merge queue depth, in records.
    pub fn with_merge_queue_depth(mut self, merge_queue_depth: usize) -> BigSorterBuilder {
        self.merge_queue_depth = merge_queue_depth;
        self
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> BigSorterBuilder {
        self.tmp_dir = Some(path.into());
        self
    }

    /// Builds a [`BigSorter`] instance using the provided configuration.
    pub fn build(self) -> Result<BigSorter, SortError> {
        let tmp_dir = match self.tmp_dir.as_deref() {
            Some(path) => tempfile::tempdir_in(path),
            None => tempfile::tempdir(),
        }
        .map_err(SortError::TempDir)?;
        log::info!("using {} as a temporary directory", tmp_dir.path().display());

        let workers = self
            .workers
            .unwrap_or_else(|| std::thread::available_parallelism().map(usize::from).unwrap_or(4));

        Ok(BigSorter {
            chunk_size: self.chunk_size,
            lines_per_run: self.lines_per_run,
            workers,
            bucket_size: self.bucket_size,
            queue_depth: self.queue_depth,
            merge_groups: self.merge_groups,
            merge_queue_depth: self.merge_queue_depth,
            tmp_dir,
        })
    }
}

impl Default for BigSorterBuilder {
    fn default() -> Self {
        BigSorterBuilder {
            chunk_size: 64 * 1024,
            lines_per_run: 200_000,
            workers: None,
            bucket_size: 128,
            queue_depth: 16,
            merge_groups: 3,
            merge_queue_depth: 1024,
            tmp_dir: None,
        }
    }
}

/// Sorts a newline-delimited text file that may not fit in memory.
///
/// Map phase: the input is read once into sorted run files, built by parallel
/// workers behind a bounded queue. Reduce phase: the runs are merged in parallel
/// groups into the output. Temporary runs live in a directory removed on drop.
pub struct BigSorter {
    chunk_size: usize,
    lines_per_run: usize,
    workers: usize,
    bucket_size: usize,
    queue_depth: usize,
    merge_groups: usize,
    merge_queue_depth: usize,
    tmp_dir: tempfile::TempDir,
}

impl BigSorter {
    /// Sorts `input` into `output` ascending by byte-lexicographic line order.
    ///
    /// The output is created or overwritten. On failure it is removed best-effort
    /// and the error identifies the failing phase and file.
    pub fn sort(&self, input: &Path, output: &Path) -> Result<(), SortError> {
        if !input.is_file() {
            return Err(SortError::InvalidInput(input.to_path_buf()));
        }
        let result = self.sort_inner(input, output);
        if result.is_err() {
            let _ = fs::remove_file(output);
        }
        result
    }

    fn sort_inner(&self, input: &Path, output: &Path) -> Result<(), SortError> {
        log::info!(
            "sorting {} ({} workers, {} lines per run, {} byte chunks)",
            input.display(),
            self.workers,
            self.lines_per_run,
            self.chunk_size,
        );

        let reader = LineReader::open(input, self.chunk_size).map_err(SortError::Map)?;
        let progress = ProgressLogger::new("bytes read", PROGRESS_LOG_INTERVAL);
        let distributor = Distributor::new(self.workers, self.bucket_size, self.queue_depth, self.lines_per_run);
        let runs = distributor.run(reader, self.tmp_dir.path(), &progress)?;
        log::info!("map phase produced {} runs from {} bytes", runs.len(), progress.total());

        match runs.len() {
            0 => {
                // no records at all; the sorted output is an empty file
                File::create(output).map_err(|err| SortError::Output(output.to_path_buf(), err))?;
                Ok(())
            }
            1 => move_run(&runs[0], output),
            _ => {
                let merger = ParallelMerger::new(self.merge_groups, self.merge_queue_depth, self.chunk_size);
                merger.merge(&runs, output)
            }
        }
    }
}

/// A single run is already the sorted output; renaming it avoids the merge
/// entirely. Falls back to a copy when the temp dir is on another filesystem.
fn move_run(run: &Path, output: &Path) -> Result<(), SortError> {
    if fs::rename(run, output).is_ok() {
        return Ok(());
    }
    fs::copy(run, output)
        .map(|_| ())
        .map_err(|err| SortError::Output(output.to_path_buf(), err))
}
