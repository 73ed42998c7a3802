//! `bigsort` is a parallel external sort for newline-delimited text files.
//!
//! External sorting handles inputs that do not fit in main memory. Sorting happens
//! in two passes: a map phase splits the input into memory-bounded sorted run
//! files, and a reduce phase merges the runs into one globally sorted output. For
//! more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! `bigsort` supports the following features:
//!
//! * **Lines larger than memory:**
//!   a line longer than the read buffer is never fully materialized; it is carried
//!   as a file region with a cached head and compared and written in chunks.
//! * **Parallel run production:**
//!   a single reader feeds sorting workers through a bounded queue, so reading,
//!   sorting and run writing overlap while memory stays bounded.
//! * **Parallel merging:**
//!   run files are merged in concurrent groups feeding bounded queues, with one
//!   final merge producing the totally ordered output.
//! * **Deterministic memory use:**
//!   worker heaps and every queue are fixed-capacity; backpressure throttles the
//!   reader instead of buffering without bound.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use bigsort::BigSorterBuilder;
//!
//! fn main() {
//!     env_logger::Builder::new().filter_level(log::LevelFilter::Info).init();
//!
//!     let sorter = BigSorterBuilder::new()
//!         .with_chunk_size(64 * 1024)
//!         .with_lines_per_run(200_000)
//!         .with_workers(4)
//!         .build()
//!         .unwrap();
//!
//!     sorter.sort(Path::new("input.txt"), Path::new("output.txt")).unwrap();
//! }
//! ```

pub mod distribute;
pub mod heap;
pub mod merge;
pub mod progress;
pub mod reader;
pub mod record;
pub mod run;
pub mod sort;

pub use distribute::Distributor;
pub use heap::BoundedHeap;
pub use merge::{FileSource, ParallelMerger, QueueSource, RecordSource, RunMerger};
pub use progress::ProgressLogger;
pub use reader::LineReader;
pub use record::Record;
pub use run::RunBuilder;
pub use sort::{BigSorter, BigSorterBuilder, SortError};
