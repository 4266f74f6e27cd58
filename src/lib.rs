//! `line-sort` is an external merge sort for text files of `<number>. <text>` lines.
//!
//! Lines are ordered by their text compared byte-wise and then by their number. Files far larger
//! than the available memory are supported: sorting is achieved in two passes. During the first pass
//! the input is cut into chunks that each fit in RAM, chunks are sorted in parallel and persisted
//! to temporary segment files. During the second pass all segments are merged together into
//! the output file. For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! `line-sort` supports the following features:
//!
//! * **Pipelined splitting:**
//!   a single reader cuts the input while a pool of workers sorts and persists previous chunks.
//!   A bounded hand-off queue throttles the reader so only a fixed number of chunks stays resident.
//! * **Memory limit support:**
//!   the chunk size is either set directly or derived from a memory budget shared by all workers.
//! * **Segment format agnostic:**
//!   segments are stored as text lines by default, `MessagePack` segments are available through
//!   [`RmpSegment`] and custom formats can be plugged in by implementing [`ExternalSegment`].
//! * **Text deduplication:**
//!   repeated texts share a single allocation while the input is read.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use line_sort::{ExternalSorter, ExternalSorterBuilder};
//!
//! fn main() {
//!     let sorter: ExternalSorter = ExternalSorterBuilder::new()
//!         .with_tmp_dir(Path::new("./chunks"))
//!         .with_memory_limit(2 * 1024 * 1024 * 1024)
//!         .build()
//!         .unwrap();
//!
//!     let report = sorter.sort(Path::new("in.txt"), Path::new("out.txt")).unwrap();
//!     println!("{} records sorted in {:?}", report.records, report.total_time);
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod merger;
pub mod pipeline;
pub mod record;
pub mod segment;
#[cfg(feature = "bytesize")]
pub mod size;
pub mod sort;

pub use buffer::{ChunkBuffer, ChunkBufferBuilder};
pub use config::SortConfig;
pub use merger::{merge_segments, BinaryHeapMerger};
pub use pipeline::{SplitOutcome, SplitSortPipeline};
pub use record::{ParseError, Record, StringPool};
pub use segment::{ExternalSegment, RmpSegment, SegmentError, TextSegment};
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortPhase, SortReport};
