//! Binary heap k-way merger.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use log;

use crate::record::Record;
use crate::segment::ExternalSegment;
use crate::sort::SortError;

/// Number of merged records between two progress reports.
const PROGRESS_INTERVAL: u64 = 1_000_000;

/// Binary heap merger implementation.
/// Merges multiple sorted inputs into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of items,
/// *n* is the number of chunks (inputs).
///
/// Equal items coming from different inputs are returned in input order.
pub struct BinaryHeapMerger<T, E, C>
where
    T: Ord,
    C: IntoIterator<Item = Result<T, E>>,
{
    // binary heap is max-heap by default so we reverse it to convert it to min-heap
    items: BinaryHeap<Reverse<(T, usize)>>,
    chunks: Vec<C::IntoIter>,
    initiated: bool,
}

impl<T, E, C> BinaryHeapMerger<T, E, C>
where
    T: Ord,
    C: IntoIterator<Item = Result<T, E>>,
{
    /// Creates an instance of a binary heap merger using chunks as inputs.
    /// Chunk items should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `chunks` - Chunks to be merged in a single sorted one
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let chunks = Vec::from_iter(chunks.into_iter().map(|c| c.into_iter()));
        let items = BinaryHeap::with_capacity(chunks.len());

        return BinaryHeapMerger {
            chunks,
            items,
            initiated: false,
        };
    }
}

impl<T, E, C> Iterator for BinaryHeapMerger<T, E, C>
where
    T: Ord,
    C: IntoIterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    /// Returns the next item from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.initiated {
            for (idx, chunk) in self.chunks.iter_mut().enumerate() {
                if let Some(item) = chunk.next() {
                    match item {
                        Ok(item) => self.items.push(Reverse((item, idx))),
                        Err(err) => return Some(Err(err)),
                    }
                }
            }
            self.initiated = true;
        }

        let Reverse((result, idx)) = self.items.pop()?;
        if let Some(item) = self.chunks[idx].next() {
            match item {
                Ok(item) => self.items.push(Reverse((item, idx))),
                Err(err) => return Some(Err(err)),
            }
        }

        return Some(Ok(result));
    }
}

/// Merges sorted segments into a single sorted `output` file.
/// Returns the number of records written.
///
/// All segments are held open during the merge and closed before returning.
pub fn merge_segments<S: ExternalSegment>(
    segments: &[PathBuf],
    output: &Path,
    buf_size: usize,
) -> Result<u64, SortError> {
    let mut readers = Vec::with_capacity(segments.len());
    for path in segments {
        let segment = S::open(path, buf_size).map_err(|source| SortError::Segment {
            path: path.clone(),
            source,
        })?;

        let path = path.clone();
        readers.push(segment.map(move |item| {
            item.map_err(|source| SortError::Segment {
                path: path.clone(),
                source,
            })
        }));
    }
    log::debug!("merging {} segments", readers.len());

    let output_file = fs::File::create(output).map_err(|err| SortError::io(output, err))?;
    let mut output_writer = io::BufWriter::with_capacity(buf_size, output_file);

    let mut written: u64 = 0;
    for record in BinaryHeapMerger::new(readers) {
        let record: Record = record?;
        record
            .write_line(&mut output_writer)
            .map_err(|err| SortError::io(output, err))?;

        written += 1;
        if written % PROGRESS_INTERVAL == 0 {
            log::info!("merging: {} records written", written);
        }
    }

    output_writer.flush().map_err(|err| SortError::io(output, err))?;

    return Ok(written);
}
