//! Chunk buffers limited by the raw input size of their records.

use rayon;
use rayon::slice::ParallelSliceMut;

use crate::record::Record;

/// Average raw line length used to estimate how many records a chunk holds.
const AVG_LINE_LEN: u64 = 35;
/// Upper bound of records preallocated per chunk, the buffer grows past it on demand.
const MAX_PREALLOCATED_RECORDS: usize = 1 << 20;

/// Chunk buffer builder. Hands out buffers with consecutive chunk indexes starting from zero.
pub struct ChunkBufferBuilder {
    size_limit: u64,
    capacity: usize,
    next_index: usize,
}

impl ChunkBufferBuilder {
    /// Creates a builder of buffers holding `size_limit` bytes of raw input each.
    pub fn new(size_limit: u64) -> Self {
        let estimated = (size_limit / AVG_LINE_LEN).max(1);

        ChunkBufferBuilder {
            size_limit,
            capacity: usize::try_from(estimated).map_or(MAX_PREALLOCATED_RECORDS, |n| n.min(MAX_PREALLOCATED_RECORDS)),
            next_index: 0,
        }
    }

    /// Creates a new buffer under the next chunk index.
    pub fn build(&mut self) -> ChunkBuffer {
        let buffer = ChunkBuffer::with_capacity(self.next_index, self.size_limit, self.capacity);
        self.next_index += 1;

        return buffer;
    }

    /// Number of buffers built so far.
    pub fn built(&self) -> usize {
        self.next_index
    }
}

/// In-memory chunk of records.
///
/// The size is tracked as line length plus one byte per record, which matches the
/// input size for single-byte encodings and is close enough for pacing otherwise.
pub struct ChunkBuffer {
    index: usize,
    limit: u64,
    current_size: u64,
    inner: Vec<Record>,
}

impl ChunkBuffer {
    pub fn new(index: usize, limit: u64) -> Self {
        ChunkBuffer {
            index,
            limit,
            current_size: 0,
            inner: Vec::new(),
        }
    }

    pub fn with_capacity(index: usize, limit: u64, capacity: usize) -> Self {
        ChunkBuffer {
            index,
            limit,
            current_size: 0,
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Adds a record parsed from a line of `line_len` bytes.
    pub fn push(&mut self, record: Record, line_len: usize) {
        self.current_size += line_len as u64 + 1;
        self.inner.push(record);
    }

    /// Chunk index assigned at creation.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Estimated raw input size of the buffered records.
    pub fn mem_size(&self) -> u64 {
        self.current_size
    }

    /// Checks if the buffer reached the limit.
    pub fn is_full(&self) -> bool {
        self.current_size >= self.limit
    }

    /// Sorts buffered records in parallel on the current rayon pool.
    pub fn sort(&mut self) {
        self.par_sort_unstable();
    }

    pub fn as_slice(&self) -> &[Record] {
        self.inner.as_slice()
    }
}

impl IntoIterator for ChunkBuffer {
    type Item = Record;
    type IntoIter = <Vec<Record> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl rayon::slice::ParallelSliceMut<Record> for ChunkBuffer {
    fn as_parallel_slice_mut(&mut self) -> &mut [Record] {
        self.inner.as_mut_slice()
    }
}
