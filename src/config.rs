//! Sorting configuration.

use std::env;
use std::path::PathBuf;
use std::thread;

/// Default chunk size: 512 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 512 * 1024 * 1024;
/// Default segment and input/output read/write buffer size: 128 KiB.
pub const DEFAULT_IO_BUF_SIZE: usize = 128 * 1024;

/// External sort configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortConfig {
    /// Raw input bytes accumulated into a single chunk. Used when `memory_limit` is zero.
    pub chunk_size: u64,
    /// Total memory budget shared by all sort workers. Zero disables the budget.
    pub memory_limit: u64,
    /// Read/write buffer size of input, output and segment files.
    pub io_buf_size: usize,
    /// Directory under which per-run temporary directories are created.
    pub tmp_dir: PathBuf,
    /// Number of chunks sorted in parallel, also the hand-off queue capacity.
    pub threads: usize,
    /// Share a single instance of repeated texts while reading the input.
    ///
    /// The pool lives for the whole split phase and is not counted against `chunk_size` or
    /// `memory_limit`: with mostly unique texts it keeps every distinct text alive until the
    /// input is fully read. Disable it for such inputs.
    pub string_pool: bool,
}

impl SortConfig {
    /// Chunk size actually used to cut the input.
    pub fn effective_chunk_size(&self) -> u64 {
        if self.memory_limit > 0 {
            self.memory_limit / self.threads.max(1) as u64
        } else {
            self.chunk_size
        }
    }
}

impl Default for SortConfig {
    fn default() -> Self {
        SortConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            memory_limit: 0,
            io_buf_size: DEFAULT_IO_BUF_SIZE,
            tmp_dir: env::temp_dir(),
            threads: thread::available_parallelism().map_or(1, |n| n.get()),
            string_pool: true,
        }
    }
}
