//! Split-sort pipeline.
//!
//! A single reader thread cuts the input into chunks and hands them over to a pool of
//! sort workers through a bounded queue. The queue blocks the reader when all workers
//! are busy, which bounds the number of chunks resident in memory.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::marker::PhantomData;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use log;

use crate::buffer::{ChunkBuffer, ChunkBufferBuilder};
use crate::config::SortConfig;
use crate::record::{Record, StringPool};
use crate::segment::{segment_path, trim_line_ending, ExternalSegment};
use crate::sort::SortError;

/// Split phase result.
#[derive(Debug)]
pub struct SplitOutcome {
    /// Sorted segment paths ordered by chunk index.
    pub segments: Vec<PathBuf>,
    /// Number of records read from the input.
    pub records: u64,
}

/// Input reader statistics.
struct ReadStats {
    records: u64,
    chunks: usize,
}

/// Split-sort pipeline turning an unsorted input file into sorted segments.
pub struct SplitSortPipeline<'a, S> {
    config: &'a SortConfig,
    thread_pool: &'a rayon::ThreadPool,
    segment_dir: &'a Path,

    segment_type: PhantomData<fn() -> S>,
}

impl<'a, S> SplitSortPipeline<'a, S>
where
    S: ExternalSegment,
{
    /// Creates a pipeline writing segments to `segment_dir`.
    /// Chunks are sorted on `thread_pool`.
    pub fn new(config: &'a SortConfig, thread_pool: &'a rayon::ThreadPool, segment_dir: &'a Path) -> Self {
        SplitSortPipeline {
            config,
            thread_pool,
            segment_dir,
            segment_type: PhantomData,
        }
    }

    /// Splits `input` into sorted segments.
    /// Returns after every chunk has been sorted and persisted.
    pub fn run(&self, input: &Path) -> Result<SplitOutcome, SortError> {
        let workers = self.config.threads.max(1);
        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded::<ChunkBuffer>(workers);
        let segments = Mutex::new(BTreeMap::new());
        let aborted = AtomicBool::new(false);

        let (read_result, sort_results) = thread::scope(|scope| {
            let reader = thread::Builder::new()
                .name("chunk-reader".to_string())
                .spawn_scoped(scope, || self.read_chunks(input, chunk_tx, &aborted))
                .map_err(|err| SortError::io(input, err))?;

            let mut sorters = Vec::with_capacity(workers);
            for worker in 0..workers {
                let chunk_rx = chunk_rx.clone();
                let (segments, aborted) = (&segments, &aborted);
                let sorter = thread::Builder::new()
                    .name(format!("chunk-sorter-{}", worker))
                    .spawn_scoped(scope, move || self.sort_chunks(chunk_rx, segments, aborted));

                match sorter {
                    Ok(sorter) => sorters.push(sorter),
                    Err(err) => {
                        aborted.store(true, Ordering::Relaxed);
                        log::error!("sort worker {} not started: {}", worker, err);
                        break;
                    }
                }
            }
            // the reader must see a disconnected queue once every worker is gone
            drop(chunk_rx);

            let read_result = join(reader);
            let sort_results = Vec::from_iter(sorters.into_iter().map(join));

            Ok((read_result, sort_results))
        })?;

        for result in sort_results {
            result?;
        }
        let stats = read_result?;

        let segments = segments.into_inner().unwrap_or_else(PoisonError::into_inner);
        if segments.len() != stats.chunks {
            return Err(SortError::io(
                self.segment_dir,
                io::Error::new(
                    io::ErrorKind::Other,
                    format!("{} of {} chunks persisted", segments.len(), stats.chunks),
                ),
            ));
        }

        log::info!("total chunks created: {}", stats.chunks);

        return Ok(SplitOutcome {
            segments: segments.into_values().collect(),
            records: stats.records,
        });
    }

    fn read_chunks(
        &self,
        input: &Path,
        chunk_tx: Sender<ChunkBuffer>,
        aborted: &AtomicBool,
    ) -> Result<ReadStats, SortError> {
        let input_file = fs::File::open(input).map_err(|err| SortError::io(input, err))?;
        let mut input_reader = io::BufReader::with_capacity(self.config.io_buf_size, input_file);

        let mut buffer_builder = ChunkBufferBuilder::new(self.config.effective_chunk_size());
        let mut string_pool = self.config.string_pool.then(StringPool::new);
        let mut chunk_buf = buffer_builder.build();

        let mut records: u64 = 0;
        let mut line_number: u64 = 0;
        let mut raw_line = Vec::new();

        loop {
            raw_line.clear();
            let read = input_reader
                .read_until(b'\n', &mut raw_line)
                .map_err(|err| SortError::io(input, err))?;
            if read == 0 {
                break;
            }
            line_number += 1;

            let line = trim_line_ending(&raw_line);
            if line.is_empty() {
                continue;
            }

            let record = match string_pool.as_mut() {
                Some(pool) => Record::parse_pooled(line, pool),
                None => Record::parse(line),
            }
            .map_err(|source| SortError::MalformedRecord {
                line: line_number,
                source,
            })?;

            chunk_buf.push(record, line.len());
            records += 1;

            if chunk_buf.is_full() {
                let full_buf = mem::replace(&mut chunk_buf, buffer_builder.build());
                if !Self::hand_off(&chunk_tx, full_buf, aborted) {
                    return Ok(ReadStats {
                        records,
                        chunks: buffer_builder.built(),
                    });
                }
            }
        }

        // the last buffer index is only consumed if the buffer is handed off
        let mut chunks = buffer_builder.built() - 1;
        if !chunk_buf.is_empty() {
            Self::hand_off(&chunk_tx, chunk_buf, aborted);
            chunks += 1;
        }

        if let Some(pool) = string_pool {
            log::debug!("string pool held {} distinct texts", pool.len());
        }

        return Ok(ReadStats { records, chunks });
    }

    fn hand_off(chunk_tx: &Sender<ChunkBuffer>, chunk_buf: ChunkBuffer, aborted: &AtomicBool) -> bool {
        if aborted.load(Ordering::Relaxed) {
            return false;
        }

        log::debug!(
            "chunk {} read ({} records, {} bytes)",
            chunk_buf.index(),
            chunk_buf.len(),
            chunk_buf.mem_size()
        );

        return chunk_tx.send(chunk_buf).is_ok();
    }

    fn sort_chunks(
        &self,
        chunk_rx: Receiver<ChunkBuffer>,
        segments: &Mutex<BTreeMap<usize, PathBuf>>,
        aborted: &AtomicBool,
    ) -> Result<(), SortError> {
        for chunk_buf in chunk_rx.iter() {
            if aborted.load(Ordering::Relaxed) {
                continue;
            }

            if let Err(err) = self.persist_chunk(chunk_buf, segments) {
                aborted.store(true, Ordering::Relaxed);
                return Err(err);
            }
        }

        return Ok(());
    }

    fn persist_chunk(
        &self,
        mut chunk_buf: ChunkBuffer,
        segments: &Mutex<BTreeMap<usize, PathBuf>>,
    ) -> Result<(), SortError> {
        let index = chunk_buf.index();

        log::debug!("sorting chunk {} ...", index);
        self.thread_pool.install(|| chunk_buf.sort());

        let path = segment_path::<S>(self.segment_dir, index);
        S::build(&path, chunk_buf.as_slice(), self.config.io_buf_size).map_err(|source| SortError::Segment {
            path: path.clone(),
            source,
        })?;
        log::debug!("chunk {} sorted and written ({} records)", index, chunk_buf.len());

        // release chunk memory before taking the lock
        drop(chunk_buf);

        segments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index, path);

        return Ok(());
    }
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, T>) -> T {
    match handle.join() {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
