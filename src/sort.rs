//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::SortConfig;
use crate::merger::merge_segments;
use crate::pipeline::SplitSortPipeline;
use crate::record::ParseError;
use crate::segment::{ExternalSegment, SegmentError, TextSegment};

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Input file does not exist.
    InputNotFound(PathBuf),
    /// Input line can't be parsed as a record.
    MalformedRecord { line: u64, source: ParseError },
    /// Temporary directory creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Input or output file I/O error.
    IO { path: PathBuf, source: io::Error },
    /// Segment write or read error.
    Segment { path: PathBuf, source: SegmentError },
}

impl SortError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        SortError::IO {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::InputNotFound(_) => None,
            SortError::MalformedRecord { source, .. } => Some(source),
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::IO { source, .. } => Some(source),
            SortError::Segment { source, .. } => Some(source),
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InputNotFound(path) => write!(f, "input file {} not found", path.display()),
            SortError::MalformedRecord { line, source } => write!(f, "malformed record at line {}: {}", line, source),
            SortError::TempDir(err) => write!(f, "temporary directory not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::IO { path, source } => write!(f, "I/O operation on {} failed: {}", path.display(), source),
            SortError::Segment { path, source } => write!(f, "segment {} error: {}", path.display(), source),
        }
    }
}

/// Sorting phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortPhase {
    Idle,
    Splitting,
    Merging,
    CleaningUp,
    Done,
    Failed,
}

impl Display for SortPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortPhase::Idle => "idle",
            SortPhase::Splitting => "splitting",
            SortPhase::Merging => "merging",
            SortPhase::CleaningUp => "cleaning up",
            SortPhase::Done => "done",
            SortPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Summary of a finished sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortReport {
    /// Number of sorted segments the input was split into.
    pub segments: usize,
    /// Number of records sorted.
    pub records: u64,
    pub input_bytes: u64,
    pub output_bytes: u64,
    /// Split and sort phase duration.
    pub split_time: Duration,
    /// Merge phase duration.
    pub merge_time: Duration,
    pub total_time: Duration,
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<S = TextSegment>
where
    S: ExternalSegment,
{
    /// Sorting configuration.
    config: SortConfig,

    /// Segment type.
    segment_type: PhantomData<fn() -> S>,
}

impl<S> ExternalSorterBuilder<S>
where
    S: ExternalSegment,
{
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<S>, SortError> {
        ExternalSorter::new(self.config)
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: SortConfig) -> ExternalSorterBuilder<S> {
        self.config = config;
        return self;
    }

    /// Sets number of chunks to be sorted in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<S> {
        self.config.threads = threads_number.max(1);
        return self;
    }

    /// Sets directory under which temporary data is stored.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<S> {
        self.config.tmp_dir = path.into();
        return self;
    }

    /// Sets raw input size of a single chunk.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> ExternalSorterBuilder<S> {
        self.config.chunk_size = chunk_size;
        return self;
    }

    /// Sets memory budget shared by all sort workers. Overrides the chunk size.
    pub fn with_memory_limit(mut self, memory_limit: u64) -> ExternalSorterBuilder<S> {
        self.config.memory_limit = memory_limit;
        return self;
    }

    /// Sets input, output and segment read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<S> {
        self.config.io_buf_size = buf_size;
        return self;
    }

    /// Enables or disables sharing of repeated texts.
    pub fn with_string_pool(mut self, enabled: bool) -> ExternalSorterBuilder<S> {
        self.config.string_pool = enabled;
        return self;
    }
}

impl<S> Default for ExternalSorterBuilder<S>
where
    S: ExternalSegment,
{
    fn default() -> Self {
        ExternalSorterBuilder {
            config: SortConfig::default(),
            segment_type: PhantomData,
        }
    }
}

/// External sorter.
pub struct ExternalSorter<S = TextSegment>
where
    S: ExternalSegment,
{
    /// Chunk sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Sorting configuration.
    config: SortConfig,

    /// Segment type.
    segment_type: PhantomData<fn() -> S>,
}

impl<S> ExternalSorter<S>
where
    S: ExternalSegment,
{
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `config` - Sorting configuration. A zero thread number is treated as one.
    pub fn new(mut config: SortConfig) -> Result<Self, SortError> {
        config.threads = config.threads.max(1);

        return Ok(ExternalSorter {
            thread_pool: Self::init_thread_pool(config.threads)?,
            config,
            segment_type: PhantomData,
        });
    }

    fn init_thread_pool(threads_number: usize) -> Result<rayon::ThreadPool, SortError> {
        log::info!("initializing thread-pool (threads: {})", threads_number);

        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads_number)
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory(&self) -> Result<tempfile::TempDir, SortError> {
        fs::create_dir_all(&self.config.tmp_dir).map_err(|err| SortError::TempDir(err))?;

        let tmp_dir = tempfile::Builder::new()
            .prefix("line-sort-")
            .tempdir_in(&self.config.tmp_dir)
            .map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a temporary directory", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Sorting configuration in use.
    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    /// Sorts `input` file records into `output` file.
    ///
    /// # Arguments
    /// * `input` - File to be sorted
    /// * `output` - File to write sorted records to, created or truncated
    pub fn sort(&self, input: &Path, output: &Path) -> Result<SortReport, SortError> {
        let mut phase = SortPhase::Idle;

        match self.run(input, output, &mut phase) {
            Ok(report) => Ok(report),
            Err(err) => {
                log::error!("sorting failed while {}: {}", phase, err);
                transition(&mut phase, SortPhase::Failed);
                Err(err)
            }
        }
    }

    fn run(&self, input: &Path, output: &Path, phase: &mut SortPhase) -> Result<SortReport, SortError> {
        if !input.is_file() {
            return Err(SortError::InputNotFound(input.to_path_buf()));
        }

        let total_start = Instant::now();

        log::info!("input file: {}", input.display());
        log::info!("output file: {}", output.display());
        if self.config.memory_limit > 0 {
            log::info!("memory limit: {} bytes", self.config.memory_limit);
        }
        log::info!("chunk size: {} bytes", self.config.effective_chunk_size());
        log::info!("parallelism: {}", self.config.threads);

        let tmp_dir = self.init_tmp_directory()?;

        let result = self.split_and_merge(input, output, tmp_dir.path(), phase);
        if result.is_ok() {
            transition(phase, SortPhase::CleaningUp);
        }
        close_tmp_directory(tmp_dir);

        let mut report = result?;
        report.total_time = total_start.elapsed();
        transition(phase, SortPhase::Done);

        log::info!("sorting complete");
        log::info!("  total time: {:?}", report.total_time);
        log::info!("  phase 1 (split+sort): {:?}", report.split_time);
        log::info!("  phase 2 (merge): {:?}", report.merge_time);
        log::info!("  input size: {} bytes", report.input_bytes);
        log::info!("  output size: {} bytes", report.output_bytes);

        return Ok(report);
    }

    fn split_and_merge(
        &self,
        input: &Path,
        output: &Path,
        tmp_dir: &Path,
        phase: &mut SortPhase,
    ) -> Result<SortReport, SortError> {
        transition(phase, SortPhase::Splitting);
        log::info!("phase 1: splitting and sorting chunks ...");
        let split_start = Instant::now();

        let pipeline: SplitSortPipeline<S> = SplitSortPipeline::new(&self.config, &self.thread_pool, tmp_dir);
        let split = pipeline.run(input)?;

        let split_time = split_start.elapsed();
        log::info!("phase 1 complete in {:?}", split_time);

        transition(phase, SortPhase::Merging);
        log::info!("phase 2: merging {} sorted chunks ...", split.segments.len());
        let merge_start = Instant::now();

        let written = merge_segments::<S>(&split.segments, output, self.config.io_buf_size)?;

        let merge_time = merge_start.elapsed();
        log::info!("phase 2 complete in {:?}, {} records written", merge_time, written);

        return Ok(SortReport {
            segments: split.segments.len(),
            records: written,
            input_bytes: file_len(input),
            output_bytes: file_len(output),
            split_time,
            merge_time,
            total_time: Duration::ZERO,
        });
    }
}

/// Removes the run directory with all remaining segments, on success and failure alike.
fn close_tmp_directory(tmp_dir: tempfile::TempDir) {
    let tmp_path = tmp_dir.path().to_path_buf();
    if let Err(err) = tmp_dir.close() {
        log::warn!("could not delete temporary directory {}: {}", tmp_path.display(), err);
    }
}

fn transition(phase: &mut SortPhase, next: SortPhase) {
    log::debug!("sort phase: {} -> {}", phase, next);
    *phase = next;
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map_or(0, |metadata| metadata.len())
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::prelude::*;
    use std::path::{Path, PathBuf};

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::*;

    use super::{ExternalSorter, ExternalSorterBuilder, SortError};
    use crate::record::Record;
    use crate::segment::{ExternalSegment, RmpSegment, TextSegment};

    struct Workspace {
        dir: tempfile::TempDir,
        tmp_root: tempfile::TempDir,
    }

    impl Workspace {
        fn input(&self) -> PathBuf {
            self.dir.path().join("input.txt")
        }

        fn output(&self) -> PathBuf {
            self.dir.path().join("output.txt")
        }

        fn write_input(&self, lines: &[&str]) -> PathBuf {
            let mut file = fs::File::create(self.input()).unwrap();
            for line in lines {
                writeln!(file, "{}", line).unwrap();
            }
            self.input()
        }

        fn read_output(&self) -> Vec<String> {
            Vec::from_iter(fs::read_to_string(self.output()).unwrap().lines().map(String::from))
        }

        fn sorter<S: ExternalSegment>(&self, chunk_size: u64) -> ExternalSorter<S> {
            ExternalSorterBuilder::new()
                .with_chunk_size(chunk_size)
                .with_threads_number(2)
                .with_rw_buf_size(256)
                .with_tmp_dir(self.tmp_root.path())
                .build()
                .unwrap()
        }
    }

    #[fixture]
    fn workspace() -> Workspace {
        Workspace {
            dir: tempfile::tempdir().unwrap(),
            tmp_root: tempfile::tempdir().unwrap(),
        }
    }

    fn sort_lines(workspace: &Workspace, input: &[&str], chunk_size: u64) -> Vec<String> {
        workspace.write_input(input);
        workspace
            .sorter::<TextSegment>(chunk_size)
            .sort(&workspace.input(), &workspace.output())
            .unwrap();
        workspace.read_output()
    }

    fn is_empty_dir(path: &Path) -> bool {
        fs::read_dir(path).unwrap().next().is_none()
    }

    #[rstest]
    #[case(16)]
    #[case(1024)]
    fn test_sort_example(workspace: Workspace, #[case] chunk_size: u64) {
        let input = [
            "415. Apple",
            "30432. Something something something",
            "1. Apple",
            "32. Cherry is the best",
            "2. Banana is yellow",
        ];

        let report_input = workspace.write_input(&input);
        let report = workspace
            .sorter::<TextSegment>(chunk_size)
            .sort(&report_input, &workspace.output())
            .unwrap();

        assert_eq!(
            workspace.read_output(),
            vec![
                "1. Apple",
                "415. Apple",
                "2. Banana is yellow",
                "32. Cherry is the best",
                "30432. Something something something",
            ]
        );
        assert_eq!(report.records, 5);
        assert_eq!(report.input_bytes, report.output_bytes);
        if chunk_size == 16 {
            assert!(report.segments > 1);
        } else {
            assert_eq!(report.segments, 1);
        }
        assert!(is_empty_dir(workspace.tmp_root.path()));
    }

    #[rstest]
    fn test_sort_single_line(workspace: Workspace) {
        assert_eq!(sort_lines(&workspace, &["1. Hello"], 1024), vec!["1. Hello"]);
    }

    #[rstest]
    fn test_sort_same_text(workspace: Workspace) {
        let input = ["100. Same", "1. Same", "50. Same", "10. Same"];

        assert_eq!(
            sort_lines(&workspace, &input, 18),
            vec!["1. Same", "10. Same", "50. Same", "100. Same"]
        );
    }

    #[rstest]
    fn test_sort_empty_file(workspace: Workspace) {
        fs::write(workspace.input(), "").unwrap();

        let report = workspace
            .sorter::<TextSegment>(1024)
            .sort(&workspace.input(), &workspace.output())
            .unwrap();

        assert_eq!(report.segments, 0);
        assert_eq!(report.records, 0);
        assert_eq!(fs::read_to_string(workspace.output()).unwrap(), "");
    }

    #[rstest]
    fn test_sort_blank_lines(workspace: Workspace) {
        fs::write(workspace.input(), "\n2. b\n\n1. a\r\n\n").unwrap();

        let sorter = workspace.sorter::<TextSegment>(4);
        sorter.sort(&workspace.input(), &workspace.output()).unwrap();

        assert_eq!(workspace.read_output(), vec!["1. a", "2. b"]);
    }

    fn random_input(count: usize) -> (Vec<String>, Vec<Record>) {
        let mut rng = StdRng::seed_from_u64(42);

        let records = Vec::from_iter(
            (0..count).map(|_| Record::new(rng.gen_range(1..100_000), format!("Word{}", rng.gen_range(1..50)))),
        );
        let lines = Vec::from_iter(records.iter().map(Record::to_string));

        (lines, records)
    }

    #[rstest]
    #[case::text(false)]
    #[case::msgpack(true)]
    fn test_sort_random(workspace: Workspace, #[case] msgpack: bool) {
        let (lines, mut expected) = random_input(1000);
        workspace.write_input(&Vec::from_iter(lines.iter().map(String::as_str)));
        expected.sort();

        let report = if msgpack {
            workspace.sorter::<RmpSegment>(2 * 1024).sort(&workspace.input(), &workspace.output())
        } else {
            workspace.sorter::<TextSegment>(2 * 1024).sort(&workspace.input(), &workspace.output())
        }
        .unwrap();

        assert!(report.segments > 1);
        assert_eq!(report.records, 1000);
        assert_eq!(workspace.read_output(), Vec::from_iter(expected.iter().map(Record::to_string)));
    }

    #[rstest]
    fn test_sort_chunk_size_independence(workspace: Workspace) {
        let (lines, _) = random_input(150);
        let lines = Vec::from_iter(lines.iter().map(String::as_str));

        let single_chunk = sort_lines(&workspace, &lines, u64::MAX);
        let many_chunks = sort_lines(&workspace, &lines, 64);
        let record_per_chunk = sort_lines(&workspace, &lines, 0);

        assert_eq!(single_chunk, many_chunks);
        assert_eq!(single_chunk, record_per_chunk);
    }

    #[rstest]
    fn test_sort_idempotence(workspace: Workspace) {
        let (lines, _) = random_input(200);
        let lines = Vec::from_iter(lines.iter().map(String::as_str));

        let sorted = sort_lines(&workspace, &lines, 128);
        let sorted_twice = sort_lines(&workspace, &Vec::from_iter(sorted.iter().map(String::as_str)), 128);

        assert_eq!(sorted, sorted_twice);
        assert_eq!(
            fs::read_to_string(workspace.input()).unwrap(),
            fs::read_to_string(workspace.output()).unwrap()
        );
    }

    #[rstest]
    fn test_sort_memory_limit(workspace: Workspace) {
        let (lines, mut expected) = random_input(100);
        workspace.write_input(&Vec::from_iter(lines.iter().map(String::as_str)));
        expected.sort();

        let sorter: ExternalSorter = ExternalSorterBuilder::new()
            .with_memory_limit(512)
            .with_threads_number(4)
            .with_tmp_dir(workspace.tmp_root.path())
            .build()
            .unwrap();
        assert_eq!(sorter.config().effective_chunk_size(), 128);

        let report = sorter.sort(&workspace.input(), &workspace.output()).unwrap();

        assert!(report.segments > 1);
        assert_eq!(workspace.read_output(), Vec::from_iter(expected.iter().map(Record::to_string)));
    }

    #[rstest]
    fn test_sort_input_not_found(workspace: Workspace) {
        let result = workspace
            .sorter::<TextSegment>(1024)
            .sort(&workspace.input(), &workspace.output());

        assert!(matches!(result, Err(SortError::InputNotFound(path)) if path == workspace.input()));
        assert!(!workspace.output().exists());
        assert!(is_empty_dir(workspace.tmp_root.path()));
    }

    #[rstest]
    fn test_sort_malformed_input(workspace: Workspace) {
        workspace.write_input(&["1. Apple", "Banana", "2. Cherry"]);

        let result = workspace
            .sorter::<TextSegment>(1024)
            .sort(&workspace.input(), &workspace.output());

        assert!(matches!(result, Err(SortError::MalformedRecord { line: 2, .. })));
        assert!(is_empty_dir(workspace.tmp_root.path()));
    }

    #[rstest]
    fn test_sort_unwritable_output(workspace: Workspace) {
        workspace.write_input(&["2. b", "1. a", "3. c"]);
        let output = workspace.dir.path().join("missing").join("output.txt");

        let result = workspace.sorter::<TextSegment>(1).sort(&workspace.input(), &output);

        assert!(matches!(result, Err(SortError::IO { path, .. }) if path == output));
        assert!(is_empty_dir(workspace.tmp_root.path()));
    }

    #[rstest]
    fn test_sort_non_utf8_text(workspace: Workspace) {
        fs::write(workspace.input(), b"2. Caf\xe9\n1. Apple\n3. Caf\xc3\xa9\n").unwrap();

        workspace
            .sorter::<TextSegment>(8)
            .sort(&workspace.input(), &workspace.output())
            .unwrap();

        assert_eq!(
            fs::read(workspace.output()).unwrap(),
            b"1. Apple\n3. Caf\xc3\xa9\n2. Caf\xe9\n"
        );
    }

    #[rstest]
    fn test_sort_key_whitespace(workspace: Workspace) {
        fs::write(workspace.input(), " 2. Banana\n1 . Apple\n\t3. Apple\n").unwrap();

        let sorter = workspace.sorter::<TextSegment>(1024);
        sorter.sort(&workspace.input(), &workspace.output()).unwrap();

        assert_eq!(workspace.read_output(), vec!["1. Apple", "3. Apple", "2. Banana"]);
    }

    #[rstest]
    #[case::pooled(true)]
    #[case::unpooled(false)]
    fn test_sort_string_pool(workspace: Workspace, #[case] string_pool: bool) {
        let (lines, mut expected) = random_input(200);
        workspace.write_input(&Vec::from_iter(lines.iter().map(String::as_str)));
        expected.sort();

        let sorter: ExternalSorter = ExternalSorterBuilder::new()
            .with_chunk_size(256)
            .with_threads_number(2)
            .with_string_pool(string_pool)
            .with_tmp_dir(workspace.tmp_root.path())
            .build()
            .unwrap();
        assert_eq!(sorter.config().string_pool, string_pool);

        sorter.sort(&workspace.input(), &workspace.output()).unwrap();

        assert_eq!(workspace.read_output(), Vec::from_iter(expected.iter().map(Record::to_string)));
    }

    #[rstest]
    fn test_sort_creates_tmp_dir(workspace: Workspace) {
        workspace.write_input(&["2. b", "1. a"]);
        let tmp_dir = workspace.tmp_root.path().join("nested").join("chunks");

        let sorter: ExternalSorter = ExternalSorterBuilder::new()
            .with_chunk_size(1)
            .with_tmp_dir(&tmp_dir)
            .build()
            .unwrap();
        sorter.sort(&workspace.input(), &workspace.output()).unwrap();

        assert_eq!(workspace.read_output(), vec!["1. a", "2. b"]);
        assert!(is_empty_dir(&tmp_dir));
    }
}
