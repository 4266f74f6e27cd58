use std::path;
use std::process;

use clap::ArgEnum;
use env_logger;
use log;

use line_sort::size;
use line_sort::{ExternalSegment, ExternalSorter, RmpSegment, SortConfig, TextSegment};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let format: SegmentFormat = arg_parser.value_of_t_or_exit("format");
    let input = arg_parser.value_of("input").expect("value is required");
    let output = arg_parser.value_of("output").expect("value is required");

    let mut config = SortConfig::default();
    config.chunk_size = parse_size(arg_parser.value_of("chunk_size").expect("value has default"));
    if let Some(memory_limit) = arg_parser.value_of("memory_limit") {
        config.memory_limit = parse_size(memory_limit);
    }
    if let Some(io_buf_size) = arg_parser.value_of("io_buf_size") {
        config.io_buf_size = parse_size(io_buf_size) as usize;
    }
    if arg_parser.is_present("threads") {
        config.threads = arg_parser.value_of_t_or_exit("threads");
    }
    if let Some(tmp_dir) = arg_parser.value_of("tmp_dir") {
        config.tmp_dir = path::PathBuf::from(tmp_dir);
    }
    config.string_pool = !arg_parser.is_present("no_string_pool");

    let result = match format {
        SegmentFormat::Text => sort::<TextSegment>(config, input, output),
        SegmentFormat::Msgpack => sort::<RmpSegment>(config, input, output),
    };

    if let Err(err) = result {
        log::error!("{}", err);
        process::exit(1);
    }
}

fn sort<S: ExternalSegment>(config: SortConfig, input: &str, output: &str) -> Result<(), String> {
    let sorter: ExternalSorter<S> =
        ExternalSorter::new(config).map_err(|err| format!("sorter initialization error: {}", err))?;

    sorter
        .sort(path::Path::new(input), path::Path::new(output))
        .map_err(|err| format!("data sorting error: {}", err))?;

    return Ok(());
}

fn parse_size(value: &str) -> u64 {
    size::parse_size(value).expect("value is pre-validated")
}

fn validate_size(value: &str) -> Result<(), String> {
    size::parse_size(value).map(|_| ())
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum SegmentFormat {
    Text,
    Msgpack,
}

impl SegmentFormat {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        SegmentFormat::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for SegmentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <SegmentFormat as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("line-sort")
        .about("external merge sort of '<number>. <text>' line files")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("memory_limit")
                .short('m')
                .long("memory")
                .help("memory budget shared by all sort workers, overrides the chunk size (KB/MB/GB are binary units)")
                .takes_value(true)
                .validator(validate_size),
        )
        .arg(
            clap::Arg::new("chunk_size")
                .short('c')
                .long("chunk-size")
                .help("chunk size")
                .takes_value(true)
                .default_value("512MiB")
                .validator(validate_size),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of chunks to sort in parallel")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("io_buf_size")
                .short('b')
                .long("io-buf-size")
                .help("file read/write buffer size")
                .takes_value(true)
                .validator(validate_size),
        )
        .arg(
            clap::Arg::new("format")
                .short('f')
                .long("format")
                .help("temporary segment format")
                .takes_value(true)
                .default_value("text")
                .possible_values(SegmentFormat::possible_values()),
        )
        .arg(
            clap::Arg::new("no_string_pool")
                .long("no-string-pool")
                .help("do not share repeated texts while reading the input"),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
