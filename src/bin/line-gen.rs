use std::fs;
use std::io::{self, prelude::*};
use std::process;
use std::time::Instant;

use bytesize::ByteSize;
use env_logger;
use log;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use line_sort::size::parse_size;
use line_sort::Record;

const WORDS: [&str; 30] = [
    "Apple",
    "Banana",
    "Cherry",
    "Dragon fruit",
    "Elderberry",
    "Fig",
    "Grape",
    "Honeydew",
    "Indian fig",
    "Jackfruit",
    "Kiwi",
    "Lemon",
    "Mango",
    "Nectarine",
    "Orange",
    "Papaya",
    "Quince",
    "Raspberry",
    "Strawberry",
    "Tangerine",
    "something",
    "is the best",
    "is yellow",
    "is great",
    "is awesome",
    "tastes good",
    "very delicious",
    "fresh and ripe",
    "organic",
    "tropical",
];

fn main() {
    let arg_parser = build_arg_parser();

    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_millis()
        .init();

    let output = arg_parser.value_of("output").expect("value is required");
    let size = arg_parser.value_of("size").expect("value is required");
    let size = parse_size(size).expect("value is pre-validated");
    let seed: u64 = arg_parser.value_of_t_or_exit("seed");
    let phrases: usize = arg_parser.value_of_t_or_exit("phrases");

    if let Err(err) = generate(output, size, seed, phrases.max(1)) {
        log::error!("file generation error: {}", err);
        process::exit(1);
    }
}

fn generate(output: &str, size: u64, seed: u64, phrases: usize) -> io::Result<()> {
    log::info!("generating {} of records into {}", ByteSize(size), output);
    let start = Instant::now();

    let mut rng = StdRng::seed_from_u64(seed);
    let phrases = Vec::from_iter((0..phrases).map(|_| {
        let words = Vec::from_iter((0..rng.gen_range(1..5)).map(|_| WORDS[rng.gen_range(0..WORDS.len())]));
        words.join(" ")
    }));

    let mut output_writer = io::BufWriter::with_capacity(128 * 1024, fs::File::create(output)?);
    let mut written: u64 = 0;
    let mut lines: u64 = 0;
    let mut reported_percent = 0;

    let mut line = Vec::new();
    while written < size {
        let record = Record::new(
            rng.gen_range(1..1_000_000_000),
            phrases[rng.gen_range(0..phrases.len())].as_str(),
        );

        line.clear();
        record.write_line(&mut line)?;
        output_writer.write_all(&line)?;

        written += line.len() as u64;
        lines += 1;

        let percent = (written.min(size) * 100 / size) as u32;
        if percent >= reported_percent + 5 {
            reported_percent = percent - percent % 5;
            log::info!("progress: {}% ({} / {})", reported_percent, ByteSize(written), ByteSize(size));
        }
    }
    output_writer.flush()?;

    log::info!(
        "done: {} lines, {}, {:?}",
        lines,
        ByteSize(written),
        start.elapsed()
    );

    return Ok(());
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("line-gen")
        .about("random '<number>. <text>' line file generator")
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("file to be generated")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("size")
                .short('s')
                .long("size")
                .help("target file size (KB/MB/GB are binary units)")
                .required(true)
                .takes_value(true)
                .validator(|v| parse_size(v).map(|_| ())),
        )
        .arg(
            clap::Arg::new("seed")
                .long("seed")
                .help("random generator seed")
                .takes_value(true)
                .default_value("42"),
        )
        .arg(
            clap::Arg::new("phrases")
                .long("phrases")
                .help("number of distinct texts to draw from")
                .takes_value(true)
                .default_value("1000"),
        )
        .get_matches()
}
