use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;

use bigsort::BigSorterBuilder;

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let input = arg_parser.value_of("input").expect("value is required");
    let output = arg_parser.value_of("output").expect("value is required");
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");

    let chunk_size = arg_parser.value_of("chunk_size").expect("value has a default");
    let chunk_size = chunk_size.parse::<ByteSize>().expect("value is pre-validated").as_u64() as usize;
    let lines_per_run: usize = arg_parser.value_of_t_or_exit("lines_per_run");
    let bucket_size: usize = arg_parser.value_of_t_or_exit("bucket_size");
    let queue_depth: usize = arg_parser.value_of_t_or_exit("queue_depth");
    let merge_groups: usize = arg_parser.value_of_t_or_exit("merge_groups");
    let merge_queue_depth: usize = arg_parser.value_of_t_or_exit("merge_queue_depth");
    let workers: Option<usize> = arg_parser
        .is_present("workers")
        .then(|| arg_parser.value_of_t_or_exit("workers"));

    let mut sorter_builder = BigSorterBuilder::new()
        .with_chunk_size(chunk_size)
        .with_lines_per_run(lines_per_run)
        .with_bucket_size(bucket_size)
        .with_queue_depth(queue_depth)
        .with_merge_groups(merge_groups)
        .with_merge_queue_depth(merge_queue_depth);

    if let Some(workers) = workers {
        sorter_builder = sorter_builder.with_workers(workers);
    }
    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    let sorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = sorter.sort(path::Path::new(input), path::Path::new(output)) {
        log::error!("sorting error: {}", err);
        process::exit(1);
    }
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

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("bigsort")
        .about("parallel external sort for newline-delimited text files")
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
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary run files")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("chunk_size")
                .short('c')
                .long("chunk-size")
                .help("read buffer size; lines longer than this stay on disk")
                .takes_value(true)
                .default_value("64KiB")
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Chunk size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("lines_per_run")
                .short('l')
                .long("lines-per-run")
                .help("lines one worker buffers before spilling a sorted run")
                .takes_value(true)
                .default_value("200000"),
        )
        .arg(
            clap::Arg::new("workers")
                .short('t')
                .long("workers")
                .help("number of parallel sorting workers (default: available cores)")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("bucket_size")
                .short('b')
                .long("bucket-size")
                .help("lines batched per distributor bucket")
                .takes_value(true)
                .default_value("128"),
        )
        .arg(
            clap::Arg::new("queue_depth")
                .short('q')
                .long("queue-depth")
                .help("distributor queue depth, in buckets")
                .takes_value(true)
                .default_value("16"),
        )
        .arg(
            clap::Arg::new("merge_groups")
                .short('g')
                .long("merge-groups")
                .help("number of concurrent merge groups")
                .takes_value(true)
                .default_value("3"),
        )
        .arg(
            clap::Arg::new("merge_queue_depth")
                .short('m')
                .long("merge-queue-depth")
                .help("per-group merge queue depth, in lines")
                .takes_value(true)
                .default_value("1024"),
        )
        .arg(
            clap::Arg::new("log_level")
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
