use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use handle_avail::cache::FileCache;
use handle_avail::check::{Client, Status};
use handle_avail::pool::{CheckResult, Pool};
use handle_avail::services::Registry;

#[derive(Parser)]
#[command(
    name = "handle-avail",
    about = "Check whether usernames are still available on popular web services",
    after_help = "Usernames are read one per line and checked concurrently against \
                  the chosen service. Every classification is logged to stderr; \
                  available usernames are additionally written, one per line, to \
                  the output stream for piping into other tools.\n\n\
                  Determinate results are cached for seven days, so re-running a \
                  list only re-checks what never resolved."
)]
struct Cli {
    /// Service to check usernames against
    service: String,

    /// Number of worker threads
    #[arg(short, long, default_value_t = 20)]
    threads: usize,

    /// Read usernames from this file instead of standard input
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Write available usernames to this file instead of standard output
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// File recording prior results
    #[arg(long, default_value = "cache.txt")]
    cache: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let registry = Registry::builtin(Client::new());
    let Some(service) = registry.get(&cli.service) else {
        eprintln!("error: `{}` is not a known service", cli.service);
        eprintln!("valid services: {}", registry.names().join(", "));
        return ExitCode::from(2);
    };

    let input: Box<dyn BufRead> = match &cli.input {
        Some(path) => match File::open(path) {
            Ok(file) => Box::new(BufReader::new(file)),
            Err(err) => {
                eprintln!("error: cannot open input file {}: {err}", path.display());
                return ExitCode::from(2);
            }
        },
        None => Box::new(io::stdin().lock()),
    };

    let output: Box<dyn Write + Send> = match &cli.output {
        Some(path) => match File::create(path) {
            Ok(file) => Box::new(BufWriter::new(file)),
            Err(err) => {
                eprintln!("error: cannot open output file {}: {err}", path.display());
                return ExitCode::from(2);
            }
        },
        None => Box::new(io::stdout()),
    };

    let cache = Arc::new(FileCache::new(cli.cache));
    let (pool, results) = Pool::spawn(service, cache, cli.threads);
    tracing::info!(service = %cli.service, threads = cli.threads, "checker initialized");

    // Drain results as they arrive so the feeder never backs up behind a
    // full output queue.
    let sink = thread::spawn(move || drain_results(results, output));

    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(error = %err, "failed reading input stream");
                break;
            }
        };
        let username = line.trim();
        if username.is_empty() {
            continue;
        }
        if let Err(err) = pool.submit(username.to_string()) {
            tracing::error!(error = %err, "worker pool stopped accepting work");
            break;
        }
    }

    pool.shutdown();
    if sink.join().is_err() {
        tracing::error!("result sink panicked");
    }
    ExitCode::SUCCESS
}

/// Log every classification; echo available usernames to the output
/// stream. Runs until the pool reports end-of-stream.
fn drain_results(results: std::sync::mpsc::Receiver<CheckResult>, mut output: Box<dyn Write + Send>) {
    for result in results {
        match result.status {
            Status::Available => {
                tracing::info!(username = %result.username, "available");
                if let Err(err) = writeln!(output, "{}", result.username) {
                    tracing::error!(error = %err, "cannot write to output stream");
                }
            }
            Status::Unavailable => tracing::info!(username = %result.username, "unavailable"),
            Status::Invalid => tracing::info!(username = %result.username, "invalid"),
            Status::Unknown => tracing::warn!(username = %result.username, "unknown"),
        }
    }
    if let Err(err) = output.flush() {
        tracing::error!(error = %err, "cannot flush output stream");
    }
}
