use std::error::Error;
use std::process::exit;
use std::time::Instant;

use clap::Parser;
use env_logger::Env;
use log::{debug, info};

use blkhash::{digests, Blkhash, Opts};

mod progress;
mod source;

use progress::{humansize, Progress};

/// Hash block size. Smaller than the read size so holes are detected
/// at fine granularity; part of the hash identity, so not an option.
const BLOCK_SIZE: usize = 64 * 1024;

/// Compute message digest for disk images
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Digest name
    #[arg(short, long, default_value = "sha256")]
    digest: String,

    /// List the supported digest names and exit
    #[arg(short, long)]
    list_digests: bool,

    /// Show progress on standard error
    #[arg(short, long)]
    progress: bool,

    /// Number of hash threads; does not change the hash value
    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// Number of hash streams; changing this changes the hash value
    #[arg(short = 'S', long, default_value_t = 32)]
    streams: usize,

    /// Submission queue depth
    #[arg(long, default_value_t = 16)]
    queue_depth: usize,

    /// Read size in bytes, accepting k/m/g suffixes
    #[arg(long, default_value = "256k", value_parser = parse_size)]
    read_size: usize,

    /// Image to checksum, or - for standard input
    #[arg(default_value = "-")]
    file: String,
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let args = Args::parse();

    if args.list_digests {
        for name in digests() {
            println!("{name}");
        }
        return;
    }

    match run(&args) {
        Ok(hexdigest) => println!("{}  {}", hexdigest, args.file),
        Err(err) => {
            eprintln!("blksum: {err}");
            exit(1);
        }
    }
}

fn run(args: &Args) -> Result<String, Box<dyn Error>> {
    if args.read_size < BLOCK_SIZE || args.read_size % BLOCK_SIZE != 0 {
        return Err(format!(
            "invalid read size {}: must be a multiple of the block size ({})",
            args.read_size, BLOCK_SIZE
        )
        .into());
    }

    let mut opts = Opts::new(&args.digest)?;
    opts.set_block_size(BLOCK_SIZE)?;
    opts.set_streams(args.streams)?;
    opts.set_threads(args.threads)?;
    opts.set_queue_depth(args.queue_depth)?;

    info!("hashing {} with {}", args.file, args.digest);
    let started = Instant::now();

    let mut source = source::open(&args.file)?;
    let mut hash = Blkhash::with_opts(&opts)?;
    let mut progress = Progress::new(args.progress, source.size());
    let mut buf = vec![0u8; args.read_size];
    let mut total = 0u64;

    loop {
        let count = source.read(&mut buf)?;
        if count == 0 {
            break;
        }
        hash.update(&buf[..count])?;
        total += count as u64;
        progress.update(total);
    }
    progress.finish();

    let digest = hash.finalize()?;

    let elapsed = started.elapsed();
    debug!(
        "read {} in {:.2?} ({}/s)",
        humansize(total),
        elapsed,
        humansize((total as f64 / elapsed.as_secs_f64().max(0.001)) as u64),
    );

    Ok(digest.to_hex())
}

/// Parse a size in bytes with an optional k, m or g suffix.
fn parse_size(value: &str) -> Result<usize, String> {
    let value = value.trim().to_ascii_lowercase();
    let (number, multiplier) = match value.strip_suffix(['k', 'm', 'g']) {
        Some(number) => {
            let multiplier = match value.as_bytes()[value.len() - 1] {
                b'k' => 1024,
                b'm' => 1024 * 1024,
                _ => 1024 * 1024 * 1024,
            };
            (number, multiplier)
        }
        None => (value.as_str(), 1),
    };
    let number: usize = number
        .parse()
        .map_err(|_| format!("invalid size {value:?}"))?;
    number
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size {value:?} is too large"))
}
