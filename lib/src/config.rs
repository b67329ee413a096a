use crate::digest::{Digest, Md};
use crate::error::{Error, Result};

/// Smallest supported block size.
pub const MIN_BLOCK_SIZE: usize = 4 * 1024;

/// Largest supported block size.
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024;

/// Largest supported number of hash streams.
pub const MAX_STREAMS: usize = 128;

/// Largest supported async queue depth.
pub const MAX_QUEUE_DEPTH: usize = 64 * 1024;

const DEFAULT_DIGEST: &str = "sha256";
const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;
const DEFAULT_STREAMS: usize = 32;
const DEFAULT_THREADS: usize = 4;

/// Queue slots when no queue depth was requested.
const DEFAULT_QUEUE_SIZE: usize = 16;

/// Options for creating a hash, validated on every setter.
///
/// The digest name, the block size and the number of streams are part
/// of the hash identity: changing any of them changes the digest of
/// the same input. The number of threads and the queue depth are
/// performance knobs and never change the digest.
#[derive(Debug, Clone)]
pub struct Opts {
    digest_name: String,
    block_size: usize,
    streams: usize,
    threads: usize,
    queue_depth: usize,
}

impl Opts {
    /// Create options for `digest_name` with the default parameters:
    /// 64 KiB blocks, 32 streams, 4 threads, async disabled.
    pub fn new(digest_name: &str) -> Result<Opts> {
        // Fail early on names the workers could not resolve later.
        Md::new(digest_name)?;
        Ok(Opts {
            digest_name: digest_name.to_string(),
            ..Opts::default()
        })
    }

    /// Set the block size. Must be a power of two between 4 KiB and
    /// 1 MiB. Changes the hash value.
    pub fn set_block_size(&mut self, block_size: usize) -> Result<()> {
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size)
            || !block_size.is_power_of_two()
        {
            return Err(Error::InvalidBlockSize(block_size));
        }
        self.block_size = block_size;
        Ok(())
    }

    /// Set the number of independent hash streams (1 to 128).
    /// Changes the hash value.
    pub fn set_streams(&mut self, streams: usize) -> Result<()> {
        if !(1..=MAX_STREAMS).contains(&streams) {
            return Err(Error::InvalidStreams(streams));
        }
        self.streams = streams;
        Ok(())
    }

    /// Set the number of worker threads (1 to the number of streams).
    /// Does not change the hash value.
    pub fn set_threads(&mut self, threads: usize) -> Result<()> {
        if !(1..=MAX_STREAMS).contains(&threads) {
            return Err(Error::InvalidThreads(threads));
        }
        self.threads = threads;
        Ok(())
    }

    /// Set the async queue depth: the maximum number of in-flight
    /// asynchronous operations. Zero disables the async interface.
    pub fn set_queue_depth(&mut self, queue_depth: usize) -> Result<()> {
        if queue_depth > MAX_QUEUE_DEPTH {
            return Err(Error::InvalidQueueDepth(queue_depth));
        }
        self.queue_depth = queue_depth;
        Ok(())
    }

    /// The digest name.
    pub fn digest_name(&self) -> &str {
        &self.digest_name
    }

    /// The block size in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The number of hash streams.
    pub fn streams(&self) -> usize {
        self.streams
    }

    /// The number of worker threads.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// The async queue depth.
    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }
}

impl Default for Opts {
    fn default() -> Opts {
        Opts {
            digest_name: DEFAULT_DIGEST.to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            streams: DEFAULT_STREAMS,
            threads: DEFAULT_THREADS,
            queue_depth: 0,
        }
    }
}

/// Immutable parameters shared by the facade, the streams and the
/// workers, with the precomputed digest of one all-zero block.
pub(crate) struct Config {
    pub digest_name: String,
    pub block_size: usize,
    pub streams: usize,
    pub workers: usize,
    pub queue_depth: usize,
    /// Capacity of the shared submission queue.
    pub queue_size: usize,
    /// Digest of one all-zero block, folded for every zero block in
    /// the image instead of hashing it.
    pub zero_md: Digest,
    pub md_len: usize,
}

impl Config {
    pub(crate) fn new(opts: &Opts) -> Result<Config> {
        // The fields are validated individually by the setters; the
        // relation between them can only be checked here.
        if opts.threads > opts.streams {
            return Err(Error::InvalidThreads(opts.threads));
        }

        let mut md = Md::new(&opts.digest_name)?;
        md.update(&vec![0; opts.block_size]);
        let zero_md = md.finalize_reset();

        // Never smaller than two slots per worker so submitters do not
        // starve idle workers.
        let queue_size = match opts.queue_depth {
            0 => DEFAULT_QUEUE_SIZE.max(opts.threads * 2),
            depth => depth.max(opts.threads * 2),
        };

        Ok(Config {
            digest_name: opts.digest_name.clone(),
            block_size: opts.block_size,
            streams: opts.streams,
            workers: opts.threads,
            queue_depth: opts.queue_depth,
            queue_size,
            md_len: zero_md.as_bytes().len(),
            zero_md,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let opts = Opts::default();
        assert_eq!(opts.digest_name(), "sha256");
        assert_eq!(opts.block_size(), 64 * 1024);
        assert_eq!(opts.streams(), 32);
        assert_eq!(opts.threads(), 4);
        assert_eq!(opts.queue_depth(), 0);
    }

    #[test]
    fn unknown_digest() {
        assert!(Opts::new("walrus").is_err());
    }

    #[test]
    fn block_size_range() {
        let mut opts = Opts::default();
        opts.set_block_size(MIN_BLOCK_SIZE).unwrap();
        opts.set_block_size(MAX_BLOCK_SIZE).unwrap();
        assert_eq!(
            opts.set_block_size(2048),
            Err(Error::InvalidBlockSize(2048))
        );
        assert_eq!(
            opts.set_block_size(2 * 1024 * 1024),
            Err(Error::InvalidBlockSize(2 * 1024 * 1024))
        );
        // In range but not a power of two.
        assert_eq!(
            opts.set_block_size(65537),
            Err(Error::InvalidBlockSize(65537))
        );
    }

    #[test]
    fn streams_range() {
        let mut opts = Opts::default();
        opts.set_streams(1).unwrap();
        opts.set_streams(MAX_STREAMS).unwrap();
        assert_eq!(opts.set_streams(0), Err(Error::InvalidStreams(0)));
        assert_eq!(opts.set_streams(129), Err(Error::InvalidStreams(129)));
    }

    #[test]
    fn threads_range() {
        let mut opts = Opts::default();
        opts.set_threads(1).unwrap();
        opts.set_threads(MAX_STREAMS).unwrap();
        assert_eq!(opts.set_threads(0), Err(Error::InvalidThreads(0)));
        assert_eq!(opts.set_threads(129), Err(Error::InvalidThreads(129)));
    }

    #[test]
    fn queue_depth_range() {
        let mut opts = Opts::default();
        opts.set_queue_depth(0).unwrap();
        opts.set_queue_depth(MAX_QUEUE_DEPTH).unwrap();
        assert_eq!(
            opts.set_queue_depth(MAX_QUEUE_DEPTH + 1),
            Err(Error::InvalidQueueDepth(MAX_QUEUE_DEPTH + 1))
        );
    }

    #[test]
    fn more_threads_than_streams() {
        let mut opts = Opts::default();
        opts.set_streams(4).unwrap();
        opts.set_threads(8).unwrap();
        assert_eq!(Config::new(&opts).err(), Some(Error::InvalidThreads(8)));
    }

    #[test]
    fn zero_md() {
        let mut opts = Opts::default();
        opts.set_block_size(4096).unwrap();
        let config = Config::new(&opts).unwrap();
        let mut md = Md::new("sha256").unwrap();
        md.update(&[0u8; 4096]);
        assert_eq!(config.zero_md, md.finalize_reset());
        assert_eq!(config.md_len, 32);
    }

    #[test]
    fn queue_size() {
        let mut opts = Opts::default();
        // Default sizing.
        assert_eq!(Config::new(&opts).unwrap().queue_size, 16);
        // Deep queues are honored as requested.
        opts.set_queue_depth(100).unwrap();
        assert_eq!(Config::new(&opts).unwrap().queue_size, 100);
        // Shallow queues are widened to two slots per worker.
        opts.set_queue_depth(2).unwrap();
        assert_eq!(Config::new(&opts).unwrap().queue_size, 8);
    }
}
