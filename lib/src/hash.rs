use std::mem;
use std::os::fd::BorrowedFd;
use std::sync::Arc;
use std::time::Instant;

use log::debug;

use crate::completion::{Completion, Inflight, Ring};
use crate::config::{Config, Opts};
use crate::digest::{Digest, Md};
use crate::error::{Error, Result};
use crate::pool::HashPool;
use crate::stream::Streams;
use crate::submission::{BlockData, Submission};
use crate::zero::is_zero;

/// Consecutive zero blocks consumed before submitting a zero catch-up
/// to every stream. Bounds the work left for finalization and lets a
/// cancelled run stop promptly.
const ZERO_BATCH: i64 = 64 * 1024;

/// Partial block collected between calls.
///
/// Zeros stay virtual until real data lands next to them, so a block
/// worth of zeros is consumed without writing a single byte.
enum Pending {
    Data(Vec<u8>),
    Zeros(usize),
}

impl Pending {
    fn len(&self) -> usize {
        match self {
            Pending::Data(data) => data.len(),
            Pending::Zeros(len) => *len,
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Absorb data up to a full block, materializing virtual zeros
    /// first. Returns the number of bytes taken.
    fn add_data(&mut self, buf: &[u8], block_size: usize) -> usize {
        let count = buf.len().min(block_size - self.len());
        match self {
            Pending::Data(data) => data.extend_from_slice(&buf[..count]),
            Pending::Zeros(zeros) => {
                let mut data = Vec::with_capacity(block_size);
                data.resize(*zeros, 0);
                data.extend_from_slice(&buf[..count]);
                *self = Pending::Data(data);
            }
        }
        count
    }

    /// Absorb zeros up to a full block. Returns the number absorbed.
    fn add_zeros(&mut self, len: u64, block_size: usize) -> usize {
        let count = (((block_size - self.len()) as u64).min(len)) as usize;
        match self {
            Pending::Data(data) if !data.is_empty() => {
                let new_len = data.len() + count;
                data.resize(new_len, 0);
            }
            Pending::Data(_) => *self = Pending::Zeros(count),
            Pending::Zeros(zeros) => *zeros += count,
        }
        count
    }

    fn take(&mut self) -> Pending {
        mem::replace(self, Pending::Data(Vec::new()))
    }
}

/// Block based hash for disk images.
///
/// One `Blkhash` computes one digest: feed it with [`update`] and
/// [`zero`] in image order, then call [`finalize`] once. Dropping an
/// unfinalized hash stops the workers without computing anything.
///
/// The digest depends on the digest name, the block size and the
/// number of streams, never on the number of threads, the queue
/// depth, or how the input was chunked across calls.
///
/// [`update`]: Blkhash::update
/// [`zero`]: Blkhash::zero
/// [`finalize`]: Blkhash::finalize
pub struct Blkhash {
    config: Arc<Config>,
    streams: Arc<Streams>,
    pool: HashPool,
    ring: Option<Arc<Ring>>,
    pending: Pending,
    /// Next block index to consume; counts data and zero blocks.
    block_index: i64,
    /// Index of the last block submitted to the workers.
    update_index: i64,
    /// Per-stream submission sequence counters.
    seqs: Vec<u64>,
    image_size: u64,
    error: Option<Error>,
    finalized: bool,
    started: Instant,
}

impl Blkhash {
    /// Create a hash with the default options.
    pub fn new() -> Result<Blkhash> {
        Blkhash::with_opts(&Opts::default())
    }

    /// Create a hash with the given options. Note that non-default
    /// digest, block size or streams change the hash value.
    pub fn with_opts(opts: &Opts) -> Result<Blkhash> {
        let config = Arc::new(Config::new(opts)?);
        let streams = Arc::new(Streams::new(&config)?);
        let pool = HashPool::new(&config, &streams)?;
        let ring = if config.queue_depth > 0 {
            Some(Arc::new(Ring::new().map_err(|err| Error::Io(err.kind()))?))
        } else {
            None
        };

        debug!(
            "hash created: digest={} md_len={} block_size={} streams={} workers={} queue_depth={}",
            config.digest_name,
            config.md_len,
            config.block_size,
            config.streams,
            config.workers,
            config.queue_depth,
        );

        let seqs = vec![0; config.streams];
        Ok(Blkhash {
            config,
            streams,
            pool,
            ring,
            pending: Pending::Data(Vec::new()),
            block_index: 0,
            update_index: 0,
            seqs,
            image_size: 0,
            error: None,
            finalized: false,
            started: Instant::now(),
        })
    }

    /// Hash `buf` into the image.
    ///
    /// Zero blocks in `buf` are detected and skipped, but if the
    /// caller knows a range reads as zeros, [`zero`](Blkhash::zero)
    /// is much faster. May block while the worker queue is full.
    pub fn update(&mut self, mut buf: &[u8]) -> Result<()> {
        self.check_running()?;
        self.image_size += buf.len() as u64;

        // Try to fill the pending block and consume it.
        if !self.pending.is_empty() {
            let count = self.pending.add_data(buf, self.config.block_size);
            buf = &buf[count..];
            if self.pending.len() == self.config.block_size {
                self.consume_pending()?;
            }
        }

        // Consume full blocks directly from the caller's buffer.
        while buf.len() >= self.config.block_size {
            let (block, rest) = buf.split_at(self.config.block_size);
            self.consume_data_block(block)?;
            buf = rest;
        }

        // Keep the tail for the next call.
        if !buf.is_empty() {
            self.pending.add_data(buf, self.config.block_size);
        }
        Ok(())
    }

    /// Hash `len` bytes of zeros into the image without reading any.
    ///
    /// Produces exactly the same digest as updating with `len`
    /// materialized zero bytes. Use it for holes in sparse files and
    /// for ranges an image format reports as unallocated.
    pub fn zero(&mut self, mut len: u64) -> Result<()> {
        self.check_running()?;
        self.image_size += len;

        // Try to fill the pending block and consume it.
        if !self.pending.is_empty() {
            len -= self.pending.add_zeros(len, self.config.block_size) as u64;
            if self.pending.len() == self.config.block_size {
                self.consume_pending()?;
            }
        }

        // Consume all full zero blocks.
        let block_size = self.config.block_size as u64;
        if len >= block_size {
            self.consume_zero_blocks(len / block_size)?;
            len %= block_size;
        }

        // Keep the tail for the next call.
        if len > 0 {
            self.pending.add_zeros(len, self.config.block_size);
        }
        Ok(())
    }

    /// Finalize the hash and return the root digest.
    ///
    /// Stops and joins the workers; any further [`update`] or
    /// [`zero`] fails. Can be called once: a second call fails with
    /// [`Error::Finalized`].
    ///
    /// [`update`]: Blkhash::update
    /// [`zero`]: Blkhash::zero
    pub fn finalize(&mut self) -> Result<Digest> {
        if self.finalized {
            return Err(Error::Finalized);
        }
        self.finalized = true;

        // Errors below are sticky and reported after the workers were
        // stopped, so a failed finalize still releases every thread.
        if !self.pending.is_empty() {
            let _ = self.consume_pending();
        }

        // Flush implicit zero blocks so every stream folds up to the
        // end of the image.
        if self.error.is_none() && self.block_index > self.update_index {
            let _ = self.submit_zero_catchup();
        }

        if let Err(err) = self.pool.stop() {
            self.set_error(err);
        }
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        // The root digest hashes the stream digests in stream order,
        // making the result independent of worker scheduling.
        let mut root = Md::new(&self.config.digest_name)?;
        for stream in 0..self.streams.len() {
            match self.streams.finalize(stream) {
                Ok(md) => root.update(md.as_bytes()),
                Err(err) => return Err(self.set_error(err)),
            }
        }
        let digest = root.finalize_reset();

        debug!(
            "hash finalized: image_size={} blocks={} elapsed={:.2?}",
            self.image_size,
            self.block_index,
            self.started.elapsed(),
        );
        Ok(digest)
    }

    /// Queue `buf` for hashing without copying it, completing with
    /// `user_data` on the completion ring.
    ///
    /// The shared buffer must stay unmodified until the completion is
    /// drained, which is exactly what sharing it as an `Arc` enforces.
    /// Fails with [`Error::WouldBlock`] while `queue_depth` operations
    /// are in flight, consuming no input, so the caller can poll the
    /// completion fd and retry.
    pub fn aio_update(&mut self, buf: Arc<[u8]>, user_data: u64) -> Result<()> {
        self.check_running()?;
        let completion = self.register(user_data)?;
        let result = self.aio_dispatch(&buf, &completion);
        if let Err(err) = &result {
            completion.set_error(err.clone());
        }
        // Drop the initial reference: the completion fires once the
        // workers release every submission created above.
        drop(completion);
        result
    }

    /// Record `len` bytes of zeros asynchronously.
    ///
    /// Zero ranges carry no buffer, so the completion typically fires
    /// before this returns.
    pub fn aio_zero(&mut self, len: u64, user_data: u64) -> Result<()> {
        self.check_running()?;
        let completion = self.register(user_data)?;
        let result = self.zero(len);
        if let Err(err) = &result {
            completion.set_error(err.clone());
        }
        drop(completion);
        result
    }

    /// The fd to poll for completions; readable while completions are
    /// waiting to be drained.
    pub fn completion_fd(&self) -> Result<BorrowedFd<'_>> {
        match &self.ring {
            Some(ring) => Ok(ring.fd()),
            None => Err(Error::AsyncDisabled),
        }
    }

    /// Drain up to `out.len()` finished completions into `out`,
    /// returning how many were written. Never blocks; returns 0 when
    /// none are ready.
    pub fn completions(&self, out: &mut [Completion]) -> Result<usize> {
        match &self.ring {
            Some(ring) => Ok(ring.drain(out)),
            None => Err(Error::AsyncDisabled),
        }
    }

    fn register(&mut self, user_data: u64) -> Result<Arc<Inflight>> {
        let ring = self.ring.clone().ok_or(Error::AsyncDisabled)?;
        if !ring.try_register(self.config.queue_depth) {
            return Err(Error::WouldBlock);
        }
        Ok(Inflight::new(ring, user_data))
    }

    fn aio_dispatch(&mut self, buf: &Arc<[u8]>, completion: &Arc<Inflight>) -> Result<()> {
        self.image_size += buf.len() as u64;
        let block_size = self.config.block_size;
        let mut start = 0;

        // Head and tail bytes are copied into the pending block, so
        // only full blocks reference the caller's buffer.
        if !self.pending.is_empty() {
            start += self.pending.add_data(buf, block_size);
            if self.pending.len() == block_size {
                self.consume_pending()?;
            }
        }

        // Zero detection for borrowed blocks runs on the workers,
        // keeping this call fast.
        while buf.len() - start >= block_size {
            let data = BlockData::Borrowed {
                data: Arc::clone(buf),
                start,
                len: block_size,
            };
            self.submit_data(data, Some(Arc::clone(completion)))?;
            start += block_size;
        }

        if start < buf.len() {
            self.pending.add_data(&buf[start..], block_size);
        }
        Ok(())
    }

    /// Consume one full block from the caller's buffer, skipping the
    /// hash entirely when the block is zeros.
    fn consume_data_block(&mut self, block: &[u8]) -> Result<()> {
        if is_zero(block) {
            self.consume_zero_blocks(1)
        } else {
            self.submit_data(BlockData::Copied(block.to_vec()), None)
        }
    }

    /// Consume whatever is pending: a full block of virtual zeros
    /// takes the fast path, everything else is submitted as data.
    fn consume_pending(&mut self) -> Result<()> {
        let block_size = self.config.block_size;
        match self.pending.take() {
            Pending::Zeros(len) if len == block_size => self.consume_zero_blocks(1),
            Pending::Zeros(len) => self.submit_vec(vec![0; len]),
            Pending::Data(data) => self.submit_vec(data),
        }
    }

    fn submit_vec(&mut self, data: Vec<u8>) -> Result<()> {
        if data.len() == self.config.block_size && is_zero(&data) {
            self.consume_zero_blocks(1)
        } else {
            self.submit_data(BlockData::Copied(data), None)
        }
    }

    /// Route one data block to the stream owning the current index.
    fn submit_data(&mut self, data: BlockData, completion: Option<Arc<Inflight>>) -> Result<()> {
        let stream = (self.block_index % self.config.streams as i64) as usize;
        let sub = Submission::Data {
            stream,
            seq: self.next_seq(stream),
            index: self.block_index,
            data,
            completion,
        };
        self.submit(sub)?;
        self.update_index = self.block_index;
        self.block_index += 1;
        Ok(())
    }

    /// Consume `count` zero blocks without touching the workers,
    /// catching all streams up when the run grows too long.
    fn consume_zero_blocks(&mut self, count: u64) -> Result<()> {
        self.block_index += count as i64;
        if self.block_index - self.update_index >= ZERO_BATCH {
            self.submit_zero_catchup()?;
        }
        Ok(())
    }

    /// Submit one zero catch-up to every stream, so each folds the
    /// zero digests it owes for the run of implicit zero blocks.
    fn submit_zero_catchup(&mut self) -> Result<()> {
        for stream in 0..self.config.streams {
            let sub = Submission::Zero {
                stream,
                seq: self.next_seq(stream),
                index: self.block_index,
            };
            self.submit(sub)?;
        }
        self.update_index = self.block_index;
        Ok(())
    }

    fn submit(&mut self, sub: Submission) -> Result<()> {
        match self.pool.submit(sub) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.set_error(err)),
        }
    }

    fn next_seq(&mut self, stream: usize) -> u64 {
        let seq = self.seqs[stream];
        self.seqs[stream] += 1;
        seq
    }

    fn check_running(&mut self) -> Result<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.finalized {
            return Err(self.set_error(Error::Stopped));
        }
        Ok(())
    }

    /// Keep the first error; every later failure reports it.
    fn set_error(&mut self, error: Error) -> Error {
        self.error.get_or_insert(error).clone()
    }
}
