use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crossbeam_utils::CachePadded;

use crate::config::Config;
use crate::digest::{Digest, Md};
use crate::error::{Error, Result};

/// What a worker hands to a stream after processing one submission.
pub(crate) enum Entry {
    /// Digest of the data block at `index`.
    Block { index: i64, md: Digest },
    /// The block at `index` is all zeros; fold the precomputed digest.
    ZeroBlock { index: i64 },
    /// Fold zero digests for every owned block before `index`.
    Catchup { index: i64 },
}

/// One of the S independent hash pipelines.
///
/// A stream owns the blocks whose index is congruent to its id modulo
/// the number of streams, and folds one digest per owned block into
/// its root context in index order, substituting the zero block
/// digest for every gap. Folding the same digests in the same order
/// is what makes the result independent of the number of workers.
pub(crate) struct Stream {
    config: Arc<Config>,
    root: Md,
    /// Index of the last folded block; starts one stride before the
    /// stream id so the first expected index is the id itself.
    last_index: i64,
    /// Sequence number of the next entry to fold.
    next_seq: u64,
    /// Entries that arrived ahead of their turn. They hold the block
    /// digest only, never the data.
    parked: BTreeMap<u64, Entry>,
}

impl Stream {
    fn new(id: usize, config: Arc<Config>) -> Result<Stream> {
        let root = Md::new(&config.digest_name)?;
        Ok(Stream {
            last_index: id as i64 - config.streams as i64,
            config,
            root,
            next_seq: 0,
            parked: BTreeMap::new(),
        })
    }

    /// Fold one entry, parking it while earlier submissions are still
    /// in flight on other workers.
    fn apply(&mut self, seq: u64, entry: Entry) {
        if seq != self.next_seq {
            self.parked.insert(seq, entry);
            return;
        }
        self.fold(entry);
        self.next_seq += 1;
        while let Some(entry) = self.parked.remove(&self.next_seq) {
            self.fold(entry);
            self.next_seq += 1;
        }
    }

    fn fold(&mut self, entry: Entry) {
        match entry {
            Entry::Block { index, md } => {
                self.add_zero_blocks_before(index);
                self.root.update(md.as_bytes());
                self.last_index = index;
            }
            Entry::ZeroBlock { index } => {
                self.add_zero_blocks_before(index);
                let zero_md = self.config.zero_md;
                self.root.update(zero_md.as_bytes());
                self.last_index = index;
            }
            Entry::Catchup { index } => self.add_zero_blocks_before(index),
        }
    }

    /// Fold the zero block digest for every owned index after
    /// `last_index` and before `index`.
    fn add_zero_blocks_before(&mut self, index: i64) {
        let stride = self.config.streams as i64;
        let zero_md = self.config.zero_md;
        let mut next = self.last_index + stride;
        while next < index {
            self.root.update(zero_md.as_bytes());
            self.last_index = next;
            next += stride;
        }
    }

    fn finalize(&mut self) -> Result<Digest> {
        if !self.parked.is_empty() {
            // A submission was lost; the digest would silently skip
            // blocks.
            return Err(Error::Internal("stream finalized with parked entries"));
        }
        Ok(self.root.finalize_reset())
    }
}

/// The stream set shared between the facade and the workers.
///
/// Any worker may fold into any stream; the fold is serialized by the
/// per-stream lock and costs one hash update of digest length, so
/// contention is negligible. Padded to cache line size to avoid
/// false sharing between workers.
pub(crate) struct Streams(Vec<CachePadded<Mutex<Stream>>>);

impl Streams {
    pub(crate) fn new(config: &Arc<Config>) -> Result<Streams> {
        (0..config.streams)
            .map(|id| {
                Stream::new(id, Arc::clone(config)).map(|s| CachePadded::new(Mutex::new(s)))
            })
            .collect::<Result<Vec<_>>>()
            .map(Streams)
    }

    pub(crate) fn apply(&self, stream: usize, seq: u64, entry: Entry) {
        self.0[stream].lock().expect("stream lock").apply(seq, entry);
    }

    pub(crate) fn finalize(&self, stream: usize) -> Result<Digest> {
        self.0[stream].lock().expect("stream lock").finalize()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}
