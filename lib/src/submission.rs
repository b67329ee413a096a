use std::sync::Arc;

use crate::completion::Inflight;
use crate::error::Error;

/// Data carried by a DATA submission.
///
/// The synchronous path copies the user bytes so the caller can reuse
/// its buffer immediately. The asynchronous path borrows the caller's
/// shared buffer instead; the `Arc` keeps it alive and immutable until
/// the last submission referencing it completes.
pub(crate) enum BlockData {
    Copied(Vec<u8>),
    Borrowed {
        data: Arc<[u8]>,
        start: usize,
        len: usize,
    },
}

impl BlockData {
    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            BlockData::Copied(data) => data,
            BlockData::Borrowed { data, start, len } => &data[*start..*start + *len],
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            BlockData::Copied(data) => data.len(),
            BlockData::Borrowed { len, .. } => *len,
        }
    }

    /// True for async submissions whose zero detection was deferred to
    /// the workers.
    pub(crate) fn is_borrowed(&self) -> bool {
        matches!(self, BlockData::Borrowed { .. })
    }
}

/// One unit of work for the hash pool.
///
/// `seq` is the position of the submission in its stream's fold
/// order: the facade numbers the submissions of every stream as it
/// dispatches them, and the stream folds them in exactly that order
/// no matter which worker finishes first.
pub(crate) enum Submission {
    /// Hash one block and fold its digest into the stream at `index`.
    Data {
        stream: usize,
        seq: u64,
        index: i64,
        data: BlockData,
        completion: Option<Arc<Inflight>>,
    },
    /// Fold the zero block digest for the stream's blocks before
    /// `index`.
    Zero { stream: usize, seq: u64, index: i64 },
    /// Terminate one worker.
    Stop,
}

impl Submission {
    /// Propagate an error to the attached completion, if any.
    pub(crate) fn set_error(&self, error: Error) {
        if let Submission::Data {
            completion: Some(completion),
            ..
        } = self
        {
            completion.set_error(error);
        }
    }
}
