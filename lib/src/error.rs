/// Alias for results returned by this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by the hash engine.
///
/// The first error observed by a hash is sticky: every following call
/// on the same hash returns it unchanged, and the underlying digest
/// state is never modified again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The digest name does not resolve to a supported algorithm.
    #[error("unknown digest {0:?}")]
    UnknownDigest(String),

    /// The block size is not a power of two between 4 KiB and 1 MiB.
    #[error("invalid block size {0}: must be a power of two between 4 KiB and 1 MiB")]
    InvalidBlockSize(usize),

    /// The number of streams is outside 1..=128.
    #[error("invalid number of streams {0}: must be between 1 and 128")]
    InvalidStreams(usize),

    /// The number of threads is outside 1..=streams.
    #[error("invalid number of threads {0}: must be between 1 and the number of streams")]
    InvalidThreads(usize),

    /// The queue depth is larger than 65536.
    #[error("invalid queue depth {0}: must be between 0 and 65536")]
    InvalidQueueDepth(usize),

    /// The hash was already finalized.
    #[error("hash was already finalized")]
    Finalized,

    /// Data was submitted after the workers were stopped.
    #[error("hash workers were stopped")]
    Stopped,

    /// The async queue is full; drain completions and retry.
    #[error("async queue is full")]
    WouldBlock,

    /// The async interface needs a non-zero queue depth.
    #[error("async interface is disabled")]
    AsyncDisabled,

    /// Creating the completion event fd failed.
    #[error("i/o error: {0:?}")]
    Io(std::io::ErrorKind),

    /// A worker failed in a way that loses submissions.
    #[error("internal error: {0}")]
    Internal(&'static str),
}
