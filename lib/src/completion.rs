use std::collections::VecDeque;
use std::io::{self, PipeReader, PipeWriter, Read, Write};
use std::os::fd::BorrowedFd;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::error::Error;

/// A finished asynchronous operation, drained from the completion
/// ring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// The token passed to the submitting call.
    pub user_data: u64,
    /// The first error hit by any block of the operation, if any.
    pub error: Option<Error>,
}

/// Reference counted notifier shared by every submission created for
/// one asynchronous call. Dropping the last clone delivers the
/// completion to the ring exactly once; the `Arc` release/acquire
/// ordering makes all submission state written by the workers visible
/// to whoever observes the completion.
pub(crate) struct Inflight {
    ring: Arc<Ring>,
    user_data: u64,
    error: OnceLock<Error>,
}

impl Inflight {
    pub(crate) fn new(ring: Arc<Ring>, user_data: u64) -> Arc<Inflight> {
        Arc::new(Inflight {
            ring,
            user_data,
            error: OnceLock::new(),
        })
    }

    /// Record the first error; later errors are ignored.
    pub(crate) fn set_error(&self, error: Error) {
        let _ = self.error.set(error);
    }
}

impl Drop for Inflight {
    fn drop(&mut self) {
        self.ring.complete(Completion {
            user_data: self.user_data,
            error: self.error.take(),
        });
    }
}

/// Ring of finished completions plus a pollable readiness fd.
///
/// The fd is the read end of a self pipe. One byte is written when
/// the ring turns non-empty and read back when it drains, all under
/// the ring lock, so repeated signals coalesce into one wakeup and
/// draining never blocks on the pipe.
pub(crate) struct Ring {
    /// Clone of the read end handed to callers for polling.
    poll: PipeReader,
    inner: Mutex<Inner>,
}

struct Inner {
    reader: PipeReader,
    writer: PipeWriter,
    events: VecDeque<Completion>,
    /// Operations registered and not yet drained.
    inflight: usize,
    signaled: bool,
}

impl Ring {
    pub(crate) fn new() -> io::Result<Ring> {
        let (reader, writer) = io::pipe()?;
        let poll = reader.try_clone()?;
        Ok(Ring {
            poll,
            inner: Mutex::new(Inner {
                reader,
                writer,
                events: VecDeque::new(),
                inflight: 0,
                signaled: false,
            }),
        })
    }

    /// Reserve an in-flight slot, failing when `depth` operations are
    /// already outstanding.
    pub(crate) fn try_register(&self, depth: usize) -> bool {
        let mut inner = self.lock();
        if inner.inflight >= depth {
            return false;
        }
        inner.inflight += 1;
        true
    }

    fn complete(&self, completion: Completion) {
        let mut inner = self.lock();
        inner.events.push_back(completion);
        if !inner.signaled {
            // Readers check `signaled` under the same lock, so the
            // byte is in the pipe before anyone tries to read it back.
            if inner.writer.write_all(&[1]).is_ok() {
                inner.signaled = true;
            }
        }
    }

    /// Move up to `out.len()` completions into `out`, consuming the
    /// readiness signal when the ring drains. Never blocks.
    pub(crate) fn drain(&self, out: &mut [Completion]) -> usize {
        let mut inner = self.lock();
        let mut count = 0;
        while count < out.len() {
            match inner.events.pop_front() {
                Some(completion) => {
                    out[count] = completion;
                    count += 1;
                }
                None => break,
            }
        }
        inner.inflight -= count;
        if inner.events.is_empty() && inner.signaled {
            let mut byte = [0u8; 1];
            if inner.reader.read_exact(&mut byte).is_ok() {
                inner.signaled = false;
            }
        }
        count
    }

    /// The fd to poll for readiness; readable while completions wait.
    pub(crate) fn fd(&self) -> BorrowedFd<'_> {
        use std::os::fd::AsFd;
        self.poll.as_fd()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("completion ring lock")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fires_once_on_last_drop() {
        let ring = Arc::new(Ring::new().unwrap());
        assert!(ring.try_register(1));

        let inflight = Inflight::new(Arc::clone(&ring), 7);
        let other = Arc::clone(&inflight);

        let mut out = vec![Completion::default(); 4];
        drop(inflight);
        assert_eq!(ring.drain(&mut out), 0);

        drop(other);
        assert_eq!(ring.drain(&mut out), 1);
        assert_eq!(
            out[0],
            Completion {
                user_data: 7,
                error: None
            }
        );
        assert_eq!(ring.drain(&mut out), 0);
    }

    #[test]
    fn first_error_wins() {
        let ring = Arc::new(Ring::new().unwrap());
        assert!(ring.try_register(1));

        let inflight = Inflight::new(Arc::clone(&ring), 3);
        inflight.set_error(Error::Stopped);
        inflight.set_error(Error::Finalized);
        drop(inflight);

        let mut out = vec![Completion::default(); 1];
        assert_eq!(ring.drain(&mut out), 1);
        assert_eq!(out[0].user_data, 3);
        assert_eq!(out[0].error, Some(Error::Stopped));
    }

    #[test]
    fn inflight_accounting() {
        let ring = Arc::new(Ring::new().unwrap());
        assert!(ring.try_register(2));
        assert!(ring.try_register(2));
        assert!(!ring.try_register(2));

        drop(Inflight::new(Arc::clone(&ring), 1));
        drop(Inflight::new(Arc::clone(&ring), 2));

        // Slots free only when the user drains the events.
        assert!(!ring.try_register(2));
        let mut out = vec![Completion::default(); 8];
        assert_eq!(ring.drain(&mut out), 2);
        assert_eq!(out[0].user_data, 1);
        assert_eq!(out[1].user_data, 2);
        assert!(ring.try_register(2));
    }

    #[test]
    fn drains_in_chunks() {
        let ring = Arc::new(Ring::new().unwrap());
        for i in 0..5 {
            assert!(ring.try_register(8));
            drop(Inflight::new(Arc::clone(&ring), i));
        }
        let mut out = vec![Completion::default(); 2];
        assert_eq!(ring.drain(&mut out), 2);
        assert_eq!(ring.drain(&mut out), 2);
        assert_eq!(ring.drain(&mut out), 1);
        assert_eq!(ring.drain(&mut out), 0);
    }
}
