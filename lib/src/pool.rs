use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, trace};

use crate::config::Config;
use crate::digest::Md;
use crate::error::{Error, Result};
use crate::stream::{Entry, Streams};
use crate::submission::Submission;
use crate::zero::is_zero;

/// Worker threads hashing blocks from one shared bounded queue.
///
/// Submitters block while the queue is full, workers block while it
/// is empty; the bounded channel is the backpressure. Stopping pushes
/// one STOP per worker and joins them all, so a hash can be dropped
/// while workers are idle, blocked or mid-computation.
pub(crate) struct HashPool {
    tx: Sender<Submission>,
    handles: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
    stopped: bool,
}

struct Shared {
    /// First error hit by any worker.
    error: Mutex<Option<Error>>,
}

impl Shared {
    fn set_error(&self, error: Error) {
        let mut slot = self.error.lock().expect("pool lock");
        if slot.is_none() {
            *slot = Some(error);
        }
    }
}

impl HashPool {
    pub(crate) fn new(config: &Arc<Config>, streams: &Arc<Streams>) -> Result<HashPool> {
        let (tx, rx) = bounded(config.queue_size);
        let shared = Arc::new(Shared {
            error: Mutex::new(None),
        });
        let mut pool = HashPool {
            tx,
            handles: Vec::with_capacity(config.workers),
            shared,
            stopped: false,
        };

        for id in 0..config.workers {
            let rx = rx.clone();
            let config = Arc::clone(config);
            let streams = Arc::clone(streams);
            let shared = Arc::clone(&pool.shared);
            let spawned = thread::Builder::new()
                .name(format!("blkhash/{id}"))
                .spawn(move || worker(id, rx, config, streams, shared));
            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(err) => {
                    let err = Error::Io(err.kind());
                    // Unwind the workers spawned so far.
                    let _ = pool.stop();
                    return Err(err);
                }
            }
        }

        debug!("started {} workers, queue size {}", config.workers, config.queue_size);
        Ok(pool)
    }

    /// Queue one submission, blocking while the queue is full. On
    /// failure the submission's completion is released with the error
    /// before returning, so no completion is lost.
    pub(crate) fn submit(&self, sub: Submission) -> Result<()> {
        if self.stopped {
            sub.set_error(Error::Stopped);
            return Err(Error::Stopped);
        }
        if let Some(err) = self.error() {
            sub.set_error(err.clone());
            return Err(err);
        }
        self.tx.send(sub).map_err(|err| {
            err.into_inner().set_error(Error::Stopped);
            Error::Stopped
        })
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.shared.error.lock().expect("pool lock").clone()
    }

    /// Stop all workers and wait for them. Safe to call twice;
    /// returns the pool's sticky error if any.
    pub(crate) fn stop(&mut self) -> Result<()> {
        if !self.stopped {
            self.stopped = true;
            debug!("stopping {} workers", self.handles.len());
            for _ in 0..self.handles.len() {
                if self.tx.send(Submission::Stop).is_err() {
                    // The workers are already gone.
                    break;
                }
            }
            for handle in self.handles.drain(..) {
                if handle.join().is_err() {
                    self.shared.set_error(Error::Internal("worker thread panicked"));
                }
            }
        }
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for HashPool {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn worker(
    id: usize,
    rx: Receiver<Submission>,
    config: Arc<Config>,
    streams: Arc<Streams>,
    shared: Arc<Shared>,
) {
    trace!("worker {id} running");

    let mut md = match Md::new(&config.digest_name) {
        Ok(md) => md,
        Err(err) => {
            // Cannot hash anything; fail the pool but keep draining so
            // every queued completion is still delivered.
            shared.set_error(err.clone());
            drain(&rx, err);
            return;
        }
    };

    while let Ok(sub) = rx.recv() {
        match sub {
            Submission::Stop => break,
            Submission::Zero { stream, seq, index } => {
                streams.apply(stream, seq, Entry::Catchup { index });
            }
            Submission::Data {
                stream,
                seq,
                index,
                data,
                completion,
            } => {
                // The sync path filtered zero blocks before copying;
                // borrowed async buffers are detected here instead, off
                // the caller's thread.
                let entry = if data.is_borrowed()
                    && data.len() == config.block_size
                    && is_zero(data.as_slice())
                {
                    Entry::ZeroBlock { index }
                } else {
                    md.update(data.as_slice());
                    Entry::Block {
                        index,
                        md: md.finalize_reset(),
                    }
                };
                // The data is hashed; release the buffer before taking
                // the stream lock.
                drop(data);
                streams.apply(stream, seq, entry);
                drop(completion);
            }
        }
    }

    trace!("worker {id} stopped");
}

/// Fail everything left in the queue so no completion leaks, then
/// exit on the first STOP.
fn drain(rx: &Receiver<Submission>, error: Error) {
    while let Ok(sub) = rx.recv() {
        match sub {
            Submission::Stop => break,
            sub => sub.set_error(error.clone()),
        }
    }
}
