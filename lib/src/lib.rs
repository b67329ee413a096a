#![doc = include_str!("../README.md")]
// Coding conventions
#![forbid(unsafe_code)]
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(missing_docs)]
#![deny(unused_must_use)]

mod completion;
mod config;
mod digest;
mod error;
mod hash;
mod pool;
mod stream;
mod submission;
mod zero;

pub use completion::Completion;
pub use config::{Opts, MAX_BLOCK_SIZE, MAX_QUEUE_DEPTH, MAX_STREAMS, MIN_BLOCK_SIZE};
pub use digest::{digests, Digest, MAX_MD_SIZE};
pub use error::{Error, Result};
pub use hash::Blkhash;
