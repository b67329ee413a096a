use std::fmt;

use digest::DynDigest;

use crate::error::{Error, Result};

/// Maximum size in bytes of a digest produced by this crate.
pub const MAX_MD_SIZE: usize = 64;

const NAMES: &[&str] = &["null", "md5", "sha1", "sha224", "sha256", "sha384", "sha512"];

/// Return the names of the supported digest algorithms.
///
/// `"null"` is a zero-cost digest with empty output, useful for
/// measuring the engine overhead without any hashing.
pub fn digests() -> &'static [&'static str] {
    NAMES
}

/// A finalized message digest.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Digest {
    bytes: [u8; MAX_MD_SIZE],
    len: u8,
}

impl Digest {
    pub(crate) fn new(bytes: [u8; MAX_MD_SIZE], len: usize) -> Digest {
        debug_assert!(len <= MAX_MD_SIZE);
        Digest {
            bytes,
            len: len as u8,
        }
    }

    /// The digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Lowercase hex representation of the digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// A hash context selected by name at run time, with init, update and
/// finalize semantics. Finalizing resets the context so it can be
/// reused for the next block.
pub(crate) enum Md {
    Null,
    Hash(Box<dyn DynDigest + Send>),
}

impl Md {
    pub(crate) fn new(name: &str) -> Result<Md> {
        let hash: Box<dyn DynDigest + Send> = match name.to_ascii_lowercase().as_str() {
            "null" => return Ok(Md::Null),
            "md5" => Box::new(md5::Md5::default()),
            "sha1" => Box::new(sha1::Sha1::default()),
            "sha224" => Box::new(sha2::Sha224::default()),
            "sha256" => Box::new(sha2::Sha256::default()),
            "sha384" => Box::new(sha2::Sha384::default()),
            "sha512" => Box::new(sha2::Sha512::default()),
            _ => return Err(Error::UnknownDigest(name.to_string())),
        };
        Ok(Md::Hash(hash))
    }

    pub(crate) fn output_size(&self) -> usize {
        match self {
            Md::Null => 0,
            Md::Hash(hash) => hash.output_size(),
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            Md::Null => {}
            Md::Hash(hash) => hash.update(data),
        }
    }

    pub(crate) fn finalize_reset(&mut self) -> Digest {
        let mut bytes = [0u8; MAX_MD_SIZE];
        let len = self.output_size();
        if let Md::Hash(hash) = self {
            hash.finalize_into_reset(&mut bytes[..len])
                .expect("digest output fits the buffer");
        }
        Digest::new(bytes, len)
    }
}
