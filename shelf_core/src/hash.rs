//! Content digests using BLAKE3.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::Write;
use std::path::Path;

/// Length of a content-copy digest in bytes.
pub const DIGEST_SIZE: usize = 32;

/// Digest algorithm recorded in the store's `config` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Blake3,
}

impl Algorithm {
    /// Name written as `algo=` in the store config.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Blake3 => "blake3-256",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "blake3-256" => Ok(Algorithm::Blake3),
            other => Err(Error::unsupported_algorithm(other)),
        }
    }
}

/// A 32-byte BLAKE3 digest identifying the bytes of a content copy.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; DIGEST_SIZE]);

impl Digest {
    /// Parse the 64-character hex form stored in `File.checksum`.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let mut digest = [0u8; DIGEST_SIZE];
        hex::decode_to_slice(hex_str, &mut digest).map_err(|e| {
            Error::invalid_hash(format!("{:?} is not a {}-byte hex digest: {}", hex_str, DIGEST_SIZE, e))
        })?;
        Ok(Digest(digest))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The two single-character shard directories: first and second hex digit.
    pub fn shard(&self) -> [String; 2] {
        let [hi, lo] = [self.0[0] >> 4, self.0[0] & 0x0f];
        [format!("{:x}", hi), format!("{:x}", lo)]
    }

    pub fn hash_bytes(data: &[u8]) -> Self {
        Digest(*blake3::hash(data).as_bytes())
    }

    /// Digest of a file on disk, streamed.
    pub fn hash_file(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut writer = HashingWriter::new(std::io::sink());
        std::io::copy(&mut file, &mut writer)?;
        let (_, digest, _) = writer.finalize();
        Ok(digest)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Writer adapter that hashes everything passing through it.
pub(crate) struct HashingWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            written: 0,
        }
    }

    /// Finish hashing, returning the inner writer, the digest and the byte count.
    pub(crate) fn finalize(self) -> (W, Digest, u64) {
        let digest = Digest(*self.hasher.finalize().as_bytes());
        (self.inner, digest, self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
