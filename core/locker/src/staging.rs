//! Plaintext staging for unlock.
//!
//! Decrypted bytes are unauthenticated until the tag has been checked, so
//! they are collected here instead of going to the caller's destination.
//! Small outputs stay in memory; past a threshold the buffer spills to an
//! anonymous temporary file. [`StagingBuffer::commit`] is the only way bytes
//! leave, and dropping the buffer discards them.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use flintlock_common::Result;

/// Default in-memory limit before spilling to disk (64 MiB).
pub const DEFAULT_MAX_IN_MEMORY: usize = 64 * 1024 * 1024;

/// Where staged plaintext may live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingPolicy {
    /// Bytes kept in memory before spilling to a temporary file.
    pub max_in_memory: usize,
    /// Directory for spill files; the system temp directory if unset.
    pub spill_dir: Option<PathBuf>,
}

impl Default for StagingPolicy {
    fn default() -> Self {
        Self {
            max_in_memory: DEFAULT_MAX_IN_MEMORY,
            spill_dir: None,
        }
    }
}

/// Holds plaintext until it is authenticated.
pub struct StagingBuffer {
    memory: Zeroizing<Vec<u8>>,
    spill: Option<File>,
    policy: StagingPolicy,
    len: u64,
}

impl StagingBuffer {
    pub fn new(policy: &StagingPolicy) -> Self {
        Self {
            memory: Zeroizing::new(Vec::new()),
            spill: None,
            policy: policy.clone(),
            len: 0,
        }
    }

    /// Bytes staged so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the buffer has moved to a temporary file.
    pub fn is_spilled(&self) -> bool {
        self.spill.is_some()
    }

    /// Copy everything staged into `destination` and flush it.
    ///
    /// Returns the number of bytes written.
    pub fn commit<W: Write>(mut self, mut destination: W) -> Result<u64> {
        match self.spill.as_mut() {
            Some(file) => {
                file.seek(SeekFrom::Start(0))?;
                io::copy(file, &mut destination)?;
            }
            None => destination.write_all(&self.memory)?,
        }
        destination.flush()?;
        Ok(self.len)
    }

    /// Move staged bytes into a fresh temporary file.
    fn start_spill(&mut self) -> io::Result<()> {
        let mut file = match &self.policy.spill_dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        file.write_all(&self.memory)?;
        self.memory.zeroize();
        self.spill = Some(file);
        Ok(())
    }

    /// Grow the in-memory buffer without leaving copies behind in freed
    /// allocations.
    fn reserve(&mut self, additional: usize) {
        let needed = self.memory.len() + additional;
        if needed <= self.memory.capacity() {
            return;
        }
        let doubled = (self.memory.capacity() * 2).min(self.policy.max_in_memory);
        let capacity = needed.max(doubled);
        let mut grown = Zeroizing::new(Vec::with_capacity(capacity));
        grown.extend_from_slice(&self.memory);
        self.memory = grown;
    }
}

impl Write for StagingBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.spill.is_none() && self.memory.len() + buf.len() > self.policy.max_in_memory {
            self.start_spill()?;
        }
        match self.spill.as_mut() {
            Some(file) => file.write_all(buf)?,
            None => {
                self.reserve(buf.len());
                self.memory.extend_from_slice(buf);
            }
        }
        self.len += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.spill.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for StagingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingBuffer")
            .field("len", &self.len)
            .field("spilled", &self.is_spilled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_in_memory: usize) -> StagingPolicy {
        StagingPolicy {
            max_in_memory,
            spill_dir: None,
        }
    }

    #[test]
    fn test_stays_in_memory_under_threshold() {
        let mut staging = StagingBuffer::new(&policy(64));
        staging.write_all(&[1u8; 64]).unwrap();
        assert!(!staging.is_spilled());
        assert_eq!(staging.len(), 64);

        let mut out = Vec::new();
        assert_eq!(staging.commit(&mut out).unwrap(), 64);
        assert_eq!(out, vec![1u8; 64]);
    }

    #[test]
    fn test_spills_past_threshold() {
        let mut staging = StagingBuffer::new(&policy(10));
        staging.write_all(b"0123456").unwrap();
        assert!(!staging.is_spilled());
        staging.write_all(b"789abcdef").unwrap();
        assert!(staging.is_spilled());
        staging.write_all(b"ghij").unwrap();

        let mut out = Vec::new();
        staging.commit(&mut out).unwrap();
        assert_eq!(out, b"0123456789abcdefghij");
    }

    #[test]
    fn test_spill_dir_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let mut staging = StagingBuffer::new(&StagingPolicy {
            max_in_memory: 0,
            spill_dir: Some(dir.path().to_path_buf()),
        });
        staging.write_all(b"spilled").unwrap();
        assert!(staging.is_spilled());

        let mut out = Vec::new();
        staging.commit(&mut out).unwrap();
        assert_eq!(out, b"spilled");
    }

    #[test]
    fn test_missing_spill_dir_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut staging = StagingBuffer::new(&StagingPolicy {
            max_in_memory: 0,
            spill_dir: Some(dir.path().join("does-not-exist")),
        });
        assert!(staging.write_all(b"x").is_err());
    }

    #[test]
    fn test_empty_commit() {
        let staging = StagingBuffer::new(&StagingPolicy::default());
        assert!(staging.is_empty());
        let mut out = Vec::new();
        assert_eq!(staging.commit(&mut out).unwrap(), 0);
        assert!(out.is_empty());
    }
}
