//! Captures the target's merged stdout/stderr through a non-blocking pipe.
//!
//! The buffer has a fixed capacity; once it is full any further bytes are
//! read and dropped so the child never stalls on a full pipe. Lines that
//! straddle the boundary are cut.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::os::fd::{AsRawFd, OwnedFd};

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::unistd::pipe2;
use tracing::{debug, warn};

use crate::error::DebugError;

pub const DEFAULT_OUTPUT_CAPACITY: usize = 4096;

const READ_CHUNK: usize = 1024;

pub struct OutputCapture {
    reader: Option<File>,
    buffer: Vec<u8>,
    capacity: usize,
    dropped: usize,
}

impl OutputCapture {
    pub fn new(capacity: usize) -> Self {
        Self {
            reader: None,
            buffer: Vec::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Creates a fresh pipe, keeps the read end (non-blocking) and returns the
    /// write end to be installed as the child's stdout/stderr.
    pub fn open(&mut self) -> Result<OwnedFd, DebugError> {
        self.close();

        let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC)
            .map_err(|e| DebugError::LaunchFailure(format!("pipe: {e}")))?;

        let flags = fcntl(read_end.as_raw_fd(), FcntlArg::F_GETFL)
            .map_err(|e| DebugError::LaunchFailure(format!("fcntl: {e}")))?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(read_end.as_raw_fd(), FcntlArg::F_SETFL(flags))
            .map_err(|e| DebugError::LaunchFailure(format!("fcntl: {e}")))?;

        self.reader = Some(File::from(read_end));
        Ok(write_end)
    }

    /// Drains whatever the pipe currently holds. Returns the number of bytes
    /// that made it into the buffer.
    pub fn poll(&mut self) -> usize {
        let Some(reader) = self.reader.as_mut() else {
            return 0;
        };

        let mut chunk = [0u8; READ_CHUNK];
        let mut pending = Vec::new();
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("output pipe read failed: {e}");
                    break;
                }
            }
        }
        self.append(&pending)
    }

    fn append(&mut self, bytes: &[u8]) -> usize {
        let room = self.capacity - self.buffer.len();
        let taken = bytes.len().min(room);
        self.buffer.extend_from_slice(&bytes[..taken]);
        self.dropped += bytes.len() - taken;
        taken
    }

    /// Reads and discards anything left in the pipe, then closes it.
    pub fn close(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            let mut sink = [0u8; READ_CHUNK];
            let mut discarded = 0usize;
            loop {
                match reader.read(&mut sink) {
                    Ok(0) => break,
                    Ok(n) => discarded += n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            if discarded > 0 {
                debug!(discarded, "discarded unread target output");
            }
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.dropped = 0;
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() == self.capacity
    }

    /// Bytes thrown away because the buffer was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl Drop for OutputCapture {
    fn drop(&mut self) {
        self.close();
    }
}
