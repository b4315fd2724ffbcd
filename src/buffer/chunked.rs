//! Chunked Byte Buffer
//!
//! Append-only storage made of fixed-size blocks. A block is allocated at its
//! full size and never resized or copied afterwards, so appending large
//! payloads never triggers the reallocate-and-copy cycle of a growing `Vec`.
//!
//! Readers share the block list with the writer: bytes appended after a
//! reader was opened become visible to it without reopening.

use std::io::{self, Read, Write};
use std::sync::Arc;

use parking_lot::RwLock;

use super::blob::Blob;
use crate::config::DEFAULT_BLOCK_SIZE;

/// Shared block storage
#[derive(Debug)]
pub(crate) struct Blocks {
    blocks: Vec<Box<[u8]>>,
    /// Total number of bytes written
    len: usize,
    block_size: usize,
}

impl Blocks {
    fn new(block_size: usize) -> Self {
        Blocks {
            blocks: Vec::new(),
            len: 0,
            block_size: block_size.max(1),
        }
    }

    fn append(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let used = self.len % self.block_size;
            if used == 0 && self.len / self.block_size == self.blocks.len() {
                self.blocks
                    .push(vec![0u8; self.block_size].into_boxed_slice());
            }
            let block = self.len / self.block_size;
            let room = self.block_size - used;
            let n = room.min(data.len());
            self.blocks[block][used..used + n].copy_from_slice(&data[..n]);
            self.len += n;
            data = &data[n..];
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Copy bytes starting at `offset` into `into`, returning the count copied
    pub(crate) fn read_at(&self, into: &mut [u8], offset: usize) -> usize {
        if offset >= self.len {
            return 0;
        }
        let wanted = into.len().min(self.len - offset);
        let mut copied = 0;
        while copied < wanted {
            let pos = offset + copied;
            let block = pos / self.block_size;
            let within = pos % self.block_size;
            let n = (self.block_size - within).min(wanted - copied);
            into[copied..copied + n].copy_from_slice(&self.blocks[block][within..within + n]);
            copied += n;
        }
        copied
    }

    /// Iterate over the filled portion of every block
    pub(crate) fn chunks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let len = self.len;
        let block_size = self.block_size;
        self.blocks.iter().enumerate().map(move |(i, block)| {
            let start = i * block_size;
            let end = (start + block_size).min(len);
            &block[..end - start]
        })
    }
}

/// Append-only buffer backed by fixed-size blocks
#[derive(Debug)]
pub struct ChunkedBuffer {
    inner: Arc<RwLock<Blocks>>,
}

impl ChunkedBuffer {
    /// Create a buffer with the default block size
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// Create a buffer whose blocks hold `block_size` bytes each
    pub fn with_block_size(block_size: usize) -> Self {
        ChunkedBuffer {
            inner: Arc::new(RwLock::new(Blocks::new(block_size))),
        }
    }

    /// Append bytes
    pub fn write(&mut self, data: &[u8]) {
        self.inner.write().append(data);
    }

    /// Copy everything from `reader` into the buffer, returning the byte count
    pub fn read_from<R: Read>(&mut self, mut reader: R) -> io::Result<u64> {
        let mut chunk = [0u8; 8192];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => return Ok(total),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            self.write(&chunk[..n]);
            total += n as u64;
        }
    }

    /// Read up to `into.len()` bytes starting at `offset`
    pub fn read_at(&self, into: &mut [u8], offset: usize) -> usize {
        self.inner.read().read_at(into, offset)
    }

    /// Number of bytes written so far
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of blocks allocated
    pub fn block_count(&self) -> usize {
        self.inner.read().blocks.len()
    }

    /// Open a reader positioned at the start
    pub fn reader(&self) -> ChunkedReader {
        ChunkedReader {
            inner: Arc::clone(&self.inner),
            pos: 0,
        }
    }

    /// Stop writing and turn the content into an immutable blob
    pub fn seal(self) -> Blob {
        Blob::from_blocks(self.inner)
    }
}

impl Default for ChunkedBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for ChunkedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ChunkedBuffer::write(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sequential reader over a chunked buffer or blob
#[derive(Debug, Clone)]
pub struct ChunkedReader {
    inner: Arc<RwLock<Blocks>>,
    pos: usize,
}

impl ChunkedReader {
    pub(crate) fn over(inner: Arc<RwLock<Blocks>>) -> Self {
        ChunkedReader { inner, pos: 0 }
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read().read_at(buf, self.pos);
        self.pos += n;
        Ok(n)
    }
}
