//! Blob - sealed binary content
//!
//! Cheap to clone; every clone shares the same blocks. A blob may outlive the
//! store or builder that produced it.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;

use super::chunked::{Blocks, ChunkedBuffer, ChunkedReader};

/// Immutable binary content
#[derive(Clone)]
pub struct Blob {
    blocks: Arc<RwLock<Blocks>>,
}

impl Blob {
    pub(crate) fn from_blocks(blocks: Arc<RwLock<Blocks>>) -> Self {
        Blob { blocks }
    }

    /// Create a blob holding a copy of `data`
    pub fn from_slice(data: &[u8]) -> Self {
        let mut buf = ChunkedBuffer::with_block_size(data.len().max(1));
        buf.write(data);
        buf.seal()
    }

    /// Create an empty blob
    pub fn empty() -> Self {
        ChunkedBuffer::with_block_size(1).seal()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open an independent reader over the content
    pub fn reader(&self) -> ChunkedReader {
        ChunkedReader::over(Arc::clone(&self.blocks))
    }

    /// Write the whole content to `out`
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        let blocks = self.blocks.read();
        for chunk in blocks.chunks() {
            out.write_all(chunk)?;
        }
        Ok(())
    }

    /// Copy the content into a contiguous buffer
    pub fn to_bytes(&self) -> Bytes {
        let blocks = self.blocks.read();
        let mut out = BytesMut::with_capacity(blocks.len());
        for chunk in blocks.chunks() {
            out.extend_from_slice(chunk);
        }
        out.freeze()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.to_bytes().to_vec()
    }
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.blocks, &other.blocks)
            || (self.len() == other.len() && self.to_bytes() == other.to_bytes())
    }
}

impl Eq for Blob {}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob").field("len", &self.len()).finish()
    }
}

impl From<&[u8]> for Blob {
    fn from(data: &[u8]) -> Self {
        Blob::from_slice(data)
    }
}

impl From<Vec<u8>> for Blob {
    fn from(data: Vec<u8>) -> Self {
        Blob::from_slice(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_blob_roundtrip() {
        let blob = Blob::from_slice(b"binary\x00\xffcontent");
        assert_eq!(blob.len(), 15);
        assert_eq!(blob.to_vec(), b"binary\x00\xffcontent");
    }

    #[test]
    fn test_clones_share_content() {
        let blob = Blob::from_slice(b"shared");
        let copy = blob.clone();
        assert_eq!(blob, copy);

        let mut out = String::new();
        copy.reader().read_to_string(&mut out).unwrap();
        assert_eq!(out, "shared");
    }

    #[test]
    fn test_empty_blob() {
        let blob = Blob::empty();
        assert!(blob.is_empty());
        assert_eq!(blob, Blob::from_slice(b""));
    }

    #[test]
    fn test_write_to_multi_block() {
        let mut buf = ChunkedBuffer::with_block_size(2);
        buf.write(b"abcde");
        let blob = buf.seal();

        let mut out = Vec::new();
        blob.write_to(&mut out).unwrap();
        assert_eq!(out, b"abcde");
    }
}
