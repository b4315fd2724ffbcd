//! Multipart Stream Reader
//!
//! Forward-only tokenizer for `multipart/*` bodies. Delimiters are located
//! with a precompiled `memchr::memmem` searcher; the body of the current part
//! is handed out in pieces while holding back just enough bytes to recognise
//! a delimiter split across reads.
//!
//! A CRLF is assumed before the input so that a delimiter on the very first
//! line is found like any other. Preamble and epilogue are ignored. Once a
//! structural problem is found the reader stays failed.

use std::io::{self, Read};

use memchr::memmem::{self, Finder};
use tracing::{trace, warn};

use super::headers::PartHeaders;
use crate::error::{OmError, Result};

/// Bytes requested from the input per read
const READ_CHUNK: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the first delimiter
    Preamble,
    /// Inside the body of a part
    Body,
    /// Just past a delimiter
    Delimited,
    /// Closing delimiter seen
    Done,
}

pub(crate) struct MultipartReader<R: Read> {
    input: R,
    buf: Vec<u8>,
    /// Consumed prefix of `buf`
    pos: usize,
    /// `\r\n--` followed by the boundary
    delimiter_len: usize,
    finder: Finder<'static>,
    state: State,
    eof: bool,
    failed: Option<String>,
}

impl<R: Read> MultipartReader<R> {
    pub(crate) fn new(input: R, boundary: &str) -> Self {
        let delimiter = format!("\r\n--{}", boundary).into_bytes();
        MultipartReader {
            input,
            buf: b"\r\n".to_vec(),
            pos: 0,
            delimiter_len: delimiter.len(),
            finder: Finder::new(&delimiter).into_owned(),
            state: State::Preamble,
            eof: false,
            failed: None,
        }
    }

    #[inline]
    fn available(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Read more input; false at end of input
    fn fill(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        let old = self.buf.len();
        self.buf.resize(old + READ_CHUNK, 0);
        let n = loop {
            match self.input.read(&mut self.buf[old..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(old);
                    return Err(e.into());
                }
            }
        };
        self.buf.truncate(old + n);
        if n == 0 {
            self.eof = true;
        }
        Ok(n > 0)
    }

    /// Make at least `n` bytes available; false if the input ends first
    fn ensure(&mut self, n: usize) -> Result<bool> {
        while self.available().len() < n {
            if !self.fill()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn fail(&mut self, message: &str) -> OmError {
        warn!(reason = message, "malformed multipart container");
        self.failed = Some(message.to_string());
        OmError::MalformedContainer(message.to_string())
    }

    /// Fail on a problem found above the wire level
    pub(crate) fn poison(&mut self, message: &str) {
        warn!(reason = message, "malformed multipart container");
        self.failed = Some(message.to_string());
    }

    /// Repeat an earlier structural failure
    pub(crate) fn check(&self) -> Result<()> {
        match &self.failed {
            Some(message) => Err(OmError::MalformedContainer(message.clone())),
            None => Ok(()),
        }
    }

    /// Check if the closing delimiter was reached
    pub(crate) fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Advance to the next part and parse its headers
    ///
    /// Any unread body of the current part is skipped. Returns None after the
    /// closing delimiter.
    pub(crate) fn next_part(&mut self) -> Result<Option<PartHeaders>> {
        self.check()?;
        match self.state {
            State::Done => return Ok(None),
            State::Preamble | State::Body => self.skip_to_delimiter()?,
            State::Delimited => {}
        }

        if !self.ensure(2)? {
            return Err(self.fail("input ends right after a boundary delimiter"));
        }
        if self.available().starts_with(b"--") {
            self.pos += 2;
            self.state = State::Done;
            trace!("closing delimiter");
            return Ok(None);
        }

        // Transport padding
        loop {
            if !self.ensure(1)? {
                return Err(self.fail("input ends inside delimiter padding"));
            }
            let b = self.available()[0];
            if b != b' ' && b != b'\t' {
                break;
            }
            self.pos += 1;
        }
        if !self.ensure(2)? || !self.available().starts_with(b"\r\n") {
            return Err(self.fail("missing CRLF after boundary delimiter"));
        }
        self.pos += 2;

        let block = self.read_header_block()?;
        let headers = match PartHeaders::parse(&block) {
            Ok(headers) => headers,
            Err(message) => return Err(self.fail(&message)),
        };
        self.state = State::Body;
        Ok(Some(headers))
    }

    fn read_header_block(&mut self) -> Result<Vec<u8>> {
        if !self.ensure(2)? {
            return Err(self.fail("truncated part headers"));
        }
        if self.available().starts_with(b"\r\n") {
            self.pos += 2;
            return Ok(Vec::new());
        }

        let mut searched = 0;
        loop {
            if let Some(i) = memmem::find(&self.available()[searched..], b"\r\n\r\n") {
                let end = searched + i;
                let block = self.available()[..end].to_vec();
                self.pos += end + 4;
                return Ok(block);
            }
            searched = self.available().len().saturating_sub(3);
            if !self.fill()? {
                return Err(self.fail("truncated part headers"));
            }
        }
    }

    fn skip_to_delimiter(&mut self) -> Result<()> {
        let in_preamble = self.state == State::Preamble;
        loop {
            let avail = self.available();
            if let Some(i) = self.finder.find(avail) {
                self.pos += i + self.delimiter_len;
                self.state = State::Delimited;
                return Ok(());
            }
            let safe = avail.len().saturating_sub(self.delimiter_len - 1);
            self.pos += safe;
            if !self.fill()? {
                return Err(self.fail(if in_preamble {
                    "no boundary delimiter found"
                } else {
                    "truncated part body"
                }));
            }
        }
    }

    /// Copy body bytes of the current part into `out`; 0 at the end of the part
    pub(crate) fn read_body(&mut self, out: &mut [u8]) -> Result<usize> {
        self.check()?;
        if self.state != State::Body || out.is_empty() {
            return Ok(0);
        }
        loop {
            let avail = self.available();
            let readable = match self.finder.find(avail) {
                Some(0) => {
                    self.pos += self.delimiter_len;
                    self.state = State::Delimited;
                    return Ok(0);
                }
                Some(i) => i,
                None => avail.len().saturating_sub(self.delimiter_len - 1),
            };
            if readable > 0 {
                let n = readable.min(out.len());
                out[..n].copy_from_slice(&avail[..n]);
                self.pos += n;
                return Ok(n);
            }
            if !self.fill()? {
                return Err(self.fail("truncated part body"));
            }
        }
    }
}

/// Read adapter over the body of the current part
pub(crate) struct BodyReader<'a, R: Read> {
    pub(crate) inner: &'a mut MultipartReader<R>,
}

impl<R: Read> Read for BodyReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read_body(buf).map_err(|e| match e {
            OmError::Io(io) => io,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(reader: &mut MultipartReader<&[u8]>) -> Vec<u8> {
        let mut out = Vec::new();
        BodyReader { inner: reader }.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_two_parts_with_preamble_and_epilogue() {
        let input: &[u8] = b"preamble\r\n--b1\r\nContent-ID: <a>\r\n\r\nfirst\r\n--b1  \r\n\r\nsecond\r\n--b1--\r\nepilogue";
        let mut reader = MultipartReader::new(input, "b1");

        let headers = reader.next_part().unwrap().unwrap();
        assert_eq!(headers.content_id().as_deref(), Some("a"));
        assert_eq!(body(&mut reader), b"first");

        let headers = reader.next_part().unwrap().unwrap();
        assert!(headers.is_empty());
        assert_eq!(body(&mut reader), b"second");

        assert!(reader.next_part().unwrap().is_none());
        assert!(reader.is_done());
    }

    #[test]
    fn test_delimiter_split_across_reads() {
        let mut content = Vec::new();
        content.extend_from_slice(b"--xyz\r\n\r\n");
        content.extend(std::iter::repeat(b'a').take(READ_CHUNK - 3));
        content.extend_from_slice(b"\r\n--xyz--");
        let mut reader = MultipartReader::new(&content[..], "xyz");

        reader.next_part().unwrap().unwrap();
        assert_eq!(body(&mut reader).len(), READ_CHUNK - 3);
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn test_skip_unread_body() {
        let input: &[u8] = b"--b\r\n\r\nskipped\r\n--b\r\nX: 1\r\n\r\nread\r\n--b--";
        let mut reader = MultipartReader::new(input, "b");
        reader.next_part().unwrap().unwrap();
        let headers = reader.next_part().unwrap().unwrap();
        assert_eq!(headers.get("x"), Some("1"));
        assert_eq!(body(&mut reader), b"read");
    }

    #[test]
    fn test_missing_crlf_after_delimiter() {
        let input: &[u8] = b"--b\r\n\r\nbody\r\n--bgarbage";
        let mut reader = MultipartReader::new(input, "b");
        reader.next_part().unwrap().unwrap();
        let mut out = Vec::new();
        BodyReader { inner: &mut reader }.read_to_end(&mut out).unwrap();

        assert!(matches!(reader.next_part(), Err(OmError::MalformedContainer(_))));
        assert!(matches!(reader.next_part(), Err(OmError::MalformedContainer(_))));
    }

    #[test]
    fn test_truncated_body() {
        let input: &[u8] = b"--b\r\n\r\nno closing delimiter";
        let mut reader = MultipartReader::new(input, "b");
        reader.next_part().unwrap().unwrap();
        let mut out = Vec::new();
        assert!(BodyReader { inner: &mut reader }.read_to_end(&mut out).is_err());
        assert!(reader.check().is_err());
    }

    #[test]
    fn test_no_delimiter() {
        let mut reader = MultipartReader::new(&b"just text"[..], "b");
        assert!(matches!(reader.next_part(), Err(OmError::MalformedContainer(_))));
    }
}
