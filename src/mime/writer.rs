//! Multipart Writer
//!
//! Emits a `multipart/*` container part by part. Bodies are streamed
//! straight to the output; base64 parts are encoded on the fly.

use std::io::{self, Write};

use tracing::trace;

use crate::buffer::Blob;
use crate::codec::Base64Encoder;
use crate::error::{OmError, Result};
use crate::uid::MAX_BOUNDARY_LEN;

/// `Content-Transfer-Encoding` of an emitted part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferEncoding {
    #[default]
    Binary,
    EightBit,
    Base64,
}

impl TransferEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferEncoding::Binary => "binary",
            TransferEncoding::EightBit => "8bit",
            TransferEncoding::Base64 => "base64",
        }
    }
}

/// Headers of a part about to be written
#[derive(Debug, Clone, Default)]
pub struct PartSpec {
    pub content_type: Option<String>,
    pub transfer_encoding: TransferEncoding,
    /// Written between angle brackets
    pub content_id: Option<String>,
    pub extra_headers: Vec<(String, String)>,
}

impl PartSpec {
    pub fn new(content_id: impl Into<String>, content_type: impl Into<String>) -> Self {
        PartSpec {
            content_type: Some(content_type.into()),
            transfer_encoding: TransferEncoding::Binary,
            content_id: Some(content_id.into()),
            extra_headers: Vec::new(),
        }
    }

    pub fn with_transfer_encoding(mut self, encoding: TransferEncoding) -> Self {
        self.transfer_encoding = encoding;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }
}

/// Writer for a multipart container
pub struct MultipartWriter<W: Write> {
    out: W,
    boundary: String,
    parts: usize,
}

impl<W: Write> MultipartWriter<W> {
    pub fn new(out: W, boundary: &str) -> Result<Self> {
        if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN || !boundary.is_ascii() {
            return Err(OmError::InvalidArgument(format!(
                "boundary must be 1 to {} ASCII characters",
                MAX_BOUNDARY_LEN
            )));
        }
        Ok(MultipartWriter {
            out,
            boundary: boundary.to_string(),
            parts: 0,
        })
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Write the delimiter and headers of the next part
    ///
    /// The returned writer takes the body and must be finished before the
    /// next part starts.
    pub fn start_part(&mut self, spec: &PartSpec) -> Result<PartWriter<'_, W>> {
        let mut head = format!("--{}\r\n", self.boundary);
        if let Some(ct) = &spec.content_type {
            push_header(&mut head, "Content-Type", ct)?;
        }
        push_header(&mut head, "Content-Transfer-Encoding", spec.transfer_encoding.as_str())?;
        if let Some(id) = &spec.content_id {
            push_header(&mut head, "Content-ID", &format!("<{}>", id))?;
        }
        for (name, value) in &spec.extra_headers {
            push_header(&mut head, name, value)?;
        }
        head.push_str("\r\n");
        self.out.write_all(head.as_bytes())?;
        self.parts += 1;
        trace!(part = self.parts, content_id = ?spec.content_id, "part started");

        Ok(match spec.transfer_encoding {
            TransferEncoding::Base64 => PartWriter::Base64(Base64Encoder::new(&mut self.out)),
            _ => PartWriter::Plain(&mut self.out),
        })
    }

    /// Write a whole part from a blob
    pub fn write_part(&mut self, spec: &PartSpec, body: &Blob) -> Result<()> {
        let mut part = self.start_part(spec)?;
        body.write_to(&mut part)?;
        part.finish()
    }

    /// Write the closing delimiter and return the output
    pub fn complete(mut self) -> Result<W> {
        write!(self.out, "--{}--\r\n", self.boundary)?;
        self.out.flush()?;
        Ok(self.out)
    }
}

fn push_header(head: &mut String, name: &str, value: &str) -> Result<()> {
    if !name.is_ascii() || !value.is_ascii() || value.contains(['\r', '\n']) {
        return Err(OmError::InvalidArgument(format!(
            "header {} must be single-line ASCII",
            name
        )));
    }
    head.push_str(name);
    head.push_str(": ");
    head.push_str(value);
    head.push_str("\r\n");
    Ok(())
}

/// Body writer of one part
pub enum PartWriter<'a, W: Write> {
    Plain(&'a mut W),
    Base64(Base64Encoder<&'a mut W>),
}

impl<W: Write> PartWriter<'_, W> {
    /// End the body
    pub fn finish(self) -> Result<()> {
        let out = match self {
            PartWriter::Plain(out) => out,
            PartWriter::Base64(encoder) => encoder.finish()?,
        };
        out.write_all(b"\r\n")?;
        Ok(())
    }
}

impl<W: Write> Write for PartWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            PartWriter::Plain(out) => out.write(buf),
            PartWriter::Base64(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            PartWriter::Plain(out) => out.flush(),
            PartWriter::Base64(encoder) => encoder.flush(),
        }
    }
}
