//! Attachment Store
//!
//! Lazily parses a multipart container from a forward-only stream. Parts
//! can be consumed in order, or looked up by content ID; a lookup that has
//! to move forward buffers every part it passes so nothing becomes
//! unreachable. Parts taken as a stream are the exception: their bytes are
//! handed out once and never kept.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};

use tracing::{debug, trace};

use super::headers::{normalize_content_id, ContentType, PartHeaders};
use super::multipart::{BodyReader, MultipartReader};
use crate::buffer::{Blob, ChunkedBuffer};
use crate::codec::Base64Decoder;
use crate::config::{OmConfig, DEFAULT_BLOCK_SIZE};
use crate::error::{OmError, Result};
use crate::uid::MAX_BOUNDARY_LEN;

/// Lifecycle of a part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartState {
    /// Headers parsed, body still on the wire
    Pending,
    /// Body buffered and retrievable any number of times
    Available,
    /// Body handed out as a read-once stream
    Streamed,
}

/// A buffered part
#[derive(Debug, Clone)]
pub struct Part {
    content_id: Option<String>,
    headers: PartHeaders,
    blob: Blob,
}

impl Part {
    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    pub fn headers(&self) -> &PartHeaders {
        &self.headers
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.content_type()
    }

    /// Decoded body
    pub fn blob(&self) -> &Blob {
        &self.blob
    }

    pub fn into_blob(self) -> Blob {
        self.blob
    }
}

struct PartEntry {
    content_id: Option<String>,
    headers: PartHeaders,
    state: PartState,
    blob: Option<Blob>,
}

/// Multipart container parsed on demand
pub struct AttachmentStore<R: Read> {
    reader: MultipartReader<R>,
    content_type: Option<ContentType>,
    /// Explicit root content ID from the `start` parameter
    start: Option<String>,
    /// Parts in stream order
    parts: Vec<PartEntry>,
    index: HashMap<String, usize>,
    root: Option<usize>,
    block_size: usize,
}

impl<R: Read> AttachmentStore<R> {
    /// Open a container with a known boundary
    ///
    /// Without a root content ID the first part is the root part.
    pub fn new(reader: R, boundary: &str, root_content_id: Option<&str>) -> Result<Self> {
        if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
            return Err(OmError::InvalidArgument(format!(
                "boundary must be 1 to {} characters",
                MAX_BOUNDARY_LEN
            )));
        }
        Ok(AttachmentStore {
            reader: MultipartReader::new(reader, boundary),
            content_type: None,
            start: root_content_id.map(normalize_content_id),
            parts: Vec::new(),
            index: HashMap::new(),
            root: None,
            block_size: DEFAULT_BLOCK_SIZE,
        })
    }

    /// Open a container described by a `multipart/*` content type
    pub fn from_content_type(reader: R, content_type: &str) -> Result<Self> {
        let ct = ContentType::parse(content_type)?;
        if !ct.is_multipart() {
            return Err(OmError::MalformedContainer(format!(
                "'{}' is not a multipart content type",
                ct.media_type()
            )));
        }
        let boundary = ct
            .parameter("boundary")
            .ok_or_else(|| OmError::MalformedContainer("missing boundary parameter".to_string()))?
            .to_string();
        let start = ct.parameter("start").map(str::to_string);

        let mut store = Self::new(reader, &boundary, start.as_deref())?;
        store.content_type = Some(ct);
        Ok(store)
    }

    /// Apply buffer settings from configuration
    pub fn with_config(mut self, config: &OmConfig) -> Self {
        self.block_size = config.buffer.block_size.max(1);
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Container content type, when opened from one
    pub fn content_type(&self) -> Option<&ContentType> {
        self.content_type.as_ref()
    }

    /// Content ID of the root part: the `start` parameter, else the first
    /// part's ID once it has been read
    pub fn root_content_id(&self) -> Option<&str> {
        match &self.start {
            Some(start) => Some(start),
            None => self.root.and_then(|i| self.parts[i].content_id.as_deref()),
        }
    }

    /// Read the next part's headers and register it
    fn advance(&mut self) -> Result<Option<usize>> {
        let Some(headers) = self.reader.next_part()? else {
            return Ok(None);
        };
        let content_id = headers.content_id();
        let idx = self.parts.len();
        debug!(part = idx, content_id = ?content_id, headers = headers.len(), "part headers parsed");

        if let Some(id) = &content_id {
            if self.index.contains_key(id) {
                let message = format!("two parts with content ID '{}'", id);
                // Poison the reader like any other container error
                return Err(self.reader_failure(&message));
            }
            self.index.insert(id.clone(), idx);
        }

        let is_root = match &self.start {
            Some(start) => content_id.as_deref() == Some(start.as_str()),
            None => idx == 0,
        };
        if is_root {
            self.root = Some(idx);
        }

        self.parts.push(PartEntry {
            content_id,
            headers,
            state: PartState::Pending,
            blob: None,
        });
        Ok(Some(idx))
    }

    fn reader_failure(&mut self, message: &str) -> OmError {
        self.reader.poison(message);
        OmError::MalformedContainer(message.to_string())
    }

    /// Buffer the body of the part just advanced to
    fn buffer(&mut self, idx: usize) -> Result<Blob> {
        let mut raw = ChunkedBuffer::with_block_size(self.block_size);
        raw.read_from(BodyReader {
            inner: &mut self.reader,
        })
        .map_err(unwrap_io)?;

        let base64 = self.parts[idx].headers.transfer_encoding().as_deref() == Some("base64");
        let blob = if base64 {
            let mut decoded = ChunkedBuffer::with_block_size(self.block_size);
            if let Err(e) = decoded.read_from(Base64Decoder::new(raw.reader())) {
                return Err(self.reader_failure(&format!("invalid base64 part body: {}", e)));
            }
            decoded.seal()
        } else {
            raw.seal()
        };

        trace!(part = idx, bytes = blob.len(), "part buffered");
        let entry = &mut self.parts[idx];
        entry.state = PartState::Available;
        entry.blob = Some(blob.clone());
        Ok(blob)
    }

    fn part_at(&self, idx: usize) -> Part {
        let entry = &self.parts[idx];
        Part {
            content_id: entry.content_id.clone(),
            headers: entry.headers.clone(),
            blob: entry.blob.clone().unwrap_or_else(Blob::empty),
        }
    }

    fn available_blob(&self, idx: usize) -> Result<Blob> {
        let entry = &self.parts[idx];
        match (&entry.state, &entry.blob) {
            (PartState::Available, Some(blob)) => Ok(blob.clone()),
            _ => Err(OmError::InvalidArgument(format!(
                "part '{}' was consumed as a stream",
                entry.content_id.as_deref().unwrap_or("")
            ))),
        }
    }

    /// Buffer and return the next part in stream order
    pub fn next_part(&mut self) -> Result<Option<Part>> {
        let Some(idx) = self.advance()? else {
            return Ok(None);
        };
        self.buffer(idx)?;
        Ok(Some(self.part_at(idx)))
    }

    /// Hand out the next part's body as a read-once stream
    ///
    /// Whatever is left unread is skipped by the next call on the store.
    pub fn next_part_stream(&mut self) -> Result<Option<PartStream<'_>>> {
        let Some(idx) = self.advance()? else {
            return Ok(None);
        };
        let entry = &mut self.parts[idx];
        entry.state = PartState::Streamed;
        let content_id = entry.content_id.clone();
        let headers = entry.headers.clone();
        debug!(part = idx, content_id = ?content_id, "part streamed");

        let body = BodyReader {
            inner: &mut self.reader,
        };
        let inner: Box<dyn Read + '_> = if headers.transfer_encoding().as_deref() == Some("base64") {
            Box::new(Base64Decoder::new(body))
        } else {
            Box::new(body)
        };
        Ok(Some(PartStream {
            content_id,
            headers,
            inner,
        }))
    }

    /// Body of the part with the given content ID
    ///
    /// Parts between the current position and the match are buffered.
    /// Returns `Ok(None)` when no such part exists.
    pub fn get_part(&mut self, content_id: &str) -> Result<Option<Blob>> {
        self.reader.check()?;
        let content_id = normalize_content_id(content_id);
        if let Some(&idx) = self.index.get(&content_id) {
            return self.available_blob(idx).map(Some);
        }
        while let Some(idx) = self.advance()? {
            let blob = self.buffer(idx)?;
            if self.parts[idx].content_id.as_deref() == Some(content_id.as_str()) {
                return Ok(Some(blob));
            }
        }
        Ok(None)
    }

    /// Body of the root part
    pub fn root_part(&mut self) -> Result<Blob> {
        self.reader.check()?;
        if let Some(idx) = self.root {
            return self.available_blob(idx);
        }
        while let Some(idx) = self.advance()? {
            let blob = self.buffer(idx)?;
            if self.root == Some(idx) {
                return Ok(blob);
            }
        }
        Err(OmError::MalformedContainer("mandatory root part is missing".to_string()))
    }

    /// Headers and state of an already registered part
    pub fn part(&self, content_id: &str) -> Option<(&PartHeaders, PartState)> {
        let idx = *self.index.get(&normalize_content_id(content_id))?;
        let entry = &self.parts[idx];
        Some((&entry.headers, entry.state))
    }

    /// Buffer every remaining part
    pub fn detach(&mut self) -> Result<()> {
        while let Some(idx) = self.advance()? {
            self.buffer(idx)?;
        }
        Ok(())
    }

    /// Content IDs of all parts in stream order; reads the whole container
    pub fn content_ids(&mut self) -> Result<Vec<String>> {
        self.detach()?;
        Ok(self.parts.iter().filter_map(|p| p.content_id.clone()).collect())
    }

    /// Number of parts; reads the whole container
    pub fn part_count(&mut self) -> Result<usize> {
        self.detach()?;
        Ok(self.parts.len())
    }

    /// Check if the closing delimiter has been read
    pub fn is_exhausted(&self) -> bool {
        self.reader.is_done()
    }
}

impl<R: Read> fmt::Debug for AttachmentStore<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentStore")
            .field("parts", &self.parts.len())
            .field("root", &self.root)
            .field("exhausted", &self.is_exhausted())
            .finish()
    }
}

/// Recover the store error carried through an `io::Error`
fn unwrap_io(err: io::Error) -> OmError {
    if err.get_ref().map(|inner| inner.is::<OmError>()).unwrap_or(false) {
        match err.into_inner().map(|inner| inner.downcast::<OmError>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => OmError::Io(io::Error::other(other)),
            None => OmError::Io(io::Error::other("unknown I/O failure")),
        }
    } else {
        OmError::Io(err)
    }
}

/// Read-once access to the body of one part
pub struct PartStream<'a> {
    content_id: Option<String>,
    headers: PartHeaders,
    inner: Box<dyn Read + 'a>,
}

impl PartStream<'_> {
    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    pub fn headers(&self) -> &PartHeaders {
        &self.headers
    }
}

impl Read for PartStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}
