//! quick-xml Token Source
//!
//! Converts quick-xml events into the owned vocabulary:
//! - `xmlns` attributes become namespace declarations
//! - empty elements are reported as a start followed by an end
//! - references to entities other than the predefined ones and character
//!   references are reported as [`XmlEvent::EntityReference`]
//! - the document type declaration is dropped
//!
//! When the whole input is held in memory, [`TokenSource::skip_subtree`]
//! returns the original bytes of the skipped element without building events.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::io::{BufRead, Cursor};

use bytes::{Bytes, BytesMut};
use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::name::QName as XmlName;
use quick_xml::Reader;
use tracing::trace;

use super::events::{Attribute, NamespaceDecl, RawName, StartElement, XmlEvent};
use super::source::TokenSource;
use crate::error::{OmError, Result};

/// Raw form of the most recently returned start tag
enum LastStart {
    /// Start tag of an element with content; `after` is the input offset just past it
    Open { tag: Vec<u8>, name: Vec<u8>, after: usize },
    /// Self-closing tag; its end event is queued
    Empty { tag: Vec<u8> },
}

/// Token source over a quick-xml reader
pub struct XmlReaderSource<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    /// Complete input, when known, for raw subtree capture
    retained: Option<Bytes>,
    pending: VecDeque<XmlEvent>,
    last_start: Option<LastStart>,
    started: bool,
    finished: bool,
}

impl XmlReaderSource<Cursor<Bytes>> {
    /// Source over an in-memory document; supports skip-ahead
    pub fn from_bytes(input: impl Into<Bytes>) -> Self {
        let input = input.into();
        let mut source = Self::build(Cursor::new(input.clone()));
        source.retained = Some(input);
        source
    }
}

impl<R: BufRead> XmlReaderSource<R> {
    /// Source over a stream; `skip_subtree` is not supported
    pub fn from_reader(reader: R) -> Self {
        Self::build(reader)
    }

    fn build(inner: R) -> Self {
        let mut reader = Reader::from_reader(inner);
        // Tag balance is checked by the tree builder
        reader.config_mut().check_end_names = false;
        XmlReaderSource {
            reader,
            buf: Vec::with_capacity(1024),
            retained: None,
            pending: VecDeque::new(),
            last_start: None,
            started: false,
            finished: false,
        }
    }

    fn read_raw(&mut self) -> Result<()> {
        loop {
            self.buf.clear();
            let event = self.reader.read_event_into(&mut self.buf)?;
            let position = self.reader.buffer_position() as usize;
            self.last_start = None;

            match event {
                Event::Start(e) => {
                    let start = convert_start(&e)?;
                    self.last_start = Some(LastStart::Open {
                        tag: wrap_tag(&e, b">"),
                        name: e.name().as_ref().to_vec(),
                        after: position,
                    });
                    self.pending.push_back(XmlEvent::StartElement(start));
                }
                Event::Empty(e) => {
                    let start = convert_start(&e)?;
                    let name = start.name.clone();
                    self.last_start = Some(LastStart::Empty {
                        tag: wrap_tag(&e, b"/>"),
                    });
                    self.pending.push_back(XmlEvent::StartElement(start));
                    self.pending.push_back(XmlEvent::EndElement(name));
                }
                Event::End(e) => {
                    let name = utf8(e.name().into_inner())?;
                    self.pending.push_back(XmlEvent::EndElement(RawName::parse(&name)));
                }
                Event::Text(t) => {
                    let escaped = utf8(&t)?;
                    if escaped.is_empty() {
                        continue;
                    }
                    split_references(&escaped, &mut self.pending)?;
                }
                Event::CData(c) => {
                    self.pending.push_back(XmlEvent::CData(utf8(&c)?.into_owned()));
                }
                Event::Comment(c) => {
                    self.pending.push_back(XmlEvent::Comment(utf8(&c)?.into_owned()));
                }
                Event::PI(pi) => {
                    let target = utf8(pi.target())?.into_owned();
                    let data = utf8(pi.content())?.trim_start().to_string();
                    self.pending.push_back(XmlEvent::ProcessingInstruction { target, data });
                }
                Event::Decl(d) => {
                    self.pending.push_back(convert_decl(&d)?);
                }
                Event::DocType(_) => continue,
                Event::Eof => {
                    self.finished = true;
                    self.pending.push_back(XmlEvent::EndDocument);
                }
            }
            return Ok(());
        }
    }
}

impl<R: BufRead> TokenSource for XmlReaderSource<R> {
    fn next_event(&mut self) -> Result<Option<XmlEvent>> {
        if self.pending.is_empty() {
            if self.finished {
                return Ok(None);
            }
            self.read_raw()?;
        }

        if !self.started {
            self.started = true;
            if !matches!(self.pending.front(), Some(XmlEvent::StartDocument { .. })) {
                return Ok(Some(XmlEvent::start_document()));
            }
        }

        let event = self.pending.pop_front();
        if !matches!(event, Some(XmlEvent::StartElement(_))) {
            self.last_start = None;
        }
        Ok(event)
    }

    fn skip_subtree(&mut self) -> Result<Option<Bytes>> {
        let Some(input) = self.retained.clone() else {
            return Ok(None);
        };
        match self.last_start.take() {
            None => Ok(None),
            Some(LastStart::Empty { tag }) => {
                // Drop the queued end event
                self.pending.pop_front();
                Ok(Some(Bytes::from(tag)))
            }
            Some(LastStart::Open { tag, name, after }) => {
                self.buf.clear();
                self.reader.read_to_end_into(XmlName(&name), &mut self.buf)?;
                let end = self.reader.buffer_position() as usize;
                let body = input.get(after..end).ok_or_else(|| {
                    OmError::Xml(format!("subtree span {}..{} outside input", after, end))
                })?;

                let mut raw = BytesMut::with_capacity(tag.len() + body.len());
                raw.extend_from_slice(&tag);
                raw.extend_from_slice(body);
                trace!(bytes = raw.len(), "skipped subtree");
                Ok(Some(raw.freeze()))
            }
        }
    }
}

/// Rebuild the markup of a start tag from its content
fn wrap_tag(e: &BytesStart<'_>, close: &[u8]) -> Vec<u8> {
    let mut tag = Vec::with_capacity(e.len() + 3);
    tag.push(b'<');
    tag.extend_from_slice(e);
    tag.extend_from_slice(close);
    tag
}

fn utf8(bytes: &[u8]) -> Result<Cow<'_, str>> {
    std::str::from_utf8(bytes)
        .map(Cow::Borrowed)
        .map_err(|e| OmError::Xml(format!("invalid UTF-8: {}", e)))
}

fn convert_start(e: &BytesStart<'_>) -> Result<StartElement> {
    let name = utf8(e.name().into_inner())?;
    let mut start = StartElement::new(&name);
    for attr in e.attributes() {
        let attr = attr?;
        let key = utf8(attr.key.as_ref())?;
        let value = attr.unescape_value()?;
        if key == "xmlns" {
            start.namespaces.push(NamespaceDecl::new(None, &value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            start.namespaces.push(NamespaceDecl::new(Some(prefix), &value));
        } else {
            start.attributes.push(Attribute {
                name: RawName::parse(&key),
                value: value.into_owned(),
            });
        }
    }
    Ok(start)
}

fn convert_decl(d: &BytesDecl<'_>) -> Result<XmlEvent> {
    let version = d.version()?;
    let encoding = match d.encoding() {
        Some(enc) => Some(utf8(&enc?)?.into_owned()),
        None => None,
    };
    let standalone = match d.standalone() {
        Some(sa) => Some(&*sa? == b"yes"),
        None => None,
    };
    Ok(XmlEvent::StartDocument {
        version: Some(utf8(&version)?.into_owned()),
        encoding,
        standalone,
    })
}

#[inline]
fn is_predefined(name: &str) -> bool {
    matches!(name, "lt" | "gt" | "amp" | "apos" | "quot") || name.starts_with('#')
}

/// Unescape text, reporting unknown entity references as separate events
fn split_references(escaped: &str, out: &mut VecDeque<XmlEvent>) -> Result<()> {
    let bytes = escaped.as_bytes();
    let mut segment = 0;
    let mut pos = 0;

    while let Some(found) = memchr::memchr(b'&', &bytes[pos..]) {
        let amp = pos + found;
        let Some(len) = memchr::memchr(b';', &bytes[amp..]) else {
            break;
        };
        let name = &escaped[amp + 1..amp + len];
        pos = amp + len + 1;
        if is_predefined(name) {
            continue;
        }
        push_text(&escaped[segment..amp], out)?;
        out.push_back(XmlEvent::EntityReference(name.to_string()));
        segment = pos;
    }
    push_text(&escaped[segment..], out)
}

fn push_text(escaped: &str, out: &mut VecDeque<XmlEvent>) -> Result<()> {
    if escaped.is_empty() {
        return Ok(());
    }
    let text = quick_xml::escape::unescape(escaped).map_err(|e| OmError::Xml(e.to_string()))?;
    out.push_back(XmlEvent::Characters(text.into_owned()));
    Ok(())
}
