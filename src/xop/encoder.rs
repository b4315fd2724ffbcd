//! XOP encoding sink
//!
//! Wraps an event sink and applies the optimization policy to binary text:
//! inline content goes to the wrapped sink as base64, externalized content
//! is replaced by an `xop:Include` element and collected as an attachment.

use std::collections::HashSet;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use tracing::trace;

use super::policy::{OptimizationPolicy, Representation};
use crate::buffer::Blob;
use crate::error::Result;
use crate::om::{ns, BinaryText};
use crate::reader::events::{RawName, StartElement, XmlEvent};
use crate::uid::IdGenerator;
use crate::writer::sink::EventSink;

/// Characters escaped in `cid:` URLs
const CID_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'[')
    .add(b']')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Binary content moved out of the XML
#[derive(Debug, Clone)]
pub struct XopAttachment {
    pub content_id: String,
    pub content_type: Option<String>,
    pub blob: Blob,
}

/// `cid:` URL for a content ID
pub fn cid_url(content_id: &str) -> String {
    format!("cid:{}", utf8_percent_encode(content_id, CID_ESCAPE))
}

/// Sink applying an [`OptimizationPolicy`] to binary text
pub struct XopEncodingSink<S: EventSink> {
    inner: S,
    policy: OptimizationPolicy,
    ids: IdGenerator,
    attachments: Vec<XopAttachment>,
    used: HashSet<String>,
}

impl<S: EventSink> XopEncodingSink<S> {
    pub fn new(inner: S, policy: OptimizationPolicy, ids: IdGenerator) -> Self {
        XopEncodingSink {
            inner,
            policy,
            ids,
            attachments: Vec::new(),
            used: HashSet::new(),
        }
    }

    /// Attachments collected so far, in document order
    pub fn attachments(&self) -> &[XopAttachment] {
        &self.attachments
    }

    pub fn into_parts(self) -> (S, Vec<XopAttachment>, IdGenerator) {
        (self.inner, self.attachments, self.ids)
    }

    /// Content ID for an externalized node; a known ID is kept unless taken
    fn content_id(&mut self, binary: &BinaryText) -> String {
        let id = match &binary.content_id {
            Some(id) if !self.used.contains(id) => id.clone(),
            _ => self.ids.generate_id(),
        };
        self.used.insert(id.clone());
        id
    }
}

impl<S: EventSink> EventSink for XopEncodingSink<S> {
    fn write_event(&mut self, event: &XmlEvent) -> Result<()> {
        self.inner.write_event(event)
    }

    fn write_raw(&mut self, xml: &[u8]) -> Result<bool> {
        self.inner.write_raw(xml)
    }

    fn write_binary(&mut self, binary: &BinaryText) -> Result<()> {
        let decision = self.policy.decide(binary);
        trace!(bytes = binary.blob.len(), ?decision, "binary content");
        if decision == Representation::Inline {
            return self.inner.write_binary(binary);
        }

        let content_id = self.content_id(binary);
        let include = StartElement::new("xop:Include")
            .with_namespace(Some("xop"), ns::XOP_INCLUDE)
            .with_attribute("href", &cid_url(&content_id));
        self.inner.write_event(&XmlEvent::StartElement(include))?;
        self.inner
            .write_event(&XmlEvent::EndElement(RawName::new(Some("xop"), "Include")))?;

        self.attachments.push(XopAttachment {
            content_id,
            content_type: binary.content_type.clone(),
            blob: binary.blob.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{EventRecorder, XmlWriterSink};

    #[test]
    fn test_externalized_binary_becomes_include() {
        let mut sink = XopEncodingSink::new(
            XmlWriterSink::new(Vec::new()),
            OptimizationPolicy::externalize_all(),
            IdGenerator::with_host_suffix("example.org"),
        );
        let binary = BinaryText::new(Blob::from_slice(b"png")).with_content_id("img 1@x");
        sink.write_binary(&binary).unwrap();

        let (inner, attachments, _) = sink.into_parts();
        let xml = String::from_utf8(inner.into_inner()).unwrap();
        assert_eq!(
            xml,
            r#"<xop:Include xmlns:xop="http://www.w3.org/2004/08/xop/include" href="cid:img%201@x"></xop:Include>"#
        );
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].content_id, "img 1@x");
    }

    #[test]
    fn test_inline_binary_passes_through() {
        let mut sink = XopEncodingSink::new(
            EventRecorder::new(),
            OptimizationPolicy::inline_all(),
            IdGenerator::new(),
        );
        sink.write_binary(&BinaryText::new(Blob::from_slice(b"hi"))).unwrap();
        let (recorder, attachments, _) = sink.into_parts();
        assert!(attachments.is_empty());
        assert_eq!(recorder.events(), &[XmlEvent::Characters("aGk=".to_string())]);
    }

    #[test]
    fn test_repeated_content_id_gets_fresh_one() {
        let mut sink = XopEncodingSink::new(
            EventRecorder::new(),
            OptimizationPolicy::externalize_all(),
            IdGenerator::new(),
        );
        let binary = BinaryText::new(Blob::from_slice(b"x")).with_content_id("same@x");
        sink.write_binary(&binary).unwrap();
        sink.write_binary(&binary).unwrap();
        let ids: Vec<&str> = sink.attachments().iter().map(|a| a.content_id.as_str()).collect();
        assert_eq!(ids[0], "same@x");
        assert_ne!(ids[1], "same@x");
    }
}
