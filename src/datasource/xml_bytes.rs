//! Serialized XML held in memory

use bytes::Bytes;

use super::{pump_events, DataSource};
use crate::error::Result;
use crate::reader::source::TokenSource;
use crate::reader::xml::XmlReaderSource;
use crate::writer::sink::EventSink;

/// Non-destructive source over the serialized form of one element
#[derive(Debug, Clone)]
pub struct XmlBytesSource {
    xml: Bytes,
    /// Bindings in scope where the bytes were captured
    namespaces: Vec<(Option<String>, String)>,
}

impl XmlBytesSource {
    pub fn new(xml: impl Into<Bytes>) -> Self {
        Self::with_namespaces(xml, Vec::new())
    }

    pub fn with_namespaces(xml: impl Into<Bytes>, namespaces: Vec<(Option<String>, String)>) -> Self {
        XmlBytesSource {
            xml: xml.into(),
            namespaces,
        }
    }

    pub fn xml(&self) -> &Bytes {
        &self.xml
    }
}

impl DataSource for XmlBytesSource {
    fn is_destructive(&self) -> bool {
        false
    }

    fn reader(&self) -> Result<Box<dyn TokenSource>> {
        Ok(Box::new(XmlReaderSource::from_bytes(self.xml.clone())))
    }

    fn push_to(&self, sink: &mut dyn EventSink) -> Result<bool> {
        if !sink.write_raw(&self.xml)? {
            let mut reader = self.reader()?;
            pump_events(reader.as_mut(), sink)?;
        }
        Ok(true)
    }

    fn copy(&self) -> Result<Box<dyn DataSource>> {
        Ok(Box::new(self.clone()))
    }

    fn namespaces(&self) -> &[(Option<String>, String)] {
        &self.namespaces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{EventRecorder, XmlWriterSink};

    #[test]
    fn test_push_raw_verbatim() {
        let source = XmlBytesSource::new(&b"<p:a  x='1'><b/></p:a>"[..]);
        let mut sink = XmlWriterSink::new(Vec::new());
        assert!(source.push_to(&mut sink).unwrap());
        assert_eq!(sink.into_inner(), b"<p:a  x='1'><b/></p:a>");
    }

    #[test]
    fn test_push_replays_events_into_event_sinks() {
        let source = XmlBytesSource::new(&b"<a><b/></a>"[..]);
        let mut recorder = EventRecorder::new();
        assert!(source.push_to(&mut recorder).unwrap());
        assert_eq!(recorder.events().len(), 4);
    }

    #[test]
    fn test_reread_and_copy() {
        let source = XmlBytesSource::with_namespaces(
            &b"<a/>"[..],
            vec![(Some("p".to_string()), "urn:p".to_string())],
        );
        assert!(!source.is_destructive());
        assert!(source.reader().is_ok());
        assert!(source.reader().is_ok());

        let copy = source.copy().unwrap();
        assert!(copy.reader().unwrap().next_event().unwrap().is_some());
        assert_eq!(source.namespaces().len(), 1);
        assert_eq!(copy.namespaces(), source.namespaces());
    }
}
