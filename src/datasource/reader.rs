//! One-shot stream source

use std::io::{BufReader, Read};

use parking_lot::Mutex;
use tracing::debug;

use super::{pump_events, DataSource};
use crate::error::{OmError, Result};
use crate::reader::source::TokenSource;
use crate::reader::xml::XmlReaderSource;
use crate::writer::sink::EventSink;

/// Destructive source wrapping a stream that can be read once
pub struct ReaderSource<R: Read> {
    inner: Mutex<Option<R>>,
}

impl<R: Read + 'static> ReaderSource<R> {
    pub fn new(inner: R) -> Self {
        ReaderSource {
            inner: Mutex::new(Some(inner)),
        }
    }

    /// Check if the stream was already handed out
    pub fn is_consumed(&self) -> bool {
        self.inner.lock().is_none()
    }

    fn take(&self) -> Result<R> {
        self.inner.lock().take().ok_or_else(|| {
            debug!("destructive source read twice");
            OmError::ContentAlreadyConsumed
        })
    }
}

impl<R: Read + 'static> DataSource for ReaderSource<R> {
    fn is_destructive(&self) -> bool {
        true
    }

    fn reader(&self) -> Result<Box<dyn TokenSource>> {
        let inner = self.take()?;
        Ok(Box::new(XmlReaderSource::from_reader(BufReader::new(inner))))
    }

    fn push_to(&self, sink: &mut dyn EventSink) -> Result<bool> {
        let mut inner = self.take()?;
        let mut xml = Vec::new();
        inner.read_to_end(&mut xml)?;
        if !sink.write_raw(&xml)? {
            let mut reader = XmlReaderSource::from_bytes(xml);
            pump_events(&mut reader, sink)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::XmlWriterSink;
    use std::io::Cursor;

    #[test]
    fn test_single_read() {
        let source = ReaderSource::new(Cursor::new(b"<a>once</a>".to_vec()));
        assert!(source.is_destructive());

        let mut reader = source.reader().unwrap();
        assert!(reader.next_event().unwrap().is_some());
        assert!(source.is_consumed());
        assert!(matches!(source.reader(), Err(OmError::ContentAlreadyConsumed)));
    }

    #[test]
    fn test_push_consumes() {
        let source = ReaderSource::new(Cursor::new(b"<a>once</a>".to_vec()));
        let mut sink = XmlWriterSink::new(Vec::new());
        assert!(source.push_to(&mut sink).unwrap());
        assert_eq!(sink.into_inner(), b"<a>once</a>");

        let mut again = XmlWriterSink::new(Vec::new());
        assert!(matches!(source.push_to(&mut again), Err(OmError::ContentAlreadyConsumed)));
    }

    #[test]
    fn test_not_copyable() {
        let source = ReaderSource::new(Cursor::new(Vec::new()));
        assert!(matches!(source.copy(), Err(OmError::NotCopyable)));
    }
}
